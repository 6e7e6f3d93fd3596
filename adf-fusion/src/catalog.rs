//! Attach surface: expose one container as a read-only schema of views.
//!
//! `attach` discovers the file once and registers a schema whose tables
//! are driven by the same bind machinery as the table functions; every
//! view shares the underlying file handle through the handle cache.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use adf_core::{AttachOptions, Error, RemoteOptions, Result};
use adf_hdf5::{discover, FileHandle, FileSchema};
use async_trait::async_trait;
use datafusion::catalog::SchemaProvider;
use datafusion::datasource::TableProvider;
use datafusion::error::{DataFusionError, Result as DfResult};
use datafusion::prelude::SessionContext;
use log::info;

use crate::provider::{df_err, AnnDataTable};
use crate::scan::{bind, ScanOptions, TableKind};

/// Parse `ATTACH`-style option pairs. Only `var_name_column` and
/// `var_id_column` are recognized; anything else is rejected.
pub fn parse_attach_options(pairs: &[(String, String)]) -> Result<AttachOptions> {
    let mut out = AttachOptions::default();
    for (key, value) in pairs {
        match key.to_ascii_lowercase().as_str() {
            "var_name_column" => out.var_name_column = Some(value.clone()),
            "var_id_column" => out.var_id_column = Some(value.clone()),
            other => {
                return Err(Error::Internal(format!(
                    "unrecognized attach option '{other}'"
                )))
            }
        }
    }
    Ok(out)
}

/// Attach `path` as schema `name` on the context's default catalog.
pub async fn attach(
    ctx: &SessionContext,
    path: &str,
    name: &str,
    options: AttachOptions,
    remote: RemoteOptions,
) -> Result<()> {
    let handle = adf_hdf5::open(path, Some(&remote))?;
    // Discovery also validates the container: obs or var must exist.
    let schema = discover(&handle)?;

    let provider = Arc::new(AnnDataSchemaProvider::new(
        path.to_string(),
        options,
        remote,
        handle,
        &schema,
    ));
    let catalog = ctx
        .catalog("datafusion")
        .ok_or_else(|| Error::Internal("default catalog is missing".to_string()))?;
    catalog
        .register_schema(name, provider)
        .map_err(|e| Error::External(Box::new(e)))?;
    info!("attached {path} as {name}");
    Ok(())
}

/// Detach a previously attached schema.
pub fn detach(ctx: &SessionContext, name: &str) -> Result<()> {
    let catalog = ctx
        .catalog("datafusion")
        .ok_or_else(|| Error::Internal("default catalog is missing".to_string()))?;
    let removed = catalog
        .deregister_schema(name, false)
        .map_err(|e| Error::External(Box::new(e)))?;
    if removed.is_none() {
        return Err(Error::Internal(format!("no attached database '{name}'")));
    }
    Ok(())
}

pub struct AnnDataSchemaProvider {
    path: String,
    options: AttachOptions,
    remote: RemoteOptions,
    tables: Vec<(String, TableKind)>,
    /// Keeps the container open for the lifetime of the attachment; every
    /// view revives this handle through the cache.
    _handle: Arc<FileHandle>,
}

impl AnnDataSchemaProvider {
    fn new(
        path: String,
        options: AttachOptions,
        remote: RemoteOptions,
        handle: Arc<FileHandle>,
        schema: &FileSchema,
    ) -> Self {
        Self {
            tables: table_list(schema),
            path,
            options,
            remote,
            _handle: handle,
        }
    }

    fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            var_name_col: self.options.var_name_column.clone(),
            var_id_col: self.options.var_id_column.clone(),
            mode: Default::default(),
            remote: self.remote.clone(),
        }
    }

    fn read_only_error(&self) -> DataFusionError {
        df_err(Error::ReadOnly(format!("attached AnnData '{}'", self.path)))
    }
}

fn table_list(schema: &FileSchema) -> Vec<(String, TableKind)> {
    let mut tables = vec![
        ("obs".to_string(), TableKind::Obs),
        ("var".to_string(), TableKind::Var),
    ];
    if schema.x.is_some() {
        tables.push(("X".to_string(), TableKind::X));
    }
    if !schema.uns_keys.is_empty() {
        tables.push(("uns".to_string(), TableKind::Uns));
    }
    for key in schema.obsm.keys() {
        tables.push((format!("obsm_{key}"), TableKind::Obsm(key.clone())));
    }
    for key in schema.varm.keys() {
        tables.push((format!("varm_{key}"), TableKind::Varm(key.clone())));
    }
    for key in schema.layers.keys() {
        tables.push((format!("layers_{key}"), TableKind::Layer(key.clone())));
    }
    for key in schema.obsp.keys() {
        tables.push((format!("obsp_{key}"), TableKind::Obsp(key.clone())));
    }
    for key in schema.varp.keys() {
        tables.push((format!("varp_{key}"), TableKind::Varp(key.clone())));
    }
    if schema.raw_x.is_some() {
        tables.push(("raw_X".to_string(), TableKind::RawX));
    }
    if schema.raw_var.is_some() {
        tables.push(("raw_var".to_string(), TableKind::RawVar));
    }
    for key in schema.raw_varm.keys() {
        tables.push((format!("raw_varm_{key}"), TableKind::RawVarm(key.clone())));
    }
    tables.push(("_info".to_string(), TableKind::Info));
    tables
}

impl fmt::Debug for AnnDataSchemaProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnnDataSchemaProvider")
            .field("path", &self.path)
            .field("tables", &self.tables.len())
            .finish()
    }
}

#[async_trait]
impl SchemaProvider for AnnDataSchemaProvider {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|(n, _)| n.clone()).collect()
    }

    async fn table(&self, name: &str) -> DfResult<Option<Arc<dyn TableProvider>>> {
        let Some((_, kind)) = self.tables.iter().find(|(n, _)| n == name) else {
            return Ok(None);
        };
        let bound = bind(
            std::slice::from_ref(&self.path),
            kind.clone(),
            &self.scan_options(),
        )
        .map_err(df_err)?;
        Ok(Some(Arc::new(AnnDataTable::new(bound))))
    }

    fn table_exist(&self, name: &str) -> bool {
        self.tables.iter().any(|(n, _)| n == name)
    }

    fn register_table(
        &self,
        _name: String,
        _table: Arc<dyn TableProvider>,
    ) -> DfResult<Option<Arc<dyn TableProvider>>> {
        Err(self.read_only_error())
    }

    fn deregister_table(&self, _name: &str) -> DfResult<Option<Arc<dyn TableProvider>>> {
        Err(self.read_only_error())
    }
}

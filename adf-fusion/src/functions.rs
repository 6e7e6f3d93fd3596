//! One table function per logical table, registered on a
//! `SessionContext`:
//!
//! ```sql
//! SELECT * FROM scan_obs('data/*.h5ad', 'union');
//! SELECT obs_idx, "GAPDH" FROM scan_x('f.h5ad');
//! SELECT * FROM scan_layers('f.h5ad', 'counts');
//! ```
//!
//! Arguments are positional string literals; the optional trailing ones
//! are `var_name_col` (X/layers) and `schema_mode`
//! (`'intersection'`/`'union'`).

use std::sync::Arc;

use adf_core::{RemoteOptions, SchemaMode};
use datafusion::catalog::TableFunctionImpl;
use datafusion::common::{plan_err, ScalarValue};
use datafusion::datasource::TableProvider;
use datafusion::error::Result as DfResult;
use datafusion::logical_expr::Expr;
use datafusion::prelude::SessionContext;

use crate::provider::{df_err, AnnDataTable};
use crate::scan::{bind, ScanOptions, TableKind};

fn string_args(name: &str, args: &[Expr]) -> DfResult<Vec<String>> {
    args.iter()
        .map(|arg| match arg {
            Expr::Literal(ScalarValue::Utf8(Some(s))) => Ok(s.clone()),
            other => plan_err!("{name}: arguments must be string literals, got {other}"),
        })
        .collect()
}

fn parse_mode(name: &str, s: &str) -> DfResult<SchemaMode> {
    s.parse::<SchemaMode>()
        .map_err(|_| {
            datafusion::common::DataFusionError::Plan(format!(
                "{name}: invalid schema_mode '{s}' (expected 'intersection' or 'union')"
            ))
        })
}

fn is_mode(s: &str) -> bool {
    matches!(
        s.to_ascii_lowercase().as_str(),
        "intersection" | "union"
    )
}

fn make_table(
    paths: Vec<String>,
    kind: TableKind,
    opts: ScanOptions,
) -> DfResult<Arc<dyn TableProvider>> {
    let bound = bind(&paths, kind, &opts).map_err(df_err)?;
    Ok(Arc::new(AnnDataTable::new(bound)))
}

/// `scan_obs(path [, schema_mode])` / `scan_var(path [, schema_mode])` /
/// `scan_uns(path)` / `info(path)`.
#[derive(Debug)]
pub struct SimpleScanFunc {
    name: &'static str,
    kind: TableKind,
    accepts_mode: bool,
    remote: RemoteOptions,
}

impl TableFunctionImpl for SimpleScanFunc {
    fn call(&self, args: &[Expr]) -> DfResult<Arc<dyn TableProvider>> {
        let args = string_args(self.name, args)?;
        let (min, max) = (1, 1 + self.accepts_mode as usize);
        if args.len() < min || args.len() > max {
            return plan_err!("{}: expected {min}..={max} arguments", self.name);
        }
        let mut opts = ScanOptions::with_remote(self.remote.clone());
        if let Some(mode) = args.get(1) {
            opts.mode = parse_mode(self.name, mode)?;
        }
        make_table(vec![args[0].clone()], self.kind.clone(), opts)
    }
}

/// `scan_x(path [, var_name_col] [, schema_mode])` and
/// `scan_layers(path, layer [, var_name_col] [, schema_mode])`.
#[derive(Debug)]
pub struct MatrixScanFunc {
    name: &'static str,
    layer: bool,
    remote: RemoteOptions,
}

impl TableFunctionImpl for MatrixScanFunc {
    fn call(&self, args: &[Expr]) -> DfResult<Arc<dyn TableProvider>> {
        let args = string_args(self.name, args)?;
        let fixed = 1 + self.layer as usize;
        if args.len() < fixed || args.len() > fixed + 2 {
            return plan_err!("{}: expected {fixed}..={} arguments", self.name, fixed + 2);
        }

        let kind = if self.layer {
            TableKind::Layer(args[1].clone())
        } else {
            TableKind::X
        };

        let mut opts = ScanOptions::with_remote(self.remote.clone());
        let mut rest = args[fixed..].iter();
        if let Some(first) = rest.next() {
            if is_mode(first) {
                opts.mode = parse_mode(self.name, first)?;
            } else {
                opts.var_name_col = Some(first.clone());
            }
        }
        if let Some(second) = rest.next() {
            opts.mode = parse_mode(self.name, second)?;
        }
        make_table(vec![args[0].clone()], kind, opts)
    }
}

/// `scan_obsm(path, name [, schema_mode])` and friends; graphs reject the
/// mode argument.
#[derive(Debug)]
pub struct NamedScanFunc {
    name: &'static str,
    graph: bool,
    obs_axis: bool,
    remote: RemoteOptions,
}

impl TableFunctionImpl for NamedScanFunc {
    fn call(&self, args: &[Expr]) -> DfResult<Arc<dyn TableProvider>> {
        let args = string_args(self.name, args)?;
        let max = if self.graph { 2 } else { 3 };
        if args.len() < 2 || args.len() > max {
            return plan_err!("{}: expected 2..={max} arguments", self.name);
        }
        let kind = match (self.graph, self.obs_axis) {
            (false, true) => TableKind::Obsm(args[1].clone()),
            (false, false) => TableKind::Varm(args[1].clone()),
            (true, true) => TableKind::Obsp(args[1].clone()),
            (true, false) => TableKind::Varp(args[1].clone()),
        };
        let mut opts = ScanOptions::with_remote(self.remote.clone());
        if let Some(mode) = args.get(2) {
            opts.mode = parse_mode(self.name, mode)?;
        }
        make_table(vec![args[0].clone()], kind, opts)
    }
}

/// Register every table function on the context.
pub fn register_all(ctx: &SessionContext, remote: RemoteOptions) {
    // The LZF filter must be in place before any scan touches a
    // compressed dataset.
    adf_hdf5::lzf::ensure_registered();

    let simple = |name, kind, accepts_mode| {
        Arc::new(SimpleScanFunc {
            name,
            kind,
            accepts_mode,
            remote: remote.clone(),
        })
    };
    ctx.register_udtf("scan_obs", simple("scan_obs", TableKind::Obs, true));
    ctx.register_udtf("scan_var", simple("scan_var", TableKind::Var, true));
    ctx.register_udtf("scan_uns", simple("scan_uns", TableKind::Uns, false));
    ctx.register_udtf("info", simple("info", TableKind::Info, false));

    ctx.register_udtf(
        "scan_x",
        Arc::new(MatrixScanFunc {
            name: "scan_x",
            layer: false,
            remote: remote.clone(),
        }),
    );
    ctx.register_udtf(
        "scan_layers",
        Arc::new(MatrixScanFunc {
            name: "scan_layers",
            layer: true,
            remote: remote.clone(),
        }),
    );

    let named = |name, graph, obs_axis| {
        Arc::new(NamedScanFunc {
            name,
            graph,
            obs_axis,
            remote: remote.clone(),
        })
    };
    ctx.register_udtf("scan_obsm", named("scan_obsm", false, true));
    ctx.register_udtf("scan_varm", named("scan_varm", false, false));
    ctx.register_udtf("scan_obsp", named("scan_obsp", true, true));
    ctx.register_udtf("scan_varp", named("scan_varp", true, false));
}

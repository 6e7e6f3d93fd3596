//! Bind and scan for every logical table.
//!
//! Bind runs once per query: paths expand, per-file structure is
//! discovered, multi-file schemas harmonize, and the var-name vectors for
//! X/layers are read and kept. The scan is a pull-based iterator that
//! fills one record batch per call, walking files in lexicographic order
//! and rows in ascending order within each file.

use std::sync::Arc;

use adf_core::options::DEFAULT_BATCH_ROWS;
use adf_core::{Error, RemoteOptions, Result, SchemaMode};
use adf_hdf5::detect::{self, VarColumns};
use adf_hdf5::schema::ColumnSchema;
use adf_hdf5::uns::UnsRow;
use adf_hdf5::{discover, FileHandle, FileSchema, FrameReader, FrameSchema, MatrixReader};
use arrow_array::builder::{ListBuilder, StringBuilder};
use arrow_array::{
    new_null_array, Array, ArrayRef, Int64Array, RecordBatch, RecordBatchOptions, StringArray,
};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use log::debug;

use crate::harmonize::{self, ABSENT};

/// One logical table over one path set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableKind {
    Obs,
    Var,
    X,
    Layer(String),
    Obsm(String),
    Varm(String),
    Obsp(String),
    Varp(String),
    Uns,
    Info,
    RawX,
    RawVar,
    RawVarm(String),
}

impl TableKind {
    fn is_frame(&self) -> bool {
        matches!(self, Self::Obs | Self::Var | Self::RawVar)
    }

    fn is_matrix(&self) -> bool {
        matches!(self, Self::X | Self::Layer(_) | Self::RawX)
    }

    fn is_aux(&self) -> bool {
        matches!(self, Self::Obsm(_) | Self::Varm(_) | Self::RawVarm(_))
    }

    fn is_graph(&self) -> bool {
        matches!(self, Self::Obsp(_) | Self::Varp(_))
    }

    /// Name of the synthesized position-index column, when the kind has
    /// one.
    fn index_name(&self) -> Option<&'static str> {
        match self {
            Self::Obs | Self::Obsm(_) => Some("obs_idx"),
            Self::Var | Self::Varm(_) | Self::RawVar | Self::RawVarm(_) => Some("var_idx"),
            Self::X | Self::Layer(_) | Self::RawX => Some("obs_idx"),
            _ => None,
        }
    }
}

/// Options accepted by the table functions.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub var_name_col: Option<String>,
    pub var_id_col: Option<String>,
    pub mode: SchemaMode,
    pub remote: RemoteOptions,
}

impl ScanOptions {
    pub fn with_remote(remote: RemoteOptions) -> Self {
        Self {
            remote,
            ..Self::default()
        }
    }
}

/// Everything the scan needs, computed once.
pub struct ScanBind {
    pub kind: TableKind,
    pub files: Vec<String>,
    pub multi: bool,
    pub schema: SchemaRef,
    pub mode: SchemaMode,
    pub remote: RemoteOptions,
    pub var_columns: VarColumns,

    handles: Vec<Arc<FileHandle>>,
    file_schemas: Vec<FileSchema>,
    /// Frame scans: result column -> index into the file's frame columns.
    column_maps: Vec<Vec<i64>>,
    /// X/layers: per-file mangled var-name vectors (bind-time cache).
    var_names: Vec<Vec<String>>,
    /// X/layers: harmonized result var names.
    result_vars: Vec<String>,
    /// Coerced value type for matrix/aux/graph scans.
    value_type: DataType,
    /// obsm/varm: harmonized dimension count, and per-file actual.
    aux_dims: usize,
    aux_dims_per_file: Vec<usize>,
}

impl ScanBind {
    /// Number of leading synthesized columns (`_file_name`, index).
    fn payload_start(&self) -> usize {
        (self.multi as usize) + self.kind.index_name().is_some() as usize
    }

    fn file_name_slot(&self) -> Option<usize> {
        self.multi.then_some(0)
    }

    fn index_slot(&self) -> Option<usize> {
        self.kind.index_name().map(|_| self.multi as usize)
    }

    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

pub fn bind(paths: &[String], kind: TableKind, opts: &ScanOptions) -> Result<ScanBind> {
    let (files, was_pattern) = crate::globbing::expand(paths, &opts.remote)?;
    let multi = was_pattern || files.len() > 1;

    let mut handles = Vec::with_capacity(files.len());
    let mut file_schemas = Vec::with_capacity(files.len());
    for file in &files {
        let handle = adf_hdf5::open(file, Some(&opts.remote))?;
        let schema = discover(&handle)?;
        handles.push(handle);
        file_schemas.push(schema);
    }

    let mut bind = ScanBind {
        kind: kind.clone(),
        files,
        multi,
        schema: Arc::new(Schema::empty()),
        mode: opts.mode,
        remote: opts.remote.clone(),
        var_columns: VarColumns::default(),
        handles,
        file_schemas,
        column_maps: Vec::new(),
        var_names: Vec::new(),
        result_vars: Vec::new(),
        value_type: DataType::Float64,
        aux_dims: 0,
        aux_dims_per_file: Vec::new(),
    };

    let mut fields: Vec<Field> = Vec::new();
    if bind.multi {
        fields.push(Field::new("_file_name", DataType::Utf8, false));
    }
    if let Some(idx) = kind.index_name() {
        fields.push(Field::new(idx, DataType::Int64, false));
    }

    if kind.is_frame() {
        bind_frame(&mut bind, &mut fields)?;
    } else if kind.is_matrix() {
        bind_matrix(&mut bind, opts, &mut fields)?;
    } else if kind.is_aux() {
        bind_aux(&mut bind, &mut fields)?;
    } else if kind.is_graph() {
        bind_graph(&mut bind, &mut fields)?;
    } else if kind == TableKind::Uns {
        for name in ["key", "kind", "dtype", "shape"] {
            fields.push(Field::new(name, DataType::Utf8, false));
        }
        fields.push(Field::new(
            "value",
            DataType::List(Arc::new(Field::new("item", DataType::Utf8, true))),
            true,
        ));
    } else {
        // Info
        fields.push(Field::new("property", DataType::Utf8, false));
        fields.push(Field::new("value", DataType::Utf8, true));
    }

    let names = harmonize::mangle(fields.iter().map(|f| f.name().clone()).collect());
    let fields: Vec<Field> = fields
        .into_iter()
        .zip(names)
        .map(|(f, n)| f.with_name(n))
        .collect();
    bind.schema = Arc::new(Schema::new(fields));
    Ok(bind)
}

fn frame_path(kind: &TableKind) -> &'static str {
    match kind {
        TableKind::Var | TableKind::Varm(_) | TableKind::Varp(_) => "var",
        TableKind::RawVar | TableKind::RawVarm(_) | TableKind::RawX => "raw/var",
        _ => "obs",
    }
}

fn frame_of<'a>(kind: &TableKind, fs: &'a FileSchema) -> Result<&'a FrameSchema> {
    match kind {
        TableKind::Var => fs.var_frame(),
        TableKind::RawVar | TableKind::RawX => fs
            .raw_var
            .as_ref()
            .ok_or_else(|| Error::SchemaMismatch(format!("{} has no raw/var", fs.path))),
        _ => fs.obs_frame(),
    }
}

fn bind_frame(bind: &mut ScanBind, fields: &mut Vec<Field>) -> Result<()> {
    let frames: Vec<&FrameSchema> = bind
        .file_schemas
        .iter()
        .map(|fs| frame_of(&bind.kind, fs))
        .collect::<Result<_>>()?;

    if frames.len() == 1 {
        let frame = frames[0];
        bind.column_maps = vec![(0..frame.columns.len() as i64).collect()];
        for col in &frame.columns {
            fields.push(Field::new(&col.name, col.dtype.clone(), true));
        }
    } else {
        let harmonized = harmonize::harmonize_frames(&frames, bind.mode)?;
        for (name, dtype) in &harmonized.columns {
            fields.push(Field::new(name, dtype.clone(), true));
        }
        bind.column_maps = harmonized.maps;
    }
    Ok(())
}

fn matrix_layout<'a>(
    kind: &TableKind,
    fs: &'a FileSchema,
) -> Result<&'a adf_hdf5::MatrixLayout> {
    let found = match kind {
        TableKind::X => fs.x.as_ref(),
        TableKind::RawX => fs.raw_x.as_ref(),
        TableKind::Layer(name) => fs.layers.get(name),
        TableKind::Obsm(name) => fs.obsm.get(name),
        TableKind::Varm(name) => fs.varm.get(name),
        TableKind::RawVarm(name) => fs.raw_varm.get(name),
        TableKind::Obsp(name) => fs.obsp.get(name),
        TableKind::Varp(name) => fs.varp.get(name),
        _ => None,
    };
    found.ok_or_else(|| {
        Error::SchemaMismatch(format!("{} has no {:?}", fs.path, kind))
    })
}

/// Read one file's var-name vector with the chosen (or detected) column.
fn var_names_for_file(
    bind: &ScanBind,
    file_idx: usize,
    opts: &ScanOptions,
) -> Result<(Vec<String>, VarColumns)> {
    let fs = &bind.file_schemas[file_idx];
    let handle = &bind.handles[file_idx];
    let var_kind = if matches!(bind.kind, TableKind::RawX) {
        TableKind::RawVar
    } else {
        TableKind::Var
    };
    let frame = frame_of(&var_kind, fs)?;
    let reader = FrameReader::new(handle.clone(), frame_path(&var_kind), frame.kind);

    let chosen = detect::detect_var_columns(
        &reader,
        frame,
        opts.var_name_col.as_deref(),
        opts.var_id_col.as_deref(),
    )?;

    let names = match chosen.name_column.as_deref().and_then(|n| frame.column(n)) {
        Some(col) => {
            let array = reader.read_column(col, 0, frame.n_rows)?;
            let strings = array
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| {
                    Error::SchemaMismatch(format!(
                        "{}: var name column '{}' is not text",
                        fs.path, col.name
                    ))
                })?;
            (0..strings.len())
                .map(|i| {
                    if strings.is_null(i) {
                        String::new()
                    } else {
                        strings.value(i).to_string()
                    }
                })
                .collect()
        }
        // No usable name column anywhere: fall back to positional names.
        None => (0..frame.n_rows).map(|i| format!("var_{i}")).collect(),
    };
    Ok((harmonize::mangle(names), chosen))
}

fn bind_matrix(bind: &mut ScanBind, opts: &ScanOptions, fields: &mut Vec<Field>) -> Result<()> {
    let mut value_type: Option<DataType> = None;
    for fs in &bind.file_schemas {
        let layout = matrix_layout(&bind.kind, fs)?;
        value_type = Some(match value_type {
            None => layout.value_type.clone(),
            Some(t) => harmonize::coerce(&t, &layout.value_type)?,
        });
    }
    bind.value_type = value_type.expect("at least one file");

    for i in 0..bind.file_schemas.len() {
        let (names, chosen) = var_names_for_file(bind, i, opts)?;
        if i == 0 {
            bind.var_columns = chosen;
        }
        bind.var_names.push(names);
    }
    bind.result_vars = harmonize::harmonize_var_names(&bind.var_names, bind.mode)?;

    for name in &bind.result_vars {
        fields.push(Field::new(name, bind.value_type.clone(), true));
    }
    Ok(())
}

fn bind_aux(bind: &mut ScanBind, fields: &mut Vec<Field>) -> Result<()> {
    let mut dims: Option<usize> = None;
    let mut value_type: Option<DataType> = None;
    for fs in &bind.file_schemas {
        let layout = matrix_layout(&bind.kind, fs)?;
        let file_dims = layout.shape.1;
        bind.aux_dims_per_file.push(file_dims);
        dims = Some(match (dims, bind.mode) {
            (None, _) => file_dims,
            (Some(d), SchemaMode::Intersection) => d.min(file_dims),
            (Some(d), SchemaMode::Union) => d.max(file_dims),
        });
        value_type = Some(match value_type {
            None => layout.value_type.clone(),
            Some(t) => harmonize::coerce(&t, &layout.value_type)?,
        });
    }
    bind.aux_dims = dims.unwrap_or(0);
    bind.value_type = value_type.expect("at least one file");

    for d in 0..bind.aux_dims {
        fields.push(Field::new(
            format!("dim_{d}"),
            bind.value_type.clone(),
            true,
        ));
    }
    Ok(())
}

fn bind_graph(bind: &mut ScanBind, fields: &mut Vec<Field>) -> Result<()> {
    let mut value_type: Option<DataType> = None;
    for fs in &bind.file_schemas {
        let layout = matrix_layout(&bind.kind, fs)?;
        value_type = Some(match value_type {
            None => layout.value_type.clone(),
            Some(t) => harmonize::coerce(&t, &layout.value_type)?,
        });
    }
    bind.value_type = value_type.expect("at least one file");

    fields.push(Field::new("row", DataType::Int64, false));
    fields.push(Field::new("col", DataType::Int64, false));
    fields.push(Field::new("value", bind.value_type.clone(), false));
    Ok(())
}

enum FileCursor {
    Frame {
        reader: FrameReader,
        columns: Vec<ColumnSchema>,
        map: Vec<i64>,
        n_rows: usize,
    },
    Matrix {
        reader: MatrixReader,
        /// Projected result var index -> file column, [`ABSENT`] for NULL.
        var_map: Vec<(usize, i64)>,
        n_rows: usize,
    },
    Aux {
        reader: MatrixReader,
        dims: usize,
        n_rows: usize,
    },
    Graph {
        reader: MatrixReader,
        major: usize,
    },
    Rows {
        property: Vec<String>,
        value: Vec<Option<String>>,
    },
    Uns {
        rows: Vec<UnsRow>,
    },
}

/// Pull-based scan over the bound files.
pub struct ScanStream {
    bind: Arc<ScanBind>,
    projection: Vec<usize>,
    projected: SchemaRef,
    file_idx: usize,
    cursor: usize,
    current: Option<FileCursor>,
    finished: bool,
}

impl ScanStream {
    pub fn new(bind: Arc<ScanBind>, projection: Option<Vec<usize>>) -> Result<Self> {
        let projection =
            projection.unwrap_or_else(|| (0..bind.schema.fields().len()).collect());
        let projected = Arc::new(bind.schema.project(&projection).map_err(|e| {
            Error::Internal(format!("projection out of range: {e}"))
        })?);
        Ok(Self {
            bind,
            projection,
            projected,
            file_idx: 0,
            cursor: 0,
            current: None,
            finished: false,
        })
    }

    pub fn schema(&self) -> SchemaRef {
        self.projected.clone()
    }

    fn init_file(&mut self) -> Result<FileCursor> {
        let bind = &self.bind;
        let kind = &bind.kind;
        let handle = bind.handles[self.file_idx].clone();
        let fs = &bind.file_schemas[self.file_idx];
        debug!("scan {:?}: opening {}", kind, fs.path);

        if kind.is_frame() {
            let frame = frame_of(kind, fs)?;
            Ok(FileCursor::Frame {
                reader: FrameReader::new(handle, frame_path(kind), frame.kind),
                columns: frame.columns.clone(),
                map: bind.column_maps[self.file_idx].clone(),
                n_rows: frame.n_rows,
            })
        } else if kind.is_matrix() {
            let layout = matrix_layout(kind, fs)?;
            let reader = MatrixReader::open(handle, layout)?;
            // Lazy, projection-restricted var mapping: only projected
            // result columns are resolved against this file's names.
            let start = bind.payload_start();
            let file_names = &bind.var_names[self.file_idx];
            let wanted: Vec<String> = self
                .projection
                .iter()
                .filter(|&&p| p >= start)
                .map(|&p| bind.result_vars[p - start].clone())
                .collect();
            let map = harmonize::var_map_for_file(&wanted, file_names);
            let var_map = self
                .projection
                .iter()
                .filter(|&&p| p >= start)
                .map(|&p| p - start)
                .zip(map)
                .collect();
            Ok(FileCursor::Matrix {
                reader,
                var_map,
                n_rows: layout.shape.0,
            })
        } else if kind.is_aux() {
            let layout = matrix_layout(kind, fs)?;
            Ok(FileCursor::Aux {
                reader: MatrixReader::open(handle, layout)?,
                dims: bind.aux_dims_per_file[self.file_idx],
                n_rows: layout.shape.0,
            })
        } else if kind.is_graph() {
            let layout = matrix_layout(kind, fs)?;
            let reader = MatrixReader::open(handle, layout)?;
            let major = reader.major_len();
            Ok(FileCursor::Graph { reader, major })
        } else if *kind == TableKind::Uns {
            Ok(FileCursor::Uns {
                rows: adf_hdf5::uns::flatten(&handle)?,
            })
        } else {
            let (property, value) = info_rows(fs, &handle);
            Ok(FileCursor::Rows { property, value })
        }
    }

    fn advance_file(&mut self) {
        self.current = None;
        self.file_idx += 1;
        self.cursor = 0;
    }

    /// Assemble one batch from the current file, or `None` when the file
    /// is exhausted.
    fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        let total = match self.current.as_ref().expect("cursor initialized") {
            FileCursor::Frame { n_rows, .. } => *n_rows,
            FileCursor::Matrix { n_rows, .. } => *n_rows,
            FileCursor::Aux { n_rows, .. } => *n_rows,
            FileCursor::Graph { major, .. } => *major,
            FileCursor::Rows { property, .. } => property.len(),
            FileCursor::Uns { rows } => rows.len(),
        };
        if self.cursor >= total {
            return Ok(None);
        }
        let to_read = DEFAULT_BATCH_ROWS.min(total - self.cursor);
        let offset = self.cursor;
        self.cursor += to_read;

        let bind = self.bind.clone();
        let base_name = bind.handles[self.file_idx].base_name().to_string();

        // Payload arrays first; graph batches have data-dependent
        // cardinality.
        let (n_rows, payload) = self.payload_arrays(offset, to_read)?;

        let mut columns: Vec<ArrayRef> = Vec::with_capacity(self.projection.len());
        let mut payload_iter = payload.into_iter();
        for &p in &self.projection {
            if Some(p) == bind.file_name_slot() {
                columns.push(Arc::new(StringArray::from_iter_values(
                    std::iter::repeat(base_name.as_str()).take(n_rows),
                )));
            } else if Some(p) == bind.index_slot() {
                columns.push(Arc::new(Int64Array::from_iter_values(
                    (offset as i64)..(offset + to_read) as i64,
                )));
            } else {
                let array = payload_iter.next().ok_or_else(|| {
                    Error::Internal("payload column count mismatch".to_string())
                })?;
                // Per-file types may be narrower than the coerced result.
                let field = self.projected.field(columns.len());
                let array = if array.data_type() != field.data_type() {
                    arrow::compute::cast(&array, field.data_type())
                        .map_err(|e| Error::External(Box::new(e)))?
                } else {
                    array
                };
                columns.push(array);
            }
        }

        let options = RecordBatchOptions::new().with_row_count(Some(n_rows));
        RecordBatch::try_new_with_options(self.projected.clone(), columns, &options)
            .map(Some)
            .map_err(|e| Error::External(Box::new(e)))
    }

    /// Batch cardinality plus arrays for the projected payload columns
    /// (everything after the synthesized ones), in projection order.
    fn payload_arrays(
        &mut self,
        offset: usize,
        to_read: usize,
    ) -> Result<(usize, Vec<ArrayRef>)> {
        let bind = self.bind.clone();
        let start = bind.payload_start();
        let wanted: Vec<usize> = self
            .projection
            .iter()
            .filter(|&&p| p >= start)
            .map(|&p| p - start)
            .collect();

        let cursor = self.current.as_mut().expect("cursor initialized");
        match cursor {
            FileCursor::Frame {
                reader,
                columns,
                map,
                ..
            } => {
                let mut out = Vec::with_capacity(wanted.len());
                for &j in &wanted {
                    let field_type = bind.schema.field(start + j).data_type();
                    match map.get(j).copied().unwrap_or(ABSENT) {
                        ABSENT => out.push(new_null_array(field_type, to_read)),
                        pos => {
                            let col = &columns[pos as usize];
                            out.push(reader.read_column(col, offset, to_read)?);
                        }
                    }
                }
                Ok((to_read, out))
            }
            FileCursor::Matrix {
                reader, var_map, ..
            } => {
                // One batched read for every projected, present column.
                let present: Vec<usize> = var_map
                    .iter()
                    .filter(|(_, file_col)| *file_col != ABSENT)
                    .map(|(_, file_col)| *file_col as usize)
                    .collect();
                let mut arrays = reader.read_columns(offset, to_read, &present)?.into_iter();
                let mut out = Vec::with_capacity(var_map.len());
                for (_, file_col) in var_map.iter() {
                    if *file_col == ABSENT {
                        out.push(new_null_array(&bind.value_type, to_read));
                    } else {
                        out.push(arrays.next().expect("one array per present column"));
                    }
                }
                Ok((to_read, out))
            }
            FileCursor::Aux { reader, dims, .. } => {
                let present: Vec<usize> =
                    wanted.iter().copied().filter(|&d| d < *dims).collect();
                let mut arrays = reader.read_columns(offset, to_read, &present)?.into_iter();
                let mut out = Vec::with_capacity(wanted.len());
                for &d in &wanted {
                    if d < *dims {
                        out.push(arrays.next().expect("one array per present dim"));
                    } else {
                        out.push(new_null_array(&bind.value_type, to_read));
                    }
                }
                Ok((to_read, out))
            }
            FileCursor::Graph { reader, .. } => {
                let (rows, cols, vals) = reader.read_triplets(offset, to_read)?;
                let n = rows.len();
                let all = [rows, cols, vals];
                Ok((n, wanted.iter().map(|&j| all[j].clone()).collect()))
            }
            FileCursor::Rows { property, value } => {
                let props: Vec<&str> = property[offset..offset + to_read]
                    .iter()
                    .map(String::as_str)
                    .collect();
                let vals: Vec<Option<&str>> = value[offset..offset + to_read]
                    .iter()
                    .map(|v| v.as_deref())
                    .collect();
                let all: [ArrayRef; 2] = [
                    Arc::new(StringArray::from(props)),
                    Arc::new(StringArray::from(vals)),
                ];
                Ok((to_read, wanted.iter().map(|&j| all[j].clone()).collect()))
            }
            FileCursor::Uns { rows } => {
                let slice = &rows[offset..offset + to_read];
                let key: ArrayRef = Arc::new(StringArray::from_iter_values(
                    slice.iter().map(|r| r.key.as_str()),
                ));
                let kind: ArrayRef = Arc::new(StringArray::from_iter_values(
                    slice.iter().map(|r| r.kind),
                ));
                let dtype: ArrayRef = Arc::new(StringArray::from_iter_values(
                    slice.iter().map(|r| r.dtype.as_str()),
                ));
                let shape: ArrayRef = Arc::new(StringArray::from_iter_values(
                    slice.iter().map(|r| r.shape.as_str()),
                ));
                let mut builder = ListBuilder::new(StringBuilder::new());
                for row in slice {
                    match &row.value {
                        Some(items) => {
                            for item in items {
                                builder.values().append_value(item);
                            }
                            builder.append(true);
                        }
                        None => builder.append(false),
                    }
                }
                let value: ArrayRef = Arc::new(builder.finish());
                let all = [key, kind, dtype, shape, value];
                Ok((to_read, wanted.iter().map(|&j| all[j].clone()).collect()))
            }
        }
    }
}

impl Iterator for ScanStream {
    type Item = Result<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.finished {
                return None;
            }
            if self.current.is_none() {
                if self.file_idx >= self.bind.files.len() {
                    self.finished = true;
                    return None;
                }
                match self.init_file() {
                    Ok(cursor) => self.current = Some(cursor),
                    Err(e) => {
                        self.finished = true;
                        return Some(Err(e));
                    }
                }
            }
            match self.next_batch() {
                Ok(Some(batch)) => return Some(Ok(batch)),
                Ok(None) => {
                    self.advance_file();
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

fn join_keys<'a>(keys: impl Iterator<Item = &'a String>) -> String {
    keys.map(String::as_str).collect::<Vec<_>>().join(",")
}

fn info_rows(fs: &FileSchema, handle: &FileHandle) -> (Vec<String>, Vec<Option<String>>) {
    let mut rows: Vec<(String, Option<String>)> = vec![
        ("file_name".into(), Some(handle.base_name().to_string())),
        ("n_obs".into(), Some(fs.n_obs.to_string())),
        ("n_var".into(), Some(fs.n_var.to_string())),
        (
            "x_format".into(),
            Some(
                fs.x.as_ref()
                    .map(|x| x.format.as_str().to_string())
                    .unwrap_or_else(|| "none".to_string()),
            ),
        ),
        (
            "x_dtype".into(),
            fs.x.as_ref().map(|x| x.value_type.to_string()),
        ),
        (
            "x_shape".into(),
            fs.x.as_ref()
                .map(|x| format!("{}x{}", x.shape.0, x.shape.1)),
        ),
        ("obsm_keys".into(), Some(join_keys(fs.obsm.keys()))),
        ("varm_keys".into(), Some(join_keys(fs.varm.keys()))),
        ("layers_keys".into(), Some(join_keys(fs.layers.keys()))),
        ("obsp_keys".into(), Some(join_keys(fs.obsp.keys()))),
        ("varp_keys".into(), Some(join_keys(fs.varp.keys()))),
        ("uns_keys".into(), Some(fs.uns_keys.join(","))),
        (
            "raw".into(),
            Some(if fs.raw_x.is_some() || fs.raw_var.is_some() {
                "present".to_string()
            } else {
                "absent".to_string()
            }),
        ),
    ];
    let property = rows.iter().map(|(p, _)| p.clone()).collect();
    let value = rows.drain(..).map(|(_, v)| v).collect();
    (property, value)
}

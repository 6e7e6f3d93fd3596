//! Structure discovery: what frames, matrices and metadata a container
//! actually holds, and how their HDF5 types map onto engine types.

use std::collections::BTreeMap;

use adf_core::{Error, Result};
use arrow_schema::DataType;
use hdf5::types::{FloatSize, IntSize, TypeDescriptor};
use hdf5::{Dataset, Group, Location};
use log::debug;

use crate::handle::FileHandle;

pub const OBS: &str = "obs";
pub const VAR: &str = "var";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Child datasets are the columns.
    Group,
    /// A single compound dataset; fields are the columns.
    Compound,
}

#[derive(Debug, Clone)]
pub struct ColumnSchema {
    /// Display name, unique within the frame.
    pub name: String,
    /// Original HDF5 name (dataset or compound field), kept for reads.
    pub hdf5_name: String,
    pub dtype: DataType,
    /// Stored element type; for categoricals, the type of `categories`.
    pub hdf5_type: TypeDescriptor,
    pub categorical: bool,
}

#[derive(Debug, Clone)]
pub struct FrameSchema {
    pub kind: FrameKind,
    pub n_rows: usize,
    pub columns: Vec<ColumnSchema>,
    /// Display name of the frame's primary identifier column.
    pub index_column: Option<String>,
}

impl FrameSchema {
    pub fn column(&self, display_name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == display_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixFormat {
    Dense,
    CsrMatrix,
    CscMatrix,
}

impl MatrixFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dense => "dense",
            Self::CsrMatrix => "csr_matrix",
            Self::CscMatrix => "csc_matrix",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatrixLayout {
    pub format: MatrixFormat,
    pub shape: (usize, usize),
    pub value_type: DataType,
    /// Path inside the file (`X`, `layers/counts`, `obsp/distances`, ...).
    pub path: String,
}

/// Everything discovered about one container at bind time.
#[derive(Debug, Clone)]
pub struct FileSchema {
    pub path: String,
    pub n_obs: usize,
    pub n_var: usize,
    pub obs: Option<FrameSchema>,
    pub var: Option<FrameSchema>,
    pub x: Option<MatrixLayout>,
    pub layers: BTreeMap<String, MatrixLayout>,
    pub obsm: BTreeMap<String, MatrixLayout>,
    pub varm: BTreeMap<String, MatrixLayout>,
    pub obsp: BTreeMap<String, MatrixLayout>,
    pub varp: BTreeMap<String, MatrixLayout>,
    pub uns_keys: Vec<String>,
    pub raw_x: Option<MatrixLayout>,
    pub raw_var: Option<FrameSchema>,
    pub raw_varm: BTreeMap<String, MatrixLayout>,
}

impl FileSchema {
    pub fn obs_frame(&self) -> Result<&FrameSchema> {
        self.obs
            .as_ref()
            .ok_or_else(|| Error::InvalidFile(self.path.clone()))
    }

    pub fn var_frame(&self) -> Result<&FrameSchema> {
        self.var
            .as_ref()
            .ok_or_else(|| Error::InvalidFile(self.path.clone()))
    }
}

/// Map an HDF5 element type to the engine type.
///
/// Integers of at most 4 bytes become Int32, larger ones Int64; unsigned
/// types are promoted one step so every stored value stays representable.
pub fn map_type(desc: &TypeDescriptor) -> Option<DataType> {
    Some(match desc {
        TypeDescriptor::Integer(IntSize::U1 | IntSize::U2 | IntSize::U4) => DataType::Int32,
        TypeDescriptor::Integer(IntSize::U8) => DataType::Int64,
        TypeDescriptor::Unsigned(IntSize::U1 | IntSize::U2) => DataType::Int32,
        TypeDescriptor::Unsigned(IntSize::U4 | IntSize::U8) => DataType::Int64,
        TypeDescriptor::Float(FloatSize::U4) => DataType::Float32,
        TypeDescriptor::Float(FloatSize::U8) => DataType::Float64,
        TypeDescriptor::Boolean => DataType::Boolean,
        TypeDescriptor::Enum(e) => {
            // h5py encodes bool as a 2-member enum; anything else decays to
            // its base integer.
            if e.members.len() == 2 {
                DataType::Boolean
            } else {
                DataType::Int32
            }
        }
        TypeDescriptor::FixedAscii(_)
        | TypeDescriptor::FixedUnicode(_)
        | TypeDescriptor::VarLenAscii
        | TypeDescriptor::VarLenUnicode => DataType::Utf8,
        _ => return None,
    })
}

/// Matrix values are numeric; anything exotic decays to a numeric type the
/// read path can convert into.
pub fn matrix_value_type(desc: &TypeDescriptor) -> DataType {
    match map_type(desc) {
        Some(DataType::Float32) => DataType::Float32,
        Some(DataType::Int32) => DataType::Int32,
        Some(DataType::Int64) => DataType::Int64,
        Some(DataType::Float64) => DataType::Float64,
        _ => DataType::Float64,
    }
}

pub fn discover(handle: &FileHandle) -> Result<FileSchema> {
    let file = handle.file();
    let path = handle.path().to_string();

    let obs = discover_frame(file, OBS, &path)?;
    let var = discover_frame(file, VAR, &path)?;
    if obs.is_none() && var.is_none() {
        return Err(Error::InvalidFile(path));
    }

    // Frames lacking columns fall back to X's shape for their row count.
    let mut obs = obs;
    let mut var = var;
    let mut n_obs = obs.as_ref().map(|f| f.n_rows).unwrap_or(0);
    let mut n_var = var.as_ref().map(|f| f.n_rows).unwrap_or(0);
    let x = discover_matrix(file, "X", &path, (n_obs, n_var))?;
    if let Some(x) = &x {
        if n_obs == 0 {
            n_obs = x.shape.0;
            if let Some(frame) = obs.as_mut() {
                frame.n_rows = n_obs;
            }
        }
        if n_var == 0 {
            n_var = x.shape.1;
            if let Some(frame) = var.as_mut() {
                frame.n_rows = n_var;
            }
        }
    }

    let layers = discover_matrix_group(file, "layers", &path, (n_obs, n_var))?;
    let obsm = discover_matrix_group(file, "obsm", &path, (n_obs, 0))?;
    let varm = discover_matrix_group(file, "varm", &path, (n_var, 0))?;
    let obsp = discover_matrix_group(file, "obsp", &path, (n_obs, n_obs))?;
    let varp = discover_matrix_group(file, "varp", &path, (n_var, n_var))?;

    let uns_keys = match file.group("uns") {
        Ok(g) => member_names(&g)?,
        Err(_) => Vec::new(),
    };

    let (raw_x, raw_var, raw_varm) = match file.group("raw") {
        Ok(raw) => {
            let raw_var = discover_frame(&raw, VAR, &path)?;
            let raw_n_var = raw_var.as_ref().map(|f| f.n_rows).unwrap_or(0);
            let raw_x = discover_matrix(&raw, "X", &path, (n_obs, raw_n_var))?
                .map(|mut m| {
                    m.path = "raw/X".to_string();
                    m
                });
            let mut raw_varm = discover_matrix_group(&raw, "varm", &path, (raw_n_var, 0))?;
            for layout in raw_varm.values_mut() {
                layout.path = format!("raw/{}", layout.path);
            }
            (raw_x, raw_var, raw_varm)
        }
        Err(_) => (None, None, BTreeMap::new()),
    };

    Ok(FileSchema {
        path,
        n_obs,
        n_var,
        obs,
        var,
        x,
        layers,
        obsm,
        varm,
        obsp,
        varp,
        uns_keys,
        raw_x,
        raw_var,
        raw_varm,
    })
}

/// Member names in the frame's declared order (`column-order` attribute)
/// when present, link order otherwise.
fn member_names(group: &Group) -> Result<Vec<String>> {
    group
        .member_names()
        .map_err(|e| Error::Hdf5(format!("{}: {e}", group.name())))
}

fn ordered_columns(group: &Group) -> Result<Vec<String>> {
    let mut names = member_names(group)?;
    if let Some(order) = read_string_list_attr(group, "column-order") {
        let mut ordered: Vec<String> =
            order.into_iter().filter(|n| names.contains(n)).collect();
        let mut front = 0;
        for name in names {
            if !ordered.contains(&name) {
                ordered.insert(front, name);
                front += 1;
            }
        }
        names = ordered;
    }
    // The index column leads when the file names one.
    if let Some(index) = read_string_attr(group, "_index") {
        if let Some(pos) = names.iter().position(|n| *n == index) {
            let index = names.remove(pos);
            names.insert(0, index);
        }
    }
    Ok(names)
}

fn discover_frame(parent: &Group, name: &str, file_path: &str) -> Result<Option<FrameSchema>> {
    if !parent.link_exists(name) {
        return Ok(None);
    }

    // Older files store the whole frame as one compound dataset.
    if let Ok(ds) = parent.dataset(name) {
        if let Ok(desc) = dataset_descriptor(&ds, file_path, name) {
            if let TypeDescriptor::Compound(compound) = desc {
                let n_rows = ds.shape().first().copied().unwrap_or(0);
                let mut columns = Vec::new();
                for field in &compound.fields {
                    match map_type(&field.ty) {
                        Some(dtype) => columns.push(ColumnSchema {
                            name: field.name.clone(),
                            hdf5_name: field.name.clone(),
                            dtype,
                            hdf5_type: field.ty.clone(),
                            categorical: false,
                        }),
                        None => debug!(
                            "{file_path}:{name}.{}: unmapped field type, skipped",
                            field.name
                        ),
                    }
                }
                mangle_duplicates(&mut columns);
                let index_column = columns
                    .iter()
                    .find(|c| c.name == "_index" || c.name == "index")
                    .map(|c| c.name.clone());
                return Ok(Some(FrameSchema {
                    kind: FrameKind::Compound,
                    n_rows,
                    columns,
                    index_column,
                }));
            }
        }
    }

    let group = parent
        .group(name)
        .map_err(|e| Error::Hdf5(format!("{file_path}:{name}: {e}")))?;

    let mut columns = Vec::new();
    let mut n_rows: Option<usize> = None;
    let mut check_rows = |rows: usize, col: &str| -> Result<()> {
        match n_rows {
            None => {
                n_rows = Some(rows);
                Ok(())
            }
            Some(expected) if expected == rows => Ok(()),
            Some(expected) => Err(Error::InvalidShape {
                path: file_path.to_string(),
                detail: format!("{name}/{col} has {rows} rows, frame has {expected}"),
            }),
        }
    };

    for member in ordered_columns(&group)? {
        if let Ok(ds) = group.dataset(&member) {
            let desc = dataset_descriptor(&ds, file_path, &member)?;
            match map_type(&desc) {
                Some(dtype) => {
                    check_rows(ds.shape().first().copied().unwrap_or(0), &member)?;
                    columns.push(ColumnSchema {
                        name: member.clone(),
                        hdf5_name: member,
                        dtype,
                        hdf5_type: desc,
                        categorical: false,
                    });
                }
                None => debug!("{file_path}:{name}/{member}: unmapped type, skipped"),
            }
        } else if let Ok(sub) = group.group(&member) {
            if sub.link_exists("codes") && sub.link_exists("categories") {
                let codes = sub
                    .dataset("codes")
                    .map_err(|e| Error::Hdf5(format!("{file_path}:{name}/{member}: {e}")))?;
                let categories = sub
                    .dataset("categories")
                    .map_err(|e| Error::Hdf5(format!("{file_path}:{name}/{member}: {e}")))?;
                let cat_desc = dataset_descriptor(&categories, file_path, &member)?;
                let dtype = match map_type(&cat_desc) {
                    Some(DataType::Boolean) | None => DataType::Utf8,
                    Some(d) => d,
                };
                check_rows(codes.shape().first().copied().unwrap_or(0), &member)?;
                columns.push(ColumnSchema {
                    name: member.clone(),
                    hdf5_name: member,
                    dtype,
                    hdf5_type: cat_desc,
                    categorical: true,
                });
            } else {
                debug!("{file_path}:{name}/{member}: nested group is not categorical, skipped");
            }
        }
    }

    mangle_duplicates(&mut columns);
    let index_column = read_string_attr(&group, "_index")
        .filter(|n| columns.iter().any(|c| &c.name == n))
        .or_else(|| {
            columns
                .iter()
                .find(|c| c.name == "_index")
                .map(|c| c.name.clone())
        });
    Ok(Some(FrameSchema {
        kind: FrameKind::Group,
        n_rows: n_rows.unwrap_or(0),
        columns,
        index_column,
    }))
}

fn discover_matrix(
    parent: &Group,
    name: &str,
    file_path: &str,
    fallback_shape: (usize, usize),
) -> Result<Option<MatrixLayout>> {
    if !parent.link_exists(name) {
        return Ok(None);
    }

    if let Ok(ds) = parent.dataset(name) {
        let shape = ds.shape();
        if shape.len() != 2 {
            return Err(Error::InvalidShape {
                path: file_path.to_string(),
                detail: format!("{name} is {}-dimensional, expected 2", shape.len()),
            });
        }
        let desc = dataset_descriptor(&ds, file_path, name)?;
        return Ok(Some(MatrixLayout {
            format: MatrixFormat::Dense,
            shape: (shape[0], shape[1]),
            value_type: matrix_value_type(&desc),
            path: name.to_string(),
        }));
    }

    let group = parent
        .group(name)
        .map_err(|e| Error::Hdf5(format!("{file_path}:{name}: {e}")))?;
    sparse_layout(&group, name, file_path, fallback_shape).map(Some)
}

fn sparse_layout(
    group: &Group,
    name: &str,
    file_path: &str,
    fallback_shape: (usize, usize),
) -> Result<MatrixLayout> {
    let shape = read_shape_attr(group).unwrap_or(fallback_shape);
    let indptr = group
        .dataset("indptr")
        .map_err(|_| Error::InvalidShape {
            path: file_path.to_string(),
            detail: format!("{name}: sparse group without indptr"),
        })?;
    let indptr_len = indptr.shape().first().copied().unwrap_or(0);

    let format = match read_string_attr(group, "encoding-type").as_deref() {
        Some("csr_matrix") => MatrixFormat::CsrMatrix,
        Some("csc_matrix") => MatrixFormat::CscMatrix,
        // No tag: infer from the indptr length against the axes.
        _ if indptr_len == shape.0 + 1 => MatrixFormat::CsrMatrix,
        _ if indptr_len == shape.1 + 1 => MatrixFormat::CscMatrix,
        other => {
            return Err(Error::SchemaMismatch(format!(
                "{file_path}:{name}: unrecognized sparse encoding {other:?}"
            )))
        }
    };

    let expected = match format {
        MatrixFormat::CsrMatrix => shape.0 + 1,
        _ => shape.1 + 1,
    };
    if indptr_len != expected {
        return Err(Error::corrupt_sparse(
            file_path,
            format!("{name}/indptr"),
            format!("length {indptr_len}, expected {expected}"),
        ));
    }

    let data = group
        .dataset("data")
        .map_err(|e| Error::Hdf5(format!("{file_path}:{name}/data: {e}")))?;
    let desc = dataset_descriptor(&data, file_path, name)?;

    Ok(MatrixLayout {
        format,
        shape,
        value_type: matrix_value_type(&desc),
        path: name.to_string(),
    })
}

fn discover_matrix_group(
    parent: &Group,
    name: &str,
    file_path: &str,
    fallback_shape: (usize, usize),
) -> Result<BTreeMap<String, MatrixLayout>> {
    let mut out = BTreeMap::new();
    let group = match parent.group(name) {
        Ok(g) => g,
        Err(_) => return Ok(out),
    };
    for member in member_names(&group)? {
        match discover_matrix(&group, &member, file_path, fallback_shape)? {
            Some(mut layout) => {
                layout.path = format!("{name}/{member}");
                out.insert(member, layout);
            }
            None => {}
        }
    }
    Ok(out)
}

fn dataset_descriptor(ds: &Dataset, file_path: &str, ds_path: &str) -> Result<TypeDescriptor> {
    ds.dtype()
        .and_then(|t| t.to_descriptor())
        .map_err(|e| Error::Hdf5(format!("{file_path}:{ds_path}: {e}")))
}

/// Unique display names: later duplicates get a numeric suffix while the
/// original HDF5 name is retained for the read path.
fn mangle_duplicates(columns: &mut [ColumnSchema]) {
    use std::collections::HashMap;
    let mut seen: HashMap<String, usize> = HashMap::new();
    for col in columns.iter_mut() {
        let count = seen.entry(col.name.clone()).or_insert(0);
        if *count > 0 {
            col.name = format!("{}_{}", col.name, count);
        }
        *count += 1;
    }
}

pub fn read_string_attr(loc: &Location, name: &str) -> Option<String> {
    let attr = loc.attr(name).ok()?;
    if let Ok(v) = attr.read_scalar::<hdf5::types::VarLenUnicode>() {
        return Some(v.as_str().to_string());
    }
    if let Ok(v) = attr.read_scalar::<hdf5::types::VarLenAscii>() {
        return Some(v.as_str().to_string());
    }
    None
}

pub fn read_string_list_attr(loc: &Location, name: &str) -> Option<Vec<String>> {
    let attr = loc.attr(name).ok()?;
    if let Ok(v) = attr.read_raw::<hdf5::types::VarLenUnicode>() {
        return Some(v.into_iter().map(|s| s.as_str().to_string()).collect());
    }
    if let Ok(v) = attr.read_raw::<hdf5::types::VarLenAscii>() {
        return Some(v.into_iter().map(|s| s.as_str().to_string()).collect());
    }
    None
}

fn read_shape_attr(loc: &Location) -> Option<(usize, usize)> {
    let attr = loc.attr("shape").ok()?;
    let v = attr.read_raw::<i64>().ok()?;
    if v.len() == 2 {
        Some((v[0] as usize, v[1] as usize))
    } else {
        None
    }
}

//! Lazy flattening of `/uns` into rows.
//!
//! Scalars and 1-D arrays materialize as text; anything deeper is listed
//! as a `group` row with no value. That partiality is deliberate.

use adf_core::{Error, Result};
use arrow_schema::DataType;
use hdf5::types::TypeDescriptor;
use hdf5::{Dataset, Group};

use crate::handle::FileHandle;
use crate::schema::map_type;
use crate::values::{self, NumericBuf};

const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone)]
pub struct UnsRow {
    pub key: String,
    pub kind: &'static str,
    pub dtype: String,
    pub shape: String,
    /// One element for scalars, the elements for 1-D arrays, `None` for
    /// groups and richer structures.
    pub value: Option<Vec<String>>,
}

pub fn flatten(handle: &FileHandle) -> Result<Vec<UnsRow>> {
    let mut rows = Vec::new();
    let group = match handle.file().group("uns") {
        Ok(g) => g,
        Err(_) => return Ok(rows),
    };
    walk(handle, &group, "", 0, &mut rows)?;
    Ok(rows)
}

fn walk(
    handle: &FileHandle,
    group: &Group,
    prefix: &str,
    depth: usize,
    rows: &mut Vec<UnsRow>,
) -> Result<()> {
    if depth >= MAX_DEPTH {
        return Ok(());
    }
    let members = group
        .member_names()
        .map_err(|e| Error::Hdf5(format!("{}: {e}", handle.path())))?;

    for member in members {
        let key = if prefix.is_empty() {
            member.clone()
        } else {
            format!("{prefix}/{member}")
        };

        if let Ok(ds) = group.dataset(&member) {
            rows.push(dataset_row(handle, &ds, &key)?);
        } else if let Ok(sub) = group.group(&member) {
            rows.push(UnsRow {
                key: key.clone(),
                kind: "group",
                dtype: String::new(),
                shape: String::new(),
                value: None,
            });
            walk(handle, &sub, &key, depth + 1, rows)?;
        }
    }
    Ok(())
}

fn dataset_row(handle: &FileHandle, ds: &Dataset, key: &str) -> Result<UnsRow> {
    let ds_path = format!("uns/{key}");
    let desc = ds
        .dtype()
        .and_then(|t| t.to_descriptor())
        .map_err(|e| Error::Hdf5(format!("{}:{ds_path}: {e}", handle.path())))?;
    let shape = ds.shape();
    let dtype = dtype_name(&desc);

    // Beyond scalars and 1-D arrays the entry is reported, not read.
    if shape.len() > 1 {
        return Ok(UnsRow {
            key: key.to_string(),
            kind: "group",
            dtype,
            shape: shape_string(&shape),
            value: None,
        });
    }

    let values = read_values(handle, ds, &desc, &ds_path)?;
    Ok(UnsRow {
        key: key.to_string(),
        kind: if shape.is_empty() { "scalar" } else { "array" },
        dtype,
        shape: shape_string(&shape),
        value: values,
    })
}

fn read_values(
    handle: &FileHandle,
    ds: &Dataset,
    desc: &TypeDescriptor,
    ds_path: &str,
) -> Result<Option<Vec<String>>> {
    let file_path = handle.path();
    let out = match map_type(desc) {
        Some(DataType::Utf8) => Some(values::read_all_strings(ds, desc, file_path, ds_path)?),
        Some(DataType::Boolean) => Some(
            values::read_all_bools(ds, file_path, ds_path)?
                .into_iter()
                .map(|b| b.to_string())
                .collect(),
        ),
        Some(dtype) => {
            let buf = NumericBuf::read_all(ds, &dtype, file_path, ds_path)?;
            Some((0..buf.len()).map(|i| buf.value_string(i)).collect())
        }
        None => None,
    };
    Ok(out)
}

fn shape_string(shape: &[usize]) -> String {
    let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
    dims.join("x")
}

fn dtype_name(desc: &TypeDescriptor) -> String {
    match map_type(desc) {
        Some(DataType::Int32) => "int32".to_string(),
        Some(DataType::Int64) => "int64".to_string(),
        Some(DataType::Float32) => "float32".to_string(),
        Some(DataType::Float64) => "float64".to_string(),
        Some(DataType::Boolean) => "bool".to_string(),
        Some(DataType::Utf8) => "string".to_string(),
        _ => format!("{desc:?}"),
    }
}

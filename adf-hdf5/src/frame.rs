//! Annotation-frame column reads.
//!
//! A reader owns the shared file handle plus a per-reader cache of
//! categorical vocabularies: `categories` is read once per column and
//! reused for every subsequent chunk of the same scan.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use adf_core::{Error, Result};
use arrow_array::{ArrayRef, StringArray};
use arrow_schema::DataType;
use hdf5::types::TypeDescriptor;
use hdf5::Dataset;

use crate::handle::FileHandle;
use crate::raw;
use crate::schema::{ColumnSchema, FrameKind};
use crate::values::{self, NumericBuf};

/// Cached `categories` vector of one categorical column.
enum Categories {
    Text(Vec<String>),
    Numeric(NumericBuf),
}

pub struct FrameReader {
    handle: Arc<FileHandle>,
    /// `obs`, `var` or `raw/var`.
    frame_path: String,
    kind: FrameKind,
    categories: RefCell<HashMap<String, Arc<Categories>>>,
}

impl FrameReader {
    pub fn new(handle: Arc<FileHandle>, frame_path: &str, kind: FrameKind) -> Self {
        Self {
            handle,
            frame_path: frame_path.to_string(),
            kind,
            categories: RefCell::new(HashMap::new()),
        }
    }

    pub fn handle(&self) -> &Arc<FileHandle> {
        &self.handle
    }

    fn file_path(&self) -> &str {
        self.handle.path()
    }

    fn dataset(&self, path: &str) -> Result<Dataset> {
        self.handle
            .file()
            .dataset(path)
            .map_err(|e| Error::Hdf5(format!("{}:{path}: {e}", self.file_path())))
    }

    /// Read `count` rows of one column starting at `offset`.
    pub fn read_column(&self, col: &ColumnSchema, offset: usize, count: usize) -> Result<ArrayRef> {
        if col.categorical {
            return self.read_categorical(col, offset, count);
        }
        match self.kind {
            FrameKind::Compound => self.read_compound_field(col, offset, count),
            FrameKind::Group => {
                let ds_path = format!("{}/{}", self.frame_path, col.hdf5_name);
                let ds = self.dataset(&ds_path)?;
                raw::check_filters(&ds, self.file_path(), &ds_path)?;
                self.read_plain(&ds, col, offset, count, &ds_path)
            }
        }
    }

    fn read_plain(
        &self,
        ds: &Dataset,
        col: &ColumnSchema,
        offset: usize,
        count: usize,
        ds_path: &str,
    ) -> Result<ArrayRef> {
        match &col.dtype {
            DataType::Utf8 => {
                let strings = values::read_string_slice(
                    ds,
                    &col.hdf5_type,
                    offset,
                    count,
                    self.file_path(),
                    ds_path,
                )?;
                Ok(values::strings_to_array(strings))
            }
            DataType::Boolean => {
                let bools =
                    values::read_bool_slice(ds, offset, count, self.file_path(), ds_path)?;
                Ok(values::bools_to_array(bools))
            }
            dtype => NumericBuf::read_slice(ds, dtype, offset, count, self.file_path(), ds_path)
                .map(NumericBuf::into_array),
        }
    }

    fn read_compound_field(
        &self,
        col: &ColumnSchema,
        offset: usize,
        count: usize,
    ) -> Result<ArrayRef> {
        let ds = self.dataset(&self.frame_path)?;
        let ds_path = format!("{}.{}", self.frame_path, col.hdf5_name);

        match &col.dtype {
            DataType::Utf8 => {
                let buf = raw::read_compound_field(
                    &ds,
                    &col.hdf5_name,
                    &col.hdf5_type,
                    offset,
                    count,
                    self.file_path(),
                    &ds_path,
                )?;
                let strings = match &col.hdf5_type {
                    TypeDescriptor::FixedAscii(_) | TypeDescriptor::FixedUnicode(_) => {
                        raw::fixed_strings_from(&buf, buf.len() / count.max(1), count)
                    }
                    _ => unsafe { raw::take_vlen_strings(buf, count) },
                };
                Ok(values::strings_to_array(strings))
            }
            DataType::Boolean => {
                let buf = raw::read_compound_field(
                    &ds,
                    &col.hdf5_name,
                    &TypeDescriptor::Boolean,
                    offset,
                    count,
                    self.file_path(),
                    &ds_path,
                )?;
                Ok(values::bools_to_array(
                    buf.into_iter().map(|b| b != 0).collect(),
                ))
            }
            dtype => {
                let member = values::numeric_descriptor(dtype)?;
                let buf = raw::read_compound_field(
                    &ds,
                    &col.hdf5_name,
                    &member,
                    offset,
                    count,
                    self.file_path(),
                    &ds_path,
                )?;
                numeric_from_bytes(dtype, &buf)
            }
        }
    }

    fn read_categorical(
        &self,
        col: &ColumnSchema,
        offset: usize,
        count: usize,
    ) -> Result<ArrayRef> {
        let codes_path = format!("{}/{}/codes", self.frame_path, col.hdf5_name);
        let codes_ds = self.dataset(&codes_path)?;
        raw::check_filters(&codes_ds, self.file_path(), &codes_path)?;
        let codes =
            values::read_codes_slice(&codes_ds, offset, count, self.file_path(), &codes_path)?;

        let categories = self.categories_for(col)?;
        match categories.as_ref() {
            Categories::Text(cats) => {
                let mut out: Vec<Option<&str>> = Vec::with_capacity(codes.len());
                for &code in &codes {
                    if code < 0 {
                        out.push(None);
                    } else {
                        let value = cats.get(code as usize).ok_or_else(|| {
                            Error::InvalidShape {
                                path: self.file_path().to_string(),
                                detail: format!(
                                    "{codes_path}: code {code} out of range ({} categories)",
                                    cats.len()
                                ),
                            }
                        })?;
                        out.push(Some(value.as_str()));
                    }
                }
                Ok(Arc::new(StringArray::from(out)))
            }
            Categories::Numeric(buf) => buf.take_codes(&codes).map_err(|e| match e {
                Error::Internal(detail) => Error::InvalidShape {
                    path: self.file_path().to_string(),
                    detail: format!("{codes_path}: {detail}"),
                },
                other => other,
            }),
        }
    }

    fn categories_for(&self, col: &ColumnSchema) -> Result<Arc<Categories>> {
        if let Some(cached) = self.categories.borrow().get(&col.hdf5_name) {
            return Ok(cached.clone());
        }

        let cats_path = format!("{}/{}/categories", self.frame_path, col.hdf5_name);
        let ds = self.dataset(&cats_path)?;
        raw::check_filters(&ds, self.file_path(), &cats_path)?;
        let loaded = match (&col.dtype, &col.hdf5_type) {
            (DataType::Utf8, TypeDescriptor::Boolean) => Categories::Text(
                values::read_bool_slice(&ds, 0, ds.size(), self.file_path(), &cats_path)?
                    .into_iter()
                    .map(|b| b.to_string())
                    .collect(),
            ),
            (DataType::Utf8, stored) => Categories::Text(values::read_all_strings(
                &ds,
                stored,
                self.file_path(),
                &cats_path,
            )?),
            (dtype, _) => {
                let n = ds.size();
                Categories::Numeric(NumericBuf::read_slice(
                    &ds,
                    dtype,
                    0,
                    n,
                    self.file_path(),
                    &cats_path,
                )?)
            }
        };

        let arc = Arc::new(loaded);
        self.categories
            .borrow_mut()
            .insert(col.hdf5_name.clone(), arc.clone());
        Ok(arc)
    }
}

fn numeric_from_bytes(dtype: &DataType, buf: &[u8]) -> Result<ArrayRef> {
    NumericBuf::from_bytes(dtype, buf).map(NumericBuf::into_array)
}

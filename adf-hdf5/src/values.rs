//! Typed views over raw read buffers.
//!
//! All data reads go through `H5Dread` with a memory type built from a
//! [`TypeDescriptor`]; the library performs the width/endianness
//! conversion. This module turns the resulting packed bytes into engine
//! arrays.

use std::sync::Arc;

use adf_core::{Error, Result};
use arrow_array::{
    ArrayRef, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array, StringArray,
};
use arrow_schema::DataType;
use hdf5::types::{FloatSize, IntSize, TypeDescriptor};
use hdf5::{Dataset, Datatype};

use crate::raw;

/// In-memory layout matching an engine numeric type.
pub fn numeric_descriptor(dtype: &DataType) -> Result<TypeDescriptor> {
    Ok(match dtype {
        DataType::Int32 => TypeDescriptor::Integer(IntSize::U4),
        DataType::Int64 => TypeDescriptor::Integer(IntSize::U8),
        DataType::Float32 => TypeDescriptor::Float(FloatSize::U4),
        DataType::Float64 => TypeDescriptor::Float(FloatSize::U8),
        other => {
            return Err(Error::Internal(format!(
                "no numeric memory layout for {other}"
            )))
        }
    })
}

fn mem_type(desc: &TypeDescriptor, file_path: &str, ds_path: &str) -> Result<Datatype> {
    Datatype::from_descriptor(desc)
        .map_err(|e| Error::Hdf5(format!("{file_path}:{ds_path}: {e}")))
}

macro_rules! parse_ne {
    ($buf:expr, $t:ty) => {
        $buf.chunks_exact(std::mem::size_of::<$t>())
            .map(|c| <$t>::from_ne_bytes(c.try_into().unwrap()))
            .collect()
    };
}

/// A typed column buffer in one of the four numeric engine types.
#[derive(Debug, Clone)]
pub enum NumericBuf {
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl NumericBuf {
    pub(crate) fn from_bytes(dtype: &DataType, buf: &[u8]) -> Result<Self> {
        Ok(match dtype {
            DataType::Int32 => Self::I32(parse_ne!(buf, i32)),
            DataType::Int64 => Self::I64(parse_ne!(buf, i64)),
            DataType::Float32 => Self::F32(parse_ne!(buf, f32)),
            DataType::Float64 => Self::F64(parse_ne!(buf, f64)),
            other => return Err(Error::Internal(format!("non-numeric buffer type {other}"))),
        })
    }

    /// Read `[start, start + count)` of a 1-D dataset as `dtype`.
    pub fn read_slice(
        ds: &Dataset,
        dtype: &DataType,
        start: usize,
        count: usize,
        file_path: &str,
        ds_path: &str,
    ) -> Result<Self> {
        let desc = numeric_descriptor(dtype)?;
        let mem = mem_type(&desc, file_path, ds_path)?;
        let buf = raw::read_rows_raw(ds, mem.id(), mem.size(), start, count, file_path, ds_path)?;
        Self::from_bytes(dtype, &buf)
    }

    /// Read a rank-2 hyperslab as `dtype`, row-major.
    #[allow(clippy::too_many_arguments)]
    pub fn read_slab(
        ds: &Dataset,
        dtype: &DataType,
        row_start: usize,
        row_count: usize,
        col_start: usize,
        col_count: usize,
        file_path: &str,
        ds_path: &str,
    ) -> Result<Self> {
        let desc = numeric_descriptor(dtype)?;
        let mem = mem_type(&desc, file_path, ds_path)?;
        let buf = raw::read_slab_raw(
            ds,
            mem.id(),
            mem.size(),
            row_start,
            row_count,
            col_start,
            col_count,
            file_path,
            ds_path,
        )?;
        Self::from_bytes(dtype, &buf)
    }

    /// Whole-dataset read (any rank).
    pub fn read_all(
        ds: &Dataset,
        dtype: &DataType,
        file_path: &str,
        ds_path: &str,
    ) -> Result<Self> {
        let desc = numeric_descriptor(dtype)?;
        let mem = mem_type(&desc, file_path, ds_path)?;
        let buf = raw::read_all_raw(ds, mem.id(), mem.size(), ds.size(), file_path, ds_path)?;
        Self::from_bytes(dtype, &buf)
    }

    pub fn zeros(dtype: &DataType, n: usize) -> Result<Self> {
        Ok(match dtype {
            DataType::Int32 => Self::I32(vec![0; n]),
            DataType::Int64 => Self::I64(vec![0; n]),
            DataType::Float32 => Self::F32(vec![0.0; n]),
            DataType::Float64 => Self::F64(vec![0.0; n]),
            other => return Err(Error::Internal(format!("non-numeric buffer type {other}"))),
        })
    }

    pub fn len(&self) -> usize {
        match self {
            Self::I32(v) => v.len(),
            Self::I64(v) => v.len(),
            Self::F32(v) => v.len(),
            Self::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy element `src_idx` of `src` into `dst_idx` of `self`. Both
    /// sides share the same variant by construction.
    pub fn set_from(&mut self, dst_idx: usize, src: &NumericBuf, src_idx: usize) {
        match (self, src) {
            (Self::I32(d), Self::I32(s)) => d[dst_idx] = s[src_idx],
            (Self::I64(d), Self::I64(s)) => d[dst_idx] = s[src_idx],
            (Self::F32(d), Self::F32(s)) => d[dst_idx] = s[src_idx],
            (Self::F64(d), Self::F64(s)) => d[dst_idx] = s[src_idx],
            _ => debug_assert!(false, "mismatched numeric buffer variants"),
        }
    }

    /// True when element `i` equals the type's zero.
    pub fn is_zero(&self, i: usize) -> bool {
        match self {
            Self::I32(v) => v[i] == 0,
            Self::I64(v) => v[i] == 0,
            Self::F32(v) => v[i] == 0.0,
            Self::F64(v) => v[i] == 0.0,
        }
    }

    pub fn gather(&self, indexes: &[usize]) -> Result<Self> {
        let mut out = Self::zeros(&self.data_type(), indexes.len())?;
        for (dst, &src) in indexes.iter().enumerate() {
            out.set_from(dst, self, src);
        }
        Ok(out)
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Self::I32(_) => DataType::Int32,
            Self::I64(_) => DataType::Int64,
            Self::F32(_) => DataType::Float32,
            Self::F64(_) => DataType::Float64,
        }
    }

    pub fn value_string(&self, i: usize) -> String {
        match self {
            Self::I32(v) => v[i].to_string(),
            Self::I64(v) => v[i].to_string(),
            Self::F32(v) => v[i].to_string(),
            Self::F64(v) => v[i].to_string(),
        }
    }

    pub fn into_array(self) -> ArrayRef {
        match self {
            Self::I32(v) => Arc::new(Int32Array::from(v)),
            Self::I64(v) => Arc::new(Int64Array::from(v)),
            Self::F32(v) => Arc::new(Float32Array::from(v)),
            Self::F64(v) => Arc::new(Float64Array::from(v)),
        }
    }

    /// Gather through categorical codes: negative codes become NULL.
    pub fn take_codes(&self, codes: &[i32]) -> Result<ArrayRef> {
        for &code in codes {
            if code >= 0 && code as usize >= self.len() {
                return Err(Error::Internal(format!(
                    "categorical code {code} out of range (have {})",
                    self.len()
                )));
            }
        }
        Ok(match self {
            Self::I32(v) => Arc::new(Int32Array::from_iter(
                codes.iter().map(|&c| (c >= 0).then(|| v[c as usize])),
            )),
            Self::I64(v) => Arc::new(Int64Array::from_iter(
                codes.iter().map(|&c| (c >= 0).then(|| v[c as usize])),
            )),
            Self::F32(v) => Arc::new(Float32Array::from_iter(
                codes.iter().map(|&c| (c >= 0).then(|| v[c as usize])),
            )),
            Self::F64(v) => Arc::new(Float64Array::from_iter(
                codes.iter().map(|&c| (c >= 0).then(|| v[c as usize])),
            )),
        })
    }
}

/// Read a string slice honoring the stored layout (fixed-length buffers
/// are trimmed of padding, variable-length entries are reclaimed to the
/// library allocator).
pub fn read_string_slice(
    ds: &Dataset,
    stored: &TypeDescriptor,
    start: usize,
    count: usize,
    file_path: &str,
    ds_path: &str,
) -> Result<Vec<String>> {
    match stored {
        TypeDescriptor::FixedAscii(_) | TypeDescriptor::FixedUnicode(_) => {
            let mem = mem_type(stored, file_path, ds_path)?;
            let size = mem.size();
            let buf = raw::read_rows_raw(ds, mem.id(), size, start, count, file_path, ds_path)?;
            Ok(raw::fixed_strings_from(&buf, size, count))
        }
        TypeDescriptor::VarLenAscii | TypeDescriptor::VarLenUnicode => {
            let mem = mem_type(stored, file_path, ds_path)?;
            let buf = raw::read_rows_raw(ds, mem.id(), mem.size(), start, count, file_path, ds_path)?;
            Ok(unsafe { raw::take_vlen_strings(buf, count) })
        }
        other => Err(Error::Internal(format!(
            "{file_path}:{ds_path}: not a string type: {other:?}"
        ))),
    }
}

/// Whole-dataset variant of [`read_string_slice`].
pub fn read_all_strings(
    ds: &Dataset,
    stored: &TypeDescriptor,
    file_path: &str,
    ds_path: &str,
) -> Result<Vec<String>> {
    let n = ds.size();
    match stored {
        TypeDescriptor::FixedAscii(_) | TypeDescriptor::FixedUnicode(_) => {
            let mem = mem_type(stored, file_path, ds_path)?;
            let size = mem.size();
            let buf = raw::read_all_raw(ds, mem.id(), size, n, file_path, ds_path)?;
            Ok(raw::fixed_strings_from(&buf, size, n))
        }
        TypeDescriptor::VarLenAscii | TypeDescriptor::VarLenUnicode => {
            let mem = mem_type(stored, file_path, ds_path)?;
            let buf = raw::read_all_raw(ds, mem.id(), mem.size(), n, file_path, ds_path)?;
            Ok(unsafe { raw::take_vlen_strings(buf, n) })
        }
        other => Err(Error::Internal(format!(
            "{file_path}:{ds_path}: not a string type: {other:?}"
        ))),
    }
}

pub fn read_all_bools(ds: &Dataset, file_path: &str, ds_path: &str) -> Result<Vec<bool>> {
    let mem = mem_type(&TypeDescriptor::Boolean, file_path, ds_path)?;
    let buf = raw::read_all_raw(ds, mem.id(), mem.size(), ds.size(), file_path, ds_path)?;
    Ok(buf.into_iter().map(|b| b != 0).collect())
}

pub fn read_bool_slice(
    ds: &Dataset,
    start: usize,
    count: usize,
    file_path: &str,
    ds_path: &str,
) -> Result<Vec<bool>> {
    let mem = mem_type(&TypeDescriptor::Boolean, file_path, ds_path)?;
    let buf = raw::read_rows_raw(ds, mem.id(), mem.size(), start, count, file_path, ds_path)?;
    Ok(buf.into_iter().map(|b| b != 0).collect())
}

/// `indptr`/`indices` are widened to i64 regardless of their stored width.
pub fn read_i64_slice(
    ds: &Dataset,
    start: usize,
    count: usize,
    file_path: &str,
    ds_path: &str,
) -> Result<Vec<i64>> {
    match NumericBuf::read_slice(ds, &DataType::Int64, start, count, file_path, ds_path)? {
        NumericBuf::I64(v) => Ok(v),
        _ => unreachable!("requested i64"),
    }
}

/// Categorical codes are widened to i32 (files store int8/16/32).
pub fn read_codes_slice(
    ds: &Dataset,
    start: usize,
    count: usize,
    file_path: &str,
    ds_path: &str,
) -> Result<Vec<i32>> {
    match NumericBuf::read_slice(ds, &DataType::Int32, start, count, file_path, ds_path)? {
        NumericBuf::I32(v) => Ok(v),
        _ => unreachable!("requested i32"),
    }
}

pub fn strings_to_array(values: Vec<String>) -> ArrayRef {
    Arc::new(StringArray::from_iter_values(values))
}

pub fn bools_to_array(values: Vec<bool>) -> ArrayRef {
    Arc::new(BooleanArray::from(values))
}

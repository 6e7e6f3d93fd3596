//! Dense and sparse matrix reads with projection pushdown.
//!
//! The matrix kinds form a closed set; one `read_columns` operation covers
//! all of them. Dense projection turns into per-column hyperslabs, CSC
//! projection into per-column `indptr` slices, CSR reads the row range
//! once and scatters only the projected columns.

use std::collections::HashMap;
use std::sync::Arc;

use adf_core::{Error, Result};
use arrow_array::{ArrayRef, Int64Array};
use hdf5::Dataset;

use crate::handle::FileHandle;
use crate::raw;
use crate::schema::{MatrixFormat, MatrixLayout};
use crate::values::{self, NumericBuf};

pub struct MatrixReader {
    handle: Arc<FileHandle>,
    layout: MatrixLayout,
    body: Body,
}

enum Body {
    Dense {
        ds: Dataset,
    },
    Sparse {
        data: Dataset,
        indices: Dataset,
        indptr: Dataset,
    },
}

impl MatrixReader {
    pub fn open(handle: Arc<FileHandle>, layout: &MatrixLayout) -> Result<Self> {
        let file_path = handle.path().to_string();
        let open_ds = |path: &str| -> Result<Dataset> {
            let ds = handle
                .file()
                .dataset(path)
                .map_err(|e| Error::Hdf5(format!("{file_path}:{path}: {e}")))?;
            raw::check_filters(&ds, &file_path, path)?;
            Ok(ds)
        };

        let body = match layout.format {
            MatrixFormat::Dense => Body::Dense {
                ds: open_ds(&layout.path)?,
            },
            MatrixFormat::CsrMatrix | MatrixFormat::CscMatrix => Body::Sparse {
                data: open_ds(&format!("{}/data", layout.path))?,
                indices: open_ds(&format!("{}/indices", layout.path))?,
                indptr: open_ds(&format!("{}/indptr", layout.path))?,
            },
        };

        Ok(Self {
            handle,
            layout: layout.clone(),
            body,
        })
    }

    pub fn layout(&self) -> &MatrixLayout {
        &self.layout
    }

    fn file_path(&self) -> &str {
        self.handle.path()
    }

    /// Read `row_count` rows starting at `row_start`, materializing one
    /// output column per entry of `cols` (file-local column ids).
    pub fn read_columns(
        &self,
        row_start: usize,
        row_count: usize,
        cols: &[usize],
    ) -> Result<Vec<ArrayRef>> {
        match (&self.body, self.layout.format) {
            (Body::Dense { ds }, _) => self.read_dense_columns(ds, row_start, row_count, cols),
            (Body::Sparse { .. }, MatrixFormat::CsrMatrix) => {
                self.read_csr_columns(row_start, row_count, cols)
            }
            (Body::Sparse { .. }, MatrixFormat::CscMatrix) => {
                self.read_csc_columns(row_start, row_count, cols)
            }
            _ => unreachable!("sparse body with dense format"),
        }
    }

    fn read_dense_columns(
        &self,
        ds: &Dataset,
        row_start: usize,
        row_count: usize,
        cols: &[usize],
    ) -> Result<Vec<ArrayRef>> {
        let dtype = &self.layout.value_type;
        cols.iter()
            .map(|&col| {
                NumericBuf::read_slab(
                    ds,
                    dtype,
                    row_start,
                    row_count,
                    col,
                    1,
                    self.file_path(),
                    &self.layout.path,
                )
                .map(NumericBuf::into_array)
            })
            .collect()
    }

    /// Slice `indptr[major_start ..= major_start + major_count]`, with the
    /// monotonicity check every sparse read depends on.
    fn indptr_slice(
        &self,
        indptr: &Dataset,
        major_start: usize,
        major_count: usize,
    ) -> Result<Vec<i64>> {
        let path = format!("{}/indptr", self.layout.path);
        let ptr = values::read_i64_slice(
            indptr,
            major_start,
            major_count + 1,
            self.file_path(),
            &path,
        )?;
        for w in ptr.windows(2) {
            if w[1] < w[0] {
                return Err(Error::corrupt_sparse(
                    self.file_path(),
                    &path,
                    format!("indptr not monotone: {} > {}", w[0], w[1]),
                ));
            }
        }
        if let Some(&first) = ptr.first() {
            if first < 0 {
                return Err(Error::corrupt_sparse(
                    self.file_path(),
                    &path,
                    "negative indptr entry",
                ));
            }
        }
        Ok(ptr)
    }

    fn read_csr_columns(
        &self,
        row_start: usize,
        row_count: usize,
        cols: &[usize],
    ) -> Result<Vec<ArrayRef>> {
        let Body::Sparse {
            data,
            indices,
            indptr,
        } = &self.body
        else {
            unreachable!()
        };
        let dtype = &self.layout.value_type;
        let n_var = self.layout.shape.1;

        let ptr = self.indptr_slice(indptr, row_start, row_count)?;
        let first = ptr[0] as usize;
        let last = ptr[ptr.len() - 1] as usize;
        let nnz = last - first;

        let idx = values::read_i64_slice(
            indices,
            first,
            nnz,
            self.file_path(),
            &format!("{}/indices", self.layout.path),
        )?;
        let vals = NumericBuf::read_slice(
            data,
            dtype,
            first,
            nnz,
            self.file_path(),
            &format!("{}/data", self.layout.path),
        )?;

        // Column id -> output slot; untouched slots stay zero.
        let slot: HashMap<usize, usize> =
            cols.iter().enumerate().map(|(i, &c)| (c, i)).collect();
        let mut out: Vec<NumericBuf> = (0..cols.len())
            .map(|_| NumericBuf::zeros(dtype, row_count))
            .collect::<Result<_>>()?;

        for (row_offset, pair) in ptr.windows(2).enumerate() {
            for k in (pair[0] as usize - first)..(pair[1] as usize - first) {
                let col = idx[k];
                if col < 0 || col as usize >= n_var {
                    return Err(Error::corrupt_sparse(
                        self.file_path(),
                        format!("{}/indices", self.layout.path),
                        format!("column index {col} outside [0, {n_var})"),
                    ));
                }
                if let Some(&s) = slot.get(&(col as usize)) {
                    out[s].set_from(row_offset, &vals, k);
                }
            }
        }
        Ok(out.into_iter().map(NumericBuf::into_array).collect())
    }

    fn read_csc_columns(
        &self,
        row_start: usize,
        row_count: usize,
        cols: &[usize],
    ) -> Result<Vec<ArrayRef>> {
        let Body::Sparse {
            data,
            indices,
            indptr,
        } = &self.body
        else {
            unreachable!()
        };
        let dtype = &self.layout.value_type;
        let n_obs = self.layout.shape.0;

        let mut out = Vec::with_capacity(cols.len());
        for &col in cols {
            let ptr = self.indptr_slice(indptr, col, 1)?;
            let first = ptr[0] as usize;
            let nnz = (ptr[1] - ptr[0]) as usize;

            let idx = values::read_i64_slice(
                indices,
                first,
                nnz,
                self.file_path(),
                &format!("{}/indices", self.layout.path),
            )?;
            let vals = NumericBuf::read_slice(
                data,
                dtype,
                first,
                nnz,
                self.file_path(),
                &format!("{}/data", self.layout.path),
            )?;

            let mut column = NumericBuf::zeros(dtype, row_count)?;
            for (k, &row) in idx.iter().enumerate() {
                if row < 0 || row as usize >= n_obs {
                    return Err(Error::corrupt_sparse(
                        self.file_path(),
                        format!("{}/indices", self.layout.path),
                        format!("row index {row} outside [0, {n_obs})"),
                    ));
                }
                let row = row as usize;
                if row >= row_start && row < row_start + row_count {
                    column.set_from(row - row_start, &vals, k);
                }
            }
            out.push(column.into_array());
        }
        Ok(out)
    }

    /// The axis triplet scans are chunked over: rows for dense/CSR,
    /// columns for CSC.
    pub fn major_len(&self) -> usize {
        match self.layout.format {
            MatrixFormat::CscMatrix => self.layout.shape.1,
            _ => self.layout.shape.0,
        }
    }

    /// Emit `(row, col, value)` triplets for a window of the major axis.
    /// Indexes are file-local; zeros are not emitted.
    pub fn read_triplets(
        &self,
        major_start: usize,
        major_count: usize,
    ) -> Result<(ArrayRef, ArrayRef, ArrayRef)> {
        let dtype = &self.layout.value_type;
        match (&self.body, self.layout.format) {
            (Body::Dense { ds }, _) => {
                let cols_n = self.layout.shape.1;
                let vals = NumericBuf::read_slab(
                    ds,
                    dtype,
                    major_start,
                    major_count,
                    0,
                    cols_n,
                    self.file_path(),
                    &self.layout.path,
                )?;
                let mut rows = Vec::new();
                let mut cols = Vec::new();
                let mut keep = Vec::new();
                for r in 0..major_count {
                    for c in 0..cols_n {
                        let k = r * cols_n + c;
                        if !vals.is_zero(k) {
                            rows.push((major_start + r) as i64);
                            cols.push(c as i64);
                            keep.push(k);
                        }
                    }
                }
                let values = vals.gather(&keep)?;
                Ok((
                    Arc::new(Int64Array::from(rows)),
                    Arc::new(Int64Array::from(cols)),
                    values.into_array(),
                ))
            }
            (
                Body::Sparse {
                    data,
                    indices,
                    indptr,
                },
                format,
            ) => {
                let ptr = self.indptr_slice(indptr, major_start, major_count)?;
                let first = ptr[0] as usize;
                let nnz = (ptr[ptr.len() - 1] as usize) - first;

                let idx = values::read_i64_slice(
                    indices,
                    first,
                    nnz,
                    self.file_path(),
                    &format!("{}/indices", self.layout.path),
                )?;
                let vals = NumericBuf::read_slice(
                    data,
                    dtype,
                    first,
                    nnz,
                    self.file_path(),
                    &format!("{}/data", self.layout.path),
                )?;

                let minor_extent = match format {
                    MatrixFormat::CscMatrix => self.layout.shape.0,
                    _ => self.layout.shape.1,
                };
                let mut rows = Vec::with_capacity(nnz);
                let mut cols = Vec::with_capacity(nnz);
                for (major_offset, pair) in ptr.windows(2).enumerate() {
                    let major = (major_start + major_offset) as i64;
                    for k in (pair[0] as usize - first)..(pair[1] as usize - first) {
                        let minor = idx[k];
                        if minor < 0 || minor as usize >= minor_extent {
                            return Err(Error::corrupt_sparse(
                                self.file_path(),
                                format!("{}/indices", self.layout.path),
                                format!("index {minor} outside [0, {minor_extent})"),
                            ));
                        }
                        match format {
                            MatrixFormat::CscMatrix => {
                                rows.push(minor);
                                cols.push(major);
                            }
                            _ => {
                                rows.push(major);
                                cols.push(minor);
                            }
                        }
                    }
                }
                Ok((
                    Arc::new(Int64Array::from(rows)),
                    Arc::new(Int64Array::from(cols)),
                    vals.into_array(),
                ))
            }
        }
    }
}

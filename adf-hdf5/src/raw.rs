//! Direct `hdf5-sys`-level helpers for reads the high-level crate cannot
//! express: hyperslab reads with a caller-built memory type (fixed-length
//! strings, single-field compound projection) and filter-pipeline
//! inspection. Every call site checks the returned status; a negative
//! status surfaces as a structured read error, never as garbage bytes.

use std::os::raw::{c_char, c_int, c_uint, c_void};
use std::ptr;

use adf_core::{Error, Result};
use hdf5::types::TypeDescriptor;
use hdf5::{Dataset, Datatype};

use crate::lock;
use crate::lzf;

type HidT = i64;
type HerrT = c_int;
type HsizeT = u64;

const H5T_COMPOUND: c_int = 6;
const H5S_SELECT_SET: c_int = 0;
const H5P_DEFAULT: HidT = 0;

extern "C" {
    fn H5Dread(
        dset_id: HidT,
        mem_type_id: HidT,
        mem_space_id: HidT,
        file_space_id: HidT,
        dxpl_id: HidT,
        buf: *mut c_void,
    ) -> HerrT;
    fn H5Dget_space(dset_id: HidT) -> HidT;
    fn H5Dget_create_plist(dset_id: HidT) -> HidT;
    fn H5Screate_simple(rank: c_int, dims: *const HsizeT, maxdims: *const HsizeT) -> HidT;
    fn H5Sselect_hyperslab(
        space_id: HidT,
        op: c_int,
        start: *const HsizeT,
        stride: *const HsizeT,
        count: *const HsizeT,
        block: *const HsizeT,
    ) -> HerrT;
    fn H5Sclose(space_id: HidT) -> HerrT;
    fn H5Tcreate(class: c_int, size: usize) -> HidT;
    fn H5Tinsert(parent_id: HidT, name: *const c_char, offset: usize, member_id: HidT) -> HerrT;
    fn H5Tclose(type_id: HidT) -> HerrT;
    fn H5Pget_nfilters(plist_id: HidT) -> c_int;
    fn H5Pget_filter2(
        plist_id: HidT,
        idx: c_uint,
        flags: *mut c_uint,
        cd_nelmts: *mut usize,
        cd_values: *mut c_uint,
        namelen: usize,
        name: *mut c_char,
        filter_config: *mut c_uint,
    ) -> c_int;
    fn H5Pclose(plist_id: HidT) -> HerrT;
    fn H5free_memory(buf: *mut c_void) -> HerrT;
}

/// Read `count` rows starting at `start` from a 1-D dataset with a
/// caller-supplied memory type. Returns the packed bytes
/// (`count * elem_size`).
pub fn read_rows_raw(
    ds: &Dataset,
    mem_type: HidT,
    elem_size: usize,
    start: usize,
    count: usize,
    file_path: &str,
    ds_path: &str,
) -> Result<Vec<u8>> {
    lock::with_lock(|| unsafe {
        let file_space = H5Dget_space(ds.id());
        if file_space < 0 {
            return Err(Error::read(file_path, ds_path));
        }
        let hstart = [start as HsizeT];
        let hcount = [count as HsizeT];
        if H5Sselect_hyperslab(
            file_space,
            H5S_SELECT_SET,
            hstart.as_ptr(),
            ptr::null(),
            hcount.as_ptr(),
            ptr::null(),
        ) < 0
        {
            H5Sclose(file_space);
            return Err(Error::read(file_path, ds_path));
        }
        let mem_space = H5Screate_simple(1, hcount.as_ptr(), ptr::null());
        if mem_space < 0 {
            H5Sclose(file_space);
            return Err(Error::read(file_path, ds_path));
        }

        let mut buf = vec![0u8; count * elem_size];
        let status = H5Dread(
            ds.id(),
            mem_type,
            mem_space,
            file_space,
            H5P_DEFAULT,
            buf.as_mut_ptr() as *mut c_void,
        );
        H5Sclose(mem_space);
        H5Sclose(file_space);
        if status < 0 {
            return Err(Error::read(file_path, ds_path));
        }
        Ok(buf)
    })
}

/// Read a whole dataset (any rank) with a caller-supplied memory type.
pub fn read_all_raw(
    ds: &Dataset,
    mem_type: HidT,
    elem_size: usize,
    n_elements: usize,
    file_path: &str,
    ds_path: &str,
) -> Result<Vec<u8>> {
    const H5S_ALL: HidT = 0;
    lock::with_lock(|| unsafe {
        let mut buf = vec![0u8; n_elements * elem_size];
        let status = H5Dread(
            ds.id(),
            mem_type,
            H5S_ALL,
            H5S_ALL,
            H5P_DEFAULT,
            buf.as_mut_ptr() as *mut c_void,
        );
        if status < 0 {
            return Err(Error::read(file_path, ds_path));
        }
        Ok(buf)
    })
}

/// Read a rank-2 hyperslab `[row_start, col_start] + [row_count,
/// col_count]` into a row-major buffer.
pub fn read_slab_raw(
    ds: &Dataset,
    mem_type: HidT,
    elem_size: usize,
    row_start: usize,
    row_count: usize,
    col_start: usize,
    col_count: usize,
    file_path: &str,
    ds_path: &str,
) -> Result<Vec<u8>> {
    lock::with_lock(|| unsafe {
        let file_space = H5Dget_space(ds.id());
        if file_space < 0 {
            return Err(Error::read(file_path, ds_path));
        }
        let hstart = [row_start as HsizeT, col_start as HsizeT];
        let hcount = [row_count as HsizeT, col_count as HsizeT];
        if H5Sselect_hyperslab(
            file_space,
            H5S_SELECT_SET,
            hstart.as_ptr(),
            ptr::null(),
            hcount.as_ptr(),
            ptr::null(),
        ) < 0
        {
            H5Sclose(file_space);
            return Err(Error::read(file_path, ds_path));
        }
        let mem_space = H5Screate_simple(2, hcount.as_ptr(), ptr::null());
        if mem_space < 0 {
            H5Sclose(file_space);
            return Err(Error::read(file_path, ds_path));
        }

        let mut buf = vec![0u8; row_count * col_count * elem_size];
        let status = H5Dread(
            ds.id(),
            mem_type,
            mem_space,
            file_space,
            H5P_DEFAULT,
            buf.as_mut_ptr() as *mut c_void,
        );
        H5Sclose(mem_space);
        H5Sclose(file_space);
        if status < 0 {
            return Err(Error::read(file_path, ds_path));
        }
        Ok(buf)
    })
}

/// Read one field of a compound 1-D dataset through a single-member memory
/// compound. `member_desc` decides the in-memory layout of the field.
pub fn read_compound_field(
    ds: &Dataset,
    field: &str,
    member_desc: &TypeDescriptor,
    start: usize,
    count: usize,
    file_path: &str,
    ds_path: &str,
) -> Result<Vec<u8>> {
    let member = Datatype::from_descriptor(member_desc)
        .map_err(|e| Error::Hdf5(format!("{file_path}:{ds_path}: {e}")))?;
    let elem_size = member.size();

    let field_c = std::ffi::CString::new(field)
        .map_err(|_| Error::Internal(format!("field name with NUL: {field}")))?;

    let mem_type = lock::with_lock(|| unsafe {
        let mem_type = H5Tcreate(H5T_COMPOUND, elem_size);
        if mem_type < 0 {
            return Err(Error::read(file_path, ds_path));
        }
        if H5Tinsert(mem_type, field_c.as_ptr(), 0, member.id()) < 0 {
            H5Tclose(mem_type);
            return Err(Error::read(file_path, ds_path));
        }
        Ok(mem_type)
    })?;

    let result = read_rows_raw(ds, mem_type, elem_size, start, count, file_path, ds_path);
    lock::with_lock(|| unsafe {
        H5Tclose(mem_type);
    });
    result
}

/// Interpret a packed buffer of variable-length string pointers, freeing
/// each entry with the library allocator.
///
/// # Safety
/// `buf` must come from an `H5Dread` with a variable-length string memory
/// type and hold `count` pointers.
pub unsafe fn take_vlen_strings(buf: Vec<u8>, count: usize) -> Vec<String> {
    const PTR_SIZE: usize = std::mem::size_of::<*mut c_char>();
    let mut out = Vec::with_capacity(count);
    // The byte buffer is not pointer-aligned; reassemble each entry.
    for chunk in buf.chunks_exact(PTR_SIZE).take(count) {
        let p = usize::from_ne_bytes(chunk.try_into().unwrap()) as *mut c_char;
        if p.is_null() {
            out.push(String::new());
        } else {
            out.push(std::ffi::CStr::from_ptr(p).to_string_lossy().into_owned());
            lock::with_lock(|| {
                H5free_memory(p as *mut c_void);
            });
        }
    }
    out
}

/// Trim a packed fixed-length string buffer into owned strings. HDF5 pads
/// with NULs (or spaces, for space-padded types).
pub fn fixed_strings_from(buf: &[u8], elem_size: usize, count: usize) -> Vec<String> {
    (0..count)
        .map(|i| {
            let raw = &buf[i * elem_size..(i + 1) * elem_size];
            let end = raw.iter().rposition(|&b| b != 0 && b != b' ').map_or(0, |p| p + 1);
            String::from_utf8_lossy(&raw[..end]).into_owned()
        })
        .collect()
}

// Filters the library itself decodes.
const LIBRARY_FILTERS: [c_int; 6] = [1, 2, 3, 4, 5, 6]; // deflate..scaleoffset

/// Fail fast with `UnsupportedFilter` when the dataset's pipeline contains
/// a filter nobody can decode (registering LZF on the way).
pub fn check_filters(ds: &Dataset, file_path: &str, ds_path: &str) -> Result<()> {
    lock::with_lock(|| unsafe {
        let dcpl = H5Dget_create_plist(ds.id());
        if dcpl < 0 {
            return Err(Error::read(file_path, ds_path));
        }
        let n = H5Pget_nfilters(dcpl);
        let mut result = Ok(());
        for i in 0..n.max(0) {
            let mut flags: c_uint = 0;
            let mut nelmts: usize = 0;
            let mut config: c_uint = 0;
            let id = H5Pget_filter2(
                dcpl,
                i as c_uint,
                &mut flags,
                &mut nelmts,
                ptr::null_mut(),
                0,
                ptr::null_mut(),
                &mut config,
            );
            let supported = LIBRARY_FILTERS.contains(&id)
                || (id == lzf::LZF_FILTER_ID && lzf::ensure_registered());
            if !supported {
                result = Err(Error::UnsupportedFilter {
                    path: file_path.to_string(),
                    dataset: ds_path.to_string(),
                    filter_id: id,
                });
                break;
            }
        }
        H5Pclose(dcpl);
        result
    })
}

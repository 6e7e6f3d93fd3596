//! HDF5 virtual file driver backed by [`RemoteFile`].
//!
//! The driver class and entry points are declared here against the
//! HDF5 1.10/1.12 ABI (the versions `hdf5-sys` 0.8 builds against); a
//! runtime version probe refuses registration on anything else. The
//! library-owned `H5FD_t` prefix of the per-file struct is reserved as an
//! oversized zeroed area that only the library touches.
//!
//! Configuration reaches the `open` callback through a staged map keyed by
//! URL: the handle cache stages credentials for a URL, sets the driver on
//! a fapl, and lets `H5Fopen` call back into [`vfd_open`].

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_uint, c_ulong, c_void};
use std::ptr;
use std::sync::Mutex;

use adf_core::{Error, RemoteOptions, Result};
use lazy_static::lazy_static;
use log::{error, warn};

use crate::file::RemoteFile;

pub type HidT = i64;
type HerrT = c_int;
type HaddrT = u64;
type HsizeT = u64;
type HboolT = c_uint;
type MemT = c_int;

const H5FD_MEM_NTYPES: usize = 7;
const H5F_ACC_RDWR: c_uint = 0x0002;
const MAXADDR: HaddrT = u64::MAX - 1;

#[repr(C)]
pub struct VfdFile {
    /// Reserved for the library's `H5FD_t` prefix (~80 bytes in 1.10/1.12;
    /// oversized on purpose). Never read from Rust.
    base: [u64; 24],
    eoa: HaddrT,
    url: *mut c_char,
    file: *mut RemoteFile,
}

/// `H5FD_class_t`, HDF5 1.10/1.12 layout.
#[repr(C)]
struct FdClass {
    name: *const c_char,
    maxaddr: HaddrT,
    fc_degree: c_int,
    terminate: Option<unsafe extern "C" fn() -> HerrT>,
    sb_size: Option<unsafe extern "C" fn(*mut VfdFile) -> HsizeT>,
    sb_encode: Option<unsafe extern "C" fn(*mut VfdFile, *mut c_char, *mut u8) -> HerrT>,
    sb_decode: Option<unsafe extern "C" fn(*mut VfdFile, *const c_char, *const u8) -> HerrT>,
    fapl_size: usize,
    fapl_get: Option<unsafe extern "C" fn(*mut VfdFile) -> *mut c_void>,
    fapl_copy: Option<unsafe extern "C" fn(*const c_void) -> *mut c_void>,
    fapl_free: Option<unsafe extern "C" fn(*mut c_void) -> HerrT>,
    dxpl_size: usize,
    dxpl_copy: Option<unsafe extern "C" fn(*const c_void) -> *mut c_void>,
    dxpl_free: Option<unsafe extern "C" fn(*mut c_void) -> HerrT>,
    open: Option<unsafe extern "C" fn(*const c_char, c_uint, HidT, HaddrT) -> *mut VfdFile>,
    close: Option<unsafe extern "C" fn(*mut VfdFile) -> HerrT>,
    cmp: Option<unsafe extern "C" fn(*const VfdFile, *const VfdFile) -> c_int>,
    query: Option<unsafe extern "C" fn(*const VfdFile, *mut c_ulong) -> HerrT>,
    get_type_map: Option<unsafe extern "C" fn(*const VfdFile, *mut MemT) -> HerrT>,
    alloc: Option<unsafe extern "C" fn(*mut VfdFile, MemT, HidT, HsizeT) -> HaddrT>,
    free: Option<unsafe extern "C" fn(*mut VfdFile, MemT, HidT, HaddrT, HsizeT) -> HerrT>,
    get_eoa: Option<unsafe extern "C" fn(*const VfdFile, MemT) -> HaddrT>,
    set_eoa: Option<unsafe extern "C" fn(*mut VfdFile, MemT, HaddrT) -> HerrT>,
    get_eof: Option<unsafe extern "C" fn(*const VfdFile, MemT) -> HaddrT>,
    get_handle: Option<unsafe extern "C" fn(*mut VfdFile, HidT, *mut *mut c_void) -> HerrT>,
    read: Option<unsafe extern "C" fn(*mut VfdFile, MemT, HidT, HaddrT, usize, *mut c_void) -> HerrT>,
    write:
        Option<unsafe extern "C" fn(*mut VfdFile, MemT, HidT, HaddrT, usize, *const c_void) -> HerrT>,
    flush: Option<unsafe extern "C" fn(*mut VfdFile, HidT, HboolT) -> HerrT>,
    truncate: Option<unsafe extern "C" fn(*mut VfdFile, HidT, HboolT) -> HerrT>,
    lock: Option<unsafe extern "C" fn(*mut VfdFile, HboolT) -> HerrT>,
    unlock: Option<unsafe extern "C" fn(*mut VfdFile) -> HerrT>,
    fl_map: [MemT; H5FD_MEM_NTYPES],
}

unsafe impl Sync for FdClass {}

extern "C" {
    fn H5open() -> HerrT;
    fn H5get_libversion(majnum: *mut c_uint, minnum: *mut c_uint, relnum: *mut c_uint) -> HerrT;
    fn H5FDregister(cls: *const FdClass) -> HidT;
    fn H5FDunregister(driver_id: HidT) -> HerrT;
    fn H5Pset_driver(plist_id: HidT, driver_id: HidT, driver_info: *const c_void) -> HerrT;
}

lazy_static! {
    /// URL → options handoff between the handle cache and `vfd_open`.
    static ref STAGED: Mutex<HashMap<String, RemoteOptions>> = Mutex::new(HashMap::new());
    /// Why the last open of a URL failed; `H5Fopen` only reports -1.
    static ref OPEN_ERRORS: Mutex<HashMap<String, Error>> = Mutex::new(HashMap::new());
    static ref DRIVER_ID: Mutex<Option<HidT>> = Mutex::new(None);
}

static DRIVER_NAME: &[u8] = b"adf_remote\0";

/// Stage credentials/tuning for a URL about to be opened through the
/// driver.
pub fn stage_config(url: &str, opts: &RemoteOptions) {
    STAGED
        .lock()
        .expect("staged-config lock")
        .insert(url.to_string(), opts.clone());
}

/// Retrieve the structured error behind a failed driver open, if any.
pub fn take_open_error(url: &str) -> Option<Error> {
    OPEN_ERRORS.lock().expect("open-error lock").remove(url)
}

/// Register the driver with the library (idempotent). Fails cleanly when
/// the installed HDF5 does not match the ABI this class was written for.
pub fn ensure_registered() -> Result<HidT> {
    let mut guard = DRIVER_ID.lock().expect("driver-id lock");
    if let Some(id) = *guard {
        return Ok(id);
    }

    unsafe {
        H5open();
    }
    let (maj, min) = library_version();
    if maj != 1 || !(min == 10 || min == 12) {
        return Err(Error::Hdf5(format!(
            "remote driver supports HDF5 1.10/1.12, found {maj}.{min}"
        )));
    }

    let class = Box::leak(Box::new(FdClass {
        name: DRIVER_NAME.as_ptr() as *const c_char,
        maxaddr: MAXADDR,
        fc_degree: 0, // H5F_CLOSE_DEFAULT
        terminate: None,
        sb_size: None,
        sb_encode: None,
        sb_decode: None,
        fapl_size: 0,
        fapl_get: None,
        fapl_copy: None,
        fapl_free: None,
        dxpl_size: 0,
        dxpl_copy: None,
        dxpl_free: None,
        open: Some(vfd_open),
        close: Some(vfd_close),
        cmp: Some(vfd_cmp),
        query: Some(vfd_query),
        get_type_map: None,
        alloc: None,
        free: None,
        get_eoa: Some(vfd_get_eoa),
        set_eoa: Some(vfd_set_eoa),
        get_eof: Some(vfd_get_eof),
        get_handle: None,
        read: Some(vfd_read),
        write: Some(vfd_write),
        flush: Some(vfd_flush),
        truncate: Some(vfd_truncate),
        lock: None,
        unlock: None,
        fl_map: [0; H5FD_MEM_NTYPES], // H5FD_MEM_DEFAULT everywhere
    }));

    let id = unsafe { H5FDregister(class as *const FdClass) };
    if id < 0 {
        return Err(Error::Hdf5("H5FDregister failed".to_string()));
    }
    *guard = Some(id);
    Ok(id)
}

/// Point a file-access property list at the remote driver.
pub fn set_fapl(fapl_id: HidT) -> Result<()> {
    let driver = ensure_registered()?;
    let status = unsafe { H5Pset_driver(fapl_id, driver, ptr::null()) };
    if status < 0 {
        return Err(Error::Hdf5("H5Pset_driver failed".to_string()));
    }
    Ok(())
}

/// Teardown for extension unload.
pub fn unregister() {
    let mut guard = DRIVER_ID.lock().expect("driver-id lock");
    if let Some(id) = guard.take() {
        let status = unsafe { H5FDunregister(id) };
        if status < 0 {
            warn!("H5FDunregister returned {status}");
        }
    }
}

fn library_version() -> (c_uint, c_uint) {
    let (mut maj, mut min, mut rel) = (0, 0, 0);
    unsafe {
        H5get_libversion(&mut maj, &mut min, &mut rel);
    }
    (maj, min)
}

unsafe extern "C" fn vfd_open(
    name: *const c_char,
    flags: c_uint,
    _fapl: HidT,
    maxaddr: HaddrT,
) -> *mut VfdFile {
    if name.is_null() || flags & H5F_ACC_RDWR != 0 {
        return ptr::null_mut();
    }
    let url = match CStr::from_ptr(name).to_str() {
        Ok(s) => s.to_string(),
        Err(_) => return ptr::null_mut(),
    };
    let opts = STAGED
        .lock()
        .ok()
        .and_then(|mut m| m.remove(&url))
        .unwrap_or_default();

    match RemoteFile::open(&url, &opts) {
        Ok(file) => {
            if file.len() > maxaddr {
                return ptr::null_mut();
            }
            let url_c = match CString::new(url) {
                Ok(c) => c,
                Err(_) => return ptr::null_mut(),
            };
            Box::into_raw(Box::new(VfdFile {
                base: [0; 24],
                eoa: 0,
                url: url_c.into_raw(),
                file: Box::into_raw(Box::new(file)),
            }))
        }
        Err(e) => {
            error!("remote open failed: {e}");
            if let Ok(mut errors) = OPEN_ERRORS.lock() {
                errors.insert(url, e);
            }
            ptr::null_mut()
        }
    }
}

unsafe extern "C" fn vfd_close(file: *mut VfdFile) -> HerrT {
    if file.is_null() {
        return -1;
    }
    let f = Box::from_raw(file);
    drop(Box::from_raw(f.file));
    drop(CString::from_raw(f.url));
    0
}

unsafe extern "C" fn vfd_cmp(f1: *const VfdFile, f2: *const VfdFile) -> c_int {
    let a = CStr::from_ptr((*f1).url);
    let b = CStr::from_ptr((*f2).url);
    match a.cmp(b) {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    }
}

unsafe extern "C" fn vfd_query(_file: *const VfdFile, flags: *mut c_ulong) -> HerrT {
    if !flags.is_null() {
        *flags = 0;
    }
    0
}

unsafe extern "C" fn vfd_get_eoa(file: *const VfdFile, _mem: MemT) -> HaddrT {
    (*file).eoa
}

unsafe extern "C" fn vfd_set_eoa(file: *mut VfdFile, _mem: MemT, addr: HaddrT) -> HerrT {
    (*file).eoa = addr;
    0
}

unsafe extern "C" fn vfd_get_eof(file: *const VfdFile, _mem: MemT) -> HaddrT {
    (*(*file).file).len()
}

unsafe extern "C" fn vfd_read(
    file: *mut VfdFile,
    _mem: MemT,
    _dxpl: HidT,
    addr: HaddrT,
    size: usize,
    buf: *mut c_void,
) -> HerrT {
    let f = &mut *file;
    let out = std::slice::from_raw_parts_mut(buf as *mut u8, size);
    match (*f.file).read_at(addr, out) {
        Ok(()) => 0,
        Err(e) => {
            error!("remote read at {addr} (+{size}) failed: {e}");
            -1
        }
    }
}

unsafe extern "C" fn vfd_write(
    file: *mut VfdFile,
    _mem: MemT,
    _dxpl: HidT,
    _addr: HaddrT,
    _size: usize,
    _buf: *const c_void,
) -> HerrT {
    error!(
        "write attempted on read-only remote file {}",
        CStr::from_ptr((*file).url).to_string_lossy()
    );
    -1
}

unsafe extern "C" fn vfd_flush(_file: *mut VfdFile, _dxpl: HidT, _closing: HboolT) -> HerrT {
    0
}

unsafe extern "C" fn vfd_truncate(_file: *mut VfdFile, _dxpl: HidT, _closing: HboolT) -> HerrT {
    0
}

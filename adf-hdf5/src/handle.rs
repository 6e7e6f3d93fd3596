//! Shared, reference-counted file handles.
//!
//! Concurrent readers of one path share a single `hdf5::File`; the cache
//! holds weak references so the file closes exactly once, when the last
//! reader drops its `Arc`. Closing races resolve by weak promotion: a
//! handle that loses its last strong count mid-open is simply reopened.

use std::collections::HashMap;
use std::ffi::CString;
use std::os::raw::{c_char, c_int, c_uint};
use std::sync::{Arc, Mutex, Weak};

use adf_core::{Error, RemoteOptions, Result};
use hdf5::File;
use lazy_static::lazy_static;
use log::debug;

use crate::lock;

type HidT = i64;
type HerrT = c_int;

const H5F_ACC_RDONLY: c_uint = 0x0000;
const H5F_CLOSE_WEAK: c_int = 1;

extern "C" {
    fn H5open() -> HerrT;
    fn H5Fopen(filename: *const c_char, flags: c_uint, access_plist: HidT) -> HidT;
    fn H5Pcreate(class_id: HidT) -> HidT;
    fn H5Pset_fclose_degree(plist_id: HidT, degree: c_int) -> HerrT;
    fn H5Pclose(plist_id: HidT) -> HerrT;
    // Property-list class id for file access (1.10/1.12 symbol name; the
    // remote driver registration guards the version).
    static H5P_CLS_FILE_ACCESS_ID_g: HidT;
}

/// One open container. Dereferences to the underlying [`hdf5::File`].
pub struct FileHandle {
    file: Option<File>,
    path: String,
    remote: bool,
}

impl FileHandle {
    pub fn file(&self) -> &File {
        self.file.as_ref().expect("file present until drop")
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_remote(&self) -> bool {
        self.remote
    }

    /// Base name for `_file_name` columns.
    pub fn base_name(&self) -> &str {
        self.path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&self.path)
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        // The close itself must run under the global API lock; child
        // object closes re-enter it.
        let file = self.file.take();
        lock::with_lock(move || drop(file));
        debug!("closed {}", self.path);
    }
}

lazy_static! {
    static ref HANDLES: Mutex<HashMap<String, Weak<FileHandle>>> = Mutex::new(HashMap::new());
}

/// Open (or revive) the shared handle for `path`. Remote URLs go through
/// the remote driver configured with `remote`.
pub fn open(path: &str, remote: Option<&RemoteOptions>) -> Result<Arc<FileHandle>> {
    // Best effort, once; a failure only bites when a dataset actually
    // needs the filter.
    crate::lzf::ensure_registered();

    let is_remote = adf_remote::is_remote_path(path);
    let key = if is_remote {
        path.to_string()
    } else {
        std::fs::canonicalize(path)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| path.to_string())
    };

    let mut map = HANDLES.lock().expect("handle cache lock");
    map.retain(|_, weak| weak.strong_count() > 0);
    if let Some(handle) = map.get(&key).and_then(Weak::upgrade) {
        return Ok(handle);
    }

    let file = if is_remote {
        open_remote(path, remote.cloned().unwrap_or_default())?
    } else {
        open_local(path)?
    };

    let handle = Arc::new(FileHandle {
        file: Some(file),
        path: path.to_string(),
        remote: is_remote,
    });
    map.insert(key, Arc::downgrade(&handle));
    Ok(handle)
}

fn open_local(path: &str) -> Result<File> {
    if let Err(e) = std::fs::metadata(path) {
        return Err(Error::from_io(e, path));
    }
    // Read-only; the default close degree already waits for children
    // without forcing them.
    File::open(path).map_err(|e| Error::Hdf5(format!("{path}: {e}")))
}

fn open_remote(url: &str, opts: RemoteOptions) -> Result<File> {
    adf_remote::vfd::stage_config(url, &opts);
    let url_c =
        CString::new(url).map_err(|_| Error::Internal(format!("URL with NUL: {url}")))?;

    lock::with_lock(|| {
        // Registration first: it both initializes the library and refuses
        // unsupported HDF5 versions before any raw call below.
        adf_remote::vfd::ensure_registered()?;
        let fapl = unsafe {
            H5open();
            H5Pcreate(H5P_CLS_FILE_ACCESS_ID_g)
        };
        if fapl < 0 {
            return Err(Error::Hdf5("H5Pcreate(file access) failed".to_string()));
        }
        let result = (|| {
            adf_remote::vfd::set_fapl(fapl)?;
            unsafe {
                H5Pset_fclose_degree(fapl, H5F_CLOSE_WEAK);
            }
            let fid = unsafe { H5Fopen(url_c.as_ptr(), H5F_ACC_RDONLY, fapl) };
            if fid < 0 {
                // The driver's open callback recorded why it failed.
                return Err(
                    adf_remote::vfd::take_open_error(url)
                        .unwrap_or_else(|| Error::Hdf5(format!("H5Fopen failed for {url}"))),
                );
            }
            unsafe { file_from_id(fid) }
                .map_err(|e| Error::Hdf5(format!("{url}: {e}")))
        })();
        unsafe {
            H5Pclose(fapl);
        }
        result
    })
}

/// Wrap a raw file id into the safe wrapper, transferring ownership.
unsafe fn file_from_id(fid: HidT) -> hdf5::Result<File> {
    use hdf5::ObjectClass;
    let handle = hdf5::Handle::try_new(fid)?;
    Ok(File::from_handle(handle))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_file() -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.h5ad");
        let file = File::create(&path).unwrap();
        file.create_group("obs").unwrap();
        drop(file);
        (dir, path.to_string_lossy().into_owned())
    }

    #[test]
    fn concurrent_opens_share_one_handle() {
        let (_dir, path) = scratch_file();
        let a = open(&path, None).unwrap();
        let b = open(&path, None).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(Arc::strong_count(&a), 2);
    }

    #[test]
    fn handle_revives_after_full_drop() {
        let (_dir, path) = scratch_file();
        let first = open(&path, None).unwrap();
        let addr_first = Arc::as_ptr(&first) as usize;
        drop(first);
        // The weak entry is dead; a new open must produce a fresh handle
        // rather than a dangling one.
        let second = open(&path, None).unwrap();
        assert!(second.file().group("obs").is_ok());
        let _ = addr_first;
    }

    #[test]
    fn missing_file_is_classified() {
        let err = open("/definitely/not/here.h5ad", None).unwrap_err();
        assert!(matches!(err, Error::FileNotFound(_)));
    }
}

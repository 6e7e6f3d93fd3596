//! Serialization of direct `hdf5-sys` call sites.
//!
//! The `hdf5` crate serializes its own high-level calls internally; this
//! wrapper covers the raw FFI this crate issues itself (hyperslab reads,
//! compound projections, filter checks, driver plumbing). When the
//! installed library is thread-safe the wrapper collapses to a plain call.
//! The probe runs once; the choice is fixed for the process lifetime.

use std::os::raw::{c_int, c_uint};

use lazy_static::lazy_static;
use parking_lot::ReentrantMutex;

extern "C" {
    fn H5open() -> c_int;
    fn H5is_library_threadsafe(is_ts: *mut c_uint) -> c_int;
}

fn probe_threadsafe() -> bool {
    let mut is_ts: c_uint = 0;
    let status = unsafe {
        H5open();
        H5is_library_threadsafe(&mut is_ts)
    };
    status >= 0 && is_ts != 0
}

lazy_static! {
    static ref THREADSAFE: bool = probe_threadsafe();
    // Reentrant: close chains re-enter (closing a file closes its children,
    // whose drops take the lock again).
    static ref API_LOCK: ReentrantMutex<()> = ReentrantMutex::new(());
}

pub fn is_library_threadsafe() -> bool {
    *THREADSAFE
}

/// Run `f` holding the global HDF5 lock unless the library build is
/// thread-safe.
pub fn with_lock<R>(f: impl FnOnce() -> R) -> R {
    if *THREADSAFE {
        f()
    } else {
        let _guard = API_LOCK.lock();
        f()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_is_reentrant() {
        let outer = with_lock(|| with_lock(|| 7));
        assert_eq!(outer, 7);
    }
}

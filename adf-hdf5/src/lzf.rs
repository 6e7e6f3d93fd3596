//! LZF decompression filter (id 32000).
//!
//! The dominant Python writer compresses chunks with LZF, which stock HDF5
//! does not ship. This is a port of the reference decompressor plus the
//! registration glue. Only the decode direction is registered; the crate
//! never writes.

use std::os::raw::{c_char, c_int, c_uint, c_void};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;

use log::warn;

use crate::lock;

pub const LZF_FILTER_ID: c_int = 32000;

const H5Z_FLAG_REVERSE: c_uint = 0x0100;

/// `H5Z_class2_t`.
#[repr(C)]
struct ZClass {
    version: c_int,
    id: c_int,
    encoder_present: c_uint,
    decoder_present: c_uint,
    name: *const c_char,
    can_apply: Option<unsafe extern "C" fn(i64, i64, i64) -> c_int>,
    set_local: Option<unsafe extern "C" fn(i64, i64, i64) -> c_int>,
    filter: Option<
        unsafe extern "C" fn(
            flags: c_uint,
            cd_nelmts: usize,
            cd_values: *const c_uint,
            nbytes: usize,
            buf_size: *mut usize,
            buf: *mut *mut c_void,
        ) -> usize,
    >,
}

unsafe impl Sync for ZClass {}

extern "C" {
    fn H5Zregister(cls: *const c_void) -> c_int;
}

static REGISTER: Once = Once::new();
static REGISTERED: AtomicBool = AtomicBool::new(false);

static CLASS: ZClass = ZClass {
    version: 1, // H5Z_CLASS_T_VERS
    id: LZF_FILTER_ID,
    encoder_present: 0,
    decoder_present: 1,
    name: b"lzf\0".as_ptr() as *const c_char,
    can_apply: None,
    set_local: None,
    filter: Some(lzf_filter),
};

/// Register the filter with the library. Failure is logged and reported,
/// not fatal: reading an LZF-compressed dataset will then fail with a
/// structured read error naming the dataset.
pub fn ensure_registered() -> bool {
    REGISTER.call_once(|| {
        let status = lock::with_lock(|| unsafe { H5Zregister(&CLASS as *const ZClass as *const c_void) });
        if status < 0 {
            warn!("could not register LZF filter (id {LZF_FILTER_ID}); LZF-compressed datasets will not be readable");
        } else {
            REGISTERED.store(true, Ordering::Release);
        }
    });
    REGISTERED.load(Ordering::Acquire)
}

unsafe extern "C" fn lzf_filter(
    flags: c_uint,
    _cd_nelmts: usize,
    _cd_values: *const c_uint,
    nbytes: usize,
    buf_size: *mut usize,
    buf: *mut *mut c_void,
) -> usize {
    if flags & H5Z_FLAG_REVERSE == 0 {
        // Compression is not supported; the pipeline treats 0 as failure.
        return 0;
    }

    let input = std::slice::from_raw_parts(*buf as *const u8, nbytes);

    // The uncompressed chunk size is not carried by the stream; start from
    // the pipeline's buffer hint and grow geometrically.
    let mut capacity = (*buf_size).max(nbytes * 2).max(1024);
    loop {
        let mut output = vec![0u8; capacity];
        match decompress(input, &mut output) {
            Ok(n) => {
                let out = libc::malloc(n);
                if out.is_null() {
                    return 0;
                }
                std::ptr::copy_nonoverlapping(output.as_ptr(), out as *mut u8, n);
                libc::free(*buf);
                *buf = out;
                *buf_size = n;
                return n;
            }
            Err(DecompressError::OutputTooSmall) => {
                capacity *= 2;
            }
            Err(DecompressError::Corrupt) => return 0,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum DecompressError {
    OutputTooSmall,
    Corrupt,
}

/// LZF reference decompression. Returns the number of bytes written to
/// `output`.
pub fn decompress(input: &[u8], output: &mut [u8]) -> Result<usize, DecompressError> {
    let mut ip = 0usize;
    let mut op = 0usize;

    while ip < input.len() {
        let ctrl = input[ip] as usize;
        ip += 1;

        if ctrl < 32 {
            // Literal run of ctrl + 1 bytes.
            let len = ctrl + 1;
            if ip + len > input.len() {
                return Err(DecompressError::Corrupt);
            }
            if op + len > output.len() {
                return Err(DecompressError::OutputTooSmall);
            }
            output[op..op + len].copy_from_slice(&input[ip..ip + len]);
            ip += len;
            op += len;
        } else {
            // Back reference: length in the top 3 bits (7 = extended).
            let mut len = ctrl >> 5;
            if len == 7 {
                if ip >= input.len() {
                    return Err(DecompressError::Corrupt);
                }
                len += input[ip] as usize;
                ip += 1;
            }
            len += 2;

            if ip >= input.len() {
                return Err(DecompressError::Corrupt);
            }
            let distance = ((ctrl & 0x1f) << 8) + input[ip] as usize + 1;
            ip += 1;

            if distance > op {
                return Err(DecompressError::Corrupt);
            }
            if op + len > output.len() {
                return Err(DecompressError::OutputTooSmall);
            }
            // Overlapping copies are the point: byte-by-byte, as in the
            // reference implementation.
            let mut reference = op - distance;
            for _ in 0..len {
                output[op] = output[reference];
                op += 1;
                reference += 1;
            }
        }
    }
    Ok(op)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Streams below are hand-assembled against the format: a control byte
    // under 32 starts a literal run, otherwise the top 3 bits are the
    // back-reference length and the rest the distance.

    #[test]
    fn literal_run() {
        let input = [4u8, b'h', b'e', b'l', b'l', b'o'];
        let mut out = [0u8; 16];
        let n = decompress(&input, &mut out).unwrap();
        assert_eq!(&out[..n], b"hello");
    }

    #[test]
    fn back_reference_repeats() {
        // "abc" literal, then a 4-byte back reference at distance 3:
        // ctrl = (len-2) << 5 = 2 << 5, distance byte = 2 (+1).
        let input = [2u8, b'a', b'b', b'c', 2 << 5, 2];
        let mut out = [0u8; 16];
        let n = decompress(&input, &mut out).unwrap();
        assert_eq!(&out[..n], b"abcabca");
    }

    #[test]
    fn overlapping_reference_extends_run() {
        // "a" then a distance-1 reference of 5 bytes: classic RLE case.
        let input = [0u8, b'a', 3 << 5, 0];
        let mut out = [0u8; 16];
        let n = decompress(&input, &mut out).unwrap();
        assert_eq!(&out[..n], b"aaaaaa");
    }

    #[test]
    fn output_too_small_is_reported() {
        let input = [4u8, b'h', b'e', b'l', b'l', b'o'];
        let mut out = [0u8; 3];
        assert_eq!(
            decompress(&input, &mut out),
            Err(DecompressError::OutputTooSmall)
        );
    }

    #[test]
    fn bad_distance_is_corrupt() {
        let input = [0u8, b'a', 2 << 5, 9];
        let mut out = [0u8; 16];
        assert_eq!(decompress(&input, &mut out), Err(DecompressError::Corrupt));
    }

    #[test]
    fn registration_is_idempotent() {
        let first = ensure_registered();
        assert_eq!(first, ensure_registered());
    }
}

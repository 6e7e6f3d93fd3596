//! Read-only remote access for HDF5 containers.
//!
//! Everything HDF5 wants to read from an `s3://`, `gs://` or `http(s)://`
//! URL is served out of [`RemoteFile`]: a HEAD on open records the object
//! size, every subsequent read is satisfied by byte-range GETs through a
//! fixed-size LRU block cache. [`vfd`] plugs the whole thing beneath the
//! HDF5 library as a virtual file driver.

pub mod cache;
pub mod client;
pub mod file;
pub mod sigv4;
pub mod url;
pub mod vfd;

pub use cache::BlockCache;
pub use client::RangeClient;
pub use file::RemoteFile;
pub use url::{is_remote_path, RemoteUrl};

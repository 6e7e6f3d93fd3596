use std::fmt::{Display, Formatter};
use std::{io, result};

/// Errors raised anywhere between the HDF5 access layer and the query
/// surface. Variants carry enough context (file path, dataset path, HTTP
/// status) to be actionable without a backtrace.
#[derive(Debug)]
pub enum Error {
    FileNotFound(String),
    PermissionDenied(String),
    /// Not an AnnData container: neither `obs` nor `var` is present.
    InvalidFile(String),
    /// Dimensions disagree across related datasets.
    InvalidShape { path: String, detail: String },
    /// A dataset uses a filter we cannot decode (LZF is built in).
    UnsupportedFilter {
        path: String,
        dataset: String,
        filter_id: i32,
    },
    /// HDF5 returned a negative status while reading `dataset`.
    Read { path: String, dataset: String },
    /// indptr not monotone, or indices out of range.
    CorruptSparse {
        path: String,
        dataset: String,
        detail: String,
    },
    /// Multi-file intersection is empty, or two column types cannot be
    /// coerced.
    SchemaMismatch(String),
    NoMatchingFiles(String),
    RemoteAuth { url: String, status: u16 },
    RemoteNotFound(String),
    /// The bucket lives in another region; the payload is the region the
    /// server pointed at. The caller may reopen against it.
    RegionRedirect(String),
    Http { url: String, status: u16 },
    NetworkTimeout(String),
    /// Write attempted against an attached (read-only) schema.
    ReadOnly(String),
    /// An HDF5 library error that does not fit a more specific variant.
    Hdf5(String),
    Io(String),
    Internal(String),
    External(Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T, E = Error> = result::Result<T, E>;

impl Error {
    /// Classify an I/O error for `path` into the taxonomy.
    pub fn from_io(e: io::Error, path: &str) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => Self::FileNotFound(path.to_string()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_string()),
            _ => Self::Io(format!("{path}: {e}")),
        }
    }

    pub fn read(path: impl Into<String>, dataset: impl Into<String>) -> Self {
        Self::Read {
            path: path.into(),
            dataset: dataset.into(),
        }
    }

    pub fn corrupt_sparse(
        path: impl Into<String>,
        dataset: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::CorruptSparse {
            path: path.into(),
            dataset: dataset.into(),
            detail: detail.into(),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FileNotFound(path) => write!(f, "file not found: {path}"),
            Self::PermissionDenied(path) => write!(f, "permission denied: {path}"),
            Self::InvalidFile(path) => {
                write!(f, "{path} is not an AnnData file (no obs or var group)")
            }
            Self::InvalidShape { path, detail } => {
                write!(f, "inconsistent shapes in {path}: {detail}")
            }
            Self::UnsupportedFilter {
                path,
                dataset,
                filter_id,
            } => write!(
                f,
                "{path}:{dataset} uses unsupported HDF5 filter {filter_id}"
            ),
            Self::Read { path, dataset } => {
                write!(f, "HDF5 read of {dataset} in {path} failed")
            }
            Self::CorruptSparse {
                path,
                dataset,
                detail,
            } => write!(f, "corrupt sparse matrix {dataset} in {path}: {detail}"),
            Self::SchemaMismatch(detail) => write!(f, "schema mismatch: {detail}"),
            Self::NoMatchingFiles(pattern) => {
                write!(f, "no files match pattern '{pattern}'")
            }
            Self::RemoteAuth { url, status } => {
                write!(f, "authentication failed for {url} (HTTP {status})")
            }
            Self::RemoteNotFound(url) => write!(f, "remote object not found: {url}"),
            Self::RegionRedirect(region) => {
                write!(f, "bucket is in another region: {region}")
            }
            Self::Http { url, status } => write!(f, "HTTP {status} from {url}"),
            Self::NetworkTimeout(url) => write!(f, "request to {url} timed out"),
            Self::ReadOnly(what) => write!(f, "{what} is read-only"),
            Self::Hdf5(msg) => write!(f, "HDF5 error: {msg}"),
            Self::Io(msg) => write!(f, "I/O error: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
            Self::External(source) => write!(f, "{source}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::External(source) => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

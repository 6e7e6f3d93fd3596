use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;

/// Size of one cached block fetched from a remote file.
pub const DEFAULT_BLOCK_SIZE: usize = 1 << 20;
/// How much of the file head is fetched eagerly on open. HDF5 superblock,
/// object headers and most chunk B-trees live there.
pub const DEFAULT_PREFETCH_SIZE: usize = 16 << 20;
/// Maximum number of resident cache blocks per open remote file.
pub const DEFAULT_CACHE_BLOCKS: usize = 64;
/// Per-request timeout for HEAD and range GETs.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Rows per result chunk handed to the host engine.
pub const DEFAULT_BATCH_ROWS: usize = 8192;

pub const DEFAULT_REGION: &str = "us-east-1";

/// How multi-file schemas are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemaMode {
    /// Keep only columns present in every file.
    #[default]
    Intersection,
    /// Keep the union of all columns; absent slices become NULL.
    Union,
}

impl FromStr for SchemaMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.to_ascii_lowercase().as_str() {
            "intersection" => Ok(Self::Intersection),
            "union" => Ok(Self::Union),
            other => Err(Error::Internal(format!(
                "invalid schema_mode '{other}' (expected 'intersection' or 'union')"
            ))),
        }
    }
}

/// Credentials and tuning for remote (HTTP/S3/GS) access.
///
/// In a deployed extension these values come from the host's secret
/// manager; here the embedding application fills them in.
#[derive(Debug, Clone)]
pub struct RemoteOptions {
    pub key_id: Option<String>,
    pub secret: Option<String>,
    pub session_token: Option<String>,
    pub region: String,
    pub endpoint: Option<String>,
    pub use_ssl: bool,
    pub block_size: usize,
    pub prefetch_size: usize,
    pub cache_blocks: usize,
    pub timeout: Duration,
}

impl Default for RemoteOptions {
    fn default() -> Self {
        Self {
            key_id: None,
            secret: None,
            session_token: None,
            region: DEFAULT_REGION.to_string(),
            endpoint: None,
            use_ssl: true,
            block_size: DEFAULT_BLOCK_SIZE,
            prefetch_size: DEFAULT_PREFETCH_SIZE,
            cache_blocks: DEFAULT_CACHE_BLOCKS,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl RemoteOptions {
    pub fn with_credentials(mut self, key_id: impl Into<String>, secret: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self.secret = Some(secret.into());
        self
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_use_ssl(mut self, use_ssl: bool) -> Self {
        self.use_ssl = use_ssl;
        self
    }

    pub fn has_credentials(&self) -> bool {
        self.key_id.is_some() && self.secret.is_some()
    }
}

/// Options recognized by the attach surface.
#[derive(Debug, Clone, Default)]
pub struct AttachOptions {
    /// Column of `var` holding human-readable gene symbols.
    pub var_name_column: Option<String>,
    /// Column of `var` holding stable gene identifiers.
    pub var_id_column: Option<String>,
}

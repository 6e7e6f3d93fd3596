//! AnnData containers as DataFusion tables.
//!
//! The crate exposes a set of table functions (`scan_obs`, `scan_var`,
//! `scan_x`, ...) over local paths, globs, and `s3://`/`gs://`/`http(s)`
//! URLs, plus an attach surface that maps one container onto a read-only
//! schema of views.
//!
//! ```no_run
//! use adf_core::RemoteOptions;
//! use datafusion::prelude::SessionContext;
//!
//! # async fn demo() -> datafusion::error::Result<()> {
//! let ctx = SessionContext::new();
//! adf_fusion::register_all(&ctx, RemoteOptions::default());
//! let df = ctx
//!     .sql("SELECT count(*) FROM scan_obs('pbmc.h5ad')")
//!     .await?;
//! df.show().await?;
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod functions;
pub mod globbing;
pub mod harmonize;
pub mod provider;
pub mod scan;

pub use catalog::{attach, detach, parse_attach_options};
pub use functions::register_all;
pub use scan::{bind, ScanBind, ScanOptions, ScanStream, TableKind};

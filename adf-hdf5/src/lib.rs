//! HDF5 access layer for AnnData containers.
//!
//! [`handle`] shares one open file per path across readers, [`schema`]
//! discovers what a container holds, [`frame`] and [`matrix`] read
//! annotation columns and matrix slices into engine arrays with
//! projection pushdown, [`uns`] flattens the unstructured metadata, and
//! [`detect`] picks the gene name/id columns. [`lzf`] supplies the
//! decompression filter the dominant writer uses.

pub mod detect;
pub mod frame;
pub mod handle;
pub mod lock;
pub mod lzf;
pub mod matrix;
pub mod schema;
pub mod uns;
pub mod values;

mod raw;

pub use frame::FrameReader;
pub use handle::{open, FileHandle};
pub use matrix::MatrixReader;
pub use schema::{discover, FileSchema, FrameSchema, MatrixFormat, MatrixLayout};

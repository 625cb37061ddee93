//! Spool Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling, logging and file metadata for the spool workspace.
//!
//! # Overview
//!
//! - **Error Handling**: the `SpoolError` taxonomy and `Result` alias
//! - **Logging**: `tracing` subscriber setup driven by `LogConfig`
//! - **Types**: `FileMetadata`, the snapshot of an input file taken at discovery
//!
//! # Example
//!
//! ```no_run
//! use spool_common::{FileMetadata, Result};
//!
//! fn describe(path: &str) -> Result<()> {
//!     let meta = FileMetadata::from_path(path, "/data/in")?;
//!     tracing::info!(name = %meta.name, length = meta.length, "Discovered file");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{Result, SchemaGroup, SpoolError};
pub use types::FileMetadata;

//! Spool Ingest Library
//!
//! Spooling-directory ingestion: files dropped into a watched directory are
//! claimed, decoded into schema-typed records, handed to a sink with resumable
//! per-file offsets, and finally moved, deleted or quarantined.
//!
//! # Guarantees
//!
//! - A file is claimed by at most one worker (claim marker + static hash
//!   partitioning of file names).
//! - A restarted worker resumes a file right after its last committed record.
//! - Every claimed file ends in exactly one place: finished, deleted, retained
//!   or the error directory.
//!
//! # Example
//!
//! ```no_run
//! use spool_ingest::config::SpoolConfig;
//! use spool_ingest::worker::run_workers;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SpoolConfig::load("spool.toml")?;
//!     let cancel = CancellationToken::new();
//!     run_workers(&config, cancel, false).await?;
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod claim;
pub mod cleanup;
pub mod config;
pub mod decode;
pub mod emitter;
pub mod offsets;
pub mod partition;
pub mod schema;
pub mod selector;
pub mod sink;
pub mod task;
pub mod worker;

pub use config::SpoolConfig;
pub use emitter::SourceRecord;
pub use task::SpoolTask;
pub use worker::{run_workers, Worker};

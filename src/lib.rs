//! # cloudmirror - Local/Cloud Three-Way Sync Engine
//!
//! cloudmirror mirrors a local file tree against a cloud document store.
//! Every file is tracked with the hash of its last reconciled content (the
//! base); each cycle compares base, local and remote hashes, propagates
//! one-sided changes according to the source's sync mode and records
//! divergent edits as conflicts for later resolution.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cloudmirror::connector::FsConnector;
//! use cloudmirror::store::Store;
//! use cloudmirror::sync::Orchestrator;
//! use cloudmirror::types::{SyncMode, SyncSource};
//! use cloudmirror::utils::CancelToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(Store::open("state.redb".as_ref())?);
//!     let orchestrator = Orchestrator::new(store);
//!
//!     let source = SyncSource::new("notes", SyncMode::Bidirectional, "fs");
//!     let connector = Arc::new(FsConnector::new("./notes", "/mnt/cloud/notes"));
//!     let source = orchestrator.register_source(source, connector)?;
//!
//!     let report = orchestrator.run_cycle(source.id, &CancelToken::new()).await?;
//!     println!("{} pushed, {} pulled, {} conflicts", report.pushed, report.pulled, report.conflicts_created);
//!     Ok(())
//! }
//! ```

pub mod callbacks;
pub mod config;
pub mod conflict;
pub mod connector;
pub mod detect;
pub mod diff;
pub mod error;
pub mod logging;
pub mod store;
pub mod sync;
pub mod types;
pub mod util;
pub mod utils;
pub mod validation;

// Re-export commonly used types
pub use conflict::{ConflictRecord, ConflictStatus, Resolution, ResolveOutcome};
pub use connector::Connector;
pub use error::{ConfigError, ConflictError, ConnectorError, StoreError, SyncError};
pub use sync::{CycleReport, Orchestrator};
pub use types::{SourceId, SyncMode, SyncSource};

// vim: ts=4

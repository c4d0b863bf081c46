//! Connector adapter interface
//!
//! A connector reads and writes raw file content on both sides of a source
//! and tracks the remote position cursor. Connectors are injected per source
//! by the caller; the orchestrator never looks them up by name.
//!
//! Hashing is the connector's job and must be stable: the same bytes yield
//! the same [`ContentHash`] on every call. The orchestrator re-verifies local
//! hashes and skips entries whose content does not match.

use async_trait::async_trait;

use crate::error::ConnectorError;
use crate::types::{Cursor, FileId, SyncSource};
use crate::util::ContentHash;

pub mod fs;
pub mod memory;

pub use fs::FsConnector;
pub use memory::MemoryConnector;

/// Result type for connector operations
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// One entry of a full local scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
	pub relative_path: String,
	pub state: LocalState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalState {
	/// Content read in full, with the connector's hash of it
	Readable { content: Vec<u8>, hash: ContentHash },

	/// Content could not be read completely
	Unreadable { reason: String },
}

impl LocalEntry {
	pub fn readable(relative_path: &str, content: Vec<u8>) -> Self {
		let hash = ContentHash::of(&content);
		LocalEntry {
			relative_path: relative_path.to_string(),
			state: LocalState::Readable { content, hash },
		}
	}

	pub fn unreadable(relative_path: &str, reason: impl Into<String>) -> Self {
		LocalEntry {
			relative_path: relative_path.to_string(),
			state: LocalState::Unreadable { reason: reason.into() },
		}
	}
}

/// A remote file that changed after the requested cursor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteChange {
	pub file_id: FileId,
	pub relative_path: String,

	/// `None` when the remote file was deleted
	pub content: Option<Vec<u8>>,
	pub hash: Option<ContentHash>,
}

impl RemoteChange {
	pub fn updated(file_id: FileId, relative_path: &str, content: Vec<u8>) -> Self {
		let hash = Some(ContentHash::of(&content));
		RemoteChange { file_id, relative_path: relative_path.to_string(), content: Some(content), hash }
	}

	pub fn deleted(file_id: FileId, relative_path: &str) -> Self {
		RemoteChange { file_id, relative_path: relative_path.to_string(), content: None, hash: None }
	}
}

/// A remote entry that could not be read while building a delta
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFailure {
	pub relative_path: String,
	pub reason: String,
}

/// Remote changes since a cursor, plus the cursor to resume from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteDelta {
	pub changes: Vec<RemoteChange>,

	/// Entries the connector could not read. They fail on their own; the
	/// rest of the delta is still reconciled.
	pub failures: Vec<RemoteFailure>,

	pub cursor: Cursor,
}

/// Everything one cycle reads: full local state and the remote delta
#[derive(Debug, Clone, Default)]
pub struct PullSet {
	pub local: Vec<LocalEntry>,
	pub remote: RemoteDelta,
}

/// Acknowledgement of a remote write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushReceipt {
	/// Remote identity of the written file; a connector may assign a new one on create
	pub file_id: FileId,

	/// Remote cursor after the write
	pub cursor: Cursor,
}

/// Reference to a file on the remote side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef<'a> {
	pub file_id: &'a FileId,
	pub relative_path: &'a str,
}

/// Core trait every connector implements
#[async_trait]
pub trait Connector: Send + Sync {
	/// Connector kind identifier, stored on the source at registration
	fn kind(&self) -> &str;

	/// List and hash every local file of the source
	async fn scan_local(&self, source: &SyncSource) -> ConnectorResult<Vec<LocalEntry>>;

	/// Remote changes strictly after `since`
	async fn pull_remote(&self, source: &SyncSource, since: Cursor) -> ConnectorResult<RemoteDelta>;

	/// Current remote content of a file, `None` if it does not exist
	async fn read_remote(&self, source: &SyncSource, file: FileRef<'_>) -> ConnectorResult<Option<Vec<u8>>>;

	/// Write (or delete, for `None`) remote content
	async fn push(
		&self,
		source: &SyncSource,
		file: FileRef<'_>,
		content: Option<&[u8]>,
	) -> ConnectorResult<PushReceipt>;

	/// Write (or delete, for `None`) local content
	async fn write_local(
		&self,
		source: &SyncSource,
		relative_path: &str,
		content: Option<&[u8]>,
	) -> ConnectorResult<()>;

	/// Local scan and remote delta together
	async fn pull(&self, source: &SyncSource, since: Cursor) -> ConnectorResult<PullSet> {
		let (local, remote) =
			futures::try_join!(self.scan_local(source), self.pull_remote(source, since))?;
		Ok(PullSet { local, remote })
	}
}


// vim: ts=4

//! In-memory connector
//!
//! Holds the local side as a path map and the remote side as a document map
//! with a sequence-numbered change journal. Failures can be injected to
//! exercise transient and fatal connector errors.

use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use super::{
	Connector, ConnectorResult, FileRef, LocalEntry, LocalState, PushReceipt, RemoteChange, RemoteDelta,
	RemoteFailure,
};
use crate::error::ConnectorError;
use crate::types::{Cursor, FileId, SyncSource};
use crate::util::ContentHash;

#[derive(Debug, Clone)]
enum LocalSlot {
	Content(Vec<u8>),
	Unreadable(String),
	/// Content whose reported hash belongs to different bytes
	Corrupt { content: Vec<u8>, reported: ContentHash },
}

#[derive(Debug, Clone)]
struct RemoteDoc {
	path: String,
	content: Option<Vec<u8>>,
	seq: u64,
}

/// Number of writes performed on each side
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCounts {
	pub remote: usize,
	pub local: usize,
}

impl WriteCounts {
	pub fn total(&self) -> usize {
		self.remote + self.local
	}
}

#[derive(Debug, Default)]
struct Inner {
	local: BTreeMap<String, LocalSlot>,
	remote: BTreeMap<FileId, RemoteDoc>,

	/// Remote paths whose reads fail, with the reason reported
	remote_unreadable: BTreeMap<String, String>,
	seq: u64,
	unavailable: bool,
	auth_expired: bool,
	push_failures: VecDeque<ConnectorError>,
	local_write_failures: VecDeque<ConnectorError>,
	writes: WriteCounts,
}

impl Inner {
	fn check_access(&self) -> ConnectorResult<()> {
		if self.auth_expired {
			return Err(ConnectorError::auth_expired("memory connector credentials expired"));
		}
		if self.unavailable {
			return Err(ConnectorError::unavailable("memory connector offline"));
		}
		Ok(())
	}

	fn bump(&mut self) -> u64 {
		self.seq += 1;
		self.seq
	}

	/// Id of the document at a path, preferring one that still exists
	fn file_id_for(&self, path: &str) -> Option<FileId> {
		let mut at_path = self.remote.iter().filter(|(_, doc)| doc.path == path);
		let live = at_path.clone().find(|(_, doc)| doc.content.is_some());
		live.or_else(|| at_path.next()).map(|(id, _)| id.clone())
	}
}

/// Connector keeping both sides in memory
#[derive(Debug, Default)]
pub struct MemoryConnector {
	inner: Mutex<Inner>,
}

impl MemoryConnector {
	pub fn new() -> Self {
		Self::default()
	}

	fn lock(&self) -> MutexGuard<'_, Inner> {
		self.inner.lock().unwrap_or_else(|e| e.into_inner())
	}

	/// Same content on both sides, under a file id derived from the path
	pub fn seed(&self, path: &str, content: &[u8]) {
		self.set_local(path, content);
		self.set_remote(path, content);
	}

	pub fn set_local(&self, path: &str, content: &[u8]) {
		self.lock().local.insert(path.to_string(), LocalSlot::Content(content.to_vec()));
	}

	pub fn remove_local(&self, path: &str) {
		self.lock().local.remove(path);
	}

	pub fn set_local_unreadable(&self, path: &str, reason: &str) {
		self.lock().local.insert(path.to_string(), LocalSlot::Unreadable(reason.to_string()));
	}

	/// Local file whose scan reports the hash of `reported_for` instead of its own bytes
	pub fn set_local_corrupt(&self, path: &str, content: &[u8], reported_for: &[u8]) {
		self.lock().local.insert(
			path.to_string(),
			LocalSlot::Corrupt {
				content: content.to_vec(),
				reported: ContentHash::of(reported_for),
			},
		);
	}

	pub fn local(&self, path: &str) -> Option<Vec<u8>> {
		match self.lock().local.get(path) {
			Some(LocalSlot::Content(content)) => Some(content.clone()),
			Some(LocalSlot::Corrupt { content, .. }) => Some(content.clone()),
			_ => None,
		}
	}

	/// External edit on the remote side
	pub fn set_remote(&self, path: &str, content: &[u8]) {
		let mut inner = self.lock();
		let id = inner.file_id_for(path).unwrap_or_else(|| FileId(format!("doc:{}", path)));
		let seq = inner.bump();
		inner.remote.insert(
			id,
			RemoteDoc { path: path.to_string(), content: Some(content.to_vec()), seq },
		);
	}

	/// External deletion on the remote side
	pub fn remove_remote(&self, path: &str) {
		let mut inner = self.lock();
		if let Some(id) = inner.file_id_for(path) {
			let seq = inner.bump();
			if let Some(doc) = inner.remote.get_mut(&id) {
				doc.content = None;
				doc.seq = seq;
			}
		}
	}

	/// Deletion of one specific remote document
	pub fn remove_remote_id(&self, id: &FileId) {
		let mut inner = self.lock();
		let seq = inner.bump();
		if let Some(doc) = inner.remote.get_mut(id) {
			doc.content = None;
			doc.seq = seq;
		}
	}

	/// Make every read of a remote path fail until cleared
	pub fn set_remote_unreadable(&self, path: &str, reason: &str) {
		self.lock().remote_unreadable.insert(path.to_string(), reason.to_string());
	}

	pub fn clear_remote_unreadable(&self, path: &str) {
		self.lock().remote_unreadable.remove(path);
	}

	pub fn remote(&self, path: &str) -> Option<Vec<u8>> {
		let inner = self.lock();
		inner
			.remote
			.values()
			.find(|doc| doc.path == path && doc.content.is_some())
			.and_then(|doc| doc.content.clone())
	}

	pub fn remote_file_id(&self, path: &str) -> Option<FileId> {
		self.lock().file_id_for(path)
	}

	pub fn cursor(&self) -> Cursor {
		Cursor(self.lock().seq)
	}

	pub fn set_unavailable(&self, unavailable: bool) {
		self.lock().unavailable = unavailable;
	}

	pub fn expire_auth(&self) {
		self.lock().auth_expired = true;
	}

	pub fn restore_auth(&self) {
		self.lock().auth_expired = false;
	}

	pub fn fail_next_push(&self, error: ConnectorError) {
		self.lock().push_failures.push_back(error);
	}

	pub fn fail_next_local_write(&self, error: ConnectorError) {
		self.lock().local_write_failures.push_back(error);
	}

	pub fn writes(&self) -> WriteCounts {
		self.lock().writes
	}
}

#[async_trait]
impl Connector for MemoryConnector {
	fn kind(&self) -> &str {
		"memory"
	}

	async fn scan_local(&self, _source: &SyncSource) -> ConnectorResult<Vec<LocalEntry>> {
		let inner = self.lock();
		inner.check_access()?;

		Ok(inner
			.local
			.iter()
			.map(|(path, slot)| match slot {
				LocalSlot::Content(content) => LocalEntry::readable(path, content.clone()),
				LocalSlot::Unreadable(reason) => LocalEntry::unreadable(path, reason.clone()),
				LocalSlot::Corrupt { content, reported } => LocalEntry {
					relative_path: path.clone(),
					state: LocalState::Readable { content: content.clone(), hash: *reported },
				},
			})
			.collect())
	}

	async fn pull_remote(&self, _source: &SyncSource, since: Cursor) -> ConnectorResult<RemoteDelta> {
		let inner = self.lock();
		inner.check_access()?;

		let mut docs: Vec<(&FileId, &RemoteDoc)> = inner
			.remote
			.iter()
			.filter(|(_, doc)| doc.seq > since.0 && !inner.remote_unreadable.contains_key(&doc.path))
			.collect();
		docs.sort_by_key(|(_, doc)| doc.seq);

		let failures = inner
			.remote_unreadable
			.iter()
			.map(|(path, reason)| RemoteFailure { relative_path: path.clone(), reason: reason.clone() })
			.collect();

		let changes = docs
			.into_iter()
			.map(|(id, doc)| match &doc.content {
				Some(content) => RemoteChange::updated(id.clone(), &doc.path, content.clone()),
				None => RemoteChange::deleted(id.clone(), &doc.path),
			})
			.collect();

		Ok(RemoteDelta { changes, failures, cursor: Cursor(inner.seq) })
	}

	async fn read_remote(&self, _source: &SyncSource, file: FileRef<'_>) -> ConnectorResult<Option<Vec<u8>>> {
		let inner = self.lock();
		inner.check_access()?;
		if let Some(reason) = inner.remote_unreadable.get(file.relative_path) {
			return Err(ConnectorError::unavailable(reason.clone()));
		}

		let by_id = inner.remote.get(file.file_id);
		let doc = by_id.or_else(|| inner.remote.values().find(|d| d.path == file.relative_path));
		Ok(doc.and_then(|d| d.content.clone()))
	}

	async fn push(
		&self,
		_source: &SyncSource,
		file: FileRef<'_>,
		content: Option<&[u8]>,
	) -> ConnectorResult<PushReceipt> {
		let mut inner = self.lock();
		inner.check_access()?;
		if let Some(err) = inner.push_failures.pop_front() {
			return Err(err);
		}

		let seq = inner.bump();
		inner.remote.insert(
			file.file_id.clone(),
			RemoteDoc {
				path: file.relative_path.to_string(),
				content: content.map(|c| c.to_vec()),
				seq,
			},
		);
		inner.writes.remote += 1;
		Ok(PushReceipt { file_id: file.file_id.clone(), cursor: Cursor(seq) })
	}

	async fn write_local(
		&self,
		_source: &SyncSource,
		relative_path: &str,
		content: Option<&[u8]>,
	) -> ConnectorResult<()> {
		let mut inner = self.lock();
		inner.check_access()?;
		if let Some(err) = inner.local_write_failures.pop_front() {
			return Err(err);
		}

		match content {
			Some(bytes) => {
				inner.local.insert(relative_path.to_string(), LocalSlot::Content(bytes.to_vec()));
			}
			None => {
				inner.local.remove(relative_path);
			}
		}
		inner.writes.local += 1;
		Ok(())
	}
}


// vim: ts=4

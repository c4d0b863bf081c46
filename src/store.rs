//! Persistent state for sources, file base tracking and conflicts
//!
//! A single redb database holds every table. Values are JSON documents;
//! keys are plain strings or conflict ids. File records are keyed by
//! `"{source_id}/{relative_path}"` so one source's files form a contiguous
//! key range.

use redb::{ReadableDatabase, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::conflict::{AppliedResolution, ConflictId, ConflictRecord, ConflictStatus, NewConflict};
use crate::error::StoreError;
use crate::types::{Cursor, FileRecord, SourceId, SourceStatus, SyncSource};
use crate::util::now_secs;

pub type StoreResult<T> = Result<T, StoreError>;

/// Key: source id, value: serialized SyncSource
const SOURCES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("sources");

/// Key: "{source_id}/{relative_path}", value: serialized FileRecord
const FILES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("files");

/// Key: conflict id, value: serialized ConflictRecord
const CONFLICTS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("conflicts");

/// Key: "{source_id}/{relative_path}", value: id of the open conflict on that path
const OPEN_CONFLICTS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("open_conflicts");

/// Counters
const META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("meta");

const NEXT_CONFLICT_ID: &str = "next_conflict_id";

fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
	Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
	Ok(serde_json::from_slice(bytes)?)
}

fn file_key(source_id: SourceId, relative_path: &str) -> String {
	format!("{}/{}", source_id, relative_path)
}

/// Key range covering every path of a source ('0' sorts right after '/')
fn source_range(source_id: SourceId) -> (String, String) {
	(format!("{}/", source_id), format!("{}0", source_id))
}

/// Outcome of recording a divergent file
#[derive(Debug, Clone)]
pub struct RecordedConflict {
	pub record: ConflictRecord,

	/// False when an identical open conflict already existed
	pub created: bool,

	/// Older open conflict on the path that this one replaced
	pub superseded: Option<ConflictId>,
}

/// Database handle
pub struct Store {
	db: redb::Database,
	path: PathBuf,
}

impl Store {
	/// Open or create the database and make sure every table exists
	pub fn open(path: &Path) -> StoreResult<Self> {
		if let Some(parent) = path.parent() {
			if !parent.as_os_str().is_empty() {
				std::fs::create_dir_all(parent).map_err(|e| StoreError::Corrupted {
					message: format!("cannot create {}: {}", parent.display(), e),
				})?;
			}
		}

		let db = redb::Database::create(path)?;
		{
			let write_txn = db.begin_write()?;
			let _ = write_txn.open_table(SOURCES_TABLE)?;
			let _ = write_txn.open_table(FILES_TABLE)?;
			let _ = write_txn.open_table(CONFLICTS_TABLE)?;
			let _ = write_txn.open_table(OPEN_CONFLICTS_TABLE)?;
			let _ = write_txn.open_table(META_TABLE)?;
			write_txn.commit()?;
		}
		Ok(Store { db, path: path.to_path_buf() })
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	// --- Sources ---

	pub fn put_source(&self, source: &SyncSource) -> StoreResult<()> {
		let bytes = encode(source)?;
		let write_txn = self.db.begin_write()?;
		{
			let mut table = write_txn.open_table(SOURCES_TABLE)?;
			table.insert(source.id.to_string().as_str(), bytes.as_slice())?;
		}
		write_txn.commit()?;
		Ok(())
	}

	pub fn get_source(&self, id: SourceId) -> StoreResult<Option<SyncSource>> {
		let read_txn = self.db.begin_read()?;
		let table = read_txn.open_table(SOURCES_TABLE)?;
		let source = match table.get(id.to_string().as_str())? {
			Some(entry) => Some(decode(entry.value())?),
			None => None,
		};
		Ok(source)
	}

	/// Look a source up by id or by display name
	pub fn find_source(&self, key: &str) -> StoreResult<Option<SyncSource>> {
		if let Ok(id) = key.parse::<SourceId>() {
			if let Some(source) = self.get_source(id)? {
				return Ok(Some(source));
			}
		}
		Ok(self.list_sources()?.into_iter().find(|s| s.name == key))
	}

	/// All sources, oldest first
	pub fn list_sources(&self) -> StoreResult<Vec<SyncSource>> {
		let read_txn = self.db.begin_read()?;
		let table = read_txn.open_table(SOURCES_TABLE)?;

		let mut sources = Vec::new();
		for item in table.iter()? {
			let (_, value) = item?;
			sources.push(decode::<SyncSource>(value.value())?);
		}
		sources.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
		Ok(sources)
	}

	/// Read-modify-write of one source in a single transaction
	pub fn update_source<F>(&self, id: SourceId, f: F) -> StoreResult<Option<SyncSource>>
	where
		F: FnOnce(&mut SyncSource),
	{
		let key = id.to_string();
		let write_txn = self.db.begin_write()?;
		let updated = {
			let mut table = write_txn.open_table(SOURCES_TABLE)?;
			let current: Option<SyncSource> = match table.get(key.as_str())? {
				Some(entry) => Some(decode(entry.value())?),
				None => None,
			};
			match current {
				Some(mut source) => {
					f(&mut source);
					source.updated_at = now_secs();
					let bytes = encode(&source)?;
					table.insert(key.as_str(), bytes.as_slice())?;
					Some(source)
				}
				None => None,
			}
		};
		write_txn.commit()?;
		Ok(updated)
	}

	pub fn set_status(
		&self,
		id: SourceId,
		status: SourceStatus,
		reason: Option<String>,
	) -> StoreResult<Option<SyncSource>> {
		self.update_source(id, |source| {
			source.status = status;
			source.pause_reason = match status {
				SourceStatus::Paused => reason,
				SourceStatus::Active => None,
			};
		})
	}

	/// Record a completed cycle: advance the cursor and stamp the sync time
	pub fn commit_cursor(&self, id: SourceId, cursor: Cursor) -> StoreResult<Option<SyncSource>> {
		self.update_source(id, |source| {
			source.cursor = source.cursor.advance(cursor);
			source.last_synced_at = Some(now_secs());
		})
	}

	// --- File records ---

	/// Every file record of a source, keyed by relative path
	pub fn load_files(&self, source_id: SourceId) -> StoreResult<BTreeMap<String, FileRecord>> {
		let (start, end) = source_range(source_id);
		let read_txn = self.db.begin_read()?;
		let table = read_txn.open_table(FILES_TABLE)?;

		let mut files = BTreeMap::new();
		for item in table.range(start.as_str()..end.as_str())? {
			let (_, value) = item?;
			let record: FileRecord = decode(value.value())?;
			files.insert(record.relative_path.clone(), record);
		}
		Ok(files)
	}

	pub fn get_file(&self, source_id: SourceId, relative_path: &str) -> StoreResult<Option<FileRecord>> {
		let read_txn = self.db.begin_read()?;
		let table = read_txn.open_table(FILES_TABLE)?;
		let record = match table.get(file_key(source_id, relative_path).as_str())? {
			Some(entry) => Some(decode(entry.value())?),
			None => None,
		};
		Ok(record)
	}

	/// Persist the outcome of one reconciled file.
	///
	/// A record with neither a base nor a remote hash describes a file gone
	/// from both sides and is removed, unless it marks an ambiguous path. When `close_open` is set, an open
	/// conflict on the path is closed as superseded in the same transaction;
	/// its id is returned.
	pub fn apply_file(
		&self,
		source_id: SourceId,
		record: &FileRecord,
		close_open: bool,
	) -> StoreResult<Option<ConflictId>> {
		let key = file_key(source_id, &record.relative_path);
		let write_txn = self.db.begin_write()?;
		let closed = {
			let mut files = write_txn.open_table(FILES_TABLE)?;
			if record.base_hash.is_none() && record.remote_hash.is_none() && record.claimants.is_empty() {
				files.remove(key.as_str())?;
			} else {
				let bytes = encode(record)?;
				files.insert(key.as_str(), bytes.as_slice())?;
			}

			if close_open {
				let mut open = write_txn.open_table(OPEN_CONFLICTS_TABLE)?;
				let mut conflicts = write_txn.open_table(CONFLICTS_TABLE)?;
				let id = open.remove(key.as_str())?.map(|g| g.value());
				if let Some(id) = id {
					close_conflict(&mut conflicts, id, AppliedResolution::Superseded)?;
				}
				id
			} else {
				None
			}
		};
		write_txn.commit()?;
		Ok(closed)
	}

	// --- Conflicts ---

	/// Persist a divergent file, together with its refreshed file record.
	///
	/// An open conflict with the same three hashes is returned as is. An open
	/// conflict on the same path with different hashes is closed as
	/// superseded and replaced, so snapshots always reflect the latest
	/// detection.
	pub fn record_conflict(&self, new: NewConflict, file: &FileRecord) -> StoreResult<RecordedConflict> {
		let key = file_key(new.source_id, &new.relative_path);
		let (local_hash, remote_hash) = (new.local_hash(), new.remote_hash());

		let write_txn = self.db.begin_write()?;
		let recorded = {
			let mut files = write_txn.open_table(FILES_TABLE)?;
			let mut open = write_txn.open_table(OPEN_CONFLICTS_TABLE)?;
			let mut conflicts = write_txn.open_table(CONFLICTS_TABLE)?;
			let mut meta = write_txn.open_table(META_TABLE)?;

			let file_bytes = encode(file)?;
			files.insert(key.as_str(), file_bytes.as_slice())?;

			let existing_id = open.get(key.as_str())?.map(|g| g.value());
			let existing: Option<ConflictRecord> = match existing_id {
				Some(id) => match conflicts.get(id)? {
					Some(entry) => Some(decode(entry.value())?),
					None => None,
				},
				None => None,
			};

			match existing {
				Some(record)
					if record.base_hash == new.base_hash
						&& record.local_hash == local_hash
						&& record.remote_hash == remote_hash =>
				{
					RecordedConflict { record, created: false, superseded: None }
				}
				existing => {
					let superseded = match existing {
						Some(old) => {
							close_conflict(&mut conflicts, old.id, AppliedResolution::Superseded)?;
							Some(old.id)
						}
						None => None,
					};

					let id = meta.get(NEXT_CONFLICT_ID)?.map(|g| g.value()).unwrap_or(1);
					meta.insert(NEXT_CONFLICT_ID, id + 1)?;

					let record = ConflictRecord {
						id,
						source_id: new.source_id,
						file_id: new.file_id,
						relative_path: new.relative_path,
						base_hash: new.base_hash,
						local_hash,
						remote_hash,
						local_content: new.local_content,
						remote_content: new.remote_content,
						status: ConflictStatus::Open,
						created_at: now_secs(),
						resolved_at: None,
						resolution: None,
					};
					let bytes = encode(&record)?;
					conflicts.insert(id, bytes.as_slice())?;
					open.insert(key.as_str(), id)?;

					RecordedConflict { record, created: true, superseded }
				}
			}
		};
		write_txn.commit()?;
		Ok(recorded)
	}

	pub fn get_conflict(&self, id: ConflictId) -> StoreResult<Option<ConflictRecord>> {
		let read_txn = self.db.begin_read()?;
		let table = read_txn.open_table(CONFLICTS_TABLE)?;
		let record = match table.get(id)? {
			Some(entry) => Some(decode(entry.value())?),
			None => None,
		};
		Ok(record)
	}

	/// Conflicts of a source in creation order, optionally filtered by status
	pub fn list_conflicts(
		&self,
		source_id: SourceId,
		status: Option<ConflictStatus>,
	) -> StoreResult<Vec<ConflictRecord>> {
		let read_txn = self.db.begin_read()?;
		let table = read_txn.open_table(CONFLICTS_TABLE)?;

		let mut records = Vec::new();
		for item in table.iter()? {
			let (_, value) = item?;
			let record: ConflictRecord = decode(value.value())?;
			if record.source_id == source_id && status.map_or(true, |s| record.status == s) {
				records.push(record);
			}
		}
		Ok(records)
	}

	/// Mark a conflict resolved and persist the reconciled file record in one
	/// transaction. Returns false, changing nothing, when the conflict is no
	/// longer open.
	pub fn resolve_conflict(
		&self,
		id: ConflictId,
		resolution: AppliedResolution,
		file: &FileRecord,
	) -> StoreResult<bool> {
		let write_txn = self.db.begin_write()?;
		let resolved = {
			let mut conflicts = write_txn.open_table(CONFLICTS_TABLE)?;
			let current: Option<ConflictRecord> = match conflicts.get(id)? {
				Some(entry) => Some(decode(entry.value())?),
				None => None,
			};

			match current {
				Some(record) if record.is_open() => {
					let key = file_key(record.source_id, &record.relative_path);
					close_conflict(&mut conflicts, id, resolution)?;

					let mut open = write_txn.open_table(OPEN_CONFLICTS_TABLE)?;
					let indexed = open.get(key.as_str())?.map(|g| g.value());
					if indexed == Some(id) {
						open.remove(key.as_str())?;
					}

					let mut files = write_txn.open_table(FILES_TABLE)?;
					let bytes = encode(file)?;
					files.insert(key.as_str(), bytes.as_slice())?;
					true
				}
				_ => false,
			}
		};

		if resolved {
			write_txn.commit()?;
		} else {
			write_txn.abort()?;
		}
		Ok(resolved)
	}
}

/// Flip a stored conflict to resolved inside an open write transaction
fn close_conflict(
	table: &mut redb::Table<'_, u64, &'static [u8]>,
	id: ConflictId,
	resolution: AppliedResolution,
) -> StoreResult<()> {
	let current: Option<ConflictRecord> = match table.get(id)? {
		Some(entry) => Some(decode(entry.value())?),
		None => None,
	};
	let mut record = current.ok_or_else(|| StoreError::Corrupted {
		message: format!("open conflict index points at missing conflict {}", id),
	})?;

	record.status = ConflictStatus::Resolved;
	record.resolved_at = Some(now_secs());
	record.resolution = Some(resolution);
	let bytes = encode(&record)?;
	table.insert(id, bytes.as_slice())?;
	Ok(())
}


// vim: ts=4

//! Conflict resolution logic

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use super::{ConflictId, ConflictRecord, Resolution};
use crate::connector::{Connector, FileRef};
use crate::error::{ConflictError, ConnectorError, SyncError};
use crate::logging::*;
use crate::store::Store;
use crate::types::{FileId, FileRecord, SourceStatus, SyncSource};
use crate::util::{hash_opt, now_secs};

/// Result of a resolution request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
	/// Writes applied and the record closed; carries the updated record
	Resolved(ConflictRecord),

	/// The conflict was already resolved, or is being resolved right now.
	/// Nothing was applied.
	AlreadyResolved(ConflictId),
}

impl ResolveOutcome {
	pub fn is_resolved(&self) -> bool {
		matches!(self, ResolveOutcome::Resolved(_))
	}
}

/// Applies resolutions through a source's connector and closes the record
pub struct Resolver {
	store: Arc<Store>,
	claims: Mutex<HashSet<ConflictId>>,
}

/// Exclusive claim on a conflict id, released on drop
struct Claim<'a> {
	claims: &'a Mutex<HashSet<ConflictId>>,
	id: ConflictId,
}

impl Drop for Claim<'_> {
	fn drop(&mut self) {
		self.claims.lock().unwrap_or_else(|e| e.into_inner()).remove(&self.id);
	}
}

impl Resolver {
	pub fn new(store: Arc<Store>) -> Self {
		Resolver { store, claims: Mutex::new(HashSet::new()) }
	}

	fn claim(&self, id: ConflictId) -> Option<Claim<'_>> {
		let mut claims = self.claims.lock().unwrap_or_else(|e| e.into_inner());
		if claims.insert(id) {
			Some(Claim { claims: &self.claims, id })
		} else {
			None
		}
	}

	/// Apply `resolution` to conflict `id` of `source`.
	///
	/// The record is closed only after every required write succeeded; a
	/// failed write leaves it open and the file's base untouched. The caller
	/// holds the source's cycle lock.
	pub async fn resolve(
		&self,
		source: &SyncSource,
		connector: &dyn Connector,
		id: ConflictId,
		resolution: Resolution,
	) -> Result<ResolveOutcome, SyncError> {
		let _claim = match self.claim(id) {
			Some(claim) => claim,
			None => {
				debug!("Conflict {} is already being resolved", id);
				return Ok(ResolveOutcome::AlreadyResolved(id));
			}
		};

		let conflict = self.store.get_conflict(id)?.ok_or(ConflictError::NotFound { id })?;
		if conflict.source_id != source.id {
			return Err(ConflictError::NotFound { id }.into());
		}
		if !conflict.is_open() {
			debug!("Conflict {} already resolved", id);
			return Ok(ResolveOutcome::AlreadyResolved(id));
		}

		let file = FileRef { file_id: &conflict.file_id, relative_path: &conflict.relative_path };
		let mut file_id = conflict.file_id.clone();
		let content = match &resolution {
			Resolution::KeepLocal => {
				let content = conflict.local_content.as_deref();
				file_id = self.push(source, connector, id, file, content).await?;
				content
			}
			Resolution::KeepRemote => {
				let content = conflict.remote_content.as_deref();
				self.write_local(source, connector, id, &conflict.relative_path, content).await?;
				content
			}
			Resolution::ManualMerge(merged) => {
				file_id = self.push(source, connector, id, file, Some(merged.as_slice())).await?;
				self.write_local(source, connector, id, &conflict.relative_path, Some(merged.as_slice())).await?;
				Some(merged.as_slice())
			}
		};

		let hash = hash_opt(content);
		let record = FileRecord {
			file_id,
			relative_path: conflict.relative_path.clone(),
			base_hash: hash,
			remote_hash: hash,
			claimants: Vec::new(),
			updated_at: now_secs(),
		};

		if !self.store.resolve_conflict(id, resolution.applied(), &record)? {
			return Ok(ResolveOutcome::AlreadyResolved(id));
		}

		info!(
			"Resolved conflict {} on {} with {}",
			id,
			conflict.relative_path,
			resolution.kind()
		);
		let resolved = self.store.get_conflict(id)?.ok_or(ConflictError::NotFound { id })?;
		Ok(ResolveOutcome::Resolved(resolved))
	}

	async fn push(
		&self,
		source: &SyncSource,
		connector: &dyn Connector,
		id: ConflictId,
		file: FileRef<'_>,
		content: Option<&[u8]>,
	) -> Result<FileId, SyncError> {
		match connector.push(source, file, content).await {
			Ok(receipt) => Ok(receipt.file_id),
			Err(e) => Err(self.propagation_failure(source, id, "remote", e)),
		}
	}

	async fn write_local(
		&self,
		source: &SyncSource,
		connector: &dyn Connector,
		id: ConflictId,
		relative_path: &str,
		content: Option<&[u8]>,
	) -> Result<(), SyncError> {
		match connector.write_local(source, relative_path, content).await {
			Ok(()) => Ok(()),
			Err(e) => Err(self.propagation_failure(source, id, "local", e)),
		}
	}

	fn propagation_failure(
		&self,
		source: &SyncSource,
		id: ConflictId,
		side: &'static str,
		error: ConnectorError,
	) -> SyncError {
		if error.is_fatal() {
			error!("Pausing source {}: {}", source.name, error);
			if let Err(e) = self.store.set_status(source.id, SourceStatus::Paused, Some(error.to_string())) {
				error!("Failed to pause source {}: {}", source.name, e);
			}
		} else {
			warn!("Resolution of conflict {} failed on {} side: {}", id, side, error);
		}
		ConflictError::PropagationFailure { id, side, source: error }.into()
	}
}


// vim: ts=4

//! Sync orchestrator
//!
//! Drives reconciliation cycles per source. A cycle pulls the full local
//! state and the remote delta since the source's cursor, builds a hash
//! triple for every known path, classifies it and carries out the action the
//! source's mode prescribes. File units run with bounded parallelism and hand
//! back the base update they leave behind. Updates are persisted once every
//! unit finished, and only when the cycle was not cancelled: a cancelled
//! cycle leaves every base hash unmodified. The pull cursor is committed
//! only when no unit failed, so a cycle that stops early is simply redone
//! from the previous cursor.

use futures::future::join_all;
use futures::stream::{self, StreamExt};
use globset::GlobSet;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;

use crate::callbacks::{CycleEvent, CycleObserver, CyclePhase, NoObserver, SkipReason};
use crate::conflict::{
	ConflictId, ConflictRecord, ConflictStatus, NewConflict, Resolution, ResolveOutcome, Resolver,
};
use crate::connector::{Connector, FileRef, LocalState, PullSet, RemoteChange};
use crate::detect::{plan, Action, Change, HashTriple};
use crate::diff::ConflictPreview;
use crate::error::{ConflictError, ConnectorError, SyncError};
use crate::logging::*;
use crate::store::Store;
use crate::types::{Cursor, FileId, FileRecord, PathClaim, SourceId, SourceStatus, SyncSource};
use crate::util::{hash_opt, now_secs, ContentHash};
use crate::utils::CancelToken;
use crate::validation::path::{compile_excludes, validate_relative_path};
use crate::validation::ValidationError;

pub const DEFAULT_MAX_PARALLEL_FILES: usize = 8;

/// A file unit that failed during a cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
	pub path: String,
	pub error: String,
}

/// A path left out of a cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
	pub path: String,
	pub reason: SkipReason,
}

/// Summary of one cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
	pub source_id: SourceId,

	/// Local files scanned
	pub scanned: usize,

	/// Remote changes in the delta
	pub remote_changes: usize,

	pub unchanged: usize,
	pub pushed: usize,
	pub pulled: usize,
	pub converged: usize,
	pub ignored: usize,

	/// New conflict records
	pub conflicts_created: usize,

	/// Divergent files whose identical open conflict already existed
	pub conflicts_kept: usize,

	/// Open conflicts closed because their file stopped diverging
	pub conflicts_superseded: usize,

	pub skipped: Vec<SkippedFile>,
	pub failures: Vec<FileFailure>,

	/// Source cursor after the cycle
	pub cursor: Cursor,

	/// Whether the pull cursor was committed
	pub committed: bool,

	/// Whether the cycle was cancelled; no base update was persisted
	pub cancelled: bool,

	pub duration: Duration,
}

impl CycleReport {
	fn new(source_id: SourceId, cursor: Cursor) -> Self {
		CycleReport {
			source_id,
			scanned: 0,
			remote_changes: 0,
			unchanged: 0,
			pushed: 0,
			pulled: 0,
			converged: 0,
			ignored: 0,
			conflicts_created: 0,
			conflicts_kept: 0,
			conflicts_superseded: 0,
			skipped: Vec::new(),
			failures: Vec::new(),
			cursor,
			committed: false,
			cancelled: false,
			duration: Duration::ZERO,
		}
	}

	/// Writes performed on either side
	pub fn writes(&self) -> usize {
		self.pushed + self.pulled
	}
}

// ============================================================================
// CYCLE PLANNING
// ============================================================================

/// Remote side of one path as this cycle sees it
#[derive(Debug, Clone, PartialEq, Eq)]
enum RemoteState {
	/// Present in the delta; `None` content means deleted
	Fetched { content: Option<Vec<u8>>, hash: Option<ContentHash> },

	/// Absent from the delta; hash carried over from the file record
	Recorded(Option<ContentHash>),
}

impl RemoteState {
	fn hash(&self) -> Option<ContentHash> {
		match self {
			RemoteState::Fetched { hash, .. } => *hash,
			RemoteState::Recorded(hash) => *hash,
		}
	}
}

/// Everything needed to reconcile one path
#[derive(Debug, Clone)]
struct FileUnit {
	path: String,
	file_id: FileId,
	record: Option<FileRecord>,
	local: Option<Vec<u8>>,
	remote: RemoteState,
	triple: HashTriple,
	change: Change,
	action: Action,
}

#[derive(Debug, Default)]
struct CyclePlan {
	units: Vec<FileUnit>,
	skipped: Vec<SkippedFile>,
	failures: Vec<FileFailure>,

	/// Records of skipped paths: remote hash refreshes and ambiguity markers
	refresh: Vec<FileRecord>,
}

/// Build the per-path units of a cycle. Pure apart from id generation for
/// files first seen locally.
fn plan_cycle(
	source: &SyncSource,
	pull: PullSet,
	records: &BTreeMap<String, FileRecord>,
	excludes: &GlobSet,
) -> CyclePlan {
	let mut out = CyclePlan::default();

	let mut local: BTreeMap<String, Result<Vec<u8>, String>> = BTreeMap::new();
	for entry in pull.local {
		let state = match entry.state {
			LocalState::Readable { content, hash } => {
				if ContentHash::of(&content) == hash {
					Ok(content)
				} else {
					Err(format!("content does not match reported hash {}", hash.short()))
				}
			}
			LocalState::Unreadable { reason } => Err(reason),
		};
		local.insert(entry.relative_path, state);
	}

	// Latest change per remote file, grouped by path
	let mut latest: HashMap<FileId, RemoteChange> = HashMap::new();
	for change in pull.remote.changes {
		latest.insert(change.file_id.clone(), change);
	}
	let delta_ids: HashSet<FileId> = latest.keys().cloned().collect();
	let mut by_path: BTreeMap<String, Vec<RemoteChange>> = BTreeMap::new();
	for change in latest.into_values() {
		by_path.entry(change.relative_path.clone()).or_default().push(change);
	}
	let mut unreadable: BTreeMap<String, String> =
		pull.remote.failures.into_iter().map(|f| (f.relative_path, f.reason)).collect();

	let paths: BTreeSet<String> = local
		.keys()
		.chain(by_path.keys())
		.chain(records.keys())
		.chain(unreadable.keys())
		.cloned()
		.collect();

	for path in paths {
		if let Err(e) = validate_relative_path(&path) {
			out.skipped.push(SkippedFile { path, reason: SkipReason::InvalidPath(e.to_string()) });
			continue;
		}
		if excludes.is_match(&path) {
			out.skipped.push(SkippedFile { path, reason: SkipReason::Excluded });
			continue;
		}

		if let Some(reason) = unreadable.remove(&path) {
			out.failures.push(FileFailure { path, error: format!("remote entry unreadable: {}", reason) });
			continue;
		}

		let record = records.get(&path).cloned();
		let changes = by_path.remove(&path).unwrap_or_default();

		// Remote files on this path: live delta entries, plus earlier
		// claimants the delta left untouched
		let mut claimants: BTreeMap<FileId, Option<ContentHash>> = BTreeMap::new();
		if let Some(r) = &record {
			if r.claimants.is_empty() {
				if r.remote_hash.is_some() && !delta_ids.contains(&r.file_id) {
					claimants.insert(r.file_id.clone(), r.remote_hash);
				}
			} else {
				for claim in r.claimants.iter().filter(|c| !delta_ids.contains(&c.file_id)) {
					claimants.insert(claim.file_id.clone(), claim.hash);
				}
			}
		}
		for change in changes.iter().filter(|c| c.content.is_some()) {
			claimants.insert(change.file_id.clone(), change.hash);
		}

		if claimants.len() > 1 {
			let claims: Vec<PathClaim> =
				claimants.into_iter().map(|(file_id, hash)| PathClaim { file_id, hash }).collect();
			let ids = claims.iter().map(|c| c.file_id.to_string()).collect();

			// Remember the claimants so later cycles skip the path without the delta
			if record.as_ref().map_or(true, |r| r.claimants != claims) {
				let marker = match &record {
					Some(r) => FileRecord { claimants: claims, updated_at: now_secs(), ..r.clone() },
					None => FileRecord {
						file_id: claims[0].file_id.clone(),
						relative_path: path.clone(),
						base_hash: None,
						remote_hash: None,
						claimants: claims,
						updated_at: now_secs(),
					},
				};
				out.refresh.push(marker);
			}
			out.skipped.push(SkippedFile { path, reason: SkipReason::Ambiguous(ids) });
			continue;
		}

		let (file_id, remote) = if let Some((id, hash)) = claimants.into_iter().next() {
			let remote = match changes.iter().find(|c| c.file_id == id && c.content.is_some()) {
				Some(change) => RemoteState::Fetched { content: change.content.clone(), hash: change.hash },
				None => RemoteState::Recorded(hash),
			};
			(id, remote)
		} else if let Some(change) = changes.first() {
			(change.file_id.clone(), RemoteState::Fetched { content: None, hash: None })
		} else if let Some(r) = &record {
			// The record's file moved to another path, or every claimant went away
			let remote = if delta_ids.contains(&r.file_id) || !r.claimants.is_empty() {
				RemoteState::Fetched { content: None, hash: None }
			} else {
				RemoteState::Recorded(r.remote_hash)
			};
			(r.file_id.clone(), remote)
		} else {
			(FileId::generate(), RemoteState::Recorded(None))
		};

		if let RemoteState::Fetched { content, hash } = &remote {
			if hash_opt(content.as_deref()) != *hash {
				out.failures.push(FileFailure {
					path,
					error: "remote content does not match reported hash".to_string(),
				});
				continue;
			}
		}

		let local_content = match local.remove(&path) {
			Some(Ok(content)) => Some(content),
			Some(Err(reason)) => {
				let err = SyncError::HashMismatchCorruption { path: path.clone(), message: reason.clone() };
				warn!("Skipping {}", err);

				// Keep the remote side current so the next readable scan classifies correctly
				let collapsed = record.as_ref().map_or(false, |r| !r.claimants.is_empty());
				if collapsed || matches!(remote, RemoteState::Fetched { .. }) {
					out.refresh.push(FileRecord {
						file_id: file_id.clone(),
						relative_path: path.clone(),
						base_hash: record.as_ref().and_then(|r| r.base_hash),
						remote_hash: remote.hash(),
						claimants: Vec::new(),
						updated_at: now_secs(),
					});
				}
				out.skipped.push(SkippedFile { path, reason: SkipReason::Corrupt(reason) });
				continue;
			}
			None => None,
		};

		let triple = HashTriple {
			base: record.as_ref().and_then(|r| r.base_hash),
			local: hash_opt(local_content.as_deref()),
			remote: remote.hash(),
		};
		let change = triple.classify();
		let action = plan(source.mode, change);

		out.units.push(FileUnit {
			path,
			file_id,
			record,
			local: local_content,
			remote,
			triple,
			change,
			action,
		});
	}

	out
}

/// Whether persisting `new` would change what is stored for the path
fn record_changed(old: Option<&FileRecord>, new: &FileRecord) -> bool {
	match old {
		Some(old) => {
			old.file_id != new.file_id
				|| old.base_hash != new.base_hash
				|| old.remote_hash != new.remote_hash
				|| old.claimants != new.claimants
		}
		None => new.base_hash.is_some() || new.remote_hash.is_some(),
	}
}

/// Conflict snapshot and refreshed file record for a divergent unit
fn divergent_update(
	source: &SyncSource,
	file_id: FileId,
	path: &str,
	triple: HashTriple,
	local: Option<Vec<u8>>,
	remote: Option<Vec<u8>>,
) -> Result<Pending, SyncError> {
	let new = NewConflict {
		source_id: source.id,
		file_id: file_id.clone(),
		relative_path: path.to_string(),
		base_hash: triple.base,
		local_content: local,
		remote_content: remote,
	};
	if !new.is_divergent() {
		return Err(
			ConnectorError::unavailable(format!("remote content of {} changed during the cycle", path)).into()
		);
	}

	let record = FileRecord {
		file_id,
		relative_path: path.to_string(),
		base_hash: triple.base,
		remote_hash: new.remote_hash(),
		claimants: Vec::new(),
		updated_at: now_secs(),
	};
	Ok(Pending::Conflict { new, record })
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

#[derive(Clone)]
struct SourceHandle {
	connector: Arc<dyn Connector>,

	/// Held for the duration of a cycle or a resolution
	cycle: Arc<AsyncMutex<()>>,
}

struct CycleContext<'a> {
	source: &'a SyncSource,
	connector: &'a dyn Connector,
	cancel: &'a CancelToken,

	/// Hashes of the open conflict on each path
	open_conflicts: HashMap<String, HashTriple>,

	/// Set once a fatal connector error paused the source
	halted: AtomicBool,
}

/// Store update a completed unit leaves behind
enum Pending {
	Nothing,
	File { record: FileRecord, close_open: bool },
	Conflict { new: NewConflict, record: FileRecord },
}

enum UnitResult {
	NotRun,

	/// `kept` marks a divergent file whose identical conflict is already open
	Done { path: String, action: Action, kept: bool, pending: Pending },
	Failed { path: String, error: SyncError },
}

/// Entry point for every sync and conflict operation
pub struct Orchestrator {
	store: Arc<Store>,
	resolver: Resolver,
	handles: RwLock<HashMap<SourceId, SourceHandle>>,
	max_parallel_files: usize,
	observer: Arc<dyn CycleObserver>,
}

impl Orchestrator {
	pub fn new(store: Arc<Store>) -> Self {
		Orchestrator {
			resolver: Resolver::new(store.clone()),
			store,
			handles: RwLock::new(HashMap::new()),
			max_parallel_files: DEFAULT_MAX_PARALLEL_FILES,
			observer: Arc::new(NoObserver),
		}
	}

	pub fn with_max_parallel_files(mut self, n: usize) -> Self {
		self.max_parallel_files = n.max(1);
		self
	}

	pub fn with_observer(mut self, observer: Arc<dyn CycleObserver>) -> Self {
		self.observer = observer;
		self
	}

	pub fn store(&self) -> &Arc<Store> {
		&self.store
	}

	fn emit(&self, event: CycleEvent) {
		self.observer.on_event(&event);
	}

	fn handle(&self, id: SourceId) -> Result<SourceHandle, SyncError> {
		let handles = self.handles.read().unwrap_or_else(|e| e.into_inner());
		handles.get(&id).cloned().ok_or(SyncError::ConnectorNotAttached { id })
	}

	fn load_source(&self, id: SourceId) -> Result<SyncSource, SyncError> {
		self.store.get_source(id)?.ok_or_else(|| SyncError::SourceNotFound { id: id.to_string() })
	}

	// --- Sources ---

	/// Persist a new source and bind its connector
	pub fn register_source(
		&self,
		mut source: SyncSource,
		connector: Arc<dyn Connector>,
	) -> Result<SyncSource, SyncError> {
		if source.name.trim().is_empty() {
			return Err(ValidationError::ConfigError("Source name must not be empty".to_string()).into());
		}
		compile_excludes(&source.exclude)?;
		if self.store.list_sources()?.iter().any(|s| s.name == source.name) {
			return Err(ValidationError::ConfigError(format!(
				"A source named {:?} is already registered",
				source.name
			))
			.into());
		}

		source.connector = connector.kind().to_string();
		self.store.put_source(&source)?;
		self.attach(source.id, connector)?;
		info!("Registered source {} ({}, {})", source.name, source.id, source.mode);
		Ok(source)
	}

	/// Bind a connector to an already persisted source
	pub fn attach(&self, id: SourceId, connector: Arc<dyn Connector>) -> Result<(), SyncError> {
		self.load_source(id)?;
		let mut handles = self.handles.write().unwrap_or_else(|e| e.into_inner());
		let cycle = handles.get(&id).map(|h| h.cycle.clone()).unwrap_or_default();
		handles.insert(id, SourceHandle { connector, cycle });
		Ok(())
	}

	pub fn source(&self, id: SourceId) -> Result<SyncSource, SyncError> {
		self.load_source(id)
	}

	pub fn list_sources(&self) -> Result<Vec<SyncSource>, SyncError> {
		Ok(self.store.list_sources()?)
	}

	pub fn pause_source(&self, id: SourceId, reason: Option<String>) -> Result<SyncSource, SyncError> {
		let source = self
			.store
			.set_status(id, SourceStatus::Paused, reason)?
			.ok_or_else(|| SyncError::SourceNotFound { id: id.to_string() })?;
		info!("Paused source {}", source.name);
		Ok(source)
	}

	pub fn resume_source(&self, id: SourceId) -> Result<SyncSource, SyncError> {
		let source = self
			.store
			.set_status(id, SourceStatus::Active, None)?
			.ok_or_else(|| SyncError::SourceNotFound { id: id.to_string() })?;
		info!("Resumed source {}", source.name);
		Ok(source)
	}

	fn pause_on_fatal(&self, source: &SyncSource, error: &ConnectorError) {
		error!("Pausing source {}: {}", source.name, error);
		if let Err(e) = self.store.set_status(source.id, SourceStatus::Paused, Some(error.to_string())) {
			error!("Failed to pause source {}: {}", source.name, e);
		}
	}

	// --- Cycles ---

	/// Run one reconciliation cycle for a source
	pub async fn run_cycle(&self, id: SourceId, cancel: &CancelToken) -> Result<CycleReport, SyncError> {
		let source = self.load_source(id)?;
		if !source.is_active() {
			return Err(SyncError::SourcePaused { id, reason: source.pause_reason });
		}
		let handle = self.handle(id)?;
		let _cycle = handle.cycle.try_lock().map_err(|_| SyncError::CycleInProgress { id })?;
		if cancel.is_cancelled() {
			return Err(SyncError::Cancelled);
		}

		// Re-read under the lock; a resolution may have paused the source
		let source = self.load_source(id)?;
		if !source.is_active() {
			return Err(SyncError::SourcePaused { id, reason: source.pause_reason });
		}

		let started = Instant::now();
		let mut report = self.cycle(&source, handle.connector.as_ref(), cancel).await?;
		report.duration = started.elapsed();

		info!(
			"Cycle for {} done in {:?}: {} pushed, {} pulled, {} converged, {} new conflicts, {} failed{}",
			source.name,
			report.duration,
			report.pushed,
			report.pulled,
			report.converged,
			report.conflicts_created,
			report.failures.len(),
			if report.committed { "" } else { " (cursor held)" }
		);
		Ok(report)
	}

	async fn cycle(
		&self,
		source: &SyncSource,
		connector: &dyn Connector,
		cancel: &CancelToken,
	) -> Result<CycleReport, SyncError> {
		let mut report = CycleReport::new(source.id, source.cursor);
		let excludes = compile_excludes(&source.exclude)?;

		info!("Starting cycle for {} from cursor {}", source.name, source.cursor);
		self.emit(CycleEvent::Phase { source: source.id, phase: CyclePhase::Pull });

		let pull = match connector.pull(source, source.cursor).await {
			Ok(pull) => pull,
			Err(e) => {
				if e.is_fatal() {
					self.pause_on_fatal(source, &e);
				} else {
					warn!("Pull for {} failed: {}", source.name, e);
				}
				return Err(e.into());
			}
		};

		report.scanned = pull.local.len();
		report.remote_changes = pull.remote.changes.len();
		let pulled_cursor = pull.remote.cursor;
		self.emit(CycleEvent::Pulled {
			source: source.id,
			local_files: report.scanned,
			remote_changes: report.remote_changes,
		});

		let records = self.store.load_files(source.id)?;
		let open_conflicts: HashMap<String, HashTriple> = self
			.store
			.list_conflicts(source.id, Some(ConflictStatus::Open))?
			.into_iter()
			.map(|c| (c.relative_path.clone(), c.hashes()))
			.collect();

		let CyclePlan { units, skipped, failures, refresh } = plan_cycle(source, pull, &records, &excludes);

		for skip in &skipped {
			debug!("Skipping {}: {}", skip.path, skip.reason);
			self.emit(CycleEvent::Skipped {
				source: source.id,
				path: skip.path.clone(),
				reason: skip.reason.clone(),
			});
		}
		for failure in &failures {
			warn!("File {} failed: {}", failure.path, failure.error);
			self.emit(CycleEvent::Failed {
				source: source.id,
				path: failure.path.clone(),
				error: failure.error.clone(),
			});
		}
		report.skipped = skipped;
		report.failures = failures;

		self.emit(CycleEvent::Phase { source: source.id, phase: CyclePhase::Reconcile });
		let ctx = CycleContext { source, connector, cancel, open_conflicts, halted: AtomicBool::new(false) };
		let results: Vec<UnitResult> = stream::iter(units)
			.map(|unit| self.run_unit(&ctx, unit))
			.buffer_unordered(self.max_parallel_files)
			.collect()
			.await;

		report.cancelled = cancel.is_cancelled();
		let mut fatal = None;
		let mut pending = Vec::new();
		for result in results {
			match result {
				UnitResult::NotRun => {}
				UnitResult::Done { path, action, kept, pending: update } => {
					match action {
						Action::Skip => report.unchanged += 1,
						Action::PushLocal => report.pushed += 1,
						Action::PullRemote => report.pulled += 1,
						Action::Converge => report.converged += 1,
						Action::Ignore => report.ignored += 1,
						Action::RecordConflict => {}
					}
					if kept {
						report.conflicts_kept += 1;
					}
					pending.push((path, update));
				}
				UnitResult::Failed { path, error } => {
					if let SyncError::Connector(e) = &error {
						if e.is_fatal() && fatal.is_none() {
							fatal = Some(e.clone());
						}
					}
					report.failures.push(FileFailure { path, error: error.to_string() });
				}
			}
		}

		// A cancelled cycle leaves every stored base as it was
		if report.cancelled {
			let dropped = pending.iter().filter(|(_, p)| !matches!(p, Pending::Nothing)).count();
			info!("Cycle for {} cancelled, {} base updates dropped", source.name, refresh.len() + dropped);
		} else {
			for record in &refresh {
				self.store.apply_file(source.id, record, false)?;
			}
			for (path, update) in pending {
				self.persist(source, path, update, &mut report)?;
			}
		}

		if let Some(e) = fatal {
			return Err(SyncError::Connector(e));
		}
		if !report.cancelled && report.failures.is_empty() {
			self.emit(CycleEvent::Phase { source: source.id, phase: CyclePhase::Commit });
			if let Some(updated) = self.store.commit_cursor(source.id, pulled_cursor)? {
				report.cursor = updated.cursor;
				report.committed = true;
			}
		}

		self.emit(CycleEvent::Finished { source: source.id, committed: report.committed, cursor: report.cursor });
		Ok(report)
	}

	async fn run_unit(&self, ctx: &CycleContext<'_>, unit: FileUnit) -> UnitResult {
		if ctx.cancel.is_cancelled() || ctx.halted.load(Ordering::SeqCst) {
			return UnitResult::NotRun;
		}

		let path = unit.path.clone();
		match self.apply_unit(ctx, unit).await {
			Ok(result) => result,
			Err(error) => {
				if let SyncError::Connector(e) = &error {
					if e.is_fatal() && !ctx.halted.swap(true, Ordering::SeqCst) {
						self.pause_on_fatal(ctx.source, e);
					}
				}
				if !ctx.halted.load(Ordering::SeqCst) {
					warn!("File {} failed: {}", path, error);
				}
				self.emit(CycleEvent::Failed {
					source: ctx.source.id,
					path: path.clone(),
					error: error.to_string(),
				});
				UnitResult::Failed { path, error }
			}
		}
	}

	/// Remote content for a unit, fetched when the delta did not carry it
	async fn remote_content(
		&self,
		ctx: &CycleContext<'_>,
		file: FileRef<'_>,
		remote: RemoteState,
	) -> Result<Option<Vec<u8>>, SyncError> {
		match remote {
			RemoteState::Fetched { content, .. } => Ok(content),
			RemoteState::Recorded(None) => Ok(None),
			RemoteState::Recorded(Some(_)) => Ok(ctx.connector.read_remote(ctx.source, file).await?),
		}
	}

	async fn apply_unit(&self, ctx: &CycleContext<'_>, unit: FileUnit) -> Result<UnitResult, SyncError> {
		let FileUnit { path, file_id, record, local, remote, triple, change, action } = unit;
		let source = ctx.source;
		let file = FileRef { file_id: &file_id, relative_path: &path };
		debug!("{}: {} -> {:?}", path, change, action);

		let updated = match action {
			Action::Skip | Action::Converge => FileRecord {
				file_id: file_id.clone(),
				relative_path: path.clone(),
				base_hash: triple.local,
				remote_hash: triple.remote,
				claimants: Vec::new(),
				updated_at: now_secs(),
			},
			Action::PushLocal => {
				let receipt = ctx.connector.push(source, file, local.as_deref()).await?;
				FileRecord {
					file_id: receipt.file_id,
					relative_path: path.clone(),
					base_hash: triple.local,
					remote_hash: triple.local,
					claimants: Vec::new(),
					updated_at: now_secs(),
				}
			}
			Action::PullRemote => {
				let content = self.remote_content(ctx, file, remote).await?;
				ctx.connector.write_local(source, &path, content.as_deref()).await?;
				let hash = hash_opt(content.as_deref());
				FileRecord {
					file_id: file_id.clone(),
					relative_path: path.clone(),
					base_hash: hash,
					remote_hash: hash,
					claimants: Vec::new(),
					updated_at: now_secs(),
				}
			}
			Action::Ignore => FileRecord {
				file_id: file_id.clone(),
				relative_path: path.clone(),
				base_hash: triple.base,
				remote_hash: triple.remote,
				claimants: Vec::new(),
				updated_at: now_secs(),
			},
			Action::RecordConflict => {
				let (kept, pending) = if ctx.open_conflicts.get(&path) == Some(&triple) {
					debug!("Conflict on {} still open", path);
					(true, Pending::Nothing)
				} else {
					let remote_content = self.remote_content(ctx, file, remote).await?;
					(false, divergent_update(source, file_id, &path, triple, local, remote_content)?)
				};
				self.emit(CycleEvent::File { source: source.id, path: path.clone(), change, action });
				return Ok(UnitResult::Done { path, action, kept, pending });
			}
		};

		let open = ctx.open_conflicts.contains_key(&path);
		let pending = if open || record_changed(record.as_ref(), &updated) {
			Pending::File { record: updated, close_open: open }
		} else {
			Pending::Nothing
		};

		self.emit(CycleEvent::File { source: source.id, path: path.clone(), change, action });
		Ok(UnitResult::Done { path, action, kept: false, pending })
	}

	/// Write one unit's update and account for the conflicts it opened or closed
	fn persist(
		&self,
		source: &SyncSource,
		path: String,
		update: Pending,
		report: &mut CycleReport,
	) -> Result<(), SyncError> {
		match update {
			Pending::Nothing => {}
			Pending::File { record, close_open } => {
				if let Some(id) = self.store.apply_file(source.id, &record, close_open)? {
					info!("Conflict {} on {} superseded", id, path);
					report.conflicts_superseded += 1;
					self.emit(CycleEvent::ConflictSuperseded { source: source.id, id, path });
				}
			}
			Pending::Conflict { new, record } => {
				let recorded = self.store.record_conflict(new, &record)?;
				if let Some(old) = recorded.superseded {
					report.conflicts_superseded += 1;
					self.emit(CycleEvent::ConflictSuperseded { source: source.id, id: old, path: path.clone() });
				}
				if recorded.created {
					info!("Conflict {} recorded for {}", recorded.record.id, path);
					report.conflicts_created += 1;
					self.emit(CycleEvent::ConflictRecorded { source: source.id, id: recorded.record.id, path });
				} else {
					debug!("Conflict {} on {} still open", recorded.record.id, path);
					report.conflicts_kept += 1;
				}
			}
		}
		Ok(())
	}

	/// Run a cycle for every active source concurrently. One source's failure
	/// never affects the others.
	pub async fn run_all(
		&self,
		cancel: &CancelToken,
	) -> Result<Vec<(SyncSource, Result<CycleReport, SyncError>)>, SyncError> {
		let sources: Vec<SyncSource> =
			self.store.list_sources()?.into_iter().filter(|s| s.is_active()).collect();
		let results = join_all(sources.iter().map(|s| self.run_cycle(s.id, cancel))).await;
		Ok(sources.into_iter().zip(results).collect())
	}

	// --- Conflicts ---

	pub fn list_conflicts(
		&self,
		source_id: SourceId,
		status: Option<ConflictStatus>,
	) -> Result<Vec<ConflictRecord>, SyncError> {
		self.load_source(source_id)?;
		Ok(self.store.list_conflicts(source_id, status)?)
	}

	pub fn conflict(&self, id: ConflictId) -> Result<ConflictRecord, SyncError> {
		Ok(self.store.get_conflict(id)?.ok_or(ConflictError::NotFound { id })?)
	}

	/// Line-level preview of a conflict's snapshots
	pub fn preview_conflict(&self, id: ConflictId) -> Result<ConflictPreview, SyncError> {
		Ok(self.conflict(id)?.preview())
	}

	/// Apply a resolution. Waits for a running cycle of the source to finish.
	pub async fn resolve_conflict(
		&self,
		id: ConflictId,
		resolution: Resolution,
	) -> Result<ResolveOutcome, SyncError> {
		let conflict = self.conflict(id)?;
		if !conflict.is_open() {
			return Ok(ResolveOutcome::AlreadyResolved(id));
		}

		let handle = self.handle(conflict.source_id)?;
		let _cycle = handle.cycle.lock().await;
		let source = self.load_source(conflict.source_id)?;
		if !source.is_active() {
			return Err(SyncError::SourcePaused { id: source.id, reason: source.pause_reason });
		}
		self.resolver.resolve(&source, handle.connector.as_ref(), id, resolution).await
	}
}


// vim: ts=4

//! Failure handling: connector errors, corrupt files, cancellation and
//! per-source isolation

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use cloudmirror::callbacks::{CycleEvent, CyclePhase, SkipReason};
use cloudmirror::connector::{
	Connector, ConnectorResult, FileRef, LocalEntry, MemoryConnector, PushReceipt, RemoteDelta,
};
use cloudmirror::error::{ConnectorError, SyncError};
use cloudmirror::store::Store;
use cloudmirror::sync::Orchestrator;
use cloudmirror::types::{Cursor, SourceStatus, SyncMode, SyncSource};
use cloudmirror::util::ContentHash;
use cloudmirror::utils::CancelToken;
use tempfile::TempDir;

const BASE: &[u8] = b"A\nB\nC";

fn orchestrator(dir: &TempDir) -> Orchestrator {
	let store = Arc::new(Store::open(&dir.path().join("state.redb")).unwrap());
	Orchestrator::new(store)
}

/// Register a seeded source and run the first cycle
async fn seeded(orch: &Orchestrator, name: &str) -> (SyncSource, Arc<MemoryConnector>) {
	let conn = Arc::new(MemoryConnector::new());
	conn.seed("a.txt", BASE);
	let source = orch
		.register_source(SyncSource::new(name, SyncMode::Bidirectional, "memory"), conn.clone())
		.unwrap();
	orch.run_cycle(source.id, &CancelToken::new()).await.unwrap();
	let source = orch.source(source.id).unwrap();
	(source, conn)
}

// ============================================================================
// Part 1: Connector failures
// ============================================================================

#[tokio::test]
async fn test_auth_expiry_on_pull_pauses_source() {
	let dir = TempDir::new().unwrap();
	let orch = orchestrator(&dir);
	let (source, conn) = seeded(&orch, "notes").await;
	conn.expire_auth();

	let err = orch.run_cycle(source.id, &CancelToken::new()).await.unwrap_err();
	assert!(matches!(err, SyncError::Connector(ConnectorError::AuthExpired { .. })));
	assert!(!err.is_transient());

	let paused = orch.source(source.id).unwrap();
	assert_eq!(paused.status, SourceStatus::Paused);
	assert!(paused.pause_reason.is_some());

	let err = orch.run_cycle(source.id, &CancelToken::new()).await.unwrap_err();
	assert!(matches!(err, SyncError::SourcePaused { .. }));

	conn.restore_auth();
	orch.resume_source(source.id).unwrap();
	assert!(orch.run_cycle(source.id, &CancelToken::new()).await.is_ok());
}

#[tokio::test]
async fn test_auth_expiry_on_push_pauses_source() {
	let dir = TempDir::new().unwrap();
	let orch = orchestrator(&dir);
	let (source, conn) = seeded(&orch, "notes").await;
	conn.set_local("a.txt", b"A\nX\nC");
	conn.fail_next_push(ConnectorError::auth_expired("token revoked"));

	let err = orch.run_cycle(source.id, &CancelToken::new()).await.unwrap_err();
	assert!(matches!(err, SyncError::Connector(ConnectorError::AuthExpired { .. })));

	let after = orch.source(source.id).unwrap();
	assert_eq!(after.status, SourceStatus::Paused);
	assert_eq!(after.cursor, source.cursor);

	let file = orch.store().get_file(source.id, "a.txt").unwrap().unwrap();
	assert_eq!(file.base_hash, Some(ContentHash::of(BASE)));
}

#[tokio::test]
async fn test_unavailable_remote_changes_nothing() {
	let dir = TempDir::new().unwrap();
	let orch = orchestrator(&dir);
	let (source, conn) = seeded(&orch, "notes").await;
	conn.set_remote("a.txt", b"A\nY\nC");
	conn.set_unavailable(true);
	let files = orch.store().load_files(source.id).unwrap();

	let err = orch.run_cycle(source.id, &CancelToken::new()).await.unwrap_err();
	assert!(err.is_transient());

	let after = orch.source(source.id).unwrap();
	assert_eq!(after.status, SourceStatus::Active);
	assert_eq!(after.cursor, source.cursor);
	assert_eq!(orch.store().load_files(source.id).unwrap(), files);

	// Back online, the same remote edit is picked up
	conn.set_unavailable(false);
	let report = orch.run_cycle(source.id, &CancelToken::new()).await.unwrap();
	assert_eq!(report.pulled, 1);
}

#[tokio::test]
async fn test_failed_push_holds_cursor_and_retries() {
	let dir = TempDir::new().unwrap();
	let orch = orchestrator(&dir);
	let (source, conn) = seeded(&orch, "notes").await;
	conn.set_local("a.txt", b"A\nX\nC");
	conn.set_remote("b.txt", b"remote");
	conn.fail_next_push(ConnectorError::unavailable("connection reset"));

	let report = orch.run_cycle(source.id, &CancelToken::new()).await.unwrap();
	assert_eq!(report.failures.len(), 1);
	assert_eq!(report.failures[0].path, "a.txt");
	assert_eq!(report.pulled, 1);
	assert!(!report.committed);
	assert_eq!(orch.source(source.id).unwrap().cursor, source.cursor);

	let retry = orch.run_cycle(source.id, &CancelToken::new()).await.unwrap();
	assert_eq!(retry.pushed, 1);
	assert_eq!(retry.pulled, 0);
	assert!(retry.committed);
	assert_eq!(conn.remote("a.txt"), Some(b"A\nX\nC".to_vec()));
}

// ============================================================================
// Part 2: Corrupt local files
// ============================================================================

#[tokio::test]
async fn test_corrupt_local_file_is_skipped() {
	let dir = TempDir::new().unwrap();
	let orch = orchestrator(&dir);
	let (source, conn) = seeded(&orch, "notes").await;
	conn.set_local_corrupt("a.txt", b"A\n\0\0", BASE);
	conn.set_remote("a.txt", b"A\nY\nC");
	let writes = conn.writes();

	let report = orch.run_cycle(source.id, &CancelToken::new()).await.unwrap();
	assert_eq!(report.skipped.len(), 1);
	assert!(matches!(report.skipped[0].reason, SkipReason::Corrupt(_)));
	assert_eq!(report.conflicts_created, 0);
	assert_eq!(conn.writes(), writes);

	let file = orch.store().get_file(source.id, "a.txt").unwrap().unwrap();
	assert_eq!(file.base_hash, Some(ContentHash::of(BASE)));
	assert_eq!(file.remote_hash, Some(ContentHash::of(b"A\nY\nC")));

	// Once readable again the remote edit still applies
	conn.set_local("a.txt", BASE);
	let report = orch.run_cycle(source.id, &CancelToken::new()).await.unwrap();
	assert_eq!(report.pulled, 1);
	assert_eq!(conn.local("a.txt"), Some(b"A\nY\nC".to_vec()));
}

#[tokio::test]
async fn test_unreadable_local_file_is_skipped() {
	let dir = TempDir::new().unwrap();
	let orch = orchestrator(&dir);
	let (source, conn) = seeded(&orch, "notes").await;
	conn.set_local_unreadable("a.txt", "permission denied");

	let report = orch.run_cycle(source.id, &CancelToken::new()).await.unwrap();
	assert_eq!(report.skipped.len(), 1);
	assert_eq!(report.skipped[0].reason, SkipReason::Corrupt("permission denied".to_string()));
	assert_eq!(report.writes(), 0);
	assert_eq!(conn.remote("a.txt"), Some(BASE.to_vec()));
}

#[tokio::test]
async fn test_unreadable_remote_file_fails_alone() {
	let dir = TempDir::new().unwrap();
	let orch = orchestrator(&dir);
	let (source, conn) = seeded(&orch, "notes").await;
	conn.set_remote("b.txt", b"remote b");
	conn.set_remote_unreadable("b.txt", "permission denied");
	conn.set_local("a.txt", b"A\nX\nC");

	let report = orch.run_cycle(source.id, &CancelToken::new()).await.unwrap();
	assert_eq!(report.pushed, 1);
	assert_eq!(report.failures.len(), 1);
	assert_eq!(report.failures[0].path, "b.txt");
	assert!(!report.committed);
	assert_eq!(conn.local("b.txt"), None);
	assert_eq!(conn.remote("a.txt"), Some(b"A\nX\nC".to_vec()));

	conn.clear_remote_unreadable("b.txt");
	let report = orch.run_cycle(source.id, &CancelToken::new()).await.unwrap();
	assert!(report.failures.is_empty());
	assert!(report.committed);
	assert_eq!(report.pulled, 1);
	assert_eq!(report.pushed, 0);
	assert_eq!(conn.local("b.txt"), Some(b"remote b".to_vec()));
}

// ============================================================================
// Part 3: Cancellation and concurrency
// ============================================================================

#[tokio::test]
async fn test_cancelled_before_start() {
	let dir = TempDir::new().unwrap();
	let orch = orchestrator(&dir);
	let (source, _conn) = seeded(&orch, "notes").await;

	let cancel = CancelToken::new();
	cancel.cancel();
	let err = orch.run_cycle(source.id, &cancel).await.unwrap_err();
	assert!(matches!(err, SyncError::Cancelled));
}

#[tokio::test]
async fn test_cancel_during_reconcile_skips_commit() {
	let dir = TempDir::new().unwrap();
	let cancel = CancelToken::new();
	let trigger = cancel.clone();
	let observer = move |event: &CycleEvent| {
		if matches!(event, CycleEvent::Phase { phase: CyclePhase::Reconcile, .. }) {
			trigger.cancel();
		}
	};
	let store = Arc::new(Store::open(&dir.path().join("state.redb")).unwrap());
	let orch = Orchestrator::new(store).with_observer(Arc::new(observer));

	let conn = Arc::new(MemoryConnector::new());
	conn.set_local("a.txt", b"local");
	conn.set_remote("b.txt", b"remote");
	let source = orch
		.register_source(SyncSource::new("notes", SyncMode::Bidirectional, "memory"), conn.clone())
		.unwrap();

	let report = orch.run_cycle(source.id, &cancel).await.unwrap();
	assert!(report.cancelled);
	assert!(!report.committed);
	assert_eq!(report.writes(), 0);
	assert_eq!(conn.writes().total(), 0);
	assert_eq!(orch.source(source.id).unwrap().cursor, Cursor::START);
}

#[tokio::test]
async fn test_cancel_mid_cycle_leaves_bases_unmodified() {
	let dir = TempDir::new().unwrap();
	let cancel = CancelToken::new();
	let trigger = cancel.clone();
	let observer = move |event: &CycleEvent| {
		if matches!(event, CycleEvent::File { .. }) {
			trigger.cancel();
		}
	};
	let store = Arc::new(Store::open(&dir.path().join("state.redb")).unwrap());
	let orch = Orchestrator::new(store).with_max_parallel_files(1).with_observer(Arc::new(observer));

	let conn = Arc::new(MemoryConnector::new());
	conn.set_local("a.txt", b"first");
	conn.set_local("b.txt", b"second");
	let source = orch
		.register_source(SyncSource::new("notes", SyncMode::Bidirectional, "memory"), conn.clone())
		.unwrap();

	let report = orch.run_cycle(source.id, &cancel).await.unwrap();
	assert!(report.cancelled);
	assert!(!report.committed);
	assert_eq!(report.pushed, 1);
	assert_eq!(conn.writes().remote, 1);
	assert!(orch.store().get_file(source.id, "a.txt").unwrap().is_none());
	assert!(orch.store().get_file(source.id, "b.txt").unwrap().is_none());
	assert_eq!(orch.source(source.id).unwrap().cursor, Cursor::START);

	// The file pushed before the cancel converges on the next run
	let report = orch.run_cycle(source.id, &CancelToken::new()).await.unwrap();
	assert!(!report.cancelled);
	assert!(report.committed);
	assert_eq!(report.converged, 1);
	assert_eq!(report.pushed, 1);
	assert!(orch.store().get_file(source.id, "a.txt").unwrap().is_some());
	assert!(orch.store().get_file(source.id, "b.txt").unwrap().is_some());
}

/// Memory connector whose first local scan waits until released
struct GatedConnector {
	inner: MemoryConnector,
	gated: AtomicBool,
	entered: Notify,
	release: Notify,
}

#[async_trait]
impl Connector for GatedConnector {
	fn kind(&self) -> &str {
		"gated"
	}

	async fn scan_local(&self, source: &SyncSource) -> ConnectorResult<Vec<LocalEntry>> {
		if self.gated.swap(false, Ordering::SeqCst) {
			self.entered.notify_one();
			self.release.notified().await;
		}
		self.inner.scan_local(source).await
	}

	async fn pull_remote(&self, source: &SyncSource, since: Cursor) -> ConnectorResult<RemoteDelta> {
		self.inner.pull_remote(source, since).await
	}

	async fn read_remote(&self, source: &SyncSource, file: FileRef<'_>) -> ConnectorResult<Option<Vec<u8>>> {
		self.inner.read_remote(source, file).await
	}

	async fn push(
		&self,
		source: &SyncSource,
		file: FileRef<'_>,
		content: Option<&[u8]>,
	) -> ConnectorResult<PushReceipt> {
		self.inner.push(source, file, content).await
	}

	async fn write_local(
		&self,
		source: &SyncSource,
		relative_path: &str,
		content: Option<&[u8]>,
	) -> ConnectorResult<()> {
		self.inner.write_local(source, relative_path, content).await
	}
}

#[tokio::test]
async fn test_overlapping_cycle_is_rejected() {
	let dir = TempDir::new().unwrap();
	let orch = Arc::new(orchestrator(&dir));
	let conn = Arc::new(GatedConnector {
		inner: MemoryConnector::new(),
		gated: AtomicBool::new(true),
		entered: Notify::new(),
		release: Notify::new(),
	});
	conn.inner.set_local("a.txt", b"local");
	let id = orch
		.register_source(SyncSource::new("notes", SyncMode::Bidirectional, "memory"), conn.clone())
		.unwrap()
		.id;

	let running = {
		let orch = orch.clone();
		tokio::spawn(async move { orch.run_cycle(id, &CancelToken::new()).await })
	};
	conn.entered.notified().await;

	let err = orch.run_cycle(id, &CancelToken::new()).await.unwrap_err();
	assert!(matches!(err, SyncError::CycleInProgress { .. }));

	conn.release.notify_one();
	let report = running.await.unwrap().unwrap();
	assert_eq!(report.pushed, 1);
	assert_eq!(orch.source(id).unwrap().connector, "gated");
}

// ============================================================================
// Part 4: Source isolation and lookup errors
// ============================================================================

#[tokio::test]
async fn test_run_all_isolates_sources() {
	let dir = TempDir::new().unwrap();
	let orch = orchestrator(&dir);
	let (healthy, healthy_conn) = seeded(&orch, "healthy").await;
	let (broken, broken_conn) = seeded(&orch, "broken").await;
	healthy_conn.set_local("a.txt", b"A\nX\nC");
	broken_conn.expire_auth();

	let results = orch.run_all(&CancelToken::new()).await.unwrap();
	assert_eq!(results.len(), 2);
	for (source, result) in results {
		if source.id == healthy.id {
			assert_eq!(result.unwrap().pushed, 1);
		} else {
			assert_eq!(source.id, broken.id);
			assert!(result.is_err());
		}
	}

	assert_eq!(orch.source(healthy.id).unwrap().status, SourceStatus::Active);
	assert_eq!(orch.source(broken.id).unwrap().status, SourceStatus::Paused);

	// Paused sources drop out of the next run
	let results = orch.run_all(&CancelToken::new()).await.unwrap();
	assert_eq!(results.len(), 1);
	assert_eq!(results[0].0.id, healthy.id);
}

#[tokio::test]
async fn test_manual_pause_blocks_cycles() {
	let dir = TempDir::new().unwrap();
	let orch = orchestrator(&dir);
	let (source, _conn) = seeded(&orch, "notes").await;

	orch.pause_source(source.id, Some("travelling".to_string())).unwrap();
	let err = orch.run_cycle(source.id, &CancelToken::new()).await.unwrap_err();
	match err {
		SyncError::SourcePaused { reason, .. } => assert_eq!(reason.as_deref(), Some("travelling")),
		other => panic!("unexpected error: {}", other),
	}
}

#[tokio::test]
async fn test_source_without_connector() {
	let dir = TempDir::new().unwrap();
	let orch = orchestrator(&dir);
	let source = SyncSource::new("orphan", SyncMode::Bidirectional, "memory");
	orch.store().put_source(&source).unwrap();

	let err = orch.run_cycle(source.id, &CancelToken::new()).await.unwrap_err();
	assert!(matches!(err, SyncError::ConnectorNotAttached { .. }));

	let err = orch.run_cycle(cloudmirror::SourceId::new(), &CancelToken::new()).await.unwrap_err();
	assert!(matches!(err, SyncError::SourceNotFound { .. }));
}

#[tokio::test]
async fn test_duplicate_source_name_is_rejected() {
	let dir = TempDir::new().unwrap();
	let orch = orchestrator(&dir);
	seeded(&orch, "notes").await;

	let again = SyncSource::new("notes", SyncMode::ImportOnly, "memory");
	assert!(orch.register_source(again, Arc::new(MemoryConnector::new())).is_err());

	let bad_glob = SyncSource::new("other", SyncMode::ImportOnly, "memory").with_exclude("a[");
	assert!(orch.register_source(bad_glob, Arc::new(MemoryConnector::new())).is_err());
}

// vim: ts=4

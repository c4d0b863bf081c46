//! End-to-end reconciliation scenarios against the in-memory connector
//!
//! Every test seeds both sides with the same content and runs a first cycle
//! to establish the base, then edits one or both sides and checks what the
//! next cycle does.

use std::sync::Arc;

use cloudmirror::callbacks::SkipReason;
use cloudmirror::conflict::{AppliedResolution, ConflictStatus, Resolution, ResolveOutcome};
use cloudmirror::connector::{Connector, FileRef, MemoryConnector};
use cloudmirror::store::Store;
use cloudmirror::sync::{CycleReport, Orchestrator};
use cloudmirror::types::{FileId, SyncMode, SyncSource};
use cloudmirror::util::ContentHash;
use cloudmirror::utils::CancelToken;
use tempfile::TempDir;

const BASE: &[u8] = b"A\nB\nC";

struct Harness {
	_dir: TempDir,
	orch: Orchestrator,
	conn: Arc<MemoryConnector>,
	source: SyncSource,
}

impl Harness {
	async fn new(mode: SyncMode) -> Self {
		let dir = TempDir::new().unwrap();
		let store = Arc::new(Store::open(&dir.path().join("state.redb")).unwrap());
		let orch = Orchestrator::new(store);
		let conn = Arc::new(MemoryConnector::new());
		conn.seed("a.txt", BASE);

		let source = orch.register_source(SyncSource::new("notes", mode, "memory"), conn.clone()).unwrap();
		let harness = Harness { _dir: dir, orch, conn, source };

		let first = harness.cycle().await;
		assert_eq!(first.converged, 1);
		assert_eq!(first.writes(), 0);
		harness
	}

	async fn cycle(&self) -> CycleReport {
		self.orch.run_cycle(self.source.id, &CancelToken::new()).await.unwrap()
	}

	fn base_of(&self, path: &str) -> Option<ContentHash> {
		self.orch.store().get_file(self.source.id, path).unwrap().and_then(|r| r.base_hash)
	}
}

// ============================================================================
// Part 1: Bidirectional scenarios
// ============================================================================

#[tokio::test]
async fn test_local_only_edit_is_pushed() {
	let h = Harness::new(SyncMode::Bidirectional).await;
	h.conn.set_local("a.txt", b"A\nX\nC");

	let report = h.cycle().await;
	assert_eq!(report.pushed, 1);
	assert_eq!(report.conflicts_created, 0);
	assert!(report.committed);
	assert_eq!(h.conn.remote("a.txt"), Some(b"A\nX\nC".to_vec()));
	assert_eq!(h.base_of("a.txt"), Some(ContentHash::of(b"A\nX\nC")));
}

#[tokio::test]
async fn test_remote_only_edit_is_pulled() {
	let h = Harness::new(SyncMode::Bidirectional).await;
	h.conn.set_remote("a.txt", b"A\nY\nC");

	let report = h.cycle().await;
	assert_eq!(report.pulled, 1);
	assert_eq!(h.conn.local("a.txt"), Some(b"A\nY\nC".to_vec()));
	assert_eq!(h.base_of("a.txt"), Some(ContentHash::of(b"A\nY\nC")));
}

#[tokio::test]
async fn test_divergent_edit_records_conflict() {
	let h = Harness::new(SyncMode::Bidirectional).await;
	h.conn.set_local("a.txt", b"A\nX\nC");
	h.conn.set_remote("a.txt", b"A\nY\nC");
	let writes = h.conn.writes();

	let report = h.cycle().await;
	assert_eq!(report.conflicts_created, 1);
	assert_eq!(h.conn.writes(), writes);

	// Neither side was touched and the base still points at the ancestor
	assert_eq!(h.conn.local("a.txt"), Some(b"A\nX\nC".to_vec()));
	assert_eq!(h.conn.remote("a.txt"), Some(b"A\nY\nC".to_vec()));
	assert_eq!(h.base_of("a.txt"), Some(ContentHash::of(BASE)));

	let conflicts = h.orch.list_conflicts(h.source.id, Some(ConflictStatus::Open)).unwrap();
	assert_eq!(conflicts.len(), 1);
	let conflict = &conflicts[0];
	assert_eq!(conflict.relative_path, "a.txt");
	assert_eq!(conflict.base_hash, Some(ContentHash::of(BASE)));
	assert_eq!(conflict.local_content.as_deref(), Some(&b"A\nX\nC"[..]));
	assert_eq!(conflict.remote_content.as_deref(), Some(&b"A\nY\nC"[..]));

	let preview = h.orch.preview_conflict(conflict.id).unwrap();
	assert_eq!(preview.summary.different_lines, 1);
	assert_eq!(preview.lines[0].line_number, 2);
	assert_eq!(preview.lines[0].local.as_deref(), Some("X"));
	assert_eq!(preview.lines[0].remote.as_deref(), Some("Y"));
}

#[tokio::test]
async fn test_convergent_edit_writes_nothing() {
	let h = Harness::new(SyncMode::Bidirectional).await;
	h.conn.set_local("a.txt", b"A\nZ\nC");
	h.conn.set_remote("a.txt", b"A\nZ\nC");
	let writes = h.conn.writes();

	let report = h.cycle().await;
	assert_eq!(report.converged, 1);
	assert_eq!(report.conflicts_created, 0);
	assert_eq!(h.conn.writes(), writes);
	assert_eq!(h.base_of("a.txt"), Some(ContentHash::of(b"A\nZ\nC")));
}

#[tokio::test]
async fn test_new_files_on_each_side() {
	let h = Harness::new(SyncMode::Bidirectional).await;
	h.conn.set_local("drafts/local.md", b"written here");
	h.conn.set_remote("shared/remote.md", b"written there");

	let report = h.cycle().await;
	assert_eq!(report.pushed, 1);
	assert_eq!(report.pulled, 1);
	assert_eq!(h.conn.remote("drafts/local.md"), Some(b"written here".to_vec()));
	assert_eq!(h.conn.local("shared/remote.md"), Some(b"written there".to_vec()));
}

#[tokio::test]
async fn test_deletion_propagates() {
	let h = Harness::new(SyncMode::Bidirectional).await;
	h.conn.remove_local("a.txt");

	let report = h.cycle().await;
	assert_eq!(report.pushed, 1);
	assert_eq!(h.conn.remote("a.txt"), None);
	assert!(h.orch.store().get_file(h.source.id, "a.txt").unwrap().is_none());

	// Our own deletion comes back in the delta and changes nothing
	let again = h.cycle().await;
	assert_eq!(again.writes(), 0);
	assert_eq!(again.conflicts_created, 0);
}

#[tokio::test]
async fn test_edit_against_remote_deletion_is_a_conflict() {
	let h = Harness::new(SyncMode::Bidirectional).await;
	h.conn.set_local("a.txt", b"A\nX\nC");
	h.conn.remove_remote("a.txt");

	let report = h.cycle().await;
	assert_eq!(report.conflicts_created, 1);
	let conflict = &h.orch.list_conflicts(h.source.id, None).unwrap()[0];
	assert_eq!(conflict.remote_hash, None);
	assert_eq!(conflict.remote_content, None);
}

// ============================================================================
// Part 2: Idempotence
// ============================================================================

#[tokio::test]
async fn test_second_cycle_is_idle() {
	let h = Harness::new(SyncMode::Bidirectional).await;
	h.conn.set_local("a.txt", b"A\nX\nC");
	h.conn.set_remote("b.txt", b"new remote file");
	h.cycle().await;

	let writes = h.conn.writes();
	let report = h.cycle().await;
	assert_eq!(report.writes(), 0);
	assert_eq!(report.conflicts_created, 0);
	assert_eq!(h.conn.writes(), writes);
}

#[tokio::test]
async fn test_open_conflict_is_not_duplicated() {
	let h = Harness::new(SyncMode::Bidirectional).await;
	h.conn.set_local("a.txt", b"A\nX\nC");
	h.conn.set_remote("a.txt", b"A\nY\nC");
	h.cycle().await;

	let report = h.cycle().await;
	assert_eq!(report.conflicts_created, 0);
	assert_eq!(report.conflicts_kept, 1);
	assert_eq!(h.orch.list_conflicts(h.source.id, None).unwrap().len(), 1);
}

#[tokio::test]
async fn test_keep_local_then_cycle_is_idle() {
	let h = Harness::new(SyncMode::Bidirectional).await;
	h.conn.set_local("a.txt", b"A\nX\nC");
	h.conn.set_remote("a.txt", b"A\nY\nC");
	h.cycle().await;
	let id = h.orch.list_conflicts(h.source.id, Some(ConflictStatus::Open)).unwrap()[0].id;

	let outcome = h.orch.resolve_conflict(id, Resolution::KeepLocal).await.unwrap();
	assert!(outcome.is_resolved());
	assert_eq!(h.conn.remote("a.txt"), Some(b"A\nX\nC".to_vec()));

	let writes = h.conn.writes();
	let report = h.cycle().await;
	assert_eq!(report.writes(), 0);
	assert_eq!(report.conflicts_created, 0);
	assert_eq!(h.conn.writes(), writes);
	assert!(h.orch.list_conflicts(h.source.id, Some(ConflictStatus::Open)).unwrap().is_empty());
}

// ============================================================================
// Part 3: Supersession
// ============================================================================

#[tokio::test]
async fn test_converged_sides_supersede_open_conflict() {
	let h = Harness::new(SyncMode::Bidirectional).await;
	h.conn.set_local("a.txt", b"A\nX\nC");
	h.conn.set_remote("a.txt", b"A\nY\nC");
	h.cycle().await;
	let id = h.orch.list_conflicts(h.source.id, None).unwrap()[0].id;

	// The user copies the remote version by hand
	h.conn.set_local("a.txt", b"A\nY\nC");
	let report = h.cycle().await;
	assert_eq!(report.converged, 1);
	assert_eq!(report.conflicts_superseded, 1);

	let conflict = h.orch.conflict(id).unwrap();
	assert_eq!(conflict.status, ConflictStatus::Resolved);
	assert_eq!(conflict.resolution, Some(AppliedResolution::Superseded));

	// A superseded conflict can no longer be resolved
	let outcome = h.orch.resolve_conflict(id, Resolution::KeepLocal).await.unwrap();
	assert_eq!(outcome, ResolveOutcome::AlreadyResolved(id));
}

#[tokio::test]
async fn test_changed_divergence_replaces_conflict() {
	let h = Harness::new(SyncMode::Bidirectional).await;
	h.conn.set_local("a.txt", b"A\nX\nC");
	h.conn.set_remote("a.txt", b"A\nY\nC");
	h.cycle().await;
	let old = h.orch.list_conflicts(h.source.id, None).unwrap()[0].id;

	h.conn.set_local("a.txt", b"A\nW\nC");
	let report = h.cycle().await;
	assert_eq!(report.conflicts_created, 1);
	assert_eq!(report.conflicts_superseded, 1);

	let open = h.orch.list_conflicts(h.source.id, Some(ConflictStatus::Open)).unwrap();
	assert_eq!(open.len(), 1);
	assert_ne!(open[0].id, old);
	assert_eq!(open[0].local_content.as_deref(), Some(&b"A\nW\nC"[..]));
	assert_eq!(h.orch.conflict(old).unwrap().resolution, Some(AppliedResolution::Superseded));
}

// ============================================================================
// Part 4: Mode gating
// ============================================================================

#[tokio::test]
async fn test_local_to_cloud_ignores_remote_edits() {
	let h = Harness::new(SyncMode::LocalToCloud).await;
	h.conn.set_remote("a.txt", b"A\nY\nC");

	let report = h.cycle().await;
	assert_eq!(report.ignored, 1);
	assert_eq!(report.writes(), 0);
	assert_eq!(h.conn.local("a.txt"), Some(BASE.to_vec()));
	assert_eq!(h.base_of("a.txt"), Some(ContentHash::of(BASE)));
}

#[tokio::test]
async fn test_local_to_cloud_divergence_keeps_local() {
	let h = Harness::new(SyncMode::LocalToCloud).await;
	h.conn.set_local("a.txt", b"A\nX\nC");
	h.conn.set_remote("a.txt", b"A\nY\nC");

	let report = h.cycle().await;
	assert_eq!(report.pushed, 1);
	assert_eq!(report.conflicts_created, 0);
	assert_eq!(h.conn.remote("a.txt"), Some(b"A\nX\nC".to_vec()));
}

#[tokio::test]
async fn test_import_only_ignores_local_edits() {
	let h = Harness::new(SyncMode::ImportOnly).await;
	h.conn.set_local("a.txt", b"A\nX\nC");

	let report = h.cycle().await;
	assert_eq!(report.ignored, 1);
	assert_eq!(h.conn.remote("a.txt"), Some(BASE.to_vec()));
	assert_eq!(h.base_of("a.txt"), Some(ContentHash::of(BASE)));
}

#[tokio::test]
async fn test_import_only_divergence_takes_remote() {
	let h = Harness::new(SyncMode::ImportOnly).await;
	h.conn.set_local("a.txt", b"A\nX\nC");
	h.conn.set_remote("a.txt", b"A\nY\nC");

	let report = h.cycle().await;
	assert_eq!(report.pulled, 1);
	assert_eq!(report.conflicts_created, 0);
	assert_eq!(h.conn.local("a.txt"), Some(b"A\nY\nC".to_vec()));
}

// ============================================================================
// Part 5: Excludes
// ============================================================================

#[tokio::test]
async fn test_excluded_paths_are_left_alone() {
	let dir = TempDir::new().unwrap();
	let store = Arc::new(Store::open(&dir.path().join("state.redb")).unwrap());
	let orch = Orchestrator::new(store);
	let conn = Arc::new(MemoryConnector::new());
	conn.set_local("build/out.bin", b"artifact");
	conn.set_local("src/main.md", b"text");

	let source = SyncSource::new("project", SyncMode::Bidirectional, "memory").with_exclude("build/**");
	let source = orch.register_source(source, conn.clone()).unwrap();

	let report = orch.run_cycle(source.id, &CancelToken::new()).await.unwrap();
	assert_eq!(report.pushed, 1);
	assert_eq!(report.skipped.len(), 1);
	assert_eq!(report.skipped[0].path, "build/out.bin");
	assert_eq!(conn.remote("build/out.bin"), None);
	assert_eq!(conn.remote("src/main.md"), Some(b"text".to_vec()));
}

// ============================================================================
// Part 6: Ambiguous paths
// ============================================================================

#[tokio::test]
async fn test_ambiguous_path_does_not_hold_cursor() {
	let h = Harness::new(SyncMode::Bidirectional).await;
	let original = h.conn.remote_file_id("a.txt").unwrap();
	let second_doc = FileId::from("doc-b");
	h.conn
		.push(&h.source, FileRef { file_id: &second_doc, relative_path: "a.txt" }, Some(b"another document"))
		.await
		.unwrap();
	h.conn.set_remote("other.txt", b"unrelated");

	let first = h.cycle().await;
	assert!(first.committed);
	assert_eq!(first.pulled, 1);
	assert_eq!(first.skipped.len(), 1);
	assert!(matches!(first.skipped[0].reason, SkipReason::Ambiguous(_)));
	assert_eq!(h.conn.local("other.txt"), Some(b"unrelated".to_vec()));

	// Nothing is re-pulled; the stored claimants keep the path skipped
	let second = h.cycle().await;
	assert!(second.committed);
	assert_eq!(second.remote_changes, 0);
	assert_eq!(second.skipped.len(), 1);
	assert!(h.orch.source(h.source.id).unwrap().last_synced_at.is_some());
	assert_eq!(h.conn.local("a.txt"), Some(BASE.to_vec()));

	h.conn.remove_remote_id(&second_doc);
	let third = h.cycle().await;
	assert!(third.committed);
	assert!(third.skipped.is_empty());
	assert_eq!(third.writes(), 0);

	let record = h.orch.store().get_file(h.source.id, "a.txt").unwrap().unwrap();
	assert!(record.claimants.is_empty());
	assert_eq!(record.file_id, original);
	assert_eq!(h.base_of("a.txt"), Some(ContentHash::of(BASE)));
}

// vim: ts=4

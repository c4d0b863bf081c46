//! Three-way change classification
//!
//! Every tracked file is described by three hashes: the base (last common
//! ancestor this source reconciled to), the current local hash and the
//! current remote hash. [`classify`] maps the triple to exactly one
//! [`Change`]; [`plan`] combines the change with the source's [`SyncMode`]
//! into the [`Action`] the orchestrator executes.
//!
//! An absent file is `None` and compares like any other value, so a deletion
//! on one side is just another one-sided change.

use std::fmt;

use crate::types::SyncMode;
use crate::util::ContentHash;

/// Outcome of comparing base, local and remote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Change {
	/// Neither side moved since the base
	Unchanged,

	/// Only the local side moved
	LocalOnly,

	/// Only the remote side moved
	RemoteOnly,

	/// Both sides moved to the same content
	Convergent,

	/// Both sides moved to different content
	Divergent,
}

impl Change {
	pub fn label(&self) -> &'static str {
		match self {
			Change::Unchanged => "unchanged",
			Change::LocalOnly => "local-only",
			Change::RemoteOnly => "remote-only",
			Change::Convergent => "convergent",
			Change::Divergent => "divergent",
		}
	}
}

impl fmt::Display for Change {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.label())
	}
}

/// The three hashes describing one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashTriple {
	pub base: Option<ContentHash>,
	pub local: Option<ContentHash>,
	pub remote: Option<ContentHash>,
}

impl HashTriple {
	pub fn classify(&self) -> Change {
		classify(self.base.as_ref(), self.local.as_ref(), self.remote.as_ref())
	}
}

/// Classify a hash triple. Pure; does not depend on any other file.
pub fn classify<T: PartialEq>(base: T, local: T, remote: T) -> Change {
	match (base == local, base == remote, local == remote) {
		(true, true, _) => Change::Unchanged,
		(false, true, _) => Change::LocalOnly,
		(true, false, _) => Change::RemoteOnly,
		(false, false, true) => Change::Convergent,
		(false, false, false) => Change::Divergent,
	}
}

/// What the orchestrator does with a classified file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
	/// Nothing to do
	Skip,

	/// Write local content to remote; base <- local
	PushLocal,

	/// Write remote content to local; base <- remote
	PullRemote,

	/// Sides already agree; base <- local without writes
	Converge,

	/// Change not permitted by the mode; no writes, base untouched
	Ignore,

	/// Persist a conflict record for later resolution
	RecordConflict,
}

/// Map a change to an action under the given sync mode
pub fn plan(mode: SyncMode, change: Change) -> Action {
	use Action::*;

	match (mode, change) {
		(_, Change::Unchanged) => Skip,
		(_, Change::Convergent) => Converge,

		(SyncMode::Bidirectional, Change::LocalOnly) => PushLocal,
		(SyncMode::Bidirectional, Change::RemoteOnly) => PullRemote,
		(SyncMode::Bidirectional, Change::Divergent) => RecordConflict,

		// Local is authoritative: divergence resolves to keep_local
		(SyncMode::LocalToCloud, Change::LocalOnly) => PushLocal,
		(SyncMode::LocalToCloud, Change::Divergent) => PushLocal,
		(SyncMode::LocalToCloud, Change::RemoteOnly) => Ignore,

		// Remote is authoritative: local edits never travel
		(SyncMode::ImportOnly, Change::LocalOnly) => Ignore,
		(SyncMode::ImportOnly, Change::RemoteOnly) => PullRemote,
		(SyncMode::ImportOnly, Change::Divergent) => PullRemote,
	}
}


// vim: ts=4

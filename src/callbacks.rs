//! Observer hooks for sync cycle events

use std::fmt;

use crate::conflict::ConflictId;
use crate::detect::{Action, Change};
use crate::types::{Cursor, SourceId};

/// Stage of a running cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
	/// Local scan and remote delta fetch
	Pull,

	/// Per-file classification and propagation
	Reconcile,

	/// Cursor commit
	Commit,
}

impl fmt::Display for CyclePhase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			CyclePhase::Pull => write!(f, "pull"),
			CyclePhase::Reconcile => write!(f, "reconcile"),
			CyclePhase::Commit => write!(f, "commit"),
		}
	}
}

/// Why a file was left out of a cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
	/// Matches an exclude glob of the source
	Excluded,

	/// Local content unreadable or not matching its reported hash
	Corrupt(String),

	/// More than one remote file id claims the path
	Ambiguous(Vec<String>),

	/// Path is not a valid relative path
	InvalidPath(String),
}

impl fmt::Display for SkipReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SkipReason::Excluded => write!(f, "excluded"),
			SkipReason::Corrupt(message) => write!(f, "corrupt: {}", message),
			SkipReason::Ambiguous(ids) => write!(f, "ambiguous: claimed by {}", ids.join(", ")),
			SkipReason::InvalidPath(message) => write!(f, "invalid path: {}", message),
		}
	}
}

/// Event emitted while a cycle runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleEvent {
	Phase { source: SourceId, phase: CyclePhase },

	/// Local scan and remote delta are in
	Pulled { source: SourceId, local_files: usize, remote_changes: usize },

	/// A file was classified and its action carried out
	File { source: SourceId, path: String, change: Change, action: Action },

	Skipped { source: SourceId, path: String, reason: SkipReason },

	/// A file unit failed; the cycle goes on with the others
	Failed { source: SourceId, path: String, error: String },

	ConflictRecorded { source: SourceId, id: ConflictId, path: String },

	/// An open conflict was closed because the file no longer diverges
	ConflictSuperseded { source: SourceId, id: ConflictId, path: String },

	/// Cycle ended; `committed` tells whether the cursor moved to `cursor`
	Finished { source: SourceId, committed: bool, cursor: Cursor },
}

/// Receiver of cycle events
///
/// Implemented for any `Fn(&CycleEvent)` closure.
pub trait CycleObserver: Send + Sync {
	fn on_event(&self, event: &CycleEvent);
}

impl<F> CycleObserver for F
where
	F: Fn(&CycleEvent) + Send + Sync,
{
	fn on_event(&self, event: &CycleEvent) {
		self(event)
	}
}

/// Observer that drops every event
pub struct NoObserver;

impl CycleObserver for NoObserver {
	fn on_event(&self, _event: &CycleEvent) {}
}


// vim: ts=4

//! Conflict records and resolution requests

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::detect::HashTriple;
use crate::diff::{self, ConflictPreview};
use crate::error::ConflictError;
use crate::types::{FileId, SourceId};
use crate::util::{base64_opt, ContentHash};

pub mod resolver;

pub use resolver::{ResolveOutcome, Resolver};

/// Identity of a conflict record; assigned by the store, never reused
pub type ConflictId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
	Open,
	Resolved,
}

impl fmt::Display for ConflictStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConflictStatus::Open => write!(f, "open"),
			ConflictStatus::Resolved => write!(f, "resolved"),
		}
	}
}

/// How a resolved conflict was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppliedResolution {
	KeepLocal,
	KeepRemote,
	ManualMerge,

	/// A later cycle found the file no longer diverging
	Superseded,
}

impl fmt::Display for AppliedResolution {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			AppliedResolution::KeepLocal => write!(f, "keep_local"),
			AppliedResolution::KeepRemote => write!(f, "keep_remote"),
			AppliedResolution::ManualMerge => write!(f, "manual_merge"),
			AppliedResolution::Superseded => write!(f, "superseded"),
		}
	}
}

/// Persisted divergent conflict
///
/// Snapshots are taken at detection time and never updated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
	pub id: ConflictId,
	pub source_id: SourceId,
	pub file_id: FileId,
	pub relative_path: String,

	pub base_hash: Option<ContentHash>,
	pub local_hash: Option<ContentHash>,
	pub remote_hash: Option<ContentHash>,

	#[serde(with = "base64_opt", default)]
	pub local_content: Option<Vec<u8>>,
	#[serde(with = "base64_opt", default)]
	pub remote_content: Option<Vec<u8>>,

	pub status: ConflictStatus,
	pub created_at: u64,

	#[serde(default)]
	pub resolved_at: Option<u64>,
	#[serde(default)]
	pub resolution: Option<AppliedResolution>,
}

impl ConflictRecord {
	pub fn is_open(&self) -> bool {
		self.status == ConflictStatus::Open
	}

	pub fn hashes(&self) -> HashTriple {
		HashTriple { base: self.base_hash, local: self.local_hash, remote: self.remote_hash }
	}

	/// Line-level preview of the two snapshots
	pub fn preview(&self) -> ConflictPreview {
		diff::preview(
			self.local_content.as_deref().unwrap_or_default(),
			self.remote_content.as_deref().unwrap_or_default(),
		)
	}
}

/// Everything the orchestrator knows about a divergent file at detection time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConflict {
	pub source_id: SourceId,
	pub file_id: FileId,
	pub relative_path: String,
	pub base_hash: Option<ContentHash>,
	pub local_content: Option<Vec<u8>>,
	pub remote_content: Option<Vec<u8>>,
}

impl NewConflict {
	pub fn local_hash(&self) -> Option<ContentHash> {
		self.local_content.as_deref().map(ContentHash::of)
	}

	pub fn remote_hash(&self) -> Option<ContentHash> {
		self.remote_content.as_deref().map(ContentHash::of)
	}

	/// Whether the snapshots really diverge from the base and from each other
	pub fn is_divergent(&self) -> bool {
		let (local, remote) = (self.local_hash(), self.remote_hash());
		local != self.base_hash && remote != self.base_hash && local != remote
	}
}

/// Resolution kind as accepted from callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionKind {
	KeepLocal,
	KeepRemote,
	ManualMerge,
}

impl FromStr for ResolutionKind {
	type Err = ConflictError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_lowercase().replace('-', "_").as_str() {
			"keep_local" | "local" => Ok(Self::KeepLocal),
			"keep_remote" | "remote" => Ok(Self::KeepRemote),
			"manual_merge" | "manual" | "merge" => Ok(Self::ManualMerge),
			_ => Err(ConflictError::UnknownResolution { value: s.to_string() }),
		}
	}
}

impl fmt::Display for ResolutionKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::KeepLocal => write!(f, "keep_local"),
			Self::KeepRemote => write!(f, "keep_remote"),
			Self::ManualMerge => write!(f, "manual_merge"),
		}
	}
}

/// A resolution request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
	KeepLocal,
	KeepRemote,
	ManualMerge(Vec<u8>),
}

impl Resolution {
	/// Build from the caller form: kind plus optional resolved content.
	/// Content is required for, and only accepted with, `manual_merge`.
	pub fn from_parts(kind: ResolutionKind, content: Option<Vec<u8>>) -> Result<Self, ConflictError> {
		match (kind, content) {
			(ResolutionKind::ManualMerge, Some(content)) => Ok(Resolution::ManualMerge(content)),
			(ResolutionKind::ManualMerge, None) => Err(ConflictError::MissingContent),
			(kind, Some(_)) => Err(ConflictError::UnexpectedContent { resolution: kind.to_string() }),
			(ResolutionKind::KeepLocal, None) => Ok(Resolution::KeepLocal),
			(ResolutionKind::KeepRemote, None) => Ok(Resolution::KeepRemote),
		}
	}

	pub fn kind(&self) -> ResolutionKind {
		match self {
			Resolution::KeepLocal => ResolutionKind::KeepLocal,
			Resolution::KeepRemote => ResolutionKind::KeepRemote,
			Resolution::ManualMerge(_) => ResolutionKind::ManualMerge,
		}
	}

	pub fn applied(&self) -> AppliedResolution {
		match self {
			Resolution::KeepLocal => AppliedResolution::KeepLocal,
			Resolution::KeepRemote => AppliedResolution::KeepRemote,
			Resolution::ManualMerge(_) => AppliedResolution::ManualMerge,
		}
	}
}


// vim: ts=4

//! Core data model: sources, modes, cursors and per-file base tracking

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::util::{now_secs, ContentHash};

/// Identity of a sync source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(Uuid);

impl SourceId {
	pub fn new() -> Self {
		SourceId(Uuid::new_v4())
	}
}

impl Default for SourceId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for SourceId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

impl FromStr for SourceId {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Uuid::parse_str(s).map(SourceId).map_err(|e| format!("Invalid source id {:?}: {}", s, e))
	}
}

/// Remote-side identity of a file (document id in the cloud store)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub String);

impl FileId {
	/// Fresh id for a file first seen on the local side
	pub fn generate() -> Self {
		FileId(Uuid::new_v4().to_string())
	}
}

impl fmt::Display for FileId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for FileId {
	fn from(s: &str) -> Self {
		FileId(s.to_string())
	}
}

/// Opaque remote position marker; never moves backwards for a source
#[derive(
	Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Cursor(pub u64);

impl Cursor {
	pub const START: Cursor = Cursor(0);

	/// Advance to `other` if it is ahead
	pub fn advance(self, other: Cursor) -> Cursor {
		self.max(other)
	}
}

impl fmt::Display for Cursor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Direction(s) in which a source propagates changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
	/// Remote is authoritative; only remote to local propagation
	ImportOnly,

	/// Local is authoritative; divergence resolves to the local side
	LocalToCloud,

	/// Full three-way reconciliation with conflict records
	#[default]
	Bidirectional,
}

impl FromStr for SyncMode {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_lowercase().replace('-', "_").as_str() {
			"import_only" | "import" => Ok(Self::ImportOnly),
			"local_to_cloud" | "export" => Ok(Self::LocalToCloud),
			"bidirectional" | "both" => Ok(Self::Bidirectional),
			_ => Err(format!(
				"Unknown sync mode: {}. Valid options: import_only, local_to_cloud, bidirectional",
				s
			)),
		}
	}
}

impl fmt::Display for SyncMode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::ImportOnly => write!(f, "import_only"),
			Self::LocalToCloud => write!(f, "local_to_cloud"),
			Self::Bidirectional => write!(f, "bidirectional"),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
	#[default]
	Active,
	Paused,
}

impl fmt::Display for SourceStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Active => write!(f, "active"),
			Self::Paused => write!(f, "paused"),
		}
	}
}

/// A registered local <-> cloud pairing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSource {
	pub id: SourceId,
	pub name: String,
	pub mode: SyncMode,
	pub status: SourceStatus,

	/// Connector kind this source was registered with (e.g. "fs")
	pub connector: String,

	/// Connector-specific settings, interpreted by the connector itself
	#[serde(default)]
	pub settings: BTreeMap<String, String>,

	/// Glob patterns of relative paths never synced
	#[serde(default)]
	pub exclude: Vec<String>,

	pub cursor: Cursor,

	#[serde(default)]
	pub pause_reason: Option<String>,

	pub created_at: u64,
	pub updated_at: u64,

	#[serde(default)]
	pub last_synced_at: Option<u64>,
}

impl SyncSource {
	pub fn new(name: &str, mode: SyncMode, connector: &str) -> Self {
		let now = now_secs();
		SyncSource {
			id: SourceId::new(),
			name: name.to_string(),
			mode,
			status: SourceStatus::Active,
			connector: connector.to_string(),
			settings: BTreeMap::new(),
			exclude: Vec::new(),
			cursor: Cursor::START,
			pause_reason: None,
			created_at: now,
			updated_at: now,
			last_synced_at: None,
		}
	}

	pub fn with_setting(mut self, key: &str, value: &str) -> Self {
		self.settings.insert(key.to_string(), value.to_string());
		self
	}

	pub fn with_exclude(mut self, pattern: &str) -> Self {
		self.exclude.push(pattern.to_string());
		self
	}

	pub fn setting(&self, key: &str) -> Option<&str> {
		self.settings.get(key).map(|s| s.as_str())
	}

	pub fn is_active(&self) -> bool {
		self.status == SourceStatus::Active
	}
}

/// Base tracking for one file of a source, keyed by relative path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
	pub file_id: FileId,
	pub relative_path: String,

	/// Last common ancestor; `None` when the file did not exist at the last reconcile
	pub base_hash: Option<ContentHash>,

	/// Remote hash as last observed, used while the file is absent from remote deltas
	pub remote_hash: Option<ContentHash>,

	/// Remote files that claim this path at once. Non-empty only while the
	/// path is ambiguous; it is skipped until a single claimant remains.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub claimants: Vec<PathClaim>,

	pub updated_at: u64,
}

impl FileRecord {
	pub fn is_ambiguous(&self) -> bool {
		self.claimants.len() > 1
	}
}

/// One remote file seen at an ambiguous path, with its last observed hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathClaim {
	pub file_id: FileId,
	pub hash: Option<ContentHash>,
}


// vim: ts=4

//! Error types for cloudmirror operations

use std::error::Error;
use std::fmt;
use std::io;

use crate::types::SourceId;

/// Main error type for sync and resolution operations
#[derive(Debug)]
pub enum SyncError {
	/// No source with this id is registered
	SourceNotFound { id: String },

	/// Source is paused and refuses to run cycles
	SourcePaused { id: SourceId, reason: Option<String> },

	/// A cycle is already running for this source
	CycleInProgress { id: SourceId },

	/// Source exists in the store but no connector has been attached to it
	ConnectorNotAttached { id: SourceId },

	/// Local content is unreadable or does not match its reported hash
	HashMismatchCorruption { path: String, message: String },

	/// Cycle was cancelled before it completed
	Cancelled,

	/// Connector error (nested)
	Connector(ConnectorError),

	/// Store error (nested)
	Store(StoreError),

	/// Conflict error (nested)
	Conflict(ConflictError),

	/// Configuration error (nested)
	Config(ConfigError),

	/// Validation error (nested)
	Validation(crate::validation::ValidationError),

	/// I/O error
	Io(io::Error),

	/// Generic error message
	Other { message: String },
}

impl SyncError {
	/// Whether the error is transient and the operation may simply be retried later
	pub fn is_transient(&self) -> bool {
		match self {
			SyncError::Connector(e) => e.is_transient(),
			SyncError::Conflict(ConflictError::PropagationFailure { source, .. }) => {
				source.is_transient()
			}
			SyncError::CycleInProgress { .. } | SyncError::Cancelled => true,
			_ => false,
		}
	}
}

impl fmt::Display for SyncError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncError::SourceNotFound { id } => write!(f, "Sync source not found: {}", id),
			SyncError::SourcePaused { id, reason } => match reason {
				Some(reason) => write!(f, "Sync source {} is paused: {}", id, reason),
				None => write!(f, "Sync source {} is paused", id),
			},
			SyncError::CycleInProgress { id } => {
				write!(f, "A sync cycle is already running for source {}", id)
			}
			SyncError::ConnectorNotAttached { id } => {
				write!(f, "No connector attached to source {}", id)
			}
			SyncError::HashMismatchCorruption { path, message } => {
				write!(f, "Corrupt local content at {}: {}", path, message)
			}
			SyncError::Cancelled => write!(f, "Sync cycle cancelled"),
			SyncError::Connector(e) => write!(f, "Connector error: {}", e),
			SyncError::Store(e) => write!(f, "Store error: {}", e),
			SyncError::Conflict(e) => write!(f, "Conflict error: {}", e),
			SyncError::Config(e) => write!(f, "Configuration error: {}", e),
			SyncError::Validation(e) => write!(f, "Validation error: {}", e),
			SyncError::Io(e) => write!(f, "I/O error: {}", e),
			SyncError::Other { message } => write!(f, "{}", message),
		}
	}
}

impl Error for SyncError {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		match self {
			SyncError::Connector(e) => Some(e),
			SyncError::Store(e) => Some(e),
			SyncError::Conflict(e) => Some(e),
			SyncError::Config(e) => Some(e),
			SyncError::Validation(e) => Some(e),
			SyncError::Io(e) => Some(e),
			_ => None,
		}
	}
}

impl From<io::Error> for SyncError {
	fn from(e: io::Error) -> Self {
		SyncError::Io(e)
	}
}

impl From<String> for SyncError {
	fn from(e: String) -> Self {
		SyncError::Other { message: e }
	}
}

impl From<ConnectorError> for SyncError {
	fn from(e: ConnectorError) -> Self {
		SyncError::Connector(e)
	}
}

impl From<StoreError> for SyncError {
	fn from(e: StoreError) -> Self {
		SyncError::Store(e)
	}
}

impl From<ConflictError> for SyncError {
	fn from(e: ConflictError) -> Self {
		SyncError::Conflict(e)
	}
}

impl From<ConfigError> for SyncError {
	fn from(e: ConfigError) -> Self {
		SyncError::Config(e)
	}
}

impl From<crate::validation::ValidationError> for SyncError {
	fn from(e: crate::validation::ValidationError) -> Self {
		SyncError::Validation(e)
	}
}

/// Connector-specific errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorError {
	/// Remote or local side temporarily unreachable (network, I/O)
	Unavailable { message: String },

	/// Credentials are no longer valid; requires external reconfiguration
	AuthExpired { message: String },
}

impl ConnectorError {
	pub fn unavailable(message: impl Into<String>) -> Self {
		ConnectorError::Unavailable { message: message.into() }
	}

	pub fn auth_expired(message: impl Into<String>) -> Self {
		ConnectorError::AuthExpired { message: message.into() }
	}

	pub fn is_transient(&self) -> bool {
		matches!(self, ConnectorError::Unavailable { .. })
	}

	pub fn is_fatal(&self) -> bool {
		matches!(self, ConnectorError::AuthExpired { .. })
	}
}

impl fmt::Display for ConnectorError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConnectorError::Unavailable { message } => {
				write!(f, "Connector unavailable: {}", message)
			}
			ConnectorError::AuthExpired { message } => {
				write!(f, "Connector authorization expired: {}", message)
			}
		}
	}
}

impl Error for ConnectorError {}

impl From<io::Error> for ConnectorError {
	fn from(e: io::Error) -> Self {
		ConnectorError::Unavailable { message: e.to_string() }
	}
}

/// Persistent store errors
#[derive(Debug)]
pub enum StoreError {
	/// Underlying database failure
	Database(redb::Error),

	/// Record could not be encoded or decoded
	Serialization { message: String },

	/// Record is structurally invalid
	Corrupted { message: String },
}

impl fmt::Display for StoreError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			StoreError::Database(e) => write!(f, "Database error: {}", e),
			StoreError::Serialization { message } => {
				write!(f, "Record serialization failed: {}", message)
			}
			StoreError::Corrupted { message } => write!(f, "Store corrupted: {}", message),
		}
	}
}

impl Error for StoreError {}

impl From<redb::Error> for StoreError {
	fn from(e: redb::Error) -> Self {
		StoreError::Database(e)
	}
}

impl From<redb::DatabaseError> for StoreError {
	fn from(e: redb::DatabaseError) -> Self {
		StoreError::Database(e.into())
	}
}

impl From<redb::TransactionError> for StoreError {
	fn from(e: redb::TransactionError) -> Self {
		StoreError::Database(e.into())
	}
}

impl From<redb::TableError> for StoreError {
	fn from(e: redb::TableError) -> Self {
		StoreError::Database(e.into())
	}
}

impl From<redb::StorageError> for StoreError {
	fn from(e: redb::StorageError) -> Self {
		StoreError::Database(e.into())
	}
}

impl From<redb::CommitError> for StoreError {
	fn from(e: redb::CommitError) -> Self {
		StoreError::Database(e.into())
	}
}

impl From<serde_json::Error> for StoreError {
	fn from(e: serde_json::Error) -> Self {
		StoreError::Serialization { message: e.to_string() }
	}
}

/// Conflict resolution errors
#[derive(Debug)]
pub enum ConflictError {
	/// No conflict with this id
	NotFound { id: u64 },

	/// manual_merge was requested without resolved content
	MissingContent,

	/// Resolved content was supplied for a resolution that does not take it
	UnexpectedContent { resolution: String },

	/// Resolution kind not recognized
	UnknownResolution { value: String },

	/// One side could not be written; the conflict stays open
	PropagationFailure { id: u64, side: &'static str, source: ConnectorError },
}

impl fmt::Display for ConflictError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConflictError::NotFound { id } => write!(f, "Conflict {} not found", id),
			ConflictError::MissingContent => {
				write!(f, "manual_merge requires resolved content")
			}
			ConflictError::UnexpectedContent { resolution } => {
				write!(f, "Resolved content is only accepted for manual_merge, not {}", resolution)
			}
			ConflictError::UnknownResolution { value } => write!(
				f,
				"Unknown resolution: {}. Valid options: keep_local, keep_remote, manual_merge",
				value
			),
			ConflictError::PropagationFailure { id, side, source } => {
				write!(f, "Resolution of conflict {} failed writing {} side: {}", id, side, source)
			}
		}
	}
}

impl Error for ConflictError {}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
	/// Config file could not be read
	ReadFailed { path: String, source: io::Error },

	/// Config file could not be parsed
	ParseFailed { path: String, message: String },

	/// Environment variable holds an invalid value
	InvalidEnv { name: String, value: String },

	/// Configuration values failed validation
	Invalid(crate::validation::ValidationError),
}

impl fmt::Display for ConfigError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConfigError::ReadFailed { path, source } => {
				write!(f, "Failed to read config {}: {}", path, source)
			}
			ConfigError::ParseFailed { path, message } => {
				write!(f, "Failed to parse config {}: {}", path, message)
			}
			ConfigError::InvalidEnv { name, value } => {
				write!(f, "Invalid value for {}: {}", name, value)
			}
			ConfigError::Invalid(e) => write!(f, "{}", e),
		}
	}
}

impl Error for ConfigError {}

impl From<crate::validation::ValidationError> for ConfigError {
	fn from(e: crate::validation::ValidationError) -> Self {
		ConfigError::Invalid(e)
	}
}


// vim: ts=4

//! Configuration validation functions

use super::ValidationError;

/// Upper bound for concurrently processed files within one cycle
pub const MAX_PARALLEL_FILES: usize = 256;

/// Validate per-cycle file parallelism (1..=256)
pub fn validate_parallel_files(n: usize) -> Result<(), ValidationError> {
	if n == 0 {
		return Err(ValidationError::ConfigError(
			"maxParallelFiles must be at least 1".to_string(),
		));
	}
	if n > MAX_PARALLEL_FILES {
		return Err(ValidationError::ConfigError(format!(
			"maxParallelFiles must be at most {}, got {}",
			MAX_PARALLEL_FILES, n
		)));
	}
	Ok(())
}

/// Validate a tracing filter: a level name, or comma separated
/// `target=level` directives
pub fn validate_log_level(filter: &str) -> Result<(), ValidationError> {
	for directive in filter.split(',') {
		let level = directive.rsplit('=').next().unwrap_or(directive).trim();
		match level.to_lowercase().as_str() {
			"trace" | "debug" | "info" | "warn" | "error" | "off" => {}
			_ => {
				return Err(ValidationError::ConfigError(format!(
					"Unknown log level {:?}. Valid options: trace, debug, info, warn, error, off",
					level
				)))
			}
		}
	}
	Ok(())
}

/// Validate the database file name (a plain file name inside the data directory)
pub fn validate_database_file(name: &str) -> Result<(), ValidationError> {
	if name.is_empty() || name.contains('/') || name.contains('\\') || name == ".." {
		return Err(ValidationError::ConfigError(format!(
			"databaseFile must be a plain file name, got {:?}",
			name
		)));
	}
	Ok(())
}


// vim: ts=4

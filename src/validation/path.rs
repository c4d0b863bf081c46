//! Relative path and exclude pattern validation
//!
//! Relative paths are the stable per-source file key. They use `/` as the
//! separator on every platform and must stay inside the source root.

use globset::{Glob, GlobSet, GlobSetBuilder};

use super::ValidationError;

/// Validate a source-relative path
///
/// Rejects empty paths, absolute paths, backslashes, empty segments and
/// `.` / `..` segments.
pub fn validate_relative_path(path: &str) -> Result<(), ValidationError> {
	if path.is_empty() {
		return Err(ValidationError::PathError("Path is empty".to_string()));
	}
	if path.starts_with('/') {
		return Err(ValidationError::PathError(format!(
			"Path must be relative, got absolute path: {:?}",
			path
		)));
	}
	if path.contains('\\') {
		return Err(ValidationError::PathError(format!(
			"Path must use '/' separators: {:?}",
			path
		)));
	}
	for segment in path.split('/') {
		match segment {
			"" => {
				return Err(ValidationError::PathError(format!(
					"Path contains an empty segment: {:?}",
					path
				)))
			}
			"." | ".." => {
				return Err(ValidationError::PathError(format!(
					"Path contains a '{}' segment: {:?}",
					segment, path
				)))
			}
			_ => {}
		}
	}
	Ok(())
}

/// Compile exclude patterns into a matcher
pub fn compile_excludes(patterns: &[String]) -> Result<GlobSet, ValidationError> {
	let mut builder = GlobSetBuilder::new();
	for pattern in patterns {
		let glob = Glob::new(pattern).map_err(|e| {
			ValidationError::PatternError(format!("Invalid glob pattern {:?}: {}", pattern, e))
		})?;
		builder.add(glob);
	}
	builder
		.build()
		.map_err(|e| ValidationError::PatternError(format!("Cannot build exclude set: {}", e)))
}


// vim: ts=4

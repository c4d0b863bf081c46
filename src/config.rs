//! Configuration for cloudmirror
//!
//! The configuration follows a priority chain:
//! 1. Built-in defaults (Config::default())
//! 2. Config file (~/.cloudmirror/config.toml or config.json5, or --config)
//! 3. Environment variables (CLOUDMIRROR_* prefix)
//! 4. CLI flags (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::types::SyncMode;
use crate::validation::config::{validate_database_file, validate_log_level, validate_parallel_files};
use crate::validation::{ValidationError, Validator};

/// Config file names looked up in the data directory, in order
pub const CONFIG_FILES: [&str; 2] = ["config.toml", "config.json5"];

pub const ENV_DATA_DIR: &str = "CLOUDMIRROR_DATA_DIR";
pub const ENV_DATABASE_FILE: &str = "CLOUDMIRROR_DATABASE_FILE";
pub const ENV_LOG_LEVEL: &str = "CLOUDMIRROR_LOG_LEVEL";
pub const ENV_MAX_PARALLEL_FILES: &str = "CLOUDMIRROR_MAX_PARALLEL_FILES";
pub const ENV_PREVIEW_MAX_ROWS: &str = "CLOUDMIRROR_PREVIEW_MAX_ROWS";
pub const ENV_DEFAULT_MODE: &str = "CLOUDMIRROR_DEFAULT_MODE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
	// ========================================================================
	// STATE
	// ========================================================================
	/// Home directory for cloudmirror state (~/.cloudmirror)
	pub data_dir: PathBuf,

	/// Database file name inside `data_dir`
	pub database_file: String,

	// ========================================================================
	// LOGGING
	// ========================================================================
	/// Default log filter when RUST_LOG is not set
	pub log_level: String,

	// ========================================================================
	// SYNC BEHAVIOR
	// ========================================================================
	/// Concurrent file units per cycle
	pub max_parallel_files: usize,

	/// Rows shown by `preview`; 0 shows every differing line
	pub preview_max_rows: usize,

	/// Mode of newly registered sources when none is given
	pub default_mode: SyncMode,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			data_dir: std::env::var("HOME")
				.ok()
				.map(|h| PathBuf::from(h).join(".cloudmirror"))
				.unwrap_or_else(|| PathBuf::from(".cloudmirror")),
			database_file: "state.redb".to_string(),
			log_level: "info".to_string(),
			max_parallel_files: 8,
			preview_max_rows: 50,
			default_mode: SyncMode::Bidirectional,
		}
	}
}

impl Config {
	/// Defaults, then the config file, then `CLOUDMIRROR_*` variables.
	///
	/// An explicit `path` must exist. Otherwise the first of [`CONFIG_FILES`]
	/// found in the data directory is used, if any.
	pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
		Self::load_with(path, |name| std::env::var(name).ok())
	}

	/// [`Config::load`] with a custom environment lookup
	pub fn load_with<F>(path: Option<&Path>, env: F) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let mut data_dir = Config::default().data_dir;
		if let Some(dir) = env(ENV_DATA_DIR) {
			data_dir = PathBuf::from(dir);
		}

		let file = match path {
			Some(path) => Some(path.to_path_buf()),
			None => CONFIG_FILES.iter().map(|name| data_dir.join(name)).find(|p| p.is_file()),
		};

		let mut config = match file {
			Some(file) => Self::from_file(&file)?,
			None => Config { data_dir, ..Config::default() },
		};
		config.apply_env(env)?;
		Ok(config)
	}

	/// Parse a config file; `.json5` and `.json` files are JSON5, anything else TOML
	pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
		let display = path.display().to_string();
		let text = std::fs::read_to_string(path)
			.map_err(|e| ConfigError::ReadFailed { path: display.clone(), source: e })?;

		let is_json = matches!(path.extension().and_then(|e| e.to_str()), Some("json5") | Some("json"));
		if is_json {
			json5::from_str(&text)
				.map_err(|e| ConfigError::ParseFailed { path: display, message: e.to_string() })
		} else {
			toml::from_str(&text)
				.map_err(|e| ConfigError::ParseFailed { path: display, message: e.to_string() })
		}
	}

	fn apply_env<F>(&mut self, env: F) -> Result<(), ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		if let Some(value) = env(ENV_DATA_DIR) {
			self.data_dir = PathBuf::from(value);
		}
		if let Some(value) = env(ENV_DATABASE_FILE) {
			self.database_file = value;
		}
		if let Some(value) = env(ENV_LOG_LEVEL) {
			self.log_level = value;
		}
		if let Some(value) = env(ENV_MAX_PARALLEL_FILES) {
			self.max_parallel_files = parse_env(ENV_MAX_PARALLEL_FILES, &value)?;
		}
		if let Some(value) = env(ENV_PREVIEW_MAX_ROWS) {
			self.preview_max_rows = parse_env(ENV_PREVIEW_MAX_ROWS, &value)?;
		}
		if let Some(value) = env(ENV_DEFAULT_MODE) {
			self.default_mode = parse_env(ENV_DEFAULT_MODE, &value)?;
		}
		Ok(())
	}

	pub fn database_path(&self) -> PathBuf {
		self.data_dir.join(&self.database_file)
	}
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
	value
		.trim()
		.parse()
		.map_err(|_| ConfigError::InvalidEnv { name: name.to_string(), value: value.to_string() })
}

impl Validator for Config {
	fn validate(&self) -> Result<(), ValidationError> {
		validate_database_file(&self.database_file)?;
		validate_log_level(&self.log_level)?;
		validate_parallel_files(self.max_parallel_files)?;
		Ok(())
	}
}


// vim: ts=4

//! Filesystem connector
//!
//! Mirrors a local directory against a second directory that stands in for
//! the cloud document store. The remote cursor is the newest modification
//! time (nanoseconds since the epoch) observed on the remote tree; a delta
//! is every remote file modified after the cursor.
//!
//! Remote deletions are not reported in deltas, since a directory keeps no
//! change journal. Edits that keep an older modification time are missed
//! for the same reason.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::fs as afs;

use super::{
	Connector, ConnectorResult, FileRef, LocalEntry, PushReceipt, RemoteChange, RemoteDelta, RemoteFailure,
};
use crate::error::ConnectorError;
use crate::logging::*;
use crate::types::{Cursor, FileId, SyncSource};
use crate::validation::path::validate_relative_path;

/// Suffix of in-flight writes; never listed
const TMP_SUFFIX: &str = ".cloudmirror-tmp";

pub const LOCAL_ROOT: &str = "local_root";
pub const REMOTE_ROOT: &str = "remote_root";

/// Connector over two directory trees
#[derive(Debug, Clone)]
pub struct FsConnector {
	local_root: PathBuf,
	remote_root: PathBuf,
}

struct ScannedFile {
	relative_path: String,
	path: PathBuf,
	mtime_nanos: u64,
}

impl FsConnector {
	pub fn new(local_root: impl Into<PathBuf>, remote_root: impl Into<PathBuf>) -> Self {
		FsConnector { local_root: local_root.into(), remote_root: remote_root.into() }
	}

	/// Build from the settings stored on a source
	pub fn from_source(source: &SyncSource) -> Result<Self, String> {
		let local = source
			.setting(LOCAL_ROOT)
			.ok_or_else(|| format!("source {} has no {} setting", source.name, LOCAL_ROOT))?;
		let remote = source
			.setting(REMOTE_ROOT)
			.ok_or_else(|| format!("source {} has no {} setting", source.name, REMOTE_ROOT))?;
		Ok(Self::new(local, remote))
	}

	pub fn local_root(&self) -> &Path {
		&self.local_root
	}

	pub fn remote_root(&self) -> &Path {
		&self.remote_root
	}

	fn resolve(root: &Path, relative_path: &str) -> ConnectorResult<PathBuf> {
		validate_relative_path(relative_path)
			.map_err(|e| ConnectorError::unavailable(e.to_string()))?;
		Ok(relative_path.split('/').fold(root.to_path_buf(), |p, seg| p.join(seg)))
	}
}

fn mtime_nanos(meta: &std::fs::Metadata) -> u64 {
	meta.modified()
		.ok()
		.and_then(|t| t.duration_since(UNIX_EPOCH).ok())
		.map(|d| d.as_nanos() as u64)
		.unwrap_or(0)
}

/// Regular files of a tree, plus entries below the root that could not be listed
#[derive(Default)]
struct Walk {
	files: Vec<ScannedFile>,
	failures: Vec<(String, io::Error)>,
}

/// Walk a tree and list regular files with forward-slash relative paths.
/// Only a failure to list the root itself is an error.
async fn walk(root: &Path) -> io::Result<Walk> {
	let mut out = Walk::default();
	let mut stack = vec![(root.to_path_buf(), String::new())];

	while let Some((dir, prefix)) = stack.pop() {
		let mut entries = match afs::read_dir(&dir).await {
			Ok(entries) => entries,
			Err(e) if prefix.is_empty() => return Err(e),
			Err(e) => {
				out.failures.push((prefix, e));
				continue;
			}
		};

		loop {
			let entry = match entries.next_entry().await {
				Ok(Some(entry)) => entry,
				Ok(None) => break,
				Err(e) if prefix.is_empty() => return Err(e),
				Err(e) => {
					out.failures.push((prefix.clone(), e));
					break;
				}
			};
			let name = entry.file_name().to_string_lossy().to_string();
			if name.ends_with(TMP_SUFFIX) {
				continue;
			}
			let relative_path =
				if prefix.is_empty() { name.clone() } else { format!("{}/{}", prefix, name) };

			let meta = match entry.metadata().await {
				Ok(meta) => meta,
				Err(e) => {
					out.failures.push((relative_path, e));
					continue;
				}
			};
			if meta.is_dir() {
				stack.push((entry.path(), relative_path));
			} else if meta.is_file() {
				out.files.push(ScannedFile { relative_path, path: entry.path(), mtime_nanos: mtime_nanos(&meta) });
			}
		}
	}

	out.files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
	Ok(out)
}

/// Write through a temporary sibling and rename, or delete for `None`
async fn write_atomic(path: &Path, content: Option<&[u8]>) -> io::Result<()> {
	match content {
		Some(bytes) => {
			if let Some(parent) = path.parent() {
				afs::create_dir_all(parent).await?;
			}
			let mut tmp = path.as_os_str().to_owned();
			tmp.push(TMP_SUFFIX);
			let tmp = PathBuf::from(tmp);
			afs::write(&tmp, bytes).await?;
			afs::rename(&tmp, path).await
		}
		None => match afs::remove_file(path).await {
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
			other => other,
		},
	}
}

#[async_trait]
impl Connector for FsConnector {
	fn kind(&self) -> &str {
		"fs"
	}

	async fn scan_local(&self, _source: &SyncSource) -> ConnectorResult<Vec<LocalEntry>> {
		let Walk { files, failures } = walk(&self.local_root).await?;

		// A directory missing from the scan would read as every file in it deleted
		if let Some((path, e)) = failures.into_iter().next() {
			return Err(ConnectorError::unavailable(format!("cannot list local {}: {}", path, e)));
		}

		let mut entries = Vec::with_capacity(files.len());
		for file in files {
			match afs::read(&file.path).await {
				Ok(content) => entries.push(LocalEntry::readable(&file.relative_path, content)),
				Err(e) => {
					warn!("Cannot read local file {}: {}", file.path.display(), e);
					entries.push(LocalEntry::unreadable(&file.relative_path, e.to_string()));
				}
			}
		}

		Ok(entries)
	}

	async fn pull_remote(&self, _source: &SyncSource, since: Cursor) -> ConnectorResult<RemoteDelta> {
		let Walk { files, failures } = walk(&self.remote_root).await?;
		let mut cursor = since;
		let mut changes = Vec::new();
		let mut failures: Vec<RemoteFailure> = failures
			.into_iter()
			.map(|(relative_path, e)| {
				warn!("Cannot list remote entry {}: {}", relative_path, e);
				RemoteFailure { relative_path, reason: e.to_string() }
			})
			.collect();

		for file in files.into_iter().filter(|f| f.mtime_nanos > since.0) {
			match afs::read(&file.path).await {
				Ok(content) => {
					cursor = cursor.advance(Cursor(file.mtime_nanos));
					changes.push(RemoteChange::updated(
						FileId(file.relative_path.clone()),
						&file.relative_path,
						content,
					));
				}
				Err(e) => {
					warn!("Cannot read remote file {}: {}", file.path.display(), e);
					failures.push(RemoteFailure { relative_path: file.relative_path, reason: e.to_string() });
				}
			}
		}

		debug!("Remote delta since {}: {} changes, {} unreadable", since, changes.len(), failures.len());
		Ok(RemoteDelta { changes, failures, cursor })
	}

	async fn read_remote(&self, _source: &SyncSource, file: FileRef<'_>) -> ConnectorResult<Option<Vec<u8>>> {
		let path = Self::resolve(&self.remote_root, file.relative_path)?;
		match afs::read(&path).await {
			Ok(content) => Ok(Some(content)),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(e.into()),
		}
	}

	async fn push(
		&self,
		_source: &SyncSource,
		file: FileRef<'_>,
		content: Option<&[u8]>,
	) -> ConnectorResult<PushReceipt> {
		let path = Self::resolve(&self.remote_root, file.relative_path)?;
		write_atomic(&path, content).await?;

		let cursor = match afs::metadata(&path).await {
			Ok(meta) => Cursor(mtime_nanos(&meta)),
			Err(_) => Cursor(
				std::time::SystemTime::now()
					.duration_since(UNIX_EPOCH)
					.map(|d| d.as_nanos() as u64)
					.unwrap_or(0),
			),
		};
		// Remote files are identified by their path
		Ok(PushReceipt { file_id: FileId(file.relative_path.to_string()), cursor })
	}

	async fn write_local(
		&self,
		_source: &SyncSource,
		relative_path: &str,
		content: Option<&[u8]>,
	) -> ConnectorResult<()> {
		let path = Self::resolve(&self.local_root, relative_path)?;
		write_atomic(&path, content).await?;
		Ok(())
	}
}


// vim: ts=4

//! Line-level conflict preview
//!
//! Aligns local and remote text with a longest-common-subsequence match and
//! reports only the rows that differ. Runs of removed local lines and
//! inserted remote lines that sit between the same pair of matched lines are
//! paired up positionally, so a single edited line shows up as one row with
//! both sides filled in.
//!
//! The match table is quadratic in the differing middle of the two texts.
//! Past [`MAX_LCS_CELLS`] the middle is reported as one hunk and paired
//! positionally instead.

use serde::Serialize;

/// Largest match table built for one preview (16 MiB of `u32`)
pub const MAX_LCS_CELLS: usize = 4 * 1024 * 1024;

/// Aggregate line counts of a preview
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSummary {
	pub local_lines: usize,
	pub remote_lines: usize,
	pub different_lines: usize,
}

/// One differing row. `None` means the side has no line at this position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineDiff {
	/// 1-based local line number, or remote line number for remote-only rows
	pub line_number: usize,
	pub local: Option<String>,
	pub remote: Option<String>,
}

/// Ephemeral, computed on demand, never stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictPreview {
	pub summary: DiffSummary,
	pub lines: Vec<LineDiff>,
}

impl ConflictPreview {
	pub fn is_identical(&self) -> bool {
		self.summary.different_lines == 0
	}
}

/// Preview of two byte contents, decoded lossily as UTF-8
pub fn preview(local: &[u8], remote: &[u8]) -> ConflictPreview {
	preview_text(&String::from_utf8_lossy(local), &String::from_utf8_lossy(remote))
}

pub fn preview_text(local: &str, remote: &str) -> ConflictPreview {
	let a: Vec<&str> = local.lines().collect();
	let b: Vec<&str> = remote.lines().collect();

	let mut rows = Vec::new();
	for hunk in hunks(&a, &b) {
		push_hunk(&mut rows, &a, &b, &hunk);
	}

	ConflictPreview {
		summary: DiffSummary {
			local_lines: a.len(),
			remote_lines: b.len(),
			different_lines: rows.len(),
		},
		lines: rows,
	}
}

/// Unmatched local and remote line indices between two matched lines
#[derive(Debug, Default)]
struct Hunk {
	removed: Vec<usize>,
	inserted: Vec<usize>,
}

impl Hunk {
	fn is_empty(&self) -> bool {
		self.removed.is_empty() && self.inserted.is_empty()
	}
}

fn hunks(a: &[&str], b: &[&str]) -> Vec<Hunk> {
	// Common prefix and suffix never need the quadratic table
	let prefix = a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count();
	let suffix = a[prefix..]
		.iter()
		.rev()
		.zip(b[prefix..].iter().rev())
		.take_while(|(x, y)| x == y)
		.count();

	let a_mid = &a[prefix..a.len() - suffix];
	let b_mid = &b[prefix..b.len() - suffix];
	if a_mid.len().saturating_mul(b_mid.len()) > MAX_LCS_CELLS {
		return vec![Hunk {
			removed: (prefix..prefix + a_mid.len()).collect(),
			inserted: (prefix..prefix + b_mid.len()).collect(),
		}];
	}
	let table = lcs_table(a_mid, b_mid);

	let mut out = Vec::new();
	let mut current = Hunk::default();
	let (mut i, mut j) = (0, 0);

	while i < a_mid.len() && j < b_mid.len() {
		if a_mid[i] == b_mid[j] {
			if !current.is_empty() {
				out.push(std::mem::take(&mut current));
			}
			i += 1;
			j += 1;
		} else if table[i + 1][j] >= table[i][j + 1] {
			current.removed.push(prefix + i);
			i += 1;
		} else {
			current.inserted.push(prefix + j);
			j += 1;
		}
	}
	current.removed.extend((i..a_mid.len()).map(|k| prefix + k));
	current.inserted.extend((j..b_mid.len()).map(|k| prefix + k));
	if !current.is_empty() {
		out.push(current);
	}

	out
}

/// `table[i][j]` = LCS length of `a[i..]` and `b[j..]`
fn lcs_table(a: &[&str], b: &[&str]) -> Vec<Vec<u32>> {
	let mut table = vec![vec![0u32; b.len() + 1]; a.len() + 1];
	for i in (0..a.len()).rev() {
		for j in (0..b.len()).rev() {
			table[i][j] = if a[i] == b[j] {
				table[i + 1][j + 1] + 1
			} else {
				table[i + 1][j].max(table[i][j + 1])
			};
		}
	}
	table
}

fn push_hunk(rows: &mut Vec<LineDiff>, a: &[&str], b: &[&str], hunk: &Hunk) {
	let paired = hunk.removed.len().min(hunk.inserted.len());

	for k in 0..paired {
		let (li, ri) = (hunk.removed[k], hunk.inserted[k]);
		rows.push(LineDiff {
			line_number: li + 1,
			local: Some(a[li].to_string()),
			remote: Some(b[ri].to_string()),
		});
	}
	for &li in &hunk.removed[paired..] {
		rows.push(LineDiff { line_number: li + 1, local: Some(a[li].to_string()), remote: None });
	}
	for &ri in &hunk.inserted[paired..] {
		rows.push(LineDiff { line_number: ri + 1, local: None, remote: Some(b[ri].to_string()) });
	}
}


// vim: ts=4

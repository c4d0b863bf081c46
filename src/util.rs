use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// BLAKE3 digest of a file's bytes
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
	pub fn of(content: &[u8]) -> Self {
		ContentHash(*blake3::hash(content).as_bytes())
	}

	pub fn to_hex(&self) -> String {
		hex::encode(self.0)
	}

	/// First 12 hex digits, for log lines
	pub fn short(&self) -> String {
		hex::encode(&self.0[..6])
	}
}

impl fmt::Display for ContentHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.to_hex())
	}
}

impl fmt::Debug for ContentHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "ContentHash({})", self.short())
	}
}

impl FromStr for ContentHash {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let mut bytes = [0u8; 32];
		hex::decode_to_slice(s, &mut bytes)
			.map_err(|e| format!("Invalid content hash {:?}: {}", s, e))?;
		Ok(ContentHash(bytes))
	}
}

impl Serialize for ContentHash {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&self.to_hex())
	}
}

impl<'de> Deserialize<'de> for ContentHash {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		s.parse().map_err(serde::de::Error::custom)
	}
}

/// Hash of an optional content, `None` for an absent file
pub fn hash_opt(content: Option<&[u8]>) -> Option<ContentHash> {
	content.map(ContentHash::of)
}

/// Current unix time in seconds
pub fn now_secs() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Base64 (de)serialization of content snapshots
pub(crate) mod base64_opt {
	use base64::engine::general_purpose::STANDARD;
	use base64::Engine;
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
		match value {
			Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
			None => serializer.serialize_none(),
		}
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
		match Option::<String>::deserialize(deserializer)? {
			Some(s) => STANDARD.decode(s).map(Some).map_err(serde::de::Error::custom),
			None => Ok(None),
		}
	}
}


// vim: ts=4

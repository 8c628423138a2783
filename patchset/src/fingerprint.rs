//! Content fingerprints and in-memory file states.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Identity of one side of a file patch.
///
/// A missing file and an empty file are different states: creating an empty
/// file must be undoable back to "no file at all".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Fingerprint {
    /// The file does not exist
    Absent,
    /// The file exists with the given SHA-256 digest (lowercase hex) and length
    Present { digest: String, len: u64 },
}

impl Fingerprint {
    /// Fingerprint raw bytes
    pub fn of(bytes: &[u8]) -> Self {
        Fingerprint::Present {
            digest: hex::encode(Sha256::digest(bytes)),
            len: bytes.len() as u64,
        }
    }

    /// Hex digest for present content
    pub fn digest(&self) -> Option<&str> {
        match self {
            Fingerprint::Absent => None,
            Fingerprint::Present { digest, .. } => Some(digest),
        }
    }

    pub fn byte_len(&self) -> Option<u64> {
        match self {
            Fingerprint::Absent => None,
            Fingerprint::Present { len, .. } => Some(*len),
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Fingerprint::Absent)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fingerprint::Absent => write!(f, "absent"),
            Fingerprint::Present { digest, len } => {
                let short = digest.get(..12).unwrap_or(digest);
                write!(f, "sha256:{} ({} bytes)", short, len)
            }
        }
    }
}

/// Byte content of a file at one point in time
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FileState {
    #[default]
    Absent,
    Present(Vec<u8>),
}

impl FileState {
    pub fn fingerprint(&self) -> Fingerprint {
        match self {
            FileState::Absent => Fingerprint::Absent,
            FileState::Present(bytes) => Fingerprint::of(bytes),
        }
    }

    /// Content bytes; an absent file reads as empty
    pub fn bytes(&self) -> &[u8] {
        match self {
            FileState::Absent => &[],
            FileState::Present(bytes) => bytes,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, FileState::Absent)
    }

    /// Whether this content is what `fingerprint` describes
    pub fn matches(&self, fingerprint: &Fingerprint) -> bool {
        match (self, fingerprint) {
            (FileState::Absent, Fingerprint::Absent) => true,
            (FileState::Present(bytes), Fingerprint::Present { len, .. }) => {
                bytes.len() as u64 == *len && &self.fingerprint() == fingerprint
            }
            _ => false,
        }
    }
}

impl From<Vec<u8>> for FileState {
    fn from(bytes: Vec<u8>) -> Self {
        FileState::Present(bytes)
    }
}

impl From<&str> for FileState {
    fn from(text: &str) -> Self {
        FileState::Present(text.as_bytes().to_vec())
    }
}

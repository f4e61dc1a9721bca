use serde::{Deserialize, Serialize};
use std::fmt;

/// Project identifier as carried inside a key envelope (2 bytes, big-endian on the wire)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub u16);

impl ProjectId {
    pub fn to_be_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 2]) -> Self {
        Self(u16::from_be_bytes(bytes))
    }
}

impl From<u16> for ProjectId {
    fn from(id: u16) -> Self {
        Self(id)
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Plaintext digest used for end-to-end verification of a transfer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityAlgorithm {
    /// Unkeyed SHA-512 (default)
    #[default]
    Sha512,
    /// HMAC-SHA256 keyed from the file's key agreement
    HmacSha256,
}

impl IntegrityAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha512 => "sha512",
            Self::HmacSha256 => "hmac_sha256",
        }
    }

    /// Digest length in bytes
    pub fn digest_len(&self) -> usize {
        match self {
            Self::Sha512 => 64,
            Self::HmacSha256 => 32,
        }
    }
}

impl fmt::Display for IntegrityAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for IntegrityAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha512" => Ok(Self::Sha512),
            "hmac_sha256" => Ok(Self::HmacSha256),
            other => Err(format!(
                "unknown integrity algorithm '{other}' (expected sha512 or hmac_sha256)"
            )),
        }
    }
}

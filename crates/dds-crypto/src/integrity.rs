//! Streaming plaintext digests for end-to-end transfer verification
//!
//! Fed with the same chunk sequence as the stream cipher, so the digest costs
//! no extra pass over the file. Independent of the per-chunk Poly1305 tags.

use hmac::{Hmac, Mac};
use sha2::{Digest as _, Sha256, Sha512};

use crate::{CryptoError, IntegrityAlgorithm, Result, KEY_SIZE};

type HmacSha256 = Hmac<Sha256>;

/// A finished plaintext digest
#[derive(Clone, PartialEq, Eq)]
pub struct Digest {
    algorithm: IntegrityAlgorithm,
    bytes: Vec<u8>,
}

impl Digest {
    pub fn algorithm(&self) -> IntegrityAlgorithm {
        self.algorithm
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Lowercase hex
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    pub fn from_hex(algorithm: IntegrityAlgorithm, s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| CryptoError::Config(format!("digest hex: {e}")))?;
        if bytes.len() != algorithm.digest_len() {
            return Err(CryptoError::Config(format!(
                "{algorithm} digest must be {} bytes, got {}",
                algorithm.digest_len(),
                bytes.len()
            )));
        }
        Ok(Self { algorithm, bytes })
    }
}

impl std::fmt::Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.to_hex())
    }
}

/// Incremental hasher over plaintext chunks
pub enum IntegrityHasher {
    Sha512(Sha512),
    HmacSha256(HmacSha256),
}

impl IntegrityHasher {
    pub fn sha512() -> Self {
        Self::Sha512(Sha512::new())
    }

    pub fn hmac_sha256(key: &[u8; KEY_SIZE]) -> Result<Self> {
        let mac = <HmacSha256 as Mac>::new_from_slice(key)
            .map_err(|e| CryptoError::InvalidKey(format!("HMAC key: {e}")))?;
        Ok(Self::HmacSha256(mac))
    }

    pub fn update(&mut self, chunk: &[u8]) {
        match self {
            Self::Sha512(h) => h.update(chunk),
            Self::HmacSha256(m) => m.update(chunk),
        }
    }

    pub fn algorithm(&self) -> IntegrityAlgorithm {
        match self {
            Self::Sha512(_) => IntegrityAlgorithm::Sha512,
            Self::HmacSha256(_) => IntegrityAlgorithm::HmacSha256,
        }
    }

    /// Finish and compare against `expected`. The keyed variant compares in
    /// constant time.
    pub fn finalize_verified(self, expected: &Digest) -> Result<Digest> {
        if expected.algorithm != self.algorithm() {
            return Err(CryptoError::Config(format!(
                "expected digest uses {}, hasher computes {}",
                expected.algorithm,
                self.algorithm()
            )));
        }

        let (digest, matches) = match self {
            Self::Sha512(h) => {
                let digest = Self::Sha512(h).finalize();
                let matches = digest.bytes == expected.bytes;
                (digest, matches)
            }
            Self::HmacSha256(m) => {
                let check = m.clone();
                let digest = Self::HmacSha256(m).finalize();
                (digest, check.verify_slice(&expected.bytes).is_ok())
            }
        };

        if !matches {
            return Err(CryptoError::IntegrityMismatch {
                expected: expected.to_hex(),
                actual: digest.to_hex(),
            });
        }
        Ok(digest)
    }

    pub fn finalize(self) -> Digest {
        match self {
            Self::Sha512(h) => Digest {
                algorithm: IntegrityAlgorithm::Sha512,
                bytes: h.finalize().to_vec(),
            },
            Self::HmacSha256(m) => Digest {
                algorithm: IntegrityAlgorithm::HmacSha256,
                bytes: m.finalize().into_bytes().to_vec(),
            },
        }
    }
}

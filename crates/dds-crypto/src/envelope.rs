//! Length-prefixed private key envelope
//!
//! Decrypted layout, every length a big-endian u16:
//! ```text
//! [len][magic = "DelSys"][len][project id, 2 bytes BE][len][private key, 32 bytes]
//! ```
//! Exactly three fields, no optional parts, no trailing bytes. The envelope is
//! what the key store seals under the passphrase-derived key.

use zeroize::Zeroizing;

use crate::keys::PrivateKey;
use crate::{CryptoError, ProjectId, Result, KEY_SIZE};

pub const ENVELOPE_MAGIC: &[u8; 6] = b"DelSys";

const LEN_PREFIX: usize = 2;
const PROJECT_ID_LEN: usize = 2;

/// Encoded size of a well-formed envelope (46 bytes)
pub const ENVELOPE_LEN: usize =
    3 * LEN_PREFIX + ENVELOPE_MAGIC.len() + PROJECT_ID_LEN + KEY_SIZE;

/// A decoded envelope: which project the private key belongs to, and the key
#[derive(Debug)]
pub struct KeyEnvelope {
    pub project_id: ProjectId,
    pub private_key: PrivateKey,
}

impl KeyEnvelope {
    pub fn new(project_id: ProjectId, private_key: PrivateKey) -> Self {
        Self {
            project_id,
            private_key,
        }
    }

    /// Serialize. Pure: the same inputs always give the same bytes.
    pub fn encode(&self) -> Zeroizing<Vec<u8>> {
        encode(self.project_id, &self.private_key)
    }

    /// Strict left-to-right parse, without checking the project id.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Self::parse(bytes, None)
    }

    /// Parse and require the envelope to belong to `expected` project.
    pub fn decode_for(bytes: &[u8], expected: ProjectId) -> Result<Self> {
        Self::parse(bytes, Some(expected))
    }

    fn parse(bytes: &[u8], expected: Option<ProjectId>) -> Result<Self> {
        let mut reader = FieldReader { rest: bytes };

        let magic = reader.field()?;
        if magic != ENVELOPE_MAGIC {
            return Err(CryptoError::MagicMismatch);
        }

        let project_field = reader.field()?;
        let project_id = decode_project_id(project_field, expected)?;
        if let Some(expected) = expected {
            if project_id != expected {
                return Err(CryptoError::ProjectMismatch {
                    expected,
                    found: project_id,
                });
            }
        }

        let key_field = reader.field()?;
        if key_field.len() != KEY_SIZE {
            return Err(CryptoError::KeyLengthInvalid(key_field.len()));
        }

        if !reader.rest.is_empty() {
            return Err(CryptoError::TrailingBytes(reader.rest.len()));
        }

        Ok(Self {
            project_id,
            private_key: PrivateKey::from_slice(key_field)?,
        })
    }
}

/// Concatenate the three length-prefixed fields: magic, project id, private key.
pub fn encode(project_id: ProjectId, private_key: &PrivateKey) -> Zeroizing<Vec<u8>> {
    let mut out = Zeroizing::new(Vec::with_capacity(ENVELOPE_LEN));
    put_field(&mut out, ENVELOPE_MAGIC);
    put_field(&mut out, &project_id.to_be_bytes());
    put_field(&mut out, private_key.as_bytes());
    out
}

fn put_field(out: &mut Vec<u8>, field: &[u8]) {
    // Every field written here is a fixed size far below u16::MAX
    out.extend_from_slice(&(field.len() as u16).to_be_bytes());
    out.extend_from_slice(field);
}

/// A project id field must be exactly two bytes. Any other width cannot name
/// the expected project, so it is reported as a mismatch.
fn decode_project_id(field: &[u8], expected: Option<ProjectId>) -> Result<ProjectId> {
    match <[u8; PROJECT_ID_LEN]>::try_from(field) {
        Ok(arr) => Ok(ProjectId::from_be_bytes(arr)),
        Err(_) => {
            let found = field
                .iter()
                .fold(0u16, |acc, &b| acc.wrapping_shl(8) | u16::from(b));
            Err(CryptoError::ProjectMismatch {
                expected: expected.unwrap_or(ProjectId(found)),
                found: ProjectId(found),
            })
        }
    }
}

struct FieldReader<'a> {
    rest: &'a [u8],
}

impl<'a> FieldReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.rest.len() {
            return Err(CryptoError::Truncated {
                needed: n,
                remaining: self.rest.len(),
            });
        }
        let (head, tail) = self.rest.split_at(n);
        self.rest = tail;
        Ok(head)
    }

    fn field(&mut self) -> Result<&'a [u8]> {
        let len = self.take(LEN_PREFIX)?;
        let len = u16::from_be_bytes([len[0], len[1]]) as usize;
        self.take(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_key() -> PrivateKey {
        PrivateKey::from_bytes([0x5A; KEY_SIZE])
    }

    fn raw_envelope(magic: &[u8], project: &[u8], key: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        for field in [magic, project, key] {
            out.extend_from_slice(&(field.len() as u16).to_be_bytes());
            out.extend_from_slice(field);
        }
        out
    }

    #[test]
    fn layout_is_exact() {
        let bytes = encode(ProjectId(0x0102), &sample_key());

        assert_eq!(bytes.len(), ENVELOPE_LEN);
        assert_eq!(&bytes[..8], b"\x00\x06DelSys");
        assert_eq!(&bytes[8..12], &[0x00, 0x02, 0x01, 0x02]);
        assert_eq!(&bytes[12..14], &[0x00, 0x20]);
        assert_eq!(&bytes[14..], &[0x5A; KEY_SIZE]);
    }

    #[test]
    fn encode_is_pure() {
        let a = encode(ProjectId(7), &sample_key());
        let b = encode(ProjectId(7), &sample_key());
        assert_eq!(*a, *b);
    }

    #[test]
    fn decode_for_matching_project() {
        let bytes = encode(ProjectId(1), &sample_key());
        let env = KeyEnvelope::decode_for(&bytes, ProjectId(1)).unwrap();
        assert_eq!(env.project_id, ProjectId(1));
        assert_eq!(env.private_key.as_bytes(), sample_key().as_bytes());
    }

    #[test]
    fn wrong_magic() {
        let bytes = raw_envelope(b"DelSyX", &[0, 1], &[1u8; 32]);
        assert!(matches!(
            KeyEnvelope::decode(&bytes),
            Err(CryptoError::MagicMismatch)
        ));
    }

    #[test]
    fn wrong_magic_length() {
        let bytes = raw_envelope(b"DelSy", &[0, 1], &[1u8; 32]);
        assert!(matches!(
            KeyEnvelope::decode(&bytes),
            Err(CryptoError::MagicMismatch)
        ));
    }

    #[test]
    fn wrong_project() {
        let bytes = encode(ProjectId(1), &sample_key());
        let err = KeyEnvelope::decode_for(&bytes, ProjectId(2)).unwrap_err();
        assert!(matches!(
            err,
            CryptoError::ProjectMismatch {
                expected: ProjectId(2),
                found: ProjectId(1)
            }
        ));
    }

    #[test]
    fn project_field_wrong_width() {
        let bytes = raw_envelope(ENVELOPE_MAGIC, &[1], &[1u8; 32]);
        assert!(matches!(
            KeyEnvelope::decode_for(&bytes, ProjectId(1)),
            Err(CryptoError::ProjectMismatch { .. })
        ));
    }

    #[test]
    fn short_private_key() {
        let bytes = raw_envelope(ENVELOPE_MAGIC, &[0, 1], &[1u8; 31]);
        assert!(matches!(
            KeyEnvelope::decode(&bytes),
            Err(CryptoError::KeyLengthInvalid(31))
        ));
    }

    #[test]
    fn trailing_bytes() {
        let mut bytes = encode(ProjectId(1), &sample_key()).to_vec();
        bytes.extend_from_slice(&[0, 0, 0]);
        assert!(matches!(
            KeyEnvelope::decode(&bytes),
            Err(CryptoError::TrailingBytes(3))
        ));
    }

    #[test]
    fn length_claims_too_much() {
        let mut bytes = encode(ProjectId(1), &sample_key()).to_vec();
        // Private key length prefix claims 0x0021 = 33 bytes, 32 remain
        bytes[13] = 0x21;
        assert!(matches!(
            KeyEnvelope::decode(&bytes),
            Err(CryptoError::Truncated {
                needed: 33,
                remaining: 32
            })
        ));
    }

    #[test]
    fn truncated_length_prefix() {
        assert!(matches!(
            KeyEnvelope::decode(&[0x00]),
            Err(CryptoError::Truncated {
                needed: 2,
                remaining: 1
            })
        ));
        assert!(matches!(
            KeyEnvelope::decode(&[]),
            Err(CryptoError::Truncated { .. })
        ));
    }

    proptest! {
        #[test]
        fn envelope_roundtrip(pid in any::<u16>(), key in any::<[u8; 32]>()) {
            let bytes = encode(ProjectId(pid), &PrivateKey::from_bytes(key));
            let env = KeyEnvelope::decode(&bytes).unwrap();
            prop_assert_eq!(env.project_id, ProjectId(pid));
            prop_assert_eq!(env.private_key.as_bytes(), &key);
        }

        #[test]
        fn every_strict_prefix_is_rejected(cut in 0usize..ENVELOPE_LEN) {
            let bytes = encode(ProjectId(9), &sample_key());
            prop_assert!(KeyEnvelope::decode(&bytes[..cut]).is_err());
        }
    }
}

//! Key material: data keys, X25519 private/public keys

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroize;

use crate::{CryptoError, Result, KEY_SIZE};

/// A 256-bit chunk encryption key. Zeroized on drop.
///
/// Created by the key agreement for a single encrypt/decrypt run and never
/// persisted.
pub struct DataKey {
    bytes: [u8; KEY_SIZE],
}

impl DataKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for DataKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// An X25519 private scalar. Zeroized on drop.
pub struct PrivateKey {
    bytes: [u8; KEY_SIZE],
}

impl PrivateKey {
    /// Generate a new random private key
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        Self {
            bytes: secret.to_bytes(),
        }
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Create from a slice, rejecting anything that is not exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| CryptoError::KeyLengthInvalid(bytes.len()))?;
        Ok(Self { bytes: arr })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Derive the matching public key
    pub fn public_key(&self) -> PublicKey {
        let secret = StaticSecret::from(self.bytes);
        PublicKey {
            bytes: X25519Public::from(&secret).to_bytes(),
        }
    }

    pub(crate) fn to_static_secret(&self) -> StaticSecret {
        StaticSecret::from(self.bytes)
    }
}

impl Drop for PrivateKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// An X25519 public point. Freely shareable.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey {
    bytes: [u8; KEY_SIZE],
}

impl PublicKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Encode as lowercase hex (64 chars)
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// Decode from hex (either case)
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| CryptoError::InvalidKey(format!("public key hex: {e}")))?;
        let arr: [u8; KEY_SIZE] = bytes.as_slice().try_into().map_err(|_| {
            CryptoError::InvalidKey(format!(
                "public key must be {KEY_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self { bytes: arr })
    }

    pub(crate) fn to_x25519(self) -> X25519Public {
        X25519Public::from(self.bytes)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

/// An X25519 key pair
#[derive(Debug)]
pub struct KeyPair {
    pub private: PrivateKey,
    pub public: PublicKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        Self::from_private(PrivateKey::generate())
    }

    pub fn from_private(private: PrivateKey) -> Self {
        let public = private.public_key();
        Self { private, public }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_generation() {
        let kp1 = KeyPair::generate();
        let kp2 = KeyPair::generate();
        assert_ne!(kp1.public, kp2.public, "random keypairs must differ");
    }

    #[test]
    fn test_public_key_derivation_stable() {
        let kp = KeyPair::generate();
        assert_eq!(kp.private.public_key(), kp.public);
    }

    #[test]
    fn test_public_key_hex_roundtrip() {
        let kp = KeyPair::generate();
        let hex = kp.public.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(PublicKey::from_hex(&hex).unwrap(), kp.public);
        assert_eq!(PublicKey::from_hex(&hex.to_uppercase()).unwrap(), kp.public);
    }

    #[test]
    fn test_public_key_hex_wrong_length() {
        assert!(matches!(
            PublicKey::from_hex("abcd"),
            Err(CryptoError::InvalidKey(_))
        ));
        assert!(matches!(
            PublicKey::from_hex("zz"),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_private_key_from_slice_length() {
        assert!(PrivateKey::from_slice(&[7u8; 32]).is_ok());
        assert!(matches!(
            PrivateKey::from_slice(&[7u8; 31]),
            Err(CryptoError::KeyLengthInvalid(31))
        ));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let key = PrivateKey::from_bytes([0xAB; 32]);
        let dbg = format!("{key:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains("ab"));

        let data_key = DataKey::from_bytes([0xCD; 32]);
        assert!(format!("{data_key:?}").contains("REDACTED"));
    }
}

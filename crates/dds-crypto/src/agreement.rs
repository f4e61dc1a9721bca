//! X25519 key agreement → HKDF-SHA256 data key

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::keys::{DataKey, KeyPair, PrivateKey, PublicKey};
use crate::{CryptoError, Result, KEY_SIZE, SALT_SIZE};

/// HKDF info for the keyed integrity digest. The data key itself uses an empty info.
const INTEGRITY_INFO: &[u8] = b"dds-integrity";

/// Generate a fresh X25519 key pair.
pub fn generate_keypair() -> KeyPair {
    KeyPair::generate()
}

/// Derive the 32-byte data key shared between `local_private` and `peer_public`.
///
/// `HKDF-SHA256(salt, ikm = X25519(local_private, peer_public), info = ∅, L = 32)`.
/// Both sides must use the same salt; the encryptor transports it in the file header.
pub fn derive_data_key(
    local_private: &PrivateKey,
    peer_public: &PublicKey,
    salt: &[u8; SALT_SIZE],
) -> Result<DataKey> {
    let okm = hkdf_from_agreement(local_private, peer_public, salt, &[])?;
    Ok(DataKey::from_bytes(*okm))
}

/// Derive the HMAC key for the keyed integrity digest from the same agreement.
pub fn derive_integrity_key(
    local_private: &PrivateKey,
    peer_public: &PublicKey,
    salt: &[u8; SALT_SIZE],
) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
    hkdf_from_agreement(local_private, peer_public, salt, INTEGRITY_INFO)
}

fn hkdf_from_agreement(
    local_private: &PrivateKey,
    peer_public: &PublicKey,
    salt: &[u8; SALT_SIZE],
    info: &[u8],
) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
    let shared = local_private
        .to_static_secret()
        .diffie_hellman(&peer_public.to_x25519());

    // A low-order peer point yields an all-zero secret
    if !shared.was_contributory() {
        return Err(CryptoError::InvalidKey(
            "peer public key is a low-order point".into(),
        ));
    }

    let hkdf = Hkdf::<Sha256>::new(Some(salt), shared.as_bytes());
    let mut okm = Zeroizing::new([0u8; KEY_SIZE]);
    hkdf.expand(info, &mut okm[..])
        .map_err(|e| CryptoError::InvalidKey(format!("HKDF expand failed: {e}")))?;
    Ok(okm)
}

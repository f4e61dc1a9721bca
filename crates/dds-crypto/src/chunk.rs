//! Per-chunk ChaCha20-Poly1305 (IETF) encryption/decryption
//!
//! Sealed chunk format (binary):
//! ```text
//! [N bytes: ciphertext][16 bytes: Poly1305 tag]
//! ```
//!
//! The nonce is not stored with the chunk; it is replayed from the container's
//! initial nonce. AAD is empty in the current container format; binding the
//! chunk index into it would be a format revision.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};

use crate::{CryptoError, Result, KEY_SIZE, NONCE_SIZE, TAG_SIZE};

/// Seal `plaintext` under `key` and `nonce`.
///
/// Returns `ciphertext || tag`, exactly `plaintext.len() + 16` bytes.
pub fn seal(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(key.into());
    cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        // Only reachable for messages beyond the ChaCha20 block counter range
        .map_err(|_| {
            CryptoError::Config(format!(
                "chunk of {} bytes too large to seal",
                plaintext.len()
            ))
        })
}

/// Open `ciphertext || tag` under `key` and `nonce`.
///
/// Any tag mismatch (wrong key, wrong nonce, modified bytes) is
/// [`CryptoError::AuthenticationFailed`].
pub fn open(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    ciphertext_with_tag: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    if ciphertext_with_tag.len() < TAG_SIZE {
        return Err(CryptoError::AuthenticationFailed);
    }

    let cipher = ChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext_with_tag,
                aad,
            },
        )
        .map_err(|_| CryptoError::AuthenticationFailed)
}

//! Key derivation: scrypt passphrase → key-encryption key

use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroize;

use dds_core::config::ScryptConfig;

use crate::{CryptoError, Result, KEY_SIZE, SALT_SIZE};

/// A 256-bit key-encryption key derived from a passphrase via scrypt.
///
/// Zeroized on drop to prevent secrets lingering in memory.
pub struct Kek {
    bytes: [u8; KEY_SIZE],
}

impl Kek {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for Kek {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for Kek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kek")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// scrypt parameters for KDF, validated at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScryptParams {
    /// log2 of the CPU/memory cost N (default: 14)
    pub log_n: u8,
    /// Block size (default: 8)
    pub r: u32,
    /// Parallelism (default: 1)
    pub p: u32,
}

impl Default for ScryptParams {
    fn default() -> Self {
        Self {
            log_n: 14,
            r: 8,
            p: 1,
        }
    }
}

impl ScryptParams {
    pub fn new(log_n: u8, r: u32, p: u32) -> Result<Self> {
        let params = Self { log_n, r, p };
        params.to_scrypt()?;
        Ok(params)
    }

    /// Build from the `[kdf.scrypt]` config section, where `n` is the cost
    /// itself and must be a power of two.
    pub fn from_config(config: &ScryptConfig) -> Result<Self> {
        if config.n < 2 || !config.n.is_power_of_two() {
            return Err(CryptoError::Config(format!(
                "scrypt n must be a power of two >= 2, got {}",
                config.n
            )));
        }
        Self::new(config.n.trailing_zeros() as u8, config.r, config.p)
    }

    /// The cost parameter N
    pub fn n(&self) -> u64 {
        1u64 << self.log_n
    }

    fn to_scrypt(self) -> Result<scrypt::Params> {
        scrypt::Params::new(self.log_n, self.r, self.p, KEY_SIZE)
            .map_err(|e| CryptoError::Config(format!("invalid scrypt params: {e}")))
    }
}

/// Derive a 256-bit KEK from a passphrase and salt using scrypt.
///
/// The salt is 16 random bytes stored verbatim in the wrapped key record (it
/// does not need to be secret).
pub fn derive_kek(
    passphrase: &SecretString,
    salt: &[u8; SALT_SIZE],
    params: &ScryptParams,
) -> Result<Kek> {
    let scrypt_params = params.to_scrypt()?;

    let mut key = [0u8; KEY_SIZE];
    scrypt::scrypt(
        passphrase.expose_secret().as_bytes(),
        salt,
        &scrypt_params,
        &mut key,
    )
    .map_err(|e| CryptoError::Config(format!("scrypt KDF failed: {e}")))?;

    Ok(Kek::from_bytes(key))
}

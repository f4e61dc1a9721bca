//! 96-bit little-endian counter nonces for the chunk stream

use rand::RngCore;

use crate::{CryptoError, Result, NONCE_SIZE};

/// 2^96: size of the nonce space
const NONCE_SPACE: u128 = 1 << 96;
const NONCE_MASK: u128 = NONCE_SPACE - 1;

/// Issues one nonce per chunk: the seed, then seed + 1, ... modulo 2^96.
///
/// The counter wraps around the 96-bit space, but a single sequencer refuses
/// to issue more than 2^96 values, so no nonce repeats within one file.
#[derive(Debug, Clone)]
pub struct NonceSequencer {
    initial: u128,
    current: u128,
    issued: u128,
}

impl NonceSequencer {
    /// Start from a uniformly random seed.
    pub fn random() -> Self {
        let mut seed = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut seed);
        Self::from_seed(seed)
    }

    /// Start from `seed`, interpreted as a little-endian 96-bit integer.
    pub fn from_seed(seed: [u8; NONCE_SIZE]) -> Self {
        let value = decode_le(&seed);
        Self {
            initial: value,
            current: value,
            issued: 0,
        }
    }

    /// The seed as written to the container header.
    pub fn initial(&self) -> [u8; NONCE_SIZE] {
        encode_le(self.initial)
    }

    /// Number of nonces issued so far.
    pub fn issued(&self) -> u128 {
        self.issued
    }

    /// Return the current value and advance by one (mod 2^96).
    pub fn next_nonce(&mut self) -> Result<[u8; NONCE_SIZE]> {
        if self.issued == NONCE_SPACE {
            return Err(CryptoError::NonceExhausted);
        }
        let nonce = encode_le(self.current);
        self.current = (self.current + 1) & NONCE_MASK;
        self.issued += 1;
        Ok(nonce)
    }

    /// The most recently issued nonce, i.e. `initial + issued - 1 (mod 2^96)`.
    ///
    /// Before any nonce is issued this is `initial - 1 (mod 2^96)`, which is
    /// what an empty file records in its trailer.
    pub fn last_issued(&self) -> [u8; NONCE_SIZE] {
        encode_le(self.current.wrapping_sub(1) & NONCE_MASK)
    }
}

fn decode_le(bytes: &[u8; NONCE_SIZE]) -> u128 {
    let mut wide = [0u8; 16];
    wide[..NONCE_SIZE].copy_from_slice(bytes);
    u128::from_le_bytes(wide)
}

fn encode_le(value: u128) -> [u8; NONCE_SIZE] {
    let wide = value.to_le_bytes();
    let mut out = [0u8; NONCE_SIZE];
    out.copy_from_slice(&wide[..NONCE_SIZE]);
    out
}

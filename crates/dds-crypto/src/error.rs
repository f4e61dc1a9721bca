//! Error types for the dds-crypto crate

use dds_core::ProjectId;
use thiserror::Error;

/// Result type alias using `CryptoError`
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors surfaced by the encryption pipeline and the key store.
///
/// Envelope parse failures are kept distinct so the caller can tell a corrupt
/// record apart from a record that belongs to another project.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Underlying read/write failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// AEAD tag mismatch on a chunk or on a wrapped key.
    /// A wrong passphrase is reported the same way as tampering.
    #[error("authentication failed: wrong key or corrupted data")]
    AuthenticationFailed,

    #[error("envelope magic mismatch")]
    MagicMismatch,

    #[error("envelope project mismatch: expected {expected}, found {found}")]
    ProjectMismatch {
        expected: ProjectId,
        found: ProjectId,
    },

    #[error("envelope private key has invalid length: {0} bytes (expected 32)")]
    KeyLengthInvalid(usize),

    #[error("envelope truncated: field needs {needed} bytes, {remaining} remain")]
    Truncated { needed: usize, remaining: usize },

    #[error("envelope has {0} trailing bytes")]
    TrailingBytes(usize),

    /// Trailer nonce disagrees with the replayed sequencer, or the container is
    /// too short to hold its header and trailer
    #[error("encrypted file truncated or reordered")]
    TruncationDetected,

    /// 2^96 nonces issued within one file
    #[error("nonce space exhausted")]
    NonceExhausted,

    /// Key material of the wrong length or encoding
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("config error: {0}")]
    Config(String),

    /// Decrypted plaintext digest differs from the one recorded at upload
    #[error("integrity digest mismatch: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    /// Persisted wrapped-key record is malformed (bad hex or field lengths)
    #[error("invalid wrapped key record: {0}")]
    InvalidRecord(String),

    #[error("no wrapped key record for project {0}")]
    MissingRecord(ProjectId),

    /// Failure reported by a passphrase or record-store callback
    #[error("collaborator error: {0}")]
    Collaborator(String),
}

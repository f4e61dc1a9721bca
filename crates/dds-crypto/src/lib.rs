//! dds-crypto: client-side file encryption for the Data Delivery System
//!
//! Architecture: Chunk-then-Encrypt with ChaCha20-Poly1305 (IETF)
//!
//! Pipeline: plaintext → fixed-size chunks → seal(data_key, counter nonce) → container on disk
//!
//! Key hierarchy:
//! ```text
//! Passphrase
//!   └── KEK (scrypt, per-record random salt)
//!       └── Wrapped key envelope: "DelSys" || project id || X25519 private key
//!           └── Data Key (X25519 agreement with the file's ephemeral key → HKDF-SHA256)
//!               └── Chunk AEAD: ChaCha20-Poly1305 (nonce = initial + chunk index, AAD = ∅)
//! ```
//!
//! Encrypted container:
//! ```text
//! [32 ephemeral public key][16 HKDF salt][12 initial nonce LE]
//! [C + 16]* ... [1..=C + 16]
//! [12 final nonce LE]
//! ```

pub mod agreement;
pub mod chunk;
pub mod chunker;
pub mod config;
pub mod envelope;
pub mod error;
pub mod integrity;
pub mod kdf;
pub mod keys;
pub mod keystore;
pub mod nonce;
pub mod stream;

pub use agreement::{derive_data_key, derive_integrity_key, generate_keypair};
pub use chunk::{open, seal};
pub use chunker::ByteChunker;
pub use config::PipelineConfig;
pub use envelope::{KeyEnvelope, ENVELOPE_MAGIC};
pub use error::{CryptoError, Result};
pub use integrity::{Digest, IntegrityHasher};
pub use kdf::{derive_kek, Kek, ScryptParams};
pub use keys::{DataKey, KeyPair, PrivateKey, PublicKey};
pub use keystore::{
    provision_project_key, unwrap_private_key, wrap_private_key, PassphraseSource, RecordStore,
    WrappedKeyHex, WrappedKeyRecord,
};
pub use nonce::NonceSequencer;
pub use stream::{
    decrypt_file, decrypt_file_with_progress, decrypt_stream, encrypt_file,
    encrypt_file_with_progress, encrypt_stream, ContainerHeader, DecryptReceipt, EncryptReceipt,
    ProgressFn, StreamState, HEADER_SIZE, TRAILER_SIZE,
};

pub use dds_core::{IntegrityAlgorithm, ProjectId};

/// Size of a symmetric or X25519 key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of a ChaCha20-Poly1305 (IETF) nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of the scrypt salt and of the HKDF salt
pub const SALT_SIZE: usize = 16;

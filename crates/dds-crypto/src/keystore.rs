//! Password-wrapped private keys
//!
//! A project's X25519 private key is packed into a [`KeyEnvelope`], sealed with
//! ChaCha20-Poly1305 under a scrypt-derived KEK, and persisted as
//! `(salt, nonce, ciphertext || tag)`. The backing store keeps the three fields
//! as uppercase hex.

use rand::RngCore;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::chunk::{open, seal};
use crate::envelope::{KeyEnvelope, ENVELOPE_LEN};
use crate::kdf::{derive_kek, ScryptParams};
use crate::keys::{KeyPair, PrivateKey, PublicKey};
use crate::{CryptoError, ProjectId, Result, NONCE_SIZE, SALT_SIZE, TAG_SIZE};

/// Smallest ciphertext that can hold a sealed envelope
const MIN_SEALED_LEN: usize = ENVELOPE_LEN + TAG_SIZE;

/// A persisted wrapped envelope. Salt and nonce are uniformly random.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedKeyRecord {
    pub salt: [u8; SALT_SIZE],
    pub nonce: [u8; NONCE_SIZE],
    /// Sealed envelope: ciphertext followed by the 16-byte tag
    pub ciphertext: Vec<u8>,
}

/// Hex presentation of a [`WrappedKeyRecord`], as stored in the backing store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKeyHex {
    pub salt_hex: String,
    pub nonce_hex: String,
    pub encrypted_key_hex: String,
}

impl WrappedKeyRecord {
    pub fn to_hex(&self) -> WrappedKeyHex {
        WrappedKeyHex {
            salt_hex: hex::encode_upper(self.salt),
            nonce_hex: hex::encode_upper(self.nonce),
            encrypted_key_hex: hex::encode_upper(&self.ciphertext),
        }
    }

    pub fn from_hex(record: &WrappedKeyHex) -> Result<Self> {
        let salt = decode_fixed::<SALT_SIZE>("salt_hex", &record.salt_hex)?;
        let nonce = decode_fixed::<NONCE_SIZE>("nonce_hex", &record.nonce_hex)?;
        let ciphertext = hex::decode(&record.encrypted_key_hex)
            .map_err(|e| CryptoError::InvalidRecord(format!("encrypted_key_hex: {e}")))?;
        if ciphertext.len() < MIN_SEALED_LEN {
            return Err(CryptoError::InvalidRecord(format!(
                "encrypted_key_hex holds {} bytes, a sealed envelope needs {MIN_SEALED_LEN}",
                ciphertext.len()
            )));
        }
        Ok(Self {
            salt,
            nonce,
            ciphertext,
        })
    }
}

fn decode_fixed<const N: usize>(field: &str, s: &str) -> Result<[u8; N]> {
    let bytes =
        hex::decode(s).map_err(|e| CryptoError::InvalidRecord(format!("{field}: {e}")))?;
    bytes.as_slice().try_into().map_err(|_| {
        CryptoError::InvalidRecord(format!(
            "{field} must be {} hex chars, got {}",
            2 * N,
            s.len()
        ))
    })
}

/// Seal `envelope` under a KEK derived from `passphrase` with a fresh random
/// salt and nonce.
pub fn wrap(
    passphrase: &SecretString,
    envelope: &[u8],
    params: &ScryptParams,
) -> Result<WrappedKeyRecord> {
    let mut salt = [0u8; SALT_SIZE];
    let mut nonce = [0u8; NONCE_SIZE];
    let mut rng = rand::thread_rng();
    rng.fill_bytes(&mut salt);
    rng.fill_bytes(&mut nonce);
    wrap_with(passphrase, envelope, params, salt, nonce)
}

/// [`wrap`] with caller-chosen salt and nonce. Reusing a (salt, nonce) pair
/// for two different envelopes under one passphrase breaks confidentiality.
pub fn wrap_with(
    passphrase: &SecretString,
    envelope: &[u8],
    params: &ScryptParams,
    salt: [u8; SALT_SIZE],
    nonce: [u8; NONCE_SIZE],
) -> Result<WrappedKeyRecord> {
    let kek = derive_kek(passphrase, &salt, params)?;
    let ciphertext = seal(kek.as_bytes(), &nonce, envelope, &[])?;
    Ok(WrappedKeyRecord {
        salt,
        nonce,
        ciphertext,
    })
}

/// Recover the envelope bytes. A wrong passphrase and a tampered record both
/// surface as [`CryptoError::AuthenticationFailed`].
pub fn unwrap(
    passphrase: &SecretString,
    record: &WrappedKeyRecord,
    params: &ScryptParams,
) -> Result<Zeroizing<Vec<u8>>> {
    let kek = derive_kek(passphrase, &record.salt, params)?;
    open(kek.as_bytes(), &record.nonce, &record.ciphertext, &[]).map(Zeroizing::new)
}

/// Supplies the user's passphrase on demand.
pub trait PassphraseSource {
    fn read_passphrase(&self) -> Result<SecretString>;
}

impl<F> PassphraseSource for F
where
    F: Fn() -> Result<SecretString>,
{
    fn read_passphrase(&self) -> Result<SecretString> {
        self()
    }
}

/// Persists wrapped key records per project. The crypto core never touches a
/// database itself.
pub trait RecordStore {
    fn load_wrapped_record(&self, project: ProjectId) -> Result<Option<WrappedKeyRecord>>;

    fn save_wrapped_record(&mut self, project: ProjectId, record: &WrappedKeyRecord)
        -> Result<()>;
}

/// Envelope `private_key` for `project`, wrap it under the user's passphrase
/// and hand the record to the store.
pub fn wrap_private_key(
    project: ProjectId,
    private_key: &PrivateKey,
    passphrase: &dyn PassphraseSource,
    store: &mut dyn RecordStore,
    params: &ScryptParams,
) -> Result<()> {
    let envelope = crate::envelope::encode(project, private_key);
    let passphrase = passphrase.read_passphrase()?;
    let record = wrap(&passphrase, &envelope, params)?;
    store.save_wrapped_record(project, &record)?;
    tracing::info!(project = %project, "wrapped private key saved");
    Ok(())
}

/// Load the record for `project`, unwrap it with the user's passphrase and
/// return the private key, checking that the envelope names `project`.
pub fn unwrap_private_key(
    project: ProjectId,
    passphrase: &dyn PassphraseSource,
    store: &dyn RecordStore,
    params: &ScryptParams,
) -> Result<PrivateKey> {
    let record = store
        .load_wrapped_record(project)?
        .ok_or(CryptoError::MissingRecord(project))?;
    let passphrase = passphrase.read_passphrase()?;
    let envelope = unwrap(&passphrase, &record, params)?;
    let decoded = KeyEnvelope::decode_for(&envelope, project)?;
    tracing::debug!(project = %project, "private key unwrapped");
    Ok(decoded.private_key)
}

/// Generate a keypair for `project`, persist the wrapped private key, and
/// return the public key for distribution to senders.
pub fn provision_project_key(
    project: ProjectId,
    passphrase: &dyn PassphraseSource,
    store: &mut dyn RecordStore,
    params: &ScryptParams,
) -> Result<PublicKey> {
    let keypair = KeyPair::generate();
    wrap_private_key(project, &keypair.private, passphrase, store, params)?;
    Ok(keypair.public)
}

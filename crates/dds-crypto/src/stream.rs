//! Chunked file encryption/decryption
//!
//! Container format (binary):
//! ```text
//! offset  size   field
//! 0       32     ephemeral X25519 public key
//! 32      16     HKDF salt
//! 48      12     initial nonce (little-endian)
//! 60      *      chunks: (C bytes ciphertext || 16 bytes tag), last chunk 1..=C bytes
//! EOF-12  12     final nonce (little-endian) = initial + N - 1 (mod 2^96)
//! ```
//!
//! The data key is derived per file from an ephemeral X25519 key and the
//! recipient's public key. Chunk nonces are replayed from the initial nonce, so
//! reordering or dropping chunks fails authentication or the trailer check. A
//! tail cut paired with a rewritten trailer is only caught by the plaintext
//! digest (see [`decrypt_stream`]).
//!
//! File outputs are staged in a temporary file next to the destination and
//! renamed into place only once the stream is finalized; on any error the
//! temporary file is removed, so no partial output is ever visible.

use std::fs::File;
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use rand::RngCore;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::agreement::{derive_data_key, derive_integrity_key, generate_keypair};
use crate::chunk::{open, seal};
use crate::chunker::ByteChunker;
use crate::config::PipelineConfig;
use crate::integrity::{Digest, IntegrityHasher};
use crate::keys::{DataKey, PrivateKey, PublicKey};
use crate::nonce::NonceSequencer;
use crate::{CryptoError, IntegrityAlgorithm, Result, KEY_SIZE, NONCE_SIZE, SALT_SIZE, TAG_SIZE};

/// Size of the container header
pub const HEADER_SIZE: usize = KEY_SIZE + SALT_SIZE + NONCE_SIZE;

/// Size of the container trailer
pub const TRAILER_SIZE: usize = NONCE_SIZE;

/// Chunks are sealed without associated data in this container format
const CHUNK_AAD: &[u8] = &[];

/// Called with the number of plaintext bytes processed so far
pub type ProgressFn<'a> = &'a dyn Fn(u64);

/// Lifecycle of one encrypt or decrypt run.
///
/// `Idle → HeaderWritten → Streaming → Finalized`, with `HeaderWritten →
/// Finalized` for an empty file and any state `→ Aborted` on the first error.
/// Only `Finalized` leaves an output file in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    HeaderWritten,
    Streaming,
    Finalized,
    Aborted,
}

/// Summary of a finished encryption
#[derive(Debug, Clone)]
pub struct EncryptReceipt {
    pub chunks: u64,
    pub plaintext_bytes: u64,
    pub ciphertext_bytes: u64,
    /// Plaintext digest to record alongside the upload
    pub digest: Digest,
}

/// Summary of a finished, verified decryption
#[derive(Debug, Clone)]
pub struct DecryptReceipt {
    pub chunks: u64,
    pub plaintext_bytes: u64,
    pub ciphertext_bytes: u64,
    pub digest: Digest,
}

/// Parsed container header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    pub ephemeral_public: PublicKey,
    pub hkdf_salt: [u8; SALT_SIZE],
    pub initial_nonce: [u8; NONCE_SIZE],
}

impl ContainerHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..KEY_SIZE].copy_from_slice(self.ephemeral_public.as_bytes());
        out[KEY_SIZE..KEY_SIZE + SALT_SIZE].copy_from_slice(&self.hkdf_salt);
        out[KEY_SIZE + SALT_SIZE..].copy_from_slice(&self.initial_nonce);
        out
    }

    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        let mut public = [0u8; KEY_SIZE];
        let mut hkdf_salt = [0u8; SALT_SIZE];
        let mut initial_nonce = [0u8; NONCE_SIZE];
        public.copy_from_slice(&bytes[..KEY_SIZE]);
        hkdf_salt.copy_from_slice(&bytes[KEY_SIZE..KEY_SIZE + SALT_SIZE]);
        initial_nonce.copy_from_slice(&bytes[KEY_SIZE + SALT_SIZE..]);
        Self {
            ephemeral_public: PublicKey::from_bytes(public),
            hkdf_salt,
            initial_nonce,
        }
    }
}

fn new_hasher(
    algorithm: IntegrityAlgorithm,
    local_private: &PrivateKey,
    peer_public: &PublicKey,
    salt: &[u8; SALT_SIZE],
) -> Result<IntegrityHasher> {
    match algorithm {
        IntegrityAlgorithm::Sha512 => Ok(IntegrityHasher::sha512()),
        IntegrityAlgorithm::HmacSha256 => {
            let key = derive_integrity_key(local_private, peer_public, salt)?;
            IntegrityHasher::hmac_sha256(&key)
        }
    }
}

// ── Encryption ────────────────────────────────────────────────────────────────

struct StreamEncryptor<'p, W: Write> {
    out: W,
    key: DataKey,
    nonces: NonceSequencer,
    hasher: Option<IntegrityHasher>,
    header: ContainerHeader,
    state: StreamState,
    chunks: u64,
    plaintext_bytes: u64,
    ciphertext_bytes: u64,
    progress: Option<ProgressFn<'p>>,
}

impl<'p, W: Write> StreamEncryptor<'p, W> {
    fn new(
        out: W,
        recipient: &PublicKey,
        integrity: IntegrityAlgorithm,
        progress: Option<ProgressFn<'p>>,
    ) -> Result<Self> {
        // Ephemeral private key is dropped (and zeroized) once both keys exist
        let ephemeral = generate_keypair();
        let mut hkdf_salt = [0u8; SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut hkdf_salt);

        let key = derive_data_key(&ephemeral.private, recipient, &hkdf_salt)?;
        let hasher = new_hasher(integrity, &ephemeral.private, recipient, &hkdf_salt)?;
        let nonces = NonceSequencer::random();

        let header = ContainerHeader {
            ephemeral_public: ephemeral.public,
            hkdf_salt,
            initial_nonce: nonces.initial(),
        };

        Ok(Self {
            out,
            key,
            nonces,
            hasher: Some(hasher),
            header,
            state: StreamState::Idle,
            chunks: 0,
            plaintext_bytes: 0,
            ciphertext_bytes: 0,
            progress,
        })
    }

    fn transition(&mut self, next: StreamState) {
        debug!(from = ?self.state, to = ?next, "encryptor state");
        self.state = next;
    }

    fn write_header(&mut self) -> Result<()> {
        debug_assert_eq!(self.state, StreamState::Idle);
        self.out.write_all(&self.header.to_bytes())?;
        self.out.flush()?;
        self.ciphertext_bytes += HEADER_SIZE as u64;
        self.transition(StreamState::HeaderWritten);
        Ok(())
    }

    fn write_chunk(&mut self, plaintext: &[u8]) -> Result<()> {
        let nonce = self.nonces.next_nonce()?;
        let sealed = seal(self.key.as_bytes(), &nonce, plaintext, CHUNK_AAD)?;
        self.out.write_all(&sealed)?;

        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(plaintext);
        }
        if self.state == StreamState::HeaderWritten {
            self.transition(StreamState::Streaming);
        }
        self.chunks += 1;
        self.plaintext_bytes += plaintext.len() as u64;
        self.ciphertext_bytes += sealed.len() as u64;
        if let Some(progress) = self.progress {
            progress(self.plaintext_bytes);
        }
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<()> {
        self.out.write_all(&self.nonces.last_issued())?;
        self.out.flush()?;
        self.ciphertext_bytes += TRAILER_SIZE as u64;
        self.transition(StreamState::Finalized);
        Ok(())
    }

    fn run<R: Read>(&mut self, chunks: ByteChunker<R>) -> Result<()> {
        self.write_header()?;
        for chunk in chunks {
            self.write_chunk(&chunk?)?;
        }
        self.write_trailer()
    }

    fn abort(&mut self, err: &CryptoError) {
        warn!(state = ?self.state, chunks = self.chunks, error = %err, "encryption aborted");
        self.transition(StreamState::Aborted);
    }

    fn receipt(&mut self) -> Result<EncryptReceipt> {
        let digest = self
            .hasher
            .take()
            .map(IntegrityHasher::finalize)
            .ok_or_else(|| CryptoError::Config("receipt already taken".into()))?;
        Ok(EncryptReceipt {
            chunks: self.chunks,
            plaintext_bytes: self.plaintext_bytes,
            ciphertext_bytes: self.ciphertext_bytes,
            digest,
        })
    }
}

/// Encrypt everything `reader` yields into `writer` for `recipient`.
///
/// On error the writer may hold a partial container; [`encrypt_file`] is the
/// variant that guarantees nothing partial survives.
pub fn encrypt_stream<R: Read, W: Write>(
    reader: R,
    writer: W,
    recipient: &PublicKey,
    config: &PipelineConfig,
) -> Result<EncryptReceipt> {
    encrypt_stream_with_progress(reader, writer, recipient, config, None)
}

pub fn encrypt_stream_with_progress<R: Read, W: Write>(
    reader: R,
    writer: W,
    recipient: &PublicKey,
    config: &PipelineConfig,
    progress: Option<ProgressFn<'_>>,
) -> Result<EncryptReceipt> {
    let chunker = ByteChunker::new(reader, config.chunk_size)?;
    let mut encryptor = StreamEncryptor::new(writer, recipient, config.integrity, progress)?;

    if let Err(e) = encryptor.run(chunker) {
        encryptor.abort(&e);
        return Err(e);
    }
    encryptor.receipt()
}

/// Encrypt the file at `input` into a container at `output`.
///
/// Either `output` ends up fully written and parseable, or it is not created.
pub fn encrypt_file(
    input: &Path,
    output: &Path,
    recipient: &PublicKey,
    config: &PipelineConfig,
) -> Result<EncryptReceipt> {
    encrypt_file_with_progress(input, output, recipient, config, None)
}

pub fn encrypt_file_with_progress(
    input: &Path,
    output: &Path,
    recipient: &PublicKey,
    config: &PipelineConfig,
    progress: Option<ProgressFn<'_>>,
) -> Result<EncryptReceipt> {
    let source = File::open(input)?;
    let mut staged = StagedOutput::create(output)?;

    let receipt =
        encrypt_stream_with_progress(source, staged.writer(), recipient, config, progress)?;
    staged.commit()?;

    info!(
        input = %input.display(),
        output = %output.display(),
        chunks = receipt.chunks,
        bytes = receipt.plaintext_bytes,
        "file encrypted"
    );
    Ok(receipt)
}

// ── Decryption ────────────────────────────────────────────────────────────────

struct StreamDecryptor<'p, R: Read, W: Write> {
    input: R,
    out: W,
    chunk_size: usize,
    key: Option<DataKey>,
    nonces: Option<NonceSequencer>,
    hasher: Option<IntegrityHasher>,
    state: StreamState,
    chunks: u64,
    plaintext_bytes: u64,
    ciphertext_bytes: u64,
    progress: Option<ProgressFn<'p>>,
}

impl<'p, R: Read, W: Write> StreamDecryptor<'p, R, W> {
    fn new(input: R, out: W, chunk_size: usize, progress: Option<ProgressFn<'p>>) -> Self {
        Self {
            input,
            out,
            chunk_size,
            key: None,
            nonces: None,
            hasher: None,
            state: StreamState::Idle,
            chunks: 0,
            plaintext_bytes: 0,
            ciphertext_bytes: 0,
            progress,
        }
    }

    fn transition(&mut self, next: StreamState) {
        debug!(from = ?self.state, to = ?next, "decryptor state");
        self.state = next;
    }

    /// Read into `buf` until it holds `target` bytes or the input ends.
    fn fill(&mut self, buf: &mut Vec<u8>, target: usize) -> Result<()> {
        let mut scratch = [0u8; 8192];
        while buf.len() < target {
            let want = (target - buf.len()).min(scratch.len());
            match self.input.read(&mut scratch[..want]) {
                Ok(0) => break,
                Ok(n) => buf.extend_from_slice(&scratch[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn read_header(
        &mut self,
        private_key: &PrivateKey,
        integrity: IntegrityAlgorithm,
    ) -> Result<()> {
        debug_assert_eq!(self.state, StreamState::Idle);
        let mut raw = Vec::with_capacity(HEADER_SIZE);
        self.fill(&mut raw, HEADER_SIZE)?;
        let raw: [u8; HEADER_SIZE] = raw
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::TruncationDetected)?;
        let header = ContainerHeader::from_bytes(&raw);

        self.key = Some(derive_data_key(
            private_key,
            &header.ephemeral_public,
            &header.hkdf_salt,
        )?);
        self.hasher = Some(new_hasher(
            integrity,
            private_key,
            &header.ephemeral_public,
            &header.hkdf_salt,
        )?);
        self.nonces = Some(NonceSequencer::from_seed(header.initial_nonce));
        self.ciphertext_bytes += HEADER_SIZE as u64;
        self.transition(StreamState::HeaderWritten);
        Ok(())
    }

    fn open_chunk(&mut self, sealed: &[u8]) -> Result<()> {
        let (Some(key), Some(nonces)) = (self.key.as_ref(), self.nonces.as_mut()) else {
            return Err(CryptoError::Config("chunk before header".into()));
        };
        let nonce = nonces.next_nonce()?;
        let plaintext = open(key.as_bytes(), &nonce, sealed, CHUNK_AAD)?;
        self.out.write_all(&plaintext)?;

        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(&plaintext);
        }
        if self.state == StreamState::HeaderWritten {
            self.transition(StreamState::Streaming);
        }
        self.chunks += 1;
        self.plaintext_bytes += plaintext.len() as u64;
        self.ciphertext_bytes += sealed.len() as u64;
        if let Some(progress) = self.progress {
            progress(self.plaintext_bytes);
        }
        Ok(())
    }

    /// Decrypt chunks until only the trailer remains, then check it against
    /// the replayed sequencer.
    fn stream_chunks(&mut self) -> Result<()> {
        let block_len = self.chunk_size + TAG_SIZE;
        // One full block, the trailer, and one byte of lookahead: if the window
        // fills completely, the leading block cannot be the last chunk.
        let window_len = block_len + TRAILER_SIZE + 1;
        let mut window = Vec::with_capacity(window_len);

        loop {
            self.fill(&mut window, window_len)?;
            if window.len() < window_len {
                break;
            }
            self.open_chunk(&window[..block_len])?;
            window.drain(..block_len);
        }

        // Input exhausted: window is [last chunk?][trailer]
        if window.len() < TRAILER_SIZE {
            return Err(CryptoError::TruncationDetected);
        }
        let body_len = window.len() - TRAILER_SIZE;
        match body_len {
            0 => {}
            n if n <= TAG_SIZE => return Err(CryptoError::TruncationDetected),
            _ => self.open_chunk(&window[..body_len])?,
        }

        let trailer = &window[body_len..];
        let expected = self
            .nonces
            .as_ref()
            .map(NonceSequencer::last_issued)
            .ok_or(CryptoError::TruncationDetected)?;
        if trailer != expected {
            return Err(CryptoError::TruncationDetected);
        }
        self.ciphertext_bytes += TRAILER_SIZE as u64;
        Ok(())
    }

    fn finish(&mut self, expected_digest: Option<&Digest>) -> Result<DecryptReceipt> {
        let hasher = self
            .hasher
            .take()
            .ok_or_else(|| CryptoError::Config("stream finished before header".into()))?;
        let digest = match expected_digest {
            Some(expected) => hasher.finalize_verified(expected)?,
            None => hasher.finalize(),
        };

        self.out.flush()?;
        self.transition(StreamState::Finalized);
        Ok(DecryptReceipt {
            chunks: self.chunks,
            plaintext_bytes: self.plaintext_bytes,
            ciphertext_bytes: self.ciphertext_bytes,
            digest,
        })
    }

    fn run(
        &mut self,
        private_key: &PrivateKey,
        integrity: IntegrityAlgorithm,
        expected_digest: Option<&Digest>,
    ) -> Result<DecryptReceipt> {
        self.read_header(private_key, integrity)?;
        self.stream_chunks()?;
        self.finish(expected_digest)
    }

    fn abort(&mut self, err: &CryptoError) {
        warn!(state = ?self.state, chunks = self.chunks, error = %err, "decryption aborted");
        self.transition(StreamState::Aborted);
    }
}

/// Decrypt a container read from `reader` into `writer`.
///
/// `expected_digest`, when given, is compared with the digest of the recovered
/// plaintext; it must use the algorithm configured in `config`.
///
/// Chunks carry no associated data, so removing whole trailing chunks and
/// rewriting the trailer to match still authenticates and yields a shorter
/// plaintext. Only `expected_digest` catches that: callers that need to detect
/// truncation must pass the digest recorded at encryption time.
pub fn decrypt_stream<R: Read, W: Write>(
    reader: R,
    writer: W,
    private_key: &PrivateKey,
    config: &PipelineConfig,
    expected_digest: Option<&Digest>,
) -> Result<DecryptReceipt> {
    decrypt_stream_with_progress(reader, writer, private_key, config, expected_digest, None)
}

pub fn decrypt_stream_with_progress<R: Read, W: Write>(
    reader: R,
    writer: W,
    private_key: &PrivateKey,
    config: &PipelineConfig,
    expected_digest: Option<&Digest>,
    progress: Option<ProgressFn<'_>>,
) -> Result<DecryptReceipt> {
    if let Some(expected) = expected_digest {
        if expected.algorithm() != config.integrity {
            return Err(CryptoError::Config(format!(
                "expected digest uses {}, pipeline is configured for {}",
                expected.algorithm(),
                config.integrity
            )));
        }
    }

    let mut decryptor = StreamDecryptor::new(reader, writer, config.chunk_size, progress);
    match decryptor.run(private_key, config.integrity, expected_digest) {
        Ok(receipt) => Ok(receipt),
        Err(e) => {
            decryptor.abort(&e);
            Err(e)
        }
    }
}

/// Decrypt the container at `input` into `output`.
///
/// The plaintext only appears at `output` once every chunk authenticated, the
/// trailer matched, and the digest (if given) agreed.
///
/// Without `expected_digest`, a container cut at a chunk boundary with a forged
/// trailer decrypts to a truncated plaintext; see [`decrypt_stream`].
pub fn decrypt_file(
    input: &Path,
    output: &Path,
    private_key: &PrivateKey,
    config: &PipelineConfig,
    expected_digest: Option<&Digest>,
) -> Result<DecryptReceipt> {
    decrypt_file_with_progress(input, output, private_key, config, expected_digest, None)
}

pub fn decrypt_file_with_progress(
    input: &Path,
    output: &Path,
    private_key: &PrivateKey,
    config: &PipelineConfig,
    expected_digest: Option<&Digest>,
    progress: Option<ProgressFn<'_>>,
) -> Result<DecryptReceipt> {
    let source = File::open(input)?;
    let mut staged = StagedOutput::create(output)?;

    let receipt = decrypt_stream_with_progress(
        source,
        staged.writer(),
        private_key,
        config,
        expected_digest,
        progress,
    )?;
    staged.commit()?;

    info!(
        input = %input.display(),
        output = %output.display(),
        chunks = receipt.chunks,
        bytes = receipt.plaintext_bytes,
        "file decrypted"
    );
    Ok(receipt)
}

// ── Staged output ─────────────────────────────────────────────────────────────

/// A temporary file in the destination directory, renamed over the destination
/// on commit and deleted when dropped uncommitted.
struct StagedOutput {
    file: BufWriter<NamedTempFile>,
    dest: PathBuf,
}

impl StagedOutput {
    fn create(dest: &Path) -> Result<Self> {
        let dir = match dest.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let tmp = NamedTempFile::new_in(dir)?;
        Ok(Self {
            file: BufWriter::new(tmp),
            dest: dest.to_path_buf(),
        })
    }

    fn writer(&mut self) -> &mut BufWriter<NamedTempFile> {
        &mut self.file
    }

    fn commit(self) -> Result<()> {
        let tmp = self.file.into_inner().map_err(|e| e.into_error())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.dest).map_err(|e| e.error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyPair;
    use std::cell::Cell;

    fn config(chunk_size: usize) -> PipelineConfig {
        PipelineConfig::default().with_chunk_size(chunk_size).unwrap()
    }

    fn encrypt_bytes(data: &[u8], recipient: &PublicKey, cfg: &PipelineConfig) -> Vec<u8> {
        let mut out = Vec::new();
        encrypt_stream(data, &mut out, recipient, cfg).unwrap();
        out
    }

    #[test]
    fn header_layout() {
        let header = ContainerHeader {
            ephemeral_public: PublicKey::from_bytes([1u8; 32]),
            hkdf_salt: [2u8; 16],
            initial_nonce: [3u8; 12],
        };
        let bytes = header.to_bytes();
        assert_eq!(HEADER_SIZE, 60);
        assert_eq!(&bytes[..32], &[1u8; 32]);
        assert_eq!(&bytes[32..48], &[2u8; 16]);
        assert_eq!(&bytes[48..60], &[3u8; 12]);
        assert_eq!(ContainerHeader::from_bytes(&bytes), header);
    }

    #[test]
    fn empty_input_is_72_bytes() {
        let kp = KeyPair::generate();
        let container = encrypt_bytes(b"", &kp.public, &config(64 * 1024));
        assert_eq!(container.len(), 72);

        // Trailer of an empty file is initial - 1
        let header = ContainerHeader::from_bytes(container[..60].try_into().unwrap());
        let seq = NonceSequencer::from_seed(header.initial_nonce);
        assert_eq!(&container[60..], &seq.last_issued());
    }

    #[test]
    fn roundtrip_in_memory() {
        let kp = KeyPair::generate();
        let cfg = config(17);
        let data: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();

        let container = encrypt_bytes(&data, &kp.public, &cfg);
        let mut plain = Vec::new();
        let receipt = decrypt_stream(&container[..], &mut plain, &kp.private, &cfg, None).unwrap();

        assert_eq!(plain, data);
        assert_eq!(receipt.chunks, 59); // ceil(1000 / 17)
        assert_eq!(receipt.ciphertext_bytes, container.len() as u64);
    }

    #[test]
    fn exact_multiple_of_chunk_size() {
        let kp = KeyPair::generate();
        let cfg = config(8);
        let data = [0x11u8; 32];

        let container = encrypt_bytes(&data, &kp.public, &cfg);
        assert_eq!(container.len(), 60 + 4 * (8 + 16) + 12);

        let mut plain = Vec::new();
        decrypt_stream(&container[..], &mut plain, &kp.private, &cfg, None).unwrap();
        assert_eq!(plain, data);
    }

    #[test]
    fn encryptor_state_machine() {
        let kp = KeyPair::generate();
        let mut sink = Vec::new();
        let mut enc =
            StreamEncryptor::new(&mut sink, &kp.public, IntegrityAlgorithm::Sha512, None)
                .unwrap();
        assert_eq!(enc.state, StreamState::Idle);

        enc.write_header().unwrap();
        assert_eq!(enc.state, StreamState::HeaderWritten);

        enc.write_chunk(b"abc").unwrap();
        assert_eq!(enc.state, StreamState::Streaming);
        enc.write_chunk(b"def").unwrap();
        assert_eq!(enc.state, StreamState::Streaming);

        enc.write_trailer().unwrap();
        assert_eq!(enc.state, StreamState::Finalized);
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn encryptor_aborts_on_write_error() {
        let kp = KeyPair::generate();
        let mut enc =
            StreamEncryptor::new(FailingWriter, &kp.public, IntegrityAlgorithm::Sha512, None)
                .unwrap();
        let chunker = ByteChunker::new(&b"payload"[..], 4).unwrap();

        let err = enc.run(chunker).unwrap_err();
        enc.abort(&err);

        assert!(matches!(err, CryptoError::Io(_)));
        assert_eq!(enc.state, StreamState::Aborted);
    }

    #[test]
    fn decryptor_rejects_short_header() {
        let kp = KeyPair::generate();
        let mut out = Vec::new();
        let result = decrypt_stream(&[0u8; 59][..], &mut out, &kp.private, &config(16), None);
        assert!(matches!(result, Err(CryptoError::TruncationDetected)));
    }

    #[test]
    fn decryptor_rejects_tag_only_block() {
        let kp = KeyPair::generate();
        let cfg = config(16);
        let container = encrypt_bytes(b"", &kp.public, &cfg);

        // Splice 16 stray bytes between header and trailer
        let mut forged = container[..60].to_vec();
        forged.extend_from_slice(&[0u8; 16]);
        forged.extend_from_slice(&container[60..]);

        let mut out = Vec::new();
        let result = decrypt_stream(&forged[..], &mut out, &kp.private, &cfg, None);
        assert!(matches!(result, Err(CryptoError::TruncationDetected)));
    }

    #[test]
    fn decryptor_state_reaches_finalized() {
        let kp = KeyPair::generate();
        let cfg = config(4);
        let container = encrypt_bytes(b"hello world", &kp.public, &cfg);

        let mut out = Vec::new();
        let mut dec = StreamDecryptor::new(&container[..], &mut out, cfg.chunk_size, None);
        dec.run(&kp.private, cfg.integrity, None).unwrap();
        assert_eq!(dec.state, StreamState::Finalized);
    }

    #[test]
    fn progress_reports_plaintext_bytes() {
        let kp = KeyPair::generate();
        let cfg = config(10);
        let seen = Cell::new(0u64);
        let report = |n: u64| seen.set(n);

        let mut out = Vec::new();
        encrypt_stream_with_progress(&[0u8; 25][..], &mut out, &kp.public, &cfg, Some(&report))
            .unwrap();
        assert_eq!(seen.get(), 25);
    }

    #[test]
    fn digest_algorithm_must_match_config() {
        let kp = KeyPair::generate();
        let cfg = config(16);
        let container = encrypt_bytes(b"abc", &kp.public, &cfg);
        let hmac_digest = Digest::from_hex(IntegrityAlgorithm::HmacSha256, &"00".repeat(32))
            .unwrap();

        let mut out = Vec::new();
        let result =
            decrypt_stream(&container[..], &mut out, &kp.private, &cfg, Some(&hmac_digest));
        assert!(matches!(result, Err(CryptoError::Config(_))));
    }

    #[test]
    fn forged_trailer_truncation_needs_digest() {
        let kp = KeyPair::generate();
        let cfg = config(8);
        let data = [0x42u8; 32];
        let mut container = Vec::new();
        let receipt = encrypt_stream(&data[..], &mut container, &kp.public, &cfg).unwrap();

        // Drop the last 24-byte block and rewrite the trailer to match
        let trailer_at = container.len() - TRAILER_SIZE;
        let header = ContainerHeader::from_bytes(container[..HEADER_SIZE].try_into().unwrap());
        let mut seq = NonceSequencer::from_seed(header.initial_nonce);
        for _ in 0..receipt.chunks - 1 {
            seq.next_nonce().unwrap();
        }
        let mut forged = container[..trailer_at - (8 + TAG_SIZE)].to_vec();
        forged.extend_from_slice(&seq.last_issued());

        let mut out = Vec::new();
        let short = decrypt_stream(&forged[..], &mut out, &kp.private, &cfg, None).unwrap();
        assert_eq!(short.plaintext_bytes, 24);

        let mut out = Vec::new();
        let result =
            decrypt_stream(&forged[..], &mut out, &kp.private, &cfg, Some(&receipt.digest));
        assert!(matches!(result, Err(CryptoError::IntegrityMismatch { .. })));
    }

    #[test]
    fn hmac_digest_verified_on_decrypt() {
        let kp = KeyPair::generate();
        let cfg = config(8).with_integrity(IntegrityAlgorithm::HmacSha256);
        let mut container = Vec::new();
        let receipt = encrypt_stream(&b"keyed digest"[..], &mut container, &kp.public, &cfg)
            .unwrap();

        let mut out = Vec::new();
        decrypt_stream(&container[..], &mut out, &kp.private, &cfg, Some(&receipt.digest))
            .unwrap();

        let wrong = Digest::from_hex(IntegrityAlgorithm::HmacSha256, &"ab".repeat(32)).unwrap();
        let mut out = Vec::new();
        let result = decrypt_stream(&container[..], &mut out, &kp.private, &cfg, Some(&wrong));
        assert!(matches!(result, Err(CryptoError::IntegrityMismatch { .. })));
    }

    #[test]
    fn staged_output_removed_when_dropped() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("out.bin");
        {
            let mut staged = StagedOutput::create(&dest).unwrap();
            staged.writer().write_all(b"partial").unwrap();
        }
        assert!(!dest.exists());
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn staged_output_commit_persists() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("out.bin");
        let mut staged = StagedOutput::create(&dest).unwrap();
        staged.writer().write_all(b"complete").unwrap();
        staged.commit().unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"complete");
    }
}

//! JSON file backing for wrapped project keys
//!
//! ```json
//! { "1": { "salt_hex": "...", "nonce_hex": "...", "encrypted_key_hex": "..." } }
//! ```

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use dds_crypto::{CryptoError, ProjectId, RecordStore, WrappedKeyHex, WrappedKeyRecord};

pub struct JsonRecordStore {
    path: PathBuf,
    records: BTreeMap<ProjectId, WrappedKeyHex>,
}

impl JsonRecordStore {
    /// Open the key store at `path`. A missing file is an empty store.
    pub fn open(path: &Path) -> dds_crypto::Result<Self> {
        let records = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content).map_err(|e| {
                CryptoError::Collaborator(format!("parsing key store {}: {e}", path.display()))
            })?
        } else {
            BTreeMap::new()
        };
        tracing::debug!(path = %path.display(), projects = records.len(), "opened key store");
        Ok(Self {
            path: path.to_path_buf(),
            records,
        })
    }

    /// Rewrite the whole file through a temp file so a crash never leaves it
    /// half written.
    fn flush(&self) -> dds_crypto::Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let json = serde_json::to_vec_pretty(&self.records)
            .map_err(|e| CryptoError::Collaborator(format!("serializing key store: {e}")))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl RecordStore for JsonRecordStore {
    fn load_wrapped_record(
        &self,
        project: ProjectId,
    ) -> dds_crypto::Result<Option<WrappedKeyRecord>> {
        self.records
            .get(&project)
            .map(WrappedKeyRecord::from_hex)
            .transpose()
    }

    fn save_wrapped_record(
        &mut self,
        project: ProjectId,
        record: &WrappedKeyRecord,
    ) -> dds_crypto::Result<()> {
        self.records.insert(project, record.to_hex());
        self.flush()
    }
}

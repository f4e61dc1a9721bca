use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::DdsResult;
use crate::types::IntegrityAlgorithm;

/// Default plaintext chunk size for the stream cipher (64 KiB)
pub const DEFAULT_CHUNK_SIZE: u64 = 64 * 1024;

/// Top-level client configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DdsConfig {
    pub crypto: CryptoConfig,
    pub kdf: KdfConfig,
    pub integrity: IntegrityConfig,
    pub keystore: KeystoreConfig,
    pub logging: LoggingConfig,
}

impl DdsConfig {
    /// Load configuration from a TOML file, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: &Path) -> DdsResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config = toml::from_str(&content)?;
            tracing::debug!(path = %path.display(), "loaded config");
            Ok(config)
        } else {
            tracing::warn!(
                "config file not found: {}  (using defaults)",
                path.display()
            );
            Ok(Self::default())
        }
    }
}

/// Stream cipher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Plaintext bytes per encrypted chunk (default: 65536)
    pub chunk_size_bytes: u64,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    pub scrypt: ScryptConfig,
}

/// scrypt cost parameters for the passphrase-derived key-encryption key
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScryptConfig {
    /// CPU/memory cost, must be a power of two (default: 16384)
    pub n: u64,
    /// Block size (default: 8)
    pub r: u32,
    /// Parallelism (default: 1)
    pub p: u32,
}

impl Default for ScryptConfig {
    fn default() -> Self {
        Self {
            n: 1 << 14,
            r: 8,
            p: 1,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrityConfig {
    /// "sha512" (default) or "hmac_sha256"
    pub algorithm: IntegrityAlgorithm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeystoreConfig {
    /// JSON file holding the wrapped private key record of each project
    pub path: PathBuf,
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("~/.local/share/dds/keys.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Expand `~` in path to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    match s.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_default();
            PathBuf::from(home).join(rest)
        }
        None => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[crypto]
chunk_size_bytes = 4096

[kdf.scrypt]
n = 1024
r = 4
p = 2

[integrity]
algorithm = "hmac_sha256"

[keystore]
path = "/var/lib/dds/keys.json"

[logging]
level = "debug"
format = "json"
"#;
        let config: DdsConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.crypto.chunk_size_bytes, 4096);
        assert_eq!(config.kdf.scrypt.n, 1024);
        assert_eq!(config.kdf.scrypt.r, 4);
        assert_eq!(config.kdf.scrypt.p, 2);
        assert_eq!(config.integrity.algorithm, IntegrityAlgorithm::HmacSha256);
        assert_eq!(config.keystore.path, PathBuf::from("/var/lib/dds/keys.json"));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_parse_defaults() {
        let config: DdsConfig = toml::from_str("").unwrap();

        assert_eq!(config.crypto.chunk_size_bytes, 65536);
        assert_eq!(config.kdf.scrypt.n, 16384);
        assert_eq!(config.kdf.scrypt.r, 8);
        assert_eq!(config.kdf.scrypt.p, 1);
        assert_eq!(config.integrity.algorithm, IntegrityAlgorithm::Sha512);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[kdf.scrypt]
n = 2048
"#;
        let config: DdsConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert_eq!(config.kdf.scrypt.n, 2048);
        // Defaults
        assert_eq!(config.kdf.scrypt.r, 8);
        assert_eq!(config.crypto.chunk_size_bytes, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_unknown_integrity_algorithm_rejected() {
        let toml_str = r#"
[integrity]
algorithm = "md5"
"#;
        assert!(toml::from_str::<DdsConfig>(toml_str).is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = DdsConfig::load(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.crypto.chunk_size_bytes, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_load_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[crypto]\nchunk_size_bytes = 17\n").unwrap();

        let config = DdsConfig::load(&path).unwrap();
        assert_eq!(config.crypto.chunk_size_bytes, 17);
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = DdsConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: DdsConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.crypto.chunk_size_bytes, parsed.crypto.chunk_size_bytes);
        assert_eq!(config.kdf.scrypt.n, parsed.kdf.scrypt.n);
        assert_eq!(config.integrity.algorithm, parsed.integrity.algorithm);
    }

    #[test]
    fn test_expand_tilde() {
        let plain = Path::new("/etc/dds/config.toml");
        assert_eq!(expand_tilde(plain), plain.to_path_buf());
    }
}

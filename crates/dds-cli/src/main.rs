//! dds: Data Delivery System client
//!
//! Commands:
//!   keygen --project <id>                   - generate and store a project keypair
//!   pubkey --project <id>                   - print a stored project's public key
//!   encrypt <in> <out> --recipient <hex>    - encrypt a file for a project public key
//!   decrypt <in> <out> --project <id>       - decrypt a file with the project private key
//!   config show                             - display current configuration

mod passphrase;
mod store;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;

use dds_core::config::{expand_tilde, DdsConfig};
use dds_crypto::stream::{decrypt_file_with_progress, encrypt_file_with_progress};
use dds_crypto::{
    provision_project_key, unwrap_private_key, Digest, PipelineConfig, ProjectId, PublicKey,
    RecordStore,
};

use passphrase::TerminalPassphrase;
use store::JsonRecordStore;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "dds",
    version,
    about = "Data Delivery System client",
    long_about = "dds: end-to-end encrypt files for a project's public key, and decrypt them with the project's passphrase-protected private key"
)]
struct Cli {
    /// Path to config.toml
    #[arg(long, short = 'c', env = "DDS_CONFIG", default_value = "~/.config/dds/config.toml")]
    config: PathBuf,

    /// Key store file (overrides config keystore.path)
    #[arg(long, env = "DDS_KEYSTORE")]
    keystore: Option<PathBuf>,

    /// Log level filter (overrides config logging.level)
    #[arg(long, env = "DDS_LOG")]
    log: Option<String>,

    /// Log format (overrides config logging.format)
    #[arg(long, env = "DDS_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a keypair for a project and store the wrapped private key
    ///
    /// The passphrase is read from DDS_PASSPHRASE or prompted for.
    Keygen {
        #[arg(long, short = 'p')]
        project: u16,
        /// Replace an existing key for the project
        #[arg(long)]
        force: bool,
    },

    /// Print the public key of a stored project key
    Pubkey {
        #[arg(long, short = 'p')]
        project: u16,
    },

    /// Encrypt a file for a project's public key
    Encrypt {
        input: PathBuf,
        output: PathBuf,
        /// Recipient X25519 public key (64 hex chars)
        #[arg(long, short = 'r')]
        recipient: String,
    },

    /// Decrypt a file with a project's private key
    Decrypt {
        input: PathBuf,
        output: PathBuf,
        #[arg(long, short = 'p')]
        project: u16,
        /// Expected plaintext digest (hex), as printed by `dds encrypt`
        #[arg(long)]
        digest: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    // Logging is configured from the file, so notices about loading it are
    // held back until the subscriber exists
    let notices = startup_notices(&config_path);
    let config = DdsConfig::load(&config_path)
        .with_context(|| format!("loading config: {}", config_path.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.logging.level.clone());
    let format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| match config.logging.format.as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        });
    init_logging(&level, &format);
    for notice in &notices {
        tracing::warn!("{notice}");
    }

    let pipeline = PipelineConfig::from_core(&config).context("invalid configuration")?;
    let keystore_path = cli.keystore.as_deref().unwrap_or(config.keystore.path.as_path());
    let keystore_path = expand_tilde(keystore_path);

    match cli.command {
        Commands::Keygen { project, force } => {
            cmd_keygen(&pipeline, &keystore_path, ProjectId(project), force)
        }
        Commands::Pubkey { project } => cmd_pubkey(&pipeline, &keystore_path, ProjectId(project)),
        Commands::Encrypt {
            input,
            output,
            recipient,
        } => cmd_encrypt(&pipeline, &input, &output, &recipient),
        Commands::Decrypt {
            input,
            output,
            project,
            digest,
        } => cmd_decrypt(
            &pipeline,
            &keystore_path,
            &input,
            &output,
            ProjectId(project),
            digest.as_deref(),
        ),
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &config_path),
    }
}

fn startup_notices(config_path: &Path) -> Vec<String> {
    let mut notices = Vec::new();
    if !config_path.exists() {
        notices.push(format!(
            "config file not found: {}  (using defaults)",
            config_path.display()
        ));
    }
    notices
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries command output; logs go to stderr
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn make_progress_bar(total: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::with_template(
        "{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
    )
    .map(|s| s.progress_chars("=>-"))
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

// ── `dds keygen` / `dds pubkey` ───────────────────────────────────────────────

fn cmd_keygen(
    pipeline: &PipelineConfig,
    keystore_path: &Path,
    project: ProjectId,
    force: bool,
) -> Result<()> {
    let mut store = JsonRecordStore::open(keystore_path)
        .with_context(|| format!("opening key store: {}", keystore_path.display()))?;

    if !force && store.load_wrapped_record(project)?.is_some() {
        anyhow::bail!(
            "project {project} already has a key in {} (use --force to replace)",
            keystore_path.display()
        );
    }

    let passphrase =
        TerminalPassphrase::new(format!("Passphrase for project {project}: ")).confirmed();
    let public = provision_project_key(project, &passphrase, &mut store, &pipeline.scrypt)
        .context("provisioning project key")?;

    eprintln!("stored wrapped key for project {project} in {}", keystore_path.display());
    println!("{}", public.to_hex());
    Ok(())
}

fn cmd_pubkey(pipeline: &PipelineConfig, keystore_path: &Path, project: ProjectId) -> Result<()> {
    let store = JsonRecordStore::open(keystore_path)
        .with_context(|| format!("opening key store: {}", keystore_path.display()))?;
    let passphrase = TerminalPassphrase::new(format!("Passphrase for project {project}: "));
    let private = unwrap_private_key(project, &passphrase, &store, &pipeline.scrypt)
        .context("unwrapping project key")?;
    println!("{}", private.public_key().to_hex());
    Ok(())
}

// ── `dds encrypt` / `dds decrypt` ─────────────────────────────────────────────

fn cmd_encrypt(
    pipeline: &PipelineConfig,
    input: &Path,
    output: &Path,
    recipient: &str,
) -> Result<()> {
    let recipient = PublicKey::from_hex(recipient).context("parsing --recipient")?;
    let total = std::fs::metadata(input)
        .with_context(|| format!("reading {}", input.display()))?
        .len();

    let pb = make_progress_bar(total, "encrypt");
    let report = |done: u64| pb.set_position(done);
    let result = encrypt_file_with_progress(input, output, &recipient, pipeline, Some(&report));
    pb.finish_and_clear();

    let receipt = result.with_context(|| format!("encrypting {}", input.display()))?;
    eprintln!(
        "encrypted {} ({} bytes, {} chunks) -> {}",
        input.display(),
        receipt.plaintext_bytes,
        receipt.chunks,
        output.display()
    );
    println!("{}  {}", receipt.digest.algorithm(), receipt.digest.to_hex());
    Ok(())
}

fn cmd_decrypt(
    pipeline: &PipelineConfig,
    keystore_path: &Path,
    input: &Path,
    output: &Path,
    project: ProjectId,
    digest: Option<&str>,
) -> Result<()> {
    let expected = digest
        .map(|hex| Digest::from_hex(pipeline.integrity, hex))
        .transpose()
        .context("parsing --digest")?;

    let store = JsonRecordStore::open(keystore_path)
        .with_context(|| format!("opening key store: {}", keystore_path.display()))?;
    let passphrase = TerminalPassphrase::new(format!("Passphrase for project {project}: "));
    let private = unwrap_private_key(project, &passphrase, &store, &pipeline.scrypt)
        .context("unwrapping project key")?;

    let total = std::fs::metadata(input)
        .with_context(|| format!("reading {}", input.display()))?
        .len();
    let pb = make_progress_bar(total, "decrypt");
    let report = |done: u64| pb.set_position(done);
    let result = decrypt_file_with_progress(
        input,
        output,
        &private,
        pipeline,
        expected.as_ref(),
        Some(&report),
    );
    pb.finish_and_clear();

    let receipt = result.with_context(|| format!("decrypting {}", input.display()))?;
    eprintln!(
        "decrypted {} ({} bytes, {} chunks) -> {}",
        input.display(),
        receipt.plaintext_bytes,
        receipt.chunks,
        output.display()
    );
    println!("{}  {}", receipt.digest.algorithm(), receipt.digest.to_hex());
    Ok(())
}

// ── `dds config show` ─────────────────────────────────────────────────────────

fn cmd_config_show(config: &DdsConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_decrypt_with_digest() {
        let cli = Cli::try_parse_from([
            "dds", "decrypt", "in.dds", "out.bin", "--project", "4", "--digest", "abcd",
        ])
        .unwrap();
        match cli.command {
            Commands::Decrypt {
                project, digest, ..
            } => {
                assert_eq!(project, 4);
                assert_eq!(digest.as_deref(), Some("abcd"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn log_format_flag() {
        let cli =
            Cli::try_parse_from(["dds", "--log-format", "json", "config", "show"]).unwrap();
        assert!(matches!(cli.log_format, Some(LogFormat::Json)));
    }

    #[test]
    fn missing_config_reported_after_logging_starts() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("config.toml");

        let notices = startup_notices(&missing);
        assert_eq!(notices.len(), 1);
        assert!(notices[0].contains("config file not found"));

        std::fs::write(&missing, "[crypto]\nchunk_size_bytes = 4096\n").unwrap();
        assert!(startup_notices(&missing).is_empty());
    }

    #[test]
    fn project_id_out_of_range_rejected() {
        assert!(Cli::try_parse_from(["dds", "keygen", "--project", "70000"]).is_err());
    }
}

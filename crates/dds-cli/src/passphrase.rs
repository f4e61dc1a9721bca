use secrecy::{ExposeSecret, SecretString};

use dds_crypto::{CryptoError, PassphraseSource};

/// Environment variable checked before prompting on the terminal
pub const PASSPHRASE_ENV: &str = "DDS_PASSPHRASE";

/// Reads the passphrase from `DDS_PASSPHRASE`, or prompts without echo.
pub struct TerminalPassphrase {
    prompt: String,
    confirm: bool,
}

impl TerminalPassphrase {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            confirm: false,
        }
    }

    /// Ask twice and require both entries to match (interactive only)
    pub fn confirmed(mut self) -> Self {
        self.confirm = true;
        self
    }

    fn prompt(&self, text: &str) -> dds_crypto::Result<SecretString> {
        let entered = rpassword::prompt_password(text)?;
        Ok(SecretString::from(entered))
    }
}

impl PassphraseSource for TerminalPassphrase {
    fn read_passphrase(&self) -> dds_crypto::Result<SecretString> {
        if let Ok(value) = std::env::var(PASSPHRASE_ENV) {
            tracing::debug!("passphrase taken from {PASSPHRASE_ENV}");
            return non_empty(SecretString::from(value));
        }

        let first = self.prompt(&self.prompt)?;
        if self.confirm {
            let second = self.prompt("Confirm passphrase: ")?;
            if first.expose_secret() != second.expose_secret() {
                return Err(CryptoError::Collaborator("passphrases do not match".into()));
            }
        }
        non_empty(first)
    }
}

fn non_empty(passphrase: SecretString) -> dds_crypto::Result<SecretString> {
    if passphrase.expose_secret().is_empty() {
        return Err(CryptoError::Collaborator("empty passphrase".into()));
    }
    Ok(passphrase)
}

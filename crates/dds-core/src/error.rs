use thiserror::Error;

pub type DdsResult<T> = Result<T, DdsError>;

#[derive(Debug, Error)]
pub enum DdsError {
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

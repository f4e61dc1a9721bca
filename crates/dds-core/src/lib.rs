pub mod config;
pub mod error;
pub mod types;

pub use error::{DdsError, DdsResult};
pub use types::{IntegrityAlgorithm, ProjectId};

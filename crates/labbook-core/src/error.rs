use std::path::PathBuf;

use thiserror::Error;

use crate::metadata::RunStatus;

/// Error type shared across labbook crates.
#[derive(Debug, Error)]
pub enum Error {
    /// No run id could be reserved under the parent directory.
    #[error("could not allocate a run id under {} after {attempts} attempt(s)", parent.display())]
    Allocation { parent: PathBuf, attempts: u32 },
    /// A checkpoint or artifact was requested but never written.
    #[error("not found: {}", path.display())]
    NotFound { path: PathBuf },
    /// Persisted content exists but cannot be decoded.
    #[error("corrupt content at {}: {reason}", path.display())]
    Deserialization { path: PathBuf, reason: String },
    /// An object could not be encoded for storage.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// An artifact was addressed under another type's directory.
    #[error("artifact of type '{declared}' cannot be stored under '{requested}'")]
    ArtifactType {
        declared: &'static str,
        requested: String,
    },
    /// Stream, artifact or type names must be a single path component.
    #[error("invalid name '{0}'")]
    InvalidName(String),
    /// Terminal statuses cannot be changed.
    #[error("invalid status transition {from} -> {to}")]
    InvalidStatusTransition { from: RunStatus, to: RunStatus },
    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("toml decode error: {0}")]
    TomlDecode(#[from] toml::de::Error),
    #[error("toml encode error: {0}")]
    TomlEncode(#[from] toml::ser::Error),
}

impl Error {
    /// Build a [`Error::Deserialization`] for `path` from any displayable cause.
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Deserialization {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// True when the error means "nothing was written yet".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Convenience alias for results returned by labbook crates.
pub type Result<T> = std::result::Result<T, Error>;

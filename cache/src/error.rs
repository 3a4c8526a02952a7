use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the persistence layer.
///
/// The boolean API (`save`, `load`, ...) logs these and reports `false`; the
/// `try_*` variants return them to the caller.
#[derive(Debug, Error)]
pub enum PersistError {
  #[error("no storage directory is configured and no user cache directory could be found")]
  NoStorageDir,

  #[error("I/O error on {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[cfg(feature = "serde")]
  #[error("failed to encode or decode {path}: {source}")]
  Json {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("stored record belongs to cache '{found}', expected '{expected}'")]
  NameMismatch { expected: String, found: String },
}

impl PersistError {
  pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
    PersistError::Io {
      path: path.into(),
      source,
    }
  }

  #[cfg(feature = "serde")]
  pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
    PersistError::Json {
      path: path.into(),
      source,
    }
  }
}

/// A specialized `Result` type for persistence operations.
pub type Result<T, E = PersistError> = std::result::Result<T, E>;

//! Typed error taxonomy shared by the library modules.
//!
//! Each subsystem owns one enum. The CLI layer wraps them in
//! `anyhow::Error`, so every variant ends up as exit status 1 plus a
//! message on stderr.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the configuration store.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read, parsed, or written.
    #[error("configuration file {path}: {message}")]
    Io { path: PathBuf, message: String },

    /// The dot-path has no schema entry.
    #[error("unknown configuration key: '{0}'")]
    UnknownKey(String),

    /// The value does not fit the leaf's declared type.
    #[error("invalid value '{value}' for '{key}': expected {expected}")]
    TypeMismatch {
        key: String,
        expected: String,
        value: String,
    },
}

impl ConfigError {
    pub(crate) fn io(path: &std::path::Path, err: impl std::fmt::Display) -> Self {
        ConfigError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}

/// Errors raised while constructing or calling a language-model provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// A required sub-key is missing or empty. Raised before any network call.
    #[error("provider misconfigured: {0}")]
    Config(String),

    /// Network failure, timeout, or a non-retryable HTTP status.
    #[error("provider transport error: {0}")]
    Transport(String),

    /// The provider answered with something unusable.
    #[error("provider response error: {0}")]
    Response(String),
}

/// Errors raised by the embedding index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Unreadable or corrupt index artifacts. Recoverable with `--reset-index`.
    #[error("index I/O error at {path}: {message}")]
    Io { path: PathBuf, message: String },

    /// The history source could not be read.
    #[error("failed to read shell history {path}: {source}")]
    History {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl IndexError {
    pub(crate) fn io(path: &std::path::Path, err: impl std::fmt::Display) -> Self {
        IndexError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}

/// Errors raised by the suggestion pipeline.
#[derive(Debug, Error)]
pub enum SuggestError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// No single command line could be isolated from the model output.
    #[error("could not parse a command from the model response: {0}")]
    Parse(String),
}

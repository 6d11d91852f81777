// src/errors.rs

//! Crate-wide error type and helpers.

use std::path::Path;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum JobdagError {
    /// Bad caller input (invalid locator, job wired twice, ...).
    #[error("Argument error: {0}")]
    Argument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Filesystem, lock or launch failure with the operation that caused it.
    #[error("IO error while {context}: {source}")]
    IoContext {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// An invariant of the dependency graph was violated.
    #[error("Assertion failed: {0}")]
    Assertion(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cycle detected in job graph: {0}")]
    DagCycle(String),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("File watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl JobdagError {
    pub fn argument(msg: impl Into<String>) -> Self {
        JobdagError::Argument(msg.into())
    }

    pub fn assertion(msg: impl Into<String>) -> Self {
        JobdagError::Assertion(msg.into())
    }

    /// True for the IO flavours (plain or with context).
    pub fn is_io(&self) -> bool {
        matches!(self, JobdagError::Io(_) | JobdagError::IoContext { .. })
    }
}

/// Attach a human-readable context to `std::io` results, in the spirit of
/// `anyhow::Context` but keeping the typed error.
pub trait IoResultExt<T> {
    fn io_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;

    fn with_path(self, action: &str, path: &Path) -> Result<T>;
}

impl<T> IoResultExt<T> for std::result::Result<T, std::io::Error> {
    fn io_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|source| JobdagError::IoContext {
            context: f().into(),
            source,
        })
    }

    fn with_path(self, action: &str, path: &Path) -> Result<T> {
        self.io_context(|| format!("{action} {}", path.display()))
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, JobdagError>;

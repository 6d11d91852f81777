// src/connector/mod.rs

//! Access to the machine jobs run on.
//!
//! The job protocol talks to a `Connector` instead of calling `std::fs` and
//! `tokio::process` directly, so the same protocol can drive other hosts.
//! [`LocalConnector`] is the implementation for the current machine.

pub mod local;
pub mod lock;
pub mod process;

use std::path::Path;

use crate::errors::Result;
use crate::sync::BoxFuture;
use crate::types::FileType;

pub use local::{LocalConnector, LocalOptions};
pub use lock::FileLock;
pub use process::{LocalProcess, Process, ProcessSpec, Redirect};

pub trait Connector: Send + Sync + std::fmt::Debug {
    fn mkdirs(&self, path: &Path, recursive: bool) -> Result<()>;

    fn file_type(&self, path: &Path) -> Result<FileType>;

    /// Path as the launched processes will see it.
    fn resolve(&self, path: &Path) -> Result<String>;

    fn write_file(&self, path: &Path, contents: &str) -> Result<()>;

    fn set_executable(&self, path: &Path) -> Result<()>;

    /// Exclusive lock on `path`, waiting until it can be taken.
    fn lock<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<FileLock>>;

    fn start(&self, spec: ProcessSpec) -> Result<Box<dyn Process>>;
}

// src/connector/local.rs

use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::connector::lock::{self, FileLock};
use crate::connector::process::{LocalProcess, Process, ProcessSpec};
use crate::connector::Connector;
use crate::errors::{IoResultExt, Result};
use crate::sync::BoxFuture;
use crate::types::FileType;

#[derive(Debug, Clone)]
pub struct LocalOptions {
    /// Re-poll period while waiting for a lock, in case a removal event
    /// is missed.
    pub lock_retry_interval: Duration,
}

impl Default for LocalOptions {
    fn default() -> Self {
        Self {
            lock_retry_interval: Duration::from_secs(1),
        }
    }
}

/// Connector for the current machine.
#[derive(Debug, Clone, Default)]
pub struct LocalConnector {
    options: LocalOptions,
}

impl LocalConnector {
    pub fn new(options: LocalOptions) -> Self {
        Self { options }
    }
}

impl Connector for LocalConnector {
    fn mkdirs(&self, path: &Path, recursive: bool) -> Result<()> {
        debug!(path = %path.display(), recursive, "mkdirs");
        let res = if recursive {
            fs::create_dir_all(path)
        } else {
            match fs::create_dir(path) {
                Err(err) if err.kind() == ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
                other => other,
            }
        };
        res.with_path("creating directory", path)
    }

    fn file_type(&self, path: &Path) -> Result<FileType> {
        match fs::metadata(path) {
            Ok(meta) if meta.is_file() => Ok(FileType::File),
            Ok(meta) if meta.is_dir() => Ok(FileType::Directory),
            Ok(_) => Ok(FileType::Other),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(FileType::Missing),
            Err(err) => Err(err).with_path("inspecting", path),
        }
    }

    fn resolve(&self, path: &Path) -> Result<String> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .io_context(|| "reading current directory")?
                .join(path)
        };
        Ok(absolute.to_string_lossy().into_owned())
    }

    fn write_file(&self, path: &Path, contents: &str) -> Result<()> {
        fs::write(path, contents).with_path("writing", path)
    }

    fn set_executable(&self, path: &Path) -> Result<()> {
        fs::set_permissions(path, fs::Permissions::from_mode(0o750))
            .with_path("changing permissions of", path)
    }

    fn lock<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<FileLock>> {
        Box::pin(lock::acquire(path, self.options.lock_retry_interval))
    }

    fn start(&self, spec: ProcessSpec) -> Result<Box<dyn Process>> {
        Ok(Box::new(LocalProcess::spawn(&spec)?))
    }
}

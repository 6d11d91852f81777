// src/connector/lock.rs

//! Exclusive filesystem locks.
//!
//! A lock is a plain file created with `O_CREAT | O_EXCL`. Whoever manages to
//! create it owns it. Waiters watch the parent directory and retry when an
//! entry disappears; a periodic re-poll covers missed events.

use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::{IoResultExt, JobdagError, Result};

/// An acquired lock file.
///
/// Dropping the handle removes the file unless it was [`detach`]ed, in which
/// case the file now belongs to someone else (the job script).
///
/// [`detach`]: FileLock::detach
#[derive(Debug)]
#[must_use = "dropping a lock removes the lock file"]
pub struct FileLock {
    path: PathBuf,
    detached: bool,
}

impl FileLock {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hand the lock file over; the handle will no longer remove it.
    pub fn detach(mut self) -> PathBuf {
        self.detached = true;
        std::mem::take(&mut self.path)
    }

    /// Remove the lock file now, reporting any error.
    pub fn release(mut self) -> Result<()> {
        self.detached = true;
        fs::remove_file(&self.path).with_path("removing lock", &self.path)
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if self.detached {
            return;
        }
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %err, "failed to remove lock file");
            }
        }
    }
}

/// Take the lock at `path`, waiting for the current holder to remove it.
///
/// Fails right away when `path` exists and is not a regular file.
pub async fn acquire(path: &Path, retry_interval: Duration) -> Result<FileLock> {
    debug!(path = %path.display(), "trying to lock");
    loop {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                // The content is informative only.
                let _ = writeln!(file, "{}", std::process::id());
                debug!(path = %path.display(), "lock acquired");
                return Ok(FileLock {
                    path: path.to_path_buf(),
                    detached: false,
                });
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                match fs::symlink_metadata(path) {
                    Ok(meta) if !meta.is_file() => {
                        return Err(JobdagError::IoContext {
                            context: format!("locking {}", path.display()),
                            source: io::Error::other(format!(
                                "lock path {} already exists and is not a file",
                                path.display()
                            )),
                        });
                    }
                    Ok(_) => {
                        info!(path = %path.display(), "waiting for lock file");
                        wait_for_removal(path, retry_interval).await?;
                    }
                    // Removed between the create and the stat: try again.
                    Err(err) if err.kind() == ErrorKind::NotFound => continue,
                    Err(err) => return Err(err).with_path("inspecting lock", path),
                }
            }
            Err(err) => return Err(err).with_path("creating lock", path),
        }
    }
}

/// Resolve once `path` no longer exists, or after `retry_interval`.
///
/// Returning early is harmless: the caller simply retries the create.
async fn wait_for_removal(path: &Path, retry_interval: Duration) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            // Errors are covered by the periodic re-poll.
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        },
        Config::default(),
    )?;
    watcher.watch(&parent, RecursiveMode::NonRecursive)?;

    // The holder may have gone away before the watch was installed.
    if !path.exists() {
        return Ok(());
    }

    let deadline = tokio::time::sleep(retry_interval);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { return Ok(()) };
                // Renames out of the directory show up as modify events on some backends.
                let relevant = matches!(event.kind, EventKind::Remove(_) | EventKind::Modify(_) | EventKind::Any);
                if relevant && !path.exists() {
                    debug!(path = %path.display(), "lock file removed");
                    return Ok(());
                }
            }
            _ = &mut deadline => {
                debug!(path = %path.display(), "lock wait timed out, polling again");
                return Ok(());
            }
        }
    }
}

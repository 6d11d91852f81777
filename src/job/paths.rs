// src/job/paths.rs

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::job::locator::Locator;

/// On-disk layout of one job: `<jobs_dir>/<locator>.<ext>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    base: PathBuf,
}

impl JobPaths {
    pub fn new(jobs_dir: &Path, locator: &Locator) -> Self {
        Self {
            base: jobs_dir.join(locator.as_path()),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Directory holding the job files.
    pub fn directory(&self) -> &Path {
        self.base.parent().unwrap_or(&self.base)
    }

    fn with_ext(&self, ext: &str) -> PathBuf {
        let mut name: OsString = self.base.as_os_str().to_owned();
        name.push(".");
        name.push(ext);
        PathBuf::from(name)
    }

    pub fn out(&self) -> PathBuf {
        self.with_ext("out")
    }

    pub fn err(&self) -> PathBuf {
        self.with_ext("err")
    }

    pub fn code(&self) -> PathBuf {
        self.with_ext("code")
    }

    pub fn lock(&self) -> PathBuf {
        self.with_ext("lock")
    }

    pub fn start_lock(&self) -> PathBuf {
        self.with_ext("lock.start")
    }

    pub fn done(&self) -> PathBuf {
        self.with_ext("done")
    }

    pub fn pid(&self) -> PathBuf {
        self.with_ext("pid")
    }

    pub fn script(&self) -> PathBuf {
        self.with_ext("sh")
    }
}

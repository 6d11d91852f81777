// src/job/body.rs

//! Pluggable job bodies.
//!
//! The dispatcher talks to a `JobBody` instead of spawning processes
//! itself. Production jobs use [`CommandLineJob`](crate::job::CommandLineJob);
//! tests provide bodies that record what ran and finish without touching
//! the filesystem.

use crate::errors::Result;
use crate::job::Job;
use crate::job::paths::JobPaths;
use crate::sync::{BoxFuture, KillSwitch};

/// How a body finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// A done marker was found; nothing was launched.
    AlreadyDone,
    /// The launched process exited with this status.
    Exited(i32),
}

impl RunOutcome {
    pub fn succeeded(self) -> bool {
        matches!(self, RunOutcome::AlreadyDone | RunOutcome::Exited(0))
    }
}

/// Everything a body needs for one execution attempt.
pub struct RunContext<'a> {
    pub job: &'a Job,
    pub paths: JobPaths,
    /// Triggered when the workspace shuts down; running processes should be
    /// killed, with the harsher signal if [`KillSwitch::is_forced`].
    pub kill: KillSwitch,
}

impl RunContext<'_> {
    /// Report that the process has been launched (`READY -> RUNNING`).
    pub fn mark_running(&self) -> Result<()> {
        self.job.mark_running()
    }
}

/// What a job actually does once the dispatcher admits it.
///
/// An `Err` means the attempt could not be set up (filesystem, lock or
/// launch failure). A nonzero exit is a normal `Ok(RunOutcome::Exited(_))`.
pub trait JobBody: Send + Sync + std::fmt::Debug {
    fn run<'a>(&'a self, ctx: RunContext<'a>) -> BoxFuture<'a, Result<RunOutcome>>;
}

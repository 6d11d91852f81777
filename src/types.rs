use std::fmt;
use std::str::FromStr;

/// Execution state of a job.
///
/// Possible paths:
/// - `Waiting <-> Ready -> Running -> { Done, Error }`
/// - `Ready -> Done` when a done marker from an earlier run is found
/// - `{ Waiting, Ready } -> Error` when an upstream job failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    /// Some dependencies are not satisfied yet.
    Waiting,
    /// All dependencies are satisfied; waiting for a worker slot.
    Ready,
    /// The job process has been launched.
    Running,
    /// Completed (exit status 0, or done marker already present).
    Done,
    /// The process failed, or a dependency can no longer be satisfied.
    Error,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Error)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Waiting => "WAITING",
            JobState::Ready => "READY",
            JobState::Running => "RUNNING",
            JobState::Done => "DONE",
            JobState::Error => "ERROR",
        };
        f.write_str(s)
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "waiting" => Ok(JobState::Waiting),
            "ready" => Ok(JobState::Ready),
            "running" => Ok(JobState::Running),
            "done" => Ok(JobState::Done),
            "error" => Ok(JobState::Error),
            other => Err(format!("invalid job state: {other}")),
        }
    }
}

/// What a connector finds at a given path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    File,
    Directory,
    Other,
    Missing,
}

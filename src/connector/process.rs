// src/connector/process.rs

//! Launched job processes.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::errors::{IoResultExt, Result};
use crate::sync::BoxFuture;

/// Where a standard stream of the process goes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Redirect {
    #[default]
    Inherit,
    Null,
    /// Truncate and write to this file.
    File(PathBuf),
}

impl Redirect {
    fn to_stdio(&self) -> Result<Stdio> {
        Ok(match self {
            Redirect::Inherit => Stdio::inherit(),
            Redirect::Null => Stdio::null(),
            Redirect::File(path) => {
                let file: File = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)
                    .with_path("opening output", path)?;
                Stdio::from(file)
            }
        })
    }
}

/// What to launch.
#[derive(Debug, Clone, Default)]
pub struct ProcessSpec {
    /// Program followed by its arguments.
    pub command: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
    pub stdout: Redirect,
    pub stderr: Redirect,
}

/// A running (or finished) process started by a connector.
pub trait Process: Send + std::fmt::Debug {
    fn id(&self) -> Option<u32>;

    /// Wait for the process; a death by signal `n` maps to `128 + n`.
    fn exit_code(&mut self) -> BoxFuture<'_, Result<i32>>;

    /// Ask the process (group) to stop: SIGINT, or SIGTERM when `force`.
    fn kill(&mut self, force: bool) -> Result<()>;
}

/// Process started on this machine in its own process group.
#[derive(Debug)]
pub struct LocalProcess {
    child: Child,
    pid: Option<u32>,
}

impl LocalProcess {
    pub fn spawn(spec: &ProcessSpec) -> Result<Self> {
        let Some((program, args)) = spec.command.split_first() else {
            return Err(crate::errors::JobdagError::argument("empty command line"));
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&spec.environment)
            .stdin(Stdio::null())
            .stdout(spec.stdout.to_stdio()?)
            .stderr(spec.stderr.to_stdio()?)
            .process_group(0);
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }

        let child = cmd
            .spawn()
            .io_context(|| format!("spawning process '{program}'"))?;
        let pid = child.id();
        info!(pid, program = %program, "process started");
        Ok(Self { child, pid })
    }
}

impl Process for LocalProcess {
    fn id(&self) -> Option<u32> {
        self.pid
    }

    fn exit_code(&mut self) -> BoxFuture<'_, Result<i32>> {
        Box::pin(async move {
            let status = self
                .child
                .wait()
                .await
                .io_context(|| format!("waiting for process {:?}", self.pid))?;
            let code = match (status.code(), status.signal()) {
                (Some(code), _) => code,
                (None, Some(signal)) => 128 + signal,
                (None, None) => -1,
            };
            debug!(pid = self.pid, code, "process exited");
            Ok(code)
        })
    }

    fn kill(&mut self, force: bool) -> Result<()> {
        let Some(pid) = self.pid else {
            debug!("kill requested for a process that already exited");
            return Ok(());
        };
        let signal = if force { libc::SIGTERM } else { libc::SIGINT };
        info!(pid, signal, "signalling process group");

        // SAFETY: plain syscall; a negative pid addresses the process group
        // created by `process_group(0)` at spawn.
        let rc = unsafe { libc::kill(-(pid as libc::pid_t), signal) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ESRCH) {
                debug!(pid, "process group already gone");
                return Ok(());
            }
            warn!(pid, error = %err, "failed to signal process group");
            return Err(err).io_context(|| format!("signalling process group {pid}"));
        }
        Ok(())
    }
}

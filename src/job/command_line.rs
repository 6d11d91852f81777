// src/job/command_line.rs

//! Crash-resumable shell jobs.
//!
//! Every attempt follows the same protocol, so that a run killed at any
//! point can be restarted and resumes where it stopped:
//!
//! 1. a done marker from an earlier run means there is nothing to do;
//! 2. the job directory is created;
//! 3. the job lock is taken (waiting for another holder to finish) and the
//!    done marker is checked again;
//! 4. the script is written and the start lock is taken;
//! 5. the script is launched with its output redirected to the job files;
//! 6. both locks are handed over to the script, which removes them;
//! 7. the exit status decides between `DONE` and `ERROR`.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::connector::{Connector, LocalConnector, ProcessSpec, Redirect};
use crate::errors::Result;
use crate::job::body::{JobBody, RunContext, RunOutcome};
use crate::script::{CommandLine, ScriptBuilder, ScriptRequest, ShScriptBuilder};
use crate::sync::BoxFuture;
use crate::types::FileType;

/// Where and how command-line jobs are launched.
#[derive(Debug, Clone)]
pub struct Launcher {
    pub connector: Arc<dyn Connector>,
    pub script_builder: Arc<dyn ScriptBuilder>,
    /// Exported to every job, before the job's own environment.
    pub environment: BTreeMap<String, String>,
}

impl Launcher {
    pub fn new(connector: Arc<dyn Connector>, script_builder: Arc<dyn ScriptBuilder>) -> Self {
        Self {
            connector,
            script_builder,
            environment: BTreeMap::new(),
        }
    }

    /// Local machine, `/bin/sh` scripts.
    pub fn local() -> Self {
        Self::new(
            Arc::new(LocalConnector::default()),
            Arc::new(ShScriptBuilder::default()),
        )
    }
}

#[derive(Debug, Clone)]
pub struct CommandLineJob {
    command: CommandLine,
    environment: BTreeMap<String, String>,
    launcher: Launcher,
}

impl CommandLineJob {
    pub fn new(command: CommandLine, launcher: Launcher) -> Self {
        Self {
            command,
            environment: BTreeMap::new(),
            launcher,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn command(&self) -> &CommandLine {
        &self.command
    }

    fn is_done(&self, ctx: &RunContext<'_>) -> Result<bool> {
        Ok(self.launcher.connector.file_type(&ctx.paths.done())? == FileType::File)
    }

    async fn execute(&self, ctx: RunContext<'_>) -> Result<RunOutcome> {
        let connector = self.launcher.connector.as_ref();
        let locator = ctx.job.locator();
        let paths = &ctx.paths;

        if self.is_done(&ctx)? {
            info!(%locator, "done marker found, skipping");
            return Ok(RunOutcome::AlreadyDone);
        }

        connector.mkdirs(paths.directory(), true)?;

        let lock = connector.lock(&paths.lock()).await?;
        // Another process may have completed the job while we waited.
        if self.is_done(&ctx)? {
            info!(%locator, "job completed while waiting for its lock");
            return Ok(RunOutcome::AlreadyDone);
        }

        let mut environment = self.launcher.environment.clone();
        environment.extend(self.environment.clone());

        let script = self.launcher.script_builder.write(&ScriptRequest {
            connector,
            locator,
            paths,
            command: &self.command,
            environment: &environment,
            lock_files: vec![lock.path().to_path_buf()],
            start_lock: Some(paths.start_lock()),
            working_dir: Some(paths.directory().to_path_buf()),
        })?;
        let start_lock = connector.lock(&paths.start_lock()).await?;

        let script = connector.resolve(&script)?;
        let mut process = connector.start(ProcessSpec {
            command: self.launcher.script_builder.launch_command(&script),
            stdout: Redirect::File(paths.out()),
            stderr: Redirect::File(paths.err()),
            ..ProcessSpec::default()
        })?;

        // From here on the locks belong to the script.
        lock.detach();
        start_lock.detach();
        ctx.mark_running()?;

        if let Some(pid) = process.id() {
            if let Err(err) = connector.write_file(&paths.pid(), &format!("{pid}\n")) {
                warn!(%locator, error = %err, "could not write pid file");
            }
        }

        let code = tokio::select! {
            code = process.exit_code() => code?,
            _ = ctx.kill.triggered() => {
                let force = ctx.kill.is_forced();
                info!(%locator, force, "shutdown requested, killing job process");
                process.kill(force)?;
                if force {
                    process.exit_code().await?
                } else {
                    tokio::select! {
                        code = process.exit_code() => code?,
                        _ = ctx.kill.forced() => {
                            info!(%locator, "forced shutdown, terminating job process");
                            process.kill(true)?;
                            process.exit_code().await?
                        }
                    }
                }
            }
        };

        debug!(%locator, code, "job process exited");
        Ok(RunOutcome::Exited(code))
    }
}

impl JobBody for CommandLineJob {
    fn run<'a>(&'a self, ctx: RunContext<'a>) -> BoxFuture<'a, Result<RunOutcome>> {
        Box::pin(self.execute(ctx))
    }
}

// src/lib.rs

pub mod cli;
pub mod config;
pub mod connector;
pub mod dag;
pub mod errors;
pub mod job;
pub mod logging;
pub mod plan;
pub mod script;
pub mod sync;
pub mod token;
pub mod types;
pub mod workspace;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::PlanFile;
use crate::connector::{LocalConnector, LocalOptions};
use crate::job::{JobPaths, Launcher, Locator};
use crate::plan::{PlannedRun, build_jobs};
use crate::script::ShScriptBuilder;
use crate::types::JobState;
use crate::workspace::{WaitOutcome, Workspace, WorkspaceOptions, wait_until_completed};

pub use crate::errors::JobdagError;
pub use crate::job::{CommandLineJob, Job};
pub use crate::token::CounterToken;

/// How long killed jobs get to exit before the harsher signal.
const KILL_GRACE: Duration = Duration::from_secs(10);

/// Final state of a CLI run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub done: Vec<Locator>,
    pub failed: Vec<Locator>,
    /// Not finished when the run stopped (waiting, ready or running).
    pub pending: Vec<Locator>,
    pub setup_failed: Vec<Locator>,
    pub interrupted: bool,
}

impl RunSummary {
    pub fn success(&self) -> bool {
        self.failed.is_empty()
            && self.setup_failed.is_empty()
            && self.pending.is_empty()
            && !self.interrupted
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "jobdag: {} done, {} failed, {} pending{}",
            self.done.len(),
            self.failed.len(),
            self.pending.len(),
            if self.interrupted { " (interrupted)" } else { "" }
        )?;
        for locator in &self.failed {
            writeln!(f, "  failed: {locator}")?;
        }
        for locator in &self.setup_failed {
            writeln!(f, "  setup failed: {locator}")?;
        }
        Ok(())
    }
}

/// High-level entry point used by `main.rs`.
///
/// Loads the plan, submits every job to a workspace, waits on the global
/// barrier and reports what happened. The CLI stops at the first setup
/// failure or interrupt: no new job is started, running jobs keep going (or
/// are killed with `[config].kill_on_interrupt`).
pub async fn run(args: CliArgs) -> Result<RunSummary> {
    let plan_path = PathBuf::from(&args.plan);
    let plan = load_and_validate(&plan_path)
        .with_context(|| format!("loading plan {}", plan_path.display()))?;
    let workdir = resolve_workdir(&plan_path, &plan.config.workdir);

    let launcher = Launcher::new(
        Arc::new(LocalConnector::new(LocalOptions {
            lock_retry_interval: Duration::from_millis(plan.config.lock_retry_ms),
        })),
        Arc::new(ShScriptBuilder::default()),
    );
    let planned = build_jobs(&plan, &launcher)?;

    if args.dry_run {
        print_dry_run(&plan, &planned, &workdir);
        return Ok(RunSummary::default());
    }

    let mut options = WorkspaceOptions::default();
    if let Some(n) = args.max_jobs {
        options.max_jobs = usize::try_from(n).context("--max-jobs is too large")?;
    } else if let Some(n) = plan.config.max_jobs {
        options.max_jobs = n;
    }

    let workspace = Workspace::with_options(&workdir, options)?;
    for (name, job) in &planned.jobs {
        debug!(job = %name, "submitting");
        workspace.submit(Arc::clone(job))?;
    }
    info!(jobs = workspace.len(), dir = %workdir.display(), "plan submitted");

    let mut summary = RunSummary::default();
    match wait_until_completed().await {
        WaitOutcome::Completed => info!("all jobs finished"),
        WaitOutcome::Interrupted => {
            summary.interrupted = true;
            workspace.stop_dispatching();
            if plan.config.kill_on_interrupt {
                stop_running_jobs(&workspace).await;
            } else {
                warn!("interrupted; running jobs are left to finish on their own");
            }
        }
        WaitOutcome::SetupFailed(locators) => {
            for locator in &locators {
                let reason = workspace.job(locator).and_then(|j| j.last_error());
                error!(%locator, error = reason.as_deref().unwrap_or("unknown"), "job could not be started");
            }
            summary.setup_failed = locators;
            workspace.stop_dispatching();
            info!("waiting for running jobs before stopping");
            workspace.drain().await;
        }
    }

    for (locator, state) in workspace.states() {
        match state {
            JobState::Done => summary.done.push(locator),
            JobState::Error => summary.failed.push(locator),
            _ => summary.pending.push(locator),
        }
    }
    Ok(summary)
}

async fn stop_running_jobs(workspace: &Workspace) {
    workspace.shutdown(false);
    if tokio::time::timeout(KILL_GRACE, workspace.drain()).await.is_ok() {
        return;
    }
    warn!(grace = ?KILL_GRACE, "jobs ignored SIGINT, sending SIGTERM");
    workspace.shutdown(true);
    if tokio::time::timeout(KILL_GRACE, workspace.drain()).await.is_err() {
        error!("jobs are still running after SIGTERM");
    }
}

/// `workdir` is relative to the directory holding the plan file.
fn resolve_workdir(plan_path: &Path, workdir: &Path) -> PathBuf {
    if workdir.is_absolute() {
        return workdir.to_path_buf();
    }
    match plan_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(workdir),
        _ => workdir.to_path_buf(),
    }
}

/// Print jobs, locators, dependencies and whether each is already done.
fn print_dry_run(plan: &PlanFile, planned: &PlannedRun, workdir: &Path) {
    println!("jobdag dry-run");
    println!("  config.workdir = {}", workdir.display());
    match plan.config.max_jobs {
        Some(n) => println!("  config.max_jobs = {n}"),
        None => println!("  config.max_jobs = (available parallelism)"),
    }
    println!("  config.kill_on_interrupt = {}", plan.config.kill_on_interrupt);
    println!();

    if !planned.tokens.is_empty() {
        println!("tokens ({}):", planned.tokens.len());
        for (name, token) in &planned.tokens {
            println!("  - {name}: limit {}", token.limit());
        }
        println!();
    }

    let jobs_dir = workdir.join("jobs");
    println!("jobs ({}, in submission order):", planned.jobs.len());
    for (name, job) in &planned.jobs {
        let Some(cfg) = plan.job.get(name) else {
            continue;
        };
        let done = JobPaths::new(&jobs_dir, job.locator()).done().is_file();
        println!("  - {name}{}", if done { " [done]" } else { "" });
        println!("      locator: {}", job.locator());
        println!("      cmd: {}", cfg.cmd);
        if !cfg.after.is_empty() {
            println!("      after: {:?}", cfg.after);
        }
        if !cfg.tokens.is_empty() {
            println!("      tokens: {:?}", cfg.tokens);
        }
        if !cfg.env.is_empty() {
            println!("      env: {:?}", cfg.env);
        }
    }

    debug!("dry-run complete (no execution)");
}

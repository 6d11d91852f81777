// src/workspace/dispatcher.rs

//! Bounded dispatch of ready jobs.
//!
//! One loop per workspace pops the best ready job once a worker permit is
//! free, and runs each admitted attempt on its own tokio task. Stale queue
//! entries (older tickets, jobs that went back to waiting) are skipped.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::job::{Job, JobPaths, RunContext, RunOutcome};
use crate::types::JobState;
use crate::workspace::WorkspaceShared;

pub(crate) fn spawn(handle: &Handle, shared: Arc<WorkspaceShared>) -> JoinHandle<()> {
    handle.spawn(run(shared))
}

async fn run(shared: Arc<WorkspaceShared>) {
    info!(dir = %shared.dir.display(), max_jobs = shared.max_jobs, "dispatcher started");

    loop {
        let permit = tokio::select! {
            _ = shared.closed.cancelled() => break,
            _ = shared.kill.triggered() => break,
            permit = Arc::clone(&shared.permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let entry = tokio::select! {
            _ = shared.closed.cancelled() => break,
            _ = shared.kill.triggered() => break,
            entry = shared.queue.pop_wait() => entry,
        };

        // Counted before `begin` so a barrier never sees a stopped
        // workspace while an admitted attempt is on its way.
        shared.attempt_started();
        if !entry.job.begin(entry.ticket) {
            shared.attempt_ended();
            continue;
        }
        debug!(locator = %entry.job.locator(), queued = shared.queue.len(), "dispatching job");

        let shared = Arc::clone(&shared);
        tokio::spawn(async move {
            execute(&shared, entry.job).await;
            drop(permit);
            shared.attempt_ended();
        });
    }

    info!(dir = %shared.dir.display(), "dispatcher stopped");
}

/// One attempt of an admitted job.
async fn execute(shared: &WorkspaceShared, job: Arc<Job>) {
    let claims = match job.claim_tokens() {
        Ok(Some(claims)) => claims,
        Ok(None) => {
            job.park_blocked();
            return;
        }
        Err(err) => {
            job.setup_failed(&err);
            return;
        }
    };

    debug!(locator = %job.locator(), tokens = claims.len(), "job admitted");
    let ctx = RunContext {
        job: &job,
        paths: JobPaths::new(&shared.jobs_dir(), job.locator()),
        kill: shared.kill.clone(),
    };
    let result = job.body().run(ctx).await;

    // Capacity goes back before dependents hear about the outcome.
    for claim in claims {
        claim.release();
    }

    match result {
        Ok(outcome) if outcome.succeeded() => job.finish(JobState::Done),
        Ok(outcome) => {
            if let RunOutcome::Exited(code) = outcome {
                warn!(locator = %job.locator(), code, "job exited with an error");
            }
            job.finish(JobState::Error);
        }
        Err(err) => job.setup_failed(&err),
    }
}

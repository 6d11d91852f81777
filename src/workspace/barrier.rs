// src/workspace/barrier.rs

//! Process-wide completion barrier.
//!
//! Every live workspace is registered here. Waiters sleep on a generation
//! counter that is bumped whenever a job enters or leaves a waiting set, or
//! a setup failure is reported.

use std::sync::{Arc, LazyLock, Mutex, Weak};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::job::Locator;
use crate::sync::lock;
use crate::workspace::WorkspaceShared;

static REGISTRY: LazyLock<Mutex<Vec<Weak<WorkspaceShared>>>> =
    LazyLock::new(|| Mutex::new(Vec::new()));

static GENERATION: LazyLock<watch::Sender<u64>> = LazyLock::new(|| watch::channel(0).0);

/// Why a barrier wait returned.
///
/// A workspace that was shut down or stopped dispatching, and has no
/// attempt left executing, ends the wait with `Interrupted` while it still
/// has waiting jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// No job is waiting anymore.
    Completed,
    /// The wait was interrupted; jobs keep running.
    Interrupted,
    /// These jobs could not be set up; they stay `READY` until retried.
    SetupFailed(Vec<Locator>),
}

pub(crate) fn register(workspace: &Arc<WorkspaceShared>) {
    let mut registry = lock(&REGISTRY);
    registry.retain(|w| w.strong_count() > 0);
    registry.push(Arc::downgrade(workspace));
    drop(registry);
    notify_change();
}

pub(crate) fn notify_change() {
    GENERATION.send_modify(|generation| *generation = generation.wrapping_add(1));
}

fn live_workspaces() -> Vec<Arc<WorkspaceShared>> {
    let mut registry = lock(&REGISTRY);
    registry.retain(|w| w.strong_count() > 0);
    registry.iter().filter_map(Weak::upgrade).collect()
}

/// Total number of waiting jobs across every live workspace.
pub fn global_waiting_count() -> usize {
    live_workspaces().iter().map(|ws| ws.waiting_count()).sum()
}

/// Block until no job of any workspace is waiting, or Ctrl-C.
///
/// An interrupt only ends the wait; use
/// [`Workspace::shutdown`](crate::workspace::Workspace::shutdown) to stop
/// running jobs.
pub async fn wait_until_completed() -> WaitOutcome {
    let interrupt = CancellationToken::new();
    let listener = {
        let interrupt = interrupt.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("interrupt received, leaving barrier");
                    interrupt.cancel();
                }
                Err(err) => warn!(error = %err, "failed to listen for Ctrl+C"),
            }
        })
    };

    let outcome = wait_until_completed_or(&interrupt).await;
    listener.abort();
    outcome
}

/// [`wait_until_completed`] with a caller-controlled interrupt.
pub async fn wait_until_completed_or(interrupt: &CancellationToken) -> WaitOutcome {
    wait_on(live_workspaces, interrupt).await
}

/// Barrier over the workspaces returned by `workspaces`.
pub(crate) async fn wait_on<F>(workspaces: F, interrupt: &CancellationToken) -> WaitOutcome
where
    F: Fn() -> Vec<Arc<WorkspaceShared>>,
{
    let mut changes = GENERATION.subscribe();
    loop {
        changes.borrow_and_update();

        let (failures, waiting, stranded) = {
            let current = workspaces();
            let failures: Vec<Locator> = current
                .iter()
                .flat_map(|ws| ws.take_setup_failures())
                .collect();
            let waiting: usize = current.iter().map(|ws| ws.waiting_count()).sum();
            let stranded: usize = current
                .iter()
                .filter(|ws| ws.is_stopped())
                .map(|ws| ws.waiting_count())
                .sum();
            (failures, waiting, stranded)
        };

        if !failures.is_empty() {
            warn!(count = failures.len(), "barrier: job setup failed");
            return WaitOutcome::SetupFailed(failures);
        }
        if waiting == 0 {
            debug!("barrier: all jobs completed");
            return WaitOutcome::Completed;
        }
        if interrupt.is_cancelled() {
            return WaitOutcome::Interrupted;
        }
        if stranded > 0 {
            info!(stranded, "barrier: workspace stopped with jobs left waiting");
            return WaitOutcome::Interrupted;
        }

        debug!(waiting, "barrier: waiting for jobs");
        tokio::select! {
            changed = changes.changed() => {
                // The sender is a static and never goes away.
                if changed.is_err() {
                    return WaitOutcome::Interrupted;
                }
            }
            _ = interrupt.cancelled() => return WaitOutcome::Interrupted,
        }
    }
}

// src/job/mod.rs

//! Jobs: graph resources with an execution state machine.
//!
//! A [`Job`] counts how many of its dependencies are unsatisfied. When the
//! count reaches zero after submission it becomes `READY` and is queued in
//! its workspace; the dispatcher then runs its [`JobBody`]. When the job
//! reaches `DONE` or `ERROR` it tells its workspace and re-checks its own
//! dependents, which is how readiness cascades through the graph.

pub mod body;
pub mod command_line;
pub mod locator;
pub mod paths;
pub mod priority;

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, Weak};

use chrono::{DateTime, Utc};
use tracing::{debug, info, trace, warn};

use crate::dag::dependency::{Condition, Dependency};
use crate::dag::resource::{Resource, ResourceNode};
use crate::errors::{JobdagError, Result};
use crate::sync::lock;
use crate::token::{CounterToken, TokenClaim};
use crate::types::JobState;
use crate::workspace::WorkspaceShared;

pub use body::{JobBody, RunContext, RunOutcome};
pub use command_line::{CommandLineJob, Launcher};
pub use locator::{Identity, Locator};
pub use paths::JobPaths;
pub use priority::JobPriority;

#[derive(Debug)]
struct JobStatus {
    state: JobState,
    unsatisfied: usize,
    submitted_at: Option<DateTime<Utc>>,
    /// Set by the dispatcher between `begin` and the end of the attempt.
    in_flight: bool,
    /// Generation of the current ready-queue entry; stale entries are skipped.
    ticket: u64,
    last_error: Option<String>,
}

pub struct Job {
    node: ResourceNode,
    locator: Locator,
    body: Box<dyn JobBody>,
    dependencies: Mutex<Vec<Arc<Dependency>>>,
    status: Mutex<JobStatus>,
    workspace: OnceLock<Weak<WorkspaceShared>>,
    self_ref: Weak<Job>,
}

impl Job {
    pub fn new(locator: Locator, body: impl JobBody + 'static) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            node: ResourceNode::new(),
            locator,
            body: Box::new(body),
            dependencies: Mutex::new(Vec::new()),
            status: Mutex::new(JobStatus {
                state: JobState::Waiting,
                unsatisfied: 0,
                submitted_at: None,
                in_flight: false,
                ticket: 0,
                last_error: None,
            }),
            workspace: OnceLock::new(),
            self_ref: self_ref.clone(),
        })
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    pub fn body(&self) -> &dyn JobBody {
        self.body.as_ref()
    }

    pub fn state(&self) -> JobState {
        lock(&self.status).state
    }

    pub fn unsatisfied(&self) -> usize {
        lock(&self.status).unsatisfied
    }

    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        lock(&self.status).submitted_at
    }

    /// Message of the last failed attempt or upstream failure, if any.
    pub fn last_error(&self) -> Option<String> {
        lock(&self.status).last_error.clone()
    }

    pub fn dependencies(&self) -> Vec<Arc<Dependency>> {
        lock(&self.dependencies).clone()
    }

    pub fn priority(&self) -> JobPriority {
        let status = lock(&self.status);
        JobPriority {
            unsatisfied: status.unsatisfied,
            submitted_at: status.submitted_at,
            id: self.id(),
        }
    }

    /// Declare a dependency; only allowed before submission.
    pub fn add_dependency(&self, dependency: Arc<Dependency>) -> Result<()> {
        if self.workspace.get().is_some() {
            return Err(JobdagError::argument(format!(
                "job {} is already submitted, dependencies are frozen",
                self.locator
            )));
        }
        let target: Weak<dyn Resource> = self.self_ref.clone();
        dependency.attach(target)?;

        // A fresh dependency starts unsatisfied; wiring checks it.
        lock(&self.status).unsatisfied += 1;
        lock(&self.dependencies).push(dependency);
        Ok(())
    }

    /// Run only after `upstream` is `DONE`.
    pub fn depends_on(&self, upstream: &Arc<Job>) -> Result<()> {
        self.add_dependency(upstream.create_dependency())
    }

    /// Hold `amount` units of `token` while running.
    pub fn requires(&self, token: &Arc<CounterToken>, amount: u32) -> Result<()> {
        let already = lock(&self.dependencies)
            .iter()
            .any(|d| d.counter().is_some_and(|(t, _)| Arc::ptr_eq(t, token)));
        if already {
            return Err(JobdagError::argument(format!(
                "job {} already requires token {}",
                self.locator,
                token.id()
            )));
        }
        self.add_dependency(token.create_dependency(amount))
    }

    /// A dependency satisfied once this job is `DONE`.
    pub fn create_dependency(self: &Arc<Self>) -> Arc<Dependency> {
        let origin: Arc<dyn Resource> = self.clone();
        Dependency::new(
            origin,
            JobDone {
                job: Arc::clone(self),
            },
        )
    }

    fn workspace(&self) -> Option<Arc<WorkspaceShared>> {
        self.workspace.get().and_then(Weak::upgrade)
    }

    /// Move between `WAITING` and `READY` according to the current count.
    ///
    /// Returns the new ticket when the job just became ready and must be
    /// queued.
    fn settle(&self, status: &mut JobStatus) -> Option<u64> {
        match status.state {
            JobState::Waiting if status.unsatisfied == 0 && status.submitted_at.is_some() => {
                status.state = JobState::Ready;
                status.ticket += 1;
                debug!(locator = %self.locator, ticket = status.ticket, "job ready");
                Some(status.ticket)
            }
            JobState::Ready if status.unsatisfied > 0 && !status.in_flight => {
                status.state = JobState::Waiting;
                debug!(locator = %self.locator, unsatisfied = status.unsatisfied, "job back to waiting");
                None
            }
            _ => None,
        }
    }

    fn enqueue(&self, ticket: u64) {
        let (Some(ws), Some(job)) = (self.workspace(), self.self_ref.upgrade()) else {
            debug!(locator = %self.locator, "job has no live workspace, not queued");
            return;
        };
        ws.enqueue(job, ticket);
    }

    // ---- hooks used by the workspace and its dispatcher ----

    /// Bind this job to a workspace and stamp the submission time.
    pub(crate) fn attach(&self, workspace: Weak<WorkspaceShared>) -> Result<()> {
        self.workspace.set(workspace).map_err(|_| {
            JobdagError::argument(format!(
                "job {} is already attached to a workspace",
                self.locator
            ))
        })?;
        lock(&self.status).submitted_at = Some(Utc::now());
        Ok(())
    }

    /// Register every dependency with its origin and evaluate it once.
    pub(crate) fn wire(&self) {
        for dependency in self.dependencies() {
            dependency.origin().node().add_dependent(&dependency);
            dependency.check();
        }
        self.maybe_ready();
    }

    pub(crate) fn maybe_ready(&self) {
        let ticket = {
            let mut status = lock(&self.status);
            self.settle(&mut status)
        };
        if let Some(ticket) = ticket {
            self.enqueue(ticket);
        }
    }

    /// Start an attempt for queue entry `ticket`.
    ///
    /// Returns `false` (and leaves the job alone) when the entry is stale,
    /// the job is no longer ready, or another attempt is in flight.
    pub(crate) fn begin(&self, ticket: u64) -> bool {
        let mut status = lock(&self.status);
        let admitted = status.state == JobState::Ready
            && status.ticket == ticket
            && !status.in_flight
            && status.unsatisfied == 0;
        if admitted {
            status.in_flight = true;
        } else {
            trace!(locator = %self.locator, ticket, current = status.ticket, state = %status.state, "skipping queue entry");
        }
        admitted
    }

    /// Claim every counted dependency, or none of them.
    pub(crate) fn claim_tokens(&self) -> Result<Option<Vec<TokenClaim>>> {
        let mut claims = Vec::new();
        for dependency in self.dependencies() {
            let Some((token, amount)) = dependency.counter() else {
                continue;
            };
            match token.try_claim(dependency.id(), amount)? {
                Some(claim) => claims.push(claim),
                // Dropping `claims` hands the partial reservations back.
                None => return Ok(None),
            }
        }
        Ok(Some(claims))
    }

    /// A token claim lost the race: wait for the capacity to come back.
    pub(crate) fn park_blocked(&self) {
        {
            let mut status = lock(&self.status);
            status.in_flight = false;
            if status.state == JobState::Ready {
                status.state = JobState::Waiting;
            }
        }
        debug!(locator = %self.locator, "token busy, job parked");
        for dependency in self.dependencies() {
            if dependency.counter().is_some() {
                dependency.check();
            }
        }
        self.maybe_ready();
    }

    pub(crate) fn mark_running(&self) -> Result<()> {
        let mut status = lock(&self.status);
        if status.state != JobState::Ready || !status.in_flight {
            return Err(JobdagError::assertion(format!(
                "job {} cannot start running from state {}",
                self.locator, status.state
            )));
        }
        status.state = JobState::Running;
        info!(locator = %self.locator, "job running");
        Ok(())
    }

    /// End the attempt in a terminal state.
    pub(crate) fn finish(&self, state: JobState) {
        debug_assert!(state.is_terminal());
        {
            let mut status = lock(&self.status);
            status.state = state;
            status.in_flight = false;
        }
        match state {
            JobState::Done => info!(locator = %self.locator, "job done"),
            _ => warn!(locator = %self.locator, state = %state, "job failed"),
        }
        self.job_completed();
    }

    /// The attempt could not be set up.
    ///
    /// A job that never launched stays `READY` and is reported to the
    /// workspace so it can be retried. A job that was already running when
    /// the failure hit can not be resumed and ends in `ERROR`.
    pub(crate) fn setup_failed(&self, error: &JobdagError) {
        let terminal = {
            let mut status = lock(&self.status);
            status.in_flight = false;
            status.last_error = Some(error.to_string());
            if status.state == JobState::Running {
                status.state = JobState::Error;
                true
            } else {
                false
            }
        };

        if terminal {
            warn!(locator = %self.locator, error = %error, "job failed after launch");
            self.job_completed();
        } else {
            warn!(locator = %self.locator, error = %error, "job setup failed");
            if let Some(ws) = self.workspace() {
                ws.job_setup_failed(self.locator.clone());
            }
        }
    }

    /// Re-queue a job whose last attempt failed during setup.
    pub(crate) fn retry(&self) -> Result<()> {
        let ticket = {
            let mut status = lock(&self.status);
            if status.state != JobState::Ready || status.in_flight || status.last_error.is_none() {
                return Err(JobdagError::argument(format!(
                    "job {} is {} and has no failed setup to retry",
                    self.locator, status.state
                )));
            }
            status.last_error = None;
            status.ticket += 1;
            status.ticket
        };
        info!(locator = %self.locator, "retrying job");
        self.enqueue(ticket);
        Ok(())
    }

    fn job_completed(&self) {
        if let Some(ws) = self.workspace() {
            ws.job_finished(self.id());
        }
        self.node.notify_dependents();
    }
}

impl Resource for Job {
    fn node(&self) -> &ResourceNode {
        &self.node
    }

    fn dependency_changed(&self, dependency: &Dependency, satisfied: bool) -> Result<()> {
        let ticket = {
            let mut status = lock(&self.status);
            if satisfied {
                status.unsatisfied = status.unsatisfied.checked_sub(1).ok_or_else(|| {
                    JobdagError::assertion(format!(
                        "job {}: unsatisfied count underflow on {dependency}",
                        self.locator
                    ))
                })?;
            } else {
                status.unsatisfied += 1;
            }
            trace!(locator = %self.locator, %dependency, satisfied, unsatisfied = status.unsatisfied, "dependency changed");
            self.settle(&mut status)
        };

        if let Some(ticket) = ticket {
            self.enqueue(ticket);
        }
        Ok(())
    }

    fn dependency_failed(&self, dependency: &Dependency) -> Result<()> {
        let failed = {
            let mut status = lock(&self.status);
            let pending = matches!(status.state, JobState::Waiting | JobState::Ready);
            if pending && !status.in_flight && status.submitted_at.is_some() {
                status.state = JobState::Error;
                status.last_error = Some(format!("upstream dependency {dependency} failed"));
                true
            } else {
                false
            }
        };

        if failed {
            warn!(locator = %self.locator, %dependency, "upstream failed, job marked as error");
            self.job_completed();
        }
        Ok(())
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = lock(&self.status);
        f.debug_struct("Job")
            .field("id", &self.id())
            .field("locator", &self.locator)
            .field("state", &status.state)
            .field("unsatisfied", &status.unsatisfied)
            .finish_non_exhaustive()
    }
}

/// Satisfied when the origin job is `DONE`; failed when it is `ERROR`.
#[derive(Debug)]
struct JobDone {
    job: Arc<Job>,
}

impl Condition for JobDone {
    fn satisfied(&self, _dependency: &Dependency) -> Result<bool> {
        Ok(self.job.state() == JobState::Done)
    }

    fn failed(&self) -> bool {
        self.job.state() == JobState::Error
    }
}

// src/workspace/mod.rs

//! The workspace owns a set of jobs.
//!
//! - jobs are keyed by [`Locator`]; a second submission with the same
//!   locator is ignored,
//! - submission wires each dependency to its origin and evaluates it,
//! - a dispatcher runs ready jobs, at most `max_jobs` at a time, in
//!   [`JobPriority`](crate::job::JobPriority) order,
//! - the [`barrier`] lets callers wait until no job is waiting anymore.

pub mod barrier;
mod dispatcher;
mod queue;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dag::resource::{Resource, ResourceId};
use crate::errors::{JobdagError, Result};
use crate::job::{Job, Locator};
use crate::sync::{KillSwitch, lock};
use crate::types::JobState;

pub use barrier::{WaitOutcome, global_waiting_count, wait_until_completed, wait_until_completed_or};

use queue::ReadyQueue;

#[derive(Debug, Clone)]
pub struct WorkspaceOptions {
    /// Upper bound on concurrently executing jobs.
    pub max_jobs: usize,
}

impl Default for WorkspaceOptions {
    fn default() -> Self {
        Self {
            max_jobs: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

#[derive(Debug, Default)]
struct WorkspaceState {
    jobs: HashMap<Locator, Arc<Job>>,
    waiting: HashSet<ResourceId>,
    setup_failures: Vec<Locator>,
}

/// State shared between the workspace handle, its jobs and its dispatcher.
#[derive(Debug)]
pub struct WorkspaceShared {
    dir: PathBuf,
    max_jobs: usize,
    state: Mutex<WorkspaceState>,
    queue: ReadyQueue,
    permits: Arc<Semaphore>,
    /// Attempts admitted by the dispatcher that have not returned yet.
    in_flight: AtomicUsize,
    kill: KillSwitch,
    closed: CancellationToken,
}

impl WorkspaceShared {
    fn jobs_dir(&self) -> PathBuf {
        self.dir.join("jobs")
    }

    pub(crate) fn enqueue(&self, job: Arc<Job>, ticket: u64) {
        self.queue.push(job, ticket);
    }

    pub(crate) fn job_finished(&self, id: ResourceId) {
        let removed = lock(&self.state).waiting.remove(&id);
        if removed {
            barrier::notify_change();
        }
    }

    pub(crate) fn job_setup_failed(&self, locator: Locator) {
        lock(&self.state).setup_failures.push(locator);
        barrier::notify_change();
    }

    fn waiting_count(&self) -> usize {
        lock(&self.state).waiting.len()
    }

    fn attempt_started(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    fn attempt_ended(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        barrier::notify_change();
    }

    /// Dispatching is over and no attempt is executing, so jobs still
    /// waiting here will not run.
    fn is_stopped(&self) -> bool {
        let dispatching = !self.kill.is_triggered() && !self.closed.is_cancelled();
        !dispatching && self.in_flight.load(Ordering::SeqCst) == 0
    }

    fn take_setup_failures(&self) -> Vec<Locator> {
        std::mem::take(&mut lock(&self.state).setup_failures)
    }
}

/// Owner of a job set rooted at a directory.
///
/// Dropping the workspace stops its dispatcher; running attempts finish on
/// their own.
#[derive(Debug)]
pub struct Workspace {
    shared: Arc<WorkspaceShared>,
}

impl Workspace {
    /// Must be called from within a tokio runtime.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        Self::with_options(dir, WorkspaceOptions::default())
    }

    pub fn with_options(dir: impl Into<PathBuf>, options: WorkspaceOptions) -> Result<Self> {
        let handle = Handle::try_current().map_err(|_| {
            JobdagError::argument("a workspace must be created inside a tokio runtime")
        })?;
        if options.max_jobs == 0 {
            return Err(JobdagError::argument("max_jobs must be at least 1"));
        }

        let shared = Arc::new(WorkspaceShared {
            dir: dir.into(),
            max_jobs: options.max_jobs,
            state: Mutex::new(WorkspaceState::default()),
            queue: ReadyQueue::default(),
            permits: Arc::new(Semaphore::new(options.max_jobs)),
            in_flight: AtomicUsize::new(0),
            kill: KillSwitch::new(),
            closed: CancellationToken::new(),
        });
        barrier::register(&shared);
        dispatcher::spawn(&handle, Arc::clone(&shared));

        info!(dir = %shared.dir.display(), max_jobs = options.max_jobs, "workspace created");
        Ok(Self { shared })
    }

    pub fn dir(&self) -> &Path {
        &self.shared.dir
    }

    /// Base directory of the job files.
    pub fn jobs_dir(&self) -> PathBuf {
        self.shared.jobs_dir()
    }

    /// Add a job; returns `false` if a job with the same locator exists.
    ///
    /// The job's dependencies are frozen from here on.
    pub fn submit(&self, job: Arc<Job>) -> Result<bool> {
        {
            let mut state = lock(&self.shared.state);
            if state.jobs.contains_key(job.locator()) {
                warn!(locator = %job.locator(), "job already submitted, ignoring");
                return Ok(false);
            }
            job.attach(Arc::downgrade(&self.shared))?;
            state.jobs.insert(job.locator().clone(), Arc::clone(&job));
            state.waiting.insert(job.id());
        }
        barrier::notify_change();

        debug!(locator = %job.locator(), dependencies = job.dependencies().len(), "job submitted");
        // Outside the workspace lock: checks may cascade into other jobs.
        job.wire();
        Ok(true)
    }

    pub fn job(&self, locator: &Locator) -> Option<Arc<Job>> {
        lock(&self.shared.state).jobs.get(locator).cloned()
    }

    pub fn jobs(&self) -> Vec<Arc<Job>> {
        lock(&self.shared.state).jobs.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.shared.state).jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Submitted jobs that are not `DONE` or `ERROR` yet.
    pub fn waiting_count(&self) -> usize {
        self.shared.waiting_count()
    }

    pub fn states(&self) -> BTreeMap<Locator, JobState> {
        self.jobs()
            .into_iter()
            .map(|job| (job.locator().clone(), job.state()))
            .collect()
    }

    /// Re-queue a job whose last attempt failed during setup.
    pub fn retry(&self, locator: &Locator) -> Result<()> {
        let job = self
            .job(locator)
            .ok_or_else(|| JobdagError::argument(format!("no job {locator} in this workspace")))?;
        job.retry()
    }

    /// Stop dispatching and kill running job processes.
    ///
    /// `force` sends SIGTERM instead of SIGINT. Jobs that never started stay
    /// where they are; once the killed attempts are back, barrier waits
    /// covering this workspace return [`WaitOutcome::Interrupted`] unless
    /// nothing is left waiting.
    pub fn shutdown(&self, force: bool) {
        info!(dir = %self.shared.dir.display(), force, "workspace shutting down");
        self.shared.kill.trigger(force);
        barrier::notify_change();
    }

    /// Stop starting new attempts; running ones are left alone.
    ///
    /// Barrier waits behave as after [`Workspace::shutdown`].
    pub fn stop_dispatching(&self) {
        debug!(dir = %self.shared.dir.display(), "dispatching stopped");
        self.shared.closed.cancel();
        barrier::notify_change();
    }

    /// Resolves once no attempt is executing anymore.
    ///
    /// Meant to be used after [`Workspace::shutdown`]; while dispatching
    /// goes on it returns during any idle moment.
    pub async fn drain(&self) {
        let all = u32::try_from(self.shared.max_jobs).unwrap_or(u32::MAX);
        match self.shared.permits.acquire_many(all).await {
            Ok(_permits) => debug!("workspace drained"),
            Err(_) => debug!("worker permits closed while draining"),
        }
    }

    /// Barrier over this workspace only.
    pub async fn wait(&self) -> WaitOutcome {
        self.wait_or(&CancellationToken::new()).await
    }

    pub async fn wait_or(&self, interrupt: &CancellationToken) -> WaitOutcome {
        let shared = Arc::downgrade(&self.shared);
        barrier::wait_on(move || shared.upgrade().into_iter().collect(), interrupt).await
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.shared.closed.cancel();
        barrier::notify_change();
    }
}

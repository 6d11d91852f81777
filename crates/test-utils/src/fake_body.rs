use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use jobdag::errors::{JobdagError, Result};
use jobdag::job::{Job, JobBody, Locator, RunContext, RunOutcome};
use jobdag::sync::BoxFuture;

#[derive(Debug, Default)]
struct LogState {
    started: Vec<String>,
    finished: Vec<String>,
    active: usize,
    max_active: usize,
    /// Jobs that were started while a dependency was still unsatisfied.
    early: Vec<String>,
    last_finish: Option<Instant>,
}

/// Shared record of what the fake bodies did.
#[derive(Debug, Clone, Default)]
pub struct RunLog {
    inner: Arc<Mutex<LogState>>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn start(&self, name: &str, unsatisfied: usize) {
        let mut s = self.inner.lock().unwrap();
        s.started.push(name.to_string());
        s.active += 1;
        s.max_active = s.max_active.max(s.active);
        if unsatisfied > 0 {
            s.early.push(name.to_string());
        }
    }

    fn finish(&self, name: &str) {
        let mut s = self.inner.lock().unwrap();
        s.active -= 1;
        s.finished.push(name.to_string());
        s.last_finish = Some(Instant::now());
    }

    /// Names in start order.
    pub fn started(&self) -> Vec<String> {
        self.inner.lock().unwrap().started.clone()
    }

    pub fn finished(&self) -> Vec<String> {
        self.inner.lock().unwrap().finished.clone()
    }

    /// When the most recent body returned.
    pub fn last_finished_at(&self) -> Option<Instant> {
        self.inner.lock().unwrap().last_finish
    }

    pub fn runs_of(&self, name: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .started
            .iter()
            .filter(|n| *n == name)
            .count()
    }

    pub fn max_active(&self) -> usize {
        self.inner.lock().unwrap().max_active
    }

    pub fn started_early(&self) -> Vec<String> {
        self.inner.lock().unwrap().early.clone()
    }

    /// Start count per name.
    pub fn counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for name in self.started() {
            *counts.entry(name).or_insert(0) += 1;
        }
        counts
    }
}

/// A job body that records its runs instead of launching a process.
#[derive(Debug, Clone)]
pub struct RecordingBody {
    name: String,
    log: RunLog,
    delay: Duration,
    exit_code: i32,
    fail_setup: bool,
}

impl RecordingBody {
    pub fn new(name: &str, log: &RunLog) -> Self {
        Self {
            name: name.to_string(),
            log: log.clone(),
            delay: Duration::ZERO,
            exit_code: 0,
            fail_setup: false,
        }
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    /// Fail before "launching", like a lock or mkdirs error would.
    pub fn fail_setup(mut self) -> Self {
        self.fail_setup = true;
        self
    }
}

impl JobBody for RecordingBody {
    fn run<'a>(&'a self, ctx: RunContext<'a>) -> BoxFuture<'a, Result<RunOutcome>> {
        Box::pin(async move {
            if self.fail_setup {
                return Err(JobdagError::Other(anyhow::anyhow!(
                    "simulated setup failure for {}",
                    self.name
                )));
            }

            self.log.start(&self.name, ctx.job.unsatisfied());
            ctx.mark_running()?;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.log.finish(&self.name);
            Ok(RunOutcome::Exited(self.exit_code))
        })
    }
}

/// `Job` named `name` running a [`RecordingBody`].
pub fn recording_job(name: &str, log: &RunLog) -> Arc<Job> {
    Job::new(
        Locator::new(name).expect("valid test locator"),
        RecordingBody::new(name, log),
    )
}

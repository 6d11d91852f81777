// tests/admission.rs

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use jobdag::job::{Job, Locator};
use jobdag::token::CounterToken;
use jobdag::types::JobState;
use jobdag::workspace::{WaitOutcome, Workspace};
use jobdag_test_utils::fake_body::{RecordingBody, RunLog};
use jobdag_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn slow_job(name: &str, log: &RunLog, ms: u64) -> Result<Arc<Job>, Box<dyn Error>> {
    Ok(Job::new(
        Locator::new(name)?,
        RecordingBody::new(name, log).delay(Duration::from_millis(ms)),
    ))
}

#[tokio::test]
async fn token_of_one_serialises_jobs() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let ws = Workspace::new(dir.path())?;
    let log = RunLog::new();
    let gpu = CounterToken::new(1);

    let mut jobs = Vec::new();
    for i in 0..4 {
        let job = slow_job(&format!("gpu{i}"), &log, 20)?;
        job.requires(&gpu, 1)?;
        jobs.push(job);
    }
    for job in &jobs {
        ws.submit(Arc::clone(job))?;
    }

    assert_eq!(with_timeout(ws.wait()).await, WaitOutcome::Completed);
    assert_eq!(log.started().len(), 4);
    assert_eq!(log.max_active(), 1);
    assert_eq!(gpu.used(), 0);
    assert!(jobs.iter().all(|j| j.state() == JobState::Done));
    Ok(())
}

#[tokio::test]
async fn weighted_claims_share_capacity() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let ws = Workspace::new(dir.path())?;
    let log = RunLog::new();
    let cpu = CounterToken::new(4);

    // Two "small" jobs fit together, the "big" one needs the whole token.
    let small_a = slow_job("small_a", &log, 30)?;
    let small_b = slow_job("small_b", &log, 30)?;
    let big = slow_job("big", &log, 30)?;
    small_a.requires(&cpu, 2)?;
    small_b.requires(&cpu, 2)?;
    big.requires(&cpu, 4)?;

    for job in [&small_a, &small_b, &big] {
        ws.submit(Arc::clone(job))?;
    }

    assert_eq!(with_timeout(ws.wait()).await, WaitOutcome::Completed);
    assert_eq!(log.started().len(), 3);
    assert!(log.max_active() <= 2, "max active {}", log.max_active());
    assert_eq!(cpu.used(), 0);
    Ok(())
}

#[tokio::test]
async fn raising_the_limit_admits_blocked_jobs() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let ws = Workspace::new(dir.path())?;
    let log = RunLog::new();
    let slot = CounterToken::new(0);

    let job = slow_job("blocked", &log, 0)?;
    job.requires(&slot, 1)?;
    ws.submit(Arc::clone(&job))?;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(job.state(), JobState::Waiting);
    assert!(log.started().is_empty());

    slot.set_limit(1);
    assert_eq!(with_timeout(ws.wait()).await, WaitOutcome::Completed);
    assert_eq!(job.state(), JobState::Done);
    Ok(())
}

#[tokio::test]
async fn tokens_are_held_only_while_running() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let ws = Workspace::new(dir.path())?;
    let log = RunLog::new();
    let token = CounterToken::new(1);

    let first = slow_job("first", &log, 0)?;
    let second = slow_job("second", &log, 0)?;
    first.requires(&token, 1)?;
    second.requires(&token, 1)?;
    second.depends_on(&first)?;

    ws.submit(Arc::clone(&second))?;
    ws.submit(Arc::clone(&first))?;

    assert_eq!(with_timeout(ws.wait()).await, WaitOutcome::Completed);
    assert_eq!(log.started(), vec!["first", "second"]);
    assert_eq!(token.used(), 0);
    Ok(())
}

#[test]
fn requiring_a_token_twice_is_rejected() -> TestResult {
    let log = RunLog::new();
    let token = CounterToken::new(2);
    let job = slow_job("twice", &log, 0)?;

    job.requires(&token, 1)?;
    assert!(job.requires(&token, 1).is_err());
    assert_eq!(job.dependencies().len(), 1);
    Ok(())
}

// tests/command_line.rs

use std::error::Error;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jobdag::connector::{LocalConnector, LocalOptions};
use jobdag::job::{CommandLineJob, Job, JobPaths, Launcher, Locator};
use jobdag::script::{CommandLine, ShScriptBuilder, quote};
use jobdag::types::JobState;
use jobdag::workspace::{WaitOutcome, Workspace, WorkspaceOptions};
use jobdag_test_utils::{init_tracing, with_timeout, within};

type TestResult = Result<(), Box<dyn Error>>;

fn launcher() -> Launcher {
    Launcher::new(
        Arc::new(LocalConnector::new(LocalOptions {
            lock_retry_interval: Duration::from_millis(100),
        })),
        Arc::new(ShScriptBuilder::default()),
    )
}

fn shell_job(name: &str, cmd: &str) -> Result<Arc<Job>, Box<dyn Error>> {
    Ok(Job::new(
        Locator::new(name)?,
        CommandLineJob::new(CommandLine::shell(cmd), launcher()),
    ))
}

fn paths(ws: &Workspace, name: &str) -> Result<JobPaths, Box<dyn Error>> {
    Ok(JobPaths::new(&ws.jobs_dir(), &Locator::new(name)?))
}

async fn wait_for_state(job: &Job, state: JobState) {
    while job.state() != state {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_default()
}

#[tokio::test]
async fn successful_job_leaves_its_markers() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let ws = Workspace::new(dir.path())?;

    let job = shell_job("greet/hello", "echo hello; echo oops >&2")?;
    ws.submit(Arc::clone(&job))?;
    assert_eq!(with_timeout(ws.wait()).await, WaitOutcome::Completed);
    assert_eq!(job.state(), JobState::Done);

    let p = paths(&ws, "greet/hello")?;
    assert_eq!(read(&p.out()), "hello\n");
    assert_eq!(read(&p.err()), "oops\n");
    assert_eq!(read(&p.code()).trim(), "0");
    assert!(p.done().is_file());
    assert!(p.script().is_file());
    assert!(p.pid().is_file());
    assert!(!p.lock().exists());
    assert!(!p.start_lock().exists());
    Ok(())
}

#[tokio::test]
async fn non_zero_exit_is_an_error() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let ws = Workspace::new(dir.path())?;

    let job = shell_job("fails", "echo before; exit 4")?;
    ws.submit(Arc::clone(&job))?;
    assert_eq!(with_timeout(ws.wait()).await, WaitOutcome::Completed);
    assert_eq!(job.state(), JobState::Error);

    let p = paths(&ws, "fails")?;
    assert_eq!(read(&p.code()).trim(), "4");
    assert_eq!(read(&p.out()), "before\n");
    assert!(!p.done().exists());
    assert!(!p.lock().exists());
    Ok(())
}

#[tokio::test]
async fn existing_done_marker_skips_the_command() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let ws = Workspace::new(dir.path())?;
    let sentinel = dir.path().join("sentinel");

    let p = paths(&ws, "once")?;
    fs::create_dir_all(p.directory())?;
    fs::write(p.done(), "")?;

    let cmd = format!("touch {}", quote(&sentinel.to_string_lossy()));
    let job = shell_job("once", &cmd)?;
    ws.submit(Arc::clone(&job))?;
    assert_eq!(with_timeout(ws.wait()).await, WaitOutcome::Completed);

    assert_eq!(job.state(), JobState::Done);
    assert!(!sentinel.exists());
    assert!(!p.script().exists());
    Ok(())
}

#[tokio::test]
async fn a_second_run_after_success_is_a_no_op() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let counter = dir.path().join("runs");
    let cmd = format!("echo run >> {}", quote(&counter.to_string_lossy()));

    for _ in 0..2 {
        let ws = Workspace::new(dir.path())?;
        let job = shell_job("count", &cmd)?;
        ws.submit(Arc::clone(&job))?;
        assert_eq!(with_timeout(ws.wait()).await, WaitOutcome::Completed);
        assert_eq!(job.state(), JobState::Done);
    }

    assert_eq!(read(&counter), "run\n");
    Ok(())
}

#[tokio::test]
async fn environment_is_exported_to_the_script() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let ws = Workspace::new(dir.path())?;

    let body = CommandLineJob::new(CommandLine::shell("echo \"$GREETING $TARGET\""), launcher())
        .with_env("GREETING", "hi there")
        .with_env("TARGET", "it's me");
    let job = Job::new(Locator::new("env")?, body);
    ws.submit(Arc::clone(&job))?;
    assert_eq!(with_timeout(ws.wait()).await, WaitOutcome::Completed);

    assert_eq!(read(&paths(&ws, "env")?.out()), "hi there it's me\n");
    Ok(())
}

#[tokio::test]
async fn args_command_is_quoted() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let ws = Workspace::new(dir.path())?;

    let body = CommandLineJob::new(
        CommandLine::args(["printf", "%s|", "a b", "$HOME"]),
        launcher(),
    );
    let job = Job::new(Locator::new("args")?, body);
    ws.submit(Arc::clone(&job))?;
    assert_eq!(with_timeout(ws.wait()).await, WaitOutcome::Completed);

    assert_eq!(read(&paths(&ws, "args")?.out()), "a b|$HOME|");
    Ok(())
}

#[tokio::test]
async fn held_lock_delays_the_job_until_removed() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let ws = Workspace::new(dir.path())?;

    let p = paths(&ws, "waiter")?;
    fs::create_dir_all(p.directory())?;
    fs::write(p.lock(), "12345\n")?;

    let job = shell_job("waiter", "echo ran")?;
    ws.submit(Arc::clone(&job))?;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(job.state(), JobState::Ready);
    assert!(!p.out().exists());

    fs::remove_file(p.lock())?;
    assert_eq!(with_timeout(ws.wait()).await, WaitOutcome::Completed);
    assert_eq!(job.state(), JobState::Done);
    assert_eq!(read(&p.out()), "ran\n");
    Ok(())
}

#[tokio::test]
async fn lock_path_that_is_a_directory_fails_setup() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let ws = Workspace::new(dir.path())?;

    let p = paths(&ws, "blocked")?;
    fs::create_dir_all(p.lock())?;

    let job = shell_job("blocked", "echo ran")?;
    ws.submit(Arc::clone(&job))?;

    let outcome = with_timeout(ws.wait()).await;
    assert_eq!(outcome, WaitOutcome::SetupFailed(vec![Locator::new("blocked")?]));
    assert_eq!(job.state(), JobState::Ready);
    assert!(job.last_error().is_some_and(|e| e.contains("not a file")));

    fs::remove_dir(p.lock())?;
    ws.retry(job.locator())?;
    assert_eq!(with_timeout(ws.wait()).await, WaitOutcome::Completed);
    assert_eq!(job.state(), JobState::Done);
    Ok(())
}

#[tokio::test]
async fn unusable_job_directory_fails_setup() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let ws = Workspace::new(dir.path())?;

    // A plain file where the job directory should go.
    fs::create_dir_all(ws.jobs_dir())?;
    fs::write(ws.jobs_dir().join("group"), "")?;

    let job = shell_job("group/member", "echo ran")?;
    ws.submit(Arc::clone(&job))?;

    let outcome = with_timeout(ws.wait()).await;
    assert_eq!(
        outcome,
        WaitOutcome::SetupFailed(vec![Locator::new("group/member")?])
    );
    assert_eq!(job.state(), JobState::Ready);
    Ok(())
}

#[tokio::test]
async fn shutdown_kills_running_jobs() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let ws = Workspace::new(dir.path())?;

    let job = shell_job("sleeper", "sleep 30")?;
    ws.submit(Arc::clone(&job))?;
    with_timeout(wait_for_state(&job, JobState::Running)).await;

    let started = Instant::now();
    ws.shutdown(false);
    assert_eq!(with_timeout(ws.wait()).await, WaitOutcome::Completed);

    assert_eq!(job.state(), JobState::Error);
    assert!(started.elapsed() < Duration::from_secs(10));
    let p = paths(&ws, "sleeper")?;
    assert!(!p.done().exists());
    assert!(!p.lock().exists());
    Ok(())
}

#[tokio::test]
async fn shutdown_with_queued_jobs_interrupts_the_wait() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let ws = Workspace::with_options(dir.path(), WorkspaceOptions { max_jobs: 1 })?;

    let slow = shell_job("slow", "sleep 30")?;
    ws.submit(Arc::clone(&slow))?;
    with_timeout(wait_for_state(&slow, JobState::Running)).await;
    let queued = shell_job("queued", "echo ran")?;
    ws.submit(Arc::clone(&queued))?;
    assert_eq!(queued.state(), JobState::Ready);

    ws.shutdown(false);
    assert_eq!(
        within(Duration::from_secs(5), ws.wait()).await,
        WaitOutcome::Interrupted
    );

    assert_eq!(slow.state(), JobState::Error);
    assert_eq!(queued.state(), JobState::Ready);
    assert_eq!(ws.waiting_count(), 1);
    assert!(!paths(&ws, "queued")?.out().exists());
    Ok(())
}

#[tokio::test]
async fn downstream_command_sees_upstream_output() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let ws = Workspace::new(dir.path())?;
    let data = dir.path().join("data.txt");
    let data = quote(&data.to_string_lossy());

    let produce = shell_job("produce", &format!("echo 42 > {data}"))?;
    let consume = shell_job("consume", &format!("cat {data}"))?;
    consume.depends_on(&produce)?;

    ws.submit(Arc::clone(&consume))?;
    ws.submit(Arc::clone(&produce))?;
    assert_eq!(with_timeout(ws.wait()).await, WaitOutcome::Completed);

    assert_eq!(read(&paths(&ws, "consume")?.out()), "42\n");
    Ok(())
}

#[tokio::test]
async fn forced_shutdown_reaches_jobs_that_ignore_sigint() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let ws = Workspace::new(dir.path())?;

    let job = shell_job("stubborn", "trap '' INT; sleep 30")?;
    ws.submit(Arc::clone(&job))?;
    with_timeout(wait_for_state(&job, JobState::Running)).await;

    ws.shutdown(false);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(job.state(), JobState::Running);

    ws.shutdown(true);
    assert_eq!(
        within(Duration::from_secs(5), ws.wait()).await,
        WaitOutcome::Completed
    );
    assert_eq!(job.state(), JobState::Error);
    Ok(())
}

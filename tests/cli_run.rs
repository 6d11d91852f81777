// tests/cli_run.rs
//
// `run` waits on the process-wide barrier, so this binary holds one test.

use std::error::Error;
use std::fs;
use std::path::Path;

use jobdag::cli::CliArgs;
use jobdag::run;
use jobdag::script::quote;
use jobdag_test_utils::{init_tracing, with_timeout};

fn plan(dir: &Path, fail: bool) -> String {
    let runs = quote(&dir.join("runs.log").to_string_lossy());
    let check = if fail { "exit 3" } else { "true" };
    format!(
        r#"
[config]
workdir = "state"
max_jobs = 2
lock_retry_ms = 100

[token.disk]
limit = 1

[job.prepare]
cmd = "echo prepare >> {runs}"
tokens = {{ disk = 1 }}

[job.build]
cmd = "echo build >> {runs}"
after = ["prepare"]
tokens = {{ disk = 1 }}

[job.check]
cmd = "echo check >> {runs}; {check}"
after = ["build"]
locator = "qa/check"

[job.publish]
cmd = "echo publish >> {runs}"
after = ["check"]
"#
    )
}

fn args(path: &Path) -> CliArgs {
    CliArgs {
        plan: path.to_string_lossy().into_owned(),
        dry_run: false,
        log_level: None,
        max_jobs: None,
    }
}

#[tokio::test]
async fn failed_run_resumes_where_it_stopped() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let plan_path = dir.path().join("Jobdag.toml");
    let runs = dir.path().join("runs.log");

    fs::write(&plan_path, plan(dir.path(), true))?;
    let summary = with_timeout(run(args(&plan_path))).await?;
    assert!(!summary.success());
    assert_eq!(summary.done.len(), 2);
    assert_eq!(summary.failed.len(), 2, "{summary}");
    assert!(summary.failed.iter().any(|l| l.to_string() == "qa/check"));
    assert_eq!(fs::read_to_string(&runs)?, "prepare\nbuild\ncheck\n");
    assert!(dir.path().join("state/jobs/qa/check.code").is_file());

    // The check job keeps its locator, the others are unchanged: only the
    // failed part of the graph runs again.
    fs::write(&plan_path, plan(dir.path(), false))?;
    let summary = with_timeout(run(args(&plan_path))).await?;
    assert!(summary.success(), "{summary}");
    assert_eq!(summary.done.len(), 4);
    assert_eq!(
        fs::read_to_string(&runs)?,
        "prepare\nbuild\ncheck\ncheck\npublish\n"
    );
    Ok(())
}

// src/main.rs

use jobdag::{cli, logging, run};

#[tokio::main]
async fn main() {
    match run_main().await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            eprintln!("jobdag error: {err:?}");
            std::process::exit(1);
        }
    }
}

async fn run_main() -> anyhow::Result<bool> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    let dry_run = args.dry_run;
    let summary = run(args).await?;
    if dry_run {
        return Ok(true);
    }
    eprint!("{summary}");
    Ok(summary.success())
}

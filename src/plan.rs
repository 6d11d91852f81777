// src/plan.rs

//! Turning a validated plan into jobs and tokens.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::debug;

use crate::config::model::{JobConfig, PlanFile};
use crate::dag::DagGraph;
use crate::errors::{JobdagError, Result};
use crate::job::{CommandLineJob, Job, Launcher, Locator};
use crate::script::CommandLine;
use crate::token::CounterToken;

/// Jobs of a plan, in submission (topological) order, plus its tokens.
#[derive(Debug)]
pub struct PlannedRun {
    pub jobs: Vec<(String, Arc<Job>)>,
    pub tokens: BTreeMap<String, Arc<CounterToken>>,
}

/// Explicit `locator`, else `<name>/<identity>`.
pub fn locator_for(name: &str, job: &JobConfig) -> Result<Locator> {
    match &job.locator {
        Some(locator) => Locator::new(locator),
        None => Locator::from_identity(name, &job.identity()),
    }
}

pub fn build_jobs(plan: &PlanFile, launcher: &Launcher) -> Result<PlannedRun> {
    let tokens: BTreeMap<String, Arc<CounterToken>> = plan
        .token
        .iter()
        .map(|(name, cfg)| (name.clone(), CounterToken::new(cfg.limit)))
        .collect();

    let graph = DagGraph::from_plan(plan);
    let order = graph.topological_order()?;

    let mut built: HashMap<&str, Arc<Job>> = HashMap::new();
    let mut seen: HashMap<Locator, &str> = HashMap::new();
    let mut jobs = Vec::with_capacity(order.len());

    for &name in &order {
        let (name, cfg) = plan
            .job
            .get_key_value(name)
            .ok_or_else(|| JobdagError::assertion(format!("job '{name}' missing from plan")))?;

        let locator = locator_for(name, cfg)?;
        if let Some(other) = seen.insert(locator.clone(), name.as_str()) {
            return Err(JobdagError::Config(format!(
                "jobs '{other}' and '{name}' share locator {locator}"
            )));
        }

        let mut body = CommandLineJob::new(CommandLine::shell(&cfg.cmd), launcher.clone());
        for (key, value) in &cfg.env {
            body = body.with_env(key, value);
        }
        let job = Job::new(locator, body);

        for dep in graph.dependencies_of(name) {
            let upstream = built.get(dep).ok_or_else(|| {
                JobdagError::Config(format!("job '{name}' depends on unknown job '{dep}'"))
            })?;
            job.depends_on(upstream)?;
        }
        for (token, &amount) in &cfg.tokens {
            let token_ref = tokens.get(token).ok_or_else(|| {
                JobdagError::Config(format!("job '{name}' uses unknown token '{token}'"))
            })?;
            job.requires(token_ref, amount)?;
        }

        debug!(job = %name, locator = %job.locator(), "planned job");
        built.insert(name.as_str(), Arc::clone(&job));
        jobs.push((name.clone(), job));
    }

    Ok(PlannedRun { jobs, tokens })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::RawPlanFile;

    fn plan(src: &str) -> PlanFile {
        let raw: RawPlanFile = toml::from_str(src).unwrap();
        PlanFile::try_from(raw).unwrap()
    }

    #[test]
    fn default_locator_is_content_derived() {
        let p = plan("[job.a]\ncmd = \"echo a\"\n[job.b]\ncmd = \"echo a\"\nlocator = \"x/y\"\n");
        let a = locator_for("a", &p.job["a"]).unwrap();
        assert!(a.to_string().starts_with("a/"));
        assert_eq!(locator_for("b", &p.job["b"]).unwrap().to_string(), "x/y");
    }

    #[test]
    fn shared_locators_are_rejected() {
        let p = plan("[job.a]\ncmd = \"x\"\nlocator = \"same\"\n[job.b]\ncmd = \"y\"\nlocator = \"same\"\n");
        let err = build_jobs(&p, &Launcher::local()).unwrap_err();
        assert!(matches!(err, JobdagError::Config(_)));
    }
}

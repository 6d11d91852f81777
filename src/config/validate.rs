// src/config/validate.rs

use tracing::warn;

use crate::config::model::{PlanFile, RawPlanFile};
use crate::dag::DagGraph;
use crate::errors::{JobdagError, Result};
use crate::job::Locator;

impl TryFrom<RawPlanFile> for PlanFile {
    type Error = JobdagError;

    fn try_from(raw: RawPlanFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_plan(&raw)?;
        Ok(PlanFile::new_unchecked(raw.config, raw.token, raw.job))
    }
}

fn validate_raw_plan(plan: &RawPlanFile) -> Result<()> {
    ensure_has_jobs(plan)?;
    validate_global_config(plan)?;
    validate_job_dependencies(plan)?;
    validate_job_tokens(plan)?;
    validate_locators(plan)?;
    validate_env(plan)?;
    validate_dag(plan)?;
    Ok(())
}

fn ensure_has_jobs(plan: &RawPlanFile) -> Result<()> {
    if plan.job.is_empty() {
        return Err(JobdagError::Config(
            "plan must contain at least one [job.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(plan: &RawPlanFile) -> Result<()> {
    if plan.config.max_jobs == Some(0) {
        return Err(JobdagError::Config(
            "[config].max_jobs must be >= 1 (got 0)".to_string(),
        ));
    }
    if plan.config.lock_retry_ms == 0 {
        return Err(JobdagError::Config(
            "[config].lock_retry_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_job_dependencies(plan: &RawPlanFile) -> Result<()> {
    for (name, job) in plan.job.iter() {
        for dep in job.after.iter() {
            if dep == name {
                return Err(JobdagError::Config(format!(
                    "job '{name}' cannot depend on itself in `after`"
                )));
            }
            if !plan.job.contains_key(dep) {
                return Err(JobdagError::Config(format!(
                    "job '{name}' has unknown dependency '{dep}' in `after`"
                )));
            }
        }
    }
    Ok(())
}

fn validate_job_tokens(plan: &RawPlanFile) -> Result<()> {
    for (name, job) in plan.job.iter() {
        for (token, &amount) in job.tokens.iter() {
            let Some(cfg) = plan.token.get(token) else {
                return Err(JobdagError::Config(format!(
                    "job '{name}' uses unknown token '{token}'"
                )));
            };
            if amount == 0 {
                return Err(JobdagError::Config(format!(
                    "job '{name}' requests 0 units of token '{token}'"
                )));
            }
            if amount > cfg.limit {
                warn!(job = %name, token = %token, amount, limit = cfg.limit, "job requests more than the token limit and will not run unless the limit is raised");
            }
        }
    }
    Ok(())
}

fn validate_locators(plan: &RawPlanFile) -> Result<()> {
    for (name, job) in plan.job.iter() {
        if let Some(locator) = &job.locator {
            Locator::new(locator).map_err(|err| {
                JobdagError::Config(format!("job '{name}' has an invalid locator: {err}"))
            })?;
        }
    }
    Ok(())
}

fn validate_env(plan: &RawPlanFile) -> Result<()> {
    for (name, job) in plan.job.iter() {
        for key in job.env.keys() {
            if !is_env_name(key) {
                return Err(JobdagError::Config(format!(
                    "job '{name}' has an invalid environment variable name '{key}'"
                )));
            }
        }
    }
    Ok(())
}

/// `[A-Za-z_][A-Za-z0-9_]*`, the names `sh` can export.
fn is_env_name(key: &str) -> bool {
    let mut chars = key.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn validate_dag(plan: &RawPlanFile) -> Result<()> {
    let graph = DagGraph::from_edges(
        plan.job
            .iter()
            .map(|(name, job)| (name.as_str(), job.after.as_slice())),
    );
    graph.topological_order().map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<PlanFile> {
        let raw: RawPlanFile = toml::from_str(toml_src)?;
        PlanFile::try_from(raw)
    }

    #[test]
    fn empty_plan_is_rejected() {
        assert!(matches!(parse(""), Err(JobdagError::Config(_))));
    }

    #[test]
    fn self_dependency_is_rejected() {
        let err = parse("[job.a]\ncmd = \"x\"\nafter = [\"a\"]\n").unwrap_err();
        assert!(err.to_string().contains("itself"), "{err}");
    }

    #[test]
    fn zero_token_amount_is_rejected() {
        let err = parse(
            "[token.t]\nlimit = 1\n[job.a]\ncmd = \"x\"\ntokens = { t = 0 }\n",
        )
        .unwrap_err();
        assert!(matches!(err, JobdagError::Config(_)));
    }

    #[test]
    fn amount_over_limit_is_allowed() {
        parse("[token.t]\nlimit = 1\n[job.a]\ncmd = \"x\"\ntokens = { t = 2 }\n").unwrap();
    }

    #[test]
    fn zero_max_jobs_is_rejected() {
        assert!(parse("[config]\nmax_jobs = 0\n[job.a]\ncmd = \"x\"\n").is_err());
    }

    #[test]
    fn env_names_must_be_exportable() {
        let err = parse("[job.a]\ncmd = \"x\"\nenv = { \"MY-VAR\" = \"1\" }\n").unwrap_err();
        assert!(err.to_string().contains("MY-VAR"), "{err}");
        parse("[job.a]\ncmd = \"x\"\nenv = { _MY_VAR2 = \"1\" }\n").unwrap();
    }

    #[test]
    fn bad_locator_is_rejected() {
        let err = parse("[job.a]\ncmd = \"x\"\nlocator = \"../escape\"\n").unwrap_err();
        assert!(err.to_string().contains("invalid locator"), "{err}");
    }
}

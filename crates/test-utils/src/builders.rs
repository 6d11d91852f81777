#![allow(dead_code)]

use std::collections::BTreeMap;

use jobdag::config::{JobConfig, PlanFile, PlanSection, RawPlanFile, TokenConfig};

/// Builder for `PlanFile` to simplify test setup.
pub struct PlanBuilder {
    plan: RawPlanFile,
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self {
            plan: RawPlanFile {
                config: PlanSection::default(),
                token: BTreeMap::new(),
                job: BTreeMap::new(),
            },
        }
    }

    pub fn with_job(mut self, name: &str, job: JobConfig) -> Self {
        self.plan.job.insert(name.to_string(), job);
        self
    }

    pub fn with_token(mut self, name: &str, limit: u32) -> Self {
        self.plan.token.insert(name.to_string(), TokenConfig { limit });
        self
    }

    pub fn max_jobs(mut self, n: usize) -> Self {
        self.plan.config.max_jobs = Some(n);
        self
    }

    pub fn raw(self) -> RawPlanFile {
        self.plan
    }

    pub fn build(self) -> PlanFile {
        PlanFile::try_from(self.plan).expect("Failed to build valid plan from builder")
    }
}

impl Default for PlanBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `JobConfig`.
pub struct JobConfigBuilder {
    job: JobConfig,
}

impl JobConfigBuilder {
    pub fn new(cmd: &str) -> Self {
        Self {
            job: JobConfig {
                cmd: cmd.to_string(),
                after: vec![],
                tokens: BTreeMap::new(),
                env: BTreeMap::new(),
                locator: None,
            },
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.job.after.push(dep.to_string());
        self
    }

    pub fn token(mut self, name: &str, amount: u32) -> Self {
        self.job.tokens.insert(name.to_string(), amount);
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.job.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn locator(mut self, locator: &str) -> Self {
        self.job.locator = Some(locator.to_string());
        self
    }

    pub fn build(self) -> JobConfig {
        self.job
    }
}

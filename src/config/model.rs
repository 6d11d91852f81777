// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

/// Plan file exactly as deserialized from TOML, before validation.
///
/// ```toml
/// [config]
/// workdir = ".jobdag"
/// max_jobs = 4
///
/// [token.gpu]
/// limit = 1
///
/// [job.prepare]
/// cmd = "echo prepare"
///
/// [job.train]
/// cmd = "python train.py"
/// after = ["prepare"]
/// tokens = { gpu = 1 }
/// env = { SEED = "1" }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawPlanFile {
    #[serde(default)]
    pub config: PlanSection,

    /// Tokens from `[token.<name>]`.
    #[serde(default)]
    pub token: BTreeMap<String, TokenConfig>,

    /// Jobs from `[job.<name>]`, keyed by job name.
    #[serde(default)]
    pub job: BTreeMap<String, JobConfig>,
}

/// A validated plan. Build one with `PlanFile::try_from(raw)`.
#[derive(Debug, Clone)]
pub struct PlanFile {
    pub config: PlanSection,
    pub token: BTreeMap<String, TokenConfig>,
    pub job: BTreeMap<String, JobConfig>,
}

impl PlanFile {
    pub(crate) fn new_unchecked(
        config: PlanSection,
        token: BTreeMap<String, TokenConfig>,
        job: BTreeMap<String, JobConfig>,
    ) -> Self {
        Self { config, token, job }
    }
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanSection {
    /// Workspace directory, relative to the plan file.
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,

    /// Concurrency bound; defaults to the available parallelism.
    #[serde(default)]
    pub max_jobs: Option<usize>,

    /// Kill running jobs when the run is interrupted.
    #[serde(default)]
    pub kill_on_interrupt: bool,

    /// Re-poll period (milliseconds) while waiting for a job lock.
    #[serde(default = "default_lock_retry_ms")]
    pub lock_retry_ms: u64,
}

fn default_workdir() -> PathBuf {
    PathBuf::from(".jobdag")
}

fn default_lock_retry_ms() -> u64 {
    1000
}

impl Default for PlanSection {
    fn default() -> Self {
        Self {
            workdir: default_workdir(),
            max_jobs: None,
            kill_on_interrupt: false,
            lock_retry_ms: default_lock_retry_ms(),
        }
    }
}

/// `[token.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenConfig {
    pub limit: u32,
}

/// `[job.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    /// Shell command to run.
    pub cmd: String,

    /// Jobs that must be `DONE` first.
    #[serde(default)]
    pub after: Vec<String>,

    /// Token name -> amount held while running.
    #[serde(default)]
    pub tokens: BTreeMap<String, u32>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Explicit locator; defaults to `<name>/<digest of cmd and env>`.
    #[serde(default)]
    pub locator: Option<String>,
}

impl JobConfig {
    /// Content identity of the command and its environment.
    pub fn identity(&self) -> String {
        let mut parts = vec![self.cmd.clone()];
        for (key, value) in &self.env {
            parts.push(format!("{key}={value}"));
        }
        crate::job::Identity::digest(parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_plan() {
        let raw: RawPlanFile = toml::from_str(
            r#"
            [config]
            workdir = "out"
            max_jobs = 2
            kill_on_interrupt = true

            [token.gpu]
            limit = 1

            [job.a]
            cmd = "echo a"

            [job.b]
            cmd = "echo b"
            after = ["a"]
            tokens = { gpu = 1 }
            env = { SEED = "3" }
            locator = "b/seed-3"
            "#,
        )
        .unwrap();

        assert_eq!(raw.config.workdir, PathBuf::from("out"));
        assert_eq!(raw.config.max_jobs, Some(2));
        assert!(raw.config.kill_on_interrupt);
        assert_eq!(raw.config.lock_retry_ms, 1000);
        assert_eq!(raw.token["gpu"].limit, 1);
        assert_eq!(raw.job["b"].after, vec!["a".to_string()]);
        assert_eq!(raw.job["b"].tokens["gpu"], 1);
        assert_eq!(raw.job["b"].locator.as_deref(), Some("b/seed-3"));
    }

    #[test]
    fn defaults_apply() {
        let raw: RawPlanFile = toml::from_str("[job.a]\ncmd = \"true\"\n").unwrap();
        assert_eq!(raw.config.workdir, PathBuf::from(".jobdag"));
        assert_eq!(raw.config.max_jobs, None);
        assert!(raw.token.is_empty());
    }

    #[test]
    fn identity_depends_on_env() {
        let mut job = JobConfig {
            cmd: "train".into(),
            after: vec![],
            tokens: BTreeMap::new(),
            env: BTreeMap::new(),
            locator: None,
        };
        let plain = job.identity();
        job.env.insert("SEED".into(), "1".into());
        assert_ne!(plain, job.identity());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let res: Result<RawPlanFile, _> = toml::from_str("[job.a]\ncmd = \"x\"\nwatch = []\n");
        assert!(res.is_err());
    }
}

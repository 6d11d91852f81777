// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{PlanFile, RawPlanFile};
use crate::errors::{IoResultExt, Result};

/// Read and deserialize a plan file without semantic validation.
///
/// Use [`load_and_validate`] to also check dependencies, tokens and cycles.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawPlanFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).with_path("reading plan", path)?;

    let plan: RawPlanFile = toml::from_str(&contents)?;

    Ok(plan)
}

/// Read a plan file and validate it.
///
/// This is the entry point for the rest of the application: unknown `after`
/// references, unknown tokens and dependency cycles are rejected here.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<PlanFile> {
    let raw = load_from_path(&path)?;
    let plan = PlanFile::try_from(raw)?;
    Ok(plan)
}

/// `Jobdag.toml` in the current directory.
pub fn default_plan_path() -> PathBuf {
    PathBuf::from("Jobdag.toml")
}

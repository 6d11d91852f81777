// src/job/locator.rs

use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::errors::{JobdagError, Result};

/// Unique, relative key of a job inside a workspace.
///
/// It doubles as the relative path of the job's files under
/// `<workspace>/jobs`, so it must stay inside that directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Locator(PathBuf);

impl Locator {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut normalised = PathBuf::new();

        for component in path.components() {
            match component {
                Component::Normal(part) => normalised.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    return Err(JobdagError::argument(format!(
                        "locator '{}' must not contain '..'",
                        path.display()
                    )));
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(JobdagError::argument(format!(
                        "locator '{}' must be relative",
                        path.display()
                    )));
                }
            }
        }

        if normalised.as_os_str().is_empty() {
            return Err(JobdagError::argument("locator must not be empty"));
        }
        Ok(Locator(normalised))
    }

    /// `<task>/<identity>`, the usual shape for jobs created from a plan.
    pub fn from_identity(task: &str, identity: &str) -> Result<Self> {
        if identity.is_empty() {
            return Err(JobdagError::argument(format!(
                "empty identity for task '{task}'"
            )));
        }
        Locator::new(Path::new(task).join(identity))
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl TryFrom<&str> for Locator {
    type Error = JobdagError;

    fn try_from(value: &str) -> Result<Self> {
        Locator::new(value)
    }
}

/// Content digest used as a job identity when the caller has none.
pub struct Identity;

impl Identity {
    /// Hex blake3 digest over `parts`; the parts are length-prefixed so that
    /// `["ab", "c"]` and `["a", "bc"]` differ.
    pub fn digest<I, S>(parts: I) -> String
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            let bytes = part.as_ref();
            hasher.update(&(bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        }
        hasher.finalize().to_hex()[..16].to_string()
    }
}

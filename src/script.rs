// src/script.rs

//! Rendering job command lines into self-contained shell scripts.
//!
//! The script owns the job's lock files once it runs: it checks they are
//! still present, drops the start lock, and removes the main lock on exit.
//! It writes the exit status to the code file and touches the done marker
//! on success, which is what makes a run resumable.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::connector::Connector;
use crate::errors::Result;
use crate::job::locator::Locator;
use crate::job::paths::JobPaths;

/// Exit status of a script that found one of its locks missing.
pub const MISSING_LOCK_EXIT: i32 = 17;

/// What a job runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandLine {
    /// Shell text, inserted as-is.
    Shell(String),
    /// Program and arguments, each quoted.
    Args(Vec<String>),
}

impl CommandLine {
    pub fn shell(text: impl Into<String>) -> Self {
        CommandLine::Shell(text.into())
    }

    pub fn args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandLine::Args(args.into_iter().map(Into::into).collect())
    }

    pub fn to_shell(&self) -> String {
        match self {
            CommandLine::Shell(text) => text.clone(),
            CommandLine::Args(args) => args
                .iter()
                .map(|a| quote(a))
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

/// Everything needed to render one job script.
pub struct ScriptRequest<'a> {
    pub connector: &'a dyn Connector,
    pub locator: &'a Locator,
    pub paths: &'a JobPaths,
    pub command: &'a CommandLine,
    pub environment: &'a BTreeMap<String, String>,
    /// Removed by the script when it exits.
    pub lock_files: Vec<PathBuf>,
    /// Removed by the script as soon as it has started.
    pub start_lock: Option<PathBuf>,
    pub working_dir: Option<PathBuf>,
}

/// Turns a [`ScriptRequest`] into an executable file.
pub trait ScriptBuilder: Send + Sync + std::fmt::Debug {
    /// Write the script; returns its path.
    fn write(&self, request: &ScriptRequest<'_>) -> Result<PathBuf>;

    /// Command line that launches the script at `script`.
    fn launch_command(&self, script: &str) -> Vec<String> {
        vec![script.to_string()]
    }
}

/// POSIX `sh` scripts.
#[derive(Debug, Clone)]
pub struct ShScriptBuilder {
    pub shell: String,
}

impl Default for ShScriptBuilder {
    fn default() -> Self {
        Self {
            shell: "/bin/sh".to_string(),
        }
    }
}

impl ShScriptBuilder {
    pub fn render(&self, request: &ScriptRequest<'_>) -> Result<String> {
        let connector = request.connector;
        let resolve = |p: &Path| connector.resolve(p).map(|s| quote(&s));

        let code = resolve(&request.paths.code())?;
        let done = resolve(&request.paths.done())?;
        let locks = request
            .lock_files
            .iter()
            .map(|p| resolve(p))
            .collect::<Result<Vec<_>>>()?;
        let start_lock = request.start_lock.as_deref().map(resolve).transpose()?;

        let mut s = String::new();
        // `write!` into a String can not fail.
        let _ = writeln!(s, "#!{}", self.shell);
        let _ = writeln!(s, "# jobdag job: {}", request.locator);
        let _ = writeln!(s);
        let _ = writeln!(s, "(set -o pipefail) 2>/dev/null && set -o pipefail");
        let _ = writeln!(s);

        for (key, value) in request.environment {
            let _ = writeln!(s, "export {key}={}", quote(value));
        }

        let _ = writeln!(s);
        let _ = writeln!(s, "# Check that the locks are still held");
        for lock in locks.iter().chain(&start_lock) {
            let _ = writeln!(s, "test -f {lock} || exit {MISSING_LOCK_EXIT}");
        }

        // From here on the locks belong to this script, whatever exits it.
        let owned: Vec<&str> = locks.iter().chain(&start_lock).map(String::as_str).collect();
        let _ = writeln!(s);
        let _ = writeln!(s, "cleanup() {{");
        let _ = writeln!(s, "  rm -f {}", owned.join(" "));
        let _ = writeln!(s, "}}");
        let _ = writeln!(s, "trap cleanup EXIT");
        let _ = writeln!(s, "trap 'echo 130 > {}; exit 130' INT", code);
        let _ = writeln!(s, "trap 'echo 143 > {}; exit 143' TERM", code);

        if let Some(start_lock) = &start_lock {
            let _ = writeln!(s);
            let _ = writeln!(s, "rm -f {start_lock}");
        }
        if let Some(dir) = &request.working_dir {
            let _ = writeln!(s, "cd {} || exit 1", resolve(dir)?);
        }

        let _ = writeln!(s);
        let _ = writeln!(s, "(");
        let _ = writeln!(s, "{}", request.command.to_shell());
        let _ = writeln!(s, ")");
        let _ = writeln!(s, "code=$?");
        let _ = writeln!(s, "echo $code > {code}");
        let _ = writeln!(s, "if test $code -ne 0; then");
        let _ = writeln!(s, "  exit $code");
        let _ = writeln!(s, "fi");
        let _ = writeln!(s, "touch {done}");

        Ok(s)
    }
}

impl ScriptBuilder for ShScriptBuilder {
    fn write(&self, request: &ScriptRequest<'_>) -> Result<PathBuf> {
        let path = request.paths.script();
        let contents = self.render(request)?;
        request.connector.write_file(&path, &contents)?;
        request.connector.set_executable(&path)?;
        debug!(locator = %request.locator, script = %path.display(), "job script written");
        Ok(path)
    }

    fn launch_command(&self, script: &str) -> Vec<String> {
        vec![self.shell.clone(), script.to_string()]
    }
}

/// Single-quote `value` for `sh`.
pub fn quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+=:,@%".contains(c));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

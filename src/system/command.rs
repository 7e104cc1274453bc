//! Process Command Runner
//!
//! Runs host tools through `tokio::process` with a per-command timeout.
//! The child is killed if the timeout elapses.

use crate::domain::ports::{CommandOutput, CommandRunner, CommandSpec};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// Runs commands on the local host
#[derive(Debug, Clone, Default)]
pub struct SystemCommandRunner {
    /// Prefix every command with `sudo -n`
    use_sudo: bool,
    /// Overrides `$PATH` for program lookup (for testing)
    search_path: Option<Vec<PathBuf>>,
}

impl SystemCommandRunner {
    pub fn new(use_sudo: bool) -> Self {
        Self {
            use_sudo,
            search_path: None,
        }
    }

    pub fn with_search_path(mut self, dirs: Vec<PathBuf>) -> Self {
        self.search_path = Some(dirs);
        self
    }

    fn search_dirs(&self) -> Vec<PathBuf> {
        match &self.search_path {
            Some(dirs) => dirs.clone(),
            None => std::env::var_os("PATH")
                .map(|p| std::env::split_paths(&p).collect())
                .unwrap_or_default(),
        }
    }

    fn build(&self, spec: &CommandSpec) -> Command {
        let mut cmd = if self.use_sudo {
            let mut cmd = Command::new("sudo");
            cmd.arg("-n").arg(&spec.program);
            cmd
        } else {
            Command::new(&spec.program)
        };
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        debug!(command = %spec, "Running command");

        let child = self.build(spec).spawn().map_err(|e| Error::CommandSpawn {
            command: spec.to_string(),
            source: e,
        })?;

        // Dropping the future on timeout drops the child, which kills it
        let output = match tokio::time::timeout(spec.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(command = %spec, "Command timed out");
                return Err(Error::CommandTimeout {
                    command: spec.to_string(),
                    secs: spec.timeout.as_secs(),
                });
            }
        };

        let output = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(command = %spec, code = ?output.code, "Command finished");
        Ok(output)
    }

    fn has_program(&self, program: &str) -> bool {
        if program.contains('/') {
            return is_executable(Path::new(program));
        }
        self.search_dirs()
            .iter()
            .any(|dir| is_executable(&dir.join(program)))
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

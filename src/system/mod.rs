//! Host Tooling Module
//!
//! Thin wrappers over the external tools the pool lifecycle drives:
//! `mdadm`, `mkfs.*`, `mount`/`umount`, `mkdir`/`rmdir` and `df`.
//! Every OS effect goes through a [`CommandRunner`] so the protocols can be
//! exercised without touching real devices.

pub mod command;
pub mod filesystem;
pub mod mdadm;

pub use command::*;
pub use filesystem::*;
pub use mdadm::*;

use crate::domain::ports::{CommandOutput, CommandRunner, CommandSpec};
use crate::error::{CommandFailure, Error, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for host tool invocations
#[derive(Debug, Clone)]
pub struct ToolsConfig {
    /// Directory under which pools are mounted, one subdirectory per pool uuid
    pub mount_base: PathBuf,
    /// Timeout for quick commands (mount, umount, df, ...)
    pub command_timeout: Duration,
    /// Timeout for array creation, formatting and package installs
    pub long_command_timeout: Duration,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            mount_base: PathBuf::from("/mnt/pools"),
            command_timeout: Duration::from_secs(60),
            long_command_timeout: Duration::from_secs(30 * 60),
        }
    }
}

// =============================================================================
// Host Tools
// =============================================================================

/// Entry point for every external command the manager runs
#[derive(Clone)]
pub struct HostTools {
    runner: Arc<dyn CommandRunner>,
    config: ToolsConfig,
}

impl HostTools {
    pub fn new(runner: Arc<dyn CommandRunner>, config: ToolsConfig) -> Self {
        Self { runner, config }
    }

    pub fn config(&self) -> &ToolsConfig {
        &self.config
    }

    /// Mount directory for a pool
    pub fn mount_dir(&self, pool: Uuid) -> PathBuf {
        self.config.mount_base.join(pool.to_string())
    }

    fn spec<I, S>(&self, program: &str, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new(program, args, self.config.command_timeout)
    }

    fn long_spec<I, S>(&self, program: &str, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new(program, args, self.config.long_command_timeout)
    }

    /// Run a command, mapping a non-zero exit, a spawn failure or a timeout
    /// onto `fail`
    async fn exec(
        &self,
        spec: CommandSpec,
        fail: impl FnOnce(CommandFailure) -> Error,
    ) -> Result<CommandOutput> {
        let output = match self.runner.run(&spec).await {
            Ok(output) => output,
            Err(Error::CommandSpawn { command, source }) => {
                return Err(fail(CommandFailure::unfinished(
                    command,
                    format!("failed to spawn: {}", source),
                )));
            }
            Err(Error::CommandTimeout { command, secs }) => {
                return Err(fail(CommandFailure::unfinished(
                    command,
                    format!("timed out after {}s", secs),
                )));
            }
            Err(e) => return Err(e),
        };
        if output.success() {
            Ok(output)
        } else {
            Err(fail(CommandFailure {
                command: spec.to_string(),
                code: output.code,
                stdout: output.stdout,
                stderr: output.stderr,
            }))
        }
    }
}

impl std::fmt::Debug for HostTools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostTools")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

//! Test doubles for the host ports

use crate::controlplane::{Orchestrator, OrchestratorConfig};
use crate::domain::drive::{DeviceType, DriveInfo, DriveKey};
use crate::domain::ports::{CommandOutput, CommandRunner, CommandSpec, DeviceScanner};
use crate::error::{Error, Result};
use crate::persistence::SledStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

pub const DF_TOTAL: u64 = 3_000_000_000_000;
pub const DF_AVAIL: u64 = 2_900_000_000_000;

/// Build a scanned drive keyed by serial
pub fn drive(name: &str, size_bytes: u64, fs_avail: u64) -> DriveInfo {
    let serial = format!("SN-{}", name);
    DriveInfo {
        name: name.to_string(),
        path: format!("/dev/{}", name),
        logical_block_size: 512,
        physical_block_size: 4096,
        size_bytes,
        rotational: true,
        model: "TEST DISK".into(),
        vendor: "ATA".into(),
        serial: serial.clone(),
        device_type: DeviceType::Hdd,
        fs_avail,
        drive_key: DriveKey::new(DriveKey::SERIAL, serial),
        ..Default::default()
    }
}

// =============================================================================
// Scripted Runner
// =============================================================================

/// A command that errors before producing any output
#[derive(Debug, Clone, Copy)]
enum Fault {
    Spawn,
    Timeout,
}

#[derive(Default)]
struct Script {
    commands: Vec<String>,
    programs: HashSet<String>,
    failures: Vec<(String, i32, String)>,
    faults: Vec<(String, Fault)>,
    stdouts: Vec<(String, String)>,
    installs: Vec<(String, String)>,
    delay: Option<Duration>,
}

/// Records every command and answers from a script instead of spawning
///
/// Commands succeed unless a failure prefix matches. `df` answers with a
/// fixed usage line reporting [`DF_TOTAL`] and [`DF_AVAIL`].
pub struct ScriptedRunner {
    script: Mutex<Script>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        let mut script = Script::default();
        script.programs.insert("mdadm".into());
        Self {
            script: Mutex::new(script),
        }
    }

    /// Commands run so far, rendered as `program arg...`
    pub fn commands(&self) -> Vec<String> {
        self.script.lock().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.script.lock().commands.clear();
    }

    /// Replace the set of programs reported as installed
    pub fn set_programs(&self, programs: &[&str]) {
        self.script.lock().programs = programs.iter().map(|p| p.to_string()).collect();
    }

    /// Fail commands starting with `prefix`
    pub fn fail_on(&self, prefix: &str, code: i32, stderr: &str) {
        self.script
            .lock()
            .failures
            .push((prefix.to_string(), code, stderr.to_string()));
    }

    /// Report commands starting with `prefix` as missing binaries
    pub fn spawn_error_on(&self, prefix: &str) {
        self.script.lock().faults.push((prefix.to_string(), Fault::Spawn));
    }

    /// Report commands starting with `prefix` as timed out
    pub fn timeout_on(&self, prefix: &str) {
        self.script.lock().faults.push((prefix.to_string(), Fault::Timeout));
    }

    pub fn clear_failures(&self) {
        let mut script = self.script.lock();
        script.failures.clear();
        script.faults.clear();
    }

    /// Answer commands starting with `prefix` with `stdout`
    pub fn stdout_on(&self, prefix: &str, stdout: &str) {
        self.script
            .lock()
            .stdouts
            .push((prefix.to_string(), stdout.to_string()));
    }

    /// Make `program` available once a command starting with `prefix` runs
    pub fn install_on(&self, prefix: &str, program: &str) {
        self.script
            .lock()
            .installs
            .push((prefix.to_string(), program.to_string()));
    }

    /// Sleep this long inside every command
    pub fn set_delay(&self, delay: Duration) {
        self.script.lock().delay = Some(delay);
    }
}

impl Default for ScriptedRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput> {
        let rendered = command.to_string();

        let delay = {
            let mut script = self.script.lock();
            script.commands.push(rendered.clone());
            script.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut script = self.script.lock();

        if let Some((_, fault)) = script
            .faults
            .iter()
            .find(|(prefix, _)| rendered.starts_with(prefix.as_str()))
        {
            return Err(match fault {
                Fault::Spawn => Error::CommandSpawn {
                    command: rendered,
                    source: std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "No such file or directory",
                    ),
                },
                Fault::Timeout => Error::CommandTimeout {
                    command: rendered,
                    secs: command.timeout.as_secs(),
                },
            });
        }

        if let Some((_, code, stderr)) = script
            .failures
            .iter()
            .find(|(prefix, _, _)| rendered.starts_with(prefix.as_str()))
        {
            return Ok(CommandOutput {
                code: Some(*code),
                stdout: String::new(),
                stderr: stderr.clone(),
            });
        }

        let installed: Vec<String> = script
            .installs
            .iter()
            .filter(|(prefix, _)| rendered.starts_with(prefix.as_str()))
            .map(|(_, program)| program.clone())
            .collect();
        script.programs.extend(installed);

        let stdout = script
            .stdouts
            .iter()
            .find(|(prefix, _)| rendered.starts_with(prefix.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_else(|| {
                if command.program == "df" {
                    let device = command.args.last().cloned().unwrap_or_default();
                    format!(
                        "Filesystem 1B-blocks Used Avail Use%\n{} {} {} {} 4%\n",
                        device,
                        DF_TOTAL,
                        DF_TOTAL - DF_AVAIL,
                        DF_AVAIL
                    )
                } else {
                    String::new()
                }
            });

        Ok(CommandOutput {
            code: Some(0),
            stdout,
            stderr: String::new(),
        })
    }

    fn has_program(&self, program: &str) -> bool {
        self.script.lock().programs.contains(program)
    }
}

// =============================================================================
// Static Scanner
// =============================================================================

/// Returns a fixed, replaceable set of drives
#[derive(Default)]
pub struct StaticScanner {
    drives: Mutex<Vec<DriveInfo>>,
}

impl StaticScanner {
    pub fn new(drives: Vec<DriveInfo>) -> Self {
        Self {
            drives: Mutex::new(drives),
        }
    }

    pub fn set(&self, drives: Vec<DriveInfo>) {
        *self.drives.lock() = drives;
    }
}

#[async_trait]
impl DeviceScanner for StaticScanner {
    async fn scan(&self) -> Result<Vec<DriveInfo>> {
        Ok(self.drives.lock().clone())
    }
}

// =============================================================================
// Orchestrator Harness
// =============================================================================

/// An orchestrator wired to scripted ports and a temporary store
pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub runner: Arc<ScriptedRunner>,
    pub scanner: Arc<StaticScanner>,
    pub store: Arc<SledStore>,
}

/// Build and reconcile an orchestrator over `drives`
pub async fn harness(drives: Vec<DriveInfo>) -> Harness {
    harness_with_store(drives, Arc::new(SledStore::temporary().unwrap())).await
}

/// Build and reconcile an orchestrator over `drives` and existing state
pub async fn harness_with_store(drives: Vec<DriveInfo>, store: Arc<SledStore>) -> Harness {
    let runner = Arc::new(ScriptedRunner::new());
    let scanner = Arc::new(StaticScanner::new(drives));

    let orchestrator = Orchestrator::new(
        OrchestratorConfig::default(),
        scanner.clone(),
        store.clone(),
        runner.clone(),
    );
    orchestrator.reconcile().await.unwrap();

    Harness {
        orchestrator,
        runner,
        scanner,
        store,
    }
}

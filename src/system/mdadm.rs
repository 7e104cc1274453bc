//! mdadm Wrapper
//!
//! Array creation and teardown. `mdadm` is installed on demand through the
//! first package manager found on the host.

use super::HostTools;
use crate::error::{Error, Result};
use tracing::{info, warn};

pub const MDADM: &str = "mdadm";

/// A package manager and the invocations that install `mdadm` with it
struct PackageManager {
    program: &'static str,
    steps: &'static [&'static [&'static str]],
}

/// Probed in order; the first one present wins
const PACKAGE_MANAGERS: &[PackageManager] = &[
    PackageManager {
        program: "apt-get",
        steps: &[&["update", "-y"], &["install", "-y", MDADM]],
    },
    PackageManager {
        program: "dnf",
        steps: &[&["install", "-y", MDADM]],
    },
    PackageManager {
        program: "yum",
        steps: &[&["install", "-y", MDADM]],
    },
    PackageManager {
        program: "pacman",
        steps: &[&["-Sy", "--noconfirm", MDADM]],
    },
];

impl HostTools {
    /// Make sure `mdadm` is on the search path, installing it if needed
    pub async fn ensure_mdadm(&self) -> Result<()> {
        if self.runner.has_program(MDADM) {
            return Ok(());
        }

        let manager = PACKAGE_MANAGERS
            .iter()
            .find(|m| self.runner.has_program(m.program))
            .ok_or(Error::PackageManagerMissing)?;

        info!("{} not found, installing with {}", MDADM, manager.program);

        for step in manager.steps {
            let spec = self.long_spec(manager.program, step.iter().copied());
            let output = self.runner.run(&spec).await.map_err(|e| Error::ToolInstallFailed {
                tool: MDADM.into(),
                manager: manager.program.into(),
                output: e.to_string(),
            })?;
            if !output.success() {
                warn!("{} failed: {}", spec, output.stderr.trim());
                return Err(Error::ToolInstallFailed {
                    tool: MDADM.into(),
                    manager: manager.program.into(),
                    output: format!("{}{}", output.stdout, output.stderr).trim().to_string(),
                });
            }
        }

        if !self.runner.has_program(MDADM) {
            return Err(Error::ToolInstallUnverified { tool: MDADM.into() });
        }

        info!("{} installed", MDADM);
        Ok(())
    }

    /// Create and start an array from `members`
    pub async fn create_array(
        &self,
        array: &str,
        level: u32,
        name: &str,
        members: &[String],
    ) -> Result<()> {
        self.ensure_mdadm().await?;

        let mut args = vec![
            "--create".to_string(),
            "--verbose".to_string(),
            array.to_string(),
            format!("--level={}", level),
            format!("--raid-devices={}", members.len()),
            format!("--name={}", name),
            // Skip the interactive confirmation prompt
            "--run".to_string(),
        ];
        args.extend(members.iter().cloned());

        self.exec(self.long_spec(MDADM, args), Error::ArrayBuildFailed)
            .await?;
        Ok(())
    }

    pub async fn remove_array(&self, array: &str) -> Result<()> {
        self.exec(self.spec(MDADM, ["--remove", array]), Error::ArrayRemoveFailed)
            .await?;
        Ok(())
    }

    pub async fn stop_array(&self, array: &str) -> Result<()> {
        self.exec(self.spec(MDADM, ["--stop", array]), Error::ArrayStopFailed)
            .await?;
        Ok(())
    }

    /// Clear RAID metadata so members are not detected as part of a defunct array
    pub async fn zero_superblocks(&self, members: &[String]) -> Result<()> {
        let args = std::iter::once("--zero-superblock".to_string()).chain(members.iter().cloned());
        self.exec(self.spec(MDADM, args), Error::SuperblockZeroFailed)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::error::Error;
    use crate::system::{HostTools, ToolsConfig};
    use crate::testing::ScriptedRunner;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn tools(runner: &Arc<ScriptedRunner>) -> HostTools {
        HostTools::new(runner.clone(), ToolsConfig::default())
    }

    #[tokio::test]
    async fn test_create_array_args() {
        let runner = Arc::new(ScriptedRunner::new());
        let members = vec!["/dev/sdb".to_string(), "/dev/sdc".to_string()];

        tools(&runner)
            .create_array("/dev/md/abcd", 1, "tank", &members)
            .await
            .unwrap();

        assert_eq!(
            runner.commands(),
            vec!["mdadm --create --verbose /dev/md/abcd --level=1 --raid-devices=2 --name=tank --run /dev/sdb /dev/sdc"]
        );
    }

    #[tokio::test]
    async fn test_installs_with_first_package_manager() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.set_programs(&["dnf", "yum"]);
        runner.install_on("dnf install -y mdadm", "mdadm");

        tools(&runner).ensure_mdadm().await.unwrap();

        assert_eq!(runner.commands(), vec!["dnf install -y mdadm"]);
    }

    #[tokio::test]
    async fn test_apt_runs_update_first() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.set_programs(&["apt-get"]);
        runner.install_on("apt-get install -y mdadm", "mdadm");

        tools(&runner).ensure_mdadm().await.unwrap();

        assert_eq!(
            runner.commands(),
            vec!["apt-get update -y", "apt-get install -y mdadm"]
        );
    }

    #[tokio::test]
    async fn test_no_package_manager() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.set_programs(&[]);

        assert_matches!(
            tools(&runner).ensure_mdadm().await,
            Err(Error::PackageManagerMissing)
        );
        assert!(runner.commands().is_empty());
    }

    #[tokio::test]
    async fn test_install_failure_and_verification() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.set_programs(&["pacman"]);
        runner.fail_on("pacman", 1, "target not found: mdadm");

        let err = tools(&runner).ensure_mdadm().await.unwrap_err();
        assert_matches!(&err, Error::ToolInstallFailed { manager, .. } if manager == "pacman");
        assert!(err.to_string().contains("target not found"));

        // Install "succeeds" but the binary never appears
        let runner = Arc::new(ScriptedRunner::new());
        runner.set_programs(&["yum"]);
        assert_matches!(
            tools(&runner).ensure_mdadm().await,
            Err(Error::ToolInstallUnverified { .. })
        );
    }

    #[tokio::test]
    async fn test_create_timeout_is_a_build_failure() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.timeout_on("mdadm --create");
        let members = vec!["/dev/sdb".to_string(), "/dev/sdc".to_string()];

        let err = tools(&runner)
            .create_array("/dev/md/abcd", 1, "tank", &members)
            .await
            .unwrap_err();
        assert_matches!(&err, Error::ArrayBuildFailed(failure) if failure.code.is_none());
        assert!(err.to_string().contains("timed out after 1800s"));
    }

    #[tokio::test]
    async fn test_stop_spawn_failure_is_a_stop_failure() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.spawn_error_on("mdadm --stop");

        let err = tools(&runner).stop_array("/dev/md/abcd").await.unwrap_err();
        assert_matches!(err, Error::ArrayStopFailed(_));
    }

    #[tokio::test]
    async fn test_install_spawn_failure() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.set_programs(&["dnf"]);
        runner.spawn_error_on("dnf");

        assert_matches!(
            tools(&runner).ensure_mdadm().await,
            Err(Error::ToolInstallFailed { manager, .. }) if manager == "dnf"
        );
    }
}

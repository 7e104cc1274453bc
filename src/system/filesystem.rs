//! Filesystem Tools
//!
//! Formatting, mount directory management, mounting and capacity queries.

use super::HostTools;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Filesystems a pool may be formatted with
pub const SUPPORTED_FORMATS: &[&str] = &["ext4", "xfs", "btrfs"];

/// Check that `format` names a supported filesystem
pub fn validate_format(format: &str) -> Result<()> {
    if SUPPORTED_FORMATS.contains(&format) {
        Ok(())
    } else {
        Err(Error::UnsupportedFormat(format.to_string()))
    }
}

/// ext tools spell "force" as `-F`, the others as `-f`
fn force_flag(format: &str) -> &'static str {
    if format.starts_with("ext") {
        "-F"
    } else {
        "-f"
    }
}

/// Total and available bytes of a mounted filesystem
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capacity {
    pub total: u64,
    pub available: u64,
}

/// Parse `df -B1 --output=source,size,used,avail,pcent` output
pub fn parse_df_output(output: &str) -> Result<Capacity> {
    let line = output
        .lines()
        .nth(1)
        .ok_or_else(|| Error::CapacityParseFailed(format!("unexpected df output: {:?}", output)))?;

    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 4 {
        return Err(Error::CapacityParseFailed(format!(
            "unexpected df line: {:?}",
            line
        )));
    }

    let parse = |field: &str, what: &str| {
        field.parse::<u64>().map_err(|e| {
            Error::CapacityParseFailed(format!("invalid {} {:?}: {}", what, field, e))
        })
    };

    Ok(Capacity {
        total: parse(fields[1], "size")?,
        available: parse(fields[3], "avail")?,
    })
}

impl HostTools {
    pub async fn make_filesystem(&self, format: &str, device: &str) -> Result<()> {
        let program = format!("mkfs.{}", format);
        self.exec(
            self.long_spec(&program, [force_flag(format), device]),
            Error::FormatFailed,
        )
        .await?;
        Ok(())
    }

    pub async fn create_mount_dir(&self, dir: &Path) -> Result<()> {
        let dir = dir.to_string_lossy().into_owned();
        self.exec(self.spec("mkdir", ["-p", dir.as_str()]), Error::MountDirCreateFailed)
            .await?;
        Ok(())
    }

    pub async fn mount(&self, device: &str, dir: &Path) -> Result<()> {
        let dir = dir.to_string_lossy().into_owned();
        self.exec(self.spec("mount", [device, dir.as_str()]), Error::MountFailed)
            .await?;
        Ok(())
    }

    pub async fn unmount(&self, dir: &Path) -> Result<()> {
        let dir = dir.to_string_lossy().into_owned();
        self.exec(self.spec("umount", [dir.as_str()]), Error::UnmountFailed)
            .await?;
        Ok(())
    }

    pub async fn remove_mount_dir(&self, dir: &Path) -> Result<()> {
        let dir = dir.to_string_lossy().into_owned();
        self.exec(self.spec("rmdir", [dir.as_str()]), Error::MountDirRemoveFailed)
            .await?;
        Ok(())
    }

    /// Query filesystem usage of a mounted device
    pub async fn capacity(&self, device: &str) -> Result<Capacity> {
        let output = self
            .exec(
                self.spec(
                    "df",
                    ["-B1", "--output=source,size,used,avail,pcent", device],
                ),
                Error::CapacityReadFailed,
            )
            .await?;
        parse_df_output(&output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::ToolsConfig;
    use crate::testing::ScriptedRunner;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    #[test]
    fn test_parse_df_output() {
        let out = "Filesystem            1B-blocks       Used      Avail Use%\n\
                   /dev/md127        1006632960000   81920000 955000000000   1%\n";
        let cap = parse_df_output(out).unwrap();
        assert_eq!(cap.total, 1_006_632_960_000);
        assert_eq!(cap.available, 955_000_000_000);
    }

    #[test]
    fn test_parse_df_output_errors() {
        assert_matches!(parse_df_output(""), Err(Error::CapacityParseFailed(_)));
        assert_matches!(
            parse_df_output("Filesystem 1B-blocks Used Avail Use%\n"),
            Err(Error::CapacityParseFailed(_))
        );
        assert_matches!(
            parse_df_output("header\n/dev/md0 12 3\n"),
            Err(Error::CapacityParseFailed(_))
        );
        assert_matches!(
            parse_df_output("header\n/dev/md0 12G 3 9G 25%\n"),
            Err(Error::CapacityParseFailed(_))
        );
    }

    #[test]
    fn test_validate_format() {
        assert!(validate_format("ext4").is_ok());
        assert!(validate_format("btrfs").is_ok());
        assert_matches!(validate_format("ntfs"), Err(Error::UnsupportedFormat(_)));
        assert_matches!(validate_format("EXT4"), Err(Error::UnsupportedFormat(_)));
    }

    #[tokio::test]
    async fn test_format_uses_force_flag() {
        let runner = Arc::new(ScriptedRunner::new());
        let tools = HostTools::new(runner.clone(), ToolsConfig::default());

        tools.make_filesystem("ext4", "/dev/md/a").await.unwrap();
        tools.make_filesystem("xfs", "/dev/md/b").await.unwrap();

        assert_eq!(
            runner.commands(),
            vec!["mkfs.ext4 -F /dev/md/a", "mkfs.xfs -f /dev/md/b"]
        );
    }

    #[tokio::test]
    async fn test_capacity_read_failure() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.fail_on("df", 1, "df: /dev/md/x: No such file or directory");
        let tools = HostTools::new(runner, ToolsConfig::default());

        let err = tools.capacity("/dev/md/x").await.unwrap_err();
        assert_matches!(err, Error::CapacityReadFailed(_));
        assert!(err.to_string().contains("No such file"));
    }

    #[tokio::test]
    async fn test_missing_mkfs_is_a_format_failure() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.spawn_error_on("mkfs.xfs");
        let tools = HostTools::new(runner, ToolsConfig::default());

        let err = tools.make_filesystem("xfs", "/dev/md/x").await.unwrap_err();
        assert_matches!(&err, Error::FormatFailed(failure) if failure.command == "mkfs.xfs -f /dev/md/x");
        assert_eq!(err.kind(), crate::error::ErrorKind::Infrastructure);
        assert!(err.to_string().contains("failed to spawn"));
    }

    #[tokio::test]
    async fn test_mount_and_capacity_timeouts() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.timeout_on("mount");
        runner.timeout_on("df");
        let tools = HostTools::new(runner, ToolsConfig::default());

        assert_matches!(
            tools.mount("/dev/md/x", Path::new("/mnt/pools/x")).await,
            Err(Error::MountFailed(_))
        );
        let err = tools.capacity("/dev/md/x").await.unwrap_err();
        assert_matches!(err, Error::CapacityReadFailed(_));
        assert!(err.to_string().contains("timed out after 60s"));
    }
}

//! Block Device Scanner
//!
//! Enumerates block devices from sysfs and joins them with their by-id
//! links, the mount table and filesystem usage. Unreadable attributes
//! degrade to zero or empty instead of failing the scan.

use super::identity::derive_key;
use crate::domain::drive::{DeviceType, DriveInfo, PartitionInfo};
use crate::domain::ports::DeviceScanner;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

// =============================================================================
// Constants
// =============================================================================

/// sysfs reports sizes in 512-byte sectors regardless of the logical block size
const SECTOR_SIZE: u64 = 512;

// =============================================================================
// Scanner Configuration
// =============================================================================

/// Configuration for the block device scanner
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Include loopback devices
    pub include_loopback: bool,
    /// Include RAM disks
    pub include_ram: bool,
    /// Include device mapper devices
    pub include_dm: bool,
    /// Path to sysfs (for testing)
    pub sysfs_path: PathBuf,
    /// Path to the device tree, holding `disk/by-id` (for testing)
    pub dev_path: PathBuf,
    /// Mount table in fstab format (for testing)
    pub mounts_path: PathBuf,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            include_loopback: false,
            include_ram: false,
            include_dm: false,
            sysfs_path: PathBuf::from("/sys"),
            dev_path: PathBuf::from("/dev"),
            mounts_path: PathBuf::from("/proc/self/mounts"),
        }
    }
}

// =============================================================================
// Mount Table
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
struct MountEntry {
    mount_point: String,
    fs_type: String,
}

/// Parse a mount table, keeping the first mount of each source
fn parse_mounts(content: &str) -> HashMap<String, MountEntry> {
    let mut mounts = HashMap::new();
    for line in content.lines() {
        let mut fields = line.split_whitespace();
        let (Some(source), Some(target), Some(fs_type)) = (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        mounts
            .entry(unescape_mount_field(source))
            .or_insert_with(|| MountEntry {
                mount_point: unescape_mount_field(target),
                fs_type: fs_type.to_string(),
            });
    }
    mounts
}

/// Decode the octal escapes (`\040` for space, ...) used in mount tables
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = digits.iter().fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Bytes available to unprivileged users on the filesystem at `path`
fn filesystem_available(path: &str) -> u64 {
    match nix::sys::statvfs::statvfs(path) {
        Ok(stat) => (stat.blocks_available() as u64).saturating_mul(stat.fragment_size() as u64),
        Err(e) => {
            debug!("statvfs {} failed: {}", path, e);
            0
        }
    }
}

// =============================================================================
// Sysfs Scanner
// =============================================================================

/// Scans block devices on Linux systems
#[derive(Debug, Clone)]
pub struct SysfsScanner {
    config: ScannerConfig,
}

impl SysfsScanner {
    /// Create a new scanner
    pub fn new(config: ScannerConfig) -> Self {
        Self { config }
    }

    /// Enumerate block devices synchronously
    pub fn scan_blocking(&self) -> Vec<DriveInfo> {
        let block_path = self.config.sysfs_path.join("class/block");
        let entries = match fs::read_dir(&block_path) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot read {}: {}", block_path.display(), e);
                return Vec::new();
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();

        let by_id = self.read_by_id_links();
        let mounts = self.read_mounts();

        let mut drives = Vec::new();
        for name in names {
            if !self.should_include_device(&name) {
                continue;
            }

            let sysfs_path = block_path.join(&name);
            if self.is_partition(&sysfs_path) {
                continue;
            }

            drives.push(self.scan_device(&name, &sysfs_path, &by_id, &mounts));
        }

        info!("Scanned {} block devices", drives.len());
        drives
    }

    /// Scan one whole-disk device
    fn scan_device(
        &self,
        name: &str,
        sysfs_path: &Path,
        by_id: &HashMap<String, Vec<String>>,
        mounts: &HashMap<String, MountEntry>,
    ) -> DriveInfo {
        let path = format!("/dev/{}", name);

        let sectors: u64 = self.read_number(sysfs_path, "size");
        let logical_block_size = self.read_number(sysfs_path, "queue/logical_block_size");
        let physical_block_size = self.read_number(sysfs_path, "queue/physical_block_size");
        let rotational = self
            .read_sysfs_attr(sysfs_path, "queue/rotational")
            .map(|r| r == "1")
            .unwrap_or(false);

        let model = self.read_sysfs_attr(sysfs_path, "device/model").unwrap_or_default();
        let vendor = self.read_sysfs_attr(sysfs_path, "device/vendor").unwrap_or_default();
        let serial = self.read_sysfs_attr(sysfs_path, "device/serial").unwrap_or_default();
        let wwid = self
            .read_sysfs_attr(sysfs_path, "wwid")
            .or_else(|_| self.read_sysfs_attr(sysfs_path, "device/wwid"))
            .unwrap_or_default();

        let (mount_point, fs_type, fs_avail) = match mounts.get(&path) {
            Some(m) => (
                m.mount_point.clone(),
                m.fs_type.clone(),
                filesystem_available(&m.mount_point),
            ),
            None => (String::new(), String::new(), 0),
        };

        let mut links = by_id.get(name).cloned().unwrap_or_default();
        links.sort();

        let mut drive = DriveInfo {
            name: name.to_string(),
            path,
            logical_block_size,
            physical_block_size,
            size_bytes: sectors.saturating_mul(SECTOR_SIZE),
            rotational,
            model,
            vendor,
            serial,
            wwid,
            by_id: links,
            device_type: self.detect_device_type(name, sysfs_path),
            mount_point,
            fs_type,
            fs_avail,
            partitions: self.scan_partitions(name, sysfs_path, mounts),
            ..Default::default()
        };
        drive.drive_key = derive_key(&drive);

        debug!(
            "Scanned {} ({} bytes, key {})",
            drive.name, drive.size_bytes, drive.drive_key
        );
        drive
    }

    /// Partitions appear as children of the disk's sysfs directory
    fn scan_partitions(
        &self,
        disk: &str,
        sysfs_path: &Path,
        mounts: &HashMap<String, MountEntry>,
    ) -> Vec<PartitionInfo> {
        let Ok(entries) = fs::read_dir(sysfs_path) else {
            return Vec::new();
        };

        let mut partitions: Vec<PartitionInfo> = entries
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name().to_string_lossy().starts_with(disk) && self.is_partition(&e.path())
            })
            .map(|e| {
                let path = format!("/dev/{}", e.file_name().to_string_lossy());
                match mounts.get(&path) {
                    Some(m) => PartitionInfo {
                        fs_avail: filesystem_available(&m.mount_point),
                        mount_point: m.mount_point.clone(),
                        fs_type: m.fs_type.clone(),
                        path,
                    },
                    None => PartitionInfo {
                        path,
                        ..Default::default()
                    },
                }
            })
            .collect();
        partitions.sort_by(|a, b| a.path.cmp(&b.path));
        partitions
    }

    /// Map device name -> names of the by-id links resolving to it
    fn read_by_id_links(&self) -> HashMap<String, Vec<String>> {
        let dir = self.config.dev_path.join("disk/by-id");
        let mut links: HashMap<String, Vec<String>> = HashMap::new();

        let Ok(entries) = fs::read_dir(&dir) else {
            debug!("No by-id directory at {}", dir.display());
            return links;
        };

        for entry in entries.filter_map(|e| e.ok()) {
            let Ok(target) = fs::read_link(entry.path()) else {
                continue;
            };
            if let Some(device) = target.file_name() {
                links
                    .entry(device.to_string_lossy().into_owned())
                    .or_default()
                    .push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        links
    }

    fn read_mounts(&self) -> HashMap<String, MountEntry> {
        match fs::read_to_string(&self.config.mounts_path) {
            Ok(content) => parse_mounts(&content),
            Err(e) => {
                warn!("Cannot read {}: {}", self.config.mounts_path.display(), e);
                HashMap::new()
            }
        }
    }

    /// Classify a device from its name and rotational flag
    fn detect_device_type(&self, name: &str, sysfs_path: &Path) -> DeviceType {
        if name.starts_with("nvme") {
            return DeviceType::Nvme;
        }
        if name.starts_with("loop") {
            return DeviceType::Loop;
        }

        match self.read_sysfs_attr(sysfs_path, "queue/rotational").as_deref() {
            Ok("0") => DeviceType::Ssd,
            Ok("1") => DeviceType::Hdd,
            _ => DeviceType::Unknown,
        }
    }

    /// Check if a path is a partition
    fn is_partition(&self, sysfs_path: &Path) -> bool {
        // Partitions have a "partition" file
        sysfs_path.join("partition").exists()
    }

    /// Check if a device should be included
    fn should_include_device(&self, name: &str) -> bool {
        if !self.config.include_loopback && name.starts_with("loop") {
            return false;
        }
        if !self.config.include_ram && name.starts_with("ram") {
            return false;
        }
        if !self.config.include_dm && name.starts_with("dm-") {
            return false;
        }

        // md arrays are what we build, never members
        !(name.starts_with("md") || name.starts_with("zram") || name.starts_with("sr"))
    }

    /// Read a trimmed sysfs attribute
    fn read_sysfs_attr(&self, base_path: &Path, attr: &str) -> Result<String> {
        let path = base_path.join(attr);
        fs::read_to_string(&path)
            .map(|s| s.trim().to_string())
            .map_err(|e| Error::Internal(format!("Failed to read {}: {}", path.display(), e)))
    }

    fn read_number(&self, base_path: &Path, attr: &str) -> u64 {
        self.read_sysfs_attr(base_path, attr)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }
}

#[async_trait]
impl DeviceScanner for SysfsScanner {
    async fn scan(&self) -> Result<Vec<DriveInfo>> {
        let scanner = self.clone();
        tokio::task::spawn_blocking(move || scanner.scan_blocking())
            .await
            .map_err(|e| Error::Internal(format!("Scanner task failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct FakeHost {
        root: TempDir,
    }

    impl FakeHost {
        fn new() -> Self {
            let root = tempfile::tempdir().unwrap();
            fs::create_dir_all(root.path().join("sys/class/block")).unwrap();
            fs::create_dir_all(root.path().join("dev/disk/by-id")).unwrap();
            fs::write(root.path().join("mounts"), "").unwrap();
            Self { root }
        }

        fn config(&self) -> ScannerConfig {
            ScannerConfig {
                sysfs_path: self.root.path().join("sys"),
                dev_path: self.root.path().join("dev"),
                mounts_path: self.root.path().join("mounts"),
                ..Default::default()
            }
        }

        fn attr(&self, device: &str, attr: &str, value: &str) {
            let path = self.root.path().join("sys/class/block").join(device).join(attr);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, format!("{}\n", value)).unwrap();
        }

        fn disk(&self, name: &str, sectors: u64, rotational: bool) {
            self.attr(name, "size", &sectors.to_string());
            self.attr(name, "queue/rotational", if rotational { "1" } else { "0" });
            self.attr(name, "queue/logical_block_size", "512");
            self.attr(name, "queue/physical_block_size", "4096");
        }

        fn partition(&self, disk: &str, name: &str) {
            self.attr(&format!("{}/{}", disk, name), "partition", "1");
            // Partitions are also listed at the top level
            self.attr(name, "partition", "1");
        }

        fn link(&self, link: &str, device: &str) {
            std::os::unix::fs::symlink(
                format!("../../{}", device),
                self.root.path().join("dev/disk/by-id").join(link),
            )
            .unwrap();
        }

        fn mounts(&self, content: &str) {
            fs::write(self.root.path().join("mounts"), content).unwrap();
        }
    }

    #[test]
    fn test_scan_reads_attributes_and_links() {
        let host = FakeHost::new();
        host.disk("sda", 976_773_168, false);
        host.attr("sda", "device/model", "Samsung SSD 870");
        host.attr("sda", "device/vendor", "ATA");
        host.attr("sda", "device/serial", "S5Y1NX0R");
        host.link("ata-Samsung_SSD_870_S5Y1NX0R", "sda");
        host.link("wwn-0x5002538f4123abcd", "sda");
        host.link("ata-Samsung_SSD_870_S5Y1NX0R-part1", "sda1");
        host.partition("sda", "sda1");

        let drives = SysfsScanner::new(host.config()).scan_blocking();
        assert_eq!(drives.len(), 1);

        let sda = &drives[0];
        assert_eq!(sda.path, "/dev/sda");
        assert_eq!(sda.size_bytes, 976_773_168 * 512);
        assert_eq!(sda.physical_block_size, 4096);
        assert_eq!(sda.device_type, DeviceType::Ssd);
        assert!(!sda.rotational);
        assert_eq!(sda.model, "Samsung SSD 870");
        assert_eq!(sda.by_id, vec!["ata-Samsung_SSD_870_S5Y1NX0R", "wwn-0x5002538f4123abcd"]);
        assert_eq!(sda.drive_key.to_string(), "by-id:wwn-0x5002538f4123abcd");
        assert_eq!(sda.partitions.len(), 1);
        assert_eq!(sda.partitions[0].path, "/dev/sda1");
        assert_eq!(sda.uuid, None);
    }

    #[test]
    fn test_oversized_sector_count_saturates() {
        let host = FakeHost::new();
        host.disk("sdb", u64::MAX, true);

        let drives = SysfsScanner::new(host.config()).scan_blocking();
        assert_eq!(drives.len(), 1);
        assert_eq!(drives[0].size_bytes, u64::MAX);
    }

    #[test]
    fn test_scan_skips_virtual_devices() {
        let host = FakeHost::new();
        host.disk("sdb", 1_000, true);
        host.disk("loop0", 1_000, false);
        host.disk("md127", 1_000, false);
        host.disk("dm-0", 1_000, false);
        host.disk("zram0", 1_000, false);

        let names: Vec<_> = SysfsScanner::new(host.config())
            .scan_blocking()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["sdb"]);

        let config = ScannerConfig {
            include_loopback: true,
            ..host.config()
        };
        let drives = SysfsScanner::new(config).scan_blocking();
        assert_eq!(drives.len(), 2);
        assert_eq!(drives[0].device_type, DeviceType::Loop);
    }

    #[test]
    fn test_missing_attributes_degrade() {
        let host = FakeHost::new();
        fs::create_dir_all(host.root.path().join("sys/class/block/vda")).unwrap();

        let drives = SysfsScanner::new(host.config()).scan_blocking();
        assert_eq!(drives.len(), 1);
        assert_eq!(drives[0].size_bytes, 0);
        assert_eq!(drives[0].device_type, DeviceType::Unknown);
        assert_eq!(drives[0].drive_key.kind, "hash");
        assert_eq!(drives[0].drive_key.value, "vda___0");
    }

    #[test]
    fn test_missing_sysfs_yields_empty_scan() {
        let config = ScannerConfig {
            sysfs_path: PathBuf::from("/nonexistent/sys"),
            ..Default::default()
        };
        assert!(SysfsScanner::new(config).scan_blocking().is_empty());
    }

    #[test]
    fn test_mount_state_is_joined() {
        let host = FakeHost::new();
        host.disk("sdc", 2_000, true);
        host.partition("sdc", "sdc1");
        host.mounts(
            "/dev/sdc1 /mnt/no\\040such\\040dir ext4 rw,relatime 0 0\n\
             proc /proc proc rw 0 0\n",
        );

        let drives = SysfsScanner::new(host.config()).scan_blocking();
        let part = &drives[0].partitions[0];
        assert_eq!(part.mount_point, "/mnt/no such dir");
        assert_eq!(part.fs_type, "ext4");
        assert_eq!(part.fs_avail, 0);
        assert!(!drives[0].is_mounted());
    }

    #[test]
    fn test_unescape_mount_field() {
        assert_eq!(unescape_mount_field("/mnt/a\\040b"), "/mnt/a b");
        assert_eq!(unescape_mount_field("/mnt/tab\\011"), "/mnt/tab\t");
        assert_eq!(unescape_mount_field("/plain"), "/plain");
        assert_eq!(unescape_mount_field("/trailing\\"), "/trailing\\");
    }

    #[tokio::test]
    async fn test_scan_via_port() {
        let host = FakeHost::new();
        host.disk("sdd", 8, true);
        let scanner: Box<dyn DeviceScanner> = Box::new(SysfsScanner::new(host.config()));
        let drives = scanner.scan().await.unwrap();
        assert_eq!(drives[0].device_type, DeviceType::Hdd);
    }
}

//! WWID to block device resolution
//!
//! Lookup order: multipath aggregate, `/dev/disk/by-id` symlinks, raw
//! sysfs VPD page 0x80 scan. Matches are always exact (case-insensitive
//! for WWIDs) — substring matching has returned sibling LUNs in the field
//! and is banned here.

use crate::error::{Error, Result};
use crate::san::process::{validate_arg, CommandRunner};
use crate::san::{rescan_scsi_hosts, trigger_udev, Multipath, SanFabric};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Binds array-side WWIDs to local block devices
#[derive(Debug, Clone)]
pub struct DeviceResolver {
    pub(crate) runner: CommandRunner,
    pub(crate) multipath: Multipath,
    pub(crate) sysfs_root: PathBuf,
    pub(crate) dev_root: PathBuf,
    pub(crate) proc_root: PathBuf,
    /// Pause between wait-loop iterations
    pub(crate) poll_interval: Duration,
    /// Pause for device-mapper to settle during teardown
    pub(crate) settle_delay: Duration,
}

impl DeviceResolver {
    pub fn new(runner: CommandRunner, multipath: Multipath) -> Self {
        Self {
            runner,
            multipath,
            sysfs_root: PathBuf::from("/sys"),
            dev_root: PathBuf::from("/dev"),
            proc_root: PathBuf::from("/proc"),
            poll_interval: Duration::from_secs(2),
            settle_delay: Duration::from_secs(1),
        }
    }

    /// Override filesystem roots (tests)
    pub fn with_roots(mut self, sysfs: PathBuf, dev: PathBuf, proc: PathBuf) -> Self {
        self.sysfs_root = sysfs;
        self.dev_root = dev;
        self.proc_root = proc;
        self
    }

    /// Override delays (tests)
    pub fn with_delays(mut self, poll: Duration, settle: Duration) -> Self {
        self.poll_interval = poll;
        self.settle_delay = settle;
        self
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Resolve a WWID to a local block device path, if one exists.
    pub async fn lookup(&self, wwid: &str) -> Result<Option<PathBuf>> {
        validate_arg(wwid)?;

        if let Some(path) = self.lookup_multipath(wwid).await? {
            return Ok(Some(path));
        }
        if let Some(path) = self.lookup_by_id(wwid)? {
            return Ok(Some(path));
        }
        self.lookup_vpd(wwid)
    }

    async fn lookup_multipath(&self, wwid: &str) -> Result<Option<PathBuf>> {
        let maps = match self.multipath.list_maps().await {
            Ok(maps) => maps,
            Err(e) => {
                debug!("multipathd map listing unavailable: {e}");
                return Ok(None);
            }
        };
        for (name, map_wwid) in maps {
            if map_wwid.eq_ignore_ascii_case(wwid) {
                let path = self.dev_root.join("mapper").join(&name);
                return Ok(Some(untaint(path)?));
            }
        }
        Ok(None)
    }

    fn lookup_by_id(&self, wwid: &str) -> Result<Option<PathBuf>> {
        let by_id = self.dev_root.join("disk/by-id");
        if !by_id.exists() {
            return Ok(None);
        }
        let wanted_wwn = format!("wwn-0x{wwid}");
        let wanted_scsi = format!("scsi-{wwid}");
        for entry in std::fs::read_dir(&by_id)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            // Exact names only; a prefix match would also hit partitions
            // (-part1) and a substring match has hit sibling LUNs.
            if !name.eq_ignore_ascii_case(&wanted_wwn) && !name.eq_ignore_ascii_case(&wanted_scsi)
            {
                continue;
            }
            let resolved = std::fs::canonicalize(entry.path()).unwrap_or_else(|_| entry.path());
            return Ok(Some(untaint(resolved)?));
        }
        Ok(None)
    }

    fn lookup_vpd(&self, wwid: &str) -> Result<Option<PathBuf>> {
        let serial = match wwid.strip_prefix(crate::naming::WWID_PREFIX) {
            Some(serial) => serial.to_ascii_lowercase(),
            None => return Ok(None),
        };
        let block_dir = self.sysfs_root.join("block");
        if !block_dir.exists() {
            return Ok(None);
        }
        for entry in std::fs::read_dir(&block_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let vpd = entry.path().join("device/vpd_pg80");
            let Ok(raw) = std::fs::read(&vpd) else {
                continue;
            };
            if let Some(found) = parse_vpd_pg80_serial(&raw) {
                if found.to_ascii_lowercase() == serial {
                    return Ok(Some(untaint(self.dev_root.join(&name))?));
                }
            }
        }
        Ok(None)
    }

    // =========================================================================
    // Wait Loop
    // =========================================================================

    /// Wait for the device backing `wwid` to materialize. Each iteration
    /// runs the protocol rescan, a SCSI host rescan, a multipath reload,
    /// and a udev trigger before looking again; rescan failures are
    /// logged and the loop keeps going until the deadline.
    pub async fn wait_for_device(
        &self,
        wwid: &str,
        fabric: &dyn SanFabric,
        timeout: Duration,
    ) -> Result<PathBuf> {
        let started = Instant::now();
        loop {
            if let Err(e) = fabric.rescan_fabric().await {
                warn!("Fabric rescan failed while waiting for {wwid}: {e}");
            }
            if let Err(e) = rescan_scsi_hosts(&self.sysfs_root) {
                warn!("SCSI host rescan failed: {e}");
            }
            if let Err(e) = self.multipath.reconfigure().await {
                warn!("Multipath reload failed: {e}");
            }
            if let Err(e) = trigger_udev(&self.runner).await {
                warn!("udev trigger failed: {e}");
            }

            match self.lookup(wwid).await {
                Ok(Some(path)) => {
                    debug!(
                        "Device for {wwid} appeared at {} after {:?}",
                        path.display(),
                        started.elapsed()
                    );
                    return Ok(path);
                }
                Ok(None) => {}
                Err(e) => warn!("Lookup for {wwid} failed: {e}"),
            }

            if started.elapsed() >= timeout {
                return Err(Error::DeviceTimeout {
                    wwid: wwid.to_string(),
                    seconds: timeout.as_secs(),
                    diagnostics: fabric.diagnostics().await,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    // =========================================================================
    // Topology
    // =========================================================================

    /// The `dm-N` sysfs node behind a mapper name, if the map exists.
    pub fn dm_node(&self, map_name: &str) -> Result<Option<String>> {
        let block_dir = self.sysfs_root.join("block");
        if !block_dir.exists() {
            return Ok(None);
        }
        for entry in std::fs::read_dir(&block_dir)? {
            let entry = entry?;
            let name_file = entry.path().join("dm/name");
            let Ok(name) = std::fs::read_to_string(&name_file) else {
                continue;
            };
            if name.trim() == map_name {
                return Ok(Some(entry.file_name().to_string_lossy().to_string()));
            }
        }
        Ok(None)
    }

    /// SCSI devices underneath a block node (multipath slaves)
    pub fn slaves(&self, block_node: &str) -> Result<Vec<String>> {
        let dir = self.sysfs_root.join("block").join(block_node).join("slaves");
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut slaves = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            slaves.push(entry?.file_name().to_string_lossy().to_string());
        }
        slaves.sort();
        Ok(slaves)
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Refuse paths containing anything outside the device-path allow-list.
fn untaint(path: PathBuf) -> Result<PathBuf> {
    let s = path.to_string_lossy();
    validate_arg(&s)?;
    Ok(path)
}

/// Extract the serial from a SCSI VPD page 0x80 blob: header is
/// `[periph, 0x80, len_hi, len_lo]`, then `len` bytes of serial.
fn parse_vpd_pg80_serial(raw: &[u8]) -> Option<String> {
    if raw.len() < 4 || raw[1] != 0x80 {
        return None;
    }
    let len = u16::from_be_bytes([raw[2], raw[3]]) as usize;
    let serial = raw.get(4..4 + len)?;
    let text = std::str::from_utf8(serial).ok()?.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    fn resolver(sysfs: &Path, dev: &Path, proc_dir: &Path) -> DeviceResolver {
        DeviceResolver::new(CommandRunner::default(), Multipath::new(CommandRunner::default()))
            .with_roots(
                sysfs.to_path_buf(),
                dev.to_path_buf(),
                proc_dir.to_path_buf(),
            )
            .with_delays(Duration::from_millis(1), Duration::from_millis(1))
    }

    #[test]
    fn test_parse_vpd_pg80() {
        let mut raw = vec![0x00, 0x80, 0x00, 0x18];
        raw.extend_from_slice(b"F4DE639B29D64F2C000113EA");
        assert_eq!(
            parse_vpd_pg80_serial(&raw).unwrap(),
            "F4DE639B29D64F2C000113EA"
        );

        assert!(parse_vpd_pg80_serial(&[0x00, 0x83, 0x00, 0x04, 1, 2, 3, 4]).is_none());
        assert!(parse_vpd_pg80_serial(&[]).is_none());
        // Truncated payload
        assert!(parse_vpd_pg80_serial(&[0x00, 0x80, 0x00, 0x10, b'a']).is_none());
    }

    #[test]
    fn test_lookup_by_id_exact_only() {
        let sysfs = tempfile::tempdir().unwrap();
        let dev = tempfile::tempdir().unwrap();
        let proc_dir = tempfile::tempdir().unwrap();
        let by_id = dev.path().join("disk/by-id");
        fs::create_dir_all(&by_id).unwrap();

        let wwid = "3624a9370f4de639b29d64f2c000113ea";
        // A partition link and a longer sibling WWID must not match.
        fs::write(by_id.join(format!("wwn-0x{wwid}-part1")), "").unwrap();
        fs::write(by_id.join(format!("wwn-0x{wwid}ff")), "").unwrap();

        let r = resolver(sysfs.path(), dev.path(), proc_dir.path());
        assert!(r.lookup_by_id(wwid).unwrap().is_none());

        fs::write(by_id.join(format!("wwn-0x{wwid}")), "").unwrap();
        let found = r.lookup_by_id(wwid).unwrap().unwrap();
        assert!(found.to_string_lossy().ends_with(&format!("wwn-0x{wwid}")));
    }

    #[test]
    fn test_lookup_vpd_scan() {
        let sysfs = tempfile::tempdir().unwrap();
        let dev = tempfile::tempdir().unwrap();
        let proc_dir = tempfile::tempdir().unwrap();

        let device = sysfs.path().join("block/sdx/device");
        fs::create_dir_all(&device).unwrap();
        let mut raw = vec![0x00u8, 0x80, 0x00, 0x18];
        raw.extend_from_slice(b"F4DE639B29D64F2C000113EA");
        fs::write(device.join("vpd_pg80"), &raw).unwrap();

        let r = resolver(sysfs.path(), dev.path(), proc_dir.path());
        let found = r
            .lookup_vpd("3624a9370f4de639b29d64f2c000113ea")
            .unwrap()
            .unwrap();
        assert!(found.to_string_lossy().ends_with("sdx"));

        assert!(r
            .lookup_vpd("3624a9370aaaaaaaaaaaaaaaa00011111")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_dm_node_and_slaves() {
        let sysfs = tempfile::tempdir().unwrap();
        let dev = tempfile::tempdir().unwrap();
        let proc_dir = tempfile::tempdir().unwrap();

        let dm = sysfs.path().join("block/dm-3");
        fs::create_dir_all(dm.join("dm")).unwrap();
        fs::write(dm.join("dm/name"), "3624a9370f4de639b29d64f2c000113ea\n").unwrap();
        fs::create_dir_all(dm.join("slaves/sda")).unwrap();
        fs::create_dir_all(dm.join("slaves/sdb")).unwrap();

        let r = resolver(sysfs.path(), dev.path(), proc_dir.path());
        let node = r
            .dm_node("3624a9370f4de639b29d64f2c000113ea")
            .unwrap()
            .unwrap();
        assert_eq!(node, "dm-3");
        assert_eq!(r.slaves(&node).unwrap(), vec!["sda", "sdb"]);
        assert!(r.dm_node("other").unwrap().is_none());
        assert!(r.slaves("dm-9").unwrap().is_empty());
    }
}

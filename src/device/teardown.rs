//! In-use detection and safe LUN teardown
//!
//! Teardown hard-refuses while any in-use signal fires; this is the guard
//! that keeps a running VM's backing disks from being yanked. The removal
//! sequence then walks top-down: flush the aggregate, drop the map, delete
//! the SCSI slaves.

use crate::device::resolver::DeviceResolver;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Local view of the devices backing one WWID
#[derive(Debug, Default)]
struct LunTopology {
    /// Multipath map name, when an aggregate exists
    map_name: Option<String>,
    /// `dm-N` node of the aggregate
    dm_node: Option<String>,
    /// SCSI devices underneath (or the bare device itself)
    slaves: Vec<String>,
    /// Device paths a mount table entry could reference
    candidates: Vec<PathBuf>,
}

impl DeviceResolver {
    async fn topology(&self, wwid: &str) -> Result<LunTopology> {
        let mut topo = LunTopology::default();

        let maps = self.multipath.list_maps().await.unwrap_or_else(|e| {
            debug!("multipathd unavailable during teardown: {e}");
            Vec::new()
        });
        if let Some((name, _)) = maps
            .into_iter()
            .find(|(_, map_wwid)| map_wwid.eq_ignore_ascii_case(wwid))
        {
            topo.candidates.push(self.dev_root.join("mapper").join(&name));
            if let Some(dm) = self.dm_node(&name)? {
                topo.slaves = self.slaves(&dm)?;
                topo.candidates.push(self.dev_root.join(&dm));
                topo.dm_node = Some(dm);
            }
            topo.map_name = Some(name);
        } else if let Some(path) = self.lookup(wwid).await? {
            if let Some(node) = path.file_name().map(|n| n.to_string_lossy().to_string()) {
                topo.slaves.push(node);
            }
            topo.candidates.push(path);
        }

        for slave in &topo.slaves {
            topo.candidates.push(self.dev_root.join(slave));
        }
        Ok(topo)
    }

    // =========================================================================
    // In-Use Detection
    // =========================================================================

    /// Check whether the device backing `wwid` is in use anywhere on this
    /// host. Returns the reason when it is.
    pub async fn device_in_use(&self, wwid: &str) -> Result<Option<String>> {
        let topo = self.topology(wwid).await?;
        if topo.candidates.is_empty() {
            return Ok(None);
        }

        if let Some(reason) = self.check_mounts(&topo)? {
            return Ok(Some(reason));
        }
        if let Some(reason) = self.check_holders(&topo)? {
            return Ok(Some(reason));
        }
        self.check_fuser(&topo).await
    }

    fn check_mounts(&self, topo: &LunTopology) -> Result<Option<String>> {
        let mounts = self.proc_root.join("mounts");
        let Ok(content) = std::fs::read_to_string(&mounts) else {
            return Ok(None);
        };
        for line in content.lines() {
            let mut fields = line.split_whitespace();
            let (Some(device), Some(mountpoint)) = (fields.next(), fields.next()) else {
                continue;
            };
            if topo
                .candidates
                .iter()
                .any(|c| c.as_os_str() == Path::new(device).as_os_str())
            {
                return Ok(Some(format!("{device} is mounted at {mountpoint}")));
            }
        }
        Ok(None)
    }

    fn check_holders(&self, topo: &LunTopology) -> Result<Option<String>> {
        let mut nodes: Vec<&String> = topo.slaves.iter().collect();
        if let Some(dm) = &topo.dm_node {
            nodes.push(dm);
        }
        for node in nodes {
            let holders = self.sysfs_root.join("block").join(node).join("holders");
            let Ok(mut entries) = std::fs::read_dir(&holders) else {
                continue;
            };
            if let Some(Ok(holder)) = entries.next() {
                return Ok(Some(format!(
                    "{node} is held by {} (LVM or dm-crypt on top?)",
                    holder.file_name().to_string_lossy()
                )));
            }
        }
        Ok(None)
    }

    async fn check_fuser(&self, topo: &LunTopology) -> Result<Option<String>> {
        for candidate in &topo.candidates {
            let path = candidate.to_string_lossy();
            // fuser: 0 = a process holds the device, 1 = free.
            match self.runner.run_with("fuser", &["-s", &path], &[1]).await {
                Ok(out) if out.code == 0 => {
                    return Ok(Some(format!("{path} is open (fuser)")));
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("fuser check on {path} skipped: {e}");
                }
            }
        }
        Ok(None)
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Remove the local devices backing `wwid`: flush, drop the multipath
    /// map, delete the SCSI slaves. Refuses outright while the device is
    /// in use. Idempotent when nothing is present.
    pub async fn cleanup_lun_devices(&self, wwid: &str) -> Result<()> {
        let topo = self.topology(wwid).await?;
        if topo.candidates.is_empty() {
            debug!("No local devices for {wwid}, nothing to tear down");
            return Ok(());
        }

        if let Some(reason) = self.device_in_use(wwid).await? {
            let device = topo
                .map_name
                .clone()
                .unwrap_or_else(|| wwid.to_string());
            return Err(Error::DeviceInUse { device, reason });
        }

        if let Some(map_name) = &topo.map_name {
            let mapper = self.dev_root.join("mapper").join(map_name);
            self.sync_and_flush(&mapper).await;

            if let Err(e) = self.multipath.remove_map(map_name).await {
                warn!("multipathd remove map {map_name} failed: {e}");
            }
            if let Err(e) = self.multipath.flush(map_name).await {
                warn!("multipath -f {map_name} failed: {e}");
            }
            tokio::time::sleep(self.settle_delay).await;
        }

        for slave in &topo.slaves {
            self.sync_and_flush(&self.dev_root.join(slave)).await;
            self.delete_block_device(slave);
        }
        if !topo.slaves.is_empty() {
            tokio::time::sleep(self.settle_delay).await;
        }

        debug!("Tore down local devices for {wwid}");
        Ok(())
    }

    async fn sync_and_flush(&self, device: &Path) {
        if let Err(e) = self.runner.run("sync", &[]).await {
            warn!("sync failed: {e}");
        }
        let path = device.to_string_lossy();
        if let Err(e) = self.runner.run("blockdev", &["--flushbufs", &path]).await {
            warn!("blockdev --flushbufs {path} failed: {e}");
        }
    }

    /// Ask the kernel to drop one SCSI device
    fn delete_block_device(&self, name: &str) {
        let delete = self
            .sysfs_root
            .join("class/block")
            .join(name)
            .join("device/delete");
        if !delete.exists() {
            debug!("No delete trigger for {name}");
            return;
        }
        if let Err(e) = std::fs::write(&delete, "1") {
            warn!("Deleting block device {name} failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::san::process::CommandRunner;
    use crate::san::Multipath;
    use std::fs;
    use std::time::Duration;

    const WWID: &str = "3624a9370f4de639b29d64f2c000113ea";

    struct Fixture {
        sysfs: tempfile::TempDir,
        dev: tempfile::TempDir,
        proc_dir: tempfile::TempDir,
    }

    impl Fixture {
        /// A bare SCSI device `sdx` carrying our serial in VPD 0x80.
        fn new() -> Self {
            let fixture = Self {
                sysfs: tempfile::tempdir().unwrap(),
                dev: tempfile::tempdir().unwrap(),
                proc_dir: tempfile::tempdir().unwrap(),
            };
            let device = fixture.sysfs.path().join("block/sdx/device");
            fs::create_dir_all(&device).unwrap();
            let mut raw = vec![0x00u8, 0x80, 0x00, 0x18];
            raw.extend_from_slice(b"F4DE639B29D64F2C000113EA");
            fs::write(device.join("vpd_pg80"), &raw).unwrap();
            fs::write(fixture.proc_dir.path().join("mounts"), "").unwrap();
            fixture
        }

        fn resolver(&self) -> DeviceResolver {
            DeviceResolver::new(
                CommandRunner::default(),
                Multipath::new(CommandRunner::default()),
            )
            .with_roots(
                self.sysfs.path().to_path_buf(),
                self.dev.path().to_path_buf(),
                self.proc_dir.path().to_path_buf(),
            )
            .with_delays(Duration::from_millis(1), Duration::from_millis(1))
        }
    }

    #[tokio::test]
    async fn test_not_in_use_when_absent() {
        let fixture = Fixture::new();
        fs::remove_dir_all(fixture.sysfs.path().join("block")).unwrap();
        let resolver = fixture.resolver();
        assert!(resolver.device_in_use(WWID).await.unwrap().is_none());
        // Teardown with nothing present succeeds.
        resolver.cleanup_lun_devices(WWID).await.unwrap();
    }

    #[tokio::test]
    async fn test_mounted_device_is_in_use() {
        let fixture = Fixture::new();
        let dev_path = fixture.dev.path().join("sdx");
        fs::write(
            fixture.proc_dir.path().join("mounts"),
            format!("{} /mnt/data ext4 rw 0 0\n", dev_path.display()),
        )
        .unwrap();

        let resolver = fixture.resolver();
        let reason = resolver.device_in_use(WWID).await.unwrap().unwrap();
        assert!(reason.contains("/mnt/data"));

        let err = resolver.cleanup_lun_devices(WWID).await.unwrap_err();
        assert!(matches!(err, Error::DeviceInUse { .. }));
    }

    #[tokio::test]
    async fn test_holders_mean_in_use() {
        let fixture = Fixture::new();
        fs::create_dir_all(fixture.sysfs.path().join("block/sdx/holders/dm-7")).unwrap();
        let resolver = fixture.resolver();
        let reason = resolver.device_in_use(WWID).await.unwrap().unwrap();
        assert!(reason.contains("dm-7"));
    }

    #[tokio::test]
    async fn test_cleanup_deletes_slave() {
        let fixture = Fixture::new();
        let delete = fixture
            .sysfs
            .path()
            .join("class/block/sdx/device");
        fs::create_dir_all(&delete).unwrap();
        fs::write(delete.join("delete"), "").unwrap();

        let resolver = fixture.resolver();
        resolver.cleanup_lun_devices(WWID).await.unwrap();
        assert_eq!(
            fs::read_to_string(delete.join("delete")).unwrap(),
            "1"
        );
    }
}

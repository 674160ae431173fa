//! VM config backup side-channel
//!
//! Each snapshot gets a tiny array volume holding the VM's configuration
//! at snapshot time, retrievable out-of-band when the host itself is
//! gone. Everything here is best-effort: the caller logs failures and the
//! snapshot stands regardless.

use crate::error::{Error, Result};
use crate::naming;
use crate::orchestrator::Orchestrator;
use chrono::Utc;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Size of a config-backup volume
const CONFIG_BACKUP_SIZE: u64 = 1024 * 1024;

impl Orchestrator {
    /// Write the VM configuration into a dedicated backup volume named
    /// after the snapshot. The volume stays on the array, disconnected.
    pub(crate) async fn write_config_backup(
        &self,
        vmid: u32,
        snap: &str,
        config_path: Option<&Path>,
    ) -> Result<()> {
        let source = match config_path {
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(format!("/etc/pve/qemu-server/{vmid}.conf")),
        };
        let config_content = match std::fs::read_to_string(&source) {
            Ok(content) => content,
            Err(e) => {
                debug!(
                    "No VM config at {} ({e}), skipping backup",
                    source.display()
                );
                return Ok(());
            }
        };

        let qualified = self.qualify(&naming::config_volume_name(
            &self.config.storage,
            vmid,
            snap,
        ));

        let volume = match self.client.create_volume(&qualified, CONFIG_BACKUP_SIZE).await {
            Ok(volume) => volume,
            Err(e) if e.is_benign_conflict() => self
                .client
                .get_volume(&qualified)
                .await?
                .ok_or_else(|| Error::NotFound {
                    kind: "Volume".into(),
                    name: qualified.clone(),
                })?,
            Err(e) => return Err(e),
        };

        let local = self.local_host_name();
        match self.client.connect_volume(&local, &qualified).await {
            Ok(()) => {}
            Err(e) if e.is_benign_conflict() => {}
            Err(e) => {
                self.rollback_created_volume(&qualified).await;
                return Err(e);
            }
        }

        let wwid = volume.wwid();
        let device = match self
            .resolver
            .wait_for_device(&wwid, self.fabric.as_ref(), self.config.device_timeout())
            .await
        {
            Ok(device) => device,
            Err(e) => {
                self.rollback_created_volume(&qualified).await;
                return Err(e);
            }
        };

        let populated = self
            .populate(&device, vmid, snap, &source, &config_content)
            .await;

        // Local teardown and disconnect happen regardless; the original
        // populate error (if any) wins over cleanup noise.
        if let Err(e) = self.resolver.cleanup_lun_devices(&wwid).await {
            warn!("Config backup device teardown failed: {e}");
        }
        match self.client.disconnect_volume(&local, &qualified).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!("Config backup disconnect failed: {e}"),
        }

        populated?;
        info!("Wrote config backup {qualified}");
        Ok(())
    }

    /// Format, mount, write config + metadata, unmount.
    async fn populate(
        &self,
        device: &Path,
        vmid: u32,
        snap: &str,
        source: &Path,
        config_content: &str,
    ) -> Result<()> {
        let device_str = device.to_string_lossy().to_string();
        let runner = &self.resolver.runner;

        runner
            .run("mkfs.ext4", &["-O", "^has_journal", "-F", &device_str])
            .await?;

        let mountpoint = std::env::temp_dir().join(format!(
            "pve-purestorage-vmconf-{vmid}-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&mountpoint)?;
        let mount_str = mountpoint.to_string_lossy().to_string();

        runner.run("mount", &[&device_str, &mount_str]).await?;

        let write_result = (|| -> Result<()> {
            std::fs::write(mountpoint.join(format!("{vmid}.conf")), config_content)?;
            let metadata = json!({
                "vmid": vmid,
                "snapshot": snap,
                "created": Utc::now().to_rfc3339(),
                "source": source.to_string_lossy(),
            });
            std::fs::write(
                mountpoint.join("metadata.json"),
                serde_json::to_string_pretty(&metadata)?,
            )?;
            Ok(())
        })();

        if let Err(e) = runner.run("umount", &[&mount_str]).await {
            warn!("Unmounting config backup failed: {e}");
        }
        if let Err(e) = std::fs::remove_dir(&mountpoint) {
            debug!("Could not remove mountpoint {}: {e}", mountpoint.display());
        }
        write_result
    }
}

//! Snapshot operations and snapshot block access
//!
//! Array snapshots cannot be attached to a host directly; read access
//! goes through a short-lived clone connected to this node only. Those
//! temp clones are the one place the core eradicates: they carry no data
//! of their own and must not linger in the recoverable namespace.

use crate::error::{Error, Result};
use crate::naming;
use crate::orchestrator::Orchestrator;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Temp clones older than this are orphans from a dead process
pub const ORPHAN_TEMP_CLONE_MAX_AGE_SECS: i64 = 3600;

impl Orchestrator {
    // =========================================================================
    // Snapshot CRUD
    // =========================================================================

    /// Create a snapshot, then write the VM config backup side-channel
    /// (best-effort; its failure never fails the snapshot).
    pub async fn volume_snapshot(
        &self,
        volname: &str,
        snap: &str,
        config_path: Option<&Path>,
    ) -> Result<()> {
        let parsed = naming::parse_volname(volname)
            .ok_or_else(|| Error::InvalidVolumeName(volname.to_string()))?;
        let qualified = self.qualify(&naming::array_name_for_volname(
            &self.config.storage,
            volname,
        )?);
        if self.client.get_volume(&qualified).await?.is_none() {
            return Err(Error::NotFound {
                kind: "Volume".into(),
                name: qualified,
            });
        }

        let suffix = naming::snapshot_suffix(snap);
        if self.client.get_snapshot(&qualified, &suffix).await?.is_some() {
            // Sanitization is lossy ("a_b" and "a-b" alias); surfacing the
            // collision beats silently reusing the other snapshot.
            return Err(Error::AlreadyExists {
                kind: "Snapshot".into(),
                name: naming::snapshot_name(&qualified, &suffix),
            });
        }

        self.client.create_snapshot(&qualified, &suffix).await?;
        info!("Created snapshot {qualified}.{suffix}");

        if let Err(e) = self
            .write_config_backup(parsed.vmid(), snap, config_path)
            .await
        {
            warn!("Config backup for {volname}@{snap} failed: {e}");
        }
        Ok(())
    }

    /// Delete a snapshot; absent snapshots succeed idempotently. The
    /// matching config-backup volume goes with it.
    pub async fn volume_snapshot_delete(&self, volname: &str, snap: &str) -> Result<()> {
        let parsed = naming::parse_volname(volname)
            .ok_or_else(|| Error::InvalidVolumeName(volname.to_string()))?;
        let qualified = self.qualify(&naming::array_name_for_volname(
            &self.config.storage,
            volname,
        )?);
        let suffix = naming::snapshot_suffix(snap);

        match self.client.get_snapshot(&qualified, &suffix).await? {
            None => {
                warn!("snapshot_delete: {qualified}.{suffix} is already gone");
            }
            Some(snapshot) => {
                let full = naming::snapshot_name(&qualified, &suffix);
                match self.client.destroy_snapshot(&full).await {
                    Ok(()) => info!("Soft-deleted snapshot {full}"),
                    Err(e) if e.is_dependency_conflict() => {
                        return Err(Error::Conflict {
                            message: format!(
                                "snapshot {} still has dependent volumes",
                                snapshot.name
                            ),
                            remediation: Some(
                                "remove the linked clones created from this snapshot first".into(),
                            ),
                        });
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        // Side-channel cleanup, best-effort.
        let backup = self.qualify(&naming::config_volume_name(
            &self.config.storage,
            parsed.vmid(),
            snap,
        ));
        match self.client.get_volume(&backup).await {
            Ok(Some(volume)) if !volume.destroyed => {
                if let Err(e) = self.client.destroy_volume(&backup).await {
                    warn!("Deleting config backup {backup} failed: {e}");
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Config backup lookup for {backup} failed: {e}"),
        }
        Ok(())
    }

    /// Roll a volume back to a snapshot. Refused while the local device
    /// is in use; the content change is then propagated into the kernel.
    pub async fn volume_snapshot_rollback(&self, volname: &str, snap: &str) -> Result<()> {
        let qualified = self.qualify(&naming::array_name_for_volname(
            &self.config.storage,
            volname,
        )?);
        let volume = self
            .client
            .get_volume(&qualified)
            .await?
            .ok_or_else(|| Error::NotFound {
                kind: "Volume".into(),
                name: qualified.clone(),
            })?;
        let suffix = naming::snapshot_suffix(snap);
        if self.client.get_snapshot(&qualified, &suffix).await?.is_none() {
            return Err(Error::NotFound {
                kind: "Snapshot".into(),
                name: naming::snapshot_name(&qualified, &suffix),
            });
        }

        if let Some(reason) = self.resolver.device_in_use(&volume.wwid()).await? {
            return Err(Error::DeviceInUse {
                device: format!("/dev/mapper/{}", volume.wwid()),
                reason,
            });
        }

        let source = naming::snapshot_name(&qualified, &suffix);
        // Overwrite never crosses pods; both sides carry this storage's
        // qualifier by construction, but the array would accept more.
        if naming::split_pod(&source).0 != naming::split_pod(&qualified).0 {
            return Err(Error::Unsupported(
                "rollback across pods is not supported".into(),
            ));
        }
        self.client.overwrite_volume(&qualified, &source).await?;
        info!("Rolled {qualified} back to {source}");

        // Content and size may have changed under the device.
        self.rescan_local().await;
        Ok(())
    }

    /// User snapshots of a volume, names decoded back to host-side form
    pub async fn volume_snapshot_list(&self, volname: &str) -> Result<Vec<String>> {
        let qualified = self.qualify(&naming::array_name_for_volname(
            &self.config.storage,
            volname,
        )?);
        let glob = format!("{qualified}.{}*", naming::SNAPSHOT_SUFFIX_PREFIX);
        let snapshots = self.client.list_snapshots(&glob).await?;
        Ok(snapshots
            .into_iter()
            .filter(|s| !s.destroyed)
            .filter_map(|s| {
                s.suffix
                    .strip_prefix(naming::SNAPSHOT_SUFFIX_PREFIX)
                    .map(str::to_string)
            })
            .collect())
    }

    // =========================================================================
    // Volume Activation / Path
    // =========================================================================

    /// Make sure the block device for a volume (or a snapshot of it) is
    /// present locally and return its path.
    pub async fn path(&self, volname: &str, snap: Option<&str>) -> Result<PathBuf> {
        match snap {
            None => self.ensure_volume_device(volname).await,
            Some(snap) => self.ensure_snapshot_device(volname, snap).await,
        }
    }

    /// Platform `activate_volume`: device must exist afterwards.
    pub async fn activate_volume(&self, volname: &str, snap: Option<&str>) -> Result<()> {
        self.path(volname, snap).await.map(|_| ())
    }

    async fn ensure_volume_device(&self, volname: &str) -> Result<PathBuf> {
        let qualified = self.qualify(&naming::array_name_for_volname(
            &self.config.storage,
            volname,
        )?);
        let volume = self
            .client
            .get_volume(&qualified)
            .await?
            .ok_or_else(|| Error::NotFound {
                kind: "Volume".into(),
                name: qualified.clone(),
            })?;

        let local = self.local_host_name();
        match self.client.connect_volume(&local, &qualified).await {
            Ok(()) => {}
            Err(e) if e.is_benign_conflict() => {}
            Err(e) => return Err(e),
        }

        let wwid = volume.wwid();
        if let Some(path) = self.resolver.lookup(&wwid).await? {
            return Ok(path);
        }
        self.resolver
            .wait_for_device(&wwid, self.fabric.as_ref(), self.config.device_timeout())
            .await
    }

    async fn ensure_snapshot_device(&self, volname: &str, snap: &str) -> Result<PathBuf> {
        let key = (
            self.config.storage.clone(),
            volname.to_string(),
            snap.to_string(),
        );
        if let Some(existing) = self.temp_clones.get(&key) {
            let temp = existing.value().clone();
            drop(existing);
            if let Some(volume) = self.client.get_volume(&temp).await? {
                let wwid = volume.wwid();
                if let Some(path) = self.resolver.lookup(&wwid).await? {
                    return Ok(path);
                }
                return self
                    .resolver
                    .wait_for_device(&wwid, self.fabric.as_ref(), self.config.device_timeout())
                    .await;
            }
            self.temp_clones.remove(&key);
        }

        let qualified = self.qualify(&naming::array_name_for_volname(
            &self.config.storage,
            volname,
        )?);
        let suffix = naming::snapshot_suffix(snap);
        if self.client.get_snapshot(&qualified, &suffix).await?.is_none() {
            return Err(Error::NotFound {
                kind: "Snapshot".into(),
                name: naming::snapshot_name(&qualified, &suffix),
            });
        }
        let source = naming::snapshot_name(&qualified, &suffix);

        let (_, local_name) = naming::split_pod(&qualified);
        let temp = self.qualify(&naming::temp_clone_name(
            local_name,
            Utc::now().timestamp(),
            std::process::id(),
        ));

        info!("Creating snapshot-access clone {temp} from {source}");
        let clone = self.client.clone_volume(&source, &temp).await?;

        let local = self.local_host_name();
        match self.client.connect_volume(&local, &temp).await {
            Ok(()) => {}
            Err(e) if e.is_benign_conflict() => {}
            Err(e) => {
                self.eradicate_temp_clone(&temp).await;
                return Err(e);
            }
        }

        let wwid = clone.wwid();
        match self
            .resolver
            .wait_for_device(&wwid, self.fabric.as_ref(), self.config.device_timeout())
            .await
        {
            Ok(path) => {
                self.temp_clones.insert(key, temp);
                Ok(path)
            }
            Err(e) => {
                self.eradicate_temp_clone(&temp).await;
                Err(e)
            }
        }
    }

    /// Platform `deactivate_volume`. Without a snapshot: tear down the
    /// local device and drop this node's connection. With one: dismantle
    /// the temp clone entirely.
    pub async fn deactivate_volume(&self, volname: &str, snap: Option<&str>) -> Result<()> {
        match snap {
            None => self.deactivate_plain_volume(volname).await,
            Some(snap) => self.deactivate_snapshot_access(volname, snap).await,
        }
    }

    async fn deactivate_plain_volume(&self, volname: &str) -> Result<()> {
        let qualified = self.qualify(&naming::array_name_for_volname(
            &self.config.storage,
            volname,
        )?);
        let Some(volume) = self.client.get_volume(&qualified).await? else {
            return Ok(());
        };
        let wwid = volume.wwid();
        if let Some(reason) = self.resolver.device_in_use(&wwid).await? {
            return Err(Error::DeviceInUse {
                device: wwid,
                reason,
            });
        }
        self.resolver.cleanup_lun_devices(&wwid).await?;
        let local = self.local_host_name();
        match self.client.disconnect_volume(&local, &qualified).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn deactivate_snapshot_access(&self, volname: &str, snap: &str) -> Result<()> {
        let key = (
            self.config.storage.clone(),
            volname.to_string(),
            snap.to_string(),
        );
        let mut temps: Vec<String> = Vec::new();
        if let Some((_, temp)) = self.temp_clones.remove(&key) {
            temps.push(temp);
        } else {
            // Not ours (other worker, or a restart); find by name shape.
            let local_name =
                naming::array_name_for_volname(&self.config.storage, volname)?;
            let glob = self.qualify(&format!("{local_name}{}*", naming::TEMP_CLONE_INFIX));
            for volume in self.client.list_volumes(&glob).await? {
                temps.push(volume.qualified_name());
            }
        }

        for temp in temps {
            if let Ok(Some(volume)) = self.client.get_volume(&temp).await {
                if let Err(e) = self.resolver.cleanup_lun_devices(&volume.wwid()).await {
                    warn!("Teardown of temp clone {temp} devices failed: {e}");
                }
            }
            self.eradicate_temp_clone(&temp).await;
        }
        Ok(())
    }

    /// Disconnect and fully remove a temp clone. Unlike every other
    /// deletion in this plugin, temp clones are eradicated: they hold no
    /// data worth recovering and would otherwise pile up in the
    /// destroyed namespace.
    pub(crate) async fn eradicate_temp_clone(&self, qualified: &str) {
        if let Err(e) = self.disconnect_all_hosts(qualified).await {
            warn!("Disconnecting temp clone {qualified} failed: {e}");
        }
        match self.client.destroy_volume(qualified).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => return,
            Err(e) => {
                warn!("Destroying temp clone {qualified} failed: {e}");
                return;
            }
        }
        if let Err(e) = self.client.eradicate_volume(qualified).await {
            warn!("Eradicating temp clone {qualified} failed: {e}");
        } else {
            debug!("Eradicated temp clone {qualified}");
        }
    }

    // =========================================================================
    // Orphan Sweep
    // =========================================================================

    /// Remove temp clones left behind by dead processes. Age comes from
    /// the array's creation timestamp, falling back to the unix timestamp
    /// embedded in the name; younger clones may belong to a live process
    /// and are preserved.
    pub(crate) async fn sweep_orphan_temp_clones(&self) -> Result<()> {
        let storage_field = naming::sanitize_storage(&self.config.storage).replace('-', "_");
        let glob = self.qualify(&format!(
            "pve-{storage_field}-*{}*",
            naming::TEMP_CLONE_INFIX
        ));
        let now = Utc::now().timestamp();

        for volume in self.client.list_volumes(&glob).await? {
            let created = volume
                .created
                .map(|c| c.timestamp())
                .or_else(|| naming::temp_clone_timestamp(&volume.name));
            let Some(created) = created else {
                warn!("Temp clone {} has no discernible age, skipping", volume.name);
                continue;
            };
            let age = now - created;
            if age <= ORPHAN_TEMP_CLONE_MAX_AGE_SECS {
                debug!(
                    "Preserving temp clone {} (age {age}s, may be live)",
                    volume.name
                );
                continue;
            }
            info!("Sweeping orphan temp clone {} (age {age}s)", volume.name);
            let wwid = volume.wwid();
            match self.resolver.device_in_use(&wwid).await {
                Ok(Some(reason)) => {
                    warn!("Orphan {} appears in use ({reason}), skipping", volume.name);
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("In-use check for orphan {} failed: {e}", volume.name);
                    continue;
                }
            }
            if let Err(e) = self.resolver.cleanup_lun_devices(&wwid).await {
                warn!("Local teardown of orphan {} failed: {e}", volume.name);
            }
            self.eradicate_temp_clone(&volume.qualified_name()).await;
        }
        Ok(())
    }
}

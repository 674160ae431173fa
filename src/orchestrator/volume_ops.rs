//! Volume lifecycle operations
//!
//! Allocation, freeing, resize, rename, listing, and the disk-index
//! scan. Compound ordering lives here: a create is not done until the
//! device is usable, a free never destroys the array volume while a local
//! device could still be open.

use crate::error::{Error, Result};
use crate::naming::{self, ArrayRole, ParsedVolname, MAX_DISK_INDEX};
use crate::orchestrator::Orchestrator;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{info, warn};

/// One entry of a storage listing
#[derive(Debug, Clone, Serialize)]
pub struct ImageInfo {
    /// Host-side name (`vm-100-disk-0`, `base-100-disk-0`, ...)
    pub volname: String,
    pub vmid: u32,
    /// Provisioned bytes
    pub size: u64,
    /// Physically used bytes, when the array reports them
    pub used: Option<u64>,
    pub format: &'static str,
}

/// First unused index in `used`, scanning 0..=max.
fn next_free_index(used: &HashSet<u32>, max: u32) -> Option<u32> {
    (0..=max).find(|i| !used.contains(i))
}

/// Whether a host-side name is one the platform allocates eagerly and
/// uses immediately after return (suspend state, cloudinit).
fn is_eager_shape(parsed: &ParsedVolname) -> bool {
    matches!(
        parsed,
        ParsedVolname::State { .. } | ParsedVolname::Cloudinit { .. }
    )
}

impl Orchestrator {
    // =========================================================================
    // Disk Index Scan
    // =========================================================================

    /// Next free disk index for a VM: list its volumes, decode the disk
    /// indices, take the first gap. Destroyed-but-recoverable volumes
    /// still hold their names and count as used. Stops with an explicit
    /// error at 999.
    pub async fn find_free_diskname(&self, vmid: u32) -> Result<u32> {
        let glob = self.qualify(&naming::vm_volume_glob(&self.config.storage, vmid));
        let mut used = HashSet::new();
        let live = self.client.list_volumes(&glob).await?;
        let destroyed = self.client.list_destroyed_volumes(&glob).await?;
        for volume in live.iter().chain(destroyed.iter()) {
            if let Some(decoded) = naming::decode_array_name(&volume.name) {
                if decoded.vmid == vmid {
                    if let ArrayRole::Disk(index) = decoded.role {
                        used.insert(index);
                    }
                }
            }
        }
        next_free_index(&used, MAX_DISK_INDEX).ok_or(Error::DiskIndexExhausted {
            vmid,
            max: MAX_DISK_INDEX,
        })
    }

    /// Decode a host-side volume name. Part of the platform contract; the
    /// codec itself lives in [`crate::naming`].
    pub fn parse_volname(&self, volname: &str) -> Result<ParsedVolname> {
        naming::parse_volname(volname)
            .ok_or_else(|| Error::InvalidVolumeName(volname.to_string()))
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Allocate a raw volume. With an explicit `name` (state/cloudinit or
    /// a fixed disk name) that identity is used; otherwise the next free
    /// disk index is taken. Returns the host-side volume name.
    pub async fn alloc_image(
        &self,
        vmid: u32,
        name: Option<&str>,
        fmt: &str,
        size_kib: u64,
    ) -> Result<String> {
        if fmt != "raw" {
            return Err(Error::Unsupported(format!(
                "format '{fmt}' (only raw volumes exist on the array)"
            )));
        }
        let size = size_kib * 1024;

        let (volname, parsed) = match name {
            Some(name) => {
                let parsed = naming::parse_volname(name)
                    .ok_or_else(|| Error::InvalidVolumeName(name.to_string()))?;
                if parsed.vmid() != vmid {
                    return Err(Error::InvalidVolumeName(format!(
                        "{name} does not belong to VM {vmid}"
                    )));
                }
                (name.to_string(), parsed)
            }
            None => {
                let index = self.find_free_diskname(vmid).await?;
                let volname = format!("vm-{vmid}-disk-{index}");
                let parsed = ParsedVolname::Disk {
                    vmid,
                    index,
                    parent: None,
                };
                (volname, parsed)
            }
        };

        let array_name = naming::array_name_for_volname(&self.config.storage, &volname)?;
        let qualified = self.qualify(&array_name);

        // A same-named leftover blocks allocation. For eager shapes we
        // clean the orphan up (a crashed suspend leaves its state volume
        // behind); a disk name collision is a real error.
        if let Some(existing) = self.client.get_volume(&qualified).await? {
            if is_eager_shape(&parsed) {
                info!("Cleaning up orphaned volume {qualified} before reallocation");
                self.cleanup_orphan_volume(&qualified, existing.destroyed)
                    .await?;
            } else {
                return Err(Error::AlreadyExists {
                    kind: "Volume".into(),
                    name: qualified,
                });
            }
        }

        let created = self.client.create_volume(&qualified, size).await?;
        info!(
            "Created {} ({} bytes, serial {})",
            qualified, created.provisioned, created.serial
        );

        if let Err(e) = self.connect_cluster_hosts(&qualified).await {
            self.rollback_created_volume(&qualified).await;
            return Err(e);
        }

        // The platform opens state and cloudinit volumes immediately
        // after this returns, so the device must exist first.
        if is_eager_shape(&parsed) {
            let wwid = created.wwid();
            if let Err(e) = self
                .resolver
                .wait_for_device(&wwid, self.fabric.as_ref(), self.config.device_timeout())
                .await
            {
                self.rollback_created_volume(&qualified).await;
                return Err(e);
            }
        }

        Ok(volname)
    }

    /// Remove a leftover volume so its name can be reused: disconnect it
    /// everywhere and soft-delete. Allocation proceeds only when this
    /// succeeds; the orphan itself stays recoverable on the array.
    async fn cleanup_orphan_volume(&self, qualified: &str, destroyed: bool) -> Result<()> {
        self.disconnect_all_hosts(qualified).await?;
        if !destroyed {
            self.client.destroy_volume(qualified).await?;
        }
        Ok(())
    }

    // =========================================================================
    // Free
    // =========================================================================

    /// Free a volume: local teardown, disconnect everywhere, soft-delete.
    /// The array's eradication timer handles the rest. Absent volumes
    /// succeed idempotently.
    pub async fn free_image(&self, volname: &str) -> Result<()> {
        let parsed = naming::parse_volname(volname)
            .ok_or_else(|| Error::InvalidVolumeName(volname.to_string()))?;
        let array_name = naming::array_name_for_volname(&self.config.storage, volname)?;
        let qualified = self.qualify(&array_name);

        let volume = match self.client.get_volume(&qualified).await? {
            Some(volume) => volume,
            None => {
                warn!("free_image: {qualified} is already gone");
                return Ok(());
            }
        };

        if !volume.destroyed {
            let wwid = volume.wwid();
            if let Some(reason) = self.resolver.device_in_use(&wwid).await? {
                return Err(Error::DeviceInUse {
                    device: wwid,
                    reason,
                });
            }
            self.resolver.cleanup_lun_devices(&wwid).await?;
            self.disconnect_all_hosts(&qualified).await?;
            // Soft delete only: recoverable from the array UI within the
            // eradication-delay window.
            self.client.destroy_volume(&qualified).await?;
            info!("Soft-deleted {qualified}");
        } else {
            warn!("free_image: {qualified} was already soft-deleted");
        }

        if matches!(
            parsed,
            ParsedVolname::Disk { .. } | ParsedVolname::Base { .. }
        ) {
            self.sweep_config_backups_if_last_disk(parsed.vmid()).await;
        }
        Ok(())
    }

    /// When the VM has no disks left, its config backups have nothing to
    /// describe; soft-delete them all. Best-effort.
    async fn sweep_config_backups_if_last_disk(&self, vmid: u32) {
        let glob = self.qualify(&naming::vm_volume_glob(&self.config.storage, vmid));
        let remaining = match self.client.list_volumes(&glob).await {
            Ok(volumes) => volumes,
            Err(e) => {
                warn!("Config-backup sweep listing failed: {e}");
                return;
            }
        };
        let has_disks = remaining.iter().any(|v| {
            naming::decode_array_name(&v.name)
                .map(|d| matches!(d.role, ArrayRole::Disk(_)))
                .unwrap_or(false)
        });
        if has_disks {
            return;
        }
        for volume in remaining {
            let is_vmconf = naming::decode_array_name(&volume.name)
                .map(|d| matches!(d.role, ArrayRole::Vmconf(_)))
                .unwrap_or(false);
            if !is_vmconf {
                continue;
            }
            let qualified = volume.qualified_name();
            info!("Sweeping config backup {qualified}");
            if let Err(e) = self.disconnect_all_hosts(&qualified).await {
                warn!("Disconnect of {qualified} failed: {e}");
            }
            if let Err(e) = self.client.destroy_volume(&qualified).await {
                warn!("Soft-delete of {qualified} failed: {e}");
            }
        }
    }

    // =========================================================================
    // Resize / Rename
    // =========================================================================

    /// Grow a volume. Shrinking is refused; an equal size is a no-op.
    /// Returns the resulting size in bytes.
    pub async fn volume_resize(
        &self,
        volname: &str,
        new_size: u64,
        running: bool,
    ) -> Result<u64> {
        let array_name = naming::array_name_for_volname(&self.config.storage, volname)?;
        let qualified = self.qualify(&array_name);
        let volume = self
            .client
            .get_volume(&qualified)
            .await?
            .ok_or_else(|| Error::NotFound {
                kind: "Volume".into(),
                name: qualified.clone(),
            })?;

        if new_size < volume.provisioned {
            return Err(Error::Unsupported(format!(
                "shrinking {volname} from {} to {new_size} bytes",
                volume.provisioned
            )));
        }
        if new_size == volume.provisioned {
            return Ok(new_size);
        }

        let resized = self.client.resize_volume(&qualified, new_size).await?;
        info!("Resized {qualified} to {} bytes", resized.provisioned);

        if running {
            // Let the kernel pick up the new size under the running VM.
            self.rescan_local().await;
        }
        Ok(resized.provisioned)
    }

    /// Rename a volume's host-side identity (e.g. reassign to another VM).
    /// Returns the new host-side name.
    pub async fn rename_volume(&self, volname: &str, target_volname: &str) -> Result<String> {
        let source = self.qualify(&naming::array_name_for_volname(
            &self.config.storage,
            volname,
        )?);
        let target_array =
            naming::array_name_for_volname(&self.config.storage, target_volname)?;
        let target = self.qualify(&target_array);

        if source == target {
            return Ok(target_volname.to_string());
        }
        if self.client.get_volume(&target).await?.is_some() {
            return Err(Error::AlreadyExists {
                kind: "Volume".into(),
                name: target,
            });
        }
        // The array takes the new name without the pod prefix; renames
        // stay inside the pod.
        let (_, target_local) = naming::split_pod(&target);
        self.client.rename_volume(&source, target_local).await?;
        info!("Renamed {source} -> {target}");
        Ok(target_volname.to_string())
    }

    // =========================================================================
    // Listing / Size
    // =========================================================================

    /// List the images in this storage, annotated with provisioned and
    /// used bytes. Template disks surface as `base-*` names, detected via
    /// their `pve-base` snapshot markers in a single snapshot listing.
    pub async fn list_images(&self, vmid_filter: Option<u32>) -> Result<Vec<ImageInfo>> {
        let glob = self.qualify(&naming::storage_volume_glob(&self.config.storage));
        let volumes = self.client.list_volumes(&glob).await?;

        let base_glob = self.qualify(&format!(
            "{}.{}",
            naming::storage_volume_glob(&self.config.storage),
            naming::BASE_SNAPSHOT_SUFFIX
        ));
        let template_sources: HashSet<String> = self
            .client
            .list_snapshots(&base_glob)
            .await?
            .into_iter()
            .filter(|s| !s.destroyed)
            .map(|s| naming::split_pod(&s.source).1.to_string())
            .collect();

        let mut images = Vec::new();
        for volume in volumes {
            if volume.destroyed {
                continue;
            }
            let Some(decoded) = naming::decode_array_name(&volume.name) else {
                // Temp clones and foreign names do not decode; skip.
                continue;
            };
            if decoded.storage != naming::sanitize_storage(&self.config.storage).replace('-', "_")
            {
                continue;
            }
            if let Some(filter) = vmid_filter {
                if decoded.vmid != filter {
                    continue;
                }
            }
            let is_template = template_sources.contains(&volume.name);
            let Some(volname) = decoded.to_volname(is_template) else {
                continue; // vmconf side-channel volumes are not images
            };
            images.push(ImageInfo {
                volname,
                vmid: decoded.vmid,
                size: volume.provisioned,
                used: volume.used,
                format: "raw",
            });
        }
        images.sort_by(|a, b| a.volname.cmp(&b.volname));
        Ok(images)
    }

    /// Provisioned and used bytes of one volume
    pub async fn volume_size_info(&self, volname: &str) -> Result<(u64, Option<u64>)> {
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
                name: qualified,
            })?;
        Ok((volume.provisioned, volume.used))
    }

    // =========================================================================
    // Features
    // =========================================================================

    /// Whether `feature` is supported for this volume in the given
    /// context (`snap` = the feature applies to a snapshot of it).
    pub fn volume_has_feature(&self, feature: &str, volname: &str, snap: bool) -> bool {
        let Some(parsed) = naming::parse_volname(volname) else {
            return false;
        };
        volume_feature_table(feature, &parsed, snap)
    }
}

/// Feature support per volume shape
fn volume_feature_table(feature: &str, parsed: &ParsedVolname, snap: bool) -> bool {
    let disk_like = matches!(
        parsed,
        ParsedVolname::Disk { .. } | ParsedVolname::Base { .. }
    );
    let is_base = parsed.is_template();
    match feature {
        "snapshot" => disk_like,
        "clone" => (snap && disk_like) || (!snap && is_base),
        "template" => !snap && matches!(parsed, ParsedVolname::Disk { .. }),
        "copy" => disk_like,
        "sparseinit" => !snap && disk_like,
        "rename" => !snap && matches!(parsed, ParsedVolname::Disk { .. }),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_free_index() {
        let used: HashSet<u32> = [0, 1, 3].into_iter().collect();
        assert_eq!(next_free_index(&used, 999), Some(2));

        let empty = HashSet::new();
        assert_eq!(next_free_index(&empty, 999), Some(0));

        let full: HashSet<u32> = (0..=999).collect();
        assert_eq!(next_free_index(&full, 999), None);
    }

    #[test]
    fn test_used_indices_and_free_index_disjoint() {
        let used: HashSet<u32> = (0..=42).collect();
        let free = next_free_index(&used, 999).unwrap();
        assert!(!used.contains(&free));
        assert_eq!(free, 43);
    }

    #[test]
    fn test_eager_shapes() {
        assert!(is_eager_shape(
            &naming::parse_volname("vm-100-state-s1").unwrap()
        ));
        assert!(is_eager_shape(
            &naming::parse_volname("vm-100-cloudinit").unwrap()
        ));
        assert!(!is_eager_shape(
            &naming::parse_volname("vm-100-disk-0").unwrap()
        ));
    }

    #[test]
    fn test_feature_table() {
        let vm = naming::parse_volname("vm-100-disk-0").unwrap();
        let base = naming::parse_volname("base-100-disk-0").unwrap();
        let state = naming::parse_volname("vm-100-state-s1").unwrap();

        assert!(volume_feature_table("snapshot", &vm, false));
        assert!(volume_feature_table("template", &vm, false));
        assert!(!volume_feature_table("template", &base, false));
        assert!(volume_feature_table("clone", &base, false));
        assert!(volume_feature_table("clone", &vm, true));
        assert!(!volume_feature_table("clone", &vm, false));
        assert!(volume_feature_table("rename", &vm, false));
        assert!(!volume_feature_table("rename", &base, false));
        assert!(!volume_feature_table("snapshot", &state, false));
        assert!(!volume_feature_table("wormhole", &vm, false));
    }
}

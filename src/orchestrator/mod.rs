//! Storage orchestrator
//!
//! Sits atop the array client, the SAN fabric driver, and the device
//! resolver, and implements the host platform's storage contract:
//! activation, allocation, snapshots, clones, and the compound ordering
//! guarantees between them (create -> connect -> device appears; teardown
//! -> disconnect -> destroy).

pub mod backup;
pub mod clone_ops;
pub mod snapshot_ops;
pub mod volume_ops;

use crate::array::{ArrayClient, ArrayClientConfig, HostRecord};
use crate::config::{HostMode, SanProtocolKind, StorageConfig};
use crate::device::DeviceResolver;
use crate::error::{Error, Result};
use crate::naming;
use crate::san::{self, fabric_for, CommandRunner, Multipath, SanFabric};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Key into the temp-clone tracking map: (storage, volname, snap)
pub(crate) type TempCloneKey = (String, String, String);

// =============================================================================
// Status
// =============================================================================

/// Capacity report for the storage
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StorageStatus {
    pub total: u64,
    pub used: u64,
    pub available: u64,
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Coordinates the array control plane, the host SAN data plane, and the
/// host-side volume namespace for one storage definition.
pub struct Orchestrator {
    pub(crate) config: StorageConfig,
    pub(crate) client: ArrayClient,
    pub(crate) fabric: Arc<dyn SanFabric>,
    pub(crate) resolver: DeviceResolver,
    pub(crate) multipath: Multipath,
    /// This node's name as used in host registration
    pub(crate) node: String,
    /// Snapshot-access clones created by this process
    pub(crate) temp_clones: DashMap<TempCloneKey, String>,
}

impl Orchestrator {
    /// Connect to the array and assemble the component stack.
    pub async fn connect(mut config: StorageConfig) -> Result<Self> {
        config.validate()?;
        let client = ArrayClient::connect(ArrayClientConfig::from(&config)).await?;
        let runner = CommandRunner::default();
        let multipath = Multipath::new(runner.clone());
        let resolver = DeviceResolver::new(runner.clone(), multipath.clone());
        let fabric = fabric_for(config.protocol, runner);
        let node = detect_node_name();
        Ok(Self {
            config,
            client,
            fabric,
            resolver,
            multipath,
            node,
            temp_clones: DashMap::new(),
        })
    }

    /// Override the detected node name
    pub fn with_node_name(mut self, node: String) -> Self {
        self.node = node;
        self
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn client(&self) -> &ArrayClient {
        &self.client
    }

    pub fn fabric(&self) -> &dyn SanFabric {
        self.fabric.as_ref()
    }

    // =========================================================================
    // Name Helpers
    // =========================================================================

    /// Attach the configured pod qualifier
    pub(crate) fn qualify(&self, name: &str) -> String {
        naming::pod_qualify(self.config.pod.as_deref(), name)
    }

    /// Array Host object this node registers under
    pub(crate) fn local_host_name(&self) -> String {
        match self.config.host_mode {
            HostMode::PerNode => naming::host_name(&self.config.cluster_name, Some(&self.node)),
            HostMode::Shared => naming::host_name(&self.config.cluster_name, None),
        }
    }

    // =========================================================================
    // Activation
    // =========================================================================

    /// Bring the storage up on this node: verify the array is reachable,
    /// sweep stale temp clones, ensure the multipath stanza, establish
    /// fabric connectivity, and register this node's initiators.
    pub async fn activate_storage(&self) -> Result<()> {
        let array = self.client.array_info().await?;
        info!(
            "Activating storage {} on array {} (Purity {})",
            self.config.storage, array.name, array.version
        );

        if let Err(e) = self.sweep_orphan_temp_clones().await {
            warn!("Orphan temp-clone sweep failed: {e}");
        }

        if let Err(e) = self.multipath.ensure_device_stanza() {
            warn!("Could not ensure multipath device stanza: {e}");
        }

        let portals = match self.config.protocol {
            SanProtocolKind::Iscsi => self.client.list_iscsi_portals().await?,
            SanProtocolKind::Fc => Vec::new(),
        };
        self.fabric.discover_and_login(&portals).await?;

        if self.config.protocol == SanProtocolKind::Iscsi {
            self.rescan_local().await;
        }

        self.ensure_host_registration().await?;
        info!("Storage {} active", self.config.storage);
        Ok(())
    }

    /// Take the storage down on this node. Volumes with in-use devices are
    /// skipped and logged; everything else is torn down locally and
    /// disconnected. With no connections left, iSCSI sessions are closed.
    pub async fn deactivate_storage(&self) -> Result<()> {
        let glob = self.qualify(&naming::storage_volume_glob(&self.config.storage));
        let local_host = self.local_host_name();
        let mut skipped = 0usize;

        for volume in self.client.list_volumes(&glob).await? {
            let wwid = volume.wwid();
            match self.resolver.device_in_use(&wwid).await {
                Ok(Some(reason)) => {
                    info!("Skipping {} during deactivation: {reason}", volume.name);
                    skipped += 1;
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("In-use check for {} failed, skipping: {e}", volume.name);
                    skipped += 1;
                    continue;
                }
            }
            if let Err(e) = self.resolver.cleanup_lun_devices(&wwid).await {
                warn!("Teardown of {} failed: {e}", volume.name);
                continue;
            }
            match self
                .client
                .disconnect_volume(&local_host, &volume.qualified_name())
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!("Disconnect of {} failed: {e}", volume.name),
            }
        }

        if self.config.protocol == SanProtocolKind::Iscsi {
            let remaining = self.client.list_host_connections(&local_host).await?;
            if remaining.is_empty() {
                info!("No volumes remain connected; logging out of array portals");
                let portals = self.client.list_iscsi_portals().await?;
                self.fabric.cleanup_sessions(&portals).await?;
            } else {
                debug!(
                    "{} connections remain ({} local devices skipped), keeping sessions",
                    remaining.len(),
                    skipped
                );
            }
        }
        Ok(())
    }

    // =========================================================================
    // Host Registration
    // =========================================================================

    /// Ensure the Host object for this node (or the shared cluster host)
    /// exists and carries our initiators. A peer creating the host at the
    /// same time is benign; an initiator owned by a *different* host is a
    /// configuration problem the administrator must resolve.
    pub(crate) async fn ensure_host_registration(&self) -> Result<HostRecord> {
        let host_name = self.local_host_name();
        let mut host = self.client.get_or_create_host(&host_name).await?;
        let initiators = self.fabric.initiators().await?;

        for initiator in &initiators {
            if host.has_initiator(initiator) {
                continue;
            }
            match self
                .client
                .host_add_initiator(&host_name, self.config.protocol, initiator)
                .await
            {
                Ok(()) => {
                    info!("Registered initiator {initiator} on host {host_name}");
                }
                Err(e) => {
                    // Re-read: a concurrent add by ourselves is success, an
                    // initiator held by another host is fatal.
                    host = self
                        .client
                        .get_host(&host_name)
                        .await?
                        .ok_or_else(|| Error::NotFound {
                            kind: "Host".into(),
                            name: host_name.clone(),
                        })?;
                    if host.has_initiator(initiator) {
                        continue;
                    }
                    let lowered = e.to_string().to_ascii_lowercase();
                    if lowered.contains("already in use")
                        || lowered.contains("already exists")
                        || lowered.contains("conflict")
                    {
                        return Err(Error::Conflict {
                            message: format!(
                                "initiator {initiator} is registered to a different host on the array"
                            ),
                            remediation: Some(
                                "remove the conflicting initiator registration on the array, \
                                 then activate this storage again"
                                    .into(),
                            ),
                        });
                    }
                    return Err(e);
                }
            }
        }

        self.client
            .get_host(&host_name)
            .await?
            .ok_or_else(|| Error::NotFound {
                kind: "Host".into(),
                name: host_name,
            })
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Capacity: the pod quota when one is configured and non-zero,
    /// otherwise the array totals.
    pub async fn status(&self) -> Result<StorageStatus> {
        if let Some(pod) = &self.config.pod {
            if let Some(info) = self.client.pod_info(pod).await? {
                if let Some(quota) = info.quota_limit.filter(|q| *q > 0) {
                    let used = info.used.unwrap_or(0);
                    return Ok(StorageStatus {
                        total: quota,
                        used,
                        available: quota.saturating_sub(used),
                    });
                }
            }
        }
        let space = self.client.array_space().await?;
        Ok(StorageStatus {
            total: space.total,
            used: space.used,
            available: space.available(),
        })
    }

    // =========================================================================
    // Local Rescan
    // =========================================================================

    /// Full local refresh: protocol rescan, SCSI hosts, multipath, udev.
    /// Best-effort; failures are logged, callers continue.
    pub(crate) async fn rescan_local(&self) {
        if let Err(e) = self.fabric.rescan_fabric().await {
            warn!("Fabric rescan failed: {e}");
        }
        if let Err(e) = san::rescan_scsi_hosts(&self.resolver.sysfs_root) {
            warn!("SCSI host rescan failed: {e}");
        }
        if let Err(e) = self.multipath.reconfigure().await {
            warn!("Multipath reload failed: {e}");
        }
        if let Err(e) = san::trigger_udev(&self.resolver.runner).await {
            warn!("udev trigger failed: {e}");
        }
    }

    // =========================================================================
    // Shared Volume Helpers
    // =========================================================================

    /// Connect a volume to every cluster host, best-effort, but require
    /// the connection to this node's host.
    pub(crate) async fn connect_cluster_hosts(&self, qualified: &str) -> Result<()> {
        let glob = naming::cluster_host_glob(&self.config.cluster_name);
        let local = self.local_host_name();
        let mut local_connected = false;

        let hosts = self.client.list_hosts(&glob).await.unwrap_or_else(|e| {
            warn!("Cluster host listing failed: {e}");
            Vec::new()
        });
        for host in &hosts {
            match self.client.connect_volume(&host.name, qualified).await {
                Ok(()) => {
                    if host.name == local {
                        local_connected = true;
                    }
                }
                Err(e) if e.is_benign_conflict() => {
                    if host.name == local {
                        local_connected = true;
                    }
                }
                Err(e) => warn!("Connecting {qualified} to {} failed: {e}", host.name),
            }
        }

        if !local_connected {
            match self.client.connect_volume(&local, qualified).await {
                Ok(()) => {}
                Err(e) if e.is_benign_conflict() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Disconnect a volume from every host it is connected to; absent
    /// connections are fine.
    pub(crate) async fn disconnect_all_hosts(&self, qualified: &str) -> Result<()> {
        let connections = match self.client.list_volume_connections(qualified).await {
            Ok(conns) => conns,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        for conn in connections {
            match self.client.disconnect_volume(&conn.host, qualified).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!("Disconnect of {qualified} from {} failed: {e}", conn.host),
            }
        }
        Ok(())
    }

    /// Undo a partially finished create: disconnect everywhere, then
    /// soft-delete so the volume stays recoverable on the array.
    pub(crate) async fn rollback_created_volume(&self, qualified: &str) {
        if let Err(e) = self.disconnect_all_hosts(qualified).await {
            warn!("Rollback disconnect of {qualified} failed: {e}");
        }
        match self.client.destroy_volume(qualified).await {
            Ok(()) => info!("Rolled back {qualified} (soft-deleted)"),
            Err(e) => warn!("Rollback soft-delete of {qualified} failed: {e}"),
        }
    }
}

/// This node's short hostname
fn detect_node_name() -> String {
    if let Ok(name) = std::fs::read_to_string("/proc/sys/kernel/hostname") {
        let short = name.trim().split('.').next().unwrap_or("").to_string();
        if !short.is_empty() {
            return short;
        }
    }
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_node_name_is_short() {
        let name = detect_node_name();
        assert!(!name.is_empty());
        assert!(!name.contains('.'));
    }
}

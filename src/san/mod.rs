//! Host SAN data plane
//!
//! Drivers for the kernel's iSCSI and FC stacks plus device-mapper
//! multipath, all funneled through one subprocess gateway. The
//! [`SanFabric`] trait is the protocol seam the orchestrator is built
//! against; it is the only place that knows whether this storage speaks
//! iSCSI or FC.

pub mod fc;
pub mod iscsi;
pub mod multipath;
pub mod process;

pub use fc::{FcFabric, FcHost, FcRemotePort};
pub use iscsi::{IscsiFabric, IscsiSession, IscsiTarget};
pub use multipath::Multipath;
pub use process::{validate_arg, CommandOutput, CommandRunner};

use crate::config::SanProtocolKind;
use crate::error::Result;
use async_trait::async_trait;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

// =============================================================================
// Common Rescan Helpers
// =============================================================================

/// Write `- - -` to every SCSI host scan trigger. Returns the number of
/// hosts poked.
pub fn rescan_scsi_hosts(sysfs_root: &Path) -> Result<usize> {
    let dir = sysfs_root.join("class/scsi_host");
    if !dir.exists() {
        return Ok(0);
    }
    let mut count = 0;
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        let scan = entry.path().join("scan");
        if !scan.exists() {
            continue;
        }
        match std::fs::write(&scan, "- - -") {
            Ok(()) => count += 1,
            Err(e) => warn!("SCSI rescan via {} failed: {e}", scan.display()),
        }
    }
    debug!("Rescanned {count} SCSI hosts");
    Ok(count)
}

/// Poke udev after a rescan. Freshly created volumes have been seen to
/// keep an old WWID in the udev database until the block subsystem is
/// retriggered and settled.
pub async fn trigger_udev(runner: &CommandRunner) -> Result<()> {
    runner
        .run("udevadm", &["trigger", "--subsystem-match=block"])
        .await?;
    runner.run("udevadm", &["settle"]).await?;
    Ok(())
}

// =============================================================================
// Protocol Seam
// =============================================================================

/// Protocol capability object injected into the orchestrator. One
/// implementation per transport; call sites never branch on the protocol.
#[async_trait]
pub trait SanFabric: Send + Sync {
    fn kind(&self) -> SanProtocolKind;

    /// Local initiator identifiers to register on the array: IQNs for
    /// iSCSI, raw lowercase WWNs for FC.
    async fn initiators(&self) -> Result<Vec<String>>;

    /// Establish data-plane connectivity. iSCSI discovers and logs in to
    /// each portal, tolerating per-portal failure; FC verifies HBAs exist
    /// and warns when no online target is visible.
    async fn discover_and_login(&self, portals: &[String]) -> Result<()>;

    /// Protocol-specific rescan used inside device wait loops.
    async fn rescan_fabric(&self) -> Result<()>;

    /// Tear down sessions toward the array (iSCSI logout; FC has no
    /// session state).
    async fn cleanup_sessions(&self, portals: &[String]) -> Result<()>;

    /// State dump attached to device-timeout errors so the failure is
    /// diagnosable without log scraping.
    async fn diagnostics(&self) -> String;
}

/// Build the fabric driver for the configured protocol.
pub fn fabric_for(kind: SanProtocolKind, runner: CommandRunner) -> Arc<dyn SanFabric> {
    match kind {
        SanProtocolKind::Iscsi => Arc::new(IscsiSan::new(IscsiFabric::new(runner))),
        SanProtocolKind::Fc => Arc::new(FcSan::new(FcFabric::new())),
    }
}

// =============================================================================
// iSCSI
// =============================================================================

/// [`SanFabric`] over the iSCSI driver
pub struct IscsiSan {
    fabric: IscsiFabric,
}

impl IscsiSan {
    pub fn new(fabric: IscsiFabric) -> Self {
        Self { fabric }
    }
}

#[async_trait]
impl SanFabric for IscsiSan {
    fn kind(&self) -> SanProtocolKind {
        SanProtocolKind::Iscsi
    }

    async fn initiators(&self) -> Result<Vec<String>> {
        Ok(vec![self.fabric.local_iqn()?])
    }

    async fn discover_and_login(&self, portals: &[String]) -> Result<()> {
        let mut logged_in = 0usize;
        for portal in portals {
            let targets = match self.fabric.discover(portal).await {
                Ok(targets) => targets,
                Err(e) => {
                    warn!("Discovery against {portal} failed: {e}");
                    continue;
                }
            };
            for target in &targets {
                match self.fabric.login(target).await {
                    Ok(()) => logged_in += 1,
                    Err(e) => warn!("Login to {} via {} failed: {e}", target.iqn, target.portal),
                }
            }
        }
        info!("iSCSI login pass finished ({logged_in} targets reachable)");
        Ok(())
    }

    async fn rescan_fabric(&self) -> Result<()> {
        self.fabric.rescan_sessions().await
    }

    async fn cleanup_sessions(&self, portals: &[String]) -> Result<()> {
        for session in self.fabric.sessions().await? {
            if !portals.contains(&session.portal) {
                continue;
            }
            if let Err(e) = self
                .fabric
                .logout(&session.iqn, Some(&session.portal))
                .await
            {
                warn!("Logout of {} failed: {e}", session.iqn);
            }
        }
        Ok(())
    }

    async fn diagnostics(&self) -> String {
        let mut out = String::from("Active iSCSI sessions:\n");
        match self.fabric.sessions().await {
            Ok(sessions) if sessions.is_empty() => {
                out.push_str("  (none)\n");
            }
            Ok(sessions) => {
                for s in sessions {
                    let _ = writeln!(out, "  [{}] {} {}", s.id, s.portal, s.iqn);
                }
            }
            Err(e) => {
                let _ = writeln!(out, "  (enumeration failed: {e})");
            }
        }
        out.push_str("Debug with: iscsiadm -m session -P 3; multipath -ll");
        out
    }
}

// =============================================================================
// FC
// =============================================================================

/// [`SanFabric`] over the FC driver
pub struct FcSan {
    fabric: FcFabric,
}

impl FcSan {
    pub fn new(fabric: FcFabric) -> Self {
        Self { fabric }
    }
}

#[async_trait]
impl SanFabric for FcSan {
    fn kind(&self) -> SanProtocolKind {
        SanProtocolKind::Fc
    }

    async fn initiators(&self) -> Result<Vec<String>> {
        let hbas = self.fabric.require_hbas()?;
        Ok(hbas.into_iter().map(|h| h.port_name).collect())
    }

    async fn discover_and_login(&self, _portals: &[String]) -> Result<()> {
        self.fabric.require_hbas()?;
        let targets = self.fabric.online_targets()?;
        if targets.is_empty() {
            warn!("No online FC target ports visible on the fabric yet");
        } else {
            info!("{} online FC target ports visible", targets.len());
        }
        Ok(())
    }

    async fn rescan_fabric(&self) -> Result<()> {
        self.fabric.rescan()
    }

    async fn cleanup_sessions(&self, _portals: &[String]) -> Result<()> {
        // FC holds no session state to tear down.
        Ok(())
    }

    async fn diagnostics(&self) -> String {
        let mut out = String::from("FC HBAs:\n");
        match self.fabric.list_hbas() {
            Ok(hbas) if hbas.is_empty() => out.push_str("  (none)\n"),
            Ok(hbas) => {
                for h in hbas {
                    let _ = writeln!(
                        out,
                        "  {} wwpn={} state={}",
                        h.name,
                        h.wwpn_display(),
                        h.port_state
                    );
                }
            }
            Err(e) => {
                let _ = writeln!(out, "  (enumeration failed: {e})");
            }
        }
        match self.fabric.online_targets() {
            Ok(targets) => {
                let _ = writeln!(out, "Online FC targets: {}", targets.len());
            }
            Err(e) => {
                let _ = writeln!(out, "Online FC targets: unknown ({e})");
            }
        }
        out.push_str("Debug with: cat /sys/class/fc_host/host*/port_state; multipath -ll");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_rescan_scsi_hosts() {
        let sysfs = tempfile::tempdir().unwrap();
        for host in ["host0", "host1"] {
            let dir = sysfs.path().join("class/scsi_host").join(host);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("scan"), "").unwrap();
        }
        let count = rescan_scsi_hosts(sysfs.path()).unwrap();
        assert_eq!(count, 2);
        let written =
            fs::read_to_string(sysfs.path().join("class/scsi_host/host0/scan")).unwrap();
        assert_eq!(written, "- - -");
    }

    #[test]
    fn test_rescan_scsi_hosts_missing_dir() {
        let sysfs = tempfile::tempdir().unwrap();
        assert_eq!(rescan_scsi_hosts(sysfs.path()).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_fc_initiators_need_hardware() {
        let sysfs = tempfile::tempdir().unwrap();
        let san = FcSan::new(FcFabric::new().with_sysfs_root(sysfs.path().to_path_buf()));
        assert!(san.initiators().await.is_err());
    }
}

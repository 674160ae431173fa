//! Fibre Channel fabric driver
//!
//! Enumerates HBAs under `/sys/class/fc_host` and remote ports under
//! `/sys/class/fc_remote_ports`, and rescans the fabric by issuing a LIP
//! followed by a SCSI host scan. WWPNs surface in two spellings: colon
//! separated for operators, raw lowercase hex for the array API.

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A local FC HBA port
#[derive(Debug, Clone)]
pub struct FcHost {
    /// Kernel name, e.g. `host7`
    pub name: String,
    /// Raw lowercase WWPN, 16 hex chars
    pub port_name: String,
    /// Raw lowercase WWNN
    pub node_name: String,
    /// `Online`, `Linkdown`, ...
    pub port_state: String,
    pub port_type: Option<String>,
    pub speed: Option<String>,
    pub fabric_name: Option<String>,
}

impl FcHost {
    pub fn is_online(&self) -> bool {
        self.port_state.eq_ignore_ascii_case("online")
    }

    /// WWPN in colon-separated display form
    pub fn wwpn_display(&self) -> String {
        colonize(&self.port_name)
    }
}

/// A remote port visible on the fabric
#[derive(Debug, Clone)]
pub struct FcRemotePort {
    /// Kernel name, e.g. `rport-7:0-1`
    pub name: String,
    pub port_name: String,
    pub port_state: String,
    /// `roles` includes a target role
    pub is_target: bool,
}

impl FcRemotePort {
    pub fn is_online_target(&self) -> bool {
        self.is_target && self.port_state.eq_ignore_ascii_case("online")
    }
}

/// Driver for the host's FC stack
#[derive(Debug, Clone)]
pub struct FcFabric {
    sysfs_root: PathBuf,
}

impl FcFabric {
    pub fn new() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys"),
        }
    }

    /// Override the sysfs root (tests)
    pub fn with_sysfs_root(mut self, root: PathBuf) -> Self {
        self.sysfs_root = root;
        self
    }

    // =========================================================================
    // Enumeration
    // =========================================================================

    /// Enumerate local HBA ports
    pub fn list_hbas(&self) -> Result<Vec<FcHost>> {
        let dir = self.sysfs_root.join("class/fc_host");
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut hbas = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with("host") {
                continue;
            }
            let path = entry.path();
            let port_name = match read_attr(&path, "port_name") {
                Some(v) => raw_wwn(&v),
                None => {
                    warn!("fc_host {name} has no port_name, skipping");
                    continue;
                }
            };
            hbas.push(FcHost {
                name,
                port_name,
                node_name: read_attr(&path, "node_name")
                    .map(|v| raw_wwn(&v))
                    .unwrap_or_default(),
                port_state: read_attr(&path, "port_state").unwrap_or_default(),
                port_type: read_attr(&path, "port_type"),
                speed: read_attr(&path, "speed"),
                fabric_name: read_attr(&path, "fabric_name").map(|v| raw_wwn(&v)),
            });
        }
        hbas.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(hbas)
    }

    /// WWPNs of all local HBAs, raw lowercase form
    pub fn local_wwpns(&self) -> Result<Vec<String>> {
        Ok(self
            .list_hbas()?
            .into_iter()
            .map(|h| h.port_name)
            .collect())
    }

    /// Enumerate remote ports seen on the fabric
    pub fn list_remote_ports(&self) -> Result<Vec<FcRemotePort>> {
        let dir = self.sysfs_root.join("class/fc_remote_ports");
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut ports = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with("rport-") {
                continue;
            }
            let path = entry.path();
            let roles = read_attr(&path, "roles").unwrap_or_default();
            ports.push(FcRemotePort {
                name,
                port_name: read_attr(&path, "port_name")
                    .map(|v| raw_wwn(&v))
                    .unwrap_or_default(),
                port_state: read_attr(&path, "port_state").unwrap_or_default(),
                is_target: roles.to_ascii_lowercase().contains("target"),
            });
        }
        ports.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(ports)
    }

    /// Remote target ports currently online
    pub fn online_targets(&self) -> Result<Vec<FcRemotePort>> {
        Ok(self
            .list_remote_ports()?
            .into_iter()
            .filter(FcRemotePort::is_online_target)
            .collect())
    }

    // =========================================================================
    // Rescan
    // =========================================================================

    /// Rescan the fabric: issue a LIP on every HBA, then trigger the
    /// matching SCSI host scan.
    pub fn rescan(&self) -> Result<()> {
        for hba in self.list_hbas()? {
            let lip = self
                .sysfs_root
                .join("class/fc_host")
                .join(&hba.name)
                .join("issue_lip");
            if let Err(e) = fs::write(&lip, "1") {
                warn!("issue_lip on {} failed: {e}", hba.name);
            }
            let scan = self
                .sysfs_root
                .join("class/scsi_host")
                .join(&hba.name)
                .join("scan");
            if scan.exists() {
                if let Err(e) = fs::write(&scan, "- - -") {
                    warn!("scsi scan on {} failed: {e}", hba.name);
                }
            }
        }
        debug!("FC fabric rescan issued");
        Ok(())
    }

    /// Fail activation when the node has no FC hardware at all.
    pub fn require_hbas(&self) -> Result<Vec<FcHost>> {
        let hbas = self.list_hbas()?;
        if hbas.is_empty() {
            return Err(Error::Configuration(
                "protocol is fc but no FC HBAs were found under /sys/class/fc_host".into(),
            ));
        }
        Ok(hbas)
    }
}

impl Default for FcFabric {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Sysfs Helpers
// =============================================================================

fn read_attr(dir: &Path, attr: &str) -> Option<String> {
    let value = fs::read_to_string(dir.join(attr)).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// `0x524A937AF3112201` -> `524a937af3112201`
fn raw_wwn(value: &str) -> String {
    value
        .trim()
        .trim_start_matches("0x")
        .chars()
        .filter(|c| *c != ':')
        .collect::<String>()
        .to_ascii_lowercase()
}

/// `524a937af3112201` -> `52:4a:93:7a:f3:11:22:01`
fn colonize(raw: &str) -> String {
    raw.as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).into_owned())
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fake_sysfs() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let host = dir.path().join("class/fc_host/host7");
        fs::create_dir_all(&host).unwrap();
        fs::write(host.join("port_name"), "0x524A937AF3112201\n").unwrap();
        fs::write(host.join("node_name"), "0x524A937AF3112200\n").unwrap();
        fs::write(host.join("port_state"), "Online\n").unwrap();
        fs::write(host.join("port_type"), "NPort (fabric via point-to-point)\n").unwrap();
        fs::write(host.join("speed"), "16 Gbit\n").unwrap();
        fs::write(host.join("fabric_name"), "0x1000000533a61234\n").unwrap();

        let rport = dir.path().join("class/fc_remote_ports/rport-7:0-1");
        fs::create_dir_all(&rport).unwrap();
        fs::write(rport.join("port_name"), "0x524A937000011001\n").unwrap();
        fs::write(rport.join("port_state"), "Online\n").unwrap();
        fs::write(rport.join("roles"), "FCP Target\n").unwrap();

        let initiator_rport = dir.path().join("class/fc_remote_ports/rport-7:0-2");
        fs::create_dir_all(&initiator_rport).unwrap();
        fs::write(initiator_rport.join("port_name"), "0x2100000e1e1b0000\n").unwrap();
        fs::write(initiator_rport.join("port_state"), "Online\n").unwrap();
        fs::write(initiator_rport.join("roles"), "FCP Initiator\n").unwrap();
        dir
    }

    #[test]
    fn test_list_hbas() {
        let sysfs = fake_sysfs();
        let fabric = FcFabric::new().with_sysfs_root(sysfs.path().to_path_buf());
        let hbas = fabric.list_hbas().unwrap();
        assert_eq!(hbas.len(), 1);
        assert_eq!(hbas[0].name, "host7");
        assert_eq!(hbas[0].port_name, "524a937af3112201");
        assert_eq!(hbas[0].wwpn_display(), "52:4a:93:7a:f3:11:22:01");
        assert!(hbas[0].is_online());
    }

    #[test]
    fn test_online_targets_filters_initiators() {
        let sysfs = fake_sysfs();
        let fabric = FcFabric::new().with_sysfs_root(sysfs.path().to_path_buf());
        let targets = fabric.online_targets().unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].port_name, "524a937000011001");
    }

    #[test]
    fn test_missing_sysfs_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let fabric = FcFabric::new().with_sysfs_root(dir.path().to_path_buf());
        assert!(fabric.list_hbas().unwrap().is_empty());
        assert!(fabric.list_remote_ports().unwrap().is_empty());
        assert!(fabric.require_hbas().is_err());
    }

    #[test]
    fn test_rescan_writes_lip(){
        let sysfs = fake_sysfs();
        let scan_dir = sysfs.path().join("class/scsi_host/host7");
        fs::create_dir_all(&scan_dir).unwrap();
        fs::write(scan_dir.join("scan"), "").unwrap();
        let fabric = FcFabric::new().with_sysfs_root(sysfs.path().to_path_buf());
        fabric.rescan().unwrap();
        let lip = fs::read_to_string(
            sysfs.path().join("class/fc_host/host7/issue_lip"),
        )
        .unwrap();
        assert_eq!(lip, "1");
        let scan = fs::read_to_string(scan_dir.join("scan")).unwrap();
        assert_eq!(scan, "- - -");
    }
}

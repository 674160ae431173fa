//! iSCSI fabric driver
//!
//! Wraps `iscsiadm` for discovery, login/logout, and session rescans, and
//! manages the local initiator name file.

use crate::error::{Error, Result};
use crate::san::process::{validate_arg, CommandRunner};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Location of the local initiator name
pub const INITIATOR_NAME_FILE: &str = "/etc/iscsi/initiatorname.iscsi";

/// iscsiadm exit code: session already present on login
const EXIT_SESSION_EXISTS: i32 = 15;

/// iscsiadm exit code: no objects found (no sessions / no records)
const EXIT_NO_OBJECTS: i32 = 21;

/// A discovered target behind one portal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IscsiTarget {
    /// `ip:port` (tpgt stripped)
    pub portal: String,
    pub iqn: String,
}

/// An established session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IscsiSession {
    pub id: u32,
    pub portal: String,
    pub iqn: String,
}

/// Driver for the host's iSCSI stack
#[derive(Debug, Clone)]
pub struct IscsiFabric {
    runner: CommandRunner,
    initiator_file: PathBuf,
}

impl IscsiFabric {
    pub fn new(runner: CommandRunner) -> Self {
        Self {
            runner,
            initiator_file: PathBuf::from(INITIATOR_NAME_FILE),
        }
    }

    /// Override the initiator name file location (tests)
    pub fn with_initiator_file(mut self, path: PathBuf) -> Self {
        self.initiator_file = path;
        self
    }

    // =========================================================================
    // Initiator Name
    // =========================================================================

    /// The node's IQN from the initiator name file
    pub fn local_iqn(&self) -> Result<String> {
        let content = std::fs::read_to_string(&self.initiator_file)?;
        parse_initiator_file(&content).ok_or_else(|| {
            Error::Configuration(format!(
                "no InitiatorName in {}",
                self.initiator_file.display()
            ))
        })
    }

    /// Rewrite the initiator name file with the given IQN
    pub fn write_local_iqn(&self, iqn: &str) -> Result<()> {
        validate_arg(iqn)?;
        info!("Setting initiator name to {iqn}");
        std::fs::write(
            &self.initiator_file,
            format!("InitiatorName={iqn}\n"),
        )?;
        Ok(())
    }

    // =========================================================================
    // Discovery / Login
    // =========================================================================

    /// Sendtargets discovery against one portal
    pub async fn discover(&self, portal: &str) -> Result<Vec<IscsiTarget>> {
        validate_arg(portal)?;
        let out = self
            .runner
            .run(
                "iscsiadm",
                &["-m", "discovery", "-t", "sendtargets", "-p", portal],
            )
            .await?;
        Ok(parse_discovery(&out.stdout))
    }

    /// Log in to one discovered target. Already-established sessions are
    /// not an error.
    pub async fn login(&self, target: &IscsiTarget) -> Result<()> {
        validate_arg(&target.iqn)?;
        validate_arg(&target.portal)?;
        let out = self
            .runner
            .run_with(
                "iscsiadm",
                &[
                    "-m", "node", "-T", &target.iqn, "-p", &target.portal, "--login",
                ],
                &[EXIT_SESSION_EXISTS],
            )
            .await?;
        if out.code == EXIT_SESSION_EXISTS {
            debug!("Already logged in to {} via {}", target.iqn, target.portal);
        }
        Ok(())
    }

    /// Enumerate active sessions; none is not an error.
    pub async fn sessions(&self) -> Result<Vec<IscsiSession>> {
        let out = self
            .runner
            .run_with("iscsiadm", &["-m", "session"], &[EXIT_NO_OBJECTS])
            .await?;
        if out.code == EXIT_NO_OBJECTS {
            return Ok(Vec::new());
        }
        Ok(parse_sessions(&out.stdout))
    }

    /// Rescan every active session for new or resized LUNs
    pub async fn rescan_sessions(&self) -> Result<()> {
        self.runner
            .run_with("iscsiadm", &["-m", "session", "--rescan"], &[EXIT_NO_OBJECTS])
            .await?;
        Ok(())
    }

    /// Rescan one target's sessions
    pub async fn rescan_target(&self, iqn: &str) -> Result<()> {
        validate_arg(iqn)?;
        self.runner
            .run_with(
                "iscsiadm",
                &["-m", "node", "-T", iqn, "--rescan"],
                &[EXIT_NO_OBJECTS],
            )
            .await?;
        Ok(())
    }

    /// Log out of a target, optionally restricted to one portal. Absent
    /// sessions are not an error.
    pub async fn logout(&self, iqn: &str, portal: Option<&str>) -> Result<()> {
        validate_arg(iqn)?;
        let mut args = vec!["-m", "node", "-T", iqn];
        if let Some(portal) = portal {
            validate_arg(portal)?;
            args.extend_from_slice(&["-p", portal]);
        }
        args.push("--logout");
        match self
            .runner
            .run_with("iscsiadm", &args, &[EXIT_NO_OBJECTS])
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!("iSCSI logout from {iqn} failed: {e}");
                Err(e)
            }
        }
    }
}

// =============================================================================
// Parsers
// =============================================================================

fn parse_initiator_file(content: &str) -> Option<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.starts_with('#'))
        .find_map(|l| l.strip_prefix("InitiatorName="))
        .map(|s| s.trim().to_string())
}

/// Parse `iscsiadm -m discovery` output:
/// `192.168.10.5:3260,1 iqn.2010-06.com.purestorage:flasharray.x`
fn parse_discovery(stdout: &str) -> Vec<IscsiTarget> {
    stdout
        .lines()
        .filter_map(|line| {
            let (endpoint, iqn) = line.trim().split_once(' ')?;
            let portal = endpoint.split(',').next()?;
            Some(IscsiTarget {
                portal: portal.to_string(),
                iqn: iqn.trim().to_string(),
            })
        })
        .collect()
}

/// Parse `iscsiadm -m session` output:
/// `tcp: [1] 192.168.10.5:3260,1 iqn.2010-06.com.purestorage:flasharray.x (non-flash)`
fn parse_sessions(stdout: &str) -> Vec<IscsiSession> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let _transport = parts.next()?;
            let id = parts
                .next()?
                .trim_start_matches('[')
                .trim_end_matches(']')
                .parse()
                .ok()?;
            let portal = parts.next()?.split(',').next()?.to_string();
            let iqn = parts.next()?.to_string();
            Some(IscsiSession { id, portal, iqn })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_initiator_file() {
        let content = "## DO NOT EDIT\n# comment\nInitiatorName=iqn.1993-08.org.debian:01:abcd\n";
        assert_eq!(
            parse_initiator_file(content).unwrap(),
            "iqn.1993-08.org.debian:01:abcd"
        );
        assert!(parse_initiator_file("# nothing here\n").is_none());
    }

    #[test]
    fn test_parse_discovery() {
        let stdout = "\
192.168.10.5:3260,1 iqn.2010-06.com.purestorage:flasharray.aaa
192.168.10.6:3260,1 iqn.2010-06.com.purestorage:flasharray.aaa
";
        let targets = parse_discovery(stdout);
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].portal, "192.168.10.5:3260");
        assert_eq!(targets[0].iqn, "iqn.2010-06.com.purestorage:flasharray.aaa");
    }

    #[test]
    fn test_parse_sessions() {
        let stdout =
            "tcp: [3] 192.168.10.5:3260,1 iqn.2010-06.com.purestorage:flasharray.aaa (non-flash)\n";
        let sessions = parse_sessions(stdout);
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, 3);
        assert_eq!(sessions[0].portal, "192.168.10.5:3260");
        assert_eq!(sessions[0].iqn, "iqn.2010-06.com.purestorage:flasharray.aaa");
    }

    #[test]
    fn test_parse_sessions_empty() {
        assert!(parse_sessions("").is_empty());
    }

    #[test]
    fn test_initiator_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("initiatorname.iscsi");
        let fabric =
            IscsiFabric::new(CommandRunner::default()).with_initiator_file(path.clone());
        fabric
            .write_local_iqn("iqn.1993-08.org.debian:01:beef")
            .unwrap();
        assert_eq!(fabric.local_iqn().unwrap(), "iqn.1993-08.org.debian:01:beef");
    }
}

//! Device-mapper multipath control
//!
//! Drives `multipathd` and `multipath` and owns the write-once FlashArray
//! device stanza in the multipath configuration.

use crate::error::Result;
use crate::san::process::{validate_arg, CommandRunner};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

/// Marker line used to detect an existing FlashArray stanza
const STANZA_MARKER: &str = "vendor \"PURE\"";

/// Device stanza recommended for FlashArray LUNs
const DEVICE_STANZA: &str = r#"devices {
    device {
        vendor "PURE"
        product "FlashArray"
        path_selector "service-time 0"
        hardware_handler "1 alua"
        path_grouping_policy "group_by_prio"
        prio "alua"
        failback "immediate"
        path_checker "tur"
        fast_io_fail_tmo 10
        user_friendly_names "no"
        no_path_retry 0
        features "0"
        dev_loss_tmo 60
    }
}
"#;

/// Fresh multipath.conf written when the host has none at all
const FRESH_CONF_HEADER: &str = r#"defaults {
    user_friendly_names no
    find_multipaths yes
}
"#;

/// Driver for multipathd and the multipath configuration
#[derive(Debug, Clone)]
pub struct Multipath {
    runner: CommandRunner,
    etc_root: PathBuf,
}

impl Multipath {
    pub fn new(runner: CommandRunner) -> Self {
        Self {
            runner,
            etc_root: PathBuf::from("/etc"),
        }
    }

    /// Override the configuration root (tests)
    pub fn with_etc_root(mut self, root: PathBuf) -> Self {
        self.etc_root = root;
        self
    }

    // =========================================================================
    // Daemon Control
    // =========================================================================

    /// Reload maps after a fabric change
    pub async fn reconfigure(&self) -> Result<()> {
        self.runner.run("multipathd", &["reconfigure"]).await?;
        Ok(())
    }

    /// Flush one unused map
    pub async fn flush(&self, device: &str) -> Result<()> {
        validate_arg(device)?;
        self.runner.run("multipath", &["-f", device]).await?;
        Ok(())
    }

    pub async fn add_path(&self, device: &str) -> Result<()> {
        validate_arg(device)?;
        self.runner.run("multipathd", &["add", "path", device]).await?;
        Ok(())
    }

    pub async fn remove_path(&self, device: &str) -> Result<()> {
        validate_arg(device)?;
        self.runner
            .run("multipathd", &["remove", "path", device])
            .await?;
        Ok(())
    }

    pub async fn add_map(&self, name: &str) -> Result<()> {
        validate_arg(name)?;
        self.runner.run("multipathd", &["add", "map", name]).await?;
        Ok(())
    }

    pub async fn remove_map(&self, name: &str) -> Result<()> {
        validate_arg(name)?;
        self.runner
            .run("multipathd", &["remove", "map", name])
            .await?;
        Ok(())
    }

    /// All current maps as `(name, wwid)` pairs
    pub async fn list_maps(&self) -> Result<Vec<(String, String)>> {
        let out = self
            .runner
            .run(
                "multipathd",
                &["show", "maps", "raw", "format", "%n %w"],
            )
            .await?;
        Ok(parse_maps(&out.stdout))
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Ensure the FlashArray device stanza is present. Idempotent: the
    /// presence of the stanza short-circuits. Returns whether anything was
    /// written.
    ///
    /// Placement order: a `conf.d` drop-in when the directory exists,
    /// otherwise appended to an existing `multipath.conf`, otherwise a
    /// fresh `multipath.conf`.
    pub fn ensure_device_stanza(&self) -> Result<bool> {
        let confd = self.etc_root.join("multipath/conf.d");
        if confd.is_dir() {
            let dropin = confd.join("pure-storage.conf");
            if dropin.exists() {
                debug!("Multipath drop-in already present");
                return Ok(false);
            }
            fs::write(&dropin, DEVICE_STANZA)?;
            info!("Wrote multipath drop-in {}", dropin.display());
            return Ok(true);
        }

        let conf = self.etc_root.join("multipath.conf");
        if conf.exists() {
            let content = fs::read_to_string(&conf)?;
            if content.contains(STANZA_MARKER) {
                debug!("Multipath configuration already carries the stanza");
                return Ok(false);
            }
            let mut updated = content;
            if !updated.ends_with('\n') {
                updated.push('\n');
            }
            updated.push_str(DEVICE_STANZA);
            fs::write(&conf, updated)?;
            info!("Appended FlashArray stanza to {}", conf.display());
            return Ok(true);
        }

        fs::write(&conf, format!("{FRESH_CONF_HEADER}{DEVICE_STANZA}"))?;
        info!("Created {}", conf.display());
        Ok(true)
    }
}

fn parse_maps(stdout: &str) -> Vec<(String, String)> {
    stdout
        .lines()
        .filter_map(|line| {
            let (name, wwid) = line.trim().split_once(' ')?;
            if name.is_empty() || wwid.is_empty() {
                return None;
            }
            Some((name.to_string(), wwid.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_maps() {
        let stdout = "\
3624a9370f4de639b29d64f2c000113ea 3624a9370f4de639b29d64f2c000113ea
mpatha 3624a9370aaaaaaaaaaaaaaaa00011111
";
        let maps = parse_maps(stdout);
        assert_eq!(maps.len(), 2);
        assert_eq!(maps[1].0, "mpatha");
        assert_eq!(maps[1].1, "3624a9370aaaaaaaaaaaaaaaa00011111");
    }

    #[test]
    fn test_stanza_prefers_confd() {
        let etc = tempfile::tempdir().unwrap();
        fs::create_dir_all(etc.path().join("multipath/conf.d")).unwrap();
        let mp = Multipath::new(CommandRunner::default())
            .with_etc_root(etc.path().to_path_buf());

        assert!(mp.ensure_device_stanza().unwrap());
        let dropin = etc.path().join("multipath/conf.d/pure-storage.conf");
        assert!(fs::read_to_string(&dropin).unwrap().contains(STANZA_MARKER));

        // Second call is a no-op.
        assert!(!mp.ensure_device_stanza().unwrap());
    }

    #[test]
    fn test_stanza_appends_to_existing_conf() {
        let etc = tempfile::tempdir().unwrap();
        let conf = etc.path().join("multipath.conf");
        fs::write(&conf, "defaults {\n}\n").unwrap();
        let mp = Multipath::new(CommandRunner::default())
            .with_etc_root(etc.path().to_path_buf());

        assert!(mp.ensure_device_stanza().unwrap());
        let content = fs::read_to_string(&conf).unwrap();
        assert!(content.starts_with("defaults {"));
        assert!(content.contains(STANZA_MARKER));

        assert!(!mp.ensure_device_stanza().unwrap());
        let again = fs::read_to_string(&conf).unwrap();
        assert_eq!(content, again, "stanza must not duplicate");
    }

    #[test]
    fn test_stanza_creates_fresh_conf() {
        let etc = tempfile::tempdir().unwrap();
        let mp = Multipath::new(CommandRunner::default())
            .with_etc_root(etc.path().to_path_buf());

        assert!(mp.ensure_device_stanza().unwrap());
        let content = fs::read_to_string(etc.path().join("multipath.conf")).unwrap();
        assert!(content.contains("defaults {"));
        assert!(content.contains(STANZA_MARKER));
    }
}

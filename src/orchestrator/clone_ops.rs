//! Templates and clones
//!
//! A template is an ordinary array volume marked by a `pve-base` snapshot;
//! the host-side rename from `vm-*` to `base-*` carries no array-side
//! change. Clones from a template's base snapshot are linked and return
//! the slash-joined compound name so the host layer learns the parent.

use crate::error::{Error, Result};
use crate::naming::{self, ParsedVolname};
use crate::orchestrator::Orchestrator;
use tracing::info;

impl Orchestrator {
    /// Convert a VM disk into a template: ensure the `pve-base` marker
    /// snapshot exists and flip the host-side identity to `base-*`.
    pub async fn create_base(&self, volname: &str) -> Result<String> {
        let parsed = naming::parse_volname(volname)
            .ok_or_else(|| Error::InvalidVolumeName(volname.to_string()))?;
        let (vmid, index) = match parsed {
            ParsedVolname::Disk {
                vmid,
                index,
                parent: None,
            } => (vmid, index),
            ParsedVolname::Base { .. } => {
                return Err(Error::Unsupported(format!(
                    "{volname} is already a template"
                )))
            }
            _ => {
                return Err(Error::Unsupported(format!(
                    "only plain VM disks can become templates, not {volname}"
                )))
            }
        };

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

        if let Some(reason) = self.resolver.device_in_use(&volume.wwid()).await? {
            return Err(Error::DeviceInUse {
                device: volume.wwid(),
                reason,
            });
        }

        if self
            .client
            .get_snapshot(&qualified, naming::BASE_SNAPSHOT_SUFFIX)
            .await?
            .is_none()
        {
            self.client
                .create_snapshot(&qualified, naming::BASE_SNAPSHOT_SUFFIX)
                .await?;
            info!("Created base snapshot for {qualified}");
        }

        Ok(format!("base-{vmid}-disk-{index}"))
    }

    /// Clone a volume (or one of its snapshots) into a fresh disk for
    /// `vmid`. Source resolution:
    ///   1. an explicit snapshot when `snap` is given,
    ///   2. the `pve-base` snapshot when one exists (linked clone),
    ///   3. the volume itself (array-native instant clone).
    /// Returns `vm-{vmid}-disk-{n}` or the `{base}/{vm}` compound form
    /// for clones linked to a template.
    pub async fn clone_image(
        &self,
        volname: &str,
        vmid: u32,
        snap: Option<&str>,
    ) -> Result<String> {
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

        let (source, linked) = match snap {
            Some(snap) => {
                let suffix = naming::snapshot_suffix(snap);
                if self.client.get_snapshot(&qualified, &suffix).await?.is_none() {
                    return Err(Error::NotFound {
                        kind: "Snapshot".into(),
                        name: naming::snapshot_name(&qualified, &suffix),
                    });
                }
                (naming::snapshot_name(&qualified, &suffix), false)
            }
            None => {
                let has_base = self
                    .client
                    .get_snapshot(&qualified, naming::BASE_SNAPSHOT_SUFFIX)
                    .await?
                    .is_some();
                if has_base {
                    (
                        naming::snapshot_name(&qualified, naming::BASE_SNAPSHOT_SUFFIX),
                        true,
                    )
                } else if parsed.is_template() {
                    // A template that lost its marker; restore it and
                    // clone from there so the link holds.
                    self.client
                        .create_snapshot(&qualified, naming::BASE_SNAPSHOT_SUFFIX)
                        .await?;
                    (
                        naming::snapshot_name(&qualified, naming::BASE_SNAPSHOT_SUFFIX),
                        true,
                    )
                } else {
                    (qualified.clone(), false)
                }
            }
        };

        let index = self.find_free_diskname(vmid).await?;
        let target_volname = format!("vm-{vmid}-disk-{index}");
        let target = self.qualify(&naming::array_disk_name(
            &self.config.storage,
            vmid,
            index,
        ));

        self.client.clone_volume(&source, &target).await?;
        info!("Cloned {source} -> {target}");

        if let Err(e) = self.connect_cluster_hosts(&target).await {
            self.rollback_created_volume(&target).await;
            return Err(e);
        }

        if linked {
            // The slash-joined form is how the host layer learns the
            // parent relationship.
            Ok(format!("{volname}/{target_volname}"))
        } else {
            Ok(target_volname)
        }
    }
}

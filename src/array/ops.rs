//! Resource operations against the array
//!
//! One public entry per operation; each branches internally on the
//! negotiated dialect. The divergences hidden here: v2 addresses objects
//! through query parameters (`names`, `host_names`, `volume_names`,
//! `source_names`) where v1 uses path segments; v2 wraps collections in
//! `{items: []}` where v1 returns bare arrays; v2 sizes are `provisioned`
//! where v1 says `size`; v2 soft-deletes with PATCH where v1 uses PUT; and
//! v2 `PATCH /hosts` replaces the whole initiator list, so add/remove is
//! read-modify-write.

use crate::array::client::ArrayClient;
use crate::array::types::{
    normalize_wwn_str, ArrayInfo, ArrayPort, ArraySnapshot, ArraySpace, ArrayVolume,
    ConnectionRecord, HostGroupRecord, HostRecord, PodInfo,
};
use crate::config::SanProtocolKind;
use crate::error::{Error, Result};
use crate::naming;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::debug;

// =============================================================================
// Envelope Helpers
// =============================================================================

/// Normalize a response into its item list: v2 `{items: [...]}`, v1 bare
/// arrays, and v1 single-object responses.
fn items(v2: bool, value: Value) -> Vec<Value> {
    if v2 {
        match value.get("items").and_then(Value::as_array) {
            Some(arr) => arr.clone(),
            None => Vec::new(),
        }
    } else {
        match value {
            Value::Array(arr) => arr,
            Value::Null => Vec::new(),
            other => vec![other],
        }
    }
}

fn first_item(v2: bool, value: Value) -> Result<Value> {
    items(v2, value)
        .into_iter()
        .next()
        .ok_or_else(|| Error::ApiResponse("expected at least one item".into()))
}

/// Translate "does not exist" into `None`; propagate everything else.
fn optional<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Minimal `*` glob used for name filtering. The array-side filter is a
/// best-effort narrowing; this is the authoritative match.
pub(crate) fn glob_match(pattern: &str, name: &str) -> bool {
    fn inner(p: &[u8], n: &[u8]) -> bool {
        match (p.first(), n.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                inner(&p[1..], n) || (!n.is_empty() && inner(p, &n[1..]))
            }
            (Some(pc), Some(nc)) if pc == nc => inner(&p[1..], &n[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), name.as_bytes())
}

impl ArrayClient {
    // =========================================================================
    // Array / Pod
    // =========================================================================

    pub async fn array_info(&self) -> Result<ArrayInfo> {
        if self.is_v2() {
            let resp = self.request(Method::GET, "/arrays", &[], None, true).await?;
            ArrayInfo::from_v2(&first_item(true, resp)?)
        } else {
            let resp = self.request(Method::GET, "/array", &[], None, true).await?;
            ArrayInfo::from_v1(&first_item(false, resp)?)
        }
    }

    pub async fn array_space(&self) -> Result<ArraySpace> {
        if self.is_v2() {
            let resp = self
                .request(Method::GET, "/arrays/space", &[], None, true)
                .await?;
            ArraySpace::from_v2(&first_item(true, resp)?)
        } else {
            let resp = self
                .request(
                    Method::GET,
                    "/array",
                    &[("space", "true".into())],
                    None,
                    true,
                )
                .await?;
            ArraySpace::from_v1(&first_item(false, resp)?)
        }
    }

    pub async fn pod_info(&self, pod: &str) -> Result<Option<PodInfo>> {
        optional(self.pod_info_raw(pod).await)
    }

    async fn pod_info_raw(&self, pod: &str) -> Result<PodInfo> {
        if self.is_v2() {
            let resp = self
                .request(
                    Method::GET,
                    "/pods",
                    &[("names", pod.to_string())],
                    None,
                    true,
                )
                .await?;
            PodInfo::from_v2(&first_item(true, resp)?)
        } else {
            let resp = self
                .request(Method::GET, &format!("/pod/{pod}"), &[], None, true)
                .await?;
            PodInfo::from_v1(&first_item(false, resp)?)
        }
    }

    // =========================================================================
    // Volumes
    // =========================================================================

    pub async fn create_volume(&self, name: &str, size: u64) -> Result<ArrayVolume> {
        debug!("Creating volume {name} ({size} bytes)");
        if self.is_v2() {
            let resp = self
                .request(
                    Method::POST,
                    "/volumes",
                    &[("names", name.to_string())],
                    Some(json!({ "provisioned": size })),
                    false,
                )
                .await?;
            ArrayVolume::from_v2(&first_item(true, resp)?)
        } else {
            let resp = self
                .request(
                    Method::POST,
                    &format!("/volume/{name}"),
                    &[],
                    Some(json!({ "size": size })),
                    false,
                )
                .await?;
            ArrayVolume::from_v1(&first_item(false, resp)?)
        }
    }

    /// Fetch a volume whether live or in the destroyed (recoverable)
    /// phase; `None` only when the name is entirely absent.
    pub async fn get_volume(&self, name: &str) -> Result<Option<ArrayVolume>> {
        if let Some(vol) = optional(self.get_volume_phase(name, false).await)? {
            return Ok(Some(vol));
        }
        optional(self.get_volume_phase(name, true).await)
    }

    async fn get_volume_phase(&self, name: &str, destroyed: bool) -> Result<ArrayVolume> {
        if self.is_v2() {
            let mut query = vec![("names", name.to_string())];
            if destroyed {
                query.push(("destroyed", "true".into()));
            }
            let resp = self
                .request(Method::GET, "/volumes", &query, None, true)
                .await?;
            ArrayVolume::from_v2(&first_item(true, resp)?)
        } else {
            let mut query = Vec::new();
            if destroyed {
                query.push(("pending_only", "true".into()));
            }
            let resp = self
                .request(Method::GET, &format!("/volume/{name}"), &query, None, true)
                .await?;
            ArrayVolume::from_v1(&first_item(false, resp)?)
        }
    }

    /// List live volumes whose (pod-qualified) name matches `glob`.
    pub async fn list_volumes(&self, glob: &str) -> Result<Vec<ArrayVolume>> {
        self.list_volumes_phase(glob, false).await
    }

    /// List destroyed-but-recoverable volumes matching `glob`.
    pub async fn list_destroyed_volumes(&self, glob: &str) -> Result<Vec<ArrayVolume>> {
        self.list_volumes_phase(glob, true).await
    }

    async fn list_volumes_phase(&self, glob: &str, destroyed: bool) -> Result<Vec<ArrayVolume>> {
        let raw = if self.is_v2() {
            let mut query = vec![("filter", format!("name='{glob}'"))];
            if destroyed {
                query.push(("destroyed", "true".into()));
            }
            let resp = self
                .request(Method::GET, "/volumes", &query, None, true)
                .await?;
            items(true, resp)
                .iter()
                .map(ArrayVolume::from_v2)
                .collect::<Result<Vec<_>>>()?
        } else {
            let mut query = vec![("space", "true".into())];
            if destroyed {
                query.push(("pending_only", "true".into()));
            }
            let resp = self
                .request(Method::GET, "/volume", &query, None, true)
                .await?;
            items(false, resp)
                .iter()
                .map(ArrayVolume::from_v1)
                .collect::<Result<Vec<_>>>()?
        };
        Ok(raw
            .into_iter()
            .filter(|v| glob_match(glob, &v.qualified_name()))
            .collect())
    }

    pub async fn resize_volume(&self, name: &str, size: u64) -> Result<ArrayVolume> {
        if self.is_v2() {
            let resp = self
                .request(
                    Method::PATCH,
                    "/volumes",
                    &[("names", name.to_string())],
                    Some(json!({ "provisioned": size })),
                    true,
                )
                .await?;
            ArrayVolume::from_v2(&first_item(true, resp)?)
        } else {
            let resp = self
                .request(
                    Method::PUT,
                    &format!("/volume/{name}"),
                    &[],
                    Some(json!({ "size": size })),
                    true,
                )
                .await?;
            ArrayVolume::from_v1(&first_item(false, resp)?)
        }
    }

    pub async fn rename_volume(&self, name: &str, new_name: &str) -> Result<()> {
        if self.is_v2() {
            self.request(
                Method::PATCH,
                "/volumes",
                &[("names", name.to_string())],
                Some(json!({ "name": new_name })),
                true,
            )
            .await?;
        } else {
            self.request(
                Method::PUT,
                &format!("/volume/{name}"),
                &[],
                Some(json!({ "name": new_name })),
                true,
            )
            .await?;
        }
        Ok(())
    }

    /// Instant clone from a volume or snapshot source.
    pub async fn clone_volume(&self, source: &str, dest: &str) -> Result<ArrayVolume> {
        debug!("Cloning {source} -> {dest}");
        if self.is_v2() {
            let resp = self
                .request(
                    Method::POST,
                    "/volumes",
                    &[("names", dest.to_string())],
                    Some(json!({ "source": { "name": source } })),
                    false,
                )
                .await?;
            ArrayVolume::from_v2(&first_item(true, resp)?)
        } else {
            let resp = self
                .request(
                    Method::POST,
                    &format!("/volume/{dest}"),
                    &[],
                    Some(json!({ "source": source })),
                    false,
                )
                .await?;
            ArrayVolume::from_v1(&first_item(false, resp)?)
        }
    }

    /// Overwrite an existing volume in place from a snapshot (rollback).
    pub async fn overwrite_volume(&self, dest: &str, source: &str) -> Result<()> {
        debug!("Overwriting {dest} from {source}");
        if self.is_v2() {
            self.request(
                Method::PATCH,
                "/volumes",
                &[
                    ("names", dest.to_string()),
                    ("overwrite", "true".into()),
                ],
                Some(json!({ "source": { "name": source } })),
                true,
            )
            .await?;
        } else {
            self.request(
                Method::POST,
                &format!("/volume/{dest}"),
                &[],
                Some(json!({ "source": source, "overwrite": true })),
                // Replaying an overwrite lands in the same state.
                true,
            )
            .await?;
        }
        Ok(())
    }

    /// First deletion phase: flag destroyed, recoverable until eradicated.
    pub async fn destroy_volume(&self, name: &str) -> Result<()> {
        if self.is_v2() {
            self.request(
                Method::PATCH,
                "/volumes",
                &[("names", name.to_string())],
                Some(json!({ "destroyed": true })),
                true,
            )
            .await?;
        } else {
            self.request(
                Method::PUT,
                &format!("/volume/{name}"),
                &[],
                Some(json!({ "destroyed": true })),
                true,
            )
            .await?;
        }
        Ok(())
    }

    /// Second deletion phase: irreversible.
    pub async fn eradicate_volume(&self, name: &str) -> Result<()> {
        if self.is_v2() {
            self.request(
                Method::DELETE,
                "/volumes",
                &[("names", name.to_string())],
                None,
                true,
            )
            .await?;
        } else {
            self.request(Method::DELETE, &format!("/volume/{name}"), &[], None, true)
                .await?;
        }
        Ok(())
    }

    /// Undo the destroyed flag within the eradication-delay window.
    pub async fn recover_volume(&self, name: &str) -> Result<()> {
        if self.is_v2() {
            self.request(
                Method::PATCH,
                "/volumes",
                &[("names", name.to_string()), ("destroyed", "true".into())],
                Some(json!({ "destroyed": false })),
                true,
            )
            .await?;
        } else {
            self.request(
                Method::PUT,
                &format!("/volume/{name}"),
                &[],
                Some(json!({ "destroyed": false })),
                true,
            )
            .await?;
        }
        Ok(())
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    pub async fn create_snapshot(&self, volume: &str, suffix: &str) -> Result<ArraySnapshot> {
        debug!("Creating snapshot {volume}.{suffix}");
        if self.is_v2() {
            let resp = self
                .request(
                    Method::POST,
                    "/volume-snapshots",
                    &[("source_names", volume.to_string())],
                    Some(json!({ "suffix": suffix })),
                    false,
                )
                .await?;
            ArraySnapshot::from_v2(&first_item(true, resp)?)
        } else {
            let resp = self
                .request(
                    Method::POST,
                    "/volume",
                    &[],
                    Some(json!({ "snap": true, "source": [volume], "suffix": suffix })),
                    false,
                )
                .await?;
            ArraySnapshot::from_v1(&first_item(false, resp)?)
        }
    }

    pub async fn get_snapshot(
        &self,
        volume: &str,
        suffix: &str,
    ) -> Result<Option<ArraySnapshot>> {
        optional(self.get_snapshot_raw(volume, suffix).await)
    }

    async fn get_snapshot_raw(&self, volume: &str, suffix: &str) -> Result<ArraySnapshot> {
        let name = naming::snapshot_name(volume, suffix);
        if self.is_v2() {
            let resp = self
                .request(
                    Method::GET,
                    "/volume-snapshots",
                    &[("names", name.clone())],
                    None,
                    true,
                )
                .await?;
            ArraySnapshot::from_v2(&first_item(true, resp)?)
        } else {
            let resp = self
                .request(
                    Method::GET,
                    &format!("/volume/{name}"),
                    &[("snap", "true".into())],
                    None,
                    true,
                )
                .await?;
            ArraySnapshot::from_v1(&first_item(false, resp)?)
        }
    }

    /// List snapshots whose full (pod-qualified) name matches `glob`.
    pub async fn list_snapshots(&self, glob: &str) -> Result<Vec<ArraySnapshot>> {
        let raw = if self.is_v2() {
            let resp = self
                .request(
                    Method::GET,
                    "/volume-snapshots",
                    &[("filter", format!("name='{glob}'"))],
                    None,
                    true,
                )
                .await?;
            items(true, resp)
                .iter()
                .map(ArraySnapshot::from_v2)
                .collect::<Result<Vec<_>>>()?
        } else {
            let resp = self
                .request(
                    Method::GET,
                    "/volume",
                    &[("snap", "true".into())],
                    None,
                    true,
                )
                .await?;
            items(false, resp)
                .iter()
                .map(ArraySnapshot::from_v1)
                .collect::<Result<Vec<_>>>()?
        };
        Ok(raw
            .into_iter()
            .filter(|s| glob_match(glob, &s.name))
            .collect())
    }

    pub async fn destroy_snapshot(&self, name: &str) -> Result<()> {
        if self.is_v2() {
            self.request(
                Method::PATCH,
                "/volume-snapshots",
                &[("names", name.to_string())],
                Some(json!({ "destroyed": true })),
                true,
            )
            .await?;
        } else {
            self.request(
                Method::PUT,
                &format!("/volume/{name}"),
                &[],
                Some(json!({ "destroyed": true })),
                true,
            )
            .await?;
        }
        Ok(())
    }

    pub async fn eradicate_snapshot(&self, name: &str) -> Result<()> {
        if self.is_v2() {
            self.request(
                Method::DELETE,
                "/volume-snapshots",
                &[("names", name.to_string())],
                None,
                true,
            )
            .await?;
        } else {
            self.request(Method::DELETE, &format!("/volume/{name}"), &[], None, true)
                .await?;
        }
        Ok(())
    }

    // =========================================================================
    // Hosts
    // =========================================================================

    pub async fn create_host(&self, name: &str) -> Result<HostRecord> {
        if self.is_v2() {
            let resp = self
                .request(
                    Method::POST,
                    "/hosts",
                    &[("names", name.to_string())],
                    Some(json!({})),
                    false,
                )
                .await?;
            HostRecord::from_v2(&first_item(true, resp)?)
        } else {
            let resp = self
                .request(Method::POST, &format!("/host/{name}"), &[], Some(json!({})), false)
                .await?;
            HostRecord::from_v1(&first_item(false, resp)?)
        }
    }

    pub async fn get_host(&self, name: &str) -> Result<Option<HostRecord>> {
        optional(self.get_host_raw(name).await)
    }

    async fn get_host_raw(&self, name: &str) -> Result<HostRecord> {
        if self.is_v2() {
            let resp = self
                .request(
                    Method::GET,
                    "/hosts",
                    &[("names", name.to_string())],
                    None,
                    true,
                )
                .await?;
            HostRecord::from_v2(&first_item(true, resp)?)
        } else {
            let resp = self
                .request(Method::GET, &format!("/host/{name}"), &[], None, true)
                .await?;
            HostRecord::from_v1(&first_item(false, resp)?)
        }
    }

    pub async fn list_hosts(&self, glob: &str) -> Result<Vec<HostRecord>> {
        let raw = if self.is_v2() {
            let resp = self
                .request(
                    Method::GET,
                    "/hosts",
                    &[("filter", format!("name='{glob}'"))],
                    None,
                    true,
                )
                .await?;
            items(true, resp)
                .iter()
                .map(HostRecord::from_v2)
                .collect::<Result<Vec<_>>>()?
        } else {
            let resp = self.request(Method::GET, "/host", &[], None, true).await?;
            items(false, resp)
                .iter()
                .map(HostRecord::from_v1)
                .collect::<Result<Vec<_>>>()?
        };
        Ok(raw
            .into_iter()
            .filter(|h| glob_match(glob, &h.name))
            .collect())
    }

    /// Create the host, tolerating a concurrent peer creating it first.
    pub async fn get_or_create_host(&self, name: &str) -> Result<HostRecord> {
        if let Some(host) = self.get_host(name).await? {
            return Ok(host);
        }
        match self.create_host(name).await {
            Ok(host) => Ok(host),
            Err(e) if e.is_benign_conflict() => self
                .get_host(name)
                .await?
                .ok_or_else(|| Error::NotFound {
                    kind: "Host".into(),
                    name: name.into(),
                }),
            Err(e) => Err(e),
        }
    }

    pub async fn host_add_initiator(
        &self,
        host: &str,
        kind: SanProtocolKind,
        initiator: &str,
    ) -> Result<()> {
        debug!("Adding {kind} initiator {initiator} to host {host}");
        if self.is_v2() {
            // PATCH /hosts replaces the whole list; read-modify-write.
            let current = self.get_host(host).await?.ok_or_else(|| Error::NotFound {
                kind: "Host".into(),
                name: host.into(),
            })?;
            let body = match kind {
                SanProtocolKind::Iscsi => {
                    let mut iqns = current.iqns.clone();
                    iqns.insert(initiator.to_string());
                    json!({ "iqns": iqns })
                }
                SanProtocolKind::Fc => {
                    let mut wwns = current.wwns.clone();
                    wwns.insert(normalize_wwn_str(initiator));
                    json!({ "wwns": wwns })
                }
            };
            self.request(
                Method::PATCH,
                "/hosts",
                &[("names", host.to_string())],
                Some(body),
                true,
            )
            .await?;
        } else {
            let body = match kind {
                SanProtocolKind::Iscsi => json!({ "addiqnlist": [initiator] }),
                SanProtocolKind::Fc => json!({ "addwwnlist": [normalize_wwn_str(initiator)] }),
            };
            self.request(Method::PUT, &format!("/host/{host}"), &[], Some(body), true)
                .await?;
        }
        Ok(())
    }

    pub async fn host_remove_initiator(
        &self,
        host: &str,
        kind: SanProtocolKind,
        initiator: &str,
    ) -> Result<()> {
        if self.is_v2() {
            let current = self.get_host(host).await?.ok_or_else(|| Error::NotFound {
                kind: "Host".into(),
                name: host.into(),
            })?;
            let body = match kind {
                SanProtocolKind::Iscsi => {
                    let lowered = initiator.to_ascii_lowercase();
                    let iqns: Vec<&String> = current
                        .iqns
                        .iter()
                        .filter(|i| i.to_ascii_lowercase() != lowered)
                        .collect();
                    json!({ "iqns": iqns })
                }
                SanProtocolKind::Fc => {
                    let wwn = normalize_wwn_str(initiator);
                    let wwns: Vec<&String> =
                        current.wwns.iter().filter(|w| **w != wwn).collect();
                    json!({ "wwns": wwns })
                }
            };
            self.request(
                Method::PATCH,
                "/hosts",
                &[("names", host.to_string())],
                Some(body),
                true,
            )
            .await?;
        } else {
            let body = match kind {
                SanProtocolKind::Iscsi => json!({ "remiqnlist": [initiator] }),
                SanProtocolKind::Fc => json!({ "remwwnlist": [normalize_wwn_str(initiator)] }),
            };
            self.request(Method::PUT, &format!("/host/{host}"), &[], Some(body), true)
                .await?;
        }
        Ok(())
    }

    // =========================================================================
    // Host Groups
    // =========================================================================

    pub async fn get_host_group(&self, name: &str) -> Result<Option<HostGroupRecord>> {
        optional(self.get_host_group_raw(name).await)
    }

    async fn get_host_group_raw(&self, name: &str) -> Result<HostGroupRecord> {
        if self.is_v2() {
            let resp = self
                .request(
                    Method::GET,
                    "/host-groups",
                    &[("names", name.to_string())],
                    None,
                    true,
                )
                .await?;
            HostGroupRecord::from_v2(&first_item(true, resp)?)
        } else {
            let resp = self
                .request(Method::GET, &format!("/hgroup/{name}"), &[], None, true)
                .await?;
            HostGroupRecord::from_v1(&first_item(false, resp)?)
        }
    }

    pub async fn list_host_groups(&self) -> Result<Vec<HostGroupRecord>> {
        if self.is_v2() {
            let resp = self
                .request(Method::GET, "/host-groups", &[], None, true)
                .await?;
            items(true, resp)
                .iter()
                .map(HostGroupRecord::from_v2)
                .collect()
        } else {
            let resp = self.request(Method::GET, "/hgroup", &[], None, true).await?;
            items(false, resp)
                .iter()
                .map(HostGroupRecord::from_v1)
                .collect()
        }
    }

    // =========================================================================
    // Connections
    // =========================================================================

    pub async fn connect_volume(&self, host: &str, volume: &str) -> Result<()> {
        debug!("Connecting {volume} to host {host}");
        if self.is_v2() {
            self.request(
                Method::POST,
                "/connections",
                &[
                    ("host_names", host.to_string()),
                    ("volume_names", volume.to_string()),
                ],
                None,
                true,
            )
            .await?;
        } else {
            self.request(
                Method::POST,
                &format!("/host/{host}/volume/{volume}"),
                &[],
                None,
                true,
            )
            .await?;
        }
        Ok(())
    }

    pub async fn disconnect_volume(&self, host: &str, volume: &str) -> Result<()> {
        debug!("Disconnecting {volume} from host {host}");
        if self.is_v2() {
            self.request(
                Method::DELETE,
                "/connections",
                &[
                    ("host_names", host.to_string()),
                    ("volume_names", volume.to_string()),
                ],
                None,
                true,
            )
            .await?;
        } else {
            self.request(
                Method::DELETE,
                &format!("/host/{host}/volume/{volume}"),
                &[],
                None,
                true,
            )
            .await?;
        }
        Ok(())
    }

    pub async fn list_volume_connections(&self, volume: &str) -> Result<Vec<ConnectionRecord>> {
        if self.is_v2() {
            let resp = self
                .request(
                    Method::GET,
                    "/connections",
                    &[("volume_names", volume.to_string())],
                    None,
                    true,
                )
                .await?;
            items(true, resp)
                .iter()
                .map(ConnectionRecord::from_v2)
                .collect()
        } else {
            let resp = self
                .request(
                    Method::GET,
                    &format!("/volume/{volume}/host"),
                    &[],
                    None,
                    true,
                )
                .await?;
            // v1 scopes this listing by volume; fill it in.
            items(false, resp)
                .iter()
                .map(|item| {
                    let mut conn = ConnectionRecord::from_v1(item)?;
                    if conn.volume.is_empty() {
                        conn.volume = volume.to_string();
                    }
                    Ok(conn)
                })
                .collect()
        }
    }

    pub async fn list_host_connections(&self, host: &str) -> Result<Vec<ConnectionRecord>> {
        if self.is_v2() {
            let resp = self
                .request(
                    Method::GET,
                    "/connections",
                    &[("host_names", host.to_string())],
                    None,
                    true,
                )
                .await?;
            items(true, resp)
                .iter()
                .map(ConnectionRecord::from_v2)
                .collect()
        } else {
            let resp = self
                .request(
                    Method::GET,
                    &format!("/host/{host}/volume"),
                    &[],
                    None,
                    true,
                )
                .await?;
            items(false, resp)
                .iter()
                .map(|item| {
                    let mut conn = ConnectionRecord::from_v1(item)?;
                    if conn.host.is_empty() {
                        conn.host = host.to_string();
                    }
                    Ok(conn)
                })
                .collect()
        }
    }

    // =========================================================================
    // Ports
    // =========================================================================

    /// Front-end target ports (iSCSI IQNs and FC WWNs).
    pub async fn list_ports(&self) -> Result<Vec<ArrayPort>> {
        if self.is_v2() {
            let resp = self.request(Method::GET, "/ports", &[], None, true).await?;
            items(true, resp).iter().map(ArrayPort::from_v2).collect()
        } else {
            let resp = self.request(Method::GET, "/port", &[], None, true).await?;
            items(false, resp).iter().map(ArrayPort::from_v1).collect()
        }
    }

    /// iSCSI portals (`ip:port`) to discover and log in to. v1 reports the
    /// portal on the port object; v2 moved it to the network interfaces.
    pub async fn list_iscsi_portals(&self) -> Result<Vec<String>> {
        if self.is_v2() {
            let resp = self
                .request(Method::GET, "/network-interfaces", &[], None, true)
                .await?;
            let portals = items(true, resp)
                .iter()
                .filter(|item| {
                    let iscsi = item
                        .get("services")
                        .and_then(Value::as_array)
                        .map(|s| s.iter().any(|v| v.as_str() == Some("iscsi")))
                        .unwrap_or(false);
                    let enabled = item
                        .get("enabled")
                        .and_then(Value::as_bool)
                        .unwrap_or(true);
                    iscsi && enabled
                })
                .filter_map(|item| {
                    item.get("eth")
                        .and_then(|e| e.get("address"))
                        .and_then(Value::as_str)
                        .map(|addr| format!("{addr}:3260"))
                })
                .collect();
            Ok(portals)
        } else {
            let ports = self.list_ports().await?;
            Ok(ports
                .into_iter()
                .filter(|p| p.iqn.is_some())
                .filter_map(|p| p.portal)
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_items_envelopes() {
        let v2 = json!({"items": [{"name": "a"}, {"name": "b"}]});
        assert_eq!(items(true, v2).len(), 2);

        let v1_list = json!([{"name": "a"}]);
        assert_eq!(items(false, v1_list).len(), 1);

        let v1_single = json!({"name": "a"});
        assert_eq!(items(false, v1_single).len(), 1);

        assert!(items(true, json!({})).is_empty());
        assert!(items(false, Value::Null).is_empty());
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("pve-pure1-100-*", "pve-pure1-100-disk0"));
        assert!(glob_match("*.pve-base", "pve-pure1-100-disk0.pve-base"));
        assert!(glob_match("pve-*-vmconf-*", "pve-pure1-100-vmconf-snap1"));
        assert!(!glob_match("pve-pure1-100-*", "pve-pure1-200-disk0"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exactly"));
        assert!(glob_match("*", "anything"));
    }

    #[test]
    fn test_glob_match_pod_qualified() {
        assert!(glob_match("metro::pve-pure1-*", "metro::pve-pure1-100-disk0"));
        assert!(!glob_match("metro::pve-pure1-*", "pve-pure1-100-disk0"));
    }

    #[test]
    fn test_optional_translates_not_found() {
        let nf: Result<u32> = Err(Error::ApiStatus {
            status: 400,
            message: "Volume does not exist.".into(),
        });
        assert_eq!(optional(nf).unwrap(), None);

        let err: Result<u32> = Err(Error::ApiStatus {
            status: 500,
            message: "boom".into(),
        });
        assert!(optional(err).is_err());

        assert_eq!(optional(Ok(7u32)).unwrap(), Some(7));
    }
}

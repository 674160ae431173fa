//! Typed records returned by the array client
//!
//! The REST API speaks two dialects (v1 and v2) with different field names
//! and envelope shapes. Both decode into the records here, so nothing above
//! the client ever sees dialect-specific JSON.

use crate::error::{Error, Result};
use crate::naming;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Value Helpers
// =============================================================================

fn str_field(v: &Value, key: &str) -> Result<String> {
    v.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::ApiResponse(format!("missing string field '{key}' in {v}")))
}

fn opt_str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(Value::as_str).map(str::to_string)
}

fn u64_field(v: &Value, key: &str) -> Result<u64> {
    v.get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| Error::ApiResponse(format!("missing integer field '{key}' in {v}")))
}

fn bool_field_or(v: &Value, key: &str, default: bool) -> bool {
    v.get(key).and_then(Value::as_bool).unwrap_or(default)
}

/// v1 timestamps are epoch seconds.
fn parse_created_v1(v: &Value) -> Option<DateTime<Utc>> {
    v.get("created")
        .and_then(Value::as_i64)
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}

/// v2 timestamps are ISO 8601; offset-less forms are taken as UTC.
fn parse_created_v2(v: &Value) -> Option<DateTime<Utc>> {
    let raw = v.get("created")?;
    if let Some(s) = raw.as_str() {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
            return Some(Utc.from_utc_datetime(&naive));
        }
        return None;
    }
    // Some 2.x releases report epoch milliseconds instead.
    raw.as_i64()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

// =============================================================================
// Array / Pod
// =============================================================================

/// Identity of the array itself
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrayInfo {
    pub name: String,
    pub id: Option<String>,
    pub version: String,
}

impl ArrayInfo {
    pub fn from_v2(item: &Value) -> Result<Self> {
        Ok(Self {
            name: str_field(item, "name")?,
            id: opt_str_field(item, "id"),
            version: str_field(item, "version")?,
        })
    }

    pub fn from_v1(item: &Value) -> Result<Self> {
        Ok(Self {
            name: str_field(item, "array_name")?,
            id: opt_str_field(item, "id"),
            version: str_field(item, "version")?,
        })
    }
}

/// Physical capacity of the array
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ArraySpace {
    pub total: u64,
    pub used: u64,
}

impl ArraySpace {
    pub fn available(&self) -> u64 {
        self.total.saturating_sub(self.used)
    }

    pub fn from_v2(item: &Value) -> Result<Self> {
        let used = item
            .get("space")
            .and_then(|s| s.get("total_physical"))
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::ApiResponse(format!("missing space.total_physical in {item}")))?;
        Ok(Self {
            total: u64_field(item, "capacity")?,
            used,
        })
    }

    pub fn from_v1(item: &Value) -> Result<Self> {
        Ok(Self {
            total: u64_field(item, "capacity")?,
            used: u64_field(item, "total")?,
        })
    }
}

/// An ActiveCluster pod; quota is only reported by v2
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodInfo {
    pub name: String,
    pub quota_limit: Option<u64>,
    pub used: Option<u64>,
}

impl PodInfo {
    pub fn from_v2(item: &Value) -> Result<Self> {
        Ok(Self {
            name: str_field(item, "name")?,
            quota_limit: item.get("quota_limit").and_then(Value::as_u64),
            used: item
                .get("footprint")
                .or_else(|| item.get("space").and_then(|s| s.get("total_physical")))
                .and_then(Value::as_u64),
        })
    }

    pub fn from_v1(item: &Value) -> Result<Self> {
        Ok(Self {
            name: str_field(item, "name")?,
            quota_limit: None,
            used: None,
        })
    }
}

// =============================================================================
// Volumes / Snapshots
// =============================================================================

/// A logical volume on the array
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrayVolume {
    /// Name without pod qualifier
    pub name: String,
    /// Pod the volume lives in, if any
    pub pod: Option<String>,
    /// 24-char serial, lowercased
    pub serial: String,
    /// Provisioned size in bytes
    pub provisioned: u64,
    /// Physically used bytes, when the dialect reports them
    pub used: Option<u64>,
    /// First deletion phase reached
    pub destroyed: bool,
    pub created: Option<DateTime<Utc>>,
}

impl ArrayVolume {
    /// Device WWID backing this volume
    pub fn wwid(&self) -> String {
        naming::serial_to_wwid(&self.serial)
    }

    /// Name with the pod qualifier reattached
    pub fn qualified_name(&self) -> String {
        naming::pod_qualify(self.pod.as_deref(), &self.name)
    }

    pub fn from_v2(item: &Value) -> Result<Self> {
        let full = str_field(item, "name")?;
        let (pod, name) = naming::split_pod(&full);
        Ok(Self {
            name: name.to_string(),
            pod: pod.map(str::to_string),
            serial: str_field(item, "serial")?.to_ascii_lowercase(),
            provisioned: u64_field(item, "provisioned")?,
            used: item
                .get("space")
                .and_then(|s| s.get("total_physical"))
                .and_then(Value::as_u64),
            destroyed: bool_field_or(item, "destroyed", false),
            created: parse_created_v2(item),
        })
    }

    pub fn from_v1(item: &Value) -> Result<Self> {
        let full = str_field(item, "name")?;
        let (pod, name) = naming::split_pod(&full);
        Ok(Self {
            name: name.to_string(),
            pod: pod.map(str::to_string),
            serial: str_field(item, "serial")?.to_ascii_lowercase(),
            provisioned: u64_field(item, "size")?,
            used: item.get("total").and_then(Value::as_u64),
            destroyed: bool_field_or(item, "destroyed", false),
            created: parse_created_v1(item),
        })
    }
}

/// A snapshot of an array volume, `{source}.{suffix}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArraySnapshot {
    /// Full snapshot name including the source volume
    pub name: String,
    /// Volume the snapshot was taken from
    pub source: String,
    /// Suffix after the `.` (`pve-snap-{name}` or `pve-base`)
    pub suffix: String,
    pub destroyed: bool,
    pub created: Option<DateTime<Utc>>,
}

impl ArraySnapshot {
    fn split(full: &str) -> Result<(String, String)> {
        full.rsplit_once('.')
            .map(|(src, sfx)| (src.to_string(), sfx.to_string()))
            .ok_or_else(|| Error::ApiResponse(format!("snapshot name without suffix: {full}")))
    }

    pub fn from_v2(item: &Value) -> Result<Self> {
        let name = str_field(item, "name")?;
        let (source, suffix) = Self::split(&name)?;
        Ok(Self {
            name,
            source,
            suffix,
            destroyed: bool_field_or(item, "destroyed", false),
            created: parse_created_v2(item),
        })
    }

    pub fn from_v1(item: &Value) -> Result<Self> {
        let name = str_field(item, "name")?;
        let (source, suffix) = Self::split(&name)?;
        Ok(Self {
            name,
            source,
            suffix,
            destroyed: bool_field_or(item, "destroyed", false),
            created: parse_created_v1(item),
        })
    }

    /// Whether this is the template marker snapshot
    pub fn is_base(&self) -> bool {
        self.suffix == naming::BASE_SNAPSHOT_SUFFIX
    }
}

// =============================================================================
// Hosts / Connections
// =============================================================================

/// An array Host object: a named, ordered set of initiators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostRecord {
    pub name: String,
    pub iqns: IndexSet<String>,
    /// Raw lowercase WWNs, 16 hex chars, no separators
    pub wwns: IndexSet<String>,
}

impl HostRecord {
    fn collect_initiators(item: &Value, key: &str, normalize_wwn: bool) -> IndexSet<String> {
        item.get(key)
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(|s| {
                        if normalize_wwn {
                            normalize_wwn_str(s)
                        } else {
                            s.to_string()
                        }
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn from_v2(item: &Value) -> Result<Self> {
        Ok(Self {
            name: str_field(item, "name")?,
            iqns: Self::collect_initiators(item, "iqns", false),
            wwns: Self::collect_initiators(item, "wwns", true),
        })
    }

    pub fn from_v1(item: &Value) -> Result<Self> {
        Ok(Self {
            name: str_field(item, "name")?,
            iqns: Self::collect_initiators(item, "iqn", false),
            wwns: Self::collect_initiators(item, "wwn", true),
        })
    }

    /// Case-insensitive membership check with WWN normalization
    pub fn has_initiator(&self, initiator: &str) -> bool {
        let lowered = initiator.to_ascii_lowercase();
        let wwn = normalize_wwn_str(initiator);
        self.iqns.iter().any(|i| i.to_ascii_lowercase() == lowered)
            || self.wwns.iter().any(|w| *w == wwn)
    }
}

/// Basic host group record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostGroupRecord {
    pub name: String,
    pub hosts: Vec<String>,
}

impl HostGroupRecord {
    pub fn from_v2(item: &Value) -> Result<Self> {
        let hosts = item
            .get("hosts")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|h| h.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self {
            name: str_field(item, "name")?,
            hosts,
        })
    }

    pub fn from_v1(item: &Value) -> Result<Self> {
        let hosts = item
            .get("hosts")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self {
            name: str_field(item, "name")?,
            hosts,
        })
    }
}

/// A (host, volume) connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub host: String,
    pub volume: String,
    pub lun: Option<u32>,
}

impl ConnectionRecord {
    pub fn from_v2(item: &Value) -> Result<Self> {
        let host = item
            .get("host")
            .and_then(|h| h.get("name"))
            .and_then(Value::as_str)
            .ok_or_else(|| Error::ApiResponse(format!("missing host.name in {item}")))?;
        let volume = item
            .get("volume")
            .and_then(|v| v.get("name"))
            .and_then(Value::as_str)
            .ok_or_else(|| Error::ApiResponse(format!("missing volume.name in {item}")))?;
        Ok(Self {
            host: host.to_string(),
            volume: volume.to_string(),
            lun: item.get("lun").and_then(Value::as_u64).map(|l| l as u32),
        })
    }

    pub fn from_v1(item: &Value) -> Result<Self> {
        // v1 connection listings carry the volume under "vol" (host scope)
        // or "name" (volume scope).
        let volume = opt_str_field(item, "vol")
            .or_else(|| opt_str_field(item, "name"))
            .ok_or_else(|| Error::ApiResponse(format!("missing volume name in {item}")))?;
        Ok(Self {
            host: str_field(item, "host")?,
            volume,
            lun: item.get("lun").and_then(Value::as_u64).map(|l| l as u32),
        })
    }
}

// =============================================================================
// Ports
// =============================================================================

/// A front-end array port (iSCSI target or FC target)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrayPort {
    pub name: String,
    pub iqn: Option<String>,
    pub wwn: Option<String>,
    /// `ip:port` portal for iSCSI ports
    pub portal: Option<String>,
}

impl ArrayPort {
    pub fn from_v2(item: &Value) -> Result<Self> {
        Ok(Self {
            name: str_field(item, "name")?,
            iqn: opt_str_field(item, "iqn"),
            wwn: opt_str_field(item, "wwn").map(|w| normalize_wwn_str(&w)),
            portal: opt_str_field(item, "portal"),
        })
    }

    pub fn from_v1(item: &Value) -> Result<Self> {
        Ok(Self {
            name: str_field(item, "name")?,
            iqn: opt_str_field(item, "iqn"),
            wwn: opt_str_field(item, "wwn").map(|w| normalize_wwn_str(&w)),
            portal: opt_str_field(item, "portal"),
        })
    }
}

/// Normalize a WWN to the array's canonical form: raw lowercase hex,
/// no `:` separators, no `0x` prefix.
pub fn normalize_wwn_str(wwn: &str) -> String {
    wwn.trim_start_matches("0x")
        .chars()
        .filter(|c| *c != ':')
        .collect::<String>()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_volume_from_v2() {
        let item = json!({
            "name": "pve-pure1-100-disk0",
            "serial": "F4DE639B29D64F2C000113EA",
            "provisioned": 10737418240u64,
            "destroyed": false,
            "created": "2024-05-01T12:30:00Z",
            "space": { "total_physical": 1048576 },
        });
        let vol = ArrayVolume::from_v2(&item).unwrap();
        assert_eq!(vol.name, "pve-pure1-100-disk0");
        assert_eq!(vol.serial, "f4de639b29d64f2c000113ea");
        assert_eq!(vol.provisioned, 10737418240);
        assert_eq!(vol.used, Some(1048576));
        assert!(!vol.destroyed);
        assert_eq!(vol.wwid(), "3624a9370f4de639b29d64f2c000113ea");
        assert_eq!(vol.created.unwrap().timestamp(), 1714566600);
    }

    #[test]
    fn test_volume_from_v2_offsetless_created_is_utc() {
        let item = json!({
            "name": "pve-pure1-100-disk0",
            "serial": "AA",
            "provisioned": 1u64,
            "created": "2024-05-01T12:30:00",
        });
        let vol = ArrayVolume::from_v2(&item).unwrap();
        assert_eq!(vol.created.unwrap().timestamp(), 1714566600);
    }

    #[test]
    fn test_volume_from_v1() {
        let item = json!({
            "name": "metro::pve-pure1-100-disk0",
            "serial": "ab12",
            "size": 4096u64,
            "created": 1714566600i64,
        });
        let vol = ArrayVolume::from_v1(&item).unwrap();
        assert_eq!(vol.pod.as_deref(), Some("metro"));
        assert_eq!(vol.name, "pve-pure1-100-disk0");
        assert_eq!(vol.provisioned, 4096);
        assert_eq!(vol.created.unwrap().timestamp(), 1714566600);
    }

    #[test]
    fn test_snapshot_split() {
        let item = json!({
            "name": "pve-pure1-100-disk0.pve-snap-daily",
            "created": "2024-05-01T00:00:00Z",
        });
        let snap = ArraySnapshot::from_v2(&item).unwrap();
        assert_eq!(snap.source, "pve-pure1-100-disk0");
        assert_eq!(snap.suffix, "pve-snap-daily");
        assert!(!snap.is_base());

        let base = ArraySnapshot::from_v1(&json!({
            "name": "pve-pure1-100-disk0.pve-base",
            "created": 0i64,
        }))
        .unwrap();
        assert!(base.is_base());
    }

    #[test]
    fn test_host_initiators() {
        let host = HostRecord::from_v2(&json!({
            "name": "pve-pve-node1",
            "iqns": ["iqn.1993-08.org.debian:01:abcdef"],
            "wwns": ["52:4A:93:7A:F3:11:22:01"],
        }))
        .unwrap();
        assert!(host.has_initiator("IQN.1993-08.org.debian:01:ABCDEF"));
        assert!(host.has_initiator("524a937af3112201"));
        assert!(host.has_initiator("52:4a:93:7a:f3:11:22:01"));
        assert!(!host.has_initiator("iqn.other"));
    }

    #[test]
    fn test_connection_both_dialects() {
        let v2 = ConnectionRecord::from_v2(&json!({
            "host": {"name": "pve-pve-node1"},
            "volume": {"name": "pve-pure1-100-disk0"},
            "lun": 3,
        }))
        .unwrap();
        assert_eq!(v2.host, "pve-pve-node1");
        assert_eq!(v2.lun, Some(3));

        let v1 = ConnectionRecord::from_v1(&json!({
            "host": "pve-pve-node1",
            "vol": "pve-pure1-100-disk0",
            "lun": 3,
        }))
        .unwrap();
        assert_eq!(v1.volume, "pve-pure1-100-disk0");
    }

    #[test]
    fn test_normalize_wwn() {
        assert_eq!(normalize_wwn_str("0x524A937AF3112201"), "524a937af3112201");
        assert_eq!(normalize_wwn_str("52:4a:93:7a:f3:11:22:01"), "524a937af3112201");
    }

    #[test]
    fn test_space_dialects() {
        let v2 = ArraySpace::from_v2(&json!({
            "capacity": 1000u64,
            "space": {"total_physical": 400u64},
        }))
        .unwrap();
        assert_eq!(v2.available(), 600);

        let v1 = ArraySpace::from_v1(&json!({"capacity": 1000u64, "total": 400u64})).unwrap();
        assert_eq!(v1.used, 400);
    }
}

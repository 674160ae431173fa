//! Name codec between host-side volume identifiers and array object names
//!
//! Pure functions, no I/O. The array side uses `pve-{storage}-{vmid}-{role}`
//! names in which the storage field has hyphens folded to underscores, so
//! the hyphen stays a reliable field separator. Host-side names follow the
//! platform's `vm-{vmid}-disk-{n}` family. The mapping is bidirectional but
//! lossy on sanitized fields.

use crate::error::{Error, Result};
use regex::Regex;
use std::sync::LazyLock;

// =============================================================================
// Constants
// =============================================================================

/// NAA prefix shared by every volume on this array family; a volume's WWID
/// is this prefix followed by its 24-char serial.
pub const WWID_PREFIX: &str = "3624a9370";

/// Snapshot suffix marking a template volume
pub const BASE_SNAPSHOT_SUFFIX: &str = "pve-base";

/// Prefix of user snapshot suffixes
pub const SNAPSHOT_SUFFIX_PREFIX: &str = "pve-snap-";

/// Maximum array object name length
pub const MAX_ARRAY_NAME_LEN: usize = 63;

/// Maximum length of a snapshot suffix
pub const MAX_SNAPSHOT_SUFFIX_LEN: usize = 64;

/// Maximum length of the sanitized storage field
pub const MAX_STORAGE_FIELD_LEN: usize = 24;

/// Disk indices are scanned 0..=MAX_DISK_INDEX when allocating
pub const MAX_DISK_INDEX: u32 = 999;

/// Name fragment marking a short-lived snapshot-access clone
pub const TEMP_CLONE_INFIX: &str = "-temp-snap-access-";

// =============================================================================
// Regexes
// =============================================================================

static ARRAY_VOLUME_RE: LazyLock<Regex> = LazyLock::new(|| {
    // Non-greedy storage match tolerates legacy hyphenated storage names;
    // the VMID anchor (pure digits before the role) disambiguates.
    Regex::new(
        r"^pve-([A-Za-z0-9_-]+?)-(\d+)-(?:disk(\d+)|(cloudinit)|state-([A-Za-z0-9-]+)|vmconf-([A-Za-z0-9-]+))$",
    )
    .unwrap()
});

static VALID_ARRAY_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,62}$").unwrap());

static VM_DISK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(vm|base)-(\d+)-disk-(\d+)$").unwrap());

static VM_CLOUDINIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^vm-(\d+)-cloudinit$").unwrap());

static VM_STATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^vm-(\d+)-state-([A-Za-z0-9_-]+)$").unwrap());

static LINKED_CLONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(base-(\d+)-disk-\d+)/(vm-(\d+)-disk-(\d+))$").unwrap());

static TEMP_CLONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-temp-snap-access-(\d+)-(\d+)$").unwrap());

// =============================================================================
// Parsed Host-Side Names
// =============================================================================

/// A host-side volume name, decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedVolname {
    /// `vm-{vmid}-disk-{index}`, optionally the child half of a linked
    /// clone (`base-X-disk-M/vm-Y-disk-N`) carrying the parent reference
    Disk {
        vmid: u32,
        index: u32,
        parent: Option<ParentRef>,
    },
    /// `base-{vmid}-disk-{index}`, a template disk
    Base { vmid: u32, index: u32 },
    /// `vm-{vmid}-cloudinit`
    Cloudinit { vmid: u32 },
    /// `vm-{vmid}-state-{snap}`, a suspended-VM state volume
    State { vmid: u32, snap: String },
}

/// Parent half of a linked-clone name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentRef {
    pub basename: String,
    pub basevmid: u32,
}

impl ParsedVolname {
    /// Owner VMID of the named volume
    pub fn vmid(&self) -> u32 {
        match self {
            ParsedVolname::Disk { vmid, .. }
            | ParsedVolname::Base { vmid, .. }
            | ParsedVolname::Cloudinit { vmid }
            | ParsedVolname::State { vmid, .. } => *vmid,
        }
    }

    /// Whether this is a template disk
    pub fn is_template(&self) -> bool {
        matches!(self, ParsedVolname::Base { .. })
    }

    /// Disk index, for disk-role volumes
    pub fn disk_index(&self) -> Option<u32> {
        match self {
            ParsedVolname::Disk { index, .. } | ParsedVolname::Base { index, .. } => Some(*index),
            _ => None,
        }
    }
}

impl std::fmt::Display for ParsedVolname {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParsedVolname::Disk {
                vmid,
                index,
                parent: Some(p),
            } => write!(f, "{}/vm-{}-disk-{}", p.basename, vmid, index),
            ParsedVolname::Disk { vmid, index, .. } => write!(f, "vm-{}-disk-{}", vmid, index),
            ParsedVolname::Base { vmid, index } => write!(f, "base-{}-disk-{}", vmid, index),
            ParsedVolname::Cloudinit { vmid } => write!(f, "vm-{}-cloudinit", vmid),
            ParsedVolname::State { vmid, snap } => write!(f, "vm-{}-state-{}", vmid, snap),
        }
    }
}

/// Parse a host-side volume name, including the linked-clone compound form.
pub fn parse_volname(volname: &str) -> Option<ParsedVolname> {
    if let Some(c) = LINKED_CLONE_RE.captures(volname) {
        return Some(ParsedVolname::Disk {
            vmid: c[4].parse().ok()?,
            index: c[5].parse().ok()?,
            parent: Some(ParentRef {
                basename: c[1].to_string(),
                basevmid: c[2].parse().ok()?,
            }),
        });
    }
    if let Some(c) = VM_DISK_RE.captures(volname) {
        let vmid = c[2].parse().ok()?;
        let index = c[3].parse().ok()?;
        return Some(match &c[1] {
            "base" => ParsedVolname::Base { vmid, index },
            _ => ParsedVolname::Disk {
                vmid,
                index,
                parent: None,
            },
        });
    }
    if let Some(c) = VM_CLOUDINIT_RE.captures(volname) {
        return Some(ParsedVolname::Cloudinit {
            vmid: c[1].parse().ok()?,
        });
    }
    if let Some(c) = VM_STATE_RE.captures(volname) {
        return Some(ParsedVolname::State {
            vmid: c[1].parse().ok()?,
            snap: c[2].to_string(),
        });
    }
    None
}

// =============================================================================
// Decoded Array-Side Names
// =============================================================================

/// Role segment of an array volume name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArrayRole {
    Disk(u32),
    Cloudinit,
    State(String),
    Vmconf(String),
}

/// An array volume name, decoded into its fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedArrayName {
    pub storage: String,
    pub vmid: u32,
    pub role: ArrayRole,
}

impl DecodedArrayName {
    /// Host-side name for this array volume. Templates carry a `base-`
    /// prefix; template-ness lives in the `pve-base` snapshot, not the
    /// array name, so the caller supplies it.
    pub fn to_volname(&self, is_template: bool) -> Option<String> {
        match &self.role {
            ArrayRole::Disk(idx) => Some(if is_template {
                format!("base-{}-disk-{}", self.vmid, idx)
            } else {
                format!("vm-{}-disk-{}", self.vmid, idx)
            }),
            ArrayRole::Cloudinit => Some(format!("vm-{}-cloudinit", self.vmid)),
            ArrayRole::State(snap) => Some(format!("vm-{}-state-{}", self.vmid, snap)),
            // vmconf volumes have no host-side identity
            ArrayRole::Vmconf(_) => None,
        }
    }
}

/// Decode a bare (non-pod-qualified) array volume name. Snapshot forms
/// (anything containing `.`) are rejected.
pub fn decode_array_name(name: &str) -> Option<DecodedArrayName> {
    if name.contains('.') {
        return None;
    }
    let c = ARRAY_VOLUME_RE.captures(name)?;
    let storage = c[1].to_string();
    let vmid: u32 = c[2].parse().ok()?;
    let role = if let Some(idx) = c.get(3) {
        ArrayRole::Disk(idx.as_str().parse().ok()?)
    } else if c.get(4).is_some() {
        ArrayRole::Cloudinit
    } else if let Some(snap) = c.get(5) {
        ArrayRole::State(snap.as_str().to_string())
    } else {
        ArrayRole::Vmconf(c.get(6)?.as_str().to_string())
    };
    Some(DecodedArrayName {
        storage,
        vmid,
        role,
    })
}

// =============================================================================
// Sanitization
// =============================================================================

/// Sanitize a storage id for use as an array name field: collapse
/// whitespace to `-`, drop anything outside `[A-Za-z0-9_-]`, require a
/// leading alphanumeric, cap at 24 chars, and never end on a separator.
/// Falls back to `pve` when nothing survives. The caller folds `-` to `_`
/// when the field must not contain the separator.
pub fn sanitize_storage(storage: &str) -> String {
    let mut out = String::with_capacity(storage.len());
    for ch in storage.chars() {
        if ch.is_whitespace() {
            out.push('-');
        } else if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
            out.push(ch);
        }
    }
    let trimmed = out.trim_start_matches(|c: char| !c.is_ascii_alphanumeric());
    let mut s: String = trimmed.chars().take(MAX_STORAGE_FIELD_LEN).collect();
    while s.ends_with('-') || s.ends_with('_') {
        s.pop();
    }
    if s.is_empty() {
        s.push_str("pve");
    }
    s
}

/// Storage field exactly as it appears inside array names
fn storage_field(storage: &str) -> String {
    sanitize_storage(storage).replace('-', "_")
}

/// Sanitize a snapshot name for an array snapshot suffix: only
/// `[A-Za-z0-9-]` survive, everything else becomes `-`, runs collapse.
/// Lossy: `a_b` and `a-b` alias.
fn sanitize_snapshot_component(name: &str, max_len: usize) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_dash = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    let mut s: String = out.trim_matches('-').chars().take(max_len).collect();
    while s.ends_with('-') {
        s.pop();
    }
    s
}

/// Validate an array object name: 1-63 chars, leading alphanumeric,
/// `[A-Za-z0-9_-]` only.
pub fn is_valid_array_name(name: &str) -> bool {
    VALID_ARRAY_NAME_RE.is_match(name)
}

// =============================================================================
// Encoding
// =============================================================================

/// Array name of a VM disk: `pve-{storage}-{vmid}-disk{index}`
pub fn array_disk_name(storage: &str, vmid: u32, index: u32) -> String {
    format!("pve-{}-{}-disk{}", storage_field(storage), vmid, index)
}

/// Array name of a cloudinit volume
pub fn array_cloudinit_name(storage: &str, vmid: u32) -> String {
    format!("pve-{}-{}-cloudinit", storage_field(storage), vmid)
}

/// Array name of a suspend-state volume
pub fn array_state_name(storage: &str, vmid: u32, snap: &str) -> String {
    format!(
        "pve-{}-{}-state-{}",
        storage_field(storage),
        vmid,
        sanitize_snapshot_component(snap, MAX_SNAPSHOT_SUFFIX_LEN)
    )
}

/// Array snapshot suffix for a user snapshot: `pve-snap-{name}`, total
/// suffix capped at 64 chars.
pub fn snapshot_suffix(snap: &str) -> String {
    let budget = MAX_SNAPSHOT_SUFFIX_LEN - SNAPSHOT_SUFFIX_PREFIX.len();
    format!(
        "{}{}",
        SNAPSHOT_SUFFIX_PREFIX,
        sanitize_snapshot_component(snap, budget)
    )
}

/// Full array snapshot name: `{volume}.{suffix}`
pub fn snapshot_name(volume: &str, suffix: &str) -> String {
    format!("{volume}.{suffix}")
}

/// Array name of a config-backup volume:
/// `pve-{storage}-{vmid}-vmconf-{snap}`, truncated to 63 chars total with
/// no trailing separator surviving the cut.
pub fn config_volume_name(storage: &str, vmid: u32, snap: &str) -> String {
    let prefix = format!("pve-{}-{}-vmconf-", storage_field(storage), vmid);
    let budget = MAX_ARRAY_NAME_LEN.saturating_sub(prefix.len());
    let snap_part = sanitize_snapshot_component(snap, budget);
    let mut name = format!("{prefix}{snap_part}");
    name.truncate(MAX_ARRAY_NAME_LEN);
    while name.ends_with('-') || name.ends_with('_') {
        name.pop();
    }
    name
}

/// Glob matching every config-backup volume of a VM
pub fn config_volume_glob(storage: &str, vmid: u32) -> String {
    format!("pve-{}-{}-vmconf-*", storage_field(storage), vmid)
}

/// Glob matching every volume of a VM in this storage
pub fn vm_volume_glob(storage: &str, vmid: u32) -> String {
    format!("pve-{}-{}-*", storage_field(storage), vmid)
}

/// Glob matching every volume in this storage
pub fn storage_volume_glob(storage: &str) -> String {
    format!("pve-{}-*", storage_field(storage))
}

/// Array Host object name for a node, or the cluster-shared host
pub fn host_name(cluster: &str, node: Option<&str>) -> String {
    let cluster = sanitize_snapshot_component(cluster, 20);
    match node {
        Some(node) => format!("pve-{}-{}", cluster, sanitize_snapshot_component(node, 20)),
        None => format!("pve-{}-shared", cluster),
    }
}

/// Glob matching every host of a cluster
pub fn cluster_host_glob(cluster: &str) -> String {
    format!("pve-{}-*", sanitize_snapshot_component(cluster, 20))
}

/// Array-side base name for any host-side volume name, covering all four
/// shapes plus the linked-clone compound form (the child name after the
/// `/` is what maps to an array volume).
pub fn array_name_for_volname(storage: &str, volname: &str) -> Result<String> {
    let parsed = parse_volname(volname)
        .ok_or_else(|| Error::InvalidVolumeName(volname.to_string()))?;
    Ok(match parsed {
        ParsedVolname::Disk { vmid, index, .. } | ParsedVolname::Base { vmid, index } => {
            array_disk_name(storage, vmid, index)
        }
        ParsedVolname::Cloudinit { vmid } => array_cloudinit_name(storage, vmid),
        ParsedVolname::State { vmid, snap } => array_state_name(storage, vmid, &snap),
    })
}

/// Name of a short-lived clone giving block access to a snapshot
pub fn temp_clone_name(volume: &str, unix_ts: i64, pid: u32) -> String {
    format!("{volume}{TEMP_CLONE_INFIX}{unix_ts}-{pid}")
}

/// If `name` is a temp snapshot-access clone, return its creation unix
/// timestamp.
pub fn temp_clone_timestamp(name: &str) -> Option<i64> {
    TEMP_CLONE_RE
        .captures(name)
        .and_then(|c| c[1].parse().ok())
}

// =============================================================================
// Pod Qualification
// =============================================================================

/// Prefix `name` with an ActiveCluster pod qualifier
pub fn pod_qualify(pod: Option<&str>, name: &str) -> String {
    match pod {
        Some(pod) => format!("{pod}::{name}"),
        None => name.to_string(),
    }
}

/// Split a possibly pod-qualified name into `(pod, local_name)`
pub fn split_pod(name: &str) -> (Option<&str>, &str) {
    match name.split_once("::") {
        Some((pod, local)) => (Some(pod), local),
        None => (None, name),
    }
}

// =============================================================================
// WWID
// =============================================================================

/// Derive the device WWID from a volume serial. The serial is reported by
/// the array in upper case; WWIDs are compared lower case everywhere.
pub fn serial_to_wwid(serial: &str) -> String {
    format!("{}{}", WWID_PREFIX, serial.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_round_trip() {
        let name = array_disk_name("pure1", 100, 0);
        assert_eq!(name, "pve-pure1-100-disk0");
        let decoded = decode_array_name(&name).unwrap();
        assert_eq!(decoded.storage, "pure1");
        assert_eq!(decoded.vmid, 100);
        assert_eq!(decoded.role, ArrayRole::Disk(0));
        assert_eq!(decoded.to_volname(false).unwrap(), "vm-100-disk-0");
        assert_eq!(decoded.to_volname(true).unwrap(), "base-100-disk-0");
    }

    #[test]
    fn test_round_trip_all_shapes() {
        for volname in [
            "vm-100-disk-0",
            "vm-100-disk-42",
            "vm-100-cloudinit",
            "vm-100-state-snap1",
        ] {
            let array = array_name_for_volname("pure1", volname).unwrap();
            let decoded = decode_array_name(&array).unwrap();
            assert_eq!(decoded.to_volname(false).unwrap(), volname, "{volname}");
        }
    }

    #[test]
    fn test_decode_rejects_snapshots() {
        assert!(decode_array_name("pve-pure1-100-disk0.pve-snap-x").is_none());
        assert!(decode_array_name("pve-pure1-100-disk0.pve-base").is_none());
    }

    #[test]
    fn test_decode_legacy_hyphenated_storage() {
        // Legacy names kept a hyphen in the storage field; the digits-only
        // VMID anchor still finds the right split.
        let decoded = decode_array_name("pve-old-store-100-disk1").unwrap();
        assert_eq!(decoded.storage, "old-store");
        assert_eq!(decoded.vmid, 100);
        assert_eq!(decoded.role, ArrayRole::Disk(1));
    }

    #[test]
    fn test_decode_vmconf() {
        let decoded = decode_array_name("pve-pure1-100-vmconf-snap1").unwrap();
        assert_eq!(decoded.role, ArrayRole::Vmconf("snap1".into()));
        assert!(decoded.to_volname(false).is_none());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_array_name("foo").is_none());
        assert!(decode_array_name("pve-pure1-abc-disk0").is_none());
        assert!(decode_array_name("pve-pure1-100-floppy0").is_none());
        assert!(decode_array_name("vm-100-disk-0").is_none());
    }

    #[test]
    fn test_sanitize_storage() {
        assert_eq!(sanitize_storage("pure1"), "pure1");
        assert_eq!(sanitize_storage("my storage"), "my-storage");
        assert_eq!(sanitize_storage("büro$torage"), "brotorage");
        assert_eq!(sanitize_storage("--weird--"), "weird");
        assert_eq!(sanitize_storage(""), "pve");
        assert_eq!(sanitize_storage("###"), "pve");
        let long = "a".repeat(40);
        assert_eq!(sanitize_storage(&long).len(), MAX_STORAGE_FIELD_LEN);
    }

    #[test]
    fn test_storage_hyphens_become_underscores() {
        assert_eq!(array_disk_name("my-store", 1, 0), "pve-my_store-1-disk0");
    }

    #[test]
    fn test_sanitized_names_are_valid() {
        for storage in ["pure1", "my storage", "a-b-c", "x", "&", &"z".repeat(64)] {
            let name = array_disk_name(storage, 9999999, 999);
            assert!(is_valid_array_name(&name), "{name}");
            assert!(name.len() <= MAX_ARRAY_NAME_LEN, "{name}");
        }
    }

    #[test]
    fn test_boundary_encoding_fits() {
        // 24-char storage, 7-digit VMID, 3-digit disk index
        let storage = "s".repeat(24);
        let name = array_disk_name(&storage, 9_999_999, 999);
        assert!(name.len() <= MAX_ARRAY_NAME_LEN, "{} chars", name.len());
        assert!(is_valid_array_name(&name));
    }

    #[test]
    fn test_snapshot_suffix_coercion() {
        assert_eq!(snapshot_suffix("test_1.backup"), "pve-snap-test-1-backup");
        // The coercion is lossy: the already-coerced spelling aliases it.
        assert_eq!(snapshot_suffix("test-1-backup"), "pve-snap-test-1-backup");
        assert_eq!(snapshot_suffix("a__b..c"), "pve-snap-a-b-c");
        assert_eq!(snapshot_suffix("snap 1"), "pve-snap-snap-1");
    }

    #[test]
    fn test_snapshot_suffix_bounds() {
        let long = "x".repeat(200);
        let suffix = snapshot_suffix(&long);
        assert!(suffix.len() <= MAX_SNAPSHOT_SUFFIX_LEN);
        assert!(suffix.starts_with(SNAPSHOT_SUFFIX_PREFIX));
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-'));
        assert!(!suffix.ends_with('-'));
    }

    #[test]
    fn test_config_volume_truncation() {
        let snap = "s".repeat(50);
        let name = config_volume_name("pure1", 100, &snap);
        assert!(name.len() <= MAX_ARRAY_NAME_LEN);
        assert!(!name.ends_with('-') && !name.ends_with('_'));
        assert!(decode_array_name(&name).is_some());
    }

    #[test]
    fn test_host_names() {
        assert_eq!(host_name("pve", Some("node1")), "pve-pve-node1");
        assert_eq!(host_name("pve", None), "pve-pve-shared");
        assert_eq!(host_name("lab_x", Some("n.1")), "pve-lab-x-n-1");
    }

    #[test]
    fn test_parse_volname_shapes() {
        assert_eq!(
            parse_volname("vm-100-disk-0"),
            Some(ParsedVolname::Disk {
                vmid: 100,
                index: 0,
                parent: None
            })
        );
        assert_eq!(
            parse_volname("base-100-disk-2"),
            Some(ParsedVolname::Base {
                vmid: 100,
                index: 2
            })
        );
        assert_eq!(
            parse_volname("vm-100-cloudinit"),
            Some(ParsedVolname::Cloudinit { vmid: 100 })
        );
        assert_eq!(
            parse_volname("vm-100-state-before_upgrade"),
            Some(ParsedVolname::State {
                vmid: 100,
                snap: "before_upgrade".into()
            })
        );
        assert!(parse_volname("vm-abc-disk-0").is_none());
        assert!(parse_volname("disk-0").is_none());
    }

    #[test]
    fn test_parse_linked_clone() {
        let parsed = parse_volname("base-100-disk-0/vm-200-disk-1").unwrap();
        assert_eq!(
            parsed,
            ParsedVolname::Disk {
                vmid: 200,
                index: 1,
                parent: Some(ParentRef {
                    basename: "base-100-disk-0".into(),
                    basevmid: 100
                })
            }
        );
        assert_eq!(parsed.to_string(), "base-100-disk-0/vm-200-disk-1");
    }

    #[test]
    fn test_array_name_for_linked_clone() {
        assert_eq!(
            array_name_for_volname("pure1", "base-100-disk-0/vm-200-disk-1").unwrap(),
            "pve-pure1-200-disk1"
        );
    }

    #[test]
    fn test_pod_qualification() {
        assert_eq!(pod_qualify(Some("metro"), "pve-p-1-disk0"), "metro::pve-p-1-disk0");
        assert_eq!(pod_qualify(None, "pve-p-1-disk0"), "pve-p-1-disk0");
        assert_eq!(
            split_pod("metro::pve-p-1-disk0"),
            (Some("metro"), "pve-p-1-disk0")
        );
        assert_eq!(split_pod("pve-p-1-disk0"), (None, "pve-p-1-disk0"));
    }

    #[test]
    fn test_serial_to_wwid() {
        let serial = "F4DE639B29D64F2C000113EA";
        let wwid = serial_to_wwid(serial);
        assert_eq!(wwid, "3624a9370f4de639b29d64f2c000113ea");
        assert!(wwid.starts_with(WWID_PREFIX));
        assert_eq!(wwid.len(), WWID_PREFIX.len() + 24);
        assert!(wwid.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_temp_clone_names() {
        let name = temp_clone_name("pve-pure1-100-disk0", 1700000000, 4242);
        assert_eq!(
            name,
            "pve-pure1-100-disk0-temp-snap-access-1700000000-4242"
        );
        assert_eq!(temp_clone_timestamp(&name), Some(1700000000));
        assert_eq!(temp_clone_timestamp("pve-pure1-100-disk0"), None);
    }

    #[test]
    fn test_is_valid_array_name() {
        assert!(is_valid_array_name("pve-pure1-100-disk0"));
        assert!(is_valid_array_name("a"));
        assert!(!is_valid_array_name(""));
        assert!(!is_valid_array_name("-leading"));
        assert!(!is_valid_array_name("has.dot"));
        assert!(!is_valid_array_name(&"a".repeat(64)));
        assert!(is_valid_array_name(&"a".repeat(63)));
    }
}

//! REST API version negotiation
//!
//! The array advertises the dialects it speaks via `GET /api/api_version`.
//! We intersect that list with our own, newest-2.x-first. Arrays too old
//! for the introspection endpoint are probed; if nothing answers we assume
//! a baseline 2.x and let the first real request surface the truth.

use serde::{Deserialize, Serialize};

/// Dialects this client can speak, in preference order
pub const SUPPORTED_VERSIONS: &[&str] = &[
    "2.26", "2.21", "2.16", "2.10", "2.4", "2.2", "1.19", "1.18", "1.17",
];

/// Assumed when the array answers neither introspection nor probing
pub const DEFAULT_VERSION: &str = "2.2";

/// A negotiated API version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiVersion {
    raw: String,
    major: u8,
}

impl ApiVersion {
    pub fn parse(raw: &str) -> Option<Self> {
        let major: u8 = raw.split('.').next()?.parse().ok()?;
        if major != 1 && major != 2 {
            return None;
        }
        Some(Self {
            raw: raw.to_string(),
            major,
        })
    }

    pub fn default_version() -> Self {
        Self::parse(DEFAULT_VERSION).unwrap()
    }

    pub fn is_v2(&self) -> bool {
        self.major == 2
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// URL prefix for every request in this dialect
    pub fn path_prefix(&self) -> String {
        format!("/api/{}", self.raw)
    }
}

impl std::fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Pick the best mutually supported version from the advertised list.
pub fn negotiate(advertised: &[String]) -> Option<ApiVersion> {
    SUPPORTED_VERSIONS
        .iter()
        .find(|candidate| advertised.iter().any(|a| a == *candidate))
        .and_then(|v| ApiVersion::parse(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adv(versions: &[&str]) -> Vec<String> {
        versions.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_prefers_newest_v2() {
        let version = negotiate(&adv(&["1.19", "2.2", "2.21", "2.26"])).unwrap();
        assert_eq!(version.as_str(), "2.26");
        assert!(version.is_v2());
    }

    #[test]
    fn test_falls_back_to_v1() {
        let version = negotiate(&adv(&["1.17", "1.19"])).unwrap();
        assert_eq!(version.as_str(), "1.19");
        assert!(!version.is_v2());
    }

    #[test]
    fn test_no_overlap() {
        assert!(negotiate(&adv(&["0.1", "3.0"])).is_none());
        assert!(negotiate(&[]).is_none());
    }

    #[test]
    fn test_path_prefix() {
        let version = ApiVersion::parse("2.21").unwrap();
        assert_eq!(version.path_prefix(), "/api/2.21");
    }

    #[test]
    fn test_parse_rejects_unknown_major() {
        assert!(ApiVersion::parse("3.0").is_none());
        assert!(ApiVersion::parse("garbage").is_none());
    }
}

//! Error types for the FlashArray storage plugin
//!
//! Provides structured error types for all plugin components: the array
//! REST client, SAN fabric drivers, device resolution, and orchestration.

use thiserror::Error;

/// Unified error type for the plugin
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Array API Errors
    // =========================================================================
    #[error("Array connection error: {0}")]
    ApiTransport(#[from] reqwest::Error),

    #[error("API version negotiation failed: {0}")]
    ApiVersion(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Array API error (HTTP {status}): {message}")]
    ApiStatus { status: u16, message: String },

    #[error("Unexpected array response: {0}")]
    ApiResponse(String),

    // =========================================================================
    // Resource Errors
    // =========================================================================
    #[error("{kind} not found: {name}")]
    NotFound { kind: String, name: String },

    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: String, name: String },

    #[error("Conflict: {message}")]
    Conflict {
        message: String,
        remediation: Option<String>,
    },

    // =========================================================================
    // Subprocess Errors
    // =========================================================================
    #[error("Command failed: {command} (exit {code}): {stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("Command timed out after {seconds}s: {command}")]
    CommandTimeout { command: String, seconds: u64 },

    #[error("Refusing unsafe argument: {0}")]
    UnsafeArgument(String),

    // =========================================================================
    // Device Errors
    // =========================================================================
    #[error("Device {device} is still in use: {reason}")]
    DeviceInUse { device: String, reason: String },

    #[error("Timed out after {seconds}s waiting for device with WWID {wwid}\n{diagnostics}")]
    DeviceTimeout {
        wwid: String,
        seconds: u64,
        diagnostics: String,
    },

    #[error("Device resolution failed: {0}")]
    DeviceResolve(String),

    // =========================================================================
    // Naming Errors
    // =========================================================================
    #[error("Invalid volume name: {0}")]
    InvalidVolumeName(String),

    #[error("No free disk index for VM {vmid} (0..{max} exhausted)")]
    DiskIndexExhausted { vmid: u32, max: u32 },

    // =========================================================================
    // Operation Guards
    // =========================================================================
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    // =========================================================================
    // Parse / IO Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How the caller should react to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Transient; retry with exponential backoff
    RetryWithBackoff,
    /// Session expired; re-authenticate once, then retry
    Reauthenticate,
    /// Surface to the caller, no retry
    Surface,
}

impl Error {
    /// Determine how the caller should react to this error
    pub fn disposition(&self) -> Disposition {
        match self {
            Error::ApiTransport(e) if e.is_connect() || e.is_timeout() => {
                Disposition::RetryWithBackoff
            }
            Error::ApiStatus { status: 401, .. } => Disposition::Reauthenticate,
            Error::ApiStatus { status, .. } if *status == 429 || *status >= 500 => {
                Disposition::RetryWithBackoff
            }
            _ => Disposition::Surface,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        self.disposition() == Disposition::RetryWithBackoff
    }

    /// Check if this error means "the resource does not exist".
    ///
    /// Get-style array operations translate exactly these errors into
    /// `Ok(None)`; every other failure propagates. The distinction keeps
    /// idempotent deletes and existence checks honest.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::ApiStatus { status: 404, .. } => true,
            Error::ApiStatus { message, .. } => {
                let m = message.to_ascii_lowercase();
                m.contains("does not exist") || m.contains("no such")
            }
            _ => false,
        }
    }

    /// Check if this conflict is benign: a race with a peer ("already
    /// exists") or with ourselves on retry ("already connected").
    pub fn is_benign_conflict(&self) -> bool {
        let message = match self {
            Error::AlreadyExists { .. } => return true,
            Error::Conflict { message, .. } => message,
            Error::ApiStatus {
                status: 400 | 409,
                message,
            } => message,
            _ => return false,
        };
        let m = message.to_ascii_lowercase();
        m.contains("already exists") || m.contains("already connected")
    }

    /// Check if the array refused an operation because dependent objects
    /// exist (e.g. a snapshot that still has linked clones).
    pub fn is_dependency_conflict(&self) -> bool {
        let message = match self {
            Error::Conflict { message, .. } => message,
            Error::ApiStatus { message, .. } => message,
            _ => return false,
        };
        let m = message.to_ascii_lowercase();
        m.contains("has dependent")
            || m.contains("volume-has-dependencies")
            || m.contains("in use")
    }
}

/// Result type alias for the plugin
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_dispositions() {
        let err = Error::ApiStatus {
            status: 401,
            message: "invalid session".into(),
        };
        assert_eq!(err.disposition(), Disposition::Reauthenticate);

        let err = Error::ApiStatus {
            status: 429,
            message: "too many requests".into(),
        };
        assert_eq!(err.disposition(), Disposition::RetryWithBackoff);
        assert!(err.is_retryable());

        let err = Error::ApiStatus {
            status: 503,
            message: "service unavailable".into(),
        };
        assert_eq!(err.disposition(), Disposition::RetryWithBackoff);

        let err = Error::ApiStatus {
            status: 400,
            message: "bad request".into(),
        };
        assert_eq!(err.disposition(), Disposition::Surface);
    }

    #[test]
    fn test_not_found_detection() {
        let err = Error::ApiStatus {
            status: 404,
            message: "not found".into(),
        };
        assert!(err.is_not_found());

        let err = Error::ApiStatus {
            status: 400,
            message: "Volume does not exist.".into(),
        };
        assert!(err.is_not_found());

        let err = Error::ApiStatus {
            status: 500,
            message: "internal error".into(),
        };
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_benign_conflicts() {
        let err = Error::ApiStatus {
            status: 400,
            message: "Connection already exists.".into(),
        };
        assert!(err.is_benign_conflict());

        let err = Error::Conflict {
            message: "Host already connected.".into(),
            remediation: None,
        };
        assert!(err.is_benign_conflict());

        let err = Error::Conflict {
            message: "IQN already in use by host other-node".into(),
            remediation: Some("remove the conflicting registration".into()),
        };
        assert!(!err.is_benign_conflict());
    }

    #[test]
    fn test_dependency_conflicts() {
        let err = Error::ApiStatus {
            status: 400,
            message: "Snapshot has dependent volumes.".into(),
        };
        assert!(err.is_dependency_conflict());

        let err = Error::ApiStatus {
            status: 400,
            message: "volume-has-dependencies".into(),
        };
        assert!(err.is_dependency_conflict());

        let err = Error::ApiStatus {
            status: 400,
            message: "Snapshot pve-pure1-100-disk0.pve-snap-s1 is in use.".into(),
        };
        assert!(err.is_dependency_conflict());
    }
}

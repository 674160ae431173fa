//! REST transport for the array management API
//!
//! Owns everything wire-level: TLS, version negotiation, session
//! authentication, the retry pipeline, and error-message extraction for
//! both dialects. Resource operations live in [`super::ops`]; nothing
//! outside this module builds HTTP requests.

use crate::array::session::SessionCache;
use crate::array::version::{self, ApiVersion, SUPPORTED_VERSIONS};
use crate::config::StorageConfig;
use crate::error::{Error, Result};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Session token header, both directions
const AUTH_TOKEN_HEADER: &str = "x-auth-token";

/// Login header carrying the api-token (v2)
const API_TOKEN_HEADER: &str = "api-token";

/// v1 dialect used to bootstrap an api-token from username+password
const TOKEN_BOOTSTRAP_VERSION: &str = "1.19";

// =============================================================================
// Configuration
// =============================================================================

/// Transport configuration for one array endpoint
#[derive(Debug, Clone)]
pub struct ArrayClientConfig {
    /// Base URL, e.g. `https://array.example.com:443`
    pub endpoint: String,
    pub api_token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_verify: bool,
    /// Base delay for backoff; attempt N waits `retry_delay * N`
    pub retry_delay: Duration,
    /// Attempts per request, including the first
    pub max_attempts: u32,
    pub request_timeout: Duration,
}

impl Default for ArrayClientConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_token: None,
            username: None,
            password: None,
            ssl_verify: false,
            retry_delay: Duration::from_millis(500),
            max_attempts: 4,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&StorageConfig> for ArrayClientConfig {
    fn from(cfg: &StorageConfig) -> Self {
        Self {
            endpoint: cfg.endpoint(),
            api_token: cfg.api_token.clone(),
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            ssl_verify: cfg.ssl_verify,
            ..Self::default()
        }
    }
}

// =============================================================================
// Client
// =============================================================================

/// Client for a single FlashArray management endpoint
pub struct ArrayClient {
    http: reqwest::Client,
    config: ArrayClientConfig,
    version: ApiVersion,
    session: SessionCache,
}

impl ArrayClient {
    /// Connect: negotiate the API version and verify credentials by
    /// performing the initial login.
    pub async fn connect(config: ArrayClientConfig) -> Result<Self> {
        let http = reqwest::ClientBuilder::new()
            .danger_accept_invalid_certs(!config.ssl_verify)
            .connect_timeout(Duration::from_secs(10))
            .timeout(config.request_timeout)
            .build()?;

        let version = Self::detect_version(&http, &config.endpoint).await;
        info!("Connected to {} using API {}", config.endpoint, version);

        let client = Self {
            http,
            config,
            version,
            session: SessionCache::new(),
        };
        let token = client.login().await?;
        client.session.store(token);
        Ok(client)
    }

    /// Negotiated dialect
    pub fn version(&self) -> &ApiVersion {
        &self.version
    }

    pub(crate) fn is_v2(&self) -> bool {
        self.version.is_v2()
    }

    // =========================================================================
    // Version Detection
    // =========================================================================

    async fn detect_version(http: &reqwest::Client, endpoint: &str) -> ApiVersion {
        let url = format!("{endpoint}/api/api_version");
        match http.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                let advertised = resp
                    .json::<Value>()
                    .await
                    .ok()
                    .and_then(|v| {
                        v.get("version").and_then(Value::as_array).map(|arr| {
                            arr.iter()
                                .filter_map(Value::as_str)
                                .map(str::to_string)
                                .collect::<Vec<_>>()
                        })
                    })
                    .unwrap_or_default();
                if let Some(version) = version::negotiate(&advertised) {
                    return version;
                }
                warn!(
                    "No mutually supported API version in {:?}, probing",
                    advertised
                );
                Self::probe_versions(http, endpoint).await
            }
            _ => {
                debug!("api_version introspection unavailable, probing");
                Self::probe_versions(http, endpoint).await
            }
        }
    }

    /// Probe successive versions: any response other than 404 means the
    /// dialect exists (401 is the expected answer for an unauthenticated
    /// probe).
    async fn probe_versions(http: &reqwest::Client, endpoint: &str) -> ApiVersion {
        for candidate in SUPPORTED_VERSIONS {
            let version = match ApiVersion::parse(candidate) {
                Some(v) => v,
                None => continue,
            };
            let resource = if version.is_v2() { "arrays" } else { "array" };
            let url = format!("{endpoint}{}/{resource}", version.path_prefix());
            match http.get(&url).send().await {
                Ok(resp) if resp.status() != StatusCode::NOT_FOUND => {
                    debug!("Probe hit API {candidate}");
                    return version;
                }
                _ => continue,
            }
        }
        warn!(
            "No API version answered probing; assuming {}",
            version::DEFAULT_VERSION
        );
        ApiVersion::default_version()
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    /// Obtain a fresh session token.
    async fn login(&self) -> Result<String> {
        if self.is_v2() {
            let api_token = match &self.config.api_token {
                Some(token) => token.clone(),
                None => self.bootstrap_api_token().await?,
            };
            let url = format!("{}{}/login", self.config.endpoint, self.version.path_prefix());
            let resp = self
                .http
                .post(&url)
                .header(API_TOKEN_HEADER, api_token)
                .send()
                .await?;
            Self::token_from_response(resp).await
        } else {
            let url = format!(
                "{}{}/auth/session",
                self.config.endpoint,
                self.version.path_prefix()
            );
            let body = match (&self.config.username, &self.config.password) {
                (Some(username), Some(password)) => {
                    json!({ "username": username, "password": password })
                }
                _ => match &self.config.api_token {
                    Some(token) => json!({ "api_token": token }),
                    None => {
                        return Err(Error::Authentication(
                            "no credentials configured".into(),
                        ))
                    }
                },
            };
            let resp = self.http.post(&url).json(&body).send().await?;
            Self::token_from_response(resp).await
        }
    }

    /// Exchange username+password for an api-token via the v1 endpoint;
    /// needed when the configuration carries no api-token but the array
    /// speaks v2.
    async fn bootstrap_api_token(&self) -> Result<String> {
        let (username, password) = match (&self.config.username, &self.config.password) {
            (Some(u), Some(p)) => (u, p),
            _ => {
                return Err(Error::Authentication(
                    "v2 login requires api-token or username+password".into(),
                ))
            }
        };
        let url = format!(
            "{}/api/{}/auth/apitoken",
            self.config.endpoint, TOKEN_BOOTSTRAP_VERSION
        );
        let resp = self
            .http
            .post(&url)
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await?;
        let status = resp.status().as_u16();
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        body.get("api_token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                Error::Authentication(format!(
                    "api-token exchange failed (HTTP {status}): {body}"
                ))
            })
    }

    async fn token_from_response(resp: reqwest::Response) -> Result<String> {
        let status = resp.status().as_u16();
        if let Some(token) = resp
            .headers()
            .get(AUTH_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            return Ok(token.to_string());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(Error::Authentication(format!(
            "login rejected (HTTP {status}): {}",
            body.chars().take(200).collect::<String>()
        )))
    }

    async fn session_token(&self) -> Result<String> {
        if let Some(token) = self.session.token() {
            return Ok(token);
        }
        let token = self.login().await?;
        self.session.store(token.clone());
        Ok(token)
    }

    // =========================================================================
    // Request Pipeline
    // =========================================================================

    /// Issue a request in the negotiated dialect. `idempotent` gates 5xx
    /// retries for POST: a create that may have partially landed is never
    /// replayed.
    pub(crate) async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
        idempotent: bool,
    ) -> Result<Value> {
        let url = format!("{}{}{}", self.config.endpoint, self.version.path_prefix(), path);
        let mut reauthenticated = false;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let token = self.session_token().await?;
            let mut req = self
                .http
                .request(method.clone(), &url)
                .header(AUTH_TOKEN_HEADER, token);
            if !query.is_empty() {
                // reqwest percent-encodes values here, which is the single
                // escaping pass pod-qualified ("::") names rely on.
                req = req.query(query);
            }
            if let Some(body) = &body {
                req = req.json(body);
            }

            let resp = match req.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    if (e.is_connect() || e.is_timeout()) && attempt < self.config.max_attempts {
                        self.backoff(attempt, path).await;
                        continue;
                    }
                    return Err(e.into());
                }
            };

            let status = resp.status();
            if status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                if text.trim().is_empty() {
                    return Ok(json!({}));
                }
                return serde_json::from_str(&text).map_err(Error::from);
            }

            let code = status.as_u16();
            let body_text = resp.text().await.unwrap_or_default();

            if code == 401 && !reauthenticated {
                debug!("Session expired on {path}, re-authenticating");
                self.session.invalidate();
                reauthenticated = true;
                continue;
            }

            let retryable_status = code == 429 || code >= 500;
            let post_unsafe = method == Method::POST && !idempotent && code >= 500;
            if retryable_status && !post_unsafe && attempt < self.config.max_attempts {
                self.backoff(attempt, path).await;
                continue;
            }

            let message = annotate(code, &extract_error_message(self.is_v2(), &body_text));
            return Err(Error::ApiStatus {
                status: code,
                message,
            });
        }
    }

    async fn backoff(&self, attempt: u32, path: &str) {
        let delay = self.config.retry_delay * attempt;
        debug!("Retrying {path} in {delay:?} (attempt {attempt})");
        tokio::time::sleep(delay).await;
    }
}

// =============================================================================
// Error Extraction
// =============================================================================

/// Pull a human-readable message out of an error body. v2 wraps errors in
/// `{errors: [{message, context, code}]}`; v1 uses `{msg}` or a bare array
/// of such objects.
pub(crate) fn extract_error_message(v2: bool, body: &str) -> String {
    let parsed: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(_) => return truncate(body),
    };

    if v2 {
        if let Some(errors) = parsed.get("errors").and_then(Value::as_array) {
            let parts: Vec<String> = errors
                .iter()
                .filter_map(|e| {
                    let message = e.get("message").and_then(Value::as_str)?;
                    let mut s = String::new();
                    if let Some(ctx) = e.get("context").and_then(Value::as_str) {
                        if !ctx.is_empty() {
                            s.push_str(ctx);
                            s.push_str(": ");
                        }
                    }
                    s.push_str(message);
                    if let Some(code) = e.get("code").and_then(Value::as_str) {
                        s.push_str(&format!(" [{code}]"));
                    }
                    Some(s)
                })
                .collect();
            if !parts.is_empty() {
                return parts.join("; ");
            }
        }
    } else {
        let first = if parsed.is_array() {
            parsed.get(0).cloned().unwrap_or(Value::Null)
        } else {
            parsed.clone()
        };
        if let Some(msg) = first.get("msg").and_then(Value::as_str) {
            return msg.to_string();
        }
    }
    truncate(body)
}

fn truncate(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "(empty response body)".to_string();
    }
    trimmed.chars().take(300).collect()
}

/// Append a remediation hint for statuses operators routinely hit.
pub(crate) fn annotate(status: u16, message: &str) -> String {
    let lowered = message.to_ascii_lowercase();
    let hint = match status {
        401 => Some("check api-token or username/password"),
        403 => Some("the configured credentials lack storage-admin rights"),
        404 => Some("object not found on the array"),
        409 => Some("concurrent modification on the array, retry the operation"),
        503 => Some("array busy or mid-upgrade, retry later"),
        _ if lowered.contains("quota") => Some("pod quota exceeded, raise it or free space"),
        _ if lowered.contains("capacity") => Some("array capacity exhausted"),
        _ => None,
    };
    match hint {
        Some(hint) => format!("{message} ({hint})"),
        None => message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_v2_errors() {
        let body = r#"{"errors":[{"message":"Volume does not exist.","context":"pve-pure1-100-disk0"}]}"#;
        assert_eq!(
            extract_error_message(true, body),
            "pve-pure1-100-disk0: Volume does not exist."
        );
    }

    #[test]
    fn test_extract_v2_error_code() {
        let body = r#"{"errors":[{"message":"Volume has dependencies.","code":"volume-has-dependencies"}]}"#;
        assert_eq!(
            extract_error_message(true, body),
            "Volume has dependencies. [volume-has-dependencies]"
        );
    }

    #[test]
    fn test_extract_v1_msg() {
        assert_eq!(
            extract_error_message(false, r#"{"msg":"Volume does not exist."}"#),
            "Volume does not exist."
        );
        assert_eq!(
            extract_error_message(false, r#"[{"msg":"Host already exists."}]"#),
            "Host already exists."
        );
    }

    #[test]
    fn test_extract_falls_back_to_body() {
        assert_eq!(extract_error_message(true, "plain text"), "plain text");
        assert_eq!(
            extract_error_message(false, ""),
            "(empty response body)"
        );
    }

    #[test]
    fn test_annotate_hints() {
        assert!(annotate(401, "bad session").contains("api-token"));
        assert!(annotate(403, "denied").contains("storage-admin"));
        assert!(annotate(503, "busy").contains("retry later"));
        assert!(annotate(400, "quota exceeded for pod").contains("pod quota"));
        assert_eq!(annotate(400, "bad request"), "bad request");
    }
}

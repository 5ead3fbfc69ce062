//! Client configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for a [`PodClient`](crate::PodClient).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Identity provider (pod server) base URL used for enrollment.
    #[serde(default = "default_idp_url")]
    pub idp_url: String,

    /// Account e-mail used to log in during enrollment.
    #[serde(default)]
    pub email: Option<String>,

    /// Account password.
    #[serde(default = "default_password")]
    pub password: String,

    /// WebID the client credentials are issued for.
    #[serde(default)]
    pub web_id: Option<String>,

    /// Name given to the client credentials created at enrollment.
    #[serde(default = "default_credential_name")]
    pub credential_name: String,

    /// Whether the cache is persisted to `cache_file`.
    #[serde(default)]
    pub cache_enabled: bool,

    /// Backing file for the persistent cache.
    #[serde(default = "default_cache_file")]
    pub cache_file: PathBuf,

    /// Maximum number of in-flight outbound requests.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,

    /// Maximum nesting of claim gathering before a resolution fails.
    #[serde(default = "default_max_claim_depth")]
    pub max_claim_depth: u32,

    /// Optional per-request timeout in seconds. No timeout when unset.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_idp_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_password() -> String {
    "password".to_string()
}

fn default_credential_name() -> String {
    "my-token".to_string()
}

fn default_cache_file() -> PathBuf {
    PathBuf::from(".cache")
}

fn default_max_concurrent() -> usize {
    30
}

fn default_max_claim_depth() -> u32 {
    8
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            idp_url: default_idp_url(),
            email: None,
            password: default_password(),
            web_id: None,
            credential_name: default_credential_name(),
            cache_enabled: false,
            cache_file: default_cache_file(),
            max_concurrent_requests: default_max_concurrent(),
            max_claim_depth: default_max_claim_depth(),
            timeout_secs: None,
        }
    }
}

impl AuthConfig {
    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `PODBENCH_IDP_URL` | Identity provider base URL |
    /// | `PODBENCH_EMAIL` | Account e-mail |
    /// | `PODBENCH_PASSWORD` | Account password |
    /// | `PODBENCH_WEBID` | WebID for client credentials |
    /// | `PODBENCH_CACHE` | Persist the cache (`1`/`true`) |
    /// | `PODBENCH_CACHE_FILE` | Cache file path |
    /// | `PODBENCH_MAX_CONCURRENT` | In-flight request bound |
    /// | `PODBENCH_MAX_CLAIM_DEPTH` | Claim gathering bound |
    /// | `PODBENCH_TIMEOUT` | Request timeout in seconds |
    pub fn from_env() -> Self {
        Self {
            idp_url: std::env::var("PODBENCH_IDP_URL").unwrap_or_else(|_| default_idp_url()),
            email: std::env::var("PODBENCH_EMAIL").ok().filter(|v| !v.is_empty()),
            password: std::env::var("PODBENCH_PASSWORD").unwrap_or_else(|_| default_password()),
            web_id: std::env::var("PODBENCH_WEBID").ok().filter(|v| !v.is_empty()),
            credential_name: default_credential_name(),
            cache_enabled: std::env::var("PODBENCH_CACHE")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            cache_file: std::env::var("PODBENCH_CACHE_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_cache_file()),
            max_concurrent_requests: std::env::var("PODBENCH_MAX_CONCURRENT")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or_else(default_max_concurrent),
            max_claim_depth: std::env::var("PODBENCH_MAX_CLAIM_DEPTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_max_claim_depth),
            timeout_secs: std::env::var("PODBENCH_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok()),
        }
    }

    /// Set the identity provider URL.
    pub fn with_idp_url(mut self, url: impl Into<String>) -> Self {
        self.idp_url = url.into();
        self
    }

    /// Set the account used for enrollment.
    pub fn with_account(mut self, email: impl Into<String>, web_id: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self.web_id = Some(web_id.into());
        self
    }

    /// Persist the cache to `path`.
    pub fn with_cache_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_enabled = true;
        self.cache_file = path.into();
        self
    }

    /// Set the in-flight request bound.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_requests = max;
        self
    }

    /// Set the claim gathering bound.
    pub fn with_max_claim_depth(mut self, depth: u32) -> Self {
        self.max_claim_depth = depth;
        self
    }
}

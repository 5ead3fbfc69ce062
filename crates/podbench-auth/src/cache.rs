//! Persistent authorization cache.
//!
//! Holds everything the ticket flow can reuse across requests:
//!
//! ```text
//! {
//!   "authorizationServers": { "<origin>": "<as uri>" },
//!   "asMetadata":           { "<as uri>": { "token_endpoint": ... } },
//!   "credentials":          { "<METHOD> <url>": { "token_type", "access_token" } },
//!   "publicResources":      [ "<url>", ... ]
//! }
//! ```
//!
//! Every mutation rewrites the whole file through a temp file and a rename, so
//! readers never see a partial write. There is no cross-process lock: two
//! processes sharing one file race and the last writer wins.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult};
use crate::types::{AsMetadata, BearerCredential};

#[path = "cache_next/mod.rs"]
mod cache_next;

/// On-disk layout of the cache file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CacheState {
    #[serde(default)]
    pub authorization_servers: BTreeMap<String, String>,

    #[serde(default)]
    pub as_metadata: BTreeMap<String, AsMetadata>,

    /// Older cache files only carry this map, under `umaPermissionTokens`.
    #[serde(default, alias = "umaPermissionTokens")]
    pub credentials: BTreeMap<String, BearerCredential>,

    #[serde(default)]
    pub public_resources: BTreeSet<String>,
}

/// Cache shared by every request of one client instance.
#[derive(Debug)]
pub struct PersistentCache {
    /// Backing file. `None` keeps the cache in memory only.
    path: Option<PathBuf>,
    state: RwLock<CacheState>,
}

impl PersistentCache {
    /// In-memory cache with no backing file.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: RwLock::new(CacheState::default()),
        }
    }

    /// Load the cache backed by `path`.
    ///
    /// A missing file is a cold start. A corrupt file is logged and also
    /// treated as a cold start.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = cache_next::io::read_state_impl(&path)
            .await
            .unwrap_or_default();
        debug!(
            path = %path.display(),
            credentials = state.credentials.len(),
            public = state.public_resources.len(),
            "loaded authorization cache"
        );
        Self {
            path: Some(path),
            state: RwLock::new(state),
        }
    }

    /// Build the cache described by `config`.
    pub async fn from_config(config: &AuthConfig) -> Self {
        if config.cache_enabled {
            Self::load(&config.cache_file).await
        } else {
            Self::in_memory()
        }
    }

    /// Delete the cache file at `path`. A missing file is not an error.
    pub async fn reset(path: &Path) -> AuthResult<()> {
        cache_next::io::remove_file_impl(path).await?;
        debug!(path = %path.display(), "cache reset");
        Ok(())
    }

    /// Backing file, if persistence is enabled.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_persistent(&self) -> bool {
        self.path.is_some()
    }

    /// Write the current state to the backing file. No-op in memory mode.
    pub async fn save(&self) -> AuthResult<()> {
        let state = self.state.read().await;
        self.persist(&state).await
    }

    async fn persist(&self, state: &CacheState) -> AuthResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = serde_json::to_string(state).map_err(|e| AuthError::Cache {
            message: format!("failed to serialize cache: {}", e),
        })?;
        cache_next::io::write_atomic_impl(path, &content).await
    }

    /// Apply `f` and persist while still holding the write lock.
    async fn mutate<F>(&self, f: F) -> AuthResult<()>
    where
        F: FnOnce(&mut CacheState),
    {
        let mut state = self.state.write().await;
        f(&mut state);
        self.persist(&state).await
    }

    /// Authorization server responsible for `origin`.
    pub async fn get_as(&self, origin: &str) -> Option<String> {
        self.state
            .read()
            .await
            .authorization_servers
            .get(origin)
            .cloned()
    }

    pub async fn set_as(&self, origin: &str, as_uri: &str) -> AuthResult<()> {
        self.mutate(|state| {
            state
                .authorization_servers
                .insert(origin.to_string(), as_uri.to_string());
        })
        .await
    }

    /// Discovered metadata for an authorization server.
    pub async fn get_as_metadata(&self, as_uri: &str) -> Option<AsMetadata> {
        self.state.read().await.as_metadata.get(as_uri).cloned()
    }

    pub async fn set_as_metadata(&self, as_uri: &str, metadata: AsMetadata) -> AuthResult<()> {
        self.mutate(|state| {
            state.as_metadata.insert(as_uri.to_string(), metadata);
        })
        .await
    }

    pub async fn is_public(&self, url: &str) -> bool {
        self.state.read().await.public_resources.contains(url)
    }

    /// Mark `url` as servable without credentials. Drops any credential cached
    /// for it.
    pub async fn mark_public(&self, url: &str) -> AuthResult<()> {
        self.mutate(|state| {
            state.public_resources.insert(url.to_string());
            state
                .credentials
                .retain(|key, _| cache_next::keys::url_of_key_impl(key) != Some(url));
        })
        .await
    }

    pub async fn unmark_public(&self, url: &str) -> AuthResult<()> {
        self.mutate(|state| {
            state.public_resources.remove(url);
        })
        .await
    }

    /// Credential cached for `(method, url)`.
    pub async fn get_credential(&self, method: &str, url: &str) -> Option<BearerCredential> {
        let key = cache_next::keys::credential_key_impl(method, url);
        self.state.read().await.credentials.get(&key).cloned()
    }

    /// Cache a credential for `(method, url)`. Clears the public marker for `url`.
    pub async fn set_credential(
        &self,
        method: &str,
        url: &str,
        credential: BearerCredential,
    ) -> AuthResult<()> {
        let key = cache_next::keys::credential_key_impl(method, url);
        self.mutate(|state| {
            state.public_resources.remove(url);
            state.credentials.insert(key, credential);
        })
        .await
    }

    pub async fn evict_credential(&self, method: &str, url: &str) -> AuthResult<()> {
        let key = cache_next::keys::credential_key_impl(method, url);
        self.mutate(|state| {
            state.credentials.remove(&key);
        })
        .await
    }
}

impl Default for PersistentCache {
    fn default() -> Self {
        Self::in_memory()
    }
}

//! Filesystem boundary for the cache: read, atomic write, delete.

use std::io::ErrorKind;
use std::path::Path;

use tokio::fs;
use tracing::{debug, warn};

use super::keys::temp_path_impl;
use crate::cache::CacheState;
use crate::error::{AuthError, AuthResult};

/// Read the cache file. `None` for a missing or unreadable file.
pub(crate) async fn read_state_impl(path: &Path) -> Option<CacheState> {
    let raw = match fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no cache file, starting cold");
            return None;
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cache file unreadable, starting cold");
            return None;
        }
    };

    match serde_json::from_str(&raw) {
        Ok(state) => Some(state),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cache file corrupt, starting cold");
            None
        }
    }
}

pub(crate) async fn write_atomic_impl(path: &Path, content: &str) -> AuthResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| AuthError::Cache {
                message: format!("failed to create cache directory: {}", e),
            })?;
    }

    let temp_path = temp_path_impl(path);

    fs::write(&temp_path, content)
        .await
        .map_err(|e| AuthError::Cache {
            message: format!("failed to write temp file: {}", e),
        })?;

    fs::rename(&temp_path, path)
        .await
        .map_err(|e| AuthError::Cache {
            message: format!("failed to rename temp file: {}", e),
        })?;

    Ok(())
}

pub(crate) async fn remove_file_impl(path: &Path) -> AuthResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(AuthError::Cache {
            message: format!("failed to remove {}: {}", path.display(), e),
        }),
    }
}

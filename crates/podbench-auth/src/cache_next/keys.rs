//! Key and path derivation for the cache.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Credential key: `"<METHOD> <url>"`.
pub(crate) fn credential_key_impl(method: &str, url: &str) -> String {
    format!("{} {}", method.to_ascii_uppercase(), url)
}

/// URL part of a credential key.
pub(crate) fn url_of_key_impl(key: &str) -> Option<&str> {
    key.split_once(' ').map(|(_, url)| url)
}

/// Sibling temp file: `<file name>.tmp`.
pub(crate) fn temp_path_impl(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("cache"));
    name.push(".tmp");
    path.with_file_name(name)
}

//! Pure helpers: URL shaping, method scopes and header values (no HTTP).

use reqwest::header::HeaderValue;
use reqwest::Method;
use url::Url;

use crate::error::{AuthError, AuthResult};

/// `scheme://host[:port]` of `url`, the key of the AS record.
pub(crate) fn origin(url: &str) -> Option<String> {
    let origin = Url::parse(url).ok()?.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}

/// Resource id used for ticket-less exchanges: the URL without its fragment.
pub(crate) fn strip_fragment(url: &str) -> &str {
    url.split_once('#').map_or(url, |(base, _)| base)
}

/// Scope requested for `method` on a ticket-less exchange.
pub(crate) fn scope_for_method(method: &Method) -> &'static str {
    match method.as_str() {
        "GET" | "HEAD" => "read",
        "POST" => "create",
        "PUT" | "PATCH" => "write",
        "DELETE" => "delete",
        _ => "read",
    }
}

/// Header value from a token or credential string. Control characters are
/// rejected.
pub(crate) fn header_value(value: &str) -> AuthResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| AuthError::InvalidResponse {
        message: format!("value is not a valid header: {}", e),
    })
}

/// Event stream location for a resource: `{resource}/events` without a
/// doubled slash.
pub(crate) fn events_url(resource: &str, events_path: &str) -> String {
    format!(
        "{}/{}",
        resource.trim_end_matches('/'),
        events_path.trim_start_matches('/')
    )
}

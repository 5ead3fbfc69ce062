//! Parsing of UMA challenges and the stream `Link` header.
//!
//! A protected resource answers an unauthorized request with:
//!
//! ```text
//! HTTP/1.1 401 Unauthorized
//! WWW-Authenticate: UMA as_uri="https://as.example", ticket="T1"
//! ```
//!
//! Parameters may appear in any order, with any whitespace after the commas.
//! `as_location` is accepted as a synonym for `as_uri`.

use std::sync::OnceLock;

use regex::Regex;
use reqwest::header::{HeaderMap, LINK, WWW_AUTHENTICATE};

/// Link relation of the secondary service-token endpoint.
pub const SERVICE_TOKEN_REL: &str = "service-token-endpoint";

/// Authorization server location plus the ticket it issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub as_uri: String,
    pub ticket: String,
}

impl Challenge {
    /// Parse a single `WWW-Authenticate` value. `None` unless it is a UMA
    /// challenge carrying both an AS location and a ticket.
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim_start();
        let (scheme, rest) = header.split_at(header.find(char::is_whitespace)?);
        if !scheme.eq_ignore_ascii_case("UMA") {
            return None;
        }

        let mut as_uri = None;
        let mut ticket = None;
        for (key, value) in auth_params(rest) {
            match key.to_ascii_lowercase().as_str() {
                "as_uri" | "as_location" => as_uri = Some(value),
                "ticket" => ticket = Some(value),
                _ => {}
            }
        }

        Some(Self {
            as_uri: as_uri.filter(|v| !v.is_empty())?,
            ticket: ticket.filter(|v| !v.is_empty())?,
        })
    }

    /// First UMA challenge among the response's `WWW-Authenticate` headers.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        headers
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(Self::parse)
    }
}

/// Split `key=value` auth-params, honouring quoted values with escapes.
fn auth_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut rest = input;

    loop {
        rest = rest.trim_start_matches(|c: char| c == ',' || c.is_whitespace());
        let Some(eq) = rest.find('=') else {
            break;
        };
        let key = rest[..eq].trim().to_string();
        let Some((value, consumed)) = param_value(&rest[eq + 1..]) else {
            break;
        };
        params.push((key, value));
        rest = &rest[eq + 1 + consumed..];
    }

    params
}

/// Read one value from the start of `fragment`. Returns the value and the
/// number of bytes consumed.
fn param_value(fragment: &str) -> Option<(String, usize)> {
    let trimmed = fragment.trim_start();
    let leading_ws = fragment.len() - trimmed.len();

    if let Some(quoted) = trimmed.strip_prefix('"') {
        let mut escaped = false;
        let mut value = String::new();
        for (idx, ch) in quoted.char_indices() {
            if escaped {
                value.push(ch);
                escaped = false;
                continue;
            }
            match ch {
                '\\' => escaped = true,
                '"' => return Some((value, leading_ws + idx + 2)),
                _ => value.push(ch),
            }
        }
        None
    } else {
        let end = trimmed
            .find(|c: char| c == ',' || c.is_whitespace())
            .unwrap_or(trimmed.len());
        Some((trimmed[..end].to_string(), leading_ws + end))
    }
}

fn service_link_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"<([^>]+)>;\s*rel="service-token-endpoint""#)
            .unwrap_or_else(|e| panic!("service link regex must compile: {}", e))
    })
}

/// Target of the `rel="service-token-endpoint"` link in a `Link` value.
pub fn service_token_endpoint(link: &str) -> Option<String> {
    service_link_regex()
        .captures(link)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Service-token endpoint across all `Link` headers of a response.
pub fn service_token_endpoint_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(service_token_endpoint)
}

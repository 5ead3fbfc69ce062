//! HTTP layer: the one place outbound requests are sent.
//!
//! Every request takes a [`ConcurrencyGate`] slot before it is sent and gives
//! it back once the response headers arrive. Body reads happen outside the
//! gate.
//!
//! The configured timeout bounds connecting and each ordinary request. Event
//! streams only get the connect bound, since their body stays open.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult};
use crate::gate::ConcurrencyGate;

const USER_AGENT_VALUE: &str = concat!("podbench-auth/", env!("CARGO_PKG_VERSION"));

/// Gated reqwest client shared by every component of one client instance.
#[derive(Debug, Clone)]
pub(crate) struct HttpBackend {
    pub(crate) client: reqwest::Client,
    pub(crate) gate: ConcurrencyGate,
    timeout: Option<Duration>,
}

impl HttpBackend {
    pub(crate) fn new(config: &AuthConfig) -> AuthResult<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let timeout = config.timeout_secs.map(Duration::from_secs);
        let mut builder = reqwest::Client::builder().default_headers(default_headers);
        if let Some(timeout) = timeout {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder.build().map_err(|e| AuthError::Network {
            message: format!("failed to create HTTP client: {}", e),
        })?;

        Ok(Self {
            client,
            gate: ConcurrencyGate::new(config.max_concurrent_requests),
            timeout,
        })
    }

    /// Request bounded by the configured timeout, body included.
    pub(crate) fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let request = self.client.request(method, url);
        match self.timeout {
            Some(timeout) => request.timeout(timeout),
            None => request,
        }
    }

    /// Request whose body may stay open indefinitely. Only connecting is
    /// bounded.
    pub(crate) fn stream_request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client.request(method, url)
    }

    /// Send through the gate. The slot is held until response headers arrive.
    pub(crate) async fn send(&self, request: RequestBuilder) -> AuthResult<Response> {
        let _permit = self.gate.acquire().await?;
        let response = request.send().await?;
        debug!(
            url = %response.url(),
            status = response.status().as_u16(),
            active = self.gate.active(),
            "response received"
        );
        Ok(response)
    }

    /// Gated `GET` decoding a JSON body. Non-success statuses are errors.
    pub(crate) async fn get_json<T: DeserializeOwned>(&self, url: &str) -> AuthResult<T> {
        let response = self.send(self.request(Method::GET, url)).await?;
        read_json(response).await
    }

    /// Gated `POST` of a JSON body. The raw response is returned so callers
    /// can branch on status.
    pub(crate) async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
        headers: HeaderMap,
    ) -> AuthResult<Response> {
        let request = self
            .request(Method::POST, url)
            .headers(headers)
            .header(CONTENT_TYPE, "application/json")
            .json(body);
        self.send(request).await
    }
}

/// Decode a success response as JSON. Anything else carries the body text in
/// the error.
pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> AuthResult<T> {
    let status = response.status();
    let url = response.url().to_string();

    if !status.is_success() {
        let message = response.text().await.unwrap_or_else(|_| status.to_string());
        return Err(AuthError::InvalidResponse {
            message: format!("{} returned HTTP {}: {}", url, status.as_u16(), message),
        });
    }

    response
        .json()
        .await
        .map_err(|e| AuthError::InvalidResponse {
            message: format!("failed to parse response from {}: {}", url, e),
        })
}

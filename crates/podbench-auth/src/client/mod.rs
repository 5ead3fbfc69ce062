//! Protected-resource client.
//!
//! `fetch` layers the cache and the resolver around one logical request:
//!
//! 1. known public resource: send it bare
//! 2. cached credential for `(method, url)`: send it with that credential
//! 3. AS known for the origin: ticket-less exchange, then send
//! 4. bare request; a non-challenge marks the URL public
//! 5. resolve the challenge, cache the credential and the AS, retry
//!
//! A challenge met in step 1 or 2 is resolved directly instead of repeating
//! the bare request. All status handling beyond "is this a challenge" is left
//! to the caller.

use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{Method, Response, StatusCode};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::cache::PersistentCache;
use crate::challenge::Challenge;
use crate::config::AuthConfig;
use crate::enroll::Enrollment;
use crate::error::{AuthError, AuthResult};
use crate::gate::ConcurrencyGate;
use crate::proof::{Ed25519ProofSigner, ProofSigner};
use crate::readiness::{self, ReadinessChannel, ReadinessOptions};
use crate::resolver::{ChallengeResolver, Resolution};
use crate::types::{AccessToken, BearerCredential};

pub(crate) mod helpers;
pub(crate) mod http;

use http::HttpBackend;

/// Headers and body of a request. Reused unchanged for every attempt.
#[derive(Debug, Clone, Default)]
pub struct RequestInit {
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl RequestInit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header. Invalid names or values are rejected.
    pub fn with_header(mut self, name: &str, value: &str) -> AuthResult<Self> {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| AuthError::Config {
            message: format!("invalid header name `{}`: {}", name, e),
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| AuthError::Config {
            message: format!("invalid header value for `{}`: {}", name, e),
        })?;
        self.headers.append(name, value);
        Ok(self)
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// Client for resources behind an UMA authorization server.
#[derive(Debug, Clone)]
pub struct PodClient {
    config: AuthConfig,
    http: HttpBackend,
    cache: Arc<PersistentCache>,
    signer: Arc<dyn ProofSigner>,
    access_token: Arc<RwLock<Option<AccessToken>>>,
    resolver: ChallengeResolver,
}

impl PodClient {
    /// Client with a fresh keypair and the cache described by `config`.
    pub async fn new(config: AuthConfig) -> AuthResult<Self> {
        let cache = Arc::new(PersistentCache::from_config(&config).await);
        Self::with_parts(config, cache, Arc::new(Ed25519ProofSigner::generate()))
    }

    pub async fn from_env() -> AuthResult<Self> {
        Self::new(AuthConfig::from_env()).await
    }

    /// Client over an explicitly provided cache and signer.
    pub fn with_parts(
        config: AuthConfig,
        cache: Arc<PersistentCache>,
        signer: Arc<dyn ProofSigner>,
    ) -> AuthResult<Self> {
        let http = HttpBackend::new(&config)?;
        let access_token = Arc::new(RwLock::new(None));
        let resolver = ChallengeResolver::new(
            http.clone(),
            signer.clone(),
            access_token.clone(),
            Some(cache.clone()),
            config.max_claim_depth,
        );

        Ok(Self {
            config,
            http,
            cache,
            signer,
            access_token,
            resolver,
        })
    }

    /// Enroll with the identity provider and obtain the access token every
    /// identity claim is built from.
    pub async fn init(&self) -> AuthResult<()> {
        let enrollment = Enrollment::new(&self.http, &self.config);
        let identity = enrollment.enroll().await?;
        let token = enrollment
            .request_access_token(&identity, self.signer.as_ref())
            .await?;
        self.set_access_token(token).await;
        info!(idp = %self.config.idp_url, "client initialized");
        Ok(())
    }

    /// Install an access token obtained elsewhere.
    pub async fn set_access_token(&self, token: AccessToken) {
        *self.access_token.write().await = Some(token);
    }

    pub async fn with_access_token(self, token: AccessToken) -> Self {
        self.set_access_token(token).await;
        self
    }

    pub async fn is_initialized(&self) -> bool {
        self.access_token.read().await.is_some()
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<PersistentCache> {
        &self.cache
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.http.gate
    }

    /// Event-stream channel sharing this client's identity and gate but not
    /// its cache.
    pub fn readiness(&self) -> ReadinessChannel {
        ReadinessChannel::new(self.http.clone(), self.resolver.clone())
    }

    /// Wait until `resource` reports readiness on its event stream and
    /// answers a `GET`.
    pub async fn wait_until_ready(
        &self,
        resource: &str,
        options: &ReadinessOptions,
    ) -> AuthResult<()> {
        readiness::wait_until_ready(self, resource, options).await
    }

    pub async fn get(&self, url: &str) -> AuthResult<Response> {
        self.fetch(Method::GET, url, RequestInit::default()).await
    }

    /// Send `method url`, authorizing it through the UMA flow if challenged.
    ///
    /// Returns the final response whatever its status. Errors are transport
    /// failures and failed resolutions.
    pub async fn fetch(
        &self,
        method: Method,
        url: &str,
        init: RequestInit,
    ) -> AuthResult<Response> {
        let method_name = method.as_str().to_string();
        let mut challenged: Option<Response> = None;

        if self.cache.is_public(url).await {
            let response = self.send(&method, url, &init, None).await?;
            if !is_challenge(&response) {
                return Ok(response);
            }
            debug!(url = %url, "public resource now challenges");
            remember(self.cache.unmark_public(url).await);
            challenged = Some(response);
        }

        if let Some(credential) = self.cache.get_credential(&method_name, url).await {
            debug!(url = %url, method = %method_name, "using cached credential");
            let response = self.send(&method, url, &init, Some(&credential)).await?;
            if !is_challenge(&response) {
                return Ok(response);
            }
            debug!(url = %url, method = %method_name, "cached credential rejected, evicting");
            remember(self.cache.evict_credential(&method_name, url).await);
            challenged = Some(response);
        }

        let origin = helpers::origin(url);

        if challenged.is_none() {
            match self
                .try_known_as(&method, url, &init, origin.as_deref())
                .await?
            {
                KnownAs::Authorized(response) => return Ok(response),
                KnownAs::Challenged(response) => challenged = Some(response),
                KnownAs::Unavailable => {}
            }
        }

        let response = match challenged {
            Some(response) => response,
            None => {
                let response = self.send(&method, url, &init, None).await?;
                if !is_challenge(&response) {
                    debug!(url = %url, status = response.status().as_u16(), "marking public");
                    remember(self.cache.mark_public(url).await);
                    return Ok(response);
                }
                response
            }
        };

        let Some(challenge) = Challenge::from_headers(response.headers()) else {
            warn!(url = %url, "401 without an UMA challenge, returning it unchanged");
            return Ok(response);
        };

        match self.resolver.resolve(&challenge).await? {
            Resolution::Aborted => Ok(response),
            Resolution::Resolved { credential, as_uri } => {
                remember(
                    self.cache
                        .set_credential(&method_name, url, credential.clone())
                        .await,
                );
                if let Some(origin) = origin.as_deref() {
                    remember(self.cache.set_as(origin, &as_uri).await);
                }
                debug!(url = %url, method = %method_name, "retrying with new credential");
                self.send(&method, url, &init, Some(&credential)).await
            }
        }
    }

    /// Ticket-less exchange at the origin's known AS.
    async fn try_known_as(
        &self,
        method: &Method,
        url: &str,
        init: &RequestInit,
        origin: Option<&str>,
    ) -> AuthResult<KnownAs> {
        let Some(origin) = origin else {
            return Ok(KnownAs::Unavailable);
        };
        let Some(as_uri) = self.cache.get_as(origin).await else {
            return Ok(KnownAs::Unavailable);
        };

        let credential = match self
            .resolver
            .exchange_permissions(&as_uri, url, method)
            .await
        {
            Ok(credential) => credential,
            Err(e) => {
                debug!(url = %url, as_uri = %as_uri, error = %e, "ticket-less exchange failed, falling back");
                return Ok(KnownAs::Unavailable);
            }
        };

        let response = self.send(method, url, init, Some(&credential)).await?;
        if is_challenge(&response) {
            return Ok(KnownAs::Challenged(response));
        }
        remember(
            self.cache
                .set_credential(method.as_str(), url, credential)
                .await,
        );
        Ok(KnownAs::Authorized(response))
    }

    async fn send(
        &self,
        method: &Method,
        url: &str,
        init: &RequestInit,
        credential: Option<&BearerCredential>,
    ) -> AuthResult<Response> {
        let mut headers = init.headers.clone();
        if let Some(credential) = credential {
            let value = helpers::header_value(&credential.header_value())?;
            headers.insert(AUTHORIZATION, value);
        }

        let mut request = self.http.request(method.clone(), url).headers(headers);
        if let Some(body) = &init.body {
            request = request.body(body.clone());
        }
        self.http.send(request).await
    }
}

/// Outcome of the known-AS shortcut.
enum KnownAs {
    /// No AS recorded for the origin, or the exchange failed.
    Unavailable,
    Authorized(Response),
    /// The new credential was still challenged.
    Challenged(Response),
}

fn is_challenge(response: &Response) -> bool {
    response.status() == StatusCode::UNAUTHORIZED
}

/// Cache writes never fail a request.
fn remember(result: AuthResult<()>) {
    if let Err(e) = result {
        warn!(error = %e, "cache update failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_init_rejects_bad_header() {
        assert!(RequestInit::new().with_header("bad header", "x").is_err());
        let init = RequestInit::new()
            .with_header("content-type", "text/turtle")
            .unwrap()
            .with_body("<a> <b> <c> .");
        assert_eq!(init.headers.get("content-type").unwrap(), "text/turtle");
        assert_eq!(init.body.as_deref(), Some(&b"<a> <b> <c> ."[..]));
    }

    #[tokio::test]
    async fn test_client_starts_uninitialized() {
        let client = PodClient::new(AuthConfig::default()).await.unwrap();
        assert!(!client.is_initialized().await);
        assert!(!client.cache().is_persistent());
        assert_eq!(client.gate().max(), 30);

        let client = client.with_access_token(AccessToken::new("t")).await;
        assert!(client.is_initialized().await);
    }
}

//! Turns an UMA challenge into a bearer credential.
//!
//! # Flow
//!
//! ```text
//! 401 + ticket ──► discover token endpoint (cached per AS)
//!                 │
//!                 ▼
//!          POST ticket + identity claim ──► 200 ──► credential
//!                 │
//!                403 + required_claims
//!                 │
//!                 ▼
//!          for each required claim:
//!              POST {issuer}/token with permissions (nested, same rules)
//!                 │
//!                 ▼
//!          POST ticket + accumulated claims ──► ...
//! ```
//!
//! Nested gathering is bounded by a depth counter and refuses to satisfy the
//! same `(issuer, resource, scopes)` twice in one resolution.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::cache::PersistentCache;
use crate::challenge::Challenge;
use crate::client::helpers::{scope_for_method, strip_fragment};
use crate::client::http::HttpBackend;
use crate::error::{AuthError, AuthResult};
use crate::proof::ProofSigner;
use crate::types::{
    AccessToken, AsMetadata, BearerCredential, Claim, ExchangeDenied, ExchangeRequest,
    ExchangeResponse, PermissionRequest, RequiredClaim, RequiredClaimDetails, ResourcePermission,
    ACCESS_TOKEN_FORMAT, ID_TOKEN_FORMAT,
};

/// Outcome of resolving a challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A credential for the challenged request, plus the AS that issued it.
    Resolved {
        credential: BearerCredential,
        as_uri: String,
    },
    /// The AS could not be discovered. The caller keeps the original response.
    Aborted,
}

/// Discovery, exchange and claim gathering for one client instance.
#[derive(Debug, Clone)]
pub struct ChallengeResolver {
    http: HttpBackend,
    signer: Arc<dyn ProofSigner>,
    access_token: Arc<RwLock<Option<AccessToken>>>,
    cache: Option<Arc<PersistentCache>>,
    max_claim_depth: u32,
}

/// Per-resolution bookkeeping for nested claim gathering.
#[derive(Debug)]
struct ClaimGuard {
    depth: u32,
    max_depth: u32,
    satisfied: HashSet<(String, String, Vec<String>)>,
}

impl ClaimGuard {
    fn new(max_depth: u32) -> Self {
        Self {
            depth: 0,
            max_depth,
            satisfied: HashSet::new(),
        }
    }

    fn descend(&mut self) -> AuthResult<()> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(AuthError::ClaimDepthExceeded {
                max_depth: self.max_depth,
            });
        }
        Ok(())
    }

    fn visit(&mut self, details: &RequiredClaimDetails) -> AuthResult<()> {
        let mut scopes = details.resource_scopes.clone();
        scopes.sort();
        let key = (details.issuer.clone(), details.resource_id.clone(), scopes);
        if !self.satisfied.insert(key) {
            return Err(AuthError::ClaimCycle {
                issuer: details.issuer.clone(),
                resource_id: details.resource_id.clone(),
            });
        }
        Ok(())
    }
}

impl ChallengeResolver {
    pub(crate) fn new(
        http: HttpBackend,
        signer: Arc<dyn ProofSigner>,
        access_token: Arc<RwLock<Option<AccessToken>>>,
        cache: Option<Arc<PersistentCache>>,
        max_claim_depth: u32,
    ) -> Self {
        Self {
            http,
            signer,
            access_token,
            cache,
            max_claim_depth,
        }
    }

    /// Same identity and gate, no cache. Nothing it discovers is remembered.
    pub fn detached(&self) -> Self {
        Self {
            cache: None,
            ..self.clone()
        }
    }

    /// Resolve a parsed challenge into a credential.
    ///
    /// Discovery failure yields [`Resolution::Aborted`]. Exchange and claim
    /// gathering failures are errors.
    pub async fn resolve(&self, challenge: &Challenge) -> AuthResult<Resolution> {
        let token_endpoint = match self.token_endpoint(&challenge.as_uri).await {
            Ok(endpoint) => endpoint,
            Err(AuthError::DiscoveryUnavailable { as_uri }) => {
                warn!(as_uri = %as_uri, "authorization server discovery failed, aborting resolution");
                return Ok(Resolution::Aborted);
            }
            Err(e) => return Err(e),
        };

        debug!(
            as_uri = %challenge.as_uri,
            token_endpoint = %token_endpoint,
            "exchanging ticket"
        );

        let mut guard = ClaimGuard::new(self.max_claim_depth);
        let credential = self
            .exchange(
                &token_endpoint,
                PermissionRequest::Ticket(challenge.ticket.clone()),
                None,
                &mut guard,
            )
            .await?;

        Ok(Resolution::Resolved {
            credential,
            as_uri: challenge.as_uri.clone(),
        })
    }

    /// Ticket-less exchange for `method` on `resource_url` at a known AS.
    pub async fn exchange_permissions(
        &self,
        as_uri: &str,
        resource_url: &str,
        method: &Method,
    ) -> AuthResult<BearerCredential> {
        let token_endpoint = self.token_endpoint(as_uri).await?;
        let permissions = vec![ResourcePermission {
            resource_id: strip_fragment(resource_url).to_string(),
            resource_scopes: vec![scope_for_method(method).to_string()],
        }];

        let mut guard = ClaimGuard::new(self.max_claim_depth);
        self.exchange(
            &token_endpoint,
            PermissionRequest::Permissions(permissions),
            None,
            &mut guard,
        )
        .await
    }

    /// Token endpoint of `as_uri`, from the cache or by discovery.
    pub async fn token_endpoint(&self, as_uri: &str) -> AuthResult<String> {
        if let Some(cache) = &self.cache {
            if let Some(metadata) = cache.get_as_metadata(as_uri).await {
                return Ok(metadata.token_endpoint);
            }
        }

        let url = format!(
            "{}/.well-known/uma2-configuration",
            as_uri.trim_end_matches('/')
        );
        let metadata: AsMetadata = self.http.get_json(&url).await.map_err(|e| {
            warn!(url = %url, error = %e, "discovery request failed");
            AuthError::DiscoveryUnavailable {
                as_uri: as_uri.to_string(),
            }
        })?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.set_as_metadata(as_uri, metadata.clone()).await {
                warn!(error = %e, "failed to cache AS metadata");
            }
        }

        Ok(metadata.token_endpoint)
    }

    /// Identity claim: the access token plus a proof bound to the endpoint
    /// it is presented at.
    async fn identity_claim(&self, token_endpoint: &str) -> AuthResult<Claim> {
        let access_token =
            self.access_token
                .read()
                .await
                .clone()
                .ok_or_else(|| AuthError::NotInitialized {
                    what: "access token".to_string(),
                })?;
        let proof = self.signer.sign(token_endpoint, Method::POST.as_str())?;

        let claim_token = serde_json::json!({
            "Authorization": format!("DPoP {}", access_token.token),
            "DPoP": proof,
        })
        .to_string();

        Ok(Claim {
            claim_token,
            claim_token_format: ID_TOKEN_FORMAT.to_string(),
        })
    }

    /// POST to the token endpoint, gathering claims on 403 until the AS
    /// answers with a token or a hard refusal.
    fn exchange<'a>(
        &'a self,
        token_endpoint: &'a str,
        request: PermissionRequest,
        claims: Option<Vec<Claim>>,
        guard: &'a mut ClaimGuard,
    ) -> BoxFuture<'a, AuthResult<BearerCredential>> {
        Box::pin(async move {
            let mut request = request;
            let mut claims = claims;

            loop {
                let (body, claims_used) = match claims.take() {
                    Some(claims) => (ExchangeRequest::with_claims(&request, claims.clone()), claims),
                    None => {
                        let claim = self.identity_claim(token_endpoint).await?;
                        (
                            ExchangeRequest::with_claim(&request, claim.clone()),
                            vec![claim],
                        )
                    }
                };

                let response = self
                    .http
                    .post_json(token_endpoint, &body, HeaderMap::new())
                    .await?;
                let status = response.status();

                if status == StatusCode::FORBIDDEN {
                    let denied: ExchangeDenied =
                        response
                            .json()
                            .await
                            .map_err(|_| AuthError::ExchangeRejected {
                                status: status.as_u16(),
                                message: "403 without JSON body".to_string(),
                            })?;
                    if denied.required_claims.is_empty() {
                        return Err(AuthError::ExchangeRejected {
                            status: status.as_u16(),
                            message: "request denied with no required claims".to_string(),
                        });
                    }

                    guard.descend()?;
                    debug!(
                        token_endpoint = %token_endpoint,
                        required = denied.required_claims.len(),
                        depth = guard.depth,
                        "gathering required claims"
                    );

                    let gathered = self
                        .gather_claims(claims_used, &denied.required_claims, guard)
                        .await?;
                    if let Some(ticket) = denied.ticket {
                        request = PermissionRequest::Ticket(ticket);
                    }
                    claims = Some(gathered);
                    continue;
                }

                if !status.is_success() {
                    let message = response.text().await.unwrap_or_else(|_| status.to_string());
                    return Err(AuthError::ExchangeRejected {
                        status: status.as_u16(),
                        message,
                    });
                }

                let granted: ExchangeResponse =
                    response
                        .json()
                        .await
                        .map_err(|e| AuthError::InvalidResponse {
                            message: format!("failed to parse token response: {}", e),
                        })?;
                return Ok(BearerCredential::new(
                    granted.token_type,
                    granted.access_token,
                ));
            }
        })
    }

    /// Satisfy each required claim with a nested ticket-less exchange.
    async fn gather_claims(
        &self,
        mut claims: Vec<Claim>,
        required: &[RequiredClaim],
        guard: &mut ClaimGuard,
    ) -> AuthResult<Vec<Claim>> {
        for required_claim in required {
            if required_claim.claim_token_format != ACCESS_TOKEN_FORMAT {
                return Err(AuthError::UnsupportedClaimFormat {
                    format: required_claim.claim_token_format.clone(),
                });
            }
            let details =
                required_claim
                    .details
                    .as_ref()
                    .ok_or_else(|| AuthError::InvalidResponse {
                        message: "required claim has no details".to_string(),
                    })?;

            guard.visit(details)?;
            guard.descend()?;

            let endpoint = format!("{}/token", details.issuer.trim_end_matches('/'));
            debug!(
                issuer = %details.issuer,
                resource_id = %details.resource_id,
                "requesting derived access token"
            );
            let permissions = vec![ResourcePermission {
                resource_id: details.resource_id.clone(),
                resource_scopes: details.resource_scopes.clone(),
            }];
            let derived = self
                .exchange(
                    &endpoint,
                    PermissionRequest::Permissions(permissions),
                    None,
                    guard,
                )
                .await?;
            claims.push(Claim::access_token(derived.token));
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug)]
    struct FixedSigner;

    impl ProofSigner for FixedSigner {
        fn sign(&self, endpoint: &str, method: &str) -> AuthResult<String> {
            Ok(format!("proof:{}:{}", method, endpoint))
        }
    }

    fn resolver_with(cache: Option<Arc<PersistentCache>>, max_depth: u32) -> ChallengeResolver {
        let http = HttpBackend::new(&AuthConfig::default()).unwrap();
        ChallengeResolver::new(
            http,
            Arc::new(FixedSigner),
            Arc::new(RwLock::new(Some(AccessToken::new("id-token")))),
            cache,
            max_depth,
        )
    }

    async fn mount_discovery(server: &MockServer, as_path: &str) {
        Mock::given(method("GET"))
            .and(path(format!("{}/.well-known/uma2-configuration", as_path)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token_endpoint": format!("{}{}/token", server.uri(), as_path)
            })))
            .mount(server)
            .await;
    }

    fn required_claim(issuer: &str, resource_id: &str) -> serde_json::Value {
        json!({
            "claim_token_format": ACCESS_TOKEN_FORMAT,
            "details": {
                "issuer": issuer,
                "resource_id": resource_id,
                "resource_scopes": ["read"]
            }
        })
    }

    #[tokio::test]
    async fn test_resolve_ticket_with_identity_claim() {
        let server = MockServer::start().await;
        mount_discovery(&server, "/uma").await;
        Mock::given(method("POST"))
            .and(path("/uma/token"))
            .and(body_partial_json(json!({
                "grant_type": "urn:ietf:params:oauth:grant-type:uma-ticket",
                "ticket": "T1",
                "claim_token_format": ID_TOKEN_FORMAT
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "A1",
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let resolver = resolver_with(None, 8);
        let challenge = Challenge {
            as_uri: format!("{}/uma", server.uri()),
            ticket: "T1".to_string(),
        };
        let resolution = resolver.resolve(&challenge).await.unwrap();
        assert_eq!(
            resolution,
            Resolution::Resolved {
                credential: BearerCredential::new("Bearer", "A1"),
                as_uri: challenge.as_uri.clone(),
            }
        );

        let requests = server.received_requests().await.unwrap();
        let exchange = requests
            .iter()
            .find(|r| r.url.path() == "/uma/token")
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&exchange.body).unwrap();
        let claim: serde_json::Value =
            serde_json::from_str(body["claim_token"].as_str().unwrap()).unwrap();
        assert_eq!(claim["Authorization"], "DPoP id-token");
        assert_eq!(
            claim["DPoP"],
            format!("proof:POST:{}/uma/token", server.uri())
        );
    }

    #[tokio::test]
    async fn test_resolve_aborts_when_discovery_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/uma/.well-known/uma2-configuration"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let resolver = resolver_with(None, 8);
        let challenge = Challenge {
            as_uri: format!("{}/uma", server.uri()),
            ticket: "T1".to_string(),
        };
        assert_eq!(
            resolver.resolve(&challenge).await.unwrap(),
            Resolution::Aborted
        );
    }

    #[tokio::test]
    async fn test_required_claim_triggers_one_nested_exchange() {
        let server = MockServer::start().await;
        mount_discovery(&server, "/uma").await;
        let issuer = format!("{}/other", server.uri());

        // Resubmission carrying the gathered claim set succeeds.
        Mock::given(method("POST"))
            .and(path("/uma/token"))
            .and(body_partial_json(json!({ "ticket": "T2" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "FINAL",
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/uma/token"))
            .and(body_partial_json(json!({ "ticket": "T1" })))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "ticket": "T2",
                "required_claims": [required_claim(&issuer, "http://pods.local/bob/")]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/other/token"))
            .and(body_partial_json(json!({
                "permissions": [{ "resource_id": "http://pods.local/bob/", "resource_scopes": ["read"] }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "NESTED",
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let resolver = resolver_with(None, 8);
        let challenge = Challenge {
            as_uri: format!("{}/uma", server.uri()),
            ticket: "T1".to_string(),
        };
        let Resolution::Resolved { credential, .. } = resolver.resolve(&challenge).await.unwrap()
        else {
            panic!("expected a credential");
        };
        assert_eq!(credential.token, "FINAL");

        let requests = server.received_requests().await.unwrap();
        let resubmission = requests
            .iter()
            .filter(|r| r.url.path() == "/uma/token")
            .last()
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&resubmission.body).unwrap();
        let claims = body["claim_tokens"].as_array().unwrap();
        assert_eq!(claims.len(), 2);
        assert_eq!(claims[0]["claim_token_format"], ID_TOKEN_FORMAT);
        assert_eq!(claims[1]["claim_token"], "NESTED");
        assert_eq!(claims[1]["claim_token_format"], ACCESS_TOKEN_FORMAT);
    }

    #[tokio::test]
    async fn test_unsupported_claim_format_fails() {
        let server = MockServer::start().await;
        mount_discovery(&server, "/uma").await;
        Mock::given(method("POST"))
            .and(path("/uma/token"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "ticket": "T2",
                "required_claims": [{ "claim_token_format": "urn:example:unknown" }]
            })))
            .mount(&server)
            .await;

        let resolver = resolver_with(None, 8);
        let challenge = Challenge {
            as_uri: format!("{}/uma", server.uri()),
            ticket: "T1".to_string(),
        };
        let err = resolver.resolve(&challenge).await.unwrap_err();
        assert!(
            matches!(err, AuthError::UnsupportedClaimFormat { ref format } if format == "urn:example:unknown")
        );
    }

    #[tokio::test]
    async fn test_repeated_required_claim_is_a_cycle() {
        let server = MockServer::start().await;
        mount_discovery(&server, "/uma").await;
        let issuer = format!("{}/uma", server.uri());

        // Every exchange demands the same claim, including the nested one.
        Mock::given(method("POST"))
            .and(path("/uma/token"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "ticket": "T2",
                "required_claims": [required_claim(&issuer, "http://pods.local/loop")]
            })))
            .mount(&server)
            .await;

        let resolver = resolver_with(None, 8);
        let challenge = Challenge {
            as_uri: issuer.clone(),
            ticket: "T1".to_string(),
        };
        let err = resolver.resolve(&challenge).await.unwrap_err();
        assert!(matches!(err, AuthError::ClaimCycle { .. }), "{:?}", err);
    }

    #[tokio::test]
    async fn test_claim_depth_is_bounded() {
        let server = MockServer::start().await;
        mount_discovery(&server, "/uma").await;
        let issuer = format!("{}/nested", server.uri());

        Mock::given(method("POST"))
            .and(path("/uma/token"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "required_claims": [required_claim(&issuer, "http://pods.local/a")]
            })))
            .mount(&server)
            .await;

        let resolver = resolver_with(None, 1);
        let challenge = Challenge {
            as_uri: format!("{}/uma", server.uri()),
            ticket: "T1".to_string(),
        };
        let err = resolver.resolve(&challenge).await.unwrap_err();
        assert!(
            matches!(err, AuthError::ClaimDepthExceeded { max_depth: 1 }),
            "{:?}",
            err
        );
    }

    #[tokio::test]
    async fn test_exchange_rejection_carries_status_and_body() {
        let server = MockServer::start().await;
        mount_discovery(&server, "/uma").await;
        Mock::given(method("POST"))
            .and(path("/uma/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let resolver = resolver_with(None, 8);
        let challenge = Challenge {
            as_uri: format!("{}/uma", server.uri()),
            ticket: "T1".to_string(),
        };
        let err = resolver.resolve(&challenge).await.unwrap_err();
        assert!(matches!(
            err,
            AuthError::ExchangeRejected { status: 400, ref message } if message == "invalid_grant"
        ));
    }

    #[tokio::test]
    async fn test_discovery_is_cached_but_not_when_detached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/uma/.well-known/uma2-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token_endpoint": format!("{}/uma/token", server.uri())
            })))
            .expect(3)
            .mount(&server)
            .await;

        let cache = Arc::new(PersistentCache::in_memory());
        let resolver = resolver_with(Some(cache.clone()), 8);
        let as_uri = format!("{}/uma", server.uri());

        resolver.token_endpoint(&as_uri).await.unwrap();
        resolver.token_endpoint(&as_uri).await.unwrap();
        assert!(cache.get_as_metadata(&as_uri).await.is_some());

        let detached = resolver.detached();
        detached.token_endpoint(&as_uri).await.unwrap();
        detached.token_endpoint(&as_uri).await.unwrap();
    }

    #[tokio::test]
    async fn test_exchange_without_access_token_is_not_initialized() {
        let server = MockServer::start().await;
        mount_discovery(&server, "/uma").await;

        let http = HttpBackend::new(&AuthConfig::default()).unwrap();
        let resolver = ChallengeResolver::new(
            http,
            Arc::new(FixedSigner),
            Arc::new(RwLock::new(None)),
            None,
            8,
        );
        let err = resolver
            .exchange_permissions(
                &format!("{}/uma", server.uri()),
                "http://pods.local/a",
                &Method::GET,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NotInitialized { .. }));
    }
}

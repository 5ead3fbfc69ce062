//! Wire and domain types for the UMA ticket flow.

use serde::{Deserialize, Serialize};

/// Grant type URN for every ticket or permission exchange.
pub const UMA_TICKET_GRANT: &str = "urn:ietf:params:oauth:grant-type:uma-ticket";

/// Claim format of the initial identity claim built from the access token.
pub const ID_TOKEN_FORMAT: &str = "http://openid.net/specs/openid-connect-core-1_0.html#IDToken";

/// Claim format of derived access tokens gathered for `required_claims`.
pub const ACCESS_TOKEN_FORMAT: &str = "urn:ietf:params:oauth:token-type:access_token";

/// Client id/secret pair issued by the identity provider at enrollment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientIdentity {
    pub id: String,
    pub secret: String,
}

/// Possession-bound access token from the client-credentials grant.
///
/// Held in memory only; every claim token is built from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    #[serde(rename = "access_token")]
    pub token: String,

    #[serde(rename = "token_type", default = "default_dpop_type")]
    pub token_type: String,
}

fn default_dpop_type() -> String {
    "DPoP".to_string()
}

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            token_type: default_dpop_type(),
        }
    }
}

/// An assertion presented to the authorization server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub claim_token: String,
    pub claim_token_format: String,
}

impl Claim {
    /// Wrap a derived access token as a claim.
    pub fn access_token(token: impl Into<String>) -> Self {
        Self {
            claim_token: token.into(),
            claim_token_format: ACCESS_TOKEN_FORMAT.to_string(),
        }
    }
}

/// Final credential returned by a successful exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BearerCredential {
    pub token_type: String,

    #[serde(rename = "access_token")]
    pub token: String,
}

impl BearerCredential {
    pub fn new(token_type: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            token_type: token_type.into(),
            token: token.into(),
        }
    }

    /// Value for the `Authorization` header.
    pub fn header_value(&self) -> String {
        format!("{} {}", self.token_type, self.token)
    }
}

/// Discovered authorization server metadata (`/.well-known/uma2-configuration`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsMetadata {
    pub token_endpoint: String,
}

/// One entry of a ticket-less `permissions` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePermission {
    pub resource_id: String,
    pub resource_scopes: Vec<String>,
}

/// What an exchange asks for: a ticket, or direct permissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionRequest {
    Ticket(String),
    Permissions(Vec<ResourcePermission>),
}

/// Body of `POST {token_endpoint}`.
#[derive(Debug, Clone, Serialize)]
pub struct ExchangeRequest {
    pub grant_type: &'static str,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Vec<ResourcePermission>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_token: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_token_format: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_tokens: Option<Vec<Claim>>,
}

impl ExchangeRequest {
    /// First attempt: a single claim token.
    pub fn with_claim(request: &PermissionRequest, claim: Claim) -> Self {
        let mut body = Self::base(request);
        body.claim_token = Some(claim.claim_token);
        body.claim_token_format = Some(claim.claim_token_format);
        body
    }

    /// Resubmission after claim gathering: the accumulated claim set.
    pub fn with_claims(request: &PermissionRequest, claims: Vec<Claim>) -> Self {
        let mut body = Self::base(request);
        body.claim_tokens = Some(claims);
        body
    }

    fn base(request: &PermissionRequest) -> Self {
        let (ticket, permissions) = match request {
            PermissionRequest::Ticket(ticket) => (Some(ticket.clone()), None),
            PermissionRequest::Permissions(permissions) => (None, Some(permissions.clone())),
        };
        Self {
            grant_type: UMA_TICKET_GRANT,
            ticket,
            permissions,
            claim_token: None,
            claim_token_format: None,
            claim_tokens: None,
        }
    }
}

/// Successful exchange response.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeResponse {
    pub access_token: String,

    #[serde(default = "default_bearer_type")]
    pub token_type: String,
}

fn default_bearer_type() -> String {
    "Bearer".to_string()
}

/// 403 exchange response demanding further claims.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeDenied {
    #[serde(default)]
    pub ticket: Option<String>,

    #[serde(default)]
    pub required_claims: Vec<RequiredClaim>,
}

/// One entry of `required_claims`.
#[derive(Debug, Clone, Deserialize)]
pub struct RequiredClaim {
    pub claim_token_format: String,

    #[serde(default)]
    pub details: Option<RequiredClaimDetails>,
}

/// Issuer/resource/scope triple for a derived-token claim.
#[derive(Debug, Clone, Deserialize)]
pub struct RequiredClaimDetails {
    pub issuer: String,
    pub resource_id: String,

    #[serde(default)]
    pub resource_scopes: Vec<String>,
}

/// Response of the secondary service-token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceTokenResponse {
    pub service_token: String,
}

//! Possession proofs bound to an (endpoint, method) pair.
//!
//! Proofs are DPoP-style compact JWS tokens:
//!
//! ```text
//! base64url({"alg":"EdDSA","typ":"dpop+jwt","jwk":{...}}) . base64url({"htu","htm","jti","iat"}) . base64url(sig)
//! ```
//!
//! The keypair is generated once per client and never leaves the process.

use std::fmt;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use serde::Serialize;

use crate::error::{AuthError, AuthResult};

/// Produces a fresh possession proof for every call.
pub trait ProofSigner: Send + Sync + fmt::Debug {
    /// Sign a single-use proof for `method` on `endpoint`.
    fn sign(&self, endpoint: &str, method: &str) -> AuthResult<String>;
}

/// Ed25519 proof signer with a per-client keypair.
pub struct Ed25519ProofSigner {
    signing_key: SigningKey,
}

#[derive(Serialize)]
struct ProofHeader<'a> {
    alg: &'static str,
    typ: &'static str,
    jwk: Jwk<'a>,
}

#[derive(Serialize)]
struct Jwk<'a> {
    kty: &'static str,
    crv: &'static str,
    x: &'a str,
}

#[derive(Serialize)]
struct ProofClaims<'a> {
    htu: &'a str,
    htm: &'a str,
    jti: String,
    iat: i64,
}

impl Ed25519ProofSigner {
    /// Generate a new keypair.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut rand::thread_rng()),
        }
    }

    /// Build from a fixed 32-byte seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Public key as the JWK `x` member.
    pub fn public_x(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.verifying_key().as_bytes())
    }
}

impl fmt::Debug for Ed25519ProofSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ed25519ProofSigner")
            .field("public_x", &self.public_x())
            .finish()
    }
}

impl ProofSigner for Ed25519ProofSigner {
    fn sign(&self, endpoint: &str, method: &str) -> AuthResult<String> {
        let x = self.public_x();
        let header = ProofHeader {
            alg: "EdDSA",
            typ: "dpop+jwt",
            jwk: Jwk {
                kty: "OKP",
                crv: "Ed25519",
                x: &x,
            },
        };
        let claims = ProofClaims {
            htu: target_uri(endpoint),
            htm: method,
            jti: uuid::Uuid::new_v4().to_string(),
            iat: chrono::Utc::now().timestamp(),
        };

        let header_json = serde_json::to_vec(&header).map_err(|e| AuthError::Proof {
            message: format!("failed to encode proof header: {}", e),
        })?;
        let claims_json = serde_json::to_vec(&claims).map_err(|e| AuthError::Proof {
            message: format!("failed to encode proof claims: {}", e),
        })?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header_json),
            URL_SAFE_NO_PAD.encode(claims_json)
        );
        let signature = self.signing_key.sign(signing_input.as_bytes());

        Ok(format!(
            "{}.{}",
            signing_input,
            URL_SAFE_NO_PAD.encode(signature.to_bytes())
        ))
    }
}

/// `htu` excludes query and fragment.
fn target_uri(endpoint: &str) -> &str {
    let end = endpoint.find(['?', '#']).unwrap_or(endpoint.len());
    &endpoint[..end]
}

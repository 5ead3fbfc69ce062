//! Protected-resource client for benchmarking access-controlled data pods.
//!
//! Turns plain HTTP calls into calls that satisfy an UMA ticket challenge:
//!
//! - Enrollment with the pod's identity provider and a key-bound access token
//! - Challenge parsing, AS discovery and ticket exchange
//! - Nested claim gathering for `required_claims`
//! - Persistent cache of AS locations, AS metadata, credentials and public resources
//! - A global bound on in-flight requests
//! - Readiness waits over an authorized event stream
//!
//! # Quick Start
//!
//! ```no_run
//! use podbench_auth::{AuthConfig, PodClient};
//!
//! # async fn example() -> podbench_auth::AuthResult<()> {
//! let config = AuthConfig::from_env()
//!     .with_account("alice@example.org", "http://localhost:3000/alice/profile/card#me");
//! let client = PodClient::new(config).await?;
//! client.init().await?;
//!
//! let response = client.get("http://localhost:3000/bob/private/data").await?;
//! println!("status: {}", response.status());
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `PODBENCH_IDP_URL` | Identity provider base URL (default: `http://localhost:3000`) |
//! | `PODBENCH_EMAIL` | Account e-mail used for enrollment |
//! | `PODBENCH_PASSWORD` | Account password (default: `password`) |
//! | `PODBENCH_WEBID` | WebID the client credentials are issued for |
//! | `PODBENCH_CACHE` | Persist the cache to disk (`1`/`true`) |
//! | `PODBENCH_CACHE_FILE` | Cache file (default: `.cache`) |
//! | `PODBENCH_MAX_CONCURRENT` | Maximum in-flight requests (default: 30) |
//! | `PODBENCH_MAX_CLAIM_DEPTH` | Maximum claim gathering depth (default: 8) |
//! | `PODBENCH_TIMEOUT` | Request timeout in seconds (default: none) |

pub mod cache;
pub mod challenge;
pub mod client;
pub mod config;
mod enroll;
pub mod error;
pub mod gate;
pub mod proof;
pub mod readiness;
pub mod resolver;
pub mod types;

// Re-export main types
pub use cache::PersistentCache;
pub use challenge::{service_token_endpoint, Challenge};
pub use client::{PodClient, RequestInit};
pub use config::AuthConfig;
pub use error::{AuthError, AuthResult};
pub use gate::{ConcurrencyGate, GatePermit};
pub use proof::{Ed25519ProofSigner, ProofSigner};
pub use readiness::{
    wait_until_ready, EventStream, EventStreamParser, ReadinessChannel, ReadinessOptions,
    StreamEvent, StreamState,
};
pub use resolver::{ChallengeResolver, Resolution};
pub use types::{
    AccessToken, AsMetadata, BearerCredential, Claim, ClientIdentity, ResourcePermission,
    ACCESS_TOKEN_FORMAT, ID_TOKEN_FORMAT, UMA_TICKET_GRANT,
};

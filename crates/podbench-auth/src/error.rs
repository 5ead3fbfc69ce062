//! Error types for the protected-resource client.

/// Authorization client errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// An operation needed the identity, keypair or access token before `init`.
    #[error("client not initialized: {what}")]
    NotInitialized { what: String },

    /// Identity-provider login or client-credential creation failed.
    #[error("enrollment failed: {message}")]
    Enrollment { message: String },

    /// The authorization server's discovery document could not be fetched.
    #[error("authorization server discovery failed for {as_uri}")]
    DiscoveryUnavailable { as_uri: String },

    /// A `required_claims` entry uses a claim format with no handler.
    #[error("unsupported claim token format: {format}")]
    UnsupportedClaimFormat { format: String },

    /// Ticket or permission exchange was refused.
    #[error("token exchange rejected (HTTP {status}): {message}")]
    ExchangeRejected { status: u16, message: String },

    /// Claim gathering went deeper than the configured bound.
    #[error("claim gathering exceeded depth {max_depth}")]
    ClaimDepthExceeded { max_depth: u32 },

    /// The authorization server asked for a claim already gathered in this resolution.
    #[error("required claim repeated for {issuer} ({resource_id})")]
    ClaimCycle { issuer: String, resource_id: String },

    /// Possession proof could not be produced.
    #[error("proof signing failed: {message}")]
    Proof { message: String },

    /// Event stream handshake did not follow the expected challenge flow.
    #[error("stream protocol violation: {message}")]
    StreamProtocol { message: String },

    /// Event stream closed before the awaited event arrived.
    #[error("stream {url} ended before `{event}` was received")]
    StreamEnded { url: String, event: String },

    /// Event stream failed while reading.
    #[error("stream error: {message}")]
    Stream { message: String },

    /// Network error.
    #[error("network error: {message}")]
    Network { message: String },

    /// Cache error.
    #[error("cache error: {message}")]
    Cache { message: String },

    /// Invalid response body or header.
    #[error("invalid response: {message}")]
    InvalidResponse { message: String },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl AuthError {
    /// Exit code for CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            // Setup
            Self::NotInitialized { .. } => 2,
            Self::Enrollment { .. } => 2,
            Self::Config { .. } => 2,
            Self::Proof { .. } => 2,

            // Authorization flow
            Self::DiscoveryUnavailable { .. } => 3,
            Self::UnsupportedClaimFormat { .. } => 3,
            Self::ExchangeRejected { .. } => 3,
            Self::ClaimDepthExceeded { .. } => 3,
            Self::ClaimCycle { .. } => 3,

            // Network/transient
            Self::Network { .. } => 5,

            // Streams and everything else
            Self::StreamProtocol { .. } => 6,
            Self::StreamEnded { .. } => 6,
            Self::Stream { .. } => 6,
            Self::Cache { .. } => 6,
            Self::InvalidResponse { .. } => 6,
        }
    }

    /// Whether the error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::DiscoveryUnavailable { .. } | Self::StreamProtocol { .. }
        )
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network {
            message: err.to_string(),
        }
    }
}

/// Result type for authorization client operations.
pub type AuthResult<T> = Result<T, AuthError>;

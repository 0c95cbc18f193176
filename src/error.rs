// src/error.rs

use jsonwebtoken::Algorithm;
use thiserror::Error;

/// The primary error type for the `nila-token` library.
#[derive(Debug, Error)]
pub enum NilaTokenError {
    /// The wire string is not a structurally valid token (segments, base64, JSON, claim shapes).
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// The token header names a key id that is not in the current key set.
    #[error("Unknown signing key: {0}")]
    UnknownKey(String),

    /// The signature does not verify under the key named by the token's kid.
    #[error("Token signature is invalid")]
    BadSignature,

    /// The token carries a non-zero `exp` that lies in the past.
    #[error("Token expired at {0}")]
    Expired(i64),

    /// The algorithm specified in the JWT header is not accepted.
    #[error("Unsupported algorithm: {0:?}")]
    UnsupportedAlgorithm(Algorithm),

    /// A claim required for issuance is missing or empty.
    #[error("A required claim is missing from the token: {field}")]
    MissingClaim { field: &'static str },

    /// A numeric claim value could not be coerced into an integer.
    #[error("Numeric conversion failed: {0}")]
    Conversion(String),

    /// The token is of a different kind than the operation requires.
    #[error("Unexpected token kind: expected {expected}, got {actual}")]
    UnexpectedTokenKind {
        expected: &'static str,
        actual: String,
    },

    /// No token was attached to the request security context.
    #[error("No token found in the security context")]
    MissingToken,

    /// The context token carries no `sub` claim.
    #[error("The token in the security context has no subject")]
    MissingSubject,

    /// The context token's `sub` claim is not a valid identity identifier.
    #[error("The token subject is not a valid identity id: {0}")]
    InvalidSubject(String),

    /// The account collaborator failed to load an identity.
    #[error("Identity lookup failed: {0}")]
    IdentityLookup(String),

    /// An error occurred while signing a token.
    #[error("Token generation failed: {0}")]
    TokenGenerationError(String),

    /// The key set has no key able to sign new tokens.
    #[error("No active signing key is configured")]
    NoActiveSigningKey,

    /// A cryptographic key (PEM, JWK) is malformed or invalid.
    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    /// A required configuration field is missing.
    #[error("A required configuration field is missing: {0}")]
    MissingConfiguration(String),

    /// A configuration value is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A provided URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl NilaTokenError {
    /// Returns `true` for failures of an inbound token, which the HTTP layer
    /// answers with an unauthorized response and the login-required challenge.
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            Self::MalformedToken(_)
                | Self::UnknownKey(_)
                | Self::BadSignature
                | Self::Expired(_)
                | Self::UnsupportedAlgorithm(_)
                | Self::UnexpectedTokenKind { .. }
                | Self::MissingToken
                | Self::MissingSubject
                | Self::InvalidSubject(_)
        )
    }
}

impl From<jsonwebtoken::errors::Error> for NilaTokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidSignature => Self::BadSignature,
            ErrorKind::InvalidRsaKey(_) | ErrorKind::InvalidKeyFormat | ErrorKind::RsaFailedSigning => {
                Self::InvalidKeyFormat(err.to_string())
            }
            _ => Self::MalformedToken(err.to_string()),
        }
    }
}

// src/context.rs

use crate::claims::VerifiedClaims;
use crate::error::NilaTokenError;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Per-request security context populated by the authentication middleware.
///
/// Holds the claims of the token that authenticated the request, if any.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SecurityContext {
    token: Option<Map<String, Value>>,
}

impl SecurityContext {
    /// A context without a token.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context carrying raw token claims as attached by upstream middleware.
    pub fn with_token_claims(claims: Map<String, Value>) -> Self {
        Self { token: Some(claims) }
    }

    /// A context carrying the claims of a verified token.
    pub fn from_verified(verified: &VerifiedClaims) -> Result<Self, NilaTokenError> {
        match serde_json::to_value(verified.claims()) {
            Ok(Value::Object(claims)) => Ok(Self::with_token_claims(claims)),
            Ok(_) => Err(NilaTokenError::MalformedToken("claims are not a JSON object".to_string())),
            Err(e) => Err(NilaTokenError::MalformedToken(e.to_string())),
        }
    }

    pub fn token_claims(&self) -> Option<&Map<String, Value>> {
        self.token.as_ref()
    }
}

/// Returns the identity id of the request's authenticated subject.
pub fn locate(context: &SecurityContext) -> Result<Uuid, NilaTokenError> {
    let claims = context.token.as_ref().ok_or(NilaTokenError::MissingToken)?;
    let subject = match claims.get("sub") {
        None | Some(Value::Null) => return Err(NilaTokenError::MissingSubject),
        Some(Value::String(s)) => s.as_str(),
        Some(other) => return Err(NilaTokenError::InvalidSubject(other.to_string())),
    };
    Uuid::parse_str(subject).map_err(|_| NilaTokenError::InvalidSubject(subject.to_string()))
}

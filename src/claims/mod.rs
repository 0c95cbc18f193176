// src/claims/mod.rs

pub mod kind;
pub mod numeric;

use crate::error::NilaTokenError;
use numeric::{deserialize_integer, deserialize_optional_integer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

pub use kind::{classify, TokenKind};

/// A resource-scoped grant carried by a permission token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_set_id: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl Permission {
    pub fn new<S: Into<String>>(resource_set_id: Option<String>, scopes: impl IntoIterator<Item = S>) -> Self {
        Self {
            resource_set_id,
            scopes: scopes.into_iter().map(Into::into).collect(),
        }
    }
}

/// The claim set of every token this service issues.
///
/// Required claims are named fields and must be present when a token is
/// decoded. Numeric claims accept any integer, float or decimal-string
/// encoding and are normalized to `i64` while decoding. Claims this service
/// does not know about are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub jti: String,
    /// Seconds since the epoch; `0` means the token never expires.
    #[serde(default, deserialize_with = "deserialize_integer")]
    pub exp: i64,
    #[serde(deserialize_with = "deserialize_integer")]
    pub nbf: i64,
    #[serde(deserialize_with = "deserialize_integer")]
    pub iat: i64,
    pub iss: String,
    pub aud: String,
    pub sub: String,
    pub typ: String,
    pub session_state: String,
    pub approved: bool,
    pub email: String,
    #[serde(default)]
    pub email_verified: bool,
    pub preferred_username: String,
    pub given_name: String,
    pub family_name: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_integer"
    )]
    pub auth_time: Option<i64>,
    #[serde(rename = "allowed-origins", default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_origins: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Vec<Permission>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl TokenClaims {
    /// Parses `sub` as an identity id.
    pub fn subject_id(&self) -> Result<Uuid, NilaTokenError> {
        Uuid::parse_str(&self.sub).map_err(|_| NilaTokenError::InvalidSubject(self.sub.clone()))
    }
}

/// The pre-signing gate: a token without a subject, email or username is unusable.
pub fn check_claims(claims: &TokenClaims) -> Result<(), NilaTokenError> {
    if claims.sub.is_empty() {
        return Err(NilaTokenError::MissingClaim { field: "sub" });
    }
    if claims.email.is_empty() {
        return Err(NilaTokenError::MissingClaim { field: "email" });
    }
    if claims.preferred_username.is_empty() {
        return Err(NilaTokenError::MissingClaim { field: "preferred_username" });
    }
    Ok(())
}

/// Claims whose signature, key id and expiry were checked by
/// [`TokenCodec::verify`](crate::codec::TokenCodec::verify).
///
/// Only the codec can construct this type, so holding one is proof that the
/// token passed verification.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedClaims {
    claims: TokenClaims,
    kind: TokenKind,
    subject: Uuid,
    kid: String,
}

impl VerifiedClaims {
    pub(crate) fn new(claims: TokenClaims, kind: TokenKind, subject: Uuid, kid: String) -> Self {
        Self {
            claims,
            kind,
            subject,
            kid,
        }
    }

    pub fn claims(&self) -> &TokenClaims {
        &self.claims
    }

    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    pub fn subject(&self) -> Uuid {
        self.subject
    }

    /// Id of the key that signed the token.
    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn into_claims(self) -> TokenClaims {
        self.claims
    }
}

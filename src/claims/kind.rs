// src/claims/kind.rs

use super::TokenClaims;
use crate::error::NilaTokenError;
use std::fmt;

pub const TYP_BEARER: &str = "Bearer";
pub const TYP_REFRESH: &str = "Refresh";
pub const TYP_OFFLINE: &str = "Offline";

/// The closed set of token kinds this service issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// Short-lived bearer token presented to APIs.
    Access,
    /// Exchanged for a new pair; expires with the configured lifetime.
    Refresh,
    /// Refresh token with no expiry, valid until explicitly revoked.
    Offline,
    /// Bearer token additionally carrying resource-scoped permissions (RPT).
    Permission,
}

impl TokenKind {
    /// The `typ` claim value for this kind.
    pub fn typ(self) -> &'static str {
        match self {
            Self::Access | Self::Permission => TYP_BEARER,
            Self::Refresh => TYP_REFRESH,
            Self::Offline => TYP_OFFLINE,
        }
    }

    /// Computes `exp` for a token issued at `iat`. Offline tokens never expire and get `0`.
    pub fn expiry(self, iat: i64, ttl_seconds: i64) -> i64 {
        match self {
            Self::Offline => 0,
            _ => iat.saturating_add(ttl_seconds),
        }
    }

    /// `auth_time` carried by this kind. Refresh tokens carry `0`.
    pub fn auth_time(self, iat: i64) -> i64 {
        match self {
            Self::Access | Self::Permission => iat,
            Self::Refresh | Self::Offline => 0,
        }
    }

    /// Whether the token is presented to resource servers (and so carries `allowed-origins`).
    pub fn is_bearer(self) -> bool {
        matches!(self, Self::Access | Self::Permission)
    }

    /// Whether the token can be exchanged for a new pair.
    pub fn is_refresh(self) -> bool {
        matches!(self, Self::Refresh | Self::Offline)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
            Self::Offline => "offline",
            Self::Permission => "permission",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Determines the kind of a claim set from its `typ` and `permissions` claims.
pub fn classify(claims: &TokenClaims) -> Result<TokenKind, NilaTokenError> {
    match claims.typ.as_str() {
        TYP_BEARER if claims.permissions.is_some() => Ok(TokenKind::Permission),
        TYP_BEARER => Ok(TokenKind::Access),
        TYP_REFRESH => Ok(TokenKind::Refresh),
        TYP_OFFLINE => Ok(TokenKind::Offline),
        other => Err(NilaTokenError::MalformedToken(format!("unknown token type '{}'", other))),
    }
}

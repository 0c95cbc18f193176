// src/codec/token_set.rs

use super::{decode_claims_unverified, unix_now, TokenCodec};
use crate::claims::numeric::deserialize_optional_integer;
use crate::error::NilaTokenError;
use crate::identity::Identity;
use serde::{Deserialize, Serialize};
use tracing::instrument;

pub const TOKEN_TYPE_BEARER: &str = "Bearer";

/// A signed access token and its paired refresh token, plus the lifetime
/// metadata returned to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    /// Refresh token lifetime in seconds. Offline pairs still report the
    /// configured lifetime even though the refresh token carries no `exp`.
    pub refresh_expires_in: i64,
    pub not_before_policy: i64,
    /// Unix `exp` of the access token, when known.
    pub expires_at: Option<i64>,
}

impl TokenPair {
    /// `true` when the pair carries both tokens and the access token has not
    /// expired. A pair without a known expiry never expires.
    pub fn is_valid(&self) -> bool {
        !self.access_token.is_empty()
            && !self.refresh_token.is_empty()
            && self.expires_at.map_or(true, |exp| exp > unix_now())
    }

    /// Converts the pair into the JSON shape returned by token endpoints.
    pub fn to_wire_set(&self) -> TokenSet {
        TokenSet {
            access_token: Some(self.access_token.clone()),
            refresh_token: Some(self.refresh_token.clone()),
            token_type: Some(self.token_type.clone()),
            expires_in: Some(self.expires_in),
            refresh_expires_in: Some(self.refresh_expires_in),
            not_before_policy: Some(self.not_before_policy),
        }
    }

    /// Reads a pair back from its wire form.
    ///
    /// Missing tokens are rejected. `expires_at` is taken from the access
    /// token's `exp` without verifying the signature.
    pub fn from_wire_set(set: &TokenSet) -> Result<Self, NilaTokenError> {
        let access_token = set.access_token.clone().filter(|t| !t.is_empty()).ok_or(NilaTokenError::MissingToken)?;
        let refresh_token = set.refresh_token.clone().filter(|t| !t.is_empty()).ok_or(NilaTokenError::MissingToken)?;
        let expires_at = decode_claims_unverified(&access_token)
            .ok()
            .map(|c| c.exp)
            .filter(|exp| *exp != 0);

        Ok(Self {
            access_token,
            refresh_token,
            token_type: set.token_type.clone().unwrap_or_else(|| TOKEN_TYPE_BEARER.to_string()),
            expires_in: set.expires_in.unwrap_or_default(),
            refresh_expires_in: set.refresh_expires_in.unwrap_or_default(),
            not_before_policy: set.not_before_policy.unwrap_or_default(),
            expires_at,
        })
    }
}

/// The token endpoint response body. Numeric members accept integers,
/// floats and decimal strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_integer"
    )]
    pub expires_in: Option<i64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_integer"
    )]
    pub refresh_expires_in: Option<i64>,
    #[serde(
        rename = "not-before-policy",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_integer"
    )]
    pub not_before_policy: Option<i64>,
}

impl TokenCodec {
    /// Builds and signs an access/refresh pair for `identity`.
    #[instrument(skip(self, identity), fields(identity = %identity.id), err)]
    pub fn issue_pair(&self, identity: &Identity, offline: bool) -> Result<TokenPair, NilaTokenError> {
        let (access, refresh) = self.build_access_and_refresh(identity, offline);
        self.sign_pair(&access, &refresh)
    }

    pub(crate) fn sign_pair(
        &self,
        access: &super::TokenDraft,
        refresh: &super::TokenDraft,
    ) -> Result<TokenPair, NilaTokenError> {
        let ttl = self.ttl_seconds();
        let exp = access.claims().exp;
        Ok(TokenPair {
            access_token: self.sign(access)?,
            refresh_token: self.sign(refresh)?,
            token_type: TOKEN_TYPE_BEARER.to_string(),
            expires_in: ttl,
            refresh_expires_in: ttl,
            not_before_policy: 0,
            expires_at: Some(exp).filter(|exp| *exp != 0),
        })
    }
}

// src/codec/mod.rs

pub mod token_set;

use crate::claims::{check_claims, classify, Permission, TokenClaims, TokenKind, VerifiedClaims};
use crate::config::TokenConfig;
use crate::error::NilaTokenError;
use crate::identity::{split_full_name, Identity};
use crate::keystore::KeyStore;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, Header, Validation};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

pub use token_set::{TokenPair, TokenSet};

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// An unsigned claim set, ready for [`TokenCodec::sign`].
#[derive(Debug, Clone, PartialEq)]
pub struct TokenDraft {
    claims: TokenClaims,
}

impl TokenDraft {
    pub fn new(claims: TokenClaims) -> Self {
        Self { claims }
    }

    pub fn claims(&self) -> &TokenClaims {
        &self.claims
    }

    pub fn claims_mut(&mut self) -> &mut TokenClaims {
        &mut self.claims
    }

    pub fn kind(&self) -> Result<TokenKind, NilaTokenError> {
        classify(&self.claims)
    }

    pub fn into_claims(self) -> TokenClaims {
        self.claims
    }
}

/// Profile claims derived from an identity record.
#[derive(Debug, Clone)]
pub(crate) struct Profile {
    pub email: String,
    pub email_verified: bool,
    pub username: String,
    pub given_name: String,
    pub family_name: String,
    pub approved: bool,
}

impl Profile {
    pub fn from_identity(identity: &Identity) -> Self {
        let (given_name, family_name) = split_full_name(&identity.full_name);
        Self {
            email: identity.email.clone(),
            email_verified: identity.email_verified,
            username: identity.username.clone(),
            given_name,
            family_name,
            approved: !identity.deprovisioned,
        }
    }

    /// Profile carried by an already verified token.
    pub fn from_claims(claims: &TokenClaims, approved: bool) -> Self {
        Self {
            email: claims.email.clone(),
            email_verified: claims.email_verified,
            username: claims.preferred_username.clone(),
            given_name: claims.given_name.clone(),
            family_name: claims.family_name.clone(),
            approved,
        }
    }
}

/// Builds, signs, parses and verifies the service's tokens.
///
/// The codec is stateless apart from its configuration and the shared
/// [`KeyStore`]; every verification re-derives validity from the wire string
/// and the current time.
#[derive(Debug)]
pub struct TokenCodec {
    config: TokenConfig,
    keys: Arc<KeyStore>,
}

impl TokenCodec {
    /// Creates a codec. The configuration is validated first.
    pub fn new(config: TokenConfig, keys: Arc<KeyStore>) -> Result<Self, NilaTokenError> {
        config.validate()?;
        Ok(Self { config, keys })
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    pub fn key_store(&self) -> &Arc<KeyStore> {
        &self.keys
    }

    fn ttl_seconds(&self) -> i64 {
        // validate() guarantees the ttl fits in an i64.
        i64::try_from(self.config.token_ttl_seconds).unwrap_or(i64::MAX)
    }

    pub(crate) fn draft(
        &self,
        kind: TokenKind,
        subject: &str,
        session_state: &str,
        profile: &Profile,
        iat: i64,
    ) -> TokenDraft {
        let allowed_origins = if kind.is_bearer() {
            self.config.allowed_origins.clone()
        } else {
            Vec::new()
        };
        TokenDraft::new(TokenClaims {
            jti: Uuid::new_v4().to_string(),
            exp: kind.expiry(iat, self.ttl_seconds()),
            nbf: 0,
            iat,
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            sub: subject.to_string(),
            typ: kind.typ().to_string(),
            session_state: session_state.to_string(),
            approved: profile.approved,
            email: profile.email.clone(),
            email_verified: profile.email_verified,
            preferred_username: profile.username.clone(),
            given_name: profile.given_name.clone(),
            family_name: profile.family_name.clone(),
            auth_time: Some(kind.auth_time(iat)),
            allowed_origins,
            permissions: None,
            extra: Default::default(),
        })
    }

    pub(crate) fn draft_pair(
        &self,
        subject: &str,
        session_state: &str,
        profile: &Profile,
        offline: bool,
    ) -> (TokenDraft, TokenDraft) {
        let iat = unix_now();
        let refresh_kind = if offline { TokenKind::Offline } else { TokenKind::Refresh };
        (
            self.draft(TokenKind::Access, subject, session_state, profile, iat),
            self.draft(refresh_kind, subject, session_state, profile, iat),
        )
    }

    /// Drafts an access token and its paired refresh token for `identity`.
    ///
    /// Both drafts share `sub` and a fresh `session_state`; each gets its own
    /// `jti`. With `offline` the refresh token is an `Offline` token without expiry.
    pub fn build_access_and_refresh(&self, identity: &Identity, offline: bool) -> (TokenDraft, TokenDraft) {
        let session_state = Uuid::new_v4().to_string();
        self.draft_pair(
            &identity.id.to_string(),
            &session_state,
            &Profile::from_identity(identity),
            offline,
        )
    }

    /// Drafts a permission token (RPT) from a verified access token.
    ///
    /// Identity claims and `session_state` are copied from `base`; `jti`,
    /// `iat` and `exp` are fresh and follow the access token lifetime.
    /// `permissions` is embedded in the given order.
    ///
    /// Only claims produced by [`TokenCodec::verify`] are accepted:
    ///
    /// ```compile_fail
    /// # use nila_token::prelude::*;
    /// # fn elevate(codec: &TokenCodec, unverified: TokenClaims) {
    /// let _ = codec.build_permission_draft(&unverified, Vec::new());
    /// # }
    /// ```
    pub fn build_permission_draft(
        &self,
        base: &VerifiedClaims,
        permissions: Vec<Permission>,
    ) -> Result<TokenDraft, NilaTokenError> {
        if !base.kind().is_bearer() {
            return Err(NilaTokenError::UnexpectedTokenKind {
                expected: "access",
                actual: base.kind().to_string(),
            });
        }
        let claims = base.claims();
        let profile = Profile::from_claims(claims, claims.approved);
        let mut draft = self.draft(TokenKind::Permission, &claims.sub, &claims.session_state, &profile, unix_now());
        draft.claims.permissions = Some(permissions);
        Ok(draft)
    }

    /// Drafts the token the service presents to other services. It carries no expiry.
    pub fn build_service_account_draft(&self) -> TokenDraft {
        let account = &self.config.service_account;
        let profile = Profile {
            email: account.email.clone(),
            email_verified: true,
            username: account.username.clone(),
            given_name: account.username.clone(),
            family_name: String::new(),
            approved: true,
        };
        let mut draft = self.draft(
            TokenKind::Access,
            &account.id.to_string(),
            &Uuid::new_v4().to_string(),
            &profile,
            unix_now(),
        );
        draft.claims.exp = 0;
        draft
    }

    /// Signs a draft with the active key.
    ///
    /// The header is `{alg: RS256, typ: JWT, kid: <active kid>}`. Drafts
    /// without `sub`, `email` or `preferred_username` are refused.
    #[instrument(skip(self, draft), fields(jti = %draft.claims.jti), err)]
    pub fn sign(&self, draft: &TokenDraft) -> Result<String, NilaTokenError> {
        check_claims(&draft.claims)?;
        // A draft with an unknown `typ` is an issuance bug, not a bad inbound token.
        let kind = classify(&draft.claims).map_err(|e| NilaTokenError::TokenGenerationError(e.to_string()))?;

        let key = self.keys.active_signing_key()?;
        let encoding_key = key.encoding_key().ok_or(NilaTokenError::NoActiveSigningKey)?;

        let mut header = Header::new(Algorithm::RS256);
        header.typ = Some("JWT".to_string());
        header.kid = Some(key.kid().to_string());
        debug!(kid = %key.kid(), kind = %kind, "Signing token.");

        encode(&header, &draft.claims, encoding_key).map_err(|e| NilaTokenError::TokenGenerationError(e.to_string()))
    }

    /// Decodes the token header without checking anything else.
    pub fn parse_header(&self, token: &str) -> Result<Header, NilaTokenError> {
        decode_header(token).map_err(|e| NilaTokenError::MalformedToken(e.to_string()))
    }

    /// Decodes the claims without checking the signature.
    ///
    /// The result is advisory. Never base a trust decision on it.
    pub fn parse_unverified(&self, token: &str) -> Result<TokenClaims, NilaTokenError> {
        decode_claims_unverified(token)
    }

    /// Verifies a token and returns its claims.
    ///
    /// Checks, in order: header structure and `alg`, that the `kid` is in the
    /// key set, the signature, the claim shapes, and that a non-zero `exp` is
    /// not in the past. Nothing is cached between calls.
    #[instrument(skip(self, token), err)]
    pub fn verify(&self, token: &str) -> Result<VerifiedClaims, NilaTokenError> {
        let header = self.parse_header(token)?;
        if header.alg != Algorithm::RS256 {
            warn!(alg = ?header.alg, "Rejecting token signed with an unsupported algorithm.");
            return Err(NilaTokenError::UnsupportedAlgorithm(header.alg));
        }
        let kid = header
            .kid
            .ok_or_else(|| NilaTokenError::MalformedToken("The JWT header is missing the 'kid' field".to_string()))?;
        let key = self.keys.resolve(&kid)?;

        let mut validation = Validation::new(Algorithm::RS256);
        // Expiry is checked below so that exp = 0 means "never expires".
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let claims = decode::<TokenClaims>(token, key.decoding_key(), &validation)
            .map_err(|e| {
                warn!(kid = %kid, error = %e, "Token failed verification.");
                NilaTokenError::from(e)
            })?
            .claims;

        let kind = classify(&claims)?;
        let subject = claims
            .subject_id()
            .map_err(|_| NilaTokenError::MalformedToken(format!("subject '{}' is not an identity id", claims.sub)))?;

        if claims.exp != 0 && claims.exp < unix_now() {
            warn!(jti = %claims.jti, exp = claims.exp, "Token is expired.");
            return Err(NilaTokenError::Expired(claims.exp));
        }

        debug!(jti = %claims.jti, kind = %kind, "Token verified.");
        Ok(VerifiedClaims::new(claims, kind, subject, kid))
    }
}

/// Splits a compact JWS and decodes its payload segment.
pub(crate) fn decode_claims_unverified(token: &str) -> Result<TokenClaims, NilaTokenError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(NilaTokenError::MalformedToken(format!(
            "expected 3 segments, found {}",
            parts.len()
        )));
    }
    let payload = base64_url::decode(parts[1])
        .map_err(|e| NilaTokenError::MalformedToken(format!("payload is not base64url: {}", e)))?;
    serde_json::from_slice(&payload).map_err(|e| NilaTokenError::MalformedToken(format!("invalid claims: {}", e)))
}

// src/refresh.rs

use crate::claims::{TokenKind, VerifiedClaims};
use crate::codec::{Profile, TokenCodec, TokenDraft, TokenPair};
use crate::error::NilaTokenError;
use crate::identity::{AccountStore, Identity};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Exchanges refresh tokens for new token pairs.
///
/// Profile claims of the new pair always come from the current identity
/// record, so a changed email or a deprovisioned account shows up on the next
/// refresh. `sub` and `session_state` are carried over from the presented token.
#[derive(Clone)]
pub struct RefreshCoordinator {
    codec: Arc<TokenCodec>,
    accounts: Arc<dyn AccountStore>,
}

impl fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshCoordinator").field("codec", &self.codec).finish_non_exhaustive()
    }
}

impl RefreshCoordinator {
    pub fn new(codec: Arc<TokenCodec>, accounts: Arc<dyn AccountStore>) -> Self {
        Self { codec, accounts }
    }

    /// Drafts the new pair for a refresh token without signing it.
    ///
    /// `identity_hint` is the caller's already loaded identity record; when it
    /// is `None` the record is loaded from the account store. A hint for a
    /// different identity than the token's subject is rejected.
    #[instrument(skip(self, refresh_token, identity_hint), err)]
    pub async fn refresh_drafts(
        &self,
        refresh_token: &str,
        identity_hint: Option<&Identity>,
    ) -> Result<(TokenDraft, TokenDraft), NilaTokenError> {
        let verified = self.codec.verify(refresh_token)?;
        if !verified.kind().is_refresh() {
            warn!(kind = %verified.kind(), "Refusing to refresh with a non-refresh token.");
            return Err(NilaTokenError::UnexpectedTokenKind {
                expected: "refresh",
                actual: verified.kind().to_string(),
            });
        }

        let profile = match identity_hint {
            Some(identity) if identity.id != verified.subject() => {
                return Err(NilaTokenError::InvalidSubject(identity.id.to_string()));
            }
            Some(identity) => Profile::from_identity(identity),
            None => self.current_profile(&verified).await?,
        };

        let claims = verified.claims();
        let offline = verified.kind() == TokenKind::Offline;
        debug!(subject = %verified.subject(), offline, "Refreshing token pair.");
        Ok(self.codec.draft_pair(&claims.sub, &claims.session_state, &profile, offline))
    }

    /// Verifies `refresh_token` and returns a newly signed pair of the same
    /// offline-ness.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        identity_hint: Option<&Identity>,
    ) -> Result<TokenPair, NilaTokenError> {
        let (access, refresh) = self.refresh_drafts(refresh_token, identity_hint).await?;
        self.codec.sign_pair(&access, &refresh)
    }

    /// Re-issues an API client's pair as this service's own pair.
    ///
    /// Both tokens must verify against the key store and share a subject. The
    /// new pair gets a fresh `session_state`; the refresh token's offline-ness
    /// is kept.
    #[instrument(skip(self, pair), err)]
    pub async fn exchange_api_client_token(&self, pair: &TokenPair) -> Result<TokenPair, NilaTokenError> {
        let access = self.codec.verify(&pair.access_token)?;
        let refresh = self.codec.verify(&pair.refresh_token)?;
        if !access.kind().is_bearer() {
            return Err(NilaTokenError::UnexpectedTokenKind {
                expected: "access",
                actual: access.kind().to_string(),
            });
        }
        if !refresh.kind().is_refresh() {
            return Err(NilaTokenError::UnexpectedTokenKind {
                expected: "refresh",
                actual: refresh.kind().to_string(),
            });
        }
        if access.subject() != refresh.subject() {
            return Err(NilaTokenError::InvalidSubject(refresh.claims().sub.clone()));
        }

        let profile = self.current_profile(&access).await?;
        let session_state = uuid::Uuid::new_v4().to_string();
        let offline = refresh.kind() == TokenKind::Offline;
        info!(subject = %access.subject(), "Exchanging API client token pair.");
        let (new_access, new_refresh) =
            self.codec
                .draft_pair(&access.claims().sub, &session_state, &profile, offline);
        self.codec.sign_pair(&new_access, &new_refresh)
    }

    /// Profile of the token's subject from the account store. Subjects without
    /// a local account keep the token's profile claims and are not approved.
    async fn current_profile(&self, verified: &VerifiedClaims) -> Result<Profile, NilaTokenError> {
        match self.accounts.load_identity(verified.subject()).await? {
            Some(identity) => Ok(Profile::from_identity(&identity)),
            None => {
                debug!(subject = %verified.subject(), "No local account, using token profile.");
                Ok(Profile::from_claims(verified.claims(), false))
            }
        }
    }
}

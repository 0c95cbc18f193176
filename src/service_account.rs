// src/service_account.rs

use crate::codec::TokenCodec;
use crate::error::NilaTokenError;
use once_cell::sync::OnceCell;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::Request;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Attaches the service's own token to outgoing service-to-service requests.
///
/// The token is signed on first use and cached for the life of the signer.
/// Concurrent first callers block on the same initialization, so the token is
/// signed once. A failed signing attempt is returned and not cached.
#[derive(Clone)]
pub struct ServiceAccountSigner {
    inner: Arc<Inner>,
}

struct Inner {
    codec: Arc<TokenCodec>,
    token: OnceCell<String>,
}

impl fmt::Debug for ServiceAccountSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountSigner")
            .field("account", &self.inner.codec.config().service_account.id)
            .field("signed", &self.inner.token.get().is_some())
            .finish()
    }
}

impl ServiceAccountSigner {
    pub fn new(codec: Arc<TokenCodec>) -> Self {
        Self {
            inner: Arc::new(Inner {
                codec,
                token: OnceCell::new(),
            }),
        }
    }

    /// Returns the cached service-account token, signing it on first use.
    pub fn token(&self) -> Result<&str, NilaTokenError> {
        let token = self.inner.token.get_or_try_init(|| {
            debug!("Signing service account token.");
            let codec = &self.inner.codec;
            codec.sign(&codec.build_service_account_draft())
        })?;
        Ok(token.as_str())
    }

    /// Sets `Authorization: Bearer <token>` on `request`.
    #[instrument(skip(self, request), fields(url = %request.url()), err)]
    pub fn sign(&self, request: &mut Request) -> Result<(), NilaTokenError> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", self.token()?))
            .map_err(|e| NilaTokenError::TokenGenerationError(e.to_string()))?;
        value.set_sensitive(true);
        request.headers_mut().insert(AUTHORIZATION, value);
        Ok(())
    }
}

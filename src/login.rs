// src/login.rs

use crate::codec::TokenCodec;
use crate::error::NilaTokenError;
use reqwest::header::{HeaderMap, HeaderValue, ACCESS_CONTROL_EXPOSE_HEADERS, WWW_AUTHENTICATE};
use tracing::debug;
use url::Url;

const WWW_AUTHENTICATE_NAME: &str = "WWW-Authenticate";

/// The re-login challenge attached to unauthorized responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginChallenge {
    value: HeaderValue,
}

impl LoginChallenge {
    /// Builds the challenge `LOGIN url=<login_url>, description="re-login is required"`.
    pub fn new(login_url: &Url) -> Result<Self, NilaTokenError> {
        let value = HeaderValue::from_str(&format!(
            "LOGIN url={}, description=\"re-login is required\"",
            login_url.as_str().trim_end_matches('/')
        ))
        .map_err(|e| NilaTokenError::InvalidUrl(e.to_string()))?;
        Ok(Self { value })
    }

    pub fn header_value(&self) -> &HeaderValue {
        &self.value
    }

    /// Sets `WWW-Authenticate` and exposes it to browsers through
    /// `Access-Control-Expose-Headers`. Calling this twice leaves the headers unchanged.
    pub fn mark_login_required(&self, headers: &mut HeaderMap) {
        headers.insert(WWW_AUTHENTICATE, self.value.clone());
        if !is_exposed(headers) {
            headers.append(ACCESS_CONTROL_EXPOSE_HEADERS, HeaderValue::from_static(WWW_AUTHENTICATE_NAME));
        }
    }

    /// Marks the response as login-required when `err` is an unauthorized error.
    /// Returns the error unchanged.
    pub fn mark_login_required_on_error(&self, err: NilaTokenError, headers: &mut HeaderMap) -> NilaTokenError {
        if err.is_unauthorized() {
            debug!(error = %err, "Marking response as login required.");
            self.mark_login_required(headers);
        }
        err
    }
}

fn is_exposed(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCESS_CONTROL_EXPOSE_HEADERS)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|name| name.trim().eq_ignore_ascii_case(WWW_AUTHENTICATE_NAME))
}

impl TokenCodec {
    /// The login challenge for this service's configured login endpoint.
    pub fn login_challenge(&self) -> Result<LoginChallenge, NilaTokenError> {
        LoginChallenge::new(&self.config().login_url)
    }
}

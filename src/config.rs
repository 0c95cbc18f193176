// src/config.rs

use crate::error::NilaTokenError;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

/// Thirty days, the lifetime of access and non-offline refresh tokens unless configured otherwise.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

fn default_token_ttl_seconds() -> u64 {
    DEFAULT_TOKEN_TTL.as_secs()
}

/// The identity the service uses when it calls other services.
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct ServiceAccountConfig {
    /// Identity id placed in the `sub` claim.
    pub id: Uuid,
    /// Placed in `preferred_username`.
    pub username: String,
    /// Placed in `email`.
    pub email: String,
}

/// Configuration for the token codec.
///
/// Loading this from files or the environment is the host's job; the struct
/// derives `Deserialize` so any serde format works. Use [`ConfigBuilder`] when
/// assembling it in code, or call [`TokenConfig::validate`] after deserializing.
#[derive(Deserialize, Clone, Debug)]
pub struct TokenConfig {
    /// Value of the `iss` claim. Must be an absolute URL.
    pub issuer: String,
    /// Value of the `aud` claim.
    pub audience: String,
    /// Value of the `allowed-origins` claim on access and permission tokens.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    /// Lifetime of access, permission and non-offline refresh tokens, in seconds.
    #[serde(default = "default_token_ttl_seconds")]
    pub token_ttl_seconds: u64,
    /// Login endpoint advertised in the `WWW-Authenticate` challenge.
    pub login_url: Url,
    /// The identity used for service-to-service calls.
    pub service_account: ServiceAccountConfig,
}

impl TokenConfig {
    /// Lifetime of access and non-offline refresh tokens.
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_seconds)
    }

    /// Checks the invariants the builder enforces. Call this after deserializing.
    pub fn validate(&self) -> Result<(), NilaTokenError> {
        Url::parse(&self.issuer).map_err(|e| NilaTokenError::InvalidUrl(format!("issuer: {}", e)))?;
        if self.audience.is_empty() {
            return Err(NilaTokenError::MissingConfiguration("audience".to_string()));
        }
        if self.token_ttl_seconds == 0 || i64::try_from(self.token_ttl_seconds).is_err() {
            return Err(NilaTokenError::InvalidConfiguration(
                "token_ttl_seconds must be a positive number of seconds".to_string(),
            ));
        }
        if self.service_account.username.is_empty() || self.service_account.email.is_empty() {
            return Err(NilaTokenError::InvalidConfiguration(
                "service_account needs a username and an email".to_string(),
            ));
        }
        Ok(())
    }
}

/// Defines the source of an RSA key.
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", content = "value")]
#[serde(rename_all = "snake_case")]
pub enum SigningKeyConfig {
    /// Path to a PEM-encoded RSA private key file (PKCS#8 or PKCS#1).
    RsaPemFile(PathBuf),
    /// An inline PEM-encoded RSA private key.
    RsaPem(String),
    /// An inline PEM-encoded RSA public key. Such entries only verify.
    RsaPublicPem(String),
}

/// One entry of the key set.
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct KeyConfig {
    /// Explicit key id. Defaults to the RFC 7638 thumbprint of the public key.
    #[serde(default)]
    pub kid: Option<String>,
    pub key: SigningKeyConfig,
}

/// The configured key set.
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct KeySetConfig {
    pub keys: Vec<KeyConfig>,
    /// Kid of the key that signs new tokens. Defaults to the first private key.
    #[serde(default)]
    pub active_kid: Option<String>,
}

/// A builder for creating a `TokenConfig` instance.
#[derive(Default)]
pub struct ConfigBuilder {
    issuer: Option<String>,
    audience: Option<String>,
    allowed_origins: Vec<String>,
    token_ttl: Option<Duration>,
    login_url: Option<Url>,
    service_account: Option<ServiceAccountConfig>,
}

impl ConfigBuilder {
    /// Creates a new `ConfigBuilder`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the issuer placed in the `iss` claim. This is a required field.
    pub fn issuer(mut self, issuer: &str) -> Result<Self, NilaTokenError> {
        Url::parse(issuer).map_err(|e| NilaTokenError::InvalidUrl(e.to_string()))?;
        self.issuer = Some(issuer.to_string());
        Ok(self)
    }

    /// Sets the audience placed in the `aud` claim. This is a required field.
    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Adds an origin to the `allowed-origins` claim.
    pub fn allowed_origin(mut self, origin: impl Into<String>) -> Self {
        self.allowed_origins.push(origin.into());
        self
    }

    /// Sets the token lifetime. Defaults to 30 days.
    pub fn token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = Some(ttl);
        self
    }

    /// Sets the login endpoint used in the re-login challenge. This is a required field.
    pub fn login_url(mut self, url: &str) -> Result<Self, NilaTokenError> {
        let parsed = Url::parse(url).map_err(|e| NilaTokenError::InvalidUrl(e.to_string()))?;
        self.login_url = Some(parsed);
        Ok(self)
    }

    /// Sets the identity of the service account. This is a required field.
    pub fn service_account(mut self, id: Uuid, username: impl Into<String>, email: impl Into<String>) -> Self {
        self.service_account = Some(ServiceAccountConfig {
            id,
            username: username.into(),
            email: email.into(),
        });
        self
    }

    /// Consumes the builder and returns a `TokenConfig`.
    ///
    /// # Errors
    ///
    /// Returns an error if a required field is missing or a value is out of range.
    pub fn build(self) -> Result<TokenConfig, NilaTokenError> {
        let config = TokenConfig {
            issuer: self.issuer.ok_or_else(|| NilaTokenError::MissingConfiguration("issuer".to_string()))?,
            audience: self.audience.ok_or_else(|| NilaTokenError::MissingConfiguration("audience".to_string()))?,
            allowed_origins: self.allowed_origins,
            token_ttl_seconds: self.token_ttl.unwrap_or(DEFAULT_TOKEN_TTL).as_secs(),
            login_url: self.login_url.ok_or_else(|| NilaTokenError::MissingConfiguration("login_url".to_string()))?,
            service_account: self
                .service_account
                .ok_or_else(|| NilaTokenError::MissingConfiguration("service_account".to_string()))?,
        };
        config.validate()?;
        Ok(config)
    }
}

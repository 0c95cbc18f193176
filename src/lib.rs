// src/lib.rs

pub mod claims;
pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod identity;
pub mod keystore;
pub mod login;
pub mod permission;
pub mod refresh;
pub mod service_account;

/// The public prelude for the `nila-token` crate.
///
/// This module re-exports the most commonly used types for convenience.
pub mod prelude {
    pub use crate::claims::numeric::to_integer;
    pub use crate::claims::{classify, Permission, TokenClaims, TokenKind, VerifiedClaims};
    pub use crate::codec::{TokenCodec, TokenDraft, TokenPair, TokenSet};
    pub use crate::config::{ConfigBuilder, KeySetConfig, SigningKeyConfig, TokenConfig};
    pub use crate::context::{locate, SecurityContext};
    pub use crate::error::NilaTokenError;
    pub use crate::identity::{AccountStore, Identity};
    pub use crate::keystore::{KeyPair, KeyStore};
    pub use crate::login::LoginChallenge;
    pub use crate::permission::PermissionTokenBuilder;
    pub use crate::refresh::RefreshCoordinator;
    pub use crate::service_account::ServiceAccountSigner;
    pub use jsonwebtoken::Algorithm;
}

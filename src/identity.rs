// src/identity.rs

use crate::error::NilaTokenError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An identity record as supplied by the account store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub deprovisioned: bool,
}

/// Splits a full name into given and family name.
///
/// The first space-separated word is the given name and the remainder the
/// family name, which is empty for a one-word name.
pub fn split_full_name(full_name: &str) -> (String, String) {
    match full_name.split_once(' ') {
        Some((given, family)) => (given.to_string(), family.to_string()),
        None => (full_name.to_string(), String::new()),
    }
}

/// Read access to identity records, implemented by the host's persistence layer.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Loads the current record for `id`, or `None` when the identity has no local account.
    async fn load_identity(&self, id: Uuid) -> Result<Option<Identity>, NilaTokenError>;
}

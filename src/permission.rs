// src/permission.rs

use crate::claims::Permission;
use crate::codec::TokenCodec;
use crate::error::NilaTokenError;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Issues permission tokens (RPTs) for callers holding a valid access token.
#[derive(Debug, Clone)]
pub struct PermissionTokenBuilder {
    codec: Arc<TokenCodec>,
}

impl PermissionTokenBuilder {
    pub fn new(codec: Arc<TokenCodec>) -> Self {
        Self { codec }
    }

    /// Verifies `base_token` and signs a permission token carrying `permissions`.
    ///
    /// The base token must be an access token or an earlier permission token;
    /// its permissions, if any, are replaced rather than merged.
    #[instrument(skip(self, base_token, permissions), fields(count = permissions.len()), err)]
    pub fn issue(&self, base_token: &str, permissions: Vec<Permission>) -> Result<String, NilaTokenError> {
        let base = self.codec.verify(base_token)?;
        let draft = self.codec.build_permission_draft(&base, permissions)?;
        debug!(subject = %base.subject(), "Issuing permission token.");
        self.codec.sign(&draft)
    }
}

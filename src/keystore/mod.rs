// src/keystore/mod.rs

pub mod model;

use crate::config::{KeySetConfig, SigningKeyConfig};
use crate::error::NilaTokenError;
use arc_swap::ArcSwap;
use base64::engine::{general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{DecodingKey, EncodingKey};
use model::{JsonWebKey, JsonWebKeySet};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument, warn};

/// One RSA key of the key set. Entries without a private key only verify.
pub struct KeyPair {
    kid: String,
    n: String,
    e: String,
    decoding_key: DecodingKey,
    encoding_key: Option<EncodingKey>,
}

impl KeyPair {
    /// Loads a PKCS#8 or PKCS#1 PEM-encoded RSA private key.
    ///
    /// Without an explicit `kid` the key id is the RFC 7638 thumbprint of the public key.
    pub fn from_private_pem(pem: &str, kid: Option<String>) -> Result<Self, NilaTokenError> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| NilaTokenError::InvalidKeyFormat(format!("Failed to parse RSA private key PEM: {}", e)))?;

        // jsonwebtoken takes the key most reliably as PKCS#1 DER.
        let pkcs1_der = private_key.to_pkcs1_der().map_err(|e| {
            NilaTokenError::InvalidKeyFormat(format!("Failed to convert RSA key to PKCS#1 DER: {}", e))
        })?;
        let encoding_key = EncodingKey::from_rsa_der(pkcs1_der.as_bytes());

        Self::from_public_key(&private_key.to_public_key(), kid, Some(encoding_key))
    }

    /// Loads a verification-only key from an SPKI or PKCS#1 PEM-encoded RSA public key.
    pub fn from_public_pem(pem: &str, kid: Option<String>) -> Result<Self, NilaTokenError> {
        let public_key = RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .map_err(|e| NilaTokenError::InvalidKeyFormat(format!("Failed to parse RSA public key PEM: {}", e)))?;
        Self::from_public_key(&public_key, kid, None)
    }

    /// Builds a verification-only key from an RSA JWK.
    pub fn from_jwk(jwk: &JsonWebKey) -> Result<Self, NilaTokenError> {
        if jwk.kty != "RSA" {
            return Err(NilaTokenError::InvalidKeyFormat(format!("unsupported key type '{}'", jwk.kty)));
        }
        if let Some(alg) = jwk.alg.as_deref() {
            if alg != "RS256" {
                return Err(NilaTokenError::InvalidKeyFormat(format!("unsupported key algorithm '{}'", alg)));
            }
        }
        let n = jwk
            .n
            .as_deref()
            .ok_or_else(|| NilaTokenError::InvalidKeyFormat("RSA key missing 'n' component".to_string()))?;
        let e = jwk
            .e
            .as_deref()
            .ok_or_else(|| NilaTokenError::InvalidKeyFormat("RSA key missing 'e' component".to_string()))?;
        let decoding_key = DecodingKey::from_rsa_components(n, e)
            .map_err(|e| NilaTokenError::InvalidKeyFormat(format!("Invalid RSA JWK '{}': {}", jwk.kid, e)))?;
        Ok(Self {
            kid: jwk.kid.clone(),
            n: n.to_string(),
            e: e.to_string(),
            decoding_key,
            encoding_key: None,
        })
    }

    fn from_public_key(
        public_key: &RsaPublicKey,
        kid: Option<String>,
        encoding_key: Option<EncodingKey>,
    ) -> Result<Self, NilaTokenError> {
        let n = URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be());
        let e = URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be());
        let decoding_key = DecodingKey::from_rsa_components(&n, &e)
            .map_err(|e| NilaTokenError::InvalidKeyFormat(e.to_string()))?;
        let kid = kid.unwrap_or_else(|| jwk_thumbprint(&n, &e));
        Ok(Self {
            kid,
            n,
            e,
            decoding_key,
            encoding_key,
        })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn can_sign(&self) -> bool {
        self.encoding_key.is_some()
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    pub fn encoding_key(&self) -> Option<&EncodingKey> {
        self.encoding_key.as_ref()
    }

    /// The public half of this key as a JWK.
    pub fn public_jwk(&self) -> JsonWebKey {
        JsonWebKey {
            kid: self.kid.clone(),
            kty: "RSA".to_string(),
            use_purpose: Some("sig".to_string()),
            alg: Some("RS256".to_string()),
            n: Some(self.n.clone()),
            e: Some(self.e.clone()),
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("kid", &self.kid)
            .field("can_sign", &self.can_sign())
            .finish()
    }
}

/// RFC 7638 thumbprint: SHA-256 over the canonical `{e, kty, n}` member set, base64url encoded.
fn jwk_thumbprint(n: &str, e: &str) -> String {
    // Members in lexicographic order, no whitespace. Base64url values need no escaping.
    let canonical_jwk = format!(r#"{{"e":"{}","kty":"RSA","n":"{}"}}"#, e, n);
    let mut hasher = Sha256::new();
    hasher.update(canonical_jwk.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// An immutable snapshot of the key set.
struct KeySet {
    keys: HashMap<String, Arc<KeyPair>>,
    active_kid: Option<String>,
}

impl KeySet {
    fn build(keys: Vec<KeyPair>, active_kid: Option<&str>) -> Result<Self, NilaTokenError> {
        let mut first_signing_kid = None;
        let mut map = HashMap::with_capacity(keys.len());
        for key in keys {
            if first_signing_kid.is_none() && key.can_sign() {
                first_signing_kid = Some(key.kid.clone());
            }
            let kid = key.kid.clone();
            if map.insert(kid.clone(), Arc::new(key)).is_some() {
                return Err(NilaTokenError::InvalidConfiguration(format!("duplicate key id '{}'", kid)));
            }
        }

        let active_kid = match active_kid {
            Some(kid) => match map.get(kid) {
                Some(key) if key.can_sign() => Some(kid.to_string()),
                Some(_) => {
                    return Err(NilaTokenError::InvalidConfiguration(format!(
                        "active key '{}' has no private key",
                        kid
                    )))
                }
                None => {
                    return Err(NilaTokenError::InvalidConfiguration(format!(
                        "active key '{}' is not in the key set",
                        kid
                    )))
                }
            },
            None => first_signing_kid,
        };

        Ok(Self { keys: map, active_kid })
    }
}

/// The signing and verification keys, indexed by key id.
///
/// Readers always see one complete key set: every update builds a new set and
/// swaps it in atomically. Existing entries are never modified, so tokens
/// signed by a key keep verifying until that key is retired.
pub struct KeyStore {
    current: ArcSwap<KeySet>,
    // Serializes writers so read-modify-write updates don't lose each other's changes.
    write_lock: Mutex<()>,
}

impl KeyStore {
    /// Creates a key store. `active_kid` selects the signing key; by default the
    /// first key with a private half signs.
    pub fn new(keys: Vec<KeyPair>, active_kid: Option<&str>) -> Result<Self, NilaTokenError> {
        let set = KeySet::build(keys, active_kid)?;
        info!(keys = set.keys.len(), active_kid = ?set.active_kid, "Key store initialized.");
        Ok(Self {
            current: ArcSwap::from_pointee(set),
            write_lock: Mutex::new(()),
        })
    }

    /// Loads every configured key, reading PEM files from disk where needed.
    pub fn from_config(config: &KeySetConfig) -> Result<Self, NilaTokenError> {
        let keys = config
            .keys
            .iter()
            .map(|entry| match &entry.key {
                SigningKeyConfig::RsaPemFile(path) => {
                    let pem = std::fs::read_to_string(path).map_err(|e| {
                        NilaTokenError::InvalidKeyFormat(format!(
                            "Failed to read RSA private key file from {:?}: {}",
                            path, e
                        ))
                    })?;
                    KeyPair::from_private_pem(&pem, entry.kid.clone())
                }
                SigningKeyConfig::RsaPem(pem) => KeyPair::from_private_pem(pem, entry.kid.clone()),
                SigningKeyConfig::RsaPublicPem(pem) => KeyPair::from_public_pem(pem, entry.kid.clone()),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(keys, config.active_kid.as_deref())
    }

    /// Creates a verification-only store from a JWKS document.
    ///
    /// Only RSA signature keys are loaded. Keys of another type, keys marked
    /// for another `use` and keys bound to another `alg` are skipped.
    pub fn from_jwks(jwks: &JsonWebKeySet) -> Result<Self, NilaTokenError> {
        let mut keys = Vec::with_capacity(jwks.keys.len());
        for jwk in &jwks.keys {
            if jwk.kty != "RSA" {
                debug!(kid = %jwk.kid, kty = %jwk.kty, "Skipping non-RSA key.");
                continue;
            }
            if jwk.use_purpose.as_deref().is_some_and(|u| u != "sig") {
                debug!(kid = %jwk.kid, use_purpose = ?jwk.use_purpose, "Skipping key not meant for signatures.");
                continue;
            }
            if jwk.alg.as_deref().is_some_and(|alg| alg != "RS256") {
                debug!(kid = %jwk.kid, alg = ?jwk.alg, "Skipping key bound to another algorithm.");
                continue;
            }
            keys.push(KeyPair::from_jwk(jwk)?);
        }
        Self::new(keys, None)
    }

    /// Looks up the key a token names in its `kid` header.
    pub fn resolve(&self, kid: &str) -> Result<Arc<KeyPair>, NilaTokenError> {
        match self.current.load().keys.get(kid) {
            Some(key) => {
                debug!(kid = %kid, "Resolved verification key.");
                Ok(Arc::clone(key))
            }
            None => {
                warn!(kid = %kid, "Token names a key that is not in the key set.");
                Err(NilaTokenError::UnknownKey(kid.to_string()))
            }
        }
    }

    /// The key that signs new tokens.
    pub fn active_signing_key(&self) -> Result<Arc<KeyPair>, NilaTokenError> {
        let set = self.current.load();
        set.active_kid
            .as_deref()
            .and_then(|kid| set.keys.get(kid))
            .map(Arc::clone)
            .ok_or(NilaTokenError::NoActiveSigningKey)
    }

    pub fn active_kid(&self) -> Option<String> {
        self.current.load().active_kid.clone()
    }

    /// All key ids, sorted.
    pub fn kids(&self) -> Vec<String> {
        let mut kids: Vec<String> = self.current.load().keys.keys().cloned().collect();
        kids.sort();
        kids
    }

    /// Replaces the whole key set. Tokens signed by keys absent from `keys` stop verifying.
    #[instrument(skip(self, keys), err)]
    pub fn rotate(&self, keys: Vec<KeyPair>, active_kid: Option<&str>) -> Result<(), NilaTokenError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let set = KeySet::build(keys, active_kid)?;
        info!(keys = set.keys.len(), active_kid = ?set.active_kid, "Key set rotated.");
        self.current.store(Arc::new(set));
        Ok(())
    }

    /// Adds a new key, optionally making it the signing key. Existing kids cannot be replaced.
    #[instrument(skip(self, key), fields(kid = %key.kid()), err)]
    pub fn add_key(&self, key: KeyPair, activate: bool) -> Result<(), NilaTokenError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let current = self.current.load_full();
        if current.keys.contains_key(key.kid()) {
            return Err(NilaTokenError::InvalidConfiguration(format!(
                "key id '{}' is already in the key set",
                key.kid()
            )));
        }
        if activate && !key.can_sign() {
            return Err(NilaTokenError::InvalidConfiguration(format!(
                "key '{}' has no private key and cannot be activated",
                key.kid()
            )));
        }

        let mut keys = current.keys.clone();
        let kid = key.kid().to_string();
        keys.insert(kid.clone(), Arc::new(key));
        let active_kid = if activate { Some(kid) } else { current.active_kid.clone() };
        info!(active_kid = ?active_kid, "Key added to key set.");
        self.current.store(Arc::new(KeySet { keys, active_kid }));
        Ok(())
    }

    /// Removes a key so tokens it signed no longer verify. The active key cannot be retired.
    #[instrument(skip(self), err)]
    pub fn retire(&self, kid: &str) -> Result<(), NilaTokenError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let current = self.current.load_full();
        if current.active_kid.as_deref() == Some(kid) {
            return Err(NilaTokenError::InvalidConfiguration(format!(
                "key '{}' is the active signing key",
                kid
            )));
        }
        if !current.keys.contains_key(kid) {
            return Err(NilaTokenError::UnknownKey(kid.to_string()));
        }

        let mut keys = current.keys.clone();
        keys.remove(kid);
        info!("Key retired from key set.");
        self.current.store(Arc::new(KeySet {
            keys,
            active_kid: current.active_kid.clone(),
        }));
        Ok(())
    }

    /// The public keys as a JWKS document, ordered by kid.
    pub fn public_jwks(&self) -> JsonWebKeySet {
        let set = self.current.load();
        let mut keys: Vec<JsonWebKey> = set.keys.values().map(|key| key.public_jwk()).collect();
        keys.sort_by(|a, b| a.kid.cmp(&b.kid));
        JsonWebKeySet { keys }
    }
}

impl fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStore")
            .field("kids", &self.kids())
            .field("active_kid", &self.active_kid())
            .finish()
    }
}

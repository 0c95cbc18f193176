use async_trait::async_trait;
use nila_token::keystore::model::JsonWebKeySet;
use nila_token::prelude::*;
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tempfile::tempdir;
use uuid::Uuid;

const PRIMARY_PEM: &str = include_str!("fixtures/primary_key.pem");
const ROTATED_PEM: &str = include_str!("fixtures/rotated_key.pem");
const ROTATED_PUBLIC_PEM: &str = include_str!("fixtures/rotated_key.pub.pem");

const THIRTY_DAYS: i64 = 30 * 24 * 60 * 60;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn token_config() -> TokenConfig {
    ConfigBuilder::new()
        .issuer("https://auth.openshift.io")
        .unwrap()
        .audience("https://openshift.io")
        .allowed_origin("https://auth.openshift.io")
        .allowed_origin("https://openshift.io")
        .login_url("http://localhost/api/login")
        .unwrap()
        .service_account(Uuid::new_v4(), "fabric8-auth", "fabric8-auth@redhat.com")
        .build()
        .expect("Failed to build token config")
}

fn codec_with_keys(keys: Vec<KeyPair>) -> Arc<TokenCodec> {
    let store = KeyStore::new(keys, None).expect("Failed to build key store");
    Arc::new(TokenCodec::new(token_config(), Arc::new(store)).expect("Failed to build codec"))
}

fn primary_codec() -> Arc<TokenCodec> {
    codec_with_keys(vec![KeyPair::from_private_pem(PRIMARY_PEM, None).unwrap()])
}

fn identity() -> Identity {
    Identity {
        id: Uuid::new_v4(),
        username: "jdoe".to_string(),
        email: "jdoe@example.com".to_string(),
        email_verified: true,
        full_name: "John Ronald Doe".to_string(),
        deprovisioned: false,
    }
}

/// In-memory account store whose records can change between calls.
#[derive(Default)]
struct InMemoryAccounts {
    identities: Mutex<HashMap<Uuid, Identity>>,
}

impl InMemoryAccounts {
    fn put(&self, identity: Identity) {
        self.identities.lock().unwrap().insert(identity.id, identity);
    }
}

#[async_trait]
impl AccountStore for InMemoryAccounts {
    async fn load_identity(&self, id: Uuid) -> Result<Option<Identity>, NilaTokenError> {
        Ok(self.identities.lock().unwrap().get(&id).cloned())
    }
}

fn assert_profile(claims: &TokenClaims, who: &Identity) {
    assert_eq!(claims.sub, who.id.to_string());
    assert_eq!(claims.email, who.email);
    assert_eq!(claims.email_verified, who.email_verified);
    assert_eq!(claims.preferred_username, who.username);
    assert_eq!(claims.given_name, "John");
    assert_eq!(claims.family_name, "Ronald Doe");
    assert!(claims.approved);
    assert_eq!(claims.iss, "https://auth.openshift.io");
    assert_eq!(claims.aud, "https://openshift.io");
    assert!(Uuid::parse_str(&claims.jti).is_ok(), "JTI should be a valid UUID");
}

#[test]
fn test_issue_and_verify_online_pair() {
    init_tracing();
    let codec = primary_codec();
    let who = identity();

    let before = chrono::Utc::now().timestamp();
    let pair = codec.issue_pair(&who, false).expect("Failed to issue pair");
    let after = chrono::Utc::now().timestamp();

    let access = codec.verify(&pair.access_token).expect("Access token should verify");
    let refresh = codec.verify(&pair.refresh_token).expect("Refresh token should verify");

    assert_eq!(access.kind(), TokenKind::Access);
    assert_eq!(refresh.kind(), TokenKind::Refresh);
    assert_profile(access.claims(), &who);
    assert_profile(refresh.claims(), &who);

    let a = access.claims();
    assert_eq!(a.typ, "Bearer");
    assert!(a.iat >= before && a.iat <= after);
    assert!(a.exp >= before + THIRTY_DAYS && a.exp <= after + THIRTY_DAYS);
    assert_eq!(a.auth_time, Some(a.iat));
    assert_eq!(a.nbf, 0);
    assert_eq!(a.allowed_origins, vec!["https://auth.openshift.io", "https://openshift.io"]);

    let r = refresh.claims();
    assert_eq!(r.typ, "Refresh");
    assert!(r.exp >= before + THIRTY_DAYS && r.exp <= after + THIRTY_DAYS);
    assert_eq!(r.auth_time, Some(0));

    assert_eq!(a.session_state, r.session_state);
    assert_ne!(a.jti, r.jti);

    assert_eq!(pair.token_type, "Bearer");
    assert_eq!(pair.expires_in, THIRTY_DAYS);
    assert_eq!(pair.refresh_expires_in, THIRTY_DAYS);
    assert_eq!(pair.not_before_policy, 0);
    assert_eq!(pair.expires_at, Some(a.exp));
}

#[test]
fn test_issue_and_verify_offline_pair() {
    init_tracing();
    let codec = primary_codec();
    let who = identity();

    let pair = codec.issue_pair(&who, true).expect("Failed to issue pair");
    let refresh = codec.verify(&pair.refresh_token).expect("Offline token should verify");

    assert_eq!(refresh.kind(), TokenKind::Offline);
    assert_eq!(refresh.claims().typ, "Offline");
    assert_eq!(refresh.claims().exp, 0);
    assert_profile(refresh.claims(), &who);

    // Offline pairs still advertise the configured refresh lifetime.
    assert_eq!(pair.refresh_expires_in, THIRTY_DAYS);
}

#[test]
fn test_wire_set_round_trip() {
    let codec = primary_codec();
    let pair = codec.issue_pair(&identity(), false).unwrap();

    let body = serde_json::to_string(&pair.to_wire_set()).unwrap();
    let set: TokenSet = serde_json::from_str(&body).unwrap();
    let restored = TokenPair::from_wire_set(&set).expect("Wire set should reconstruct");

    assert_eq!(restored, pair);
    assert_eq!(
        codec.verify(&restored.access_token).unwrap(),
        codec.verify(&pair.access_token).unwrap()
    );
    assert_eq!(
        codec.verify(&restored.refresh_token).unwrap(),
        codec.verify(&pair.refresh_token).unwrap()
    );
}

#[tokio::test]
async fn test_refresh_reflects_current_identity() {
    init_tracing();
    let codec = primary_codec();
    let accounts = Arc::new(InMemoryAccounts::default());
    let mut who = identity();
    accounts.put(who.clone());
    let coordinator = RefreshCoordinator::new(codec.clone(), accounts.clone());

    let pair = codec.issue_pair(&who, false).unwrap();
    let original = codec.verify(&pair.access_token).unwrap();

    who.email = "john.doe@example.org".to_string();
    accounts.put(who.clone());

    let refreshed = coordinator.refresh(&pair.refresh_token, None).await.expect("Refresh should succeed");
    let access = codec.verify(&refreshed.access_token).unwrap();
    let refresh = codec.verify(&refreshed.refresh_token).unwrap();

    assert_eq!(access.claims().email, "john.doe@example.org");
    assert_eq!(refresh.claims().email, "john.doe@example.org");
    assert_eq!(access.claims().sub, original.claims().sub);
    assert_eq!(access.claims().session_state, original.claims().session_state);
    assert_eq!(refresh.kind(), TokenKind::Refresh);
}

#[tokio::test]
async fn test_refresh_without_local_account_is_unapproved() {
    let codec = primary_codec();
    let coordinator = RefreshCoordinator::new(codec.clone(), Arc::new(InMemoryAccounts::default()));
    let who = identity();

    let pair = codec.issue_pair(&who, false).unwrap();
    let refreshed = coordinator.refresh(&pair.refresh_token, None).await.unwrap();
    let access = codec.verify(&refreshed.access_token).unwrap();

    assert!(!access.claims().approved);
    assert_eq!(access.claims().email, who.email);
}

#[test]
fn test_tampered_payload_fails_signature() {
    let codec = primary_codec();
    let pair = codec.issue_pair(&identity(), false).unwrap();

    let parts: Vec<&str> = pair.access_token.split('.').collect();
    let mut claims: serde_json::Value =
        serde_json::from_slice(&base64_url::decode(parts[1]).unwrap()).unwrap();
    claims["email"] = serde_json::json!("admin@openshift.io");
    let forged = format!(
        "{}.{}.{}",
        parts[0],
        base64_url::encode(&serde_json::to_vec(&claims).unwrap()),
        parts[2]
    );

    assert!(matches!(codec.verify(&forged), Err(NilaTokenError::BadSignature)));
}

#[test]
fn test_signature_from_another_key_fails() {
    let codec = primary_codec();
    let pair = codec.issue_pair(&identity(), false).unwrap();
    let rotated = codec_with_keys(vec![KeyPair::from_private_pem(ROTATED_PEM, None).unwrap()]);
    let other = rotated.issue_pair(&identity(), false).unwrap();

    // Primary header and payload with a signature made by the other key.
    let parts: Vec<&str> = pair.access_token.split('.').collect();
    let other_signature = other.access_token.rsplit('.').next().unwrap();
    let forged = format!("{}.{}.{}", parts[0], parts[1], other_signature);

    assert!(matches!(codec.verify(&forged), Err(NilaTokenError::BadSignature)));
}

#[test]
fn test_unknown_kid_is_distinct_from_bad_signature() {
    let codec = primary_codec();
    let rotated = codec_with_keys(vec![KeyPair::from_private_pem(ROTATED_PEM, None).unwrap()]);
    let pair = rotated.issue_pair(&identity(), false).unwrap();

    let err = codec.verify(&pair.access_token).unwrap_err();
    assert!(matches!(err, NilaTokenError::UnknownKey(_)));
    assert!(err.is_unauthorized());
}

#[test]
fn test_expired_token_is_rejected() {
    let codec = primary_codec();
    let (access, _) = codec.build_access_and_refresh(&identity(), false);

    let mut expired = access.into_claims();
    expired.iat -= 2 * THIRTY_DAYS;
    expired.exp = expired.iat + THIRTY_DAYS;
    let token = codec.sign(&TokenDraft::new(expired.clone())).unwrap();

    assert!(matches!(codec.verify(&token), Err(NilaTokenError::Expired(exp)) if exp == expired.exp));
}

#[test]
fn test_malformed_tokens_are_rejected() {
    let codec = primary_codec();
    for token in ["", "7423742yuuiy-INVALID-73842342389h", "a.b", "a.b.c.d", "eyJ.eyJ.sig"] {
        let err = codec.verify(token).unwrap_err();
        assert!(matches!(err, NilaTokenError::MalformedToken(_)), "{:?} for {:?}", err, token);
    }
}

#[test]
fn test_permission_token_flow() {
    init_tracing();
    let codec = primary_codec();
    let builder = PermissionTokenBuilder::new(codec.clone());
    let pair = codec.issue_pair(&identity(), false).unwrap();

    let permissions = vec![
        Permission::new(Some("resource-b".to_string()), ["view"]),
        Permission::new(Some("resource-a".to_string()), ["manage", "view"]),
        Permission::new(None, ["list"]),
    ];
    let rpt = builder.issue(&pair.access_token, permissions.clone()).expect("RPT should be issued");
    let verified = codec.verify(&rpt).unwrap();

    assert_eq!(verified.kind(), TokenKind::Permission);
    assert_eq!(verified.claims().permissions.as_ref(), Some(&permissions));

    // The refresh token never becomes a permission base.
    assert!(builder.issue(&pair.refresh_token, permissions).is_err());
}

#[test]
fn test_key_rotation_keeps_old_tokens_verifiable() {
    init_tracing();
    let codec = primary_codec();
    let store = codec.key_store();
    let primary_kid = store.active_kid().unwrap();
    let old = codec.issue_pair(&identity(), false).unwrap();

    let rotated = KeyPair::from_private_pem(ROTATED_PEM, None).unwrap();
    let rotated_kid = rotated.kid().to_string();
    store.add_key(rotated, true).expect("Failed to add rotated key");

    let new = codec.issue_pair(&identity(), false).unwrap();
    assert_eq!(codec.parse_header(&new.access_token).unwrap().kid, Some(rotated_kid.clone()));
    assert_eq!(codec.verify(&old.access_token).unwrap().kid(), primary_kid);
    assert_eq!(codec.verify(&new.access_token).unwrap().kid(), rotated_kid);

    store.retire(&primary_kid).expect("Failed to retire old key");
    assert!(matches!(codec.verify(&old.access_token), Err(NilaTokenError::UnknownKey(_))));
    assert!(codec.verify(&new.access_token).is_ok());
}

#[test]
fn test_published_jwks_verifies_tokens() {
    let issuer = primary_codec();
    let pair = issuer.issue_pair(&identity(), false).unwrap();

    let jwks: JsonWebKeySet =
        serde_json::from_value(serde_json::to_value(issuer.key_store().public_jwks()).unwrap()).unwrap();
    let verifier = TokenCodec::new(token_config(), Arc::new(KeyStore::from_jwks(&jwks).unwrap())).unwrap();

    assert!(verifier.verify(&pair.access_token).is_ok());
    assert!(matches!(
        verifier.issue_pair(&identity(), false),
        Err(NilaTokenError::NoActiveSigningKey)
    ));
}

#[tokio::test]
async fn test_concurrent_verification() {
    let codec = primary_codec();
    let pair = codec.issue_pair(&identity(), false).unwrap();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let codec = codec.clone();
        let token = pair.access_token.clone();
        handles.push(tokio::spawn(async move { codec.verify(&token).map(|v| v.subject()) }));
    }
    let expected = codec.verify(&pair.access_token).unwrap().subject();
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), expected);
    }
}

#[test]
fn test_service_account_signs_once_under_concurrency() {
    let codec = primary_codec();
    let signer = ServiceAccountSigner::new(codec.clone());

    let tokens: Vec<String> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let signer = signer.clone();
                scope.spawn(move || signer.token().map(str::to_string))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap().unwrap()).collect()
    });

    assert!(tokens.iter().all(|t| t == &tokens[0]));
    let verified = codec.verify(&tokens[0]).unwrap();
    assert_eq!(verified.subject(), codec.config().service_account.id);
    assert_eq!(verified.claims().exp, 0);
}

#[test]
fn test_locate_from_verified_context() {
    let codec = primary_codec();
    let who = identity();
    let pair = codec.issue_pair(&who, false).unwrap();
    let verified = codec.verify(&pair.access_token).unwrap();

    let context = SecurityContext::from_verified(&verified).unwrap();
    assert_eq!(locate(&context).unwrap(), who.id);
    assert!(matches!(locate(&SecurityContext::new()), Err(NilaTokenError::MissingToken)));
}

#[test]
fn test_unauthorized_error_gets_login_challenge() {
    let codec = primary_codec();
    let challenge = codec.login_challenge().unwrap();
    let mut headers = reqwest::header::HeaderMap::new();

    let err = codec.verify("not-a-token").unwrap_err();
    let err = challenge.mark_login_required_on_error(err, &mut headers);
    challenge.mark_login_required(&mut headers);

    assert!(matches!(err, NilaTokenError::MalformedToken(_)));
    assert_eq!(
        headers.get(reqwest::header::WWW_AUTHENTICATE).unwrap(),
        "LOGIN url=http://localhost/api/login, description=\"re-login is required\""
    );
    let exposed: Vec<_> = headers.get_all(reqwest::header::ACCESS_CONTROL_EXPOSE_HEADERS).iter().collect();
    assert_eq!(exposed, vec!["WWW-Authenticate"]);
}

#[test]
fn test_config_and_key_set_from_yaml() {
    // --- 1. SETUP ---
    let dir = tempdir().unwrap();
    let key_path = dir.path().join("primary.pem");
    File::create(&key_path).unwrap().write_all(PRIMARY_PEM.as_bytes()).unwrap();

    let service_account = Uuid::new_v4();
    let yaml = format!(
        r#"
issuer: https://auth.openshift.io
audience: https://openshift.io
allowed_origins:
  - https://openshift.io
login_url: http://localhost/api/login
service_account:
  id: {service_account}
  username: fabric8-auth
  email: fabric8-auth@redhat.com
"#
    );
    let keys_yaml = format!(
        r#"
keys:
  - key:
      type: rsa_pem_file
      value: {path}
  - kid: rotated
    key:
      type: rsa_public_pem
      value: |
{public}
active_kid: null
"#,
        path = key_path.display(),
        public = ROTATED_PUBLIC_PEM
            .lines()
            .map(|l| format!("        {}", l))
            .collect::<Vec<_>>()
            .join("\n"),
    );

    // --- 2. LOAD ---
    let config: TokenConfig = serde_yaml::from_str(&yaml).expect("Config should deserialize");
    config.validate().expect("Config should validate");
    assert_eq!(config.token_ttl_seconds as i64, THIRTY_DAYS);
    assert_eq!(config.service_account.id, service_account);

    let key_config: KeySetConfig = serde_yaml::from_str(&keys_yaml).expect("Key config should deserialize");
    let store = KeyStore::from_config(&key_config).expect("Key store should load");

    // --- 3. ASSERTIONS ---
    let mut kids = store.kids();
    kids.sort();
    assert_eq!(kids.len(), 2);
    assert!(kids.contains(&"rotated".to_string()));
    assert_ne!(store.active_kid().as_deref(), Some("rotated"));

    let codec = TokenCodec::new(config, Arc::new(store)).unwrap();
    let pair = codec.issue_pair(&identity(), false).unwrap();
    assert!(codec.verify(&pair.access_token).is_ok());
}

#[test]
fn test_missing_configuration_is_reported() {
    let result = ConfigBuilder::new()
        .issuer("https://auth.openshift.io")
        .unwrap()
        .audience("https://openshift.io")
        .build();
    assert!(matches!(result, Err(NilaTokenError::MissingConfiguration(field)) if field == "login_url"));

    assert!(matches!(ConfigBuilder::new().issuer("not a url"), Err(NilaTokenError::InvalidUrl(_))));
}

#[test]
fn test_numeric_claims_agree() {
    assert_eq!(to_integer(60i32).unwrap(), 60);
    assert_eq!(to_integer(60i64).unwrap(), 60);
    assert_eq!(to_integer(60.0f32).unwrap(), 60);
    assert_eq!(to_integer(60.0f64).unwrap(), 60);
    assert_eq!(to_integer("60").unwrap(), 60);
    assert!(matches!(to_integer("sixty"), Err(NilaTokenError::Conversion(_))));
}

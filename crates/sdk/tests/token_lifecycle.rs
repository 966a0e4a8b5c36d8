//! Integration tests for registration and the token grant pipeline.
//!
//! Every test runs against a wiremock server standing in for the identity
//! service, with RS256 test keys published on the public-keys endpoint.

use std::sync::Arc;

use nimbusid::testutil::{craft_raw_token, standard_claims, MockKeyStore, TestRsaKey};
use nimbusid::{
    Error, MemoryPreferenceStore, PersistencePolicy, Region, RegistrationManager, ServiceConfig,
    TokenManager,
};
use serde_json::{json, Value};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TENANT: &str = "tenant-1";
const CLIENT_ID: &str = "client-1";
const REDIRECT_URI: &str = "app://callback";

struct Harness {
    server: MockServer,
    config: Arc<ServiceConfig>,
    registration: Arc<RegistrationManager>,
    tokens: Arc<TokenManager>,
    prefs: Arc<MemoryPreferenceStore>,
    key: TestRsaKey,
}

async fn harness() -> Harness {
    let server = MockServer::start().await;
    let config = Arc::new(ServiceConfig::new(
        TENANT,
        Region::Custom(server.uri()),
        REDIRECT_URI,
    ));
    let prefs = Arc::new(MemoryPreferenceStore::new());
    let key_store = Arc::new(MockKeyStore::new());
    let registration = Arc::new(RegistrationManager::new(
        config.clone(),
        key_store.clone(),
        prefs.clone(),
    ));
    let tokens = Arc::new(TokenManager::new(
        config.clone(),
        registration.clone(),
        key_store,
        prefs.clone(),
        PersistencePolicy::Always,
    ));

    Mock::given(method("POST"))
        .and(path(format!("/oauth/v4/{TENANT}/clients")))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "client_id": CLIENT_ID,
            "redirect_uris": [REDIRECT_URI],
        })))
        .mount(&server)
        .await;

    Harness {
        server,
        config,
        registration,
        tokens,
        prefs,
        key: TestRsaKey::generate(),
    }
}

impl Harness {
    async fn publish_keys(&self) {
        Mock::given(method("GET"))
            .and(path(format!("/oauth/v4/{TENANT}/publickeys")))
            .respond_with(ResponseTemplate::new(200).set_body_json(self.key.keys_response()))
            .mount(&self.server)
            .await;
    }

    fn claims(&self) -> Value {
        standard_claims(&self.config.issuer(), CLIENT_ID, TENANT)
    }

    fn token_response(&self) -> Value {
        json!({
            "access_token": self.key.sign(&self.claims()),
            "id_token": self.key.sign(&self.claims()),
            "refresh_token": "rt-1",
            "token_type": "Bearer",
            "expires_in": 3600,
        })
    }

    async fn mount_token_response(&self, template: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path(format!("/oauth/v4/{TENANT}/token")))
            .respond_with(template)
            .mount(&self.server)
            .await;
    }
}

#[tokio::test]
async fn auth_code_exchange_registers_validates_and_stores() {
    let harness = harness().await;
    harness.publish_keys().await;

    // The token request must carry the signed client-authentication header
    // and the authorization-code grant fields.
    Mock::given(method("POST"))
        .and(path(format!("/oauth/v4/{TENANT}/token")))
        .and(header("authorization", format!("Bearer signed.{CLIENT_ID}")))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=abc123"))
        .and(body_string_contains("client_id=client-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(harness.token_response()))
        .expect(1)
        .mount(&harness.server)
        .await;

    let bundle = harness
        .tokens
        .obtain_tokens_auth_code("abc123", REDIRECT_URI)
        .await
        .unwrap();

    assert_eq!(bundle.access.tenant(), Some(TENANT));
    assert!(bundle.identity.is_some());
    assert_eq!(bundle.refresh.as_ref().map(|r| r.raw()), Some("rt-1"));

    // Latest references are populated and the refresh token persisted.
    assert!(harness.tokens.latest_access_token().await.is_some());
    assert!(harness.tokens.latest_identity_token().await.is_some());
    assert_eq!(
        harness.tokens.stored_refresh_token().await.as_deref(),
        Some("rt-1")
    );
    let auth_header = harness.tokens.latest_authorization_header().await.unwrap();
    assert!(auth_header.starts_with("Bearer "));
    assert_eq!(auth_header.split(' ').count(), 3);

    // Registration happened once and is now stored.
    assert_eq!(
        harness.registration.registered_client_id().as_deref(),
        Some(CLIENT_ID)
    );
}

#[tokio::test]
async fn password_grant_sends_credentials_and_hint() {
    let harness = harness().await;
    harness.publish_keys().await;

    Mock::given(method("POST"))
        .and(path(format!("/oauth/v4/{TENANT}/token")))
        .and(body_string_contains("grant_type=password"))
        .and(body_string_contains("username=ada"))
        .and(body_string_contains("password=secret"))
        .and(body_string_contains("appid_access_token=hint-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(harness.token_response()))
        .expect(1)
        .mount(&harness.server)
        .await;

    let bundle = harness
        .tokens
        .obtain_tokens_password("ada", "secret", Some("hint-token"))
        .await
        .unwrap();
    assert!(bundle.identity.is_some());
}

#[tokio::test]
async fn refresh_grant_uses_stored_token_and_retains_identity() {
    let harness = harness().await;
    harness.publish_keys().await;

    Mock::given(method("POST"))
        .and(path(format!("/oauth/v4/{TENANT}/token")))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(harness.token_response()))
        .mount(&harness.server)
        .await;
    let first = harness
        .tokens
        .obtain_tokens_auth_code("abc123", REDIRECT_URI)
        .await
        .unwrap();
    let original_identity = first.identity.unwrap().raw().to_string();

    // The refresh response rotates the access and refresh tokens but omits
    // the identity token.
    Mock::given(method("POST"))
        .and(path(format!("/oauth/v4/{TENANT}/token")))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=rt-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": harness.key.sign(&harness.claims()),
            "refresh_token": "rt-2",
            "token_type": "Bearer",
            "expires_in": 3600,
        })))
        .expect(1)
        .mount(&harness.server)
        .await;

    let refreshed = harness.tokens.obtain_tokens_refresh(None).await.unwrap();

    // The previous identity token is retained when the server does not
    // rotate one.
    assert_eq!(
        refreshed.identity.map(|identity| identity.raw().to_string()),
        Some(original_identity)
    );
    assert_eq!(
        harness.tokens.stored_refresh_token().await.as_deref(),
        Some("rt-2")
    );
}

#[tokio::test]
async fn missing_id_token_fails_parsing() {
    let harness = harness().await;
    harness
        .mount_token_response(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": harness.key.sign(&harness.claims()),
            "token_type": "Bearer",
            "expires_in": 3600,
        })))
        .await;

    let err = harness
        .tokens
        .obtain_tokens_auth_code("abc123", REDIRECT_URI)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TokenParsing(_)));
    assert_eq!(
        err.to_string(),
        "failed to parse server response - no access or identity token"
    );
}

#[tokio::test]
async fn corrupt_token_strings_fail_parsing() {
    let harness = harness().await;
    harness
        .mount_token_response(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "definitely-not-three-parts",
            "id_token": "also.not",
            "token_type": "Bearer",
            "expires_in": 3600,
        })))
        .await;

    let err = harness
        .tokens
        .obtain_tokens_auth_code("abc123", REDIRECT_URI)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "failed to parse server response - corrupt access or identity token"
    );
}

#[tokio::test]
async fn error_description_surfaces_verbatim() {
    let harness = harness().await;
    harness
        .mount_token_response(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "The code has expired",
        })))
        .await;

    let err = harness
        .tokens
        .obtain_tokens_auth_code("abc123", REDIRECT_URI)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Authentication(_)));
    assert_eq!(err.to_string(), "The code has expired");
}

#[tokio::test]
async fn error_without_description_is_generic() {
    let harness = harness().await;
    harness
        .mount_token_response(
            ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})),
        )
        .await;

    let err = harness
        .tokens
        .obtain_tokens_auth_code("abc123", REDIRECT_URI)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "failed to retrieve tokens");
}

#[tokio::test]
async fn unparsable_error_body_is_generic() {
    let harness = harness().await;
    harness
        .mount_token_response(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .await;

    let err = harness
        .tokens
        .obtain_tokens_auth_code("abc123", REDIRECT_URI)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "failed to retrieve tokens");
}

#[tokio::test]
async fn token_without_kid_fails_validation() {
    let harness = harness().await;
    let raw = craft_raw_token(&json!({"alg": "RS256"}), &harness.claims());
    harness
        .mount_token_response(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": raw,
            "id_token": raw,
            "expires_in": 3600,
        })))
        .await;

    let err = harness
        .tokens
        .obtain_tokens_auth_code("abc123", REDIRECT_URI)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TokenValidation(_)));
    assert_eq!(err.to_string(), "Invalid token: Missing kid");
}

#[tokio::test]
async fn token_with_rejected_algorithm_fails_validation() {
    let harness = harness().await;
    let raw = craft_raw_token(
        &json!({"alg": "none", "kid": harness.key.kid}),
        &harness.claims(),
    );
    harness
        .mount_token_response(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": raw,
            "id_token": raw,
            "expires_in": 3600,
        })))
        .await;

    let err = harness
        .tokens
        .obtain_tokens_auth_code("abc123", REDIRECT_URI)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Invalid token: Invalid alg");
}

#[tokio::test]
async fn unknown_kid_fails_after_refetch() {
    let harness = harness().await;
    // The published key set does not contain the signing key's kid.
    Mock::given(method("GET"))
        .and(path(format!("/oauth/v4/{TENANT}/publickeys")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"keys": []})))
        .mount(&harness.server)
        .await;
    harness
        .mount_token_response(ResponseTemplate::new(200).set_body_json(harness.token_response()))
        .await;

    let err = harness
        .tokens
        .obtain_tokens_auth_code("abc123", REDIRECT_URI)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Could not find public key for kid");
}

#[tokio::test]
async fn key_fetch_failure_fails_validation() {
    let harness = harness().await;
    Mock::given(method("GET"))
        .and(path(format!("/oauth/v4/{TENANT}/publickeys")))
        .respond_with(ResponseTemplate::new(500))
        .mount(&harness.server)
        .await;
    harness
        .mount_token_response(ResponseTemplate::new(200).set_body_json(harness.token_response()))
        .await;

    let err = harness
        .tokens
        .obtain_tokens_auth_code("abc123", REDIRECT_URI)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "failed to get public key from server");
}

#[tokio::test]
async fn unparsable_key_response_fails_validation() {
    let harness = harness().await;
    Mock::given(method("GET"))
        .and(path(format!("/oauth/v4/{TENANT}/publickeys")))
        .respond_with(ResponseTemplate::new(200).set_body_string("not a key set"))
        .mount(&harness.server)
        .await;
    harness
        .mount_token_response(ResponseTemplate::new(200).set_body_json(harness.token_response()))
        .await;

    let err = harness
        .tokens
        .obtain_tokens_auth_code("abc123", REDIRECT_URI)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "failed to parse public key response from server"
    );
}

#[tokio::test]
async fn forged_signature_fails_verification() {
    let harness = harness().await;
    // Publish a different key under the signing key's kid.
    let imposter = TestRsaKey::generate();
    let mut keys = imposter.keys_response();
    keys["keys"][0]["kid"] = json!(harness.key.kid);
    Mock::given(method("GET"))
        .and(path(format!("/oauth/v4/{TENANT}/publickeys")))
        .respond_with(ResponseTemplate::new(200).set_body_json(keys))
        .mount(&harness.server)
        .await;
    harness
        .mount_token_response(ResponseTemplate::new(200).set_body_json(harness.token_response()))
        .await;

    let err = harness
        .tokens
        .obtain_tokens_auth_code("abc123", REDIRECT_URI)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Token verification failed");
}

#[tokio::test]
async fn wrong_issuer_audience_or_tenant_fail_validation() {
    for (claim, value, message) in [
        ("iss", json!("https://evil.example.com"), "Token verification failed: invalid issuer"),
        ("aud", json!(["someone-else"]), "Token verification failed: invalid audience"),
        ("tenant", json!("other-tenant"), "Token verification failed: invalid tenant"),
    ] {
        let harness = harness().await;
        harness.publish_keys().await;
        let mut claims = harness.claims();
        claims[claim] = value;
        let raw = harness.key.sign(&claims);
        harness
            .mount_token_response(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": raw,
                "id_token": raw,
                "expires_in": 3600,
            })))
            .await;

        let err = harness
            .tokens
            .obtain_tokens_auth_code("abc123", REDIRECT_URI)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), message);
    }
}

#[tokio::test]
async fn clear_stored_tokens_drops_everything() {
    let harness = harness().await;
    harness.publish_keys().await;
    harness
        .mount_token_response(ResponseTemplate::new(200).set_body_json(harness.token_response()))
        .await;
    harness
        .tokens
        .obtain_tokens_auth_code("abc123", REDIRECT_URI)
        .await
        .unwrap();

    harness.tokens.clear_stored_tokens().await;

    assert!(harness.tokens.latest_access_token().await.is_none());
    assert!(harness.tokens.latest_identity_token().await.is_none());
    assert!(harness.tokens.latest_refresh_token().await.is_none());
    assert!(harness.tokens.stored_refresh_token().await.is_none());
}

#[tokio::test]
async fn tenant_mismatch_forces_fresh_registration() {
    let harness = harness().await;
    harness.registration.ensure_registered().await.unwrap();
    assert_eq!(
        harness.registration.registered_client_id().as_deref(),
        Some(CLIENT_ID)
    );

    // Same preference store, different tenant: the stale record must not be
    // reused.
    let other_config = Arc::new(ServiceConfig::new(
        "tenant-2",
        Region::Custom(harness.server.uri()),
        REDIRECT_URI,
    ));
    let other_registration = RegistrationManager::new(
        other_config,
        Arc::new(MockKeyStore::new()),
        harness.prefs.clone(),
    );

    Mock::given(method("POST"))
        .and(path("/oauth/v4/tenant-2/clients"))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(json!({"client_id": "client-2"})),
        )
        .expect(1)
        .mount(&harness.server)
        .await;

    let client_id = other_registration.ensure_registered().await.unwrap();
    assert_eq!(client_id, "client-2");
    assert_eq!(
        other_registration.registered_client_id().as_deref(),
        Some("client-2")
    );
}

#[tokio::test]
async fn registration_failure_persists_nothing() {
    let server = MockServer::start().await;
    let config = Arc::new(ServiceConfig::new(
        TENANT,
        Region::Custom(server.uri()),
        REDIRECT_URI,
    ));
    let prefs = Arc::new(MemoryPreferenceStore::new());
    let registration =
        RegistrationManager::new(config, Arc::new(MockKeyStore::new()), prefs.clone());

    Mock::given(method("POST"))
        .and(path(format!("/oauth/v4/{TENANT}/clients")))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_redirect_uri",
            "error_description": "redirect URI not allowed",
        })))
        .mount(&server)
        .await;

    let err = registration.ensure_registered().await.unwrap_err();
    assert!(matches!(err, Error::Registration(_)));
    assert_eq!(err.to_string(), "redirect URI not allowed");
    assert!(registration.registered_client_id().is_none());
    assert!(registration.stored_registration().is_none());
}

#[tokio::test]
async fn registration_response_without_client_id_fails() {
    let server = MockServer::start().await;
    let config = Arc::new(ServiceConfig::new(
        TENANT,
        Region::Custom(server.uri()),
        REDIRECT_URI,
    ));
    let registration = RegistrationManager::new(
        config,
        Arc::new(MockKeyStore::new()),
        Arc::new(MemoryPreferenceStore::new()),
    );

    Mock::given(method("POST"))
        .and(path(format!("/oauth/v4/{TENANT}/clients")))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"unexpected": true})))
        .mount(&server)
        .await;

    let err = registration.ensure_registered().await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "failed to parse registration response from server"
    );
}

#[tokio::test]
async fn key_pair_failure_is_fatal_to_registration() {
    let server = MockServer::start().await;
    let config = Arc::new(ServiceConfig::new(
        TENANT,
        Region::Custom(server.uri()),
        REDIRECT_URI,
    ));
    let registration = RegistrationManager::new(
        config,
        Arc::new(MockKeyStore::failing()),
        Arc::new(MemoryPreferenceStore::new()),
    );

    let err = registration.ensure_registered().await.unwrap_err();
    assert_eq!(err.to_string(), "failed to create registration parameters");
    // The endpoint is never reached.
    assert!(server.received_requests().await.unwrap().is_empty());
}

//! Shared test utilities.
//!
//! Helpers for generating RSA test key pairs, minting signed test tokens,
//! crafting raw token strings (for rejection testing), and mock
//! collaborators. Feature-gated behind `testutil` so nothing here leaks into
//! production builds; the crate's own dev-dependency enables the feature for
//! its test targets.

use std::collections::HashMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use rsa::pkcs8::EncodePrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::traits::{SecureKeyStore, UiPresenter, UiResponse};

/// An RS256 signing key pair for tests, with its public half as a JWK.
pub struct TestRsaKey {
    /// Key id placed in minted token headers and the published JWK.
    pub kid: String,
    encoding_key: EncodingKey,
    jwk: Value,
}

impl TestRsaKey {
    /// Generate a fresh 2048-bit RSA key pair with a unique `kid`.
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let private_key =
            RsaPrivateKey::new(&mut rng, 2048).expect("failed to generate test RSA key");
        let pem = private_key
            .to_pkcs8_pem(rsa::pkcs8::LineEnding::LF)
            .expect("failed to encode test RSA key");
        let encoding_key =
            EncodingKey::from_rsa_pem(pem.as_bytes()).expect("failed to load test RSA key");

        let public_key = private_key.to_public_key();
        let kid = format!("test-kid-{}", Uuid::new_v4());
        let jwk = json!({
            "kty": "RSA",
            "use": "sig",
            "alg": "RS256",
            "kid": kid,
            "n": URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
            "e": URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
        });

        Self {
            kid,
            encoding_key,
            jwk,
        }
    }

    /// The public-keys endpoint response body publishing this key.
    #[must_use]
    pub fn keys_response(&self) -> Value {
        json!({ "keys": [self.jwk] })
    }

    /// Mint a signed RS256 token with this key's `kid` and the given claims.
    #[must_use]
    pub fn sign(&self, claims: &Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.kid.clone());
        jsonwebtoken::encode(&header, claims, &self.encoding_key)
            .expect("failed to encode test token")
    }
}

/// Standard claims for a token minted by the test issuer.
#[must_use]
pub fn standard_claims(issuer: &str, client_id: &str, tenant: &str) -> Value {
    let now = Utc::now().timestamp();
    json!({
        "iss": issuer,
        "sub": "user-1",
        "aud": [client_id],
        "exp": now + 3600,
        "iat": now,
        "tenant": tenant,
        "amr": ["cloud_directory"],
    })
}

/// Build a raw compact token from arbitrary header and payload JSON, with a
/// filler signature. Useful for testing rejection of malformed or attack
/// tokens (e.g. `alg: "none"`).
#[must_use]
pub fn craft_raw_token(header: &Value, payload: &Value) -> String {
    let header_b64 = URL_SAFE_NO_PAD.encode(header.to_string().as_bytes());
    let payload_b64 = URL_SAFE_NO_PAD.encode(payload.to_string().as_bytes());
    format!("{header_b64}.{payload_b64}.sig")
}

enum MockKeyStoreMode {
    Working,
    Failing,
}

/// In-memory [`SecureKeyStore`] fake.
///
/// Signing returns a deterministic marker string; the JWK is a fixed
/// placeholder. `failing()` builds a store whose every operation errors, for
/// exercising the key-store failure paths.
pub struct MockKeyStore {
    mode: MockKeyStoreMode,
    items: Mutex<HashMap<String, String>>,
}

impl MockKeyStore {
    /// A key store whose operations succeed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            mode: MockKeyStoreMode::Working,
            items: Mutex::new(HashMap::new()),
        }
    }

    /// A key store whose every operation fails.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            mode: MockKeyStoreMode::Failing,
            items: Mutex::new(HashMap::new()),
        }
    }

    fn check(&self) -> Result<(), String> {
        match self.mode {
            MockKeyStoreMode::Working => Ok(()),
            MockKeyStoreMode::Failing => Err("key store unavailable".to_string()),
        }
    }
}

impl Default for MockKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SecureKeyStore for MockKeyStore {
    fn generate_key_pair(
        &self,
        _size_bits: usize,
        public_tag: &str,
        private_tag: &str,
    ) -> Result<(), String> {
        self.check()?;
        let mut items = self.items.lock();
        items.insert(public_tag.to_string(), "public-key".to_string());
        items.insert(private_tag.to_string(), "private-key".to_string());
        Ok(())
    }

    fn sign(&self, payload: &str, _private_tag: &str) -> Result<String, String> {
        self.check()?;
        Ok(format!("signed.{payload}"))
    }

    fn public_key_jwk(&self, _public_tag: &str) -> Result<Value, String> {
        self.check()?;
        Ok(json!({
            "kty": "RSA",
            "use": "sig",
            "n": "placeholder-modulus",
            "e": "AQAB",
        }))
    }

    fn save_item(&self, label: &str, value: &str) -> Result<(), String> {
        self.check()?;
        self.items.lock().insert(label.to_string(), value.to_string());
        Ok(())
    }

    fn get_item(&self, label: &str) -> Option<String> {
        self.items.lock().get(label).cloned()
    }

    fn delete_item(&self, label: &str) -> Result<(), String> {
        self.check()?;
        self.items.lock().remove(label);
        Ok(())
    }
}

/// One scripted behavior of a [`MockUiPresenter`].
pub enum UiScript {
    /// Resolve with this response verbatim.
    Respond(UiResponse),
    /// Act like a user who completes the flow: redirect back to the
    /// presented URL's `redirect_uri` with this grant code, echoing the
    /// `state` parameter when one was sent.
    AuthorizeWithCode(String),
}

/// Scripted [`UiPresenter`] fake.
///
/// Resolves each `present` call with the next scripted behavior and records
/// the presented URLs for assertions.
pub struct MockUiPresenter {
    script: Mutex<Vec<UiScript>>,
    presented: Mutex<Vec<String>>,
}

impl MockUiPresenter {
    /// A presenter that runs `script`, in order.
    #[must_use]
    pub fn scripted(script: Vec<UiScript>) -> Self {
        let mut script = script;
        script.reverse();
        Self {
            script: Mutex::new(script),
            presented: Mutex::new(Vec::new()),
        }
    }

    /// A presenter that completes one flow with the given grant code.
    #[must_use]
    pub fn authorizing(code: impl Into<String>) -> Self {
        Self::scripted(vec![UiScript::AuthorizeWithCode(code.into())])
    }

    /// A presenter that delivers one redirect verbatim.
    #[must_use]
    pub fn redirecting(redirect_url: impl Into<String>) -> Self {
        Self::scripted(vec![UiScript::Respond(UiResponse::Redirect(
            redirect_url.into(),
        ))])
    }

    /// A presenter whose first presentation is dismissed by the user.
    #[must_use]
    pub fn canceling() -> Self {
        Self::scripted(vec![UiScript::Respond(UiResponse::Canceled)])
    }

    /// The URLs presented so far.
    #[must_use]
    pub fn presented(&self) -> Vec<String> {
        self.presented.lock().clone()
    }
}

#[async_trait::async_trait]
impl UiPresenter for MockUiPresenter {
    async fn present(&self, url: &str) -> Result<UiResponse, String> {
        self.presented.lock().push(url.to_string());
        let script = self
            .script
            .lock()
            .pop()
            .ok_or_else(|| "no scripted UI response".to_string())?;
        match script {
            UiScript::Respond(response) => Ok(response),
            UiScript::AuthorizeWithCode(code) => {
                let presented = url::Url::parse(url).map_err(|e| e.to_string())?;
                let params: HashMap<String, String> =
                    presented.query_pairs().into_owned().collect();
                let redirect_uri = params
                    .get("redirect_uri")
                    .ok_or_else(|| "presented URL missing redirect_uri".to_string())?;
                let mut redirect = format!("{redirect_uri}?code={code}");
                if let Some(state) = params.get("state") {
                    redirect.push_str(&format!("&state={state}"));
                }
                Ok(UiResponse::Redirect(redirect))
            }
        }
    }
}

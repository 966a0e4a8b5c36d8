//! Dynamic client registration.
//!
//! A registration record is valid only for the tenant it was created under.
//! When the stored tenant differs from the configured tenant the stale record
//! is discarded before a fresh registration is attempted, so the SDK never
//! authenticates under a stale client id.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::http;
use crate::prefs::{JsonPreference, PersistencePolicy, StringPreference};
use crate::traits::{PreferenceStore, SecureKeyStore};

const PREF_CLIENT_ID: &str = "client_id";
const PREF_CLIENT_TENANT: &str = "client_tenant";
const PREF_REGISTRATION: &str = "registration";

/// Size of the client key pair generated at registration.
const KEY_SIZE_BITS: usize = 2048;

/// A persisted client registration record.
///
/// Fields beyond the ones the SDK reads are kept in the raw-map fallback so
/// the full server response round-trips through storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    /// The client id issued by the identity service.
    pub client_id: String,
    /// Redirect URIs registered for this client.
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    /// Remaining response fields, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Ensures the client is registered with the identity service for the
/// configured tenant, performing one-time dynamic registration when needed.
pub struct RegistrationManager {
    config: Arc<ServiceConfig>,
    key_store: Arc<dyn SecureKeyStore>,
    client_id: StringPreference,
    client_tenant: StringPreference,
    registration: JsonPreference,
    http: reqwest::Client,
}

impl RegistrationManager {
    /// Create a registration manager over the given collaborators.
    #[must_use]
    pub fn new(
        config: Arc<ServiceConfig>,
        key_store: Arc<dyn SecureKeyStore>,
        prefs: Arc<dyn PreferenceStore>,
    ) -> Self {
        Self {
            config,
            key_store,
            client_id: StringPreference::new(PREF_CLIENT_ID, PersistencePolicy::Always, prefs.clone()),
            client_tenant: StringPreference::new(
                PREF_CLIENT_TENANT,
                PersistencePolicy::Always,
                prefs.clone(),
            ),
            registration: JsonPreference::new(PREF_REGISTRATION, PersistencePolicy::Always, prefs),
            http: http::client(),
        }
    }

    /// Key-store tag for the client public key.
    #[must_use]
    pub fn public_key_tag(&self) -> String {
        format!("{}.publickey", self.config.tenant())
    }

    /// Key-store tag for the client private key.
    #[must_use]
    pub fn private_key_tag(&self) -> String {
        format!("{}.privatekey", self.config.tenant())
    }

    /// The stored client id, if a registration exists for the configured
    /// tenant. A stored id created under a different tenant does not count.
    #[must_use]
    pub fn registered_client_id(&self) -> Option<String> {
        let client_id = self.client_id.get()?;
        let stored_tenant = self.client_tenant.get()?;
        (stored_tenant == self.config.tenant()).then_some(client_id)
    }

    /// Ensure a registration exists for the configured tenant, returning its
    /// client id.
    ///
    /// Succeeds immediately without a network call when a matching
    /// registration is already stored. Otherwise generates a fresh key pair,
    /// submits the public JWK to the registration endpoint, and persists the
    /// result. Nothing is persisted on failure.
    ///
    /// # Errors
    /// `Error::Registration` when key material cannot be created or the
    /// server rejects the registration; `Error::Transport` when the request
    /// itself fails.
    pub async fn ensure_registered(&self) -> Result<String> {
        if let Some(client_id) = self.registered_client_id() {
            debug!(client_id = %client_id, "Client already registered for tenant");
            return Ok(client_id);
        }

        // A record under another tenant must not survive the new attempt.
        self.clear_registration();

        let public_tag = self.public_key_tag();
        let private_tag = self.private_key_tag();
        self.key_store
            .generate_key_pair(KEY_SIZE_BITS, &public_tag, &private_tag)
            .map_err(|_| Error::Registration("failed to create registration parameters".to_string()))?;
        let jwk = self
            .key_store
            .public_key_jwk(&public_tag)
            .map_err(|_| Error::Registration("failed to create registration parameters".to_string()))?;

        let app = self.config.app_identity();
        let body = json!({
            "client_name": app.client_name,
            "software_id": app.software_id,
            "software_version": app.software_version,
            "client_type": "native",
            "redirect_uris": [self.config.redirect_uri()],
            "response_types": ["code"],
            "grant_types": ["authorization_code", "password", "refresh_token"],
            "token_endpoint_auth_method": "private_key_jwt",
            "jwks": {"keys": [jwk]},
        });

        debug!(url = %self.config.registration_url(), "Registering client");
        let response = self
            .http
            .post(self.config.registration_url())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;
        if !status.is_success() {
            let message = http::error_description(&bytes)
                .unwrap_or_else(|| "failed to register client".to_string());
            return Err(Error::Registration(message));
        }

        let registration: Registration = serde_json::from_slice(&bytes).map_err(|_| {
            Error::Registration("failed to parse registration response from server".to_string())
        })?;
        if registration.client_id.is_empty() {
            return Err(Error::Registration(
                "failed to parse registration response from server".to_string(),
            ));
        }

        self.persist(&registration)?;
        info!(client_id = %registration.client_id, "Client registered");
        Ok(registration.client_id)
    }

    /// The full stored registration record, if one exists.
    #[must_use]
    pub fn stored_registration(&self) -> Option<Registration> {
        let value = self.registration.get_json()?;
        serde_json::from_value(value).ok()
    }

    fn persist(&self, registration: &Registration) -> Result<()> {
        let record = serde_json::to_value(registration)
            .map_err(|_| Error::Registration("failed to persist registration".to_string()))?;
        self.registration
            .set_json(&record)
            .and_then(|()| self.client_id.set(&registration.client_id))
            .and_then(|()| self.client_tenant.set(self.config.tenant()))
            .map_err(Error::Registration)
    }

    fn clear_registration(&self) {
        self.client_id.clear();
        self.client_tenant.clear();
        self.registration.clear();
    }
}

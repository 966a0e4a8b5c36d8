//! Collaborator traits.
//!
//! These traits abstract the platform capabilities the SDK consumes — secure
//! key storage, persisted preferences, and in-app browser presentation — so
//! the embedding application supplies real implementations and tests inject
//! fakes. Collaborator failures travel as plain strings and are converted to
//! the crate error taxonomy at each component boundary.

use async_trait::async_trait;

/// Outcome of presenting a URL and waiting for the platform callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiResponse {
    /// The platform delivered the full redirect URL.
    Redirect(String),
    /// The user dismissed the browser without completing the flow.
    Canceled,
}

/// Secure asymmetric key storage and signing.
///
/// Backed by the platform key store (hardware-backed where available). Key
/// pairs are referenced by two stable tags; named secrets live alongside
/// them.
pub trait SecureKeyStore: Send + Sync {
    /// Generate an asymmetric key pair of `size_bits`, stored under the given
    /// tags. Replaces any pair previously stored under the same tags.
    ///
    /// # Errors
    /// Returns an error if key generation or storage fails.
    fn generate_key_pair(
        &self,
        size_bits: usize,
        public_tag: &str,
        private_tag: &str,
    ) -> Result<(), String>;

    /// Sign `payload` with the private key stored under `private_tag`,
    /// returning the encoded signature.
    ///
    /// # Errors
    /// Returns an error if the key is missing or signing fails.
    fn sign(&self, payload: &str, private_tag: &str) -> Result<String, String>;

    /// The public key stored under `public_tag`, as a JWK JSON object.
    ///
    /// # Errors
    /// Returns an error if the key is missing or cannot be exported.
    fn public_key_jwk(&self, public_tag: &str) -> Result<serde_json::Value, String>;

    /// Store a named secret.
    ///
    /// # Errors
    /// Returns an error if storage fails.
    fn save_item(&self, label: &str, value: &str) -> Result<(), String>;

    /// Retrieve a named secret, or `None` if absent.
    fn get_item(&self, label: &str) -> Option<String>;

    /// Delete a named secret. Deleting an absent secret is not an error.
    ///
    /// # Errors
    /// Returns an error if the store rejects the deletion.
    fn delete_item(&self, label: &str) -> Result<(), String>;
}

/// Durable named-value storage for SDK preferences.
///
/// Implementations decide where values live (user defaults, keychain, a
/// file); the SDK layers typed handles and persistence policies on top in
/// [`prefs`](crate::prefs).
pub trait PreferenceStore: Send + Sync {
    /// Read a named value, or `None` if absent.
    fn get(&self, name: &str) -> Option<String>;

    /// Write a named value.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    fn set(&self, name: &str, value: &str) -> Result<(), String>;

    /// Remove a named value. Removing an absent value is not an error.
    fn clear(&self, name: &str);
}

/// In-app browser presentation with redirect capture.
///
/// The implementation presents the URL, waits for the platform to deliver a
/// redirect on the app's custom URI scheme (or a dismissal), and resolves
/// exactly once.
#[async_trait]
pub trait UiPresenter: Send + Sync {
    /// Present `url` and wait for the redirect callback or a cancellation.
    ///
    /// # Errors
    /// Returns an error if the browser could not be presented at all.
    async fn present(&self, url: &str) -> Result<UiResponse, String>;
}

//! Anti-forgery `state` parameter for authorization requests.
//!
//! A fresh random nonce is generated when an authorization URL is built and
//! matched against the `state` query parameter on the redirect callback. Each
//! nonce is single-use: it is consumed by the attempt that created it.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;

/// Generate a random state token for callback-injection protection.
///
/// Returns a URL-safe base64-encoded random string of 32 bytes (43
/// characters).
#[must_use]
pub fn generate_state() -> String {
    let mut rng = rand::thread_rng();
    let random_bytes: Vec<u8> = (0..32).map(|_| rng.gen()).collect();
    URL_SAFE_NO_PAD.encode(random_bytes)
}

/// Validate that the state received in a callback matches the one sent.
#[must_use]
pub fn validate_state(expected: &str, actual: &str) -> bool {
    expected == actual
}

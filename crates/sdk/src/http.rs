//! Shared HTTP client construction and response helpers.

use std::time::Duration;

use serde_json::Value;

/// Timeout applied to every request the SDK sends.
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the shared HTTP client.
pub(crate) fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Build an HTTP client that does not follow redirects.
///
/// The anonymous-login flow reads the grant code out of the `Location`
/// header, so the redirect must be captured rather than followed.
pub(crate) fn no_redirect_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Extract the `error_description` string from an OAuth error body, if the
/// body is JSON and carries one.
pub(crate) fn error_description(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    value
        .get("error_description")
        .and_then(Value::as_str)
        .map(String::from)
}

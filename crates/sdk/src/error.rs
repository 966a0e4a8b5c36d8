//! SDK error taxonomy.
//!
//! Every failure surfaced to a caller is one of the kinds below. Messages are
//! part of the public contract: embedding applications display them directly,
//! so the `Display` of each message-carrying variant is the message itself,
//! with no prefix added.

use thiserror::Error;

/// Errors surfaced by the SDK.
///
/// All variants are terminal for the current attempt; the SDK never retries
/// silently. The only built-in two-step strategy is the "try refresh token,
/// then fall back to interactive login" policy in
/// [`AuthorizationManager::obtain_authorization`](crate::authorization::AuthorizationManager::obtain_authorization).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Dynamic client registration failed.
    #[error("{0}")]
    Registration(String),

    /// A token request was rejected or could not be completed.
    #[error("{0}")]
    Authentication(String),

    /// An authorization flow (interactive, anonymous, or account management)
    /// failed.
    #[error("{0}")]
    Authorization(String),

    /// A server response could not be parsed into tokens.
    #[error("{0}")]
    TokenParsing(String),

    /// A token failed signature or claim validation.
    #[error("{0}")]
    TokenValidation(String),

    /// The underlying HTTP request failed before a response was received.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

impl Error {
    /// The human-readable message for this error.
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

//! NimbusID client SDK.
//!
//! Authenticates end users of an application against the NimbusID hosted
//! identity service, obtains access/identity/refresh tokens, validates them
//! against the service's published signing keys, and reads user profile
//! attributes.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────┐
//! │ AuthorizationManager  │  Login flows, refresh-then-UI policy
//! └──────────┬────────────┘
//!            │
//!            ├──► RegistrationManager  (one-time dynamic client registration)
//!            ├──► TokenManager         (grants, validation, latest tokens)
//!            │          │
//!            │          └──► PublicKeyCache  (kid → signing key)
//!            │
//!            └──► UiPresenter          (in-app browser, redirect capture)
//! ```
//!
//! The embedding application supplies the platform capabilities as trait
//! implementations ([`SecureKeyStore`], [`PreferenceStore`], [`UiPresenter`])
//! and constructs an explicit [`ServiceConfig`] context; there is no global
//! instance. All flows resolve exactly once, and user cancellation is a
//! distinct outcome from both success and failure
//! ([`AuthorizationOutcome::Canceled`]).
//!
//! # Module Organization
//!
//! - **[`config`]**: tenant/region context and endpoint builders
//! - **[`token`]**: compact-token parsing and typed claim access
//! - **[`registration`]**: dynamic client registration
//! - **[`token_manager`]**: grant execution and token validation
//! - **[`authorization`]**: login and account-management orchestration
//! - **[`keys`]**: public signing key cache
//! - **[`prefs`]**: typed preference handles with persistence policies
//! - **[`profiles`]**: user profile attributes
//! - **[`traits`]**: collaborator contracts supplied by the application

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod authorization;
pub mod config;
pub mod error;
mod http;
pub mod keys;
pub mod prefs;
pub mod profiles;
pub mod registration;
pub mod state;
pub mod token;
pub mod token_manager;
pub mod traits;

#[cfg(feature = "testutil")]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
pub mod testutil;

// Re-export commonly used types
pub use authorization::{AuthorizationManager, AuthorizationOutcome};
pub use config::{AppIdentity, Region, ServiceConfig};
pub use error::{Error, Result};
pub use keys::PublicKeyCache;
pub use prefs::{
    JsonPreference, MemoryPreferenceStore, PersistencePolicy, StringPreference,
};
pub use profiles::UserProfileManager;
pub use registration::{Registration, RegistrationManager};
pub use state::{generate_state, validate_state};
pub use token::{
    AccessToken, IdentityToken, RefreshToken, Token, IDP_ANONYMOUS, IDP_CLOUD_DIRECTORY,
};
pub use token_manager::{TokenBundle, TokenManager};
pub use traits::{PreferenceStore, SecureKeyStore, UiPresenter, UiResponse};

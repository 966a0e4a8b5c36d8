//! Service configuration and endpoint builders.
//!
//! A [`ServiceConfig`] is an explicit, caller-constructed context object
//! carrying the tenant, region, and redirect URI. Every component receives a
//! shared reference to it; there is no process-global instance.

use std::fmt;

/// Identity-service region.
///
/// Named regions map to the hosted service domains. `Custom` carries a full
/// base URL (scheme included) and exists for private deployments and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Region {
    /// US South (Dallas).
    UsSouth,
    /// US East (Washington DC).
    UsEast,
    /// London.
    London,
    /// Frankfurt.
    Frankfurt,
    /// Sydney.
    Sydney,
    /// Tokyo.
    Tokyo,
    /// A custom base URL, e.g. `https://id.example.com` or a local test
    /// server.
    Custom(String),
}

impl Region {
    /// Base URL of the OAuth server for this region, without a trailing
    /// slash.
    #[must_use]
    pub fn oauth_server_url(&self) -> String {
        match self {
            Self::UsSouth => "https://us-south.id.nimbuscloud.net".to_string(),
            Self::UsEast => "https://us-east.id.nimbuscloud.net".to_string(),
            Self::London => "https://eu-gb.id.nimbuscloud.net".to_string(),
            Self::Frankfurt => "https://eu-de.id.nimbuscloud.net".to_string(),
            Self::Sydney => "https://au-syd.id.nimbuscloud.net".to_string(),
            Self::Tokyo => "https://jp-tok.id.nimbuscloud.net".to_string(),
            Self::Custom(url) => url.trim_end_matches('/').to_string(),
        }
    }

    /// Base URL of the profiles service for this region.
    ///
    /// Custom regions reuse the OAuth base URL so a single test server can
    /// stand in for both services.
    #[must_use]
    pub fn profiles_server_url(&self) -> String {
        match self {
            Self::Custom(url) => url.trim_end_matches('/').to_string(),
            _ => self.oauth_server_url().replace(".id.", ".profiles."),
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UsSouth => write!(f, "us-south"),
            Self::UsEast => write!(f, "us-east"),
            Self::London => write!(f, "eu-gb"),
            Self::Frankfurt => write!(f, "eu-de"),
            Self::Sydney => write!(f, "au-syd"),
            Self::Tokyo => write!(f, "jp-tok"),
            Self::Custom(url) => write!(f, "{url}"),
        }
    }
}

/// Application identity submitted during dynamic client registration.
#[derive(Debug, Clone)]
pub struct AppIdentity {
    /// Human-readable client name shown in the service dashboard.
    pub client_name: String,
    /// Stable application identifier (e.g. a bundle or package id).
    pub software_id: String,
    /// Application version string.
    pub software_version: String,
}

impl Default for AppIdentity {
    fn default() -> Self {
        Self {
            client_name: "nimbusid-client".to_string(),
            software_id: "nimbusid-client".to_string(),
            software_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Immutable configuration for one tenant of the identity service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    tenant: String,
    region: Region,
    redirect_uri: String,
    locale: Option<String>,
    app_identity: AppIdentity,
}

impl ServiceConfig {
    /// Create a configuration for the given tenant and region.
    ///
    /// `redirect_uri` is the custom-scheme URI the platform delivers
    /// authorization callbacks to (e.g. `com.example.app://oauth/callback`).
    #[must_use]
    pub fn new(
        tenant: impl Into<String>,
        region: Region,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            region,
            redirect_uri: redirect_uri.into(),
            locale: None,
            app_identity: AppIdentity::default(),
        }
    }

    /// Set the preferred UI locale forwarded to hosted pages.
    #[must_use]
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    /// Set the application identity used during client registration.
    #[must_use]
    pub fn with_app_identity(mut self, identity: AppIdentity) -> Self {
        self.app_identity = identity;
        self
    }

    /// The configured tenant id.
    #[must_use]
    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// The configured region.
    #[must_use]
    pub fn region(&self) -> &Region {
        &self.region
    }

    /// The configured redirect URI.
    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// The configured UI locale, if any.
    #[must_use]
    pub fn locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }

    /// The application identity used during registration.
    #[must_use]
    pub fn app_identity(&self) -> &AppIdentity {
        &self.app_identity
    }

    /// OAuth base URL for this tenant:
    /// `{server}/oauth/v4/{tenant}`.
    #[must_use]
    pub fn oauth_base_url(&self) -> String {
        format!("{}/oauth/v4/{}", self.region.oauth_server_url(), self.tenant)
    }

    /// The issuer value expected in every token minted for this tenant.
    #[must_use]
    pub fn issuer(&self) -> String {
        self.oauth_base_url()
    }

    /// Interactive authorization endpoint.
    #[must_use]
    pub fn authorization_url(&self) -> String {
        format!("{}/authorization", self.oauth_base_url())
    }

    /// Token endpoint.
    #[must_use]
    pub fn token_url(&self) -> String {
        format!("{}/token", self.oauth_base_url())
    }

    /// Dynamic client registration endpoint.
    #[must_use]
    pub fn registration_url(&self) -> String {
        format!("{}/clients", self.oauth_base_url())
    }

    /// Public signing keys endpoint.
    #[must_use]
    pub fn public_keys_url(&self) -> String {
        format!("{}/publickeys", self.oauth_base_url())
    }

    /// Hosted change-password page.
    #[must_use]
    pub fn change_password_url(&self) -> String {
        format!("{}/cloud_directory/change_password", self.oauth_base_url())
    }

    /// Hosted change-details page.
    #[must_use]
    pub fn change_details_url(&self) -> String {
        format!("{}/cloud_directory/change_details", self.oauth_base_url())
    }

    /// One-time-code endpoint used by the change-details flow.
    #[must_use]
    pub fn generate_code_url(&self) -> String {
        format!("{}/cloud_directory/generate_code", self.oauth_base_url())
    }

    /// Hosted forgot-password page.
    #[must_use]
    pub fn forgot_password_url(&self) -> String {
        format!("{}/cloud_directory/forgot_password", self.oauth_base_url())
    }

    /// Profile attributes endpoint; `name` selects a single attribute.
    #[must_use]
    pub fn attributes_url(&self, name: Option<&str>) -> String {
        let base = format!("{}/api/v1/attributes", self.region.profiles_server_url());
        match name {
            Some(name) => format!("{}/{}", base, urlencoding::encode(name)),
            None => base,
        }
    }
}

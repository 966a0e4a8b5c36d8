//! Top-level authorization orchestration.
//!
//! Decides whether interactive UI, anonymous login, or silent refresh should
//! be attempted, owns the "try refresh token first, fall back to UI" policy,
//! and builds the authorization-endpoint URLs. Every operation resolves
//! exactly once: success, cancellation, and failure are all terminal states
//! of the returned future, and cancellation is distinct from both of the
//! others.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};
use url::Url;

use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::http;
use crate::registration::RegistrationManager;
use crate::state::{generate_state, validate_state};
use crate::token::{IdentityToken, IDP_ANONYMOUS, IDP_CLOUD_DIRECTORY};
use crate::token_manager::{TokenBundle, TokenManager};
use crate::traits::{UiPresenter, UiResponse};

/// Terminal outcome of an authorization flow.
#[derive(Debug)]
pub enum AuthorizationOutcome {
    /// The flow completed and produced tokens.
    Authorized(TokenBundle),
    /// The flow completed without token issuance (e.g. forgot password).
    Completed,
    /// The user dismissed the UI without completing the flow.
    Canceled,
}

/// Orchestrates login and account-management flows.
pub struct AuthorizationManager {
    config: Arc<ServiceConfig>,
    registration: Arc<RegistrationManager>,
    tokens: Arc<TokenManager>,
    ui: Arc<dyn UiPresenter>,
    http: reqwest::Client,
}

impl AuthorizationManager {
    /// Create an authorization manager over the given collaborators.
    #[must_use]
    pub fn new(
        config: Arc<ServiceConfig>,
        registration: Arc<RegistrationManager>,
        tokens: Arc<TokenManager>,
        ui: Arc<dyn UiPresenter>,
    ) -> Self {
        Self {
            config,
            registration,
            tokens,
            ui,
            // Anonymous login reads the grant code out of the redirect, so
            // redirects must not be followed.
            http: http::no_redirect_client(),
        }
    }

    /// Run the interactive login flow.
    ///
    /// Ensures registration, builds the authorization URL with a fresh
    /// anti-forgery state, presents it, and exchanges the returned grant
    /// code. Registration failure is reported without presenting any UI.
    ///
    /// # Errors
    /// See [`Error`]; an explicit `error` query parameter on the redirect is
    /// surfaced with the server's description.
    pub async fn launch_authorization_ui(&self) -> Result<AuthorizationOutcome> {
        let client_id = self.registration.ensure_registered().await?;
        let state = generate_state();
        let url = self.authorization_request_url(&client_id, None, Some(&state), None, None)?;

        info!("Launching interactive authorization UI");
        self.present_and_exchange(&url, Some(&state)).await
    }

    /// Log in anonymously, without presenting UI.
    ///
    /// Sends the authorization request with the anonymous identity provider
    /// as a non-interactive GET and exchanges the grant code delivered via
    /// the redirect. When no `access_token_hint` is supplied, the latest
    /// stored access token is used as the hint if it is anonymous, so an
    /// existing anonymous identity is continued rather than replaced.
    ///
    /// # Errors
    /// `Error::Transport` when the request fails; `Error::Authorization`
    /// when the redirect is missing, unparsable, carries an explicit `error`
    /// parameter, or lacks a grant code (or when `allow_create` is false and
    /// no anonymous user exists).
    pub async fn login_anonymously(
        &self,
        access_token_hint: Option<&str>,
        allow_create: bool,
    ) -> Result<TokenBundle> {
        let client_id = self.registration.ensure_registered().await?;

        let stored_hint = match access_token_hint {
            Some(hint) => Some(hint.to_string()),
            None => self
                .tokens
                .latest_access_token()
                .await
                .filter(|token| token.is_anonymous())
                .map(|token| token.raw().to_string()),
        };

        let state = generate_state();
        let url = self.authorization_request_url(
            &client_id,
            Some(IDP_ANONYMOUS),
            Some(&state),
            stored_hint.as_deref(),
            Some(allow_create),
        )?;

        debug!("Requesting anonymous authorization");
        let response = self.http.get(url).send().await?;

        let status = response.status();
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(String::from);

        let target = match location {
            Some(location) if status.is_redirection() => location,
            // Some deployments answer 200 with the redirect target as the
            // body.
            _ => {
                let body = response.text().await?;
                let trimmed = body.trim();
                if trimmed.is_empty() {
                    return Err(Error::Authorization(
                        "failed to find redirect in server response".to_string(),
                    ));
                }
                trimmed.to_string()
            }
        };

        let code = extract_grant_code(&target, Some(&state))?;
        self.tokens
            .obtain_tokens_auth_code(&code, self.config.redirect_uri())
            .await
    }

    /// Obtain authorization for a resource request, silently when possible.
    ///
    /// If a refresh token exists a silent refresh is attempted first; on
    /// refresh failure the interactive UI is launched as fallback, and the
    /// final outcome reflects the UI result, not the refresh failure. With
    /// no refresh token the flow goes straight to UI.
    ///
    /// # Errors
    /// See [`launch_authorization_ui`](Self::launch_authorization_ui).
    pub async fn obtain_authorization(&self) -> Result<AuthorizationOutcome> {
        if self.tokens.stored_refresh_token().await.is_some() {
            match self.tokens.obtain_tokens_refresh(None).await {
                Ok(bundle) => {
                    info!("Silent refresh succeeded");
                    return Ok(AuthorizationOutcome::Authorized(bundle));
                }
                Err(error) => {
                    warn!(%error, "Silent refresh failed, falling back to interactive login");
                }
            }
        }
        self.launch_authorization_ui().await
    }

    /// Present the hosted change-password page.
    ///
    /// Requires an identity token issued by the cloud-directory provider.
    ///
    /// # Errors
    /// `Error::Authorization` when no identity token exists or it was not
    /// issued by cloud directory; otherwise see [`Error`].
    pub async fn launch_change_password_ui(&self) -> Result<AuthorizationOutcome> {
        let identity = self.cloud_directory_identity().await?;
        let client_id = self.registration.ensure_registered().await?;
        let user_id = identity
            .subject()
            .ok_or_else(|| Error::Authorization("Failed to extract user id".to_string()))?;

        let mut url = self.management_url(&self.config.change_password_url())?;
        url.query_pairs_mut()
            .append_pair("client_id", &client_id)
            .append_pair("redirect_uri", self.config.redirect_uri())
            .append_pair("user_id", user_id);
        self.append_locale(&mut url);

        self.present_and_exchange(url.as_str(), None).await
    }

    /// Present the hosted change-details page.
    ///
    /// First exchanges the current session for a one-time code via the
    /// dedicated endpoint, then presents the page with that code.
    ///
    /// # Errors
    /// `Error::Authorization("Unable to get response from server")` when the
    /// code request fails in transit and
    /// `Error::Authorization("Failed to extract code")` when no code comes
    /// back; otherwise see [`Error`].
    pub async fn launch_change_details_ui(&self) -> Result<AuthorizationOutcome> {
        let _identity = self.cloud_directory_identity().await?;
        let client_id = self.registration.ensure_registered().await?;
        let auth_header = self
            .tokens
            .latest_authorization_header()
            .await
            .ok_or_else(|| Error::Authorization("No identity token found".to_string()))?;

        let response = self
            .http
            .get(self.config.generate_code_url())
            .header(reqwest::header::AUTHORIZATION, auth_header)
            .send()
            .await
            .map_err(|_| Error::Authorization("Unable to get response from server".to_string()))?;
        if !response.status().is_success() {
            return Err(Error::Authorization("Failed to extract code".to_string()));
        }
        let code = response
            .text()
            .await
            .map_err(|_| Error::Authorization("Failed to extract code".to_string()))?;
        let code = code.trim();
        if code.is_empty() {
            return Err(Error::Authorization("Failed to extract code".to_string()));
        }

        let mut url = self.management_url(&self.config.change_details_url())?;
        url.query_pairs_mut()
            .append_pair("code", code)
            .append_pair("client_id", &client_id)
            .append_pair("redirect_uri", self.config.redirect_uri());
        self.append_locale(&mut url);

        self.present_and_exchange(url.as_str(), None).await
    }

    /// Present the hosted forgot-password page.
    ///
    /// The flow ends without token issuance: a completed page visit resolves
    /// to [`AuthorizationOutcome::Completed`].
    ///
    /// # Errors
    /// `Error::Authorization` when no cloud-directory identity token exists
    /// or the UI cannot be presented.
    pub async fn launch_forgot_password_ui(&self) -> Result<AuthorizationOutcome> {
        let _identity = self.cloud_directory_identity().await?;
        let client_id = self.registration.ensure_registered().await?;

        let mut url = self.management_url(&self.config.forgot_password_url())?;
        url.query_pairs_mut()
            .append_pair("client_id", &client_id)
            .append_pair("redirect_uri", self.config.redirect_uri());
        self.append_locale(&mut url);

        match self.ui.present(url.as_str()).await.map_err(Error::Authorization)? {
            UiResponse::Redirect(_) => Ok(AuthorizationOutcome::Completed),
            UiResponse::Canceled => Ok(AuthorizationOutcome::Canceled),
        }
    }

    fn authorization_request_url(
        &self,
        client_id: &str,
        idp: Option<&str>,
        state: Option<&str>,
        access_token_hint: Option<&str>,
        allow_create: Option<bool>,
    ) -> Result<String> {
        let mut url = self.management_url(&self.config.authorization_url())?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("response_type", "code")
                .append_pair("client_id", client_id)
                .append_pair("redirect_uri", self.config.redirect_uri())
                .append_pair("scope", "openid");
            if let Some(idp) = idp {
                pairs.append_pair("idp", idp);
            }
            if let Some(locale) = self.config.locale() {
                pairs.append_pair("language", locale);
            }
            if let Some(state) = state {
                pairs.append_pair("state", state);
            }
            if let Some(hint) = access_token_hint {
                pairs.append_pair("appid_access_token", hint);
            }
            if let Some(allow_create) = allow_create {
                pairs.append_pair("allow_create", if allow_create { "true" } else { "false" });
            }
        }
        Ok(url.into())
    }

    async fn present_and_exchange(
        &self,
        url: &str,
        expected_state: Option<&str>,
    ) -> Result<AuthorizationOutcome> {
        match self.ui.present(url).await.map_err(Error::Authorization)? {
            UiResponse::Canceled => {
                info!("Authorization canceled by user");
                Ok(AuthorizationOutcome::Canceled)
            }
            UiResponse::Redirect(redirect) => {
                let code = extract_grant_code(&redirect, expected_state)?;
                let bundle = self
                    .tokens
                    .obtain_tokens_auth_code(&code, self.config.redirect_uri())
                    .await?;
                Ok(AuthorizationOutcome::Authorized(bundle))
            }
        }
    }

    async fn cloud_directory_identity(&self) -> Result<IdentityToken> {
        let identity = self
            .tokens
            .latest_identity_token()
            .await
            .ok_or_else(|| Error::Authorization("No identity token found".to_string()))?;
        if !identity
            .authentication_methods()
            .iter()
            .any(|method| method == IDP_CLOUD_DIRECTORY)
        {
            return Err(Error::Authorization(
                "The identity token was not retrieved using cloud directory idp".to_string(),
            ));
        }
        Ok(identity)
    }

    fn management_url(&self, endpoint: &str) -> Result<Url> {
        Url::parse(endpoint)
            .map_err(|_| Error::Authorization("invalid service endpoint URL".to_string()))
    }

    fn append_locale(&self, url: &mut Url) {
        if let Some(locale) = self.config.locale() {
            url.query_pairs_mut().append_pair("language", locale);
        }
    }
}

/// Extract the grant code from a redirect URL, rejecting explicit errors and
/// state mismatches.
fn extract_grant_code(redirect: &str, expected_state: Option<&str>) -> Result<String> {
    let url = Url::parse(redirect)
        .map_err(|_| Error::Authorization("failed to parse redirect URL".to_string()))?;
    let pairs: HashMap<String, String> = url.query_pairs().into_owned().collect();

    if pairs.contains_key("error") || pairs.contains_key("error_description") {
        let message = pairs
            .get("error_description")
            .or_else(|| pairs.get("error"))
            .cloned()
            .unwrap_or_else(|| "authorization request failed".to_string());
        return Err(Error::Authorization(message));
    }

    if let Some(expected) = expected_state {
        let matches = pairs
            .get("state")
            .is_some_and(|actual| validate_state(expected, actual));
        if !matches {
            return Err(Error::Authorization("Invalid state parameter".to_string()));
        }
    }

    pairs
        .get("code")
        .cloned()
        .ok_or_else(|| Error::Authorization("Failed to extract grant code".to_string()))
}

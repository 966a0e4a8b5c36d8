//! Token acquisition, validation, and lifecycle.
//!
//! Every grant follows the same pipeline: require registration, build the
//! signed client-authentication header, POST the grant form, map error
//! responses to the message contract, parse and validate the returned
//! tokens, then store them as the latest of their kind.

use std::collections::HashSet;
use std::sync::Arc;

use jsonwebtoken::{decode, Algorithm, Validation};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::http;
use crate::keys::PublicKeyCache;
use crate::prefs::{PersistencePolicy, StringPreference};
use crate::registration::RegistrationManager;
use crate::token::{AccessToken, IdentityToken, RefreshToken, Token};
use crate::traits::{PreferenceStore, SecureKeyStore};

const PREF_REFRESH_TOKEN: &str = "refresh_token";

/// The only signing algorithm accepted for tokens; `none` and symmetric
/// algorithms are always rejected.
const ACCEPTED_ALGORITHM: &str = "RS256";

/// Tokens returned by a successful grant.
#[derive(Debug, Clone)]
pub struct TokenBundle {
    /// The validated access token.
    pub access: AccessToken,
    /// The validated identity token. Always present for authorization-code
    /// and password grants. On a refresh grant where the server did not
    /// rotate the identity token, this is the retained previous identity
    /// token, and `None` only if none was ever stored.
    pub identity: Option<IdentityToken>,
    /// The refresh token, when the server issued one.
    pub refresh: Option<RefreshToken>,
}

#[derive(Default)]
struct LatestTokens {
    access: Option<AccessToken>,
    identity: Option<IdentityToken>,
    refresh: Option<RefreshToken>,
}

enum Grant<'a> {
    AuthorizationCode {
        code: &'a str,
        redirect_uri: &'a str,
    },
    Password {
        username: &'a str,
        password: &'a str,
        access_token_hint: Option<&'a str>,
    },
    Refresh {
        refresh_token: String,
    },
}

impl Grant<'_> {
    fn form(&self, client_id: &str) -> Vec<(&'static str, String)> {
        match self {
            Self::AuthorizationCode { code, redirect_uri } => vec![
                ("grant_type", "authorization_code".to_string()),
                ("code", (*code).to_string()),
                ("client_id", client_id.to_string()),
                ("redirect_uri", (*redirect_uri).to_string()),
            ],
            Self::Password {
                username,
                password,
                access_token_hint,
            } => {
                let mut form = vec![("grant_type", "password".to_string())];
                if let Some(hint) = access_token_hint {
                    form.push(("appid_access_token", (*hint).to_string()));
                }
                form.push(("username", (*username).to_string()));
                form.push(("password", (*password).to_string()));
                form
            }
            Self::Refresh { refresh_token } => vec![
                ("grant_type", "refresh_token".to_string()),
                ("refresh_token", refresh_token.clone()),
            ],
        }
    }

    /// Whether the response must carry an identity token. A refresh response
    /// may omit it when the server does not rotate identity tokens.
    fn identity_required(&self) -> bool {
        !matches!(self, Self::Refresh { .. })
    }
}

/// Orchestrates token grants and holds the latest token of each kind.
///
/// The latest-token references are mutated only behind a single `RwLock`
/// writer, so transport callbacks returning on other threads cannot race.
pub struct TokenManager {
    config: Arc<ServiceConfig>,
    registration: Arc<RegistrationManager>,
    key_store: Arc<dyn SecureKeyStore>,
    keys: PublicKeyCache,
    refresh_pref: StringPreference,
    http: reqwest::Client,
    latest: RwLock<LatestTokens>,
}

impl TokenManager {
    /// Create a token manager over the given collaborators.
    ///
    /// `refresh_policy` controls whether refresh tokens touch durable
    /// storage; pass [`PersistencePolicy::Never`] to keep them in memory
    /// only.
    #[must_use]
    pub fn new(
        config: Arc<ServiceConfig>,
        registration: Arc<RegistrationManager>,
        key_store: Arc<dyn SecureKeyStore>,
        prefs: Arc<dyn PreferenceStore>,
        refresh_policy: PersistencePolicy,
    ) -> Self {
        Self {
            keys: PublicKeyCache::new(&config),
            config,
            registration,
            key_store,
            refresh_pref: StringPreference::new(PREF_REFRESH_TOKEN, refresh_policy, prefs),
            http: http::client(),
            latest: RwLock::new(LatestTokens::default()),
        }
    }

    /// Exchange an authorization code for tokens.
    ///
    /// # Errors
    /// See [`Error`]; messages follow the token-endpoint contract.
    pub async fn obtain_tokens_auth_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenBundle> {
        self.request_tokens(Grant::AuthorizationCode { code, redirect_uri })
            .await
    }

    /// Obtain tokens with the resource-owner-password grant.
    ///
    /// `access_token_hint` links the new session to an existing (typically
    /// anonymous) one so its data migrates to the named user.
    ///
    /// # Errors
    /// See [`Error`]; messages follow the token-endpoint contract.
    pub async fn obtain_tokens_password(
        &self,
        username: &str,
        password: &str,
        access_token_hint: Option<&str>,
    ) -> Result<TokenBundle> {
        self.request_tokens(Grant::Password {
            username,
            password,
            access_token_hint,
        })
        .await
    }

    /// Obtain fresh tokens with the refresh-token grant.
    ///
    /// Falls back to the last known stored refresh token when none is
    /// supplied.
    ///
    /// # Errors
    /// `Error::Authentication("no refresh token to use")` when neither a
    /// token is supplied nor one is stored; otherwise see [`Error`].
    pub async fn obtain_tokens_refresh(
        &self,
        refresh_token: Option<&str>,
    ) -> Result<TokenBundle> {
        let refresh_token = match refresh_token {
            Some(token) => token.to_string(),
            None => self
                .stored_refresh_token()
                .await
                .ok_or_else(|| Error::Authentication("no refresh token to use".to_string()))?,
        };
        self.request_tokens(Grant::Refresh { refresh_token }).await
    }

    /// The latest validated access token.
    pub async fn latest_access_token(&self) -> Option<AccessToken> {
        self.latest.read().await.access.clone()
    }

    /// The latest validated identity token.
    pub async fn latest_identity_token(&self) -> Option<IdentityToken> {
        self.latest.read().await.identity.clone()
    }

    /// The latest refresh token.
    pub async fn latest_refresh_token(&self) -> Option<RefreshToken> {
        self.latest.read().await.refresh.clone()
    }

    /// The refresh token available to a silent refresh: the in-memory one,
    /// or the persisted one from a previous launch.
    pub async fn stored_refresh_token(&self) -> Option<String> {
        if let Some(refresh) = self.latest.read().await.refresh.as_ref() {
            return Some(refresh.raw().to_string());
        }
        self.refresh_pref.get()
    }

    /// The `Authorization` header value for resource requests:
    /// `Bearer {access} {identity}`.
    pub async fn latest_authorization_header(&self) -> Option<String> {
        let latest = self.latest.read().await;
        let access = latest.access.as_ref()?;
        Some(match latest.identity.as_ref() {
            Some(identity) => format!("Bearer {} {}", access.raw(), identity.raw()),
            None => format!("Bearer {}", access.raw()),
        })
    }

    /// Drop all latest-token references and the persisted refresh token.
    /// Used on logout.
    pub async fn clear_stored_tokens(&self) {
        *self.latest.write().await = LatestTokens::default();
        self.refresh_pref.clear();
        info!("Stored tokens cleared");
    }

    async fn request_tokens(&self, grant: Grant<'_>) -> Result<TokenBundle> {
        let client_id = self.registration.ensure_registered().await?;
        let auth_header = self.client_authentication(&client_id)?;
        let form = grant.form(&client_id);

        debug!(url = %self.config.token_url(), grant = %form[0].1, "Requesting tokens");
        let response = self
            .http
            .post(self.config.token_url())
            .header(reqwest::header::AUTHORIZATION, auth_header)
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;
        if !status.is_success() {
            let message = http::error_description(&bytes)
                .unwrap_or_else(|| "failed to retrieve tokens".to_string());
            return Err(Error::Authentication(message));
        }

        let body: Value = serde_json::from_slice(&bytes).map_err(|_| {
            Error::TokenParsing(
                "failed to parse server response - no access or identity token".to_string(),
            )
        })?;

        let access_raw = body.get("access_token").and_then(Value::as_str);
        let identity_raw = body.get("id_token").and_then(Value::as_str);
        let (access_raw, identity_raw) = match (access_raw, identity_raw) {
            (Some(access), Some(identity)) => (access, Some(identity)),
            (Some(access), None) if !grant.identity_required() => (access, None),
            _ => {
                return Err(Error::TokenParsing(
                    "failed to parse server response - no access or identity token".to_string(),
                ))
            }
        };

        let access = AccessToken::parse(access_raw).ok_or_else(|| {
            Error::TokenParsing(
                "failed to parse server response - corrupt access or identity token".to_string(),
            )
        })?;
        let identity = identity_raw
            .map(|raw| {
                IdentityToken::parse(raw).ok_or_else(|| {
                    Error::TokenParsing(
                        "failed to parse server response - corrupt access or identity token"
                            .to_string(),
                    )
                })
            })
            .transpose()?;
        let refresh = body
            .get("refresh_token")
            .and_then(Value::as_str)
            .map(RefreshToken::new);

        self.validate_token(&access, &client_id).await?;
        if let Some(identity) = identity.as_deref() {
            self.validate_token(identity, &client_id).await?;
        }

        let mut latest = self.latest.write().await;
        latest.access = Some(access.clone());
        let identity = match identity {
            Some(identity) => {
                latest.identity = Some(identity.clone());
                Some(identity)
            }
            // Refresh without identity rotation keeps the previous identity
            // token.
            None => latest.identity.clone(),
        };
        if let Some(refresh) = refresh.as_ref() {
            latest.refresh = Some(refresh.clone());
            if let Err(message) = self.refresh_pref.set(refresh.raw()) {
                warn!(%message, "Failed to persist refresh token");
            }
        }
        drop(latest);

        info!("Tokens obtained and validated");
        Ok(TokenBundle {
            access,
            identity,
            refresh,
        })
    }

    fn client_authentication(&self, client_id: &str) -> Result<String> {
        let signature = self
            .key_store
            .sign(client_id, &self.registration.private_key_tag())
            .map_err(|_| {
                Error::Authentication("failed to create authentication header".to_string())
            })?;
        Ok(format!("Bearer {signature}"))
    }

    async fn validate_token(&self, token: &Token, client_id: &str) -> Result<()> {
        let kid = token
            .key_id()
            .ok_or_else(|| Error::TokenValidation("Invalid token: Missing kid".to_string()))?;
        if token.algorithm() != Some(ACCEPTED_ALGORITHM) {
            return Err(Error::TokenValidation("Invalid token: Invalid alg".to_string()));
        }

        let key = self.keys.decoding_key(kid).await?;
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();
        decode::<Map<String, Value>>(token.raw(), &key, &validation)
            .map_err(|_| Error::TokenValidation("Token verification failed".to_string()))?;

        let issuer = self.config.issuer();
        if token.issuer() != Some(issuer.as_str()) {
            return Err(Error::TokenValidation(
                "Token verification failed: invalid issuer".to_string(),
            ));
        }
        if !token.audience().iter().any(|audience| audience == client_id) {
            return Err(Error::TokenValidation(
                "Token verification failed: invalid audience".to_string(),
            ));
        }
        if token.tenant() != Some(self.config.tenant()) {
            return Err(Error::TokenValidation(
                "Token verification failed: invalid tenant".to_string(),
            ));
        }
        Ok(())
    }
}

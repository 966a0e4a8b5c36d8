//! User profile attributes.
//!
//! Thin authenticated client for the profiles service: reads and writes the
//! custom attributes attached to the current user, using the latest access
//! token.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::http;
use crate::token_manager::TokenManager;

/// Client for the user's profile attributes.
pub struct UserProfileManager {
    config: Arc<ServiceConfig>,
    tokens: Arc<TokenManager>,
    http: reqwest::Client,
}

impl UserProfileManager {
    /// Create a profile manager over the given collaborators.
    #[must_use]
    pub fn new(config: Arc<ServiceConfig>, tokens: Arc<TokenManager>) -> Self {
        Self {
            config,
            tokens,
            http: http::client(),
        }
    }

    /// All attributes of the current user.
    ///
    /// # Errors
    /// `Error::Authorization` when no access token is stored or the service
    /// rejects it; `Error::Transport` when the request fails.
    pub async fn attributes(&self) -> Result<Map<String, Value>> {
        let response = self
            .request(reqwest::Method::GET, self.config.attributes_url(None))
            .await?;
        parse_attributes(response)
    }

    /// A single attribute of the current user.
    ///
    /// # Errors
    /// `Error::Authorization("attribute not found")` when the attribute does
    /// not exist; otherwise as [`attributes`](Self::attributes).
    pub async fn attribute(&self, name: &str) -> Result<Value> {
        self.request(reqwest::Method::GET, self.config.attributes_url(Some(name)))
            .await
    }

    /// Set a single attribute, returning the updated attribute map.
    ///
    /// # Errors
    /// As [`attributes`](Self::attributes).
    pub async fn set_attribute(&self, name: &str, value: &str) -> Result<Map<String, Value>> {
        let auth_header = self.auth_header().await?;
        debug!(attribute = name, "Updating profile attribute");
        let response = self
            .http
            .put(self.config.attributes_url(Some(name)))
            .header(reqwest::header::AUTHORIZATION, auth_header)
            .body(value.to_string())
            .send()
            .await?;
        parse_attributes(self.check_status(response).await?)
    }

    /// Delete a single attribute.
    ///
    /// # Errors
    /// As [`attribute`](Self::attribute).
    pub async fn delete_attribute(&self, name: &str) -> Result<()> {
        let auth_header = self.auth_header().await?;
        let response = self
            .http
            .delete(self.config.attributes_url(Some(name)))
            .header(reqwest::header::AUTHORIZATION, auth_header)
            .send()
            .await?;
        self.check_status(response).await.map(|_| ())
    }

    async fn request(&self, method: reqwest::Method, url: String) -> Result<Value> {
        let auth_header = self.auth_header().await?;
        let response = self
            .http
            .request(method, url)
            .header(reqwest::header::AUTHORIZATION, auth_header)
            .send()
            .await?;
        self.check_status(response).await
    }

    async fn auth_header(&self) -> Result<String> {
        let access = self
            .tokens
            .latest_access_token()
            .await
            .ok_or_else(|| Error::Authorization("No access token found".to_string()))?;
        Ok(format!("Bearer {}", access.raw()))
    }

    async fn check_status(&self, response: reqwest::Response) -> Result<Value> {
        match response.status() {
            status if status.is_success() => {
                let bytes = response.bytes().await?;
                if bytes.is_empty() {
                    return Ok(Value::Object(Map::new()));
                }
                serde_json::from_slice(&bytes).map_err(|_| {
                    Error::Authorization("failed to parse attributes response".to_string())
                })
            }
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => Err(
                Error::Authorization("access denied by profiles service".to_string()),
            ),
            reqwest::StatusCode::NOT_FOUND => {
                Err(Error::Authorization("attribute not found".to_string()))
            }
            _ => Err(Error::Authorization(
                "failed to retrieve attributes".to_string(),
            )),
        }
    }
}

fn parse_attributes(value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(Error::Authorization(
            "failed to parse attributes response".to_string(),
        )),
    }
}

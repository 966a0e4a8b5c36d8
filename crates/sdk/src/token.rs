//! Token model: structural parsing and typed claim access.
//!
//! A [`Token`] wraps the three-part compact serialization
//! `header.payload.signature`. Parsing is all-or-nothing: a token is never
//! partially constructed, and claim accessors never panic — absent or
//! mistyped claims yield `None`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};

/// Authentication-method marker minted for anonymous sessions.
pub const IDP_ANONYMOUS: &str = "appid_anon";

/// Authentication-method marker minted for cloud-directory sign-ins.
pub const IDP_CLOUD_DIRECTORY: &str = "cloud_directory";

/// A parsed compact token.
///
/// Immutable once constructed. The header and payload are kept as raw JSON
/// maps; typed accessors sit on top so the JSON boundary stays in one place.
#[derive(Debug, Clone)]
pub struct Token {
    raw: String,
    header: Map<String, Value>,
    payload: Map<String, Value>,
    signature: String,
}

impl Token {
    /// Parse a compact token string.
    ///
    /// Requires exactly three non-empty dot-separated parts; the first two
    /// must base64url-decode (padding tolerated) to UTF-8 JSON objects.
    /// Returns `None` on any structural failure.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let parts: Vec<&str> = raw.split('.').collect();
        if parts.len() != 3 || parts.iter().any(|part| part.is_empty()) {
            return None;
        }

        let header = decode_json_segment(parts[0])?;
        let payload = decode_json_segment(parts[1])?;

        Some(Self {
            raw: raw.to_string(),
            header,
            payload,
            signature: parts[2].to_string(),
        })
    }

    /// The original compact serialization.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The decoded header map.
    #[must_use]
    pub fn header(&self) -> &Map<String, Value> {
        &self.header
    }

    /// The decoded payload map.
    #[must_use]
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// The (still encoded) signature part.
    #[must_use]
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// The `kid` header value.
    #[must_use]
    pub fn key_id(&self) -> Option<&str> {
        self.header.get("kid").and_then(Value::as_str)
    }

    /// The `alg` header value.
    #[must_use]
    pub fn algorithm(&self) -> Option<&str> {
        self.header.get("alg").and_then(Value::as_str)
    }

    /// The `iss` claim.
    #[must_use]
    pub fn issuer(&self) -> Option<&str> {
        self.string_claim("iss")
    }

    /// The `sub` claim.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.string_claim("sub")
    }

    /// The `aud` claim as a list; a bare string audience yields a one-element
    /// list.
    #[must_use]
    pub fn audience(&self) -> Vec<String> {
        match self.payload.get("aud") {
            Some(Value::String(aud)) => vec![aud.clone()],
            Some(Value::Array(entries)) => entries
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// The `exp` claim as a UTC timestamp; `None` if missing or not numeric.
    #[must_use]
    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        self.timestamp_claim("exp")
    }

    /// The `iat` claim as a UTC timestamp; `None` if missing or not numeric.
    #[must_use]
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp_claim("iat")
    }

    /// The `tenant` claim.
    #[must_use]
    pub fn tenant(&self) -> Option<&str> {
        self.string_claim("tenant")
    }

    /// The `amr` claim: the authentication methods used to mint this token.
    #[must_use]
    pub fn authentication_methods(&self) -> Vec<String> {
        match self.payload.get("amr") {
            Some(Value::Array(entries)) => entries
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Whether the token has expired, evaluated against the wall clock at
    /// call time. A token with no `exp` claim counts as expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        match self.expiration() {
            Some(expiration) => expiration < Utc::now(),
            None => true,
        }
    }

    /// Whether this token was minted for an anonymous session.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.authentication_methods().iter().any(|m| m == IDP_ANONYMOUS)
    }

    fn string_claim(&self, name: &str) -> Option<&str> {
        self.payload.get(name).and_then(Value::as_str)
    }

    fn timestamp_claim(&self, name: &str) -> Option<DateTime<Utc>> {
        let value = self.payload.get(name)?;
        let seconds = value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))?;
        Utc.timestamp_opt(seconds, 0).single()
    }
}

fn decode_json_segment(segment: &str) -> Option<Map<String, Value>> {
    // Padding-tolerant: strip any trailing '=' before the no-pad decode.
    let bytes = URL_SAFE_NO_PAD.decode(segment.trim_end_matches('=')).ok()?;
    let text = String::from_utf8(bytes).ok()?;
    match serde_json::from_str::<Value>(&text).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// An access token: proves authorization when calling protected resources.
#[derive(Debug, Clone)]
pub struct AccessToken(Token);

impl AccessToken {
    /// Wrap a parsed token.
    #[must_use]
    pub fn new(token: Token) -> Self {
        Self(token)
    }

    /// Parse a compact token string into an access token.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Token::parse(raw).map(Self)
    }
}

impl std::ops::Deref for AccessToken {
    type Target = Token;

    fn deref(&self) -> &Token {
        &self.0
    }
}

/// An identity token: carries the authenticated user's profile claims.
#[derive(Debug, Clone)]
pub struct IdentityToken(Token);

impl IdentityToken {
    /// Wrap a parsed token.
    #[must_use]
    pub fn new(token: Token) -> Self {
        Self(token)
    }

    /// Parse a compact token string into an identity token.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Token::parse(raw).map(Self)
    }

    /// The user's display name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.0.string_claim("name")
    }

    /// The user's email address.
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.0.string_claim("email")
    }

    /// The user's locale.
    #[must_use]
    pub fn locale(&self) -> Option<&str> {
        self.0.string_claim("locale")
    }

    /// URL of the user's profile picture.
    #[must_use]
    pub fn picture(&self) -> Option<&str> {
        self.0.string_claim("picture")
    }

    /// The federated identities linked to this user.
    #[must_use]
    pub fn identities(&self) -> &[Value] {
        self.0
            .payload
            .get("identities")
            .and_then(Value::as_array)
            .map_or(&[], Vec::as_slice)
    }
}

impl std::ops::Deref for IdentityToken {
    type Target = Token;

    fn deref(&self) -> &Token {
        &self.0
    }
}

/// A refresh token. Opaque: no claims parsing beyond holding the raw string.
#[derive(Debug, Clone)]
pub struct RefreshToken {
    raw: String,
}

impl RefreshToken {
    /// Wrap a raw refresh token string.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    /// The raw refresh token string.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

//! Handshake authentication.
//!
//! A [`CredentialVerifier`] turns an opaque bearer string into an
//! [`Identity`]. [`TokenValidationCache`] sits in front of it so the hot path
//! of every handshake is a map lookup, not a signature check.

pub mod jwt;
pub mod token_cache;

pub use jwt::{Claims, JwtVerifier};
pub use token_cache::{TokenCacheConfig, TokenValidationCache};

use crate::error::AuthError;
use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use chrono::{DateTime, Utc};

/// A validated principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    /// When the credential itself stops being valid, if it says so.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Identity {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

/// Checks a credential. May be slow or remote; the cache calls it only on a
/// miss and never while holding its lock.
#[async_trait]
pub trait CredentialVerifier: Send + Sync + 'static {
    async fn verify(&self, credential: &str) -> Result<Identity, AuthError>;
}

/// Token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Credential for a WebSocket handshake: the `token` query parameter, falling
/// back to the bearer header.
pub fn handshake_credential<'a>(
    query_token: Option<&'a str>,
    headers: &'a HeaderMap,
) -> Result<&'a str, AuthError> {
    query_token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .or_else(|| bearer_token(headers))
        .ok_or(AuthError::MissingCredential)
}

//! HS256 JWT verification.

use super::{CredentialVerifier, Identity};
use crate::error::AuthError;
use async_trait::async_trait;
use chrono::DateTime;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// Claims the gateway reads from a token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// Verifies tokens signed with a shared secret.
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &[u8], issuer: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        if let Some(issuer) = issuer {
            validation.set_issuer(&[issuer]);
        }
        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn decode_claims(&self, token: &str) -> Result<Claims, AuthError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| AuthError::Rejected(e.to_string()))?;
        Ok(data.claims)
    }
}

#[async_trait]
impl CredentialVerifier for JwtVerifier {
    async fn verify(&self, credential: &str) -> Result<Identity, AuthError> {
        let claims = self.decode_claims(credential)?;
        if claims.sub.trim().is_empty() {
            return Err(AuthError::Rejected("token has an empty subject".to_string()));
        }

        let identity = Identity::new(claims.sub);
        Ok(match DateTime::from_timestamp(claims.exp, 0) {
            Some(expires_at) => identity.with_expiry(expires_at),
            None => identity,
        })
    }
}

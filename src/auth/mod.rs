//! Credential verification.
//!
//! Tokens are issued elsewhere; this server only checks them. The
//! [`CredentialVerifier`] seam keeps the controller independent of the
//! token format so tests can swap in a static verifier.

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// A verified caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub user_id: String,
    pub username: String,
}

#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Returns the identity behind `token`, or `None` when the token is
    /// missing, malformed, expired or forged.
    async fn verify(&self, token: &str) -> Option<UserIdentity>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    #[serde(alias = "id")]
    pub sub: String,
    pub username: String,
    pub exp: u64,
}

/// HS256 verifier sharing its secret with the token issuer.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

#[async_trait]
impl CredentialVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Option<UserIdentity> {
        if token.is_empty() {
            return None;
        }

        match jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation) {
            Ok(data) => Some(UserIdentity {
                user_id: data.claims.sub,
                username: data.claims.username,
            }),
            Err(e) => {
                tracing::warn!(error = %e, "Token verification failed");
                None
            }
        }
    }
}

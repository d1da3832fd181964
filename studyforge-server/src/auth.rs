//! Bearer-token authentication.
//!
//! Tokens are HS256 JWTs signed with the configured secret. The `sub` claim is the
//! user's UUID; the optional `email` claim feeds the mailing-list step of consent
//! changes.

use crate::error::ApiError;
use axum::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use studyforge::request::UserId;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub exp: usize,
}

/// Verifies bearer tokens.
#[derive(Clone)]
pub struct Authenticator {
    key: Arc<DecodingKey>,
    validation: Arc<Validation>,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator").finish_non_exhaustive()
    }
}

impl Authenticator {
    pub fn new(secret: &str) -> Self {
        Self {
            key: Arc::new(DecodingKey::from_secret(secret.as_bytes())),
            validation: Arc::new(Validation::new(Algorithm::HS256)),
        }
    }

    pub fn verify(&self, token: &str) -> Result<AuthUser, ApiError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| ApiError::Unauthorized(format!("invalid token: {e}")))?;
        let id = Uuid::parse_str(&data.claims.sub)
            .map_err(|_| ApiError::Unauthorized("token subject is not a user id".into()))?;
        Ok(AuthUser { id: UserId(id), email: data.claims.email })
    }
}

/// The caller, extracted from the `Authorization` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: UserId,
    pub email: Option<String>,
}

#[async_trait]
impl<St> FromRequestParts<St> for AuthUser
where
    Authenticator: FromRef<St>,
    St: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &St) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("missing bearer token".into()))?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::Unauthorized("missing bearer token".into()))?;
        Authenticator::from_ref(state).verify(token.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(secret: &str, sub: &str, exp: usize) -> String {
        let claims = Claims { sub: sub.into(), email: Some("a@example.com".into()), exp };
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    fn far_future() -> usize {
        (chrono::Utc::now().timestamp() + 3600) as usize
    }

    #[test]
    fn valid_token_yields_user() {
        let id = Uuid::new_v4();
        let user = Authenticator::new("s3cret").verify(&token("s3cret", &id.to_string(), far_future())).unwrap();
        assert_eq!(user.id, UserId(id));
        assert_eq!(user.email.as_deref(), Some("a@example.com"));
    }

    #[test]
    fn wrong_secret_expired_or_bad_subject_is_rejected() {
        let auth = Authenticator::new("s3cret");
        let id = Uuid::new_v4().to_string();
        assert!(auth.verify(&token("other", &id, far_future())).is_err());
        assert!(auth.verify(&token("s3cret", &id, 1_000)).is_err());
        assert!(auth.verify(&token("s3cret", "not-a-uuid", far_future())).is_err());
    }
}

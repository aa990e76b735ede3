//! Bearer token verification.
//!
//! Tokens are HS256 JWTs minted by the identity service with the claims
//! `{sub, username, role, exp}`. This module only verifies them and turns
//! them into an [`Identity`].

use std::str::FromStr;

use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use binaa_core::access::{Identity, UserRole};

use crate::config::AuthSettings;
use crate::error::ApiError;

/// JWT claims carried by identity tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,

    pub username: String,

    /// One of admin, manager, employee, engineer, surveyor, citizen.
    pub role: String,

    /// Expiration (Unix timestamp).
    pub exp: i64,
}

/// Verifies identity tokens against the shared secret.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(settings: &AuthSettings) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = settings.leeway_secs;
        validation.set_required_spec_claims(&["exp", "sub"]);

        JwtVerifier {
            key: DecodingKey::from_secret(settings.jwt_secret.as_bytes()),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<Identity, ApiError> {
        let claims = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| ApiError::unauthorized(format!("Invalid token: {e}")))?
            .claims;

        if claims.sub.trim().is_empty() {
            return Err(ApiError::unauthorized("Token subject is missing"));
        }
        let role = UserRole::from_str(&claims.role)
            .map_err(|_| ApiError::unauthorized(format!("Unknown role: {}", claims.role)))?;

        Ok(Identity::new(claims.sub, claims.username, role))
    }
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let header = headers
        .get("authorization")
        .ok_or_else(|| ApiError::unauthorized("Missing Authorization header"))?
        .to_str()
        .map_err(|_| ApiError::unauthorized("Authorization header is not valid UTF-8"))?;

    let (scheme, token) = header
        .split_once(' ')
        .ok_or_else(|| ApiError::unauthorized("Authorization header must be `Bearer <token>`"))?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(ApiError::unauthorized("Authorization scheme must be `Bearer`"));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(ApiError::unauthorized("Bearer token is empty"));
    }

    Ok(token)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};

    pub(crate) const SECRET: &str = "test-secret-test-secret-test-secret";

    pub(crate) fn settings() -> AuthSettings {
        AuthSettings {
            jwt_secret: SECRET.to_string(),
            leeway_secs: 0,
        }
    }

    pub(crate) fn token_for(user_id: &str, role: &str) -> String {
        token_with(user_id, role, chrono::Utc::now().timestamp() + 3600, SECRET)
    }

    fn token_with(user_id: &str, role: &str, exp: i64, secret: &str) -> String {
        let claims = Claims {
            sub: user_id.to_string(),
            username: format!("{user_id}-name"),
            role: role.to_string(),
            exp,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_token() {
        let verifier = JwtVerifier::new(&settings());
        let identity = verifier.verify(&token_for("eng-1", "engineer")).unwrap();
        assert_eq!(identity.id, "eng-1");
        assert_eq!(identity.role, UserRole::Engineer);
    }

    #[test]
    fn test_rejected_tokens() {
        let verifier = JwtVerifier::new(&settings());
        let past = chrono::Utc::now().timestamp() - 3600;

        for token in [
            token_with("eng-1", "engineer", past, SECRET),
            token_for("eng-1", "superuser"),
            token_with("eng-1", "engineer", past + 7200, "another-secret-another-secret-xx"),
            "not-a-jwt".to_string(),
        ] {
            let err = verifier.verify(&token).unwrap_err();
            assert_eq!(err.status, axum::http::StatusCode::UNAUTHORIZED);
        }
    }

    #[test]
    fn test_bearer_extraction() {
        let mut headers = HeaderMap::new();
        assert!(extract_bearer_token(&headers).is_err());

        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert!(extract_bearer_token(&headers).is_err());

        headers.insert("authorization", HeaderValue::from_static("bearer  abc "));
        assert_eq!(extract_bearer_token(&headers).unwrap(), "abc");
    }
}

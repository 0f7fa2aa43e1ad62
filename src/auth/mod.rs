use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    Json, RequestPartsExt,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

// ============================================================================
// JWT Claims
// ============================================================================

/// Token issuance (login, signup) is out of scope here — this core only ever
/// verifies bearer tokens minted by a collaborating auth service. See
/// `test-support` below for the one place tokens are still created, for
/// integration tests.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn user_id(&self) -> AppResult<i64> {
        self.sub
            .parse()
            .map_err(|_| AppError::AuthFailed("invalid user id in token".into()))
    }
}

// ============================================================================
// JWT Verification
// ============================================================================

pub fn validate_token(token: &str, secret: &str) -> AppResult<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| {
        tracing::warn!(error = ?e, "token validation failed");
        AppError::AuthFailed("invalid or expired token".into())
    })
}

// ============================================================================
// Auth Middleware
// ============================================================================

/// Authenticated user extracted from a valid bearer token.
///
/// Fields are private: the only valid constructor is the `FromRequestParts`
/// impl, preventing callers from forging an `AuthUser` via struct literal.
pub struct AuthUser {
    user_id: i64,
}

impl AuthUser {
    pub fn user_id(&self) -> i64 {
        self.user_id
    }
}

type AuthRejection = (StatusCode, Json<serde_json::Value>);

fn auth_error(message: &str) -> AuthRejection {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": message })))
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| auth_error("missing or invalid Authorization header"))?;

        let claims = validate_token(bearer.token(), &state.config.jwt_secret)
            .map_err(|_| auth_error("invalid or expired token"))?;

        let user_id = claims
            .user_id()
            .map_err(|_| auth_error("invalid token subject"))?;

        Ok(AuthUser { user_id })
    }
}

/// Extracts a bearer token directly from a raw string, for the websocket
/// handshake where the token arrives as a query parameter rather than a
/// header (browsers cannot set custom headers on a WebSocket upgrade).
pub fn authenticate_token(token: &str, secret: &str) -> AppResult<i64> {
    validate_token(token, secret)?.user_id()
}

// ============================================================================
// Test-only token issuance
// ============================================================================

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use super::*;
    use chrono::{Duration, Utc};
    use jsonwebtoken::{encode, EncodingKey, Header};

    /// Mints a bearer token for integration tests. Production code paths
    /// never call this — token issuance is a collaborating service's job.
    pub fn mint_token(user_id: i64, secret: &str) -> String {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::minutes(60)).timestamp(),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .expect("encoding a test token should never fail")
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::test_support::mint_token;
    use super::*;

    const TEST_SECRET: &str = "test-secret-min-32-characters-long!!";

    #[test]
    fn token_roundtrip_happy_path() {
        let token = mint_token(42, TEST_SECRET);
        let claims = validate_token(&token, TEST_SECRET).expect("token should validate");
        assert_eq!(claims.user_id().unwrap(), 42);
    }

    #[test]
    fn validate_token_rejects_wrong_secret() {
        let token = mint_token(1, TEST_SECRET);
        let result = validate_token(&token, "a-completely-different-secret-value");
        assert!(result.is_err());
    }

    #[test]
    fn validate_token_rejects_malformed_string() {
        let result = validate_token("this.is.not.a.valid.jwt", TEST_SECRET);
        assert!(result.is_err());
    }

    #[test]
    fn validate_token_rejects_empty_string() {
        let result = validate_token("", TEST_SECRET);
        assert!(result.is_err());
    }

    #[test]
    fn authenticate_token_returns_user_id() {
        let token = mint_token(7, TEST_SECRET);
        let user_id = authenticate_token(&token, TEST_SECRET).expect("should authenticate");
        assert_eq!(user_id, 7);
    }

    #[test]
    fn claims_user_id_rejects_non_numeric_sub() {
        let claims = Claims {
            sub: "not-a-number".to_string(),
            exp: 9_999_999_999,
            iat: 0,
        };
        assert!(claims.user_id().is_err());
    }
}

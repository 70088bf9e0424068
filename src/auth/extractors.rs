use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::warn;
use uuid::Uuid;

use crate::auth::handlers::ACCESS_COOKIE;
use crate::auth::jwt::JwtKeys;
use crate::error::ApiError;

/// Validates the access token from the Authorization header or the
/// `accessToken` cookie and yields the caller's user id.
pub struct AuthUser(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = JwtKeys::from_ref(state);

        let bearer = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|t| t.to_string());

        let token = match bearer {
            Some(t) => t,
            None => CookieJar::from_headers(&parts.headers)
                .get(ACCESS_COOKIE)
                .map(|c| c.value().to_string())
                .ok_or_else(|| ApiError::Unauthorized("missing access token".into()))?,
        };

        let claims = keys.verify_access(&token).map_err(|_| {
            warn!("invalid or expired access token");
            ApiError::Unauthorized("invalid or expired access token".into())
        })?;

        Ok(AuthUser(claims.sub))
    }
}

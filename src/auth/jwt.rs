use std::time::Duration;

use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::auth::repo::User;
use crate::config::JwtConfig;
use crate::state::AppState;

/// Access token payload: enough identity to render the caller without a
/// database round-trip.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AccessClaims {
    pub sub: Uuid,
    pub email: String,
    pub username: String,
    pub fullname: String,
    pub exp: usize,
    pub iat: usize,
    pub iss: String,
    pub aud: String,
}

/// Refresh token payload carries only the user id. The `jti` makes every
/// issued token unique, so rotation always produces a new token even within
/// the same second.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RefreshClaims {
    pub sub: Uuid,
    pub jti: Uuid,
    pub exp: usize,
    pub iat: usize,
    pub iss: String,
    pub aud: String,
}

/// Signing and verification keys for both token kinds. Access and refresh
/// tokens use distinct secrets, so one can never be presented as the other.
#[derive(Clone)]
pub struct JwtKeys {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        let JwtConfig {
            access_secret,
            refresh_secret,
            issuer,
            audience,
            access_ttl_minutes,
            refresh_ttl_minutes,
        } = state.config.jwt.clone();
        Self {
            access_encoding: EncodingKey::from_secret(access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(refresh_secret.as_bytes()),
            issuer,
            audience,
            access_ttl: Duration::from_secs((access_ttl_minutes as u64) * 60),
            refresh_ttl: Duration::from_secs((refresh_ttl_minutes as u64) * 60),
        }
    }
}

impl JwtKeys {
    fn timestamps(&self, ttl: Duration) -> (usize, usize) {
        let now = OffsetDateTime::now_utc();
        let exp = now + TimeDuration::seconds(ttl.as_secs() as i64);
        (now.unix_timestamp() as usize, exp.unix_timestamp() as usize)
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation
    }

    pub fn sign_access(&self, user: &User) -> anyhow::Result<String> {
        let (iat, exp) = self.timestamps(self.access_ttl);
        let claims = AccessClaims {
            sub: user.id,
            email: user.email.clone(),
            username: user.username.clone(),
            fullname: user.fullname.clone(),
            iat,
            exp,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::default(), &claims, &self.access_encoding)?;
        debug!(user_id = %user.id, "access token signed");
        Ok(token)
    }

    pub fn sign_refresh(&self, user_id: Uuid) -> anyhow::Result<String> {
        let (iat, exp) = self.timestamps(self.refresh_ttl);
        let claims = RefreshClaims {
            sub: user_id,
            jti: Uuid::new_v4(),
            iat,
            exp,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::default(), &claims, &self.refresh_encoding)?;
        debug!(user_id = %user_id, "refresh token signed");
        Ok(token)
    }

    pub fn verify_access(&self, token: &str) -> anyhow::Result<AccessClaims> {
        let data = decode::<AccessClaims>(token, &self.access_decoding, &self.validation())?;
        debug!(user_id = %data.claims.sub, "access token verified");
        Ok(data.claims)
    }

    pub fn verify_refresh(&self, token: &str) -> anyhow::Result<RefreshClaims> {
        let data = decode::<RefreshClaims>(token, &self.refresh_decoding, &self.validation())?;
        debug!(user_id = %data.claims.sub, "refresh token verified");
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppState;

    fn make_keys() -> JwtKeys {
        JwtKeys::from_ref(&AppState::fake())
    }

    fn make_user() -> User {
        User {
            id: Uuid::new_v4(),
            username: "alice".into(),
            email: "a@x.com".into(),
            fullname: "Alice".into(),
            avatar: "https://fake.local/avatars/a.jpg".into(),
            cover_image: None,
            password_hash: "unused".into(),
            refresh_token: None,
            watch_history: Vec::new(),
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn sign_and_verify_access_token() {
        let keys = make_keys();
        let user = make_user();
        let token = keys.sign_access(&user).expect("sign access");
        let claims = keys.verify_access(&token).expect("verify access");
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.email, "a@x.com");
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.fullname, "Alice");
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-aud");
    }

    #[tokio::test]
    async fn sign_and_verify_refresh_token() {
        let keys = make_keys();
        let user_id = Uuid::new_v4();
        let token = keys.sign_refresh(user_id).expect("sign refresh");
        let claims = keys.verify_refresh(&token).expect("verify refresh");
        assert_eq!(claims.sub, user_id);
    }

    #[tokio::test]
    async fn rotation_always_yields_a_fresh_refresh_token() {
        let keys = make_keys();
        let user_id = Uuid::new_v4();
        let first = keys.sign_refresh(user_id).expect("sign refresh");
        let second = keys.sign_refresh(user_id).expect("sign refresh");
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn access_token_is_not_a_refresh_token() {
        let keys = make_keys();
        let token = keys.sign_access(&make_user()).expect("sign access");
        // distinct secrets: the refresh key must reject it
        assert!(keys.verify_refresh(&token).is_err());
    }

    #[tokio::test]
    async fn refresh_token_is_not_an_access_token() {
        let keys = make_keys();
        let token = keys.sign_refresh(Uuid::new_v4()).expect("sign refresh");
        assert!(keys.verify_access(&token).is_err());
    }

    #[tokio::test]
    async fn verify_rejects_garbage() {
        let keys = make_keys();
        assert!(keys.verify_refresh("not.a.jwt").is_err());
        assert!(keys.verify_access("").is_err());
    }
}

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo::User;

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: String,
}

/// Request body for token refresh; the cookie takes precedence.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

/// Request body for password change.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
    pub renew_password: String,
}

/// Request body for the forgot-password flow.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgetPasswordRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub new_password: String,
    pub renew_password: String,
}

/// Public part of the user returned to the client. Never carries the
/// password hash or the refresh token.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPublic {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub fullname: String,
    pub avatar: String,
    pub cover_image: Option<String>,
    pub watch_history: Vec<Uuid>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl From<User> for UserPublic {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            username: u.username,
            email: u.email,
            fullname: u.fullname,
            avatar: u.avatar,
            cover_image: u.cover_image,
            watch_history: u.watch_history,
            created_at: u.created_at,
            updated_at: u.updated_at,
        }
    }
}

/// Response returned after login.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub user: UserPublic,
    pub access_token: String,
    pub refresh_token: String,
}

/// Response returned after a token refresh.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPairResponse {
    pub access_token: String,
    pub refresh_token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_user() -> User {
        User {
            id: Uuid::new_v4(),
            username: "alice".into(),
            email: "a@x.com".into(),
            fullname: "Alice".into(),
            avatar: "https://fake.local/avatars/a.jpg".into(),
            cover_image: None,
            password_hash: "argon2-hash".into(),
            refresh_token: Some("live-refresh-token".into()),
            watch_history: Vec::new(),
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn user_row_serialization_skips_secrets() {
        let json = serde_json::to_value(make_user()).unwrap();
        assert!(json.get("password_hash").is_none());
        assert!(json.get("refresh_token").is_none());
        assert_eq!(json["username"], "alice");
    }

    #[test]
    fn public_user_has_no_secret_fields() {
        let public = UserPublic::from(make_user());
        let json = serde_json::to_value(&public).unwrap();
        assert!(json.get("passwordHash").is_none());
        assert!(json.get("refreshToken").is_none());
        assert_eq!(json["email"], "a@x.com");
        assert_eq!(json["coverImage"], serde_json::Value::Null);
    }

    #[test]
    fn login_response_uses_camel_case() {
        let res = LoginResponse {
            user: UserPublic::from(make_user()),
            access_token: "aaa".into(),
            refresh_token: "rrr".into(),
        };
        let json = serde_json::to_value(&res).unwrap();
        assert_eq!(json["accessToken"], "aaa");
        assert_eq!(json["refreshToken"], "rrr");
        assert_eq!(json["user"]["username"], "alice");
    }

    #[test]
    fn refresh_request_accepts_camel_case_and_empty_body() {
        let req: RefreshRequest = serde_json::from_str(r#"{"refreshToken":"tok"}"#).unwrap();
        assert_eq!(req.refresh_token.as_deref(), Some("tok"));
        let empty: RefreshRequest = serde_json::from_str("{}").unwrap();
        assert!(empty.refresh_token.is_none());
    }
}

use axum::extract::FromRef;
use bytes::Bytes;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::dto::LoginRequest;
use crate::auth::jwt::JwtKeys;
use crate::auth::password::{hash_password, verify_password};
use crate::auth::repo::{NewUser, User};
use crate::error::ApiError;
use crate::state::AppState;
use crate::storage::ext_from_mime;

/// Freshly signed access + refresh tokens.
#[derive(Debug)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// An uploaded file pulled out of the multipart form.
#[derive(Debug)]
pub struct UploadItem {
    pub body: Bytes,
    pub content_type: String,
}

/// Registration fields after multipart extraction.
#[derive(Debug)]
pub struct RegisterInput {
    pub fullname: String,
    pub email: String,
    pub username: String,
    pub password: String,
    pub avatar: Option<UploadItem>,
    pub cover_image: Option<UploadItem>,
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn any_field_empty(fields: &[&str]) -> bool {
    fields.iter().any(|f| f.trim().is_empty())
}

/// Reuse detection: the presented refresh token must exactly match the one
/// persisted on the user. A rotated-out token no longer matches.
fn check_refresh_reuse(persisted: Option<&str>, presented: &str) -> Result<(), ApiError> {
    match persisted {
        Some(stored) if stored == presented => Ok(()),
        _ => Err(ApiError::Unauthorized(
            "refresh token is expired or already used".into(),
        )),
    }
}

fn media_key(prefix: &str, content_type: &str) -> String {
    let ext = ext_from_mime(content_type).unwrap_or("bin");
    format!("{}/{}.{}", prefix, Uuid::new_v4(), ext)
}

/// Signs a new access/refresh pair and persists the refresh token on the
/// user row, replacing whatever was there (rotation). Any failure here is
/// surfaced as a generic internal error.
pub async fn issue_token_pair(st: &AppState, user_id: Uuid) -> Result<TokenPair, ApiError> {
    let internal = |e: anyhow::Error| {
        error!(error = %e, user_id = %user_id, "token pair issuance failed");
        ApiError::Internal("something went wrong while generating tokens".into())
    };

    let user = User::find_by_id(&st.db, user_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::Internal("something went wrong while generating tokens".into()))?;

    let keys = JwtKeys::from_ref(st);
    let access_token = keys.sign_access(&user).map_err(internal)?;
    let refresh_token = keys.sign_refresh(user.id).map_err(internal)?;

    User::set_refresh_token(&st.db, user.id, Some(&refresh_token))
        .await
        .map_err(internal)?;

    Ok(TokenPair {
        access_token,
        refresh_token,
    })
}

pub async fn register(st: &AppState, mut input: RegisterInput) -> Result<User, ApiError> {
    input.fullname = input.fullname.trim().to_string();
    input.email = input.email.trim().to_lowercase();
    input.username = input.username.trim().to_lowercase();

    if any_field_empty(&[
        &input.fullname,
        &input.email,
        &input.username,
        &input.password,
    ]) {
        return Err(ApiError::Validation("all fields are required".into()));
    }

    if !is_valid_email(&input.email) {
        warn!(email = %input.email, "invalid email");
        return Err(ApiError::Validation("invalid email".into()));
    }

    if let Some(existing) =
        User::find_by_username_or_email(&st.db, Some(&input.username), Some(&input.email))
            .await
            .map_err(ApiError::internal)?
    {
        warn!(username = %existing.username, "registration conflict");
        return Err(ApiError::Conflict(
            "user with email or username already exists".into(),
        ));
    }

    let avatar = input
        .avatar
        .ok_or_else(|| ApiError::Validation("avatar file is required".into()))?;

    let avatar_url = st
        .storage
        .upload(
            &media_key("avatars", &avatar.content_type),
            avatar.body,
            &avatar.content_type,
        )
        .await
        .map_err(|e| ApiError::AvatarUpload(e.to_string()))?;

    let cover_image = match input.cover_image {
        Some(cover) => Some(
            st.storage
                .upload(
                    &media_key("covers", &cover.content_type),
                    cover.body,
                    &cover.content_type,
                )
                .await
                .map_err(|e| ApiError::AvatarUpload(format!("cover image: {}", e)))?,
        ),
        None => None,
    };

    let password_hash = hash_password(&input.password).map_err(ApiError::internal)?;

    let user = User::create(
        &st.db,
        &NewUser {
            username: input.username,
            email: input.email,
            fullname: input.fullname,
            avatar: avatar_url,
            cover_image,
            password_hash,
        },
    )
    .await
    .map_err(|e| {
        error!(error = %e, "create user failed");
        ApiError::Internal("something went wrong while registering the user".into())
    })?;

    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok(user)
}

pub async fn login(st: &AppState, mut req: LoginRequest) -> Result<(User, TokenPair), ApiError> {
    let username = req
        .username
        .take()
        .map(|u| u.trim().to_lowercase())
        .filter(|u| !u.is_empty());
    let email = req
        .email
        .take()
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty());

    if username.is_none() && email.is_none() {
        return Err(ApiError::Validation("username or email is required".into()));
    }

    let user = User::find_by_username_or_email(&st.db, username.as_deref(), email.as_deref())
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::NotFound("user does not exist".into()))?;

    let ok = verify_password(&req.password, &user.password_hash).map_err(ApiError::internal)?;
    if !ok {
        warn!(user_id = %user.id, "login invalid password");
        return Err(ApiError::Unauthorized("invalid user password".into()));
    }

    let pair = issue_token_pair(st, user.id).await?;
    info!(user_id = %user.id, username = %user.username, "user logged in");
    Ok((user, pair))
}

pub async fn logout(st: &AppState, user_id: Uuid) -> Result<(), ApiError> {
    User::set_refresh_token(&st.db, user_id, None)
        .await
        .map_err(ApiError::internal)?;
    info!(user_id = %user_id, "user logged out");
    Ok(())
}

pub async fn refresh(st: &AppState, incoming: Option<String>) -> Result<TokenPair, ApiError> {
    let incoming =
        incoming.ok_or_else(|| ApiError::Unauthorized("refresh token is missing".into()))?;

    let keys = JwtKeys::from_ref(st);
    let claims = keys.verify_refresh(&incoming).map_err(|_| {
        warn!("refresh token failed verification");
        ApiError::Unauthorized("invalid refresh token".into())
    })?;

    let user = User::find_by_id(&st.db, claims.sub)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::Unauthorized("invalid refresh token".into()))?;

    check_refresh_reuse(user.refresh_token.as_deref(), &incoming)?;

    let pair = issue_token_pair(st, user.id).await?;
    info!(user_id = %user.id, "refresh token rotated");
    Ok(pair)
}

pub async fn change_password(
    st: &AppState,
    user_id: Uuid,
    old_password: &str,
    new_password: &str,
    renew_password: &str,
) -> Result<(), ApiError> {
    if new_password != renew_password {
        return Err(ApiError::Validation(
            "newPassword does not match renewPassword".into(),
        ));
    }

    let user = User::find_by_id(&st.db, user_id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::Unauthorized("user not found".into()))?;

    let ok = verify_password(old_password, &user.password_hash).map_err(ApiError::internal)?;
    if !ok {
        warn!(user_id = %user.id, "change password with invalid old password");
        return Err(ApiError::Unauthorized("invalid old password".into()));
    }

    let hash = hash_password(new_password).map_err(ApiError::internal)?;
    User::set_password_hash(&st.db, user.id, &hash)
        .await
        .map_err(ApiError::internal)?;
    info!(user_id = %user.id, "password changed");
    Ok(())
}

/// Simplified forgot-password flow: the caller is already authenticated and
/// must name their own username or email.
pub async fn reset_password(
    st: &AppState,
    user_id: Uuid,
    username: Option<&str>,
    email: Option<&str>,
    new_password: &str,
    renew_password: &str,
) -> Result<(), ApiError> {
    let username = username.map(|u| u.trim().to_lowercase()).filter(|u| !u.is_empty());
    let email = email.map(|e| e.trim().to_lowercase()).filter(|e| !e.is_empty());

    if username.is_none() && email.is_none() {
        return Err(ApiError::Validation("username or email is required".into()));
    }

    let user = User::find_by_id(&st.db, user_id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::Unauthorized("user not found".into()))?;

    let identity_matches = username.as_deref() == Some(user.username.as_str())
        || email.as_deref() == Some(user.email.as_str());
    if !identity_matches {
        warn!(user_id = %user.id, "forgot-password identity mismatch");
        return Err(ApiError::Unauthorized(
            "enter the correct username or email".into(),
        ));
    }

    if new_password != renew_password {
        return Err(ApiError::Validation(
            "newPassword does not match renewPassword".into(),
        ));
    }

    let hash = hash_password(new_password).map_err(ApiError::internal)?;
    User::set_password_hash(&st.db, user.id, &hash)
        .await
        .map_err(ApiError::internal)?;
    info!(user_id = %user.id, "password reset");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn email_validation() {
        assert!(is_valid_email("a@x.com"));
        assert!(is_valid_email("user.name@sub.example.org"));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("spaces in@mail.com"));
        assert!(!is_valid_email("missing@tld"));
    }

    #[test]
    fn empty_field_detection_trims() {
        assert!(any_field_empty(&["Alice", "  ", "alice", "p1"]));
        assert!(any_field_empty(&[""]));
        assert!(!any_field_empty(&["Alice", "a@x.com", "alice", "p1"]));
    }

    #[test]
    fn refresh_reuse_accepts_matching_token() {
        assert!(check_refresh_reuse(Some("tok-1"), "tok-1").is_ok());
    }

    #[test]
    fn refresh_reuse_rejects_rotated_out_token() {
        let err = check_refresh_reuse(Some("tok-2"), "tok-1").unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn refresh_reuse_rejects_cleared_slot() {
        // after logout the slot is NULL; any presented token must fail
        let err = check_refresh_reuse(None, "tok-1").unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn media_keys_carry_extension_and_prefix() {
        let key = media_key("avatars", "image/png");
        assert!(key.starts_with("avatars/"));
        assert!(key.ends_with(".png"));
        let fallback = media_key("covers", "application/octet-stream");
        assert!(fallback.ends_with(".bin"));
    }
}

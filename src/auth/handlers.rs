use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde_json::json;
use tracing::instrument;

use crate::{
    auth::{
        dto::{
            ChangePasswordRequest, ForgetPasswordRequest, LoginRequest, LoginResponse,
            RefreshRequest, TokenPairResponse, UserPublic,
        },
        extractors::AuthUser,
        repo::User,
        services::{self, RegisterInput, TokenPair, UploadItem},
    },
    error::ApiError,
    response::ApiResponse,
    state::AppState,
};

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/users/register", post(register))
        .route("/users/login", post(login))
        .route("/users/logout", post(logout))
        .route("/users/refresh-token", post(refresh_token))
        .route("/users/change-password", post(change_password))
        .route("/users/forget-password", post(forget_password))
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024)) // 10MB, avatar + cover
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/users/me", get(get_me))
}

fn auth_cookie(name: &'static str, value: String) -> Cookie<'static> {
    let mut cookie = Cookie::new(name, value);
    cookie.set_http_only(true);
    cookie.set_secure(true);
    cookie.set_path("/");
    cookie
}

fn set_auth_cookies(jar: CookieJar, pair: &TokenPair) -> CookieJar {
    jar.add(auth_cookie(ACCESS_COOKIE, pair.access_token.clone()))
        .add(auth_cookie(REFRESH_COOKIE, pair.refresh_token.clone()))
}

fn clear_auth_cookies(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build(ACCESS_COOKIE).path("/"))
        .remove(Cookie::build(REFRESH_COOKIE).path("/"))
}

#[instrument(skip(state, mp))]
pub async fn register(
    State(state): State<AppState>,
    mut mp: Multipart,
) -> Result<ApiResponse<UserPublic>, ApiError> {
    let mut input = RegisterInput {
        fullname: String::new(),
        email: String::new(),
        username: String::new(),
        password: String::new(),
        avatar: None,
        cover_image: None,
    };

    while let Some(field) = mp
        .next_field()
        .await
        .map_err(|_| ApiError::Validation("malformed multipart form".into()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "fullname" => input.fullname = field.text().await.unwrap_or_default(),
            "email" => input.email = field.text().await.unwrap_or_default(),
            "username" => input.username = field.text().await.unwrap_or_default(),
            "password" => input.password = field.text().await.unwrap_or_default(),
            "avatar" | "coverImage" => {
                let content_type = field
                    .content_type()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "application/octet-stream".into());
                let body = field
                    .bytes()
                    .await
                    .map_err(|_| ApiError::Validation("malformed multipart form".into()))?;
                let item = UploadItem { body, content_type };
                if name == "avatar" {
                    input.avatar = Some(item);
                } else {
                    input.cover_image = Some(item);
                }
            }
            _ => {}
        }
    }

    let user = services::register(&state, input).await?;
    Ok(ApiResponse::new(
        StatusCode::CREATED,
        UserPublic::from(user),
        "user registered successfully",
    ))
}

#[instrument(skip(state, jar, payload))]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> Result<(CookieJar, ApiResponse<LoginResponse>), ApiError> {
    let (user, pair) = services::login(&state, payload).await?;
    let jar = set_auth_cookies(jar, &pair);
    Ok((
        jar,
        ApiResponse::ok(
            LoginResponse {
                user: UserPublic::from(user),
                access_token: pair.access_token,
                refresh_token: pair.refresh_token,
            },
            "user logged in successfully",
        ),
    ))
}

#[instrument(skip(state, jar))]
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    jar: CookieJar,
) -> Result<(CookieJar, ApiResponse<serde_json::Value>), ApiError> {
    services::logout(&state, user_id).await?;
    Ok((
        clear_auth_cookies(jar),
        ApiResponse::ok(json!({}), "user logged out"),
    ))
}

#[instrument(skip(state, jar, payload))]
pub async fn refresh_token(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Option<Json<RefreshRequest>>,
) -> Result<(CookieJar, ApiResponse<TokenPairResponse>), ApiError> {
    let incoming = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .or_else(|| payload.and_then(|Json(p)| p.refresh_token));

    let pair = services::refresh(&state, incoming).await?;
    let jar = set_auth_cookies(jar, &pair);
    Ok((
        jar,
        ApiResponse::ok(
            TokenPairResponse {
                access_token: pair.access_token,
                refresh_token: pair.refresh_token,
            },
            "tokens refreshed successfully",
        ),
    ))
}

#[instrument(skip(state, payload))]
pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<ApiResponse<serde_json::Value>, ApiError> {
    services::change_password(
        &state,
        user_id,
        &payload.old_password,
        &payload.new_password,
        &payload.renew_password,
    )
    .await?;
    Ok(ApiResponse::ok(json!({}), "password changed successfully"))
}

#[instrument(skip(state, payload))]
pub async fn forget_password(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<ForgetPasswordRequest>,
) -> Result<ApiResponse<serde_json::Value>, ApiError> {
    services::reset_password(
        &state,
        user_id,
        payload.username.as_deref(),
        payload.email.as_deref(),
        &payload.new_password,
        &payload.renew_password,
    )
    .await?;
    Ok(ApiResponse::ok(json!({}), "password reset successfully"))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<ApiResponse<UserPublic>, ApiError> {
    let user = User::find_by_id(&state.db, user_id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::Unauthorized("user not found".into()))?;
    Ok(ApiResponse::ok(
        UserPublic::from(user),
        "current user fetched successfully",
    ))
}

#[cfg(test)]
mod cookie_tests {
    use super::*;

    #[test]
    fn auth_cookies_are_http_only_and_secure() {
        let cookie = auth_cookie(ACCESS_COOKIE, "tok".into());
        assert_eq!(cookie.name(), "accessToken");
        assert_eq!(cookie.value(), "tok");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.path(), Some("/"));
    }

    #[test]
    fn set_auth_cookies_adds_both() {
        let pair = TokenPair {
            access_token: "aaa".into(),
            refresh_token: "rrr".into(),
        };
        let jar = set_auth_cookies(CookieJar::new(), &pair);
        assert_eq!(jar.get(ACCESS_COOKIE).unwrap().value(), "aaa");
        assert_eq!(jar.get(REFRESH_COOKIE).unwrap().value(), "rrr");
    }

    #[test]
    fn clear_auth_cookies_removes_both() {
        let pair = TokenPair {
            access_token: "aaa".into(),
            refresh_token: "rrr".into(),
        };
        let jar = clear_auth_cookies(set_auth_cookies(CookieJar::new(), &pair));
        assert!(jar.get(ACCESS_COOKIE).is_none());
        assert!(jar.get(REFRESH_COOKIE).is_none());
    }
}

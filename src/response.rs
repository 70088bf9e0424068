use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Success envelope: {statusCode, data, message, success}.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T: Serialize> {
    pub status_code: u16,
    pub data: T,
    pub message: String,
    pub success: bool,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(status: StatusCode, data: T, message: &str) -> Self {
        Self {
            status_code: status.as_u16(),
            data,
            message: message.to_string(),
            success: status.is_success(),
        }
    }

    pub fn ok(data: T, message: &str) -> Self {
        Self::new(StatusCode::OK, data, message)
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_shape() {
        let res = ApiResponse::ok(serde_json::json!({"id": 1}), "ok");
        let json = serde_json::to_value(&res).unwrap();
        assert_eq!(json["statusCode"], 200);
        assert_eq!(json["success"], true);
        assert_eq!(json["message"], "ok");
        assert_eq!(json["data"]["id"], 1);
    }

    #[test]
    fn created_is_success() {
        let res = ApiResponse::new(StatusCode::CREATED, (), "user registered successfully");
        assert!(res.success);
        assert_eq!(res.status_code, 201);
    }
}

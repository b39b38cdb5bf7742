use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use crate::app::services::ServiceError;

pub fn service_error_to_response(err: ServiceError) -> axum::response::Response {
    match err {
        ServiceError::InvalidFields(fields) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            axum::Json(json!({
                "error": "invalid_credentials",
                "message": "login or password does not meet the requirements",
                "fields": fields,
            })),
        )
            .into_response(),
        ServiceError::InvalidOrderNumber(e) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invalid_order_number", e.to_string())
        }
        ServiceError::InvalidAmount(e) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invalid_sum", e.to_string())
        }
        ServiceError::LoginTaken => json_error(StatusCode::CONFLICT, "login_taken", "login is already taken"),
        ServiceError::OrderOwnedByAnotherUser => json_error(
            StatusCode::CONFLICT,
            "order_conflict",
            "order was uploaded by another user",
        ),
        ServiceError::BadCredentials => {
            json_error(StatusCode::UNAUTHORIZED, "bad_credentials", "wrong login or password")
        }
        ServiceError::InsufficientFunds(e) => {
            json_error(StatusCode::PAYMENT_REQUIRED, "insufficient_funds", e.to_string())
        }
        ServiceError::Internal(msg) => {
            tracing::error!(error = %msg, "request failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "internal server error")
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// 400 for a body that is not the expected JSON.
pub fn malformed_body(err: impl std::fmt::Display) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "malformed_request", err.to_string())
}

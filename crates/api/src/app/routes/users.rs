use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::Extension,
    http::{StatusCode, header},
    response::IntoResponse,
    Json,
};
use serde_json::json;

use loyalty_auth::Credentials;

use crate::app::{errors, services::AppServices};
use crate::middleware::AUTH_COOKIE;

pub async fn register(
    Extension(services): Extension<Arc<AppServices>>,
    body: Bytes,
) -> axum::response::Response {
    let credentials = match serde_json::from_slice::<Credentials>(&body) {
        Ok(credentials) => credentials,
        Err(e) => return errors::malformed_body(e),
    };

    match services.register(credentials).await {
        Ok(token) => session_response(&token),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn login(
    Extension(services): Extension<Arc<AppServices>>,
    body: Bytes,
) -> axum::response::Response {
    let credentials = match serde_json::from_slice::<Credentials>(&body) {
        Ok(credentials) => credentials,
        Err(e) => return errors::malformed_body(e),
    };

    match services.login(credentials).await {
        Ok(token) => session_response(&token),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// 200 carrying the token both as a Bearer header and as a cookie.
fn session_response(token: &str) -> axum::response::Response {
    (
        StatusCode::OK,
        [
            (header::AUTHORIZATION, format!("Bearer {token}")),
            (header::SET_COOKIE, format!("{AUTH_COOKIE}={token}; HttpOnly; Path=/")),
        ],
        Json(json!({ "result": true })),
    )
        .into_response()
}

use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse};

use crate::app::{errors, services::AppServices};

pub async fn ping(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.ping().await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use crate::app::services::{AppServices, Submission};
use crate::app::{dto, errors};
use crate::context::UserContext;

pub async fn submit_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    body: String,
) -> axum::response::Response {
    if body.trim().is_empty() {
        return errors::json_error(StatusCode::BAD_REQUEST, "empty_body", "order number is required");
    }

    match services.submit_order(&user, &body).await {
        Ok(Submission::Accepted) => StatusCode::ACCEPTED.into_response(),
        Ok(Submission::AlreadySubmitted) => StatusCode::OK.into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn list_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
) -> axum::response::Response {
    match services.user_orders(&user).await {
        Ok(orders) if orders.is_empty() => StatusCode::NO_CONTENT.into_response(),
        Ok(orders) => {
            let items = orders.iter().map(dto::order_to_json).collect::<Vec<_>>();
            (StatusCode::OK, Json(items)).into_response()
        }
        Err(e) => errors::service_error_to_response(e),
    }
}

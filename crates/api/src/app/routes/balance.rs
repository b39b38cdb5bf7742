use std::sync::Arc;

use axum::{body::Bytes, extract::Extension, http::StatusCode, response::IntoResponse, Json};

use loyalty_core::money::decimal_from_json;

use crate::app::{dto, errors, services::AppServices};
use crate::context::UserContext;

pub async fn get_balance(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
) -> axum::response::Response {
    match services.balance(&user).await {
        Ok(balance) => (StatusCode::OK, Json(dto::balance_to_json(&balance))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn withdraw(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    body: Bytes,
) -> axum::response::Response {
    let req = match serde_json::from_slice::<dto::WithdrawRequest>(&body) {
        Ok(req) => req,
        Err(e) => return errors::malformed_body(e),
    };
    let sum = match decimal_from_json(&req.sum) {
        Ok(sum) => sum,
        Err(e) => return errors::json_error(StatusCode::UNPROCESSABLE_ENTITY, "invalid_sum", e.to_string()),
    };

    match services.withdraw(&user, &req.order, sum).await {
        Ok(_) => StatusCode::OK.into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn list_withdrawals(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
) -> axum::response::Response {
    match services.withdrawals(&user).await {
        Ok(entries) if entries.is_empty() => StatusCode::NO_CONTENT.into_response(),
        Ok(entries) => {
            let items = entries.iter().map(dto::withdrawal_to_json).collect::<Vec<_>>();
            (StatusCode::OK, Json(items)).into_response()
        }
        Err(e) => errors::service_error_to_response(e),
    }
}

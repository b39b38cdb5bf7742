use axum::{
    Router,
    routing::{get, post},
};

pub mod balance;
pub mod orders;
pub mod system;
pub mod users;

/// Router for all endpoints that need an authenticated user.
pub fn router() -> Router {
    Router::new()
        .route("/api/user/orders", post(orders::submit_order).get(orders::list_orders))
        .route("/api/user/balance", get(balance::get_balance))
        .route("/api/user/balance/withdraw", post(balance::withdraw))
        .route("/api/user/withdrawals", get(balance::list_withdrawals))
}

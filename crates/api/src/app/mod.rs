//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: use cases over the stores and the order queue
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{
    Extension, Router,
    routing::{get, post},
};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<AppServices>) -> Router {
    let auth_state = middleware::AuthState {
        jwt: services.jwt.clone(),
        users: services.users.clone(),
    };

    // Protected routes: require a valid session.
    let protected = routes::router().route_layer(axum::middleware::from_fn_with_state(
        auth_state,
        middleware::auth_middleware,
    ));

    Router::new()
        .route("/api/ping", get(routes::system::ping))
        .route("/api/user/register", post(routes::users::register))
        .route("/api/user/login", post(routes::users::login))
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::http_trace_layer())
                .layer(Extension(services)),
        )
}

use crate::{
    handlers::{deliver_notification, diagnostics, health_check, ready_check},
    routes::auth_middleware::auth_middleware,
    AppState,
};
use axum::{middleware, routing::{get, post}, Router};
use std::sync::Arc;

/// Create API routes
pub fn create_api_routes(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/v1/diagnostics", get(diagnostics))
        .route("/v1/notifications/deliver", post(deliver_notification))
        .route_layer(middleware::from_fn(auth_middleware)) // Applies to all routes added above
        .with_state(state);

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .merge(protected)
}

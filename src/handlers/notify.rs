use crate::{auth::auth, models::{DeliverNotificationRequest, DeliverNotificationResponse, ErrorResponse}, AppState};
use axum::{extract::{Extension, State}, http::StatusCode, Json};
use std::sync::Arc;
use tracing::info;

/// Attempt live delivery of a notification through the recipient's personal
/// channel. Called by the notification service, which falls back to email
/// when `delivered` comes back false.
pub async fn deliver_notification(
    State(state): State<Arc<AppState>>,
    Extension(prpls): Extension<Vec<String>>,
    Json(req): Json<DeliverNotificationRequest>,
) -> Result<(StatusCode, Json<DeliverNotificationResponse>), (StatusCode, Json<ErrorResponse>)> {

    // Only other services may push notifications
    let _ = auth::ensure_service(&prpls)?;

    let delivered = state
        .user_channels
        .deliver(&req.recipient_id, req.notification)
        .await;
    info!("Notification delivery for user {}: delivered={}", req.recipient_id, delivered);

    Ok((StatusCode::OK, Json(DeliverNotificationResponse { delivered })))
}

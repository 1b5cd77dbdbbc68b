use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// Request to deliver a notification to a connected user
#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeliverNotificationRequest {
    pub recipient_id: String,
    #[schema(value_type = Object)]
    pub notification: Value,
}

/// Result of a live delivery attempt. `delivered` is false when the
/// recipient has no active connection; the caller decides on a fallback.
#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeliverNotificationResponse {
    pub delivered: bool,
}

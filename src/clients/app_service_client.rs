use reqwest::Client;
use tokio::sync::OnceCell;
use std::sync::Arc;
use jsonwebtoken::{encode, Header, EncodingKey};
use serde::{Serialize, Deserialize};
use serde_json::json;
use chrono::{Utc, Duration};
use tracing::error;

static APP_SERVICE_CLIENT: OnceCell<Arc<AppServiceClient>> = OnceCell::const_new();

/// Client for the app service: user profiles plus the workspace analytics
/// collectors. Requests are signed with a short-lived service JWT.
#[derive(Debug)]
pub struct AppServiceClient {
    client: Client,
    base_url: String,
    jwt_secret: String,
    service_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    #[serde(rename = "type")]
    type_: String,
    exp: usize,
}

/// User profile as served by the app service.
#[derive(Debug, Deserialize)]
pub struct UserProfile {
    pub name: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl AppServiceClient {
    pub fn new(base_url: String, jwt_secret: String, service_name: String) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("Failed to build reqwest client");

        Self {
            client,
            base_url,
            jwt_secret,
            service_name,
        }
    }

    fn generate_token(&self) -> String {
        let expiration = Utc::now()
            .checked_add_signed(Duration::seconds(60)) // 1 minute expiration
            .expect("valid timestamp")
            .timestamp();

        let claims = Claims {
            sub: self.service_name.clone(),
            type_: "service".to_string(),
            exp: expiration as usize,
        };

        encode(&Header::default(), &claims, &EncodingKey::from_secret(self.jwt_secret.as_bytes()))
            .expect("Failed to generate JWT")
    }

    pub async fn get_user_profile(&self, uid: &str) -> Result<UserProfile, reqwest::Error> {
        let token = self.generate_token();
        let url = format!("{}/users/{}/profile", self.base_url, uid);
        self.client.get(&url)
            .header("Authorization", format!("Bearer {}", token))
            .send().await?
            .error_for_status()?
            .json().await
    }

    pub async fn adjust_active_users(&self, workspace_id: &str, delta: i64) -> Result<(), reqwest::Error> {
        let token = self.generate_token();
        let url = format!("{}/analytics/workspaces/{}/active-users", self.base_url, workspace_id);
        self.client.post(&url)
            .header("Authorization", format!("Bearer {}", token))
            .json(&json!({ "delta": delta }))
            .send().await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn record_edit(&self, workspace_id: &str, user_id: &str, document_id: &str) -> Result<(), reqwest::Error> {
        let token = self.generate_token();
        let url = format!("{}/analytics/workspaces/{}/edits", self.base_url, workspace_id);
        self.client.post(&url)
            .header("Authorization", format!("Bearer {}", token))
            .json(&json!({ "userId": user_id, "documentId": document_id, "increment": 1 }))
            .send().await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn record_activity(
        &self,
        action: &str,
        workspace_id: &str,
        user_id: Option<&str>,
        document_id: Option<&str>,
    ) -> Result<(), reqwest::Error> {
        let token = self.generate_token();
        let url = format!("{}/analytics/workspaces/{}/activity", self.base_url, workspace_id);
        self.client.post(&url)
            .header("Authorization", format!("Bearer {}", token))
            .json(&json!({ "action": action, "userId": user_id, "documentId": document_id }))
            .send().await?
            .error_for_status()?;
        Ok(())
    }
}

/// Initialize the global AppServiceClient
pub fn init_app_service_client(base_url: String, jwt_secret: String, service_name: String) -> Result<(), &'static str> {
    let client = AppServiceClient::new(base_url, jwt_secret, service_name);
    APP_SERVICE_CLIENT.set(Arc::new(client))
        .map_err(|_| "AppServiceClient already initialized")
}

/// Get the global AppServiceClient instance
pub fn get_app_service_client() -> Option<Arc<AppServiceClient>> {
    APP_SERVICE_CLIENT.get().cloned()
}

// Fire-and-forget wrappers: analytics never block or fail the edit/presence
// flow, a lost data point is only ever logged.

pub fn spawn_adjust_active_users(workspace_id: &str, delta: i64) {
    let Some(client) = get_app_service_client() else { return };
    let workspace_id = workspace_id.to_string();
    tokio::spawn(async move {
        if let Err(e) = client.adjust_active_users(&workspace_id, delta).await {
            error!("analytics.active_users failed for workspace {}: {}", workspace_id, e);
        }
    });
}

pub fn spawn_record_edit(workspace_id: &str, user_id: &str, document_id: &str) {
    let Some(client) = get_app_service_client() else { return };
    let workspace_id = workspace_id.to_string();
    let user_id = user_id.to_string();
    let document_id = document_id.to_string();
    tokio::spawn(async move {
        if let Err(e) = client.record_edit(&workspace_id, &user_id, &document_id).await {
            error!("analytics.edit failed for workspace {}: {}", workspace_id, e);
        }
    });
}

pub fn spawn_record_activity(
    action: &'static str,
    workspace_id: &str,
    user_id: Option<String>,
    document_id: Option<String>,
) {
    let Some(client) = get_app_service_client() else { return };
    let workspace_id = workspace_id.to_string();
    tokio::spawn(async move {
        if let Err(e) = client
            .record_activity(action, &workspace_id, user_id.as_deref(), document_id.as_deref())
            .await
        {
            error!("analytics.activity failed for workspace {}: {}", workspace_id, e);
        }
    });
}

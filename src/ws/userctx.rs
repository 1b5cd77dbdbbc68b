use moka::sync::Cache;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{error, info};

use crate::clients::app_service_client;

/// Profile data resolved for an authenticated user.
#[derive(Clone, Debug)]
pub struct UserCtx {
    pub display_name: String,
    pub roles: Vec<String>,
}

static USER_CTX_CACHE: OnceLock<Cache<String, UserCtx>> = OnceLock::new();

pub fn init_user_ctx_cache() {
    USER_CTX_CACHE.get_or_init(|| {
        Cache::builder()
            .max_capacity(100_000)
            .time_to_idle(Duration::from_secs(5 * 60))
            .build()
    });
    info!("User cache initialized");
}

fn get_user_ctx_cache() -> &'static Cache<String, UserCtx> {
    USER_CTX_CACHE
        .get()
        .expect("User cache not initialized. Call init_user_ctx_cache() first.")
}

async fn fetch_user_ctx_from_service(uid: &str) -> Result<UserCtx, String> {
    let client = app_service_client::get_app_service_client()
        .ok_or_else(|| "App service client not initialized".to_string())?;

    let profile = client.get_user_profile(uid).await.map_err(|e| {
        error!("Failed to retrieve profile for user {}: {}", uid, e);
        format!("Failed to retrieve profile: {}", e)
    })?;

    Ok(UserCtx {
        display_name: profile.name,
        roles: profile.roles,
    })
}

/// Resolve a user's profile through the cache. Returns `None` when no app
/// service is configured, in which case callers fall back to token claims.
pub async fn get_or_fetch_user_ctx(uid: &str) -> Result<Option<UserCtx>, String> {
    if app_service_client::get_app_service_client().is_none() {
        return Ok(None);
    }

    let cache = get_user_ctx_cache();
    if let Some(ctx) = cache.get(uid) {
        return Ok(Some(ctx));
    }

    info!("User context cache miss for uid {}. Refreshing from app service.", uid);
    let fetched_ctx = fetch_user_ctx_from_service(uid).await?;

    cache.insert(uid.to_string(), fetched_ctx.clone());
    Ok(Some(fetched_ctx))
}

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use tracing::{error, info};
use crate::config;
use crate::services::auth_service::{claims_identity, get_auth_token, validate_jwt};

pub async fn auth_middleware(
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {

    // 1. Get the auth token from the request
    let token = match get_auth_token(&req) {
        Ok(token) => token,
        Err(_) => return Err(StatusCode::UNAUTHORIZED),
    };

    // 2. Validate Token
    let config = config::get_config();
    let secret = match &config.cloud_auth_jwt_secret {
        Some(secret) => secret,
        None => {
            error!("Auth JWT secret not configured");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };
    let token_data = match validate_jwt(&token, secret) {
        Ok(token_data) => token_data,
        Err(e) => {
            error!("JWT validation failed: {}", e);
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    // 3. Determine the type of token (user/service)
    let token_type = token_data.claims.get("type").and_then(|v| v.as_str()).ok_or_else(|| {
        error!("JWT token does not contain 'type' claim");
        StatusCode::UNAUTHORIZED
    })?;

    // 4A. If user token, derive the user's principals from its claims
    if token_type == "user" {

        info!("User token validated successfully");

        let (user_uid, _, roles) = match claims_identity(&token_data.claims) {
            Ok(identity) => identity,
            Err(e) => {
                error!("{}", e);
                return Err(StatusCode::UNAUTHORIZED);
            }
        };

        let mut prpls = vec![format!("u/{}", user_uid)];
        for role in roles {
            let role_prpl = format!("r/{}", role);
            if !prpls.contains(&role_prpl) {
                prpls.push(role_prpl);
            }
        }

        // Set these principals into request extensions for downstream handlers
        {
            let extensions = req.extensions_mut();
            extensions.insert(prpls);
            extensions.insert(user_uid);
        }
    }
    // 4B. If this is a service token, just extract the service name as prpl
    else if token_type == "service" {

        info!("Service token validated successfully");

        let service_name = if let Some(sub) = token_data.claims.get("sub").and_then(|v| v.as_str()) {
            sub.to_string()
        } else {
            error!("JWT token does not contain 'sub' claim");
            return Err(StatusCode::UNAUTHORIZED);
        };

        let prpls = vec!["s/".to_string() + &service_name];

        {
            let extensions = req.extensions_mut();
            extensions.insert(prpls);
            // No user UID to insert
        }

    } else {
        error!("Invalid token type: {}", token_type);
        return Err(StatusCode::UNAUTHORIZED);
    }

    // Token is valid, proceed to next middleware/handler
    Ok(next.run(req).await)
}

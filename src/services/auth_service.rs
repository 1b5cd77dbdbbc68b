use axum::http::{self};
use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use serde_json::Value;
use tracing::info;

use crate::ws::connection::AuthenticatedUser;
use crate::ws::userctx;

// Get the auth token from a request
pub fn get_auth_token<B>(req: &http::Request<B>) -> Result<String, String> {
    // 1. Try to get token from Authorization header
    if let Some(auth_header) = req.headers().get(http::header::AUTHORIZATION) {
        let auth_str = auth_header.to_str().map_err(|_| "Invalid Authorization header".to_string())?;
        Ok(auth_str
            .strip_prefix("Bearer ")
            .unwrap_or(auth_str)
            .to_string())
    }
    // 2. Try to get token from cookies
    else {
        let cookie_header = req.headers().get(http::header::COOKIE)
            .ok_or_else(|| "Missing Authorization header or Cookie".to_string())?
            .to_str()
            .map_err(|_| "Invalid Cookie header".to_string())?;

        for cookie in cookie::Cookie::split_parse(cookie_header) {
            if let Ok(c) = cookie {
                if c.name() == "auth_token" {
                    return Ok(c.value().to_string());
                }
            }
        }
        Err("auth_token cookie not found".to_string())
    }
}

// Validate a JWT token and return the token data
pub fn validate_jwt(token: &str, secret: &str) -> Result<TokenData<Value>, jsonwebtoken::errors::Error> {
    let validation = Validation::new(Algorithm::HS256);
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    decode::<Value>(token, &decoding_key, &validation)
}

// Pull the subject and the optional name/roles claims out of a validated token
pub fn claims_identity(claims: &Value) -> Result<(String, Option<String>, Vec<String>), String> {
    let uid = claims
        .get("sub")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "Can't extract a UID from the JWT token".to_string())?;

    let name = claims.get("name").and_then(|v| v.as_str()).map(|s| s.to_string());

    let roles = match claims.get("roles").and_then(|v| v.as_array()) {
        Some(roles_array) => roles_array
            .iter()
            .filter_map(|r| r.as_str().map(|s| s.to_string()))
            .collect::<Vec<String>>(),
        None => Vec::new(),
    };

    Ok((uid.to_string(), name, roles))
}

/// Verify a credential token presented on a websocket `join` and resolve the
/// connecting user's identity.
///
/// The display name and roles come from the app service (cached) when one is
/// configured, otherwise from the token's own claims.
pub async fn verify_socket_token(token: &str) -> Result<AuthenticatedUser, String> {
    let config = crate::config::get_config();
    let secret = config
        .cloud_auth_jwt_secret
        .as_ref()
        .ok_or_else(|| "No JWT secret configured!".to_string())?;

    let token_data = validate_jwt(token, secret).map_err(|e| format!("JWT validation failed: {}", e))?;
    let (uid, claim_name, claim_roles) = claims_identity(&token_data.claims)?;
    info!("JWT token validated successfully for user: {}", uid);

    match userctx::get_or_fetch_user_ctx(&uid).await? {
        Some(ctx) => Ok(AuthenticatedUser {
            id: uid,
            name: ctx.display_name,
            roles: ctx.roles,
        }),
        None => Ok(AuthenticatedUser {
            name: claim_name.unwrap_or_else(|| uid.clone()),
            id: uid,
            roles: claim_roles,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "test-secret";

    fn token_for(claims: Value) -> String {
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn exp() -> i64 {
        Utc::now().timestamp() + 60
    }

    #[test]
    fn accepts_valid_token() {
        let token = token_for(json!({
            "sub": "u1",
            "name": "Ada",
            "roles": ["editor"],
            "exp": exp(),
        }));
        let data = validate_jwt(&token, SECRET).unwrap();
        let (uid, name, roles) = claims_identity(&data.claims).unwrap();
        assert_eq!(uid, "u1");
        assert_eq!(name.as_deref(), Some("Ada"));
        assert_eq!(roles, vec!["editor".to_string()]);
    }

    #[test]
    fn rejects_wrong_secret() {
        let token = token_for(json!({"sub": "u1", "exp": exp()}));
        assert!(validate_jwt(&token, "other-secret").is_err());
    }

    #[test]
    fn rejects_expired_token() {
        let token = token_for(json!({
            "sub": "u1",
            "exp": Utc::now().timestamp() - 3600,
        }));
        assert!(validate_jwt(&token, SECRET).is_err());
    }

    #[test]
    fn identity_requires_subject() {
        let claims = json!({"name": "Ada"});
        assert!(claims_identity(&claims).is_err());
    }

    #[test]
    fn missing_name_and_roles_are_optional() {
        let (uid, name, roles) = claims_identity(&json!({"sub": "u1"})).unwrap();
        assert_eq!(uid, "u1");
        assert!(name.is_none());
        assert!(roles.is_empty());
    }
}

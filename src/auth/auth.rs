use axum::{http::StatusCode, Json};
use crate::models::ErrorResponse;

const ADMIN_PRPL: &str = "r/admin";

pub fn is_admin(prpls: &[String]) -> bool {
    prpls.iter().any(|p| p == ADMIN_PRPL)
}

pub fn ensure_admin(prpls: &[String]) -> Result<String, (StatusCode, Json<ErrorResponse>)> {
    if is_admin(prpls) {
        return Ok(ADMIN_PRPL.to_string());
    }

    let status = StatusCode::FORBIDDEN;
    Err((status, Json(ErrorResponse {
        code: status.as_u16(),
        status: status.to_string(),
        error: "Admin access required".to_string(),
    })))
}

pub fn ensure_service(prpls: &[String]) -> Result<String, (StatusCode, Json<ErrorResponse>)> {
    if let Some(p) = prpls.iter().find(|p| p.starts_with("s/")) {
        return Ok(p.clone());
    }

    if is_admin(prpls) {
        return Ok(ADMIN_PRPL.to_string());
    }

    let status = StatusCode::FORBIDDEN;
    Err((status, Json(ErrorResponse {
        code: status.as_u16(),
        status: status.to_string(),
        error: "Service access required".to_string(),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_principal_is_recognized() {
        let prpls = vec!["u/u1".to_string(), "r/admin".to_string()];
        assert!(is_admin(&prpls));
        assert!(ensure_admin(&prpls).is_ok());
    }

    #[test]
    fn plain_user_is_not_admin() {
        let prpls = vec!["u/u1".to_string(), "r/editor".to_string()];
        assert!(!is_admin(&prpls));
        assert!(ensure_admin(&prpls).is_err());
    }

    #[test]
    fn service_principal_passes_service_check() {
        let prpls = vec!["s/penflow-api".to_string()];
        assert_eq!(ensure_service(&prpls).unwrap(), "s/penflow-api");
        assert!(ensure_service(&["u/u1".to_string()]).is_err());
    }
}

//! Authentication middleware
//!
//! Validates the bearer JWT and turns its permission strings into the
//! capability flags the inventory engine consults. Role names never
//! reach the engine.

use axum::{
    extract::Request,
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use shared::{Caller, InventoryCapabilities};

use crate::error::{ErrorDetail, ErrorResponse};

/// Authenticated user information extracted from the JWT
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub actor_id: uuid::Uuid,
    pub employee_holder_id: Option<uuid::Uuid>,
    pub office_id: Option<uuid::Uuid>,
    pub permissions: Vec<String>,
}

impl AuthUser {
    /// Check if the user has a specific permission
    pub fn has_permission(&self, resource: &str, action: &str) -> bool {
        let permission = format!("{}:{}", resource, action);
        self.permissions.contains(&permission)
    }

    /// The caller identity the service layer works with
    pub fn caller(&self) -> Caller {
        Caller {
            actor_id: self.actor_id,
            employee_holder_id: self.employee_holder_id,
            office_id: self.office_id,
            capabilities: InventoryCapabilities::from_permissions(&self.permissions),
        }
    }
}

/// Authentication middleware that validates JWT tokens
///
/// Token validation is done inline to avoid state dependency issues.
pub async fn auth_middleware(mut request: Request, next: Next) -> Response {
    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let token = match auth_header {
        Some(header) if header.starts_with("Bearer ") => &header[7..],
        _ => {
            return unauthorized_response("Missing or invalid Authorization header");
        }
    };

    let jwt_secret = std::env::var("LCM__JWT__SECRET")
        .or_else(|_| std::env::var("LCM_JWT_SECRET"))
        .unwrap_or_else(|_| "development-secret-key".to_string());

    let claims = match decode_jwt(token, &jwt_secret) {
        Ok(claims) => claims,
        Err(msg) => {
            return unauthorized_response(&msg);
        }
    };

    let actor_id = match uuid::Uuid::parse_str(&claims.sub) {
        Ok(id) => id,
        Err(_) => return unauthorized_response("Invalid actor ID in token"),
    };

    let employee_holder_id = match parse_optional_uuid(claims.employee_holder_id.as_deref()) {
        Ok(id) => id,
        Err(_) => return unauthorized_response("Invalid employee holder ID in token"),
    };

    let office_id = match parse_optional_uuid(claims.office_id.as_deref()) {
        Ok(id) => id,
        Err(_) => return unauthorized_response("Invalid office ID in token"),
    };

    let auth_user = AuthUser {
        actor_id,
        employee_holder_id,
        office_id,
        permissions: claims.permissions,
    };

    request.extensions_mut().insert(auth_user);

    next.run(request).await
}

/// JWT claims structure
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct Claims {
    sub: String,
    employee_holder_id: Option<String>,
    office_id: Option<String>,
    permissions: Vec<String>,
    exp: i64,
    iat: i64,
}

fn parse_optional_uuid(raw: Option<&str>) -> Result<Option<uuid::Uuid>, uuid::Error> {
    raw.map(uuid::Uuid::parse_str).transpose()
}

/// Decode and validate JWT token
fn decode_jwt(token: &str, secret: &str) -> Result<Claims, String> {
    use jsonwebtoken::{decode, DecodingKey, Validation};

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| format!("Invalid token: {}", e))
}

fn unauthorized_response(message: &str) -> Response {
    let error = ErrorResponse {
        error: ErrorDetail {
            code: "UNAUTHORIZED".to_string(),
            message: message.to_string(),
            field: None,
            retryable: false,
        },
    };

    (StatusCode::UNAUTHORIZED, Json(error)).into_response()
}

/// Extractor for the authenticated user
#[derive(Clone, Debug)]
pub struct CurrentUser(pub AuthUser);

#[axum::async_trait]
impl<S> axum::extract::FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .map(CurrentUser)
            .ok_or_else(|| {
                let error = ErrorResponse {
                    error: ErrorDetail {
                        code: "UNAUTHORIZED".to_string(),
                        message: "Authentication required".to_string(),
                        field: None,
                        retryable: false,
                    },
                };
                (StatusCode::UNAUTHORIZED, Json(error))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_capabilities_from_permissions() {
        let user = AuthUser {
            actor_id: uuid::Uuid::new_v4(),
            employee_holder_id: Some(uuid::Uuid::new_v4()),
            office_id: None,
            permissions: vec![
                "inventory:consume".to_string(),
                "inventory:view_reports".to_string(),
            ],
        };
        let caller = user.caller();
        assert!(caller.capabilities.consume);
        assert!(caller.capabilities.view_reports);
        assert!(!caller.capabilities.receive);
        assert_eq!(caller.employee_holder_id, user.employee_holder_id);
    }

    #[test]
    fn test_parse_optional_uuid() {
        assert_eq!(parse_optional_uuid(None).unwrap(), None);
        let id = uuid::Uuid::new_v4();
        assert_eq!(
            parse_optional_uuid(Some(&id.to_string())).unwrap(),
            Some(id)
        );
        assert!(parse_optional_uuid(Some("not-a-uuid")).is_err());
    }
}

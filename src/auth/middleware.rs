//! # Authorization Middleware
//!
//! `bearer_token_principal` turns a configured operator token into an admin
//! principal; `require_admin` rejects requests whose principal is missing
//! (401) or not an administrator (403).

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::{debug, warn};

use super::principal::Principal;
use crate::core::error::{ServiceError, ServiceResult};

/// Operator token accepted by [`bearer_token_principal`]
#[derive(Debug, Clone, Default)]
pub struct TokenAuthState {
    token: Option<Arc<str>>,
}

impl TokenAuthState {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()).map(Arc::from),
        }
    }
}

/// Extract a bearer token from request headers
fn extract_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())?
        .strip_prefix("Bearer ")
}

/// Attach an operator principal when the request carries the configured token
pub async fn bearer_token_principal(
    State(state): State<TokenAuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let authorized = match (state.token.as_deref(), extract_token(request.headers())) {
        (Some(expected), Some(presented)) if presented == expected => true,
        (Some(_), Some(_)) => {
            debug!("Rejected operator token for {}", request.uri().path());
            false
        }
        _ => false,
    };

    if authorized {
        request.extensions_mut().insert(Principal::AdminPanel {
            email: "operator@localhost".to_string(),
            roles: vec!["strapi-super-admin".to_string()],
        });
    }

    next.run(request).await
}

/// Admin guard for operator routes
pub async fn require_admin(request: Request, next: Next) -> ServiceResult<Response> {
    let principal = request
        .extensions()
        .get::<Principal>()
        .ok_or_else(|| ServiceError::auth("authentication required"))?;

    if !principal.is_admin() {
        warn!(
            "Principal {} denied access to {}",
            principal.display_name(),
            request.uri().path()
        );
        return Err(ServiceError::authz("administrator role required"));
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::principal::UserRole;
    use axum::{
        body::Body,
        http::StatusCode,
        middleware::{from_fn, from_fn_with_state},
        routing::get,
        Extension, Router,
    };
    use tower::ServiceExt;

    fn guarded() -> Router {
        Router::new()
            .route("/admin", get(|| async { "ok" }))
            .layer(from_fn(require_admin))
    }

    fn request(token: Option<&str>) -> Request {
        let mut builder = Request::builder().uri("/admin");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_missing_principal_is_unauthorized() {
        let response = guarded().oneshot(request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_non_admin_is_forbidden() {
        let app = guarded().layer(Extension(Principal::EndUser {
            id: 1,
            email: None,
            role: Some(UserRole::named("authenticated")),
        }));

        let response = app.oneshot(request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_bearer_token_grants_admin() {
        let app = guarded().layer(from_fn_with_state(
            TokenAuthState::new(Some("s3cret".to_string())),
            bearer_token_principal,
        ));

        let response = app.clone().oneshot(request(Some("s3cret"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.clone().oneshot(request(Some("wrong"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app.oneshot(request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unset_token_grants_nothing() {
        let app = guarded().layer(from_fn_with_state(TokenAuthState::new(Some(String::new())), bearer_token_principal));

        let response = app.oneshot(request(Some(""))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}

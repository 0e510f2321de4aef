//! PSK-based authentication and per-request user context.
//!
//! Key comparison is constant-time to mitigate timing attacks.

use std::convert::Infallible;

use axum::{
    extract::{FromRequestParts, Request},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use crate::errors::AppError;

/// Header name for the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Header carrying the calling user's id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The user a request acts for, if the caller identified one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserContext {
    pub user_id: Option<String>,
}

impl UserContext {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let user_id = headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Self { user_id }
    }

    /// Resolve the effective user from an id named in the request itself.
    ///
    /// Both present must agree; either alone is used; neither is a validation error.
    pub fn resolve(&self, explicit: Option<&str>) -> Result<String, AppError> {
        let explicit = explicit.map(str::trim).filter(|s| !s.is_empty());
        match (explicit, self.user_id.as_deref()) {
            (Some(requested), Some(current)) if requested != current => Err(AppError::Forbidden(
                format!("Cannot act on favorites of user {}", requested),
            )),
            (Some(user), _) | (None, Some(user)) => Ok(user.to_string()),
            (None, None) => Err(AppError::Validation("user_id is required".to_string())),
        }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for UserContext {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<UserContext>()
            .cloned()
            .unwrap_or_else(|| UserContext::from_headers(&parts.headers)))
    }
}

/// Authenticate the request and attach its [`UserContext`].
pub async fn psk_auth_layer(
    expected_psk: Option<String>,
    mut request: Request,
    next: Next,
) -> Response {
    // No PSK configured: open access (dev mode)
    if let Some(expected) = expected_psk {
        if let Err(message) = check_key(request.headers(), &expected) {
            tracing::debug!(path = %request.uri().path(), "Rejected request: {}", message);
            return AppError::Unauthorized(message.to_string()).into_response();
        }
    }

    let context = UserContext::from_headers(request.headers());
    request.extensions_mut().insert(context);
    next.run(request).await
}

fn check_key(headers: &HeaderMap, expected: &str) -> Result<(), &'static str> {
    if let Some(provided) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        return if constant_time_compare(provided, expected) {
            Ok(())
        } else {
            Err("Invalid API key")
        };
    }

    match headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
    {
        Some(bearer) if constant_time_compare(bearer, expected) => Ok(()),
        _ => Err("Missing or invalid API key"),
    }
}

fn constant_time_compare(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

//! Authentication extractor.
//!
//! Bearer tokens are compared against the configured `AUTH_SECRET`. Without a
//! secret every request is accepted as anonymous.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::error::AppError;
use crate::AppState;

/// Authenticated caller extracted from the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    /// The bearer token, or `anonymous` when auth is off
    pub token: String,
}

impl AuthUser {
    fn anonymous() -> Self {
        Self {
            token: "anonymous".to_string(),
        }
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(secret) = state.config.auth_secret.as_deref() else {
            return Ok(AuthUser::anonymous());
        };

        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        match auth_header {
            Some(header) if header.starts_with("Bearer ") => {
                let token = header.trim_start_matches("Bearer ");
                if token.is_empty() {
                    return Err(AppError::Unauthorized("Empty bearer token"));
                }
                if token != secret {
                    return Err(AppError::Unauthorized("Invalid bearer token"));
                }
                Ok(AuthUser {
                    token: token.to_string(),
                })
            }
            Some(_) => Err(AppError::Unauthorized(
                "Invalid authorization header format",
            )),
            None => Err(AppError::Unauthorized("Missing authorization header")),
        }
    }
}

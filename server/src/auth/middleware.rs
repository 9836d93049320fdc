//! Bearer token authentication.
//!
//! When `AUTH_SECRET` is configured every request must carry
//! `Authorization: Bearer <AUTH_SECRET>`. Without it the server is open.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::error::AppError;
use crate::AppState;

/// Caller that passed the token check.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The bearer token, `None` for anonymous access
    pub token: Option<String>,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        let token = match auth_header {
            Some(header) => match header.strip_prefix("Bearer ") {
                Some(token) if !token.is_empty() => Some(token.to_string()),
                Some(_) => return Err(AppError::Unauthorized("Empty bearer token")),
                None => {
                    return Err(AppError::Unauthorized(
                        "Invalid authorization header format",
                    ))
                }
            },
            None => None,
        };

        match (&state.config.auth_secret, token) {
            (None, token) => Ok(AuthUser { token }),
            (Some(secret), Some(token)) if *secret == token => Ok(AuthUser { token: Some(token) }),
            (Some(_), Some(_)) => Err(AppError::Unauthorized("Invalid bearer token")),
            (Some(_), None) => Err(AppError::Unauthorized("Missing authorization header")),
        }
    }
}

//! Caller identity extractor.
//!
//! SYSTEM CONTEXT
//! ==============
//! Authentication happens upstream (gateway or session service); requests
//! arrive with a pre-verified `x-user-id` header. This extractor only parses
//! that header — a missing or malformed value is a 401, and authorization
//! decisions (room supervisor checks) happen in the services.

use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::request::Parts;
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated caller's user id.
#[derive(Debug, Clone, Copy)]
pub struct CallerId(pub Uuid);

impl<S: Send + Sync> FromRequestParts<S> for CallerId {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or((StatusCode::UNAUTHORIZED, "x-user-id header required"))?;
        let user_id = value
            .parse()
            .map_err(|_| (StatusCode::UNAUTHORIZED, "x-user-id must be a UUID"))?;
        Ok(Self(user_id))
    }
}

#[cfg(test)]
#[path = "identity_test.rs"]
mod tests;

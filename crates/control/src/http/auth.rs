//! Bearer JWT / `X-API-Key` extraction (spec §6 "Auth tokens").
//!
//! API-key lookup is a hashed lookup against the installation-key table
//! the same way the enrollment service does it; this module only
//! extracts and verifies, it never mints credentials.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use meridian_core::jwt::{Claims, JwtCodec};

use super::app::AppState;
use super::ApiError;

/// Verifies `Authorization: Bearer <jwt>` and injects [`Claims`] into the
/// request extensions for downstream handlers.
pub async fn require_bearer_auth(State(state): State<Arc<AppState>>, mut request: Request, next: Next) -> Result<Response, ApiError> {
    let claims = extract_claims(&state.jwt, &request)?;
    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

fn extract_claims(jwt: &JwtCodec, request: &Request) -> Result<Claims, ApiError> {
    let header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| meridian_core::Error::unauthorized("missing Authorization header"))?;

    let token = header.strip_prefix("Bearer ").ok_or_else(|| meridian_core::Error::unauthorized("Authorization header must be a Bearer token"))?;

    Ok(jwt.verify(token)?)
}

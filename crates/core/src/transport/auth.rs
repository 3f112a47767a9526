// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::error::ErrorCode;
use crate::protocol::error_frame;
use crate::transport::state::AppState;

/// Constant-time string comparison to prevent timing side-channel attacks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Validate a Bearer token from HTTP headers.
///
/// `Ok(())` when `expected` is `None` (auth disabled) or the header matches.
pub fn validate_bearer(headers: &HeaderMap, expected: Option<&str>) -> Result<(), ErrorCode> {
    let expected = match expected {
        Some(tok) => tok,
        None => return Ok(()),
    };
    let header =
        headers.get("authorization").and_then(|v| v.to_str().ok()).ok_or(ErrorCode::Unauthorized)?;
    let token = header.strip_prefix("Bearer ").ok_or(ErrorCode::Unauthorized)?;
    if constant_time_eq(token, expected) {
        Ok(())
    } else {
        Err(ErrorCode::Unauthorized)
    }
}

/// Best-effort mobile classification from a connection's `User-Agent`
/// header. `hello.client.mobile` overrides this once the hello arrives.
pub fn is_mobile_user_agent(headers: &HeaderMap) -> bool {
    let Some(ua) = headers.get("user-agent").and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let ua = ua.to_ascii_lowercase();
    ["mobile", "android", "iphone", "ipad", "ipod"].iter().any(|needle| ua.contains(needle))
}

/// Validate the token supplied in a WebSocket `hello` frame.
pub fn validate_ws_auth(token: &str, expected: Option<&str>) -> Result<(), ErrorCode> {
    match expected {
        None => Ok(()),
        Some(tok) if constant_time_eq(tok, token) => Ok(()),
        Some(_) => Err(ErrorCode::NotAuthenticated),
    }
}

/// Axum middleware enforcing Bearer auth on every HTTP route except the
/// two health/readiness probes and the `/ws` upgrade (whose own hello
/// handshake carries auth).
///
/// A `None` `auth_token` in [`AppState`] disables HTTP auth entirely.
pub async fn auth_layer(
    State(state): State<Arc<AppState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = req.uri().path();
    if path == "/api/v1/health" || path == "/api/v1/ready" || path == "/ws" {
        return next.run(req).await;
    }

    if let Err(code) = validate_bearer(req.headers(), state.config.auth_token.as_deref()) {
        let frame = error_frame(code, "unauthorized");
        return (StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::UNAUTHORIZED), Json(frame))
            .into_response();
    }

    next.run(req).await
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;

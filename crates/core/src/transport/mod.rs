// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! API contract types and server implementation for the HTTP and WebSocket
//! transports.

pub mod auth;
pub mod http;
pub mod state;
pub mod ws;

pub use state::AppState;

use std::sync::Arc;

use axum::middleware;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;

/// Build the axum `Router` with every HTTP and WebSocket route, with the
/// bearer-auth middleware and a permissive CORS layer applied.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(http::health))
        .route("/api/v1/ready", get(http::ready))
        .route("/ws", get(ws::ws_handler))
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_layer))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The minimal HTTP surface alongside the WebSocket transport: a liveness
//! check and a readiness probe for orchestrators (k8s, systemd) that expect
//! one, even though the real protocol is carried entirely over `/ws`.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::transport::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub terminal_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadyResponse {
    pub ready: bool,
}

/// `GET /api/v1/health` — always `200`, reports terminal count.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let terminal_count = state.registry.list().await.len();
    Json(HealthResponse { status: "ok".to_owned(), terminal_count })
}

/// `GET /api/v1/ready` — readiness probe. The server is ready as soon as
/// it's serving, so this always reports `200`; kept as a distinct route
/// from `/health` for orchestrators that probe the two differently.
pub async fn ready(State(_state): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(ReadyResponse { ready: true }))
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;

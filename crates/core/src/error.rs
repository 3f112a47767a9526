// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use serde::{Deserialize, Serialize};

/// Wire-level error codes for the WebSocket protocol.
///
/// Five categories (see DESIGN.md): protocol errors (`NotAuthenticated`,
/// `InvalidMessage`), resource errors (`InvalidTerminalId`,
/// `InvalidSessionId`, `Unauthorized`), policy errors (`RateLimited`),
/// system errors (`SpawnFailed`, `Internal`), and the flow error
/// (`SlowConsumer`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    NotAuthenticated,
    InvalidMessage,
    InvalidTerminalId,
    InvalidSessionId,
    Unauthorized,
    RateLimited,
    SpawnFailed,
    SlowConsumer,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotAuthenticated => "NOT_AUTHENTICATED",
            Self::InvalidMessage => "INVALID_MESSAGE",
            Self::InvalidTerminalId => "INVALID_TERMINAL_ID",
            Self::InvalidSessionId => "INVALID_SESSION_ID",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::RateLimited => "RATE_LIMITED",
            Self::SpawnFailed => "SPAWN_FAILED",
            Self::SlowConsumer => "SLOW_CONSUMER",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    /// Whether this error closes the connection (pre-hello protocol errors)
    /// rather than just being reported on it.
    pub fn closes_connection(&self) -> bool {
        matches!(self, Self::NotAuthenticated)
    }

    /// HTTP status for the equivalent REST surface (unused over the
    /// WebSocket transport, which always replies `200`/frame-level error).
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotAuthenticated | Self::Unauthorized => 401,
            Self::InvalidMessage | Self::InvalidTerminalId | Self::InvalidSessionId => 400,
            Self::RateLimited => 429,
            Self::SpawnFailed => 502,
            Self::SlowConsumer => 409,
            Self::Internal => 500,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// WebSocket close codes used by the handshake.
pub mod close_code {
    /// Authentication failure, or any activity before a valid hello.
    pub const AUTH_FAILED: u16 = 4001;
    /// Handshake did not complete within `HELLO_TIMEOUT`.
    pub const HELLO_TIMEOUT: u16 = 4002;
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;

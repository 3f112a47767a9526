// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use clap::Parser;

/// Browser-first remote terminal multiplexer.
#[derive(Debug, Parser)]
#[command(name = "freshell", version, about)]
pub struct Config {
    /// Host address to bind to.
    #[arg(long, env = "FRESHELL_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// HTTP/WebSocket port to listen on.
    #[arg(long, env = "FRESHELL_PORT", default_value = "7670")]
    pub port: u16,

    /// Bearer/query/hello token required to authenticate a connection.
    /// Auth is disabled entirely when unset.
    #[arg(long, env = "AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// How long a connection has to send its hello before it's closed
    /// with `HELLO_TIMEOUT` (4002).
    #[arg(long, env = "HELLO_TIMEOUT_MS", default_value = "5000")]
    pub hello_timeout_ms: u64,

    /// Maximum `terminal.create` requests a single connection may issue
    /// within `create_rate_window_ms`.
    #[arg(long, env = "TERMINAL_CREATE_RATE_LIMIT", default_value = "10")]
    pub create_rate_limit: u32,

    /// Sliding window, in milliseconds, over which `create_rate_limit` applies.
    #[arg(long, env = "TERMINAL_CREATE_RATE_WINDOW_MS", default_value = "10000")]
    pub create_rate_window_ms: u64,

    /// Maximum raw bytes per `attached.chunk` frame during a chunked snapshot.
    #[arg(long, env = "MAX_WS_CHUNK_BYTES", default_value = "16384")]
    pub max_ws_chunk_bytes: usize,

    /// Per-terminal scrollback ring buffer size in bytes.
    #[arg(long, env = "FRESHELL_RING_SIZE", default_value = "1048576")]
    pub ring_size: usize,

    /// Broadcast queue depth per terminal before a subscriber is considered
    /// a slow consumer.
    #[arg(long, env = "FRESHELL_SUBSCRIBER_QUEUE_CAPACITY", default_value = "200")]
    pub subscriber_queue_capacity: usize,

    /// Log format (json or text).
    #[arg(long, env = "FRESHELL_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "FRESHELL_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_ws_chunk_bytes == 0 {
            anyhow::bail!("--max-ws-chunk-bytes must be greater than zero");
        }
        if self.create_rate_limit == 0 {
            anyhow::bail!("--create-rate-limit must be greater than zero");
        }
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other}"),
        }
        Ok(())
    }

    pub fn hello_timeout(&self) -> Duration {
        Duration::from_millis(self.hello_timeout_ms)
    }

    pub fn create_rate_window(&self) -> Duration {
        Duration::from_millis(self.create_rate_window_ms)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

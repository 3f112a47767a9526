// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Freshell core: terminal multiplexing and live-streaming subsystem.
//!
//! A [`terminal::registry::TerminalRegistry`] owns spawned PTY children and
//! their scrollback; the [`protocol`] module turns registry events into
//! wire frames; [`layout`] models the tab/pane tree and target resolution;
//! [`session`] tracks per-connection auth, rate limiting, and dedup;
//! [`transport`] wires all of the above to an `axum` WebSocket/HTTP server.

pub mod config;
pub mod error;
pub mod layout;
pub mod protocol;
pub mod ring;
pub mod run;
pub mod session;
pub mod terminal;
pub mod transport;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared application state passed to every handler via axum's `State`
//! extractor.

use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};

use crate::config::Config;
use crate::layout::Layout;
use crate::protocol::ServerFrame;
use crate::terminal::registry::{RegistryConfig, TerminalRegistry};

/// Broadcast queue depth for cross-connection events (`ui.command`,
/// `terminal.list.updated`). Generous: these fan out to every connection of
/// the logical session, not per-terminal, so lag here is rare.
const BROADCAST_QUEUE_CAPACITY: usize = 256;

/// Process-wide state: the terminal registry, the single shared layout
/// tree, and the broadcast channel that keeps every connected client's copy
/// of the layout converged.
pub struct AppState {
    pub registry: Arc<TerminalRegistry>,
    pub layout: RwLock<Layout>,
    pub broadcast: broadcast::Sender<ServerFrame>,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let registry_config = RegistryConfig {
            ring_size: config.ring_size,
            subscriber_queue_capacity: config.subscriber_queue_capacity,
        };
        let (broadcast, _) = broadcast::channel(BROADCAST_QUEUE_CAPACITY);
        Self {
            registry: Arc::new(TerminalRegistry::new(registry_config)),
            layout: RwLock::new(Layout::new()),
            broadcast,
            config,
        }
    }

    /// Re-broadcast the current layout to every connection. Called after
    /// any mutation made through [`Layout`]'s operations.
    pub async fn publish_layout(&self) {
        let layout = self.layout.read().await.clone();
        let _ = self.broadcast.send(ServerFrame::UiCommand { layout });
    }

    /// Re-broadcast the current terminal list to every connection. Called
    /// after `terminal.create` and `terminal.kill`.
    pub async fn publish_terminal_list(&self) {
        let terminals = self.registry.list().await;
        let _ = self.broadcast.send(ServerFrame::TerminalListUpdated { terminals });
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;

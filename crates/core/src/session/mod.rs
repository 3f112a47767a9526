// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection state: auth, owned resources, rate limiting, and
//! `terminal.create` idempotency. Owned entirely by one transport
//! connection; never shared across connections.

pub mod rate_limit;

use std::collections::{HashMap, HashSet};

use rate_limit::RateBucket;

use crate::protocol::chunk::PendingAttach;
use crate::terminal::TerminalId;

/// Outcome cached against a client-supplied `requestId` so a retried
/// `terminal.create` replays the original result instead of spawning twice.
#[derive(Debug, Clone, Copy)]
enum CreateOutcome {
    Pending,
    Completed(TerminalId),
}

/// What the caller should do with a `terminal.create` request, decided
/// before touching the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateDecision {
    /// A prior request with this id already completed; replay its result.
    Replay(TerminalId),
    /// The rate bucket is exhausted; reply `RATE_LIMITED`.
    RateLimited,
    /// Go ahead and spawn; call `complete_create` once it succeeds.
    Proceed,
}

/// Per-connection session state (spec's "Connection state").
pub struct Session {
    pub authenticated: bool,
    pub is_mobile: bool,
    owned: HashSet<TerminalId>,
    attached: HashSet<TerminalId>,
    pending_attaches: HashMap<TerminalId, PendingAttach>,
    create_rate_bucket: RateBucket,
    inflight_requests: HashMap<String, CreateOutcome>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            authenticated: false,
            is_mobile: false,
            owned: HashSet::new(),
            attached: HashSet::new(),
            pending_attaches: HashMap::new(),
            create_rate_bucket: RateBucket::default(),
            inflight_requests: HashMap::new(),
        }
    }

    pub fn with_rate_bucket(rate_bucket: RateBucket) -> Self {
        Self { create_rate_bucket: rate_bucket, ..Self::new() }
    }

    /// Decide what to do with a `terminal.create { requestId, restore }`.
    /// `restore: true` bypasses the rate bucket; a replayed response never
    /// touches it either.
    pub fn begin_create(&mut self, request_id: &str, restore: bool) -> CreateDecision {
        if let Some(CreateOutcome::Completed(id)) = self.inflight_requests.get(request_id) {
            return CreateDecision::Replay(*id);
        }
        if !restore && !self.create_rate_bucket.try_acquire() {
            return CreateDecision::RateLimited;
        }
        self.inflight_requests.insert(request_id.to_owned(), CreateOutcome::Pending);
        CreateDecision::Proceed
    }

    /// Record a successful creation: caches the response for idempotent
    /// retries and records ownership for later authorization checks.
    pub fn complete_create(&mut self, request_id: &str, terminal_id: TerminalId) {
        self.inflight_requests.insert(request_id.to_owned(), CreateOutcome::Completed(terminal_id));
        self.owned.insert(terminal_id);
    }

    /// Whether this connection created `id` (required for destructive
    /// operations on it).
    pub fn owns(&self, id: TerminalId) -> bool {
        self.owned.contains(&id)
    }

    pub fn mark_attached(&mut self, id: TerminalId) {
        self.attached.insert(id);
    }

    pub fn mark_detached(&mut self, id: TerminalId) {
        self.attached.remove(&id);
        self.pending_attaches.remove(&id);
    }

    /// Every terminal this connection is currently attached to, for
    /// disconnect cleanup (`registry.detach` on each).
    pub fn attached_terminals(&self) -> impl Iterator<Item = &TerminalId> {
        self.attached.iter()
    }

    pub fn begin_pending_attach(&mut self, id: TerminalId, pending: PendingAttach) {
        self.pending_attaches.insert(id, pending);
    }

    pub fn pending_attach_mut(&mut self, id: TerminalId) -> Option<&mut PendingAttach> {
        self.pending_attaches.get_mut(&id)
    }

    pub fn finish_pending_attach(&mut self, id: TerminalId) -> Option<PendingAttach> {
        self.pending_attaches.remove(&id)
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;

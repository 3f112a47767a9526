// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Chunked snapshot delivery: split a scrollback snapshot into ordered,
//! size-bounded frames and track in-flight sends per attached terminal.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use super::ServerFrame;
use crate::terminal::registry::Event;
use crate::terminal::TerminalId;

/// Default upper bound on raw bytes per `attached.chunk` frame. Overridable
/// via `MAX_WS_CHUNK_BYTES`; test suites commonly use 500.
pub const DEFAULT_MAX_CHUNK_BYTES: usize = 16 * 1024;

/// Default window in which a chunked attach must complete before the
/// connection manager degrades it and triggers one automatic re-attach.
pub const DEFAULT_CHUNK_TIMEOUT: Duration = Duration::from_secs(35);

/// Split `data` into chunks of at most `max_chunk_bytes` raw bytes each.
/// An empty input yields a single empty chunk (`totalChunks=1` with an empty
/// chunk, chosen over the zero-chunk alternative so callers never
/// special-case an attach with no history).
fn split_into_chunks(data: &[u8], max_chunk_bytes: usize) -> Vec<&[u8]> {
    if data.is_empty() {
        return vec![&[]];
    }
    data.chunks(max_chunk_bytes.max(1)).collect()
}

/// Build the ordered `attached.start` / `attached.chunk`* / `attached.end`
/// frame sequence for a snapshot. Callers must send these in order, with no
/// other frame for this terminal interleaved, per the fan-out ordering
/// guarantee.
pub fn build_snapshot_frames(
    terminal_id: TerminalId,
    data: &[u8],
    sequence_at_snapshot: u64,
    max_chunk_bytes: usize,
) -> Vec<ServerFrame> {
    let raw_chunks = split_into_chunks(data, max_chunk_bytes);
    let total_chunks = raw_chunks.len() as u32;
    let total_code_units = data.len();

    let mut frames = Vec::with_capacity(raw_chunks.len() + 2);
    frames.push(ServerFrame::AttachedStart {
        terminal_id,
        total_code_units,
        total_chunks,
        sequence_at_snapshot,
    });
    for (index, chunk) in raw_chunks.iter().enumerate() {
        frames.push(ServerFrame::AttachedChunk {
            terminal_id,
            chunk: BASE64.encode(chunk),
            chunk_index: index as u32,
        });
    }
    frames.push(ServerFrame::AttachedEnd { terminal_id, total_code_units, total_chunks });
    frames
}

/// Turn a registry [`Event`] into the wire frame for it.
pub fn event_to_frame(terminal_id: TerminalId, event: Event) -> ServerFrame {
    match event {
        Event::Output { sequence, data } => ServerFrame::Output {
            terminal_id,
            data: BASE64.encode(&data),
            sequence_number: sequence,
        },
        Event::Exit { exit_code, signal } => ServerFrame::Exit { terminal_id, exit_code, signal },
    }
}

/// Send-side bookkeeping for one in-flight chunked attach, owned by the
/// connection that requested it (the `pendingAttaches` entry). Live deltas
/// that arrive for this terminal while chunks are still being sent are
/// buffered here and released, in order, immediately after `attached.end`.
pub struct PendingAttach {
    total_chunks: u32,
    chunks_sent: u32,
    sequence_at_boundary: u64,
    buffered: Vec<Event>,
    done: bool,
}

impl PendingAttach {
    pub fn new(total_chunks: u32, sequence_at_boundary: u64) -> Self {
        Self { total_chunks, chunks_sent: 0, sequence_at_boundary, buffered: Vec::new(), done: false }
    }

    /// Record that one more `attached.chunk` frame has been written to the
    /// transport.
    pub fn mark_chunk_sent(&mut self) {
        self.chunks_sent += 1;
    }

    /// True once every chunk has been sent and `attached.end` can be
    /// emitted.
    pub fn is_complete(&self) -> bool {
        self.chunks_sent >= self.total_chunks
    }

    /// Route a live event that arrived while this attach is still in
    /// flight: buffer it if the snapshot hasn't finished sending, or if it's
    /// already covered by the snapshot (sequence at or before the
    /// boundary), drop it as a duplicate of what the snapshot already
    /// contains.
    pub fn route(&mut self, event: Event) {
        if self.done {
            return;
        }
        if let Event::Output { sequence, .. } = &event {
            if *sequence <= self.sequence_at_boundary {
                return;
            }
        }
        self.buffered.push(event);
    }

    /// Drain buffered events in arrival order and mark this attach
    /// finished. Call once immediately after writing `attached.end`.
    pub fn finish(&mut self) -> Vec<Event> {
        self.done = true;
        std::mem::take(&mut self.buffered)
    }
}

/// Client-side (and black-box test harness) reassembly tracker, matching
/// the state machine named in the re-architecting design note:
/// `ExpectingStart -> ReceivingChunks(received, total) -> Complete | Degraded`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReassemblyState {
    ExpectingStart,
    ReceivingChunks { received: u32, total: u32 },
    Complete,
    Degraded,
}

/// Accumulates `attached.*` frames for one attach generation and reports
/// whether the result is complete or degraded.
pub struct Reassembler {
    state: ReassemblyState,
    total_code_units: usize,
    collected: Vec<u8>,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reassembler {
    pub fn new() -> Self {
        Self { state: ReassemblyState::ExpectingStart, total_code_units: 0, collected: Vec::new() }
    }

    pub fn state(&self) -> &ReassemblyState {
        &self.state
    }

    /// Feed one frame. Frames out of order, or a second `start` before
    /// `end`, degrade the reassembly rather than panicking — a
    /// misbehaving or restarted server is a runtime condition, not a bug.
    pub fn on_frame(&mut self, frame: &ServerFrame) {
        match (&self.state, frame) {
            (
                ReassemblyState::ExpectingStart,
                ServerFrame::AttachedStart { total_code_units, total_chunks, .. },
            ) => {
                self.total_code_units = *total_code_units;
                self.collected.clear();
                self.state = ReassemblyState::ReceivingChunks { received: 0, total: *total_chunks };
            }
            (
                ReassemblyState::ReceivingChunks { received, total },
                ServerFrame::AttachedChunk { chunk, chunk_index, .. },
            ) => {
                if *chunk_index != *received {
                    self.state = ReassemblyState::Degraded;
                    return;
                }
                match BASE64.decode(chunk) {
                    Ok(bytes) => self.collected.extend_from_slice(&bytes),
                    Err(_) => {
                        self.state = ReassemblyState::Degraded;
                        return;
                    }
                }
                self.state = ReassemblyState::ReceivingChunks { received: received + 1, total: *total };
            }
            (
                ReassemblyState::ReceivingChunks { received, total },
                ServerFrame::AttachedEnd { total_code_units, total_chunks },
            ) => {
                let complete = received == total_chunks
                    && total == total_chunks
                    && self.collected.len() == *total_code_units
                    && *total_code_units == self.total_code_units;
                self.state = if complete { ReassemblyState::Complete } else { ReassemblyState::Degraded };
            }
            _ => self.state = ReassemblyState::Degraded,
        }
    }

    /// Mark the reassembly degraded because `chunk-timeout` elapsed without
    /// an `attached.end`.
    pub fn on_timeout(&mut self) {
        if !matches!(self.state, ReassemblyState::Complete) {
            self.state = ReassemblyState::Degraded;
        }
    }

    /// The reassembled snapshot bytes, once `Complete`.
    pub fn into_data(self) -> Option<Vec<u8>> {
        matches!(self.state, ReassemblyState::Complete).then_some(self.collected)
    }
}

#[cfg(test)]
#[path = "chunk_tests.rs"]
mod tests;

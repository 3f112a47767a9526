// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Terminal data model: a spawned PTY child, its scrollback, and its
//! subscriber set.

pub mod pty;
pub mod registry;

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ring::RingBuffer;

/// Opaque, stable identifier for a terminal, unique across the process's
/// lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TerminalId(Uuid);

impl TerminalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TerminalId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TerminalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What command a terminal launches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Shell,
    Claude,
    Codex,
    Opencode,
    Gemini,
    Kimi,
}

impl Mode {
    /// The bare command name used by [`pty::resolve_command`], e.g. `claude`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shell => "shell",
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Opencode => "opencode",
            Self::Gemini => "gemini",
            Self::Kimi => "kimi",
        }
    }
}

/// Shell resolution. On non-Windows targets this is always `System`;
/// the Windows table is preserved for completeness (see
/// [`pty::resolve_command`] doc comment).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shell {
    Cmd,
    Powershell,
    Wsl,
    #[default]
    System,
}

/// Terminal lifecycle state. `Creating` is a client-only transient — the
/// registry never returns a `Terminal` in that state (see `create`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Creating,
    Running,
    Exited,
    Error,
}

/// A running or exited PTY child and its associated scrollback/fan-out state.
///
/// Owned by the [`registry::TerminalRegistry`]; never constructed directly
/// outside of it.
pub struct Terminal {
    pub id: TerminalId,
    pub mode: Mode,
    pub shell: Shell,
    pub cwd: std::path::PathBuf,
    pub status: Status,
    pub exit_code: Option<i32>,
    pub cols: u16,
    pub rows: u16,
    pub scrollback: RingBuffer,
    pub sequence_number: u64,
    /// `(sequence, ring offset immediately before that event's bytes)`,
    /// oldest-first. Lets a `sinceSequence` cursor resolve to a byte offset
    /// for catch-up without re-sending a full snapshot. Trimmed in lockstep
    /// with scrollback so it never outlives the bytes it points at.
    event_offsets: VecDeque<(u64, u64)>,
    pub created_at: u64,
    pub last_activity_at: u64,
}

/// Read-only summary returned by `list`/`get`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalInfo {
    pub id: TerminalId,
    pub mode: Mode,
    pub shell: Shell,
    pub status: Status,
    pub exit_code: Option<i32>,
    pub cols: u16,
    pub rows: u16,
    pub sequence_number: u64,
    pub subscriber_count: usize,
    pub created_at: u64,
    pub last_activity_at: u64,
}

impl Terminal {
    pub fn new(id: TerminalId, mode: Mode, shell: Shell, cwd: std::path::PathBuf, cols: u16, rows: u16, ring_size: usize) -> Self {
        let now = now_millis();
        Self {
            id,
            mode,
            shell,
            cwd,
            status: Status::Running,
            exit_code: None,
            cols,
            rows,
            scrollback: RingBuffer::new(ring_size),
            sequence_number: 0,
            event_offsets: VecDeque::new(),
            created_at: now,
            last_activity_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity_at = now_millis();
    }

    /// Append `data` as one output event: writes to scrollback, bumps
    /// `sequence_number`, and records the offset-before for cursor resume.
    pub fn record_output(&mut self, data: &[u8]) -> u64 {
        let offset_before = self.scrollback.total_written();
        self.scrollback.write(data);
        self.sequence_number += 1;
        self.event_offsets.push_back((self.sequence_number, offset_before));
        let oldest = self.scrollback.oldest_offset();
        while let Some(&(_, off)) = self.event_offsets.front() {
            if off < oldest {
                self.event_offsets.pop_front();
            } else {
                break;
            }
        }
        self.touch();
        self.sequence_number
    }

    /// Resolve a `sinceSequence` cursor to a scrollback offset covering every
    /// event after it. `None` means the cursor has fallen out of the
    /// retained window and the caller must fall back to a full snapshot.
    pub fn offset_for_sequence(&self, since_sequence: u64) -> Option<u64> {
        if since_sequence >= self.sequence_number {
            return Some(self.scrollback.total_written());
        }
        self.event_offsets.iter().find(|(seq, _)| *seq == since_sequence + 1).map(|(_, off)| *off)
    }
}

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

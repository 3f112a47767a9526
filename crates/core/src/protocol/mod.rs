// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire protocol: frame types and the chunked-attach state machine.

pub mod chunk;

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::layout::{Content, Direction, Layout, NodeId, TabId, Target};
use crate::terminal::{Mode, Shell, TerminalId, TerminalInfo};

/// Client-to-server frames. Internally tagged, one variant per inbound
/// message type named in the message taxonomy. Anything that doesn't parse
/// as one of these (unknown `type`, or malformed JSON) is an
/// `INVALID_MESSAGE` error at the transport layer, not a variant here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    Ping {},
    Hello {
        token: String,
        #[serde(default)]
        client: Option<HelloClient>,
    },
    #[serde(rename = "terminal.create")]
    TerminalCreate {
        request_id: String,
        mode: Mode,
        #[serde(default)]
        shell: Shell,
        #[serde(default)]
        cwd: Option<String>,
        #[serde(default)]
        cols: Option<u16>,
        #[serde(default)]
        rows: Option<u16>,
        #[serde(default)]
        restore: bool,
    },
    #[serde(rename = "terminal.attach")]
    TerminalAttach { terminal_id: TerminalId, #[serde(default)] since_sequence: Option<u64> },
    #[serde(rename = "terminal.detach")]
    TerminalDetach { terminal_id: TerminalId },
    #[serde(rename = "terminal.input")]
    TerminalInput { terminal_id: TerminalId, data: String },
    #[serde(rename = "terminal.resize")]
    TerminalResize { terminal_id: TerminalId, cols: u16, rows: u16 },
    #[serde(rename = "terminal.kill")]
    TerminalKill { terminal_id: TerminalId },
    #[serde(rename = "terminal.list")]
    TerminalList { request_id: String },
    #[serde(rename = "terminal.meta.list")]
    TerminalMetaList { request_id: String },

    #[serde(rename = "tab.create")]
    TabCreate {
        request_id: String,
        title: String,
        #[serde(default)]
        content: Option<Content>,
    },
    #[serde(rename = "tab.select")]
    TabSelect { tab_id: TabId },
    #[serde(rename = "tab.rename")]
    TabRename { tab_id: TabId, name: String },
    #[serde(rename = "tab.close")]
    TabClose { tab_id: TabId },
    #[serde(rename = "pane.split")]
    PaneSplit {
        request_id: String,
        pane_id: NodeId,
        direction: Direction,
        content: Content,
        #[serde(default)]
        sizes: Option<(u8, u8)>,
    },
    #[serde(rename = "pane.close")]
    PaneClose { pane_id: NodeId },
    #[serde(rename = "pane.resize")]
    PaneResize { tab_id: TabId, split_or_pane_id: NodeId, sizes: (u8, u8) },
    #[serde(rename = "pane.swap")]
    PaneSwap { tab_id: TabId, pane_id: NodeId, other_id: NodeId },
    #[serde(rename = "pane.attach_content")]
    PaneAttachContent { tab_id: TabId, pane_id: NodeId, content: Content },
    #[serde(rename = "target.resolve")]
    TargetResolve { request_id: String, raw: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HelloClient {
    #[serde(default)]
    pub mobile: Option<bool>,
}

/// Server-to-client frames. Internally tagged, matching the `ws_msg`
/// convention: one `type` discriminator, one variant per frame kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerFrame {
    Pong { timestamp: u64 },
    Ready {},

    #[serde(rename = "attached.start")]
    AttachedStart {
        terminal_id: TerminalId,
        total_code_units: usize,
        total_chunks: u32,
        sequence_at_snapshot: u64,
    },
    #[serde(rename = "attached.chunk")]
    AttachedChunk { terminal_id: TerminalId, chunk: String, chunk_index: u32 },
    #[serde(rename = "attached.end")]
    AttachedEnd { terminal_id: TerminalId, total_code_units: usize, total_chunks: u32 },
    Output { terminal_id: TerminalId, data: String, sequence_number: u64 },
    Exit { terminal_id: TerminalId, exit_code: Option<i32>, signal: Option<i32> },

    #[serde(rename = "terminal.created")]
    TerminalCreated { request_id: String, terminal_id: TerminalId },
    #[serde(rename = "terminal.list.response")]
    TerminalListResponse { request_id: String, terminals: Vec<TerminalInfo> },
    #[serde(rename = "terminal.meta.list.response")]
    TerminalMetaListResponse { request_id: String, modes: Vec<&'static str> },
    /// The full current layout, re-broadcast to every connection after any
    /// tree mutation so all clients of the same logical session converge on
    /// one state rather than replaying a diff log.
    #[serde(rename = "ui.command")]
    UiCommand { layout: Layout },
    #[serde(rename = "terminal.list.updated")]
    TerminalListUpdated { terminals: Vec<TerminalInfo> },
    #[serde(rename = "tab.created")]
    TabCreated { request_id: String, tab_id: TabId, pane_id: NodeId },
    #[serde(rename = "pane.split.response")]
    PaneSplitResponse { request_id: String, pane_id: NodeId },
    #[serde(rename = "target.resolved")]
    TargetResolved { request_id: String, target: Target },

    Error {
        code: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        terminal_id: Option<TerminalId>,
    },
}

/// Build an `error` frame from an [`ErrorCode`].
pub fn error_frame(code: ErrorCode, message: impl Into<String>) -> ServerFrame {
    ServerFrame::Error {
        code: code.as_str().to_owned(),
        message: message.into(),
        request_id: None,
        terminal_id: None,
    }
}

/// Build an `error` frame carrying the `requestId` it answers, so a client
/// can correlate the failure with its request.
pub fn error_frame_for(code: ErrorCode, message: impl Into<String>, request_id: impl Into<String>) -> ServerFrame {
    ServerFrame::Error {
        code: code.as_str().to_owned(),
        message: message.into(),
        request_id: Some(request_id.into()),
        terminal_id: None,
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios that spawn the real `freshell` binary and exercise
//! it over a live WebSocket connection.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use freshell::layout::{Content, Direction};
use freshell::protocol::{ClientFrame, ServerFrame};
use freshell::terminal::{Mode, Shell};

use freshell_specs::{recv_close_code, recv_frame, send_frame, send_raw, FreshellProcess};

const TIMEOUT: Duration = Duration::from_secs(10);

/// S1: a wrong hello token closes the connection with code 4001.
#[tokio::test]
async fn wrong_hello_token_closes_4001() -> anyhow::Result<()> {
    let freshell = FreshellProcess::build().auth_token("correct-token").spawn()?;
    freshell.wait_healthy(TIMEOUT).await?;

    let mut ws = freshell.connect().await?;
    send_frame(&mut ws, &ClientFrame::Hello { token: "wrong-token".to_owned(), client: None }).await?;

    let code = recv_close_code(&mut ws).await?;
    assert_eq!(code, Some(4001));
    Ok(())
}

/// S2: a connection that never sends hello is closed with code 4002 once
/// the hello timeout elapses.
#[tokio::test]
async fn missing_hello_times_out_4002() -> anyhow::Result<()> {
    let freshell = FreshellProcess::build().hello_timeout_ms(100).spawn()?;
    freshell.wait_healthy(TIMEOUT).await?;

    let mut ws = freshell.connect().await?;
    let code = recv_close_code(&mut ws).await?;
    assert_eq!(code, Some(4002));
    Ok(())
}

/// S3: the 10th `terminal.create` in a window succeeds, the 11th is
/// rate-limited, and the original create's requestId is preserved through
/// the reply.
#[tokio::test]
async fn create_rate_limit_boundary() -> anyhow::Result<()> {
    let freshell = FreshellProcess::start()?;
    freshell.wait_healthy(TIMEOUT).await?;
    let mut ws = freshell.connect_authenticated("anything").await?;

    send_frame(
        &mut ws,
        &ClientFrame::TerminalCreate {
            request_id: "r1".to_owned(),
            mode: Mode::Shell,
            shell: Shell::System,
            cwd: None,
            cols: None,
            rows: None,
            restore: false,
        },
    )
    .await?;
    match recv_frame(&mut ws).await? {
        ServerFrame::TerminalCreated { request_id, .. } => assert_eq!(request_id, "r1"),
        other => anyhow::bail!("expected terminal.created, got {other:?}"),
    }

    // 9 more creates (r2..=r10) should all succeed, for 10 total.
    for i in 2..=10 {
        let request_id = format!("r{i}");
        send_frame(
            &mut ws,
            &ClientFrame::TerminalCreate {
                request_id: request_id.clone(),
                mode: Mode::Shell,
                shell: Shell::System,
                cwd: None,
                cols: None,
                rows: None,
                restore: false,
            },
        )
        .await?;
        match recv_frame(&mut ws).await? {
            ServerFrame::TerminalCreated { request_id: got, .. } => assert_eq!(got, request_id),
            other => anyhow::bail!("expected terminal.created for {request_id}, got {other:?}"),
        }
    }

    // The 11th create (r11) must be rejected as rate-limited, echoing r11.
    send_frame(
        &mut ws,
        &ClientFrame::TerminalCreate {
            request_id: "r11".to_owned(),
            mode: Mode::Shell,
            shell: Shell::System,
            cwd: None,
            cols: None,
            rows: None,
            restore: false,
        },
    )
    .await?;
    match recv_frame(&mut ws).await? {
        ServerFrame::Error { code, request_id, .. } => {
            assert_eq!(code, "RATE_LIMITED");
            assert_eq!(request_id.as_deref(), Some("r11"));
        }
        other => anyhow::bail!("expected rate-limited error, got {other:?}"),
    }

    Ok(())
}

/// Quantified invariant 3: replaying the same `requestId` on the same
/// connection returns the same `terminalId` without consuming another slot
/// in the rate bucket.
#[tokio::test]
async fn terminal_create_is_idempotent_per_request_id() -> anyhow::Result<()> {
    let freshell = FreshellProcess::start()?;
    freshell.wait_healthy(TIMEOUT).await?;
    let mut ws = freshell.connect_authenticated("anything").await?;

    let create = ClientFrame::TerminalCreate {
        request_id: "dup".to_owned(),
        mode: Mode::Shell,
        shell: Shell::System,
        cwd: None,
        cols: None,
        rows: None,
        restore: false,
    };

    send_frame(&mut ws, &create).await?;
    let first_id = match recv_frame(&mut ws).await? {
        ServerFrame::TerminalCreated { terminal_id, .. } => terminal_id,
        other => anyhow::bail!("expected terminal.created, got {other:?}"),
    };

    send_frame(&mut ws, &create).await?;
    let second_id = match recv_frame(&mut ws).await? {
        ServerFrame::TerminalCreated { terminal_id, .. } => terminal_id,
        other => anyhow::bail!("expected terminal.created, got {other:?}"),
    };

    assert_eq!(format!("{first_id}"), format!("{second_id}"));
    Ok(())
}

/// S4: two connections attached to the same terminal both observe the same
/// output event, with matching sequence numbers.
#[tokio::test]
async fn two_subscribers_see_the_same_output_event() -> anyhow::Result<()> {
    let freshell = FreshellProcess::start()?;
    freshell.wait_healthy(TIMEOUT).await?;

    let mut a = freshell.connect_authenticated("anything").await?;
    send_frame(
        &mut a,
        &ClientFrame::TerminalCreate {
            request_id: "r1".to_owned(),
            mode: Mode::Shell,
            shell: Shell::System,
            cwd: None,
            cols: None,
            rows: None,
            restore: false,
        },
    )
    .await?;
    let terminal_id = match recv_frame(&mut a).await? {
        ServerFrame::TerminalCreated { terminal_id, .. } => terminal_id,
        other => anyhow::bail!("expected terminal.created, got {other:?}"),
    };

    // Drain A's attach snapshot (A is the owner and gets auto-attached via
    // terminal.attach; the create alone does not attach).
    send_frame(&mut a, &ClientFrame::TerminalAttach { terminal_id, since_sequence: None }).await?;
    drain_attach(&mut a).await?;

    let mut b = freshell.connect_authenticated("anything").await?;
    send_frame(&mut b, &ClientFrame::TerminalAttach { terminal_id, since_sequence: None }).await?;
    drain_attach(&mut b).await?;

    let marker = "e2e-marker-hello\n";
    send_frame(
        &mut a,
        &ClientFrame::TerminalInput { terminal_id, data: BASE64.encode(marker.as_bytes()) },
    )
    .await?;

    let (seq_a, data_a) = wait_for_output(&mut a, terminal_id, "e2e-marker-hello").await?;
    let (seq_b, data_b) = wait_for_output(&mut b, terminal_id, "e2e-marker-hello").await?;

    assert_eq!(seq_a, seq_b);
    assert_eq!(data_a, data_b);
    Ok(())
}

/// S5: a scrollback larger than one chunk is delivered as
/// `attached.start` / N `attached.chunk` / `attached.end`, and the
/// concatenated chunks reproduce the full snapshot.
#[tokio::test]
async fn attach_chunks_a_large_snapshot() -> anyhow::Result<()> {
    let freshell = FreshellProcess::build().max_ws_chunk_bytes(500).spawn()?;
    freshell.wait_healthy(TIMEOUT).await?;

    let mut writer = freshell.connect_authenticated("anything").await?;
    send_frame(
        &mut writer,
        &ClientFrame::TerminalCreate {
            request_id: "r1".to_owned(),
            mode: Mode::Shell,
            shell: Shell::System,
            cwd: None,
            cols: None,
            rows: None,
            restore: false,
        },
    )
    .await?;
    let terminal_id = match recv_frame(&mut writer).await? {
        ServerFrame::TerminalCreated { terminal_id, .. } => terminal_id,
        other => anyhow::bail!("expected terminal.created, got {other:?}"),
    };
    send_frame(&mut writer, &ClientFrame::TerminalAttach { terminal_id, since_sequence: None }).await?;
    drain_attach(&mut writer).await?;

    // Push at least 12,000 bytes of scrollback through the PTY, one
    // newline-terminated line at a time (so the canonical line discipline
    // never buffers more than one line's worth of unconsumed input), so the
    // snapshot a fresh attach observes spans more than 24 chunks of 500
    // bytes apiece.
    for line in 0..30u32 {
        let marker = format!("line-{line:02}-");
        let line_text = format!("{marker}{}\n", "x".repeat(500));
        send_frame(
            &mut writer,
            &ClientFrame::TerminalInput { terminal_id, data: BASE64.encode(line_text.as_bytes()) },
        )
        .await?;
        wait_for_output(&mut writer, terminal_id, &marker).await?;
    }

    let mut reader = freshell.connect_authenticated("anything").await?;
    send_frame(&mut reader, &ClientFrame::TerminalAttach { terminal_id, since_sequence: None }).await?;

    let (total_code_units, total_chunks, sequence_at_snapshot) = match recv_frame(&mut reader).await? {
        ServerFrame::AttachedStart { total_code_units, total_chunks, sequence_at_snapshot, .. } => {
            (total_code_units, total_chunks, sequence_at_snapshot)
        }
        other => anyhow::bail!("expected attached.start, got {other:?}"),
    };
    assert!(total_code_units >= 12_000, "expected a large snapshot, got {total_code_units}");
    assert!(total_chunks >= 24, "expected at least 24 chunks of 500 bytes, got {total_chunks}");

    let mut reassembled = Vec::new();
    for expected_index in 0..total_chunks {
        match recv_frame(&mut reader).await? {
            ServerFrame::AttachedChunk { chunk, chunk_index, .. } => {
                assert_eq!(chunk_index, expected_index);
                reassembled.extend(BASE64.decode(&chunk)?);
            }
            other => anyhow::bail!("expected attached.chunk, got {other:?}"),
        }
    }
    match recv_frame(&mut reader).await? {
        ServerFrame::AttachedEnd { total_code_units: end_total, total_chunks: end_chunks, .. } => {
            assert_eq!(end_total, total_code_units);
            assert_eq!(end_chunks, total_chunks);
        }
        other => anyhow::bail!("expected attached.end, got {other:?}"),
    }

    assert_eq!(reassembled.len(), total_code_units);
    assert!(sequence_at_snapshot > 0);
    Ok(())
}

/// A terminal write that lands while a chunked snapshot is still going out
/// is buffered and delivered as a regular `output` frame right after
/// `attached.end`, in the order it occurred, never interleaved between
/// `attached.chunk` frames.
#[tokio::test]
async fn live_output_during_chunked_attach_lands_after_the_snapshot() -> anyhow::Result<()> {
    let freshell = FreshellProcess::build().max_ws_chunk_bytes(200).spawn()?;
    freshell.wait_healthy(TIMEOUT).await?;

    let mut writer = freshell.connect_authenticated("anything").await?;
    send_frame(
        &mut writer,
        &ClientFrame::TerminalCreate {
            request_id: "r1".to_owned(),
            mode: Mode::Shell,
            shell: Shell::System,
            cwd: None,
            cols: None,
            rows: None,
            restore: false,
        },
    )
    .await?;
    let terminal_id = match recv_frame(&mut writer).await? {
        ServerFrame::TerminalCreated { terminal_id, .. } => terminal_id,
        other => anyhow::bail!("expected terminal.created, got {other:?}"),
    };
    send_frame(&mut writer, &ClientFrame::TerminalAttach { terminal_id, since_sequence: None }).await?;
    drain_attach(&mut writer).await?;

    // Build enough scrollback that the reader's snapshot spans many
    // `attached.chunk` frames, widening the window in which a concurrent
    // write can race the chunk-send.
    for line in 0..20u32 {
        let marker = format!("pre-{line:02}-");
        let line_text = format!("{marker}{}\n", "y".repeat(200));
        send_frame(
            &mut writer,
            &ClientFrame::TerminalInput { terminal_id, data: BASE64.encode(line_text.as_bytes()) },
        )
        .await?;
        wait_for_output(&mut writer, terminal_id, &marker).await?;
    }

    let mut reader = freshell.connect_authenticated("anything").await?;
    send_frame(&mut reader, &ClientFrame::TerminalAttach { terminal_id, since_sequence: None }).await?;

    // Fire a write immediately after requesting the attach, while the
    // reader's chunk sequence is still in flight on the wire.
    let marker = "live-during-attach";
    send_frame(
        &mut writer,
        &ClientFrame::TerminalInput { terminal_id, data: BASE64.encode(format!("{marker}\n").as_bytes()) },
    )
    .await?;

    let sequence_at_snapshot = match recv_frame(&mut reader).await? {
        ServerFrame::AttachedStart { sequence_at_snapshot, .. } => sequence_at_snapshot,
        other => anyhow::bail!("expected attached.start, got {other:?}"),
    };
    loop {
        match recv_frame(&mut reader).await? {
            ServerFrame::AttachedChunk { .. } => continue,
            ServerFrame::AttachedEnd { .. } => break,
            other => anyhow::bail!("expected attached.chunk or attached.end, got {other:?}"),
        }
    }

    let (sequence_number, _) = wait_for_output(&mut reader, terminal_id, marker).await?;
    assert!(sequence_number > sequence_at_snapshot);
    Ok(())
}

/// S6: a dotted tab title (`alpha.1`) still resolves via exact tab-title
/// match rather than being misparsed as a `tab.pane` compound target.
#[tokio::test]
async fn resolve_target_prefers_exact_dotted_title() -> anyhow::Result<()> {
    let freshell = FreshellProcess::start()?;
    freshell.wait_healthy(TIMEOUT).await?;
    let mut ws = freshell.connect_authenticated("anything").await?;

    send_frame(
        &mut ws,
        &ClientFrame::TabCreate { request_id: "t1".to_owned(), title: "alpha".to_owned(), content: None },
    )
    .await?;
    expect_tab_created(&mut ws, "t1").await?;
    drain_ui_command(&mut ws).await?;

    send_frame(
        &mut ws,
        &ClientFrame::TabCreate { request_id: "t2".to_owned(), title: "alpha.1".to_owned(), content: None },
    )
    .await?;
    let (tab_dot, pane_dot) = expect_tab_created(&mut ws, "t2").await?;
    drain_ui_command(&mut ws).await?;

    send_frame(&mut ws, &ClientFrame::TargetResolve { request_id: "r1".to_owned(), raw: "alpha.1".to_owned() })
        .await?;
    match recv_frame(&mut ws).await? {
        ServerFrame::TargetResolved { request_id, target } => {
            assert_eq!(request_id, "r1");
            assert_eq!(target.tab_id, Some(tab_dot));
            assert_eq!(target.pane_id, Some(pane_dot));
        }
        other => anyhow::bail!("expected target.resolved, got {other:?}"),
    }

    Ok(())
}

/// Round-trip law: splitting a pane and immediately closing the new pane
/// restores a tab's tree to its pre-split shape.
#[tokio::test]
async fn split_then_close_is_a_no_op_on_the_tree() -> anyhow::Result<()> {
    let freshell = FreshellProcess::start()?;
    freshell.wait_healthy(TIMEOUT).await?;
    let mut ws = freshell.connect_authenticated("anything").await?;

    send_frame(
        &mut ws,
        &ClientFrame::TabCreate { request_id: "t1".to_owned(), title: "main".to_owned(), content: None },
    )
    .await?;
    let (_tab_id, pane_id) = expect_tab_created(&mut ws, "t1").await?;
    let before = drain_ui_command(&mut ws).await?;

    send_frame(
        &mut ws,
        &ClientFrame::PaneSplit {
            request_id: "p1".to_owned(),
            pane_id,
            direction: Direction::Horizontal,
            content: Content::Picker,
            sizes: None,
        },
    )
    .await?;
    let new_pane_id = match recv_frame(&mut ws).await? {
        ServerFrame::PaneSplitResponse { request_id, pane_id } => {
            assert_eq!(request_id, "p1");
            pane_id
        }
        other => anyhow::bail!("expected pane.split.response, got {other:?}"),
    };
    drain_ui_command(&mut ws).await?;

    send_frame(&mut ws, &ClientFrame::PaneClose { pane_id: new_pane_id }).await?;
    let after = drain_ui_command(&mut ws).await?;

    assert_eq!(serde_json::to_value(&before)?, serde_json::to_value(&after)?);
    Ok(())
}

// -- helpers ------------------------------------------------------------------

async fn expect_tab_created(
    ws: &mut freshell_specs::WsStream,
    expected_request_id: &str,
) -> anyhow::Result<(freshell::layout::TabId, freshell::layout::NodeId)> {
    match recv_frame(ws).await? {
        ServerFrame::TabCreated { request_id, tab_id, pane_id } => {
            assert_eq!(request_id, expected_request_id);
            Ok((tab_id, pane_id))
        }
        other => anyhow::bail!("expected tab.created, got {other:?}"),
    }
}

async fn drain_ui_command(ws: &mut freshell_specs::WsStream) -> anyhow::Result<freshell::layout::Layout> {
    match recv_frame(ws).await? {
        ServerFrame::UiCommand { layout } => Ok(layout),
        other => anyhow::bail!("expected ui.command, got {other:?}"),
    }
}

async fn drain_attach(ws: &mut freshell_specs::WsStream) -> anyhow::Result<()> {
    loop {
        match recv_frame(ws).await? {
            ServerFrame::Output { .. } => return Ok(()),
            ServerFrame::AttachedStart { .. } | ServerFrame::AttachedChunk { .. } => continue,
            ServerFrame::AttachedEnd { .. } => return Ok(()),
            other => anyhow::bail!("unexpected frame while draining attach: {other:?}"),
        }
    }
}

async fn wait_for_output(
    ws: &mut freshell_specs::WsStream,
    expected_terminal: freshell::terminal::TerminalId,
    needle: &str,
) -> anyhow::Result<(u64, String)> {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("never observed output containing {needle:?}");
        }
        match recv_frame(ws).await? {
            ServerFrame::Output { terminal_id, data, sequence_number } if terminal_id == expected_terminal => {
                let decoded = BASE64.decode(&data)?;
                let text = String::from_utf8_lossy(&decoded);
                if text.contains(needle) {
                    return Ok((sequence_number, data));
                }
            }
            _ => continue,
        }
    }
}

/// Unknown message types are reported inline, not silently dropped.
#[tokio::test]
async fn unknown_message_type_is_invalid_message() -> anyhow::Result<()> {
    let freshell = FreshellProcess::start()?;
    freshell.wait_healthy(TIMEOUT).await?;
    let mut ws = freshell.connect_authenticated("anything").await?;

    send_raw(&mut ws, r#"{"type":"not.a.real.message"}"#).await?;
    match recv_frame(&mut ws).await? {
        ServerFrame::Error { code, .. } => assert_eq!(code, "INVALID_MESSAGE"),
        other => anyhow::bail!("expected an error frame, got {other:?}"),
    }
    Ok(())
}

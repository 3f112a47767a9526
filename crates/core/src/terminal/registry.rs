// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `TerminalRegistry` — owns every spawned PTY, its scrollback, and its
//! subscriber fan-out.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::pty::{self, Backend, ExitStatus, NativePty};
use super::{Mode, Shell, Status, Terminal, TerminalId, TerminalInfo};

/// Broadcast channel capacity per terminal. A subscriber more than this many
/// frames behind trips `broadcast::error::RecvError::Lagged` on its next
/// `recv`, which the session layer treats as `SLOW_CONSUMER`.
const DEFAULT_SUBSCRIBER_QUEUE_CAPACITY: usize = 200;

const DEFAULT_RING_SIZE: usize = 1 << 20;

#[derive(Debug, Clone, Copy)]
pub struct RegistryConfig {
    pub ring_size: usize,
    pub subscriber_queue_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            ring_size: DEFAULT_RING_SIZE,
            subscriber_queue_capacity: DEFAULT_SUBSCRIBER_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown terminal id")]
    NotFound,
    #[error("failed to spawn terminal: {0}")]
    SpawnFailed(#[source] anyhow::Error),
}

/// A logical fan-out event, pre-chunking. The protocol layer turns `Output`
/// into `output` frames and `Exit` into an `exit` frame.
#[derive(Debug, Clone)]
pub enum Event {
    Output { sequence: u64, data: Bytes },
    Exit { exit_code: Option<i32>, signal: Option<i32> },
}

/// A point-in-time copy of scrollback plus the sequence number it ends at.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub data: Vec<u8>,
    pub sequence: u64,
}

/// Catch-up payload for a cursor-resume attach: smaller than a full
/// snapshot, covers only events after the client's last delivered sequence.
#[derive(Debug, Clone)]
pub struct CatchUp {
    pub data: Vec<u8>,
    pub sequence: u64,
}

struct Handle {
    terminal: RwLock<Terminal>,
    output_tx: broadcast::Sender<Event>,
    input_tx: mpsc::Sender<Bytes>,
    resize_tx: mpsc::Sender<(u16, u16)>,
    kill: CancellationToken,
}

impl Handle {
    async fn on_output(&self, data: Bytes) -> Event {
        let mut terminal = self.terminal.write().await;
        let sequence = terminal.record_output(&data);
        Event::Output { sequence, data }
    }

    async fn on_exit(&self, status: ExitStatus) -> Event {
        let mut terminal = self.terminal.write().await;
        terminal.status = Status::Exited;
        terminal.exit_code = status.code;
        Event::Exit { exit_code: status.code, signal: status.signal }
    }

    async fn info(&self, id: TerminalId) -> TerminalInfo {
        let terminal = self.terminal.read().await;
        TerminalInfo {
            id,
            mode: terminal.mode,
            shell: terminal.shell,
            status: terminal.status,
            exit_code: terminal.exit_code,
            cols: terminal.cols,
            rows: terminal.rows,
            sequence_number: terminal.sequence_number,
            subscriber_count: self.output_tx.receiver_count(),
            created_at: terminal.created_at,
            last_activity_at: terminal.last_activity_at,
        }
    }
}

/// Owns every `Terminal` for the life of the process. Cheaply cloneable
/// (wrap in `Arc` at the call site); internal state is `RwLock<HashMap<_>>`
/// guarded under short critical sections, mirroring `coop`'s pod registry.
pub struct TerminalRegistry {
    terminals: RwLock<HashMap<TerminalId, Arc<Handle>>>,
    config: RegistryConfig,
}

impl TerminalRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self { terminals: RwLock::new(HashMap::new()), config }
    }

    /// Resolve the command for `(mode, shell)`, spawn a PTY at `(cols, rows)`,
    /// and return immediately with status running. `creating` never appears
    /// here — it is a client-only transient.
    pub async fn create(
        &self,
        mode: Mode,
        shell: Shell,
        cwd: PathBuf,
        cols: u16,
        rows: u16,
    ) -> Result<TerminalId, Error> {
        let id = TerminalId::new();
        let command = pty::resolve_command(mode.as_str(), shell_str(shell));
        let backend = NativePty::spawn(&command, cols, rows, &cwd).map_err(Error::SpawnFailed)?;

        let terminal = Terminal::new(id, mode, shell, cwd, cols, rows, self.config.ring_size);
        let (output_tx, _) = broadcast::channel(self.config.subscriber_queue_capacity);
        let (input_tx, input_rx) = mpsc::channel(256);
        let (resize_tx, resize_rx) = mpsc::channel(4);
        let kill = CancellationToken::new();

        let handle = Arc::new(Handle {
            terminal: RwLock::new(terminal),
            output_tx,
            input_tx,
            resize_tx,
            kill: kill.clone(),
        });

        self.terminals.write().await.insert(id, Arc::clone(&handle));
        info!(terminal_id = %id, mode = mode.as_str(), "terminal spawned");
        tokio::spawn(drive(Box::new(backend), handle, input_rx, resize_rx, kill));

        Ok(id)
    }

    /// Subscribe to `id`'s live deltas, returning the current scrollback and
    /// the sequence it ends at. Re-attaching the same logical subscriber
    /// (i.e. calling `attach` again) simply hands back a fresh receiver; the
    /// caller is responsible for dropping its prior one.
    pub async fn attach(&self, id: TerminalId) -> Result<(Snapshot, broadcast::Receiver<Event>), Error> {
        let terminals = self.terminals.read().await;
        let handle = terminals.get(&id).ok_or(Error::NotFound)?;
        let terminal = handle.terminal.read().await;
        let snapshot =
            Snapshot { data: terminal.scrollback.snapshot(), sequence: terminal.sequence_number };
        let rx = handle.output_tx.subscribe();
        Ok((snapshot, rx))
    }

    /// Cursor-resume variant of `attach`: if `since_sequence` is still
    /// covered by scrollback, returns a small catch-up payload instead of a
    /// full snapshot. `Ok(None)` means the cursor fell out of the retained
    /// window and the caller must fall back to `attach`.
    pub async fn attach_since(
        &self,
        id: TerminalId,
        since_sequence: u64,
    ) -> Result<Option<(CatchUp, broadcast::Receiver<Event>)>, Error> {
        let terminals = self.terminals.read().await;
        let handle = terminals.get(&id).ok_or(Error::NotFound)?;
        let terminal = handle.terminal.read().await;
        let Some(offset) = terminal.offset_for_sequence(since_sequence) else {
            return Ok(None);
        };
        let data = terminal.scrollback.read_from_combined(offset);
        let catch_up = CatchUp { data, sequence: terminal.sequence_number };
        let rx = handle.output_tx.subscribe();
        Ok(Some((catch_up, rx)))
    }

    /// Drop a subscription. The receiver itself is the subscription handle —
    /// dropping it unsubscribes from the broadcast channel — so this exists
    /// to give callers the `bool` the operation contract promises.
    pub async fn detach(&self, id: TerminalId, subscriber: broadcast::Receiver<Event>) -> bool {
        drop(subscriber);
        self.terminals.read().await.contains_key(&id)
    }

    pub async fn input(&self, id: TerminalId, data: Bytes) -> Result<(), Error> {
        let terminals = self.terminals.read().await;
        let handle = terminals.get(&id).ok_or(Error::NotFound)?;
        handle.input_tx.send(data).await.map_err(|_| Error::NotFound)?;
        handle.terminal.write().await.touch();
        Ok(())
    }

    pub async fn resize(&self, id: TerminalId, cols: u16, rows: u16) -> Result<(), Error> {
        let terminals = self.terminals.read().await;
        let handle = terminals.get(&id).ok_or(Error::NotFound)?;
        handle.resize_tx.send((cols, rows)).await.map_err(|_| Error::NotFound)?;
        let mut terminal = handle.terminal.write().await;
        terminal.cols = cols;
        terminal.rows = rows;
        Ok(())
    }

    /// Signal the child; the drive task flushes final output, marks the
    /// terminal exited, and broadcasts `Exit` to every subscriber.
    pub async fn kill(&self, id: TerminalId) -> Result<(), Error> {
        let terminals = self.terminals.read().await;
        let handle = terminals.get(&id).ok_or(Error::NotFound)?;
        handle.kill.cancel();
        Ok(())
    }

    pub async fn list(&self) -> Vec<TerminalInfo> {
        let terminals = self.terminals.read().await;
        let mut infos = Vec::with_capacity(terminals.len());
        for (id, handle) in terminals.iter() {
            infos.push(handle.info(*id).await);
        }
        infos
    }

    pub async fn get(&self, id: TerminalId) -> Option<TerminalInfo> {
        let terminals = self.terminals.read().await;
        let handle = terminals.get(&id)?;
        Some(handle.info(id).await)
    }
}

fn shell_str(shell: Shell) -> &'static str {
    match shell {
        Shell::Cmd => "cmd",
        Shell::Powershell => "powershell",
        Shell::Wsl => "wsl",
        Shell::System => "system",
    }
}

/// Drives one terminal's backend to completion: pipes raw PTY output into
/// scrollback + fan-out, and reacts to an external kill by dropping the
/// backend (its `Drop` sends SIGHUP then SIGKILL).
async fn drive(
    mut backend: Box<dyn Backend>,
    handle: Arc<Handle>,
    input_rx: mpsc::Receiver<Bytes>,
    resize_rx: mpsc::Receiver<(u16, u16)>,
    kill: CancellationToken,
) {
    let (raw_tx, mut raw_rx) = mpsc::channel::<Bytes>(64);
    let mut run_fut = backend.run(raw_tx, input_rx, resize_rx);

    let final_status = loop {
        tokio::select! {
            _ = kill.cancelled() => {
                debug!("terminal killed before process exit");
                while let Ok(data) = raw_rx.try_recv() {
                    let event = handle.on_output(data).await;
                    let _ = handle.output_tx.send(event);
                }
                break ExitStatus { code: None, signal: None };
            }
            chunk = raw_rx.recv() => {
                if let Some(data) = chunk {
                    let event = handle.on_output(data).await;
                    let _ = handle.output_tx.send(event);
                }
            }
            result = &mut run_fut => {
                while let Ok(data) = raw_rx.try_recv() {
                    let event = handle.on_output(data).await;
                    let _ = handle.output_tx.send(event);
                }
                break result.unwrap_or_else(|e| {
                    warn!(error = %e, "terminal backend exited with an error");
                    ExitStatus { code: None, signal: None }
                });
            }
        }
    };

    drop(run_fut);
    drop(backend);

    let event = handle.on_exit(final_status).await;
    let _ = handle.output_tx.send(event);
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary scenarios.
//!
//! Spawns the real `freshell` binary as a subprocess and exercises it over
//! its WebSocket and HTTP transports.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use freshell::protocol::{ClientFrame, ServerFrame};

/// Resolve the path to the compiled `freshell` binary.
pub fn freshell_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs -> tests -> workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("freshell")
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// Builder for configuring a spawned [`FreshellProcess`].
pub struct FreshellBuilder {
    auth_token: Option<String>,
    hello_timeout_ms: Option<u64>,
    create_rate_limit: Option<u32>,
    create_rate_window_ms: Option<u64>,
    max_ws_chunk_bytes: Option<usize>,
}

impl Default for FreshellBuilder {
    fn default() -> Self {
        Self {
            auth_token: None,
            hello_timeout_ms: None,
            create_rate_limit: None,
            create_rate_window_ms: None,
            max_ws_chunk_bytes: None,
        }
    }
}

impl FreshellBuilder {
    pub fn auth_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_owned());
        self
    }

    pub fn hello_timeout_ms(mut self, ms: u64) -> Self {
        self.hello_timeout_ms = Some(ms);
        self
    }

    pub fn create_rate_limit(mut self, limit: u32) -> Self {
        self.create_rate_limit = Some(limit);
        self
    }

    pub fn create_rate_window_ms(mut self, ms: u64) -> Self {
        self.create_rate_window_ms = Some(ms);
        self
    }

    pub fn max_ws_chunk_bytes(mut self, bytes: usize) -> Self {
        self.max_ws_chunk_bytes = Some(bytes);
        self
    }

    pub fn spawn(self) -> anyhow::Result<FreshellProcess> {
        let binary = freshell_binary();
        anyhow::ensure!(binary.exists(), "freshell binary not found at {}", binary.display());

        let port = free_port()?;

        let mut args: Vec<String> = vec![
            "--host".into(),
            "127.0.0.1".into(),
            "--port".into(),
            port.to_string(),
            "--log-format".into(),
            "text".into(),
            "--log-level".into(),
            "warn".into(),
        ];
        if let Some(ref token) = self.auth_token {
            args.extend(["--auth-token".into(), token.clone()]);
        }
        if let Some(ms) = self.hello_timeout_ms {
            args.extend(["--hello-timeout-ms".into(), ms.to_string()]);
        }
        if let Some(limit) = self.create_rate_limit {
            args.extend(["--create-rate-limit".into(), limit.to_string()]);
        }
        if let Some(ms) = self.create_rate_window_ms {
            args.extend(["--create-rate-window-ms".into(), ms.to_string()]);
        }
        if let Some(bytes) = self.max_ws_chunk_bytes {
            args.extend(["--max-ws-chunk-bytes".into(), bytes.to_string()]);
        }

        let child = Command::new(&binary).args(&args).stdout(Stdio::null()).stderr(Stdio::null()).spawn()?;

        Ok(FreshellProcess { child, port })
    }
}

/// A running `freshell` process that is killed on drop.
pub struct FreshellProcess {
    child: Child,
    port: u16,
}

impl FreshellProcess {
    pub fn build() -> FreshellBuilder {
        FreshellBuilder::default()
    }

    pub fn start() -> anyhow::Result<Self> {
        Self::build().spawn()
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}/ws", self.port)
    }

    /// Poll `/api/v1/health` until it answers.
    pub async fn wait_healthy(&self, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let client = reqwest::Client::new();
        let url = format!("{}/api/v1/health", self.base_url());
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("freshell did not become healthy within {timeout:?}");
            }
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Connect a raw WebSocket to `/ws`, performing no handshake.
    pub async fn connect(&self) -> anyhow::Result<WsStream> {
        let (ws, _) = tokio_tungstenite::connect_async(self.ws_url()).await?;
        Ok(ws)
    }

    /// Connect and complete the hello handshake with `token`, returning the
    /// socket positioned right after `ready`.
    pub async fn connect_authenticated(&self, token: &str) -> anyhow::Result<WsStream> {
        let mut ws = self.connect().await?;
        send_frame(&mut ws, &ClientFrame::Hello { token: token.to_owned(), client: None }).await?;
        let reply = recv_frame(&mut ws).await?;
        anyhow::ensure!(matches!(reply, ServerFrame::Ready {}), "expected ready, got {reply:?}");
        Ok(ws)
    }
}

impl Drop for FreshellProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub async fn send_frame(ws: &mut WsStream, frame: &ClientFrame) -> anyhow::Result<()> {
    let text = serde_json::to_string(frame)?;
    ws.send(Message::Text(text.into())).await?;
    Ok(())
}

pub async fn send_raw(ws: &mut WsStream, text: &str) -> anyhow::Result<()> {
    ws.send(Message::Text(text.to_owned().into())).await?;
    Ok(())
}

pub async fn recv_frame(ws: &mut WsStream) -> anyhow::Result<ServerFrame> {
    let msg = tokio::time::timeout(Duration::from_secs(10), ws.next())
        .await?
        .ok_or_else(|| anyhow::anyhow!("ws stream ended"))??;
    match msg {
        Message::Text(text) => Ok(serde_json::from_str(&text)?),
        other => anyhow::bail!("expected a text frame, got {other:?}"),
    }
}

/// Wait for the connection to close and return the close code, if any.
pub async fn recv_close_code(ws: &mut WsStream) -> anyhow::Result<Option<u16>> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("connection did not close in time");
        }
        match ws.next().await {
            Some(Ok(Message::Close(frame))) => return Ok(frame.map(|f| u16::from(f.code))),
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => return Ok(None),
        }
    }
}

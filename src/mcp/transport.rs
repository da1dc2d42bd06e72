//! MCP transport layer - stdio framing
//!
//! One JSON object per line on stdin/stdout. Blocking stdio lives on
//! dedicated threads bridged into the async world with channels, so the
//! runtime never blocks on a terminal read.

use super::types::*;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::io::{BufRead, Write};
use tokio::sync::mpsc;
use tracing::{error, trace};

/// Transport trait for MCP communication
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a JSON-RPC response
    async fn send_response(&self, response: JsonRpcResponse) -> Result<()>;

    /// Send a JSON-RPC notification
    async fn send_notification(&self, notification: JsonRpcNotification) -> Result<()>;

    /// Receive incoming messages; `None` means the peer closed the stream
    async fn receive(&self) -> Result<Option<McpMessage>>;
}

/// Incoming MCP message
#[derive(Debug, Clone)]
pub enum McpMessage {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
}

impl McpMessage {
    pub fn from_json(value: Value) -> Result<Self> {
        if value.get("id").is_some() && value.get("method").is_some() {
            let request: JsonRpcRequest = serde_json::from_value(value)?;
            Ok(McpMessage::Request(request))
        } else {
            let notification: JsonRpcNotification = serde_json::from_value(value)?;
            Ok(McpMessage::Notification(notification))
        }
    }
}

/// Stdio transport for MCP server mode.
///
/// Two dedicated threads own the terminal streams; the async side only
/// ever touches channels. Dropping the transport closes the outbound
/// channel, which lets the writer thread drain and exit.
pub struct StdioTransport {
    outbound: mpsc::Sender<String>,
    inbound: tokio::sync::Mutex<mpsc::Receiver<String>>,
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl StdioTransport {
    pub fn new() -> Self {
        let (outbound, mut frames) = mpsc::channel::<String>(64);
        let (lines, inbound) = mpsc::channel::<String>(64);

        // Writer thread: one JSON frame per line, flushed per frame so a
        // directive is never stuck behind buffering while the client waits.
        std::thread::spawn(move || {
            let mut out = std::io::stdout().lock();
            while let Some(frame) = frames.blocking_recv() {
                trace!("mcp out: {frame}");
                if writeln!(out, "{frame}").and_then(|_| out.flush()).is_err() {
                    error!("stdout closed; writer thread exiting");
                    break;
                }
            }
        });

        // Reader thread: blank lines are tolerated as keepalive noise.
        std::thread::spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else {
                    error!("stdin read error; reader thread exiting");
                    break;
                };
                if line.is_empty() {
                    continue;
                }
                trace!("mcp in: {line}");
                if lines.blocking_send(line).is_err() {
                    break;
                }
            }
        });

        Self {
            outbound,
            inbound: tokio::sync::Mutex::new(inbound),
        }
    }

    async fn send_json(&self, value: Value) -> Result<()> {
        self.outbound.send(serde_json::to_string(&value)?).await?;
        Ok(())
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send_response(&self, response: JsonRpcResponse) -> Result<()> {
        self.send_json(serde_json::to_value(&response)?).await
    }

    async fn send_notification(&self, notification: JsonRpcNotification) -> Result<()> {
        self.send_json(serde_json::to_value(&notification)?).await
    }

    async fn receive(&self) -> Result<Option<McpMessage>> {
        let mut inbound = self.inbound.lock().await;
        match inbound.recv().await {
            Some(line) => {
                let value: Value = serde_json::from_str(&line)?;
                Ok(Some(McpMessage::from_json(value)?))
            }
            None => Ok(None),
        }
    }
}

/// Null transport for in-process usage.
///
/// Does not spawn stdio threads and does not lock stdout; suitable for
/// tests and CLI flows that call tools directly.
#[derive(Debug, Default, Clone)]
pub struct NullTransport;

impl NullTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for NullTransport {
    async fn send_response(&self, _response: JsonRpcResponse) -> Result<()> {
        Ok(())
    }

    async fn send_notification(&self, _notification: JsonRpcNotification) -> Result<()> {
        Ok(())
    }

    async fn receive(&self) -> Result<Option<McpMessage>> {
        Ok(None)
    }
}

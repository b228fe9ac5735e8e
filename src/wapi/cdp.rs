// Script session over the Chrome DevTools Protocol
//
// Commands go out over the page's DevTools WebSocket with increasing ids; a
// reader task routes each response back to the command that is waiting on it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::session::ScriptSession;
use crate::error::SessionError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

fn lock_pending(pending: &PendingMap) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Value>>> {
    // The map stays consistent even if a holder panicked
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Removes a command's pending entry however its caller stops waiting,
/// including when the caller's future is dropped by an outer timeout.
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock_pending(self.pending).remove(&self.id);
    }
}

/// Timeout for commands that are not script evaluations
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// A [`ScriptSession`] backed by a page target of a running browser
pub struct CdpSession {
    next_id: AtomicU64,
    pending: PendingMap,
    writer: TokioMutex<SplitSink<WsStream, WsMessage>>,
    reader: JoinHandle<()>,
}

impl CdpSession {
    /// Connects to a page's DevTools endpoint,
    /// e.g. `ws://localhost:9222/devtools/page/<target>`
    pub async fn connect(ws_url: &str) -> Result<Self, SessionError> {
        info!("Connecting to DevTools at {}", ws_url);

        let (stream, _) = tokio_tungstenite::connect_async(ws_url)
            .await
            .map_err(|e| SessionError::Transport(format!("failed to connect to {}: {}", ws_url, e)))?;
        let (writer, reader) = stream.split();

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let reader = tokio::spawn(Self::read_loop(reader, pending.clone()));

        Ok(CdpSession {
            next_id: AtomicU64::new(1),
            pending,
            writer: TokioMutex::new(writer),
            reader,
        })
    }

    async fn read_loop(mut reader: SplitStream<WsStream>, pending: PendingMap) {
        while let Some(frame) = reader.next().await {
            let text = match frame {
                Ok(WsMessage::Text(text)) => text,
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    warn!("DevTools connection error: {}", e);
                    break;
                }
            };

            let message: Value = match serde_json::from_str(text.as_str()) {
                Ok(value) => value,
                Err(e) => {
                    warn!("Ignoring unparseable DevTools message: {}", e);
                    continue;
                }
            };

            // Events carry no id
            if let Some(id) = message.get("id").and_then(Value::as_u64) {
                let waiter = lock_pending(&pending).remove(&id);
                if let Some(tx) = waiter {
                    let _ = tx.send(message);
                }
            }
        }

        // Dropping the senders fails every command still waiting
        lock_pending(&pending).clear();
        debug!("DevTools reader finished");
    }

    async fn send_command(&self, method: &str, params: Value, timeout: Duration) -> Result<Value, SessionError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let command = json!({ "id": id, "method": method, "params": params }).to_string();

        let (tx, rx) = oneshot::channel();
        lock_pending(&self.pending).insert(id, tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        if let Err(e) = self.writer.lock().await.send(WsMessage::Text(command.into())).await {
            return Err(SessionError::Transport(format!("failed to send {}: {}", method, e)));
        }

        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(SessionError::Transport("DevTools connection closed".to_string()))
            }
            Err(_) => return Err(SessionError::Timeout(timeout)),
        };

        if let Some(error) = response.get("error") {
            return Err(SessionError::Transport(format!(
                "{} failed: {}",
                method,
                error.get("message").and_then(Value::as_str).unwrap_or("unknown error")
            )));
        }

        let result = response.get("result").cloned().unwrap_or(Value::Null);
        if let Some(details) = result.get("exceptionDetails") {
            return Err(SessionError::Script(exception_message(details)));
        }
        Ok(result)
    }
}

impl Drop for CdpSession {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl ScriptSession for CdpSession {
    async fn inject(&self, name: &str, source: &str) -> Result<(), SessionError> {
        debug!("Injecting {} ({} bytes)", name, source.len());
        self.send_command(
            "Runtime.evaluate",
            json!({ "expression": source, "returnByValue": false }),
            COMMAND_TIMEOUT,
        )
        .await?;
        Ok(())
    }

    async fn evaluate(&self, script: &str, timeout: Duration) -> Result<Value, SessionError> {
        let result = self
            .send_command(
                "Runtime.evaluate",
                json!({
                    "expression": wrap_script(script),
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
                timeout,
            )
            .await?;

        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }
}

/// Runs `script` as a function body whose `arguments[0]` resolves the
/// returned promise. A non-undefined return value resolves it too.
fn wrap_script(script: &str) -> String {
    format!(
        "new Promise(function (resolve, reject) {{\n\
         \x20   try {{\n\
         \x20       var result = (function () {{ {} }}).call(window, resolve);\n\
         \x20       if (result !== undefined) {{ Promise.resolve(result).then(resolve, reject); }}\n\
         \x20   }} catch (e) {{ reject(e); }}\n\
         }})",
        script
    )
}

fn exception_message(details: &Value) -> String {
    let exception = details.get("exception");
    exception
        .and_then(|e| e.get("description"))
        .and_then(Value::as_str)
        .or_else(|| exception.and_then(|e| e.get("value")).and_then(Value::as_str))
        .or_else(|| details.get("text").and_then(Value::as_str))
        .unwrap_or("unknown exception")
        .to_string()
}

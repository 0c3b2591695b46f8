//! Reference binding of `kbot_core::rpc`'s abstract agent protocol onto a
//! concrete wire format: newline-delimited JSON over the agent subprocess's
//! stdin/stdout. `kbot-agent` deliberately leaves the transport external
//! (`AgentRpcClient`/`ClientFactory` "implementors own it") — this is the
//! one this binary supplies so `kbot-gateway` is runnable end to end.
//!
//! Request line: `{"op":"new_session"|"prompt","id":<u64>,"params":{...}}`.
//! Response line: `{"type":"response","id":<u64>,"ok":bool,"result"?,"error"?}`.
//! Update line: `{"type":"update", ...SessionUpdate fields}`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tracing::warn;

use kbot_agent::ClientFactory;
use kbot_core::rpc::{
    AgentRpcClient, NewSessionParams, PromptRequest, PromptResponse, RpcError, SessionUpdate,
};

#[derive(Serialize)]
struct Envelope<'a, P> {
    op: &'a str,
    id: u64,
    params: P,
}

struct Pending {
    tx: oneshot::Sender<Result<serde_json::Value, String>>,
}

/// A single request/response/update-stream connection to an already-spawned
/// agent subprocess, multiplexed over one stdin/stdout pair.
pub struct StdioRpcClient {
    stdin: AsyncMutex<ChildStdin>,
    next_id: AtomicU64,
    pending: Arc<DashMap<u64, Pending>>,
    subscribers: Arc<DashMap<String, Vec<mpsc::Sender<SessionUpdate>>>>,
}

impl StdioRpcClient {
    fn new(stdin: ChildStdin, stdout: tokio::process::ChildStdout) -> Arc<Self> {
        let pending = Arc::new(DashMap::new());
        let subscribers = Arc::new(DashMap::new());

        let reader_pending = pending.clone();
        let reader_subscribers = subscribers.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        dispatch_line(&line, &reader_pending, &reader_subscribers).await;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "agent stdout read failed");
                        break;
                    }
                }
            }
        });

        Arc::new(Self { stdin: AsyncMutex::new(stdin), next_id: AtomicU64::new(1), pending, subscribers })
    }

    async fn call<P: Serialize>(&self, op: &str, params: P) -> kbot_core::rpc::Result<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, Pending { tx });

        let mut line = serde_json::to_string(&Envelope { op, id, params })
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        line.push('\n');

        {
            let mut stdin = self.stdin.lock().await;
            stdin.write_all(line.as_bytes()).await.map_err(|e| RpcError::Transport(e.to_string()))?;
        }

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(RpcError::Transport(message)),
            Err(_) => Err(RpcError::Transport("agent closed stdout before replying".into())),
        }
    }
}

async fn dispatch_line(
    line: &str,
    pending: &DashMap<u64, Pending>,
    subscribers: &DashMap<String, Vec<mpsc::Sender<SessionUpdate>>>,
) {
    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, line, "malformed line from agent stdout");
            return;
        }
    };

    match value.get("type").and_then(|t| t.as_str()) {
        Some("response") => {
            let Some(id) = value.get("id").and_then(|v| v.as_u64()) else { return };
            let Some((_, entry)) = pending.remove(&id) else { return };
            let ok = value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false);
            if ok {
                let _ = entry.tx.send(Ok(value.get("result").cloned().unwrap_or(serde_json::Value::Null)));
            } else {
                let error = value.get("error").and_then(|e| e.as_str()).unwrap_or("unknown agent error");
                let _ = entry.tx.send(Err(error.to_string()));
            }
        }
        Some("update") => {
            let Some(session_id) = value.get("session_id").and_then(|v| v.as_str()) else { return };
            let update: SessionUpdate = match serde_json::from_value(value.clone()) {
                Ok(u) => u,
                Err(e) => {
                    warn!(error = %e, "malformed update from agent");
                    return;
                }
            };
            if let Some(mut subs) = subscribers.get_mut(session_id) {
                subs.retain(|tx| tx.try_send(update.clone()).is_ok() || !tx.is_closed());
            }
        }
        other => warn!(?other, "unrecognized message type from agent stdout"),
    }
}

#[async_trait]
impl AgentRpcClient for StdioRpcClient {
    async fn new_session(&self, params: NewSessionParams) -> kbot_core::rpc::Result<String> {
        let result = self.call("new_session", params).await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| RpcError::Transport("new_session did not return a session id".into()))
    }

    async fn prompt(&self, req: PromptRequest) -> kbot_core::rpc::Result<PromptResponse> {
        let result = self.call("prompt", req).await?;
        serde_json::from_value(result).map_err(|e| RpcError::Transport(e.to_string()))
    }

    fn subscribe(&self, session_id: &str) -> mpsc::Receiver<SessionUpdate> {
        let (tx, rx) = mpsc::channel(32);
        self.subscribers.entry(session_id.to_string()).or_default().push(tx);
        rx
    }
}

/// Builds a [`StdioRpcClient`] against a freshly spawned agent child.
pub struct StdioClientFactory;

impl ClientFactory for StdioClientFactory {
    fn build(&self, child: &mut Child) -> Arc<dyn AgentRpcClient> {
        let stdin = child.stdin.take().expect("agent child spawned without piped stdin");
        let stdout = child.stdout.take().expect("agent child spawned without piped stdout");
        StdioRpcClient::new(stdin, stdout)
    }
}

use phaselane_core::config::Config;
use phaselane_core::logger::JsonLineSink;
use phaselane_core::ToolDispatcher;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::wiring::{build_dispatcher, structured_logger};

// ---------------------------------------------------------------------------
// JSON-RPC 2.0 protocol types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[allow(dead_code)]
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
    pub params: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

impl JsonRpcResponse {
    fn ok(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Server loop
// ---------------------------------------------------------------------------

pub fn run(root: &Path) -> anyhow::Result<()> {
    let config = Config::load_or_default(root)?;
    let logger = structured_logger(root, &config, Arc::new(JsonLineSink::stderr()))?;
    let policy = Arc::new(config.effective_policy());
    let dispatcher = Arc::new(build_dispatcher(root, &config, policy, logger)?);

    tracing::info!(root = %root.display(), "serving MCP over stdio");
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(serve(tokio::io::stdin(), tokio::io::stdout(), dispatcher))?;
    Ok(())
}

/// Reads requests line by line until EOF.
///
/// `tools/call` requests run concurrently, each on its own task, so
/// responses may arrive out of order. A single writer task owns `writer`;
/// it is handed back once every response has been flushed.
pub async fn serve<R, W>(reader: R, mut writer: W, dispatcher: Arc<ToolDispatcher>) -> anyhow::Result<W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<JsonRpcResponse>();
    let writer_task = tokio::spawn(async move {
        while let Some(response) = rx.recv().await {
            let mut line = serde_json::to_vec(&response)?;
            line.push(b'\n');
            writer.write_all(&line).await?;
            writer.flush().await?;
        }
        Ok::<W, anyhow::Error>(writer)
    });

    let mut calls = JoinSet::new();
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let raw: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                if tx.send(JsonRpcResponse::err(None, -32700, format!("parse error: {e}"))).is_err() {
                    break;
                }
                continue;
            }
        };

        // Notifications have no "id" key and get no response.
        if !raw
            .as_object()
            .map(|o| o.contains_key("id"))
            .unwrap_or(false)
        {
            continue;
        }

        // Echo the id of a malformed request when it can be read.
        let id = raw.get("id").cloned();
        let request: JsonRpcRequest = match serde_json::from_value(raw) {
            Ok(r) => r,
            Err(e) => {
                if tx.send(JsonRpcResponse::err(id, -32600, format!("invalid request: {e}"))).is_err() {
                    break;
                }
                continue;
            }
        };

        if request.method == "tools/call" {
            let dispatcher = Arc::clone(&dispatcher);
            let tx = tx.clone();
            calls.spawn(async move {
                let response = handle_request(&request, &dispatcher).await;
                let _ = tx.send(response);
            });
        } else {
            let response = handle_request(&request, &dispatcher).await;
            if tx.send(response).is_err() {
                break;
            }
        }
    }

    while let Some(joined) = calls.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "tool call task failed");
        }
    }
    drop(tx);
    writer_task.await?
}

// ---------------------------------------------------------------------------
// Request dispatch (pub for unit tests)
// ---------------------------------------------------------------------------

pub async fn handle_request(req: &JsonRpcRequest, dispatcher: &ToolDispatcher) -> JsonRpcResponse {
    match req.method.as_str() {
        "initialize" => JsonRpcResponse::ok(
            req.id.clone(),
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {
                    "tools": {}
                },
                "serverInfo": {
                    "name": "phaselane",
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        ),

        "tools/list" => JsonRpcResponse::ok(req.id.clone(), json!({ "tools": dispatcher.tool_list() })),

        "tools/call" => {
            let Some(params) = &req.params else {
                return JsonRpcResponse::err(req.id.clone(), -32602, "missing params");
            };
            let Some(tool_name) = params["name"].as_str() else {
                return JsonRpcResponse::err(req.id.clone(), -32602, "missing tool name in params");
            };
            let args = params.get("arguments").cloned().unwrap_or(Value::Null);

            let response = dispatcher.dispatch(tool_name, args).await;
            JsonRpcResponse::ok(
                req.id.clone(),
                serde_json::to_value(&response).unwrap_or_else(|e| json!({"error": e.to_string()})),
            )
        }

        other => JsonRpcResponse::err(req.id.clone(), -32601, format!("method not found: {other}")),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

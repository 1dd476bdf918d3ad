//! MCP server: newline-delimited JSON-RPC 2.0 over stdio.
//!
//! Exposes the terminal tool surface (`terminal.run`, `terminal.status`,
//! `terminal.write`, `terminal.signal`, `terminal.list`, `terminal.attach`).
//! Each request is handled in its own task and responses are written as
//! whole frames under a stdout lock, so a long-blocking `terminal.run` never
//! starves status queries for other sessions. Progress updates stream out as
//! `notifications/progress` frames.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use cw_config::Config;
use cw_core::{ProgressUpdate, SignalSpec, ToolResult};
use cw_session::journal::spawn_journal_writer;
use cw_session::{
    DEFAULT_MAX_BUFFER_BYTES, DEFAULT_QUIET_MS, DEFAULT_STUCK_MS, DEFAULT_TIMEOUT_MS,
    DEFAULT_WAITING_MS, Hooks, ProgressFn, RunOptions, SessionStore, TerminalTools, spawn_sweeper,
};

/// Serve until stdin closes.
pub(crate) async fn serve(config: Config) -> Result<()> {
    info!("starting terminal MCP server on stdio");

    let store = SessionStore::new(config.max_sessions);
    spawn_sweeper(
        store.clone(),
        Duration::from_millis(config.session_timeout_ms),
    );

    let out = StdioOut::new();
    let hooks = Hooks {
        progress: Some(progress_notifier(out.clone())),
        completion: config.journal_path.clone().map(spawn_journal_writer),
    };
    let tools = TerminalTools::new(store, config, hooks);

    // Blocking stdin reads live on a dedicated thread; frames cross into the
    // async world over a channel.
    let (line_tx, mut line_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    std::thread::Builder::new()
        .name("cmdwatch-stdin".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => {
                        if line_tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("failed to read line from stdin: {e}");
                        break;
                    }
                }
            }
        })
        .context("failed to spawn stdin reader thread")?;

    while let Some(line) = line_rx.recv().await {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        debug!("received: {trimmed}");

        let request: JsonRpcRequest = match serde_json::from_str(trimmed) {
            Ok(request) => request,
            Err(e) => {
                error!("failed to parse JSON-RPC request: {e}");
                out.write_frame(&JsonRpcResponse::failure(
                    None,
                    -32700,
                    format!("Parse error: {e}"),
                ))?;
                continue;
            }
        };

        let tools = tools.clone();
        let out = out.clone();
        tokio::spawn(async move {
            if let Some(response) = handle_request(&tools, request).await {
                if let Err(e) = out.write_frame(&response) {
                    warn!("failed to write JSON-RPC response: {e:#}");
                }
            }
        });
    }

    info!("stdin closed; MCP server shutting down");
    Ok(())
}

/// JSON-RPC 2.0 Request
#[derive(Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    method: String,
    #[serde(default)]
    params: Option<Value>,
    id: Option<Value>,
}

/// JSON-RPC 2.0 Response
#[derive(Serialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
    id: Option<Value>,
}

/// JSON-RPC 2.0 Error
#[derive(Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

impl JsonRpcResponse {
    fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    fn failure(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError { code, message }),
            id,
        }
    }
}

/// Serialized access to stdout. Every frame is one line, written and flushed
/// under the lock so concurrent tasks never interleave bytes.
#[derive(Clone)]
struct StdioOut {
    inner: Arc<Mutex<std::io::Stdout>>,
}

impl StdioOut {
    fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(std::io::stdout())),
        }
    }

    fn write_frame<T: Serialize>(&self, frame: &T) -> Result<()> {
        let mut out = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        serde_json::to_writer(&mut *out, frame).context("Failed to serialize response")?;
        out.write_all(b"\n")
            .context("Failed to write newline to stdout")?;
        out.flush().context("Failed to flush stdout")
    }
}

fn progress_notifier(out: StdioOut) -> ProgressFn {
    Arc::new(move |update: ProgressUpdate| {
        let frame = json!({
            "jsonrpc": "2.0",
            "method": "notifications/progress",
            "params": update,
        });
        if let Err(e) = out.write_frame(&frame) {
            warn!("failed to write progress notification: {e:#}");
        }
    })
}

/// MCP Tool Definition
#[derive(Serialize)]
pub(crate) struct McpToolDef {
    name: String,
    description: String,
    #[serde(rename = "inputSchema")]
    input_schema: Value,
}

/// The tool catalog advertised by `tools/list`.
pub(crate) fn tool_catalog() -> Vec<McpToolDef> {
    vec![
        McpToolDef {
            name: "terminal.run".to_string(),
            description: "Run a shell command and wait for it to complete or error. \
                          Streams progress and classifies liveness (running, waiting, \
                          possibly-stuck) along the way."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "Shell command line to execute"
                    },
                    "cwd": {
                        "type": "string",
                        "description": "Working directory for the command"
                    },
                    "shell": {
                        "type": "string",
                        "description": "Shell binary override"
                    },
                    "env": {
                        "type": "object",
                        "description": "Extra environment variables",
                        "additionalProperties": { "type": "string" }
                    },
                    "timeoutMs": {
                        "type": "number",
                        "description": "SIGTERM the command after this long; 0 disables (default 30000)"
                    },
                    "quietMs": {
                        "type": "number",
                        "description": "Quiet window after a candidate-complete event (default 300)"
                    },
                    "waitingMs": {
                        "type": "number",
                        "description": "Idle threshold before the session is classified waiting (default 10000)"
                    },
                    "stuckMs": {
                        "type": "number",
                        "description": "Idle threshold before the session is classified possibly-stuck (default 45000)"
                    },
                    "maxBufferBytes": {
                        "type": "number",
                        "description": "Rolling output buffer cap in bytes (default 2000000)"
                    }
                },
                "required": ["command"]
            }),
        },
        McpToolDef {
            name: "terminal.status".to_string(),
            description: "Report a session's liveness classification, exit info, and the \
                          tail of its output."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "sessionId": {
                        "type": "string",
                        "description": "Session to inspect"
                    },
                    "tail": {
                        "type": "number",
                        "description": "How many trailing bytes of output to return (default 2000)"
                    }
                },
                "required": ["sessionId"]
            }),
        },
        McpToolDef {
            name: "terminal.write".to_string(),
            description: "Write bytes to a live session's stdin verbatim. Include a \
                          trailing newline to submit a line."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "sessionId": {
                        "type": "string",
                        "description": "Session to write to"
                    },
                    "data": {
                        "type": "string",
                        "description": "Bytes to write, passed through verbatim"
                    }
                },
                "required": ["sessionId", "data"]
            }),
        },
        McpToolDef {
            name: "terminal.signal".to_string(),
            description: "Send SIGINT, SIGTERM, or KILL to a live session, or CTRL_C to \
                          write a 0x03 byte instead of signaling."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "sessionId": {
                        "type": "string",
                        "description": "Session to signal"
                    },
                    "signal": {
                        "type": "string",
                        "enum": ["SIGINT", "SIGTERM", "KILL", "CTRL_C"],
                        "description": "Signal to deliver (default SIGINT)"
                    }
                },
                "required": ["sessionId"]
            }),
        },
        McpToolDef {
            name: "terminal.list".to_string(),
            description: "List all sessions with their liveness classification and exit info."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
        },
        McpToolDef {
            name: "terminal.attach".to_string(),
            description: "Return a session's full retained output plus its status, as one \
                          consistent snapshot."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "sessionId": {
                        "type": "string",
                        "description": "Session to attach to"
                    }
                },
                "required": ["sessionId"]
            }),
        },
    ]
}

/// Handle one JSON-RPC request. Notifications return `None`: no frame is
/// written for them.
async fn handle_request(
    tools: &TerminalTools,
    request: JsonRpcRequest,
) -> Option<JsonRpcResponse> {
    let id = request.id.clone();

    match request.method.as_str() {
        "initialize" => {
            debug!("handling initialize");
            Some(JsonRpcResponse::success(
                id,
                json!({
                    "protocol": "2024-11-05",
                    "server": {
                        "name": "cmdwatch",
                        "version": env!("CARGO_PKG_VERSION")
                    },
                    "capabilities": {
                        "tools": true,
                        "sampling": false,
                        "resources": false
                    }
                }),
            ))
        }
        "notifications/initialized" => {
            debug!("handling initialized notification");
            None
        }
        "tools/list" => {
            debug!("handling tools/list");
            Some(JsonRpcResponse::success(
                id,
                json!({ "tools": tool_catalog() }),
            ))
        }
        "tools/call" => {
            debug!("handling tools/call");
            Some(match handle_tool_call(tools, request.params).await {
                Ok(result) => JsonRpcResponse::success(id, result),
                Err(e) => JsonRpcResponse::failure(id, -32603, format!("{e:#}")),
            })
        }
        "shutdown" => {
            debug!("handling shutdown");
            Some(JsonRpcResponse::success(id, json!({})))
        }
        other => Some(JsonRpcResponse::failure(
            id,
            -32601,
            format!("Method not found: {other}"),
        )),
    }
}

async fn handle_tool_call(tools: &TerminalTools, params: Option<Value>) -> Result<Value> {
    let params = params.context("Missing params for tools/call")?;
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .context("Missing tool name")?;
    let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

    debug!("tool call: {name} with args: {arguments:?}");

    let result = match name {
        "terminal.run" => handle_run_tool(tools, arguments).await?,
        "terminal.status" => handle_status_tool(tools, arguments)?,
        "terminal.write" => handle_write_tool(tools, arguments).await?,
        "terminal.signal" => handle_signal_tool(tools, arguments).await?,
        "terminal.list" => handle_list_tool(tools)?,
        "terminal.attach" => handle_attach_tool(tools, arguments)?,
        _ => anyhow::bail!("Unknown tool: {name}"),
    };
    Ok(serde_json::to_value(result)?)
}

fn required_session_id(args: &Value) -> Result<String> {
    Ok(args
        .get("sessionId")
        .and_then(Value::as_str)
        .context("Missing sessionId argument")?
        .to_string())
}

async fn handle_run_tool(tools: &TerminalTools, args: Value) -> Result<ToolResult> {
    let command = args
        .get("command")
        .and_then(Value::as_str)
        .context("Missing command argument")?
        .to_string();
    let env: HashMap<String, String> = args
        .get("env")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default();

    let options = RunOptions {
        command,
        cwd: args
            .get("cwd")
            .and_then(Value::as_str)
            .map(PathBuf::from),
        shell: args
            .get("shell")
            .and_then(Value::as_str)
            .map(String::from),
        env,
        timeout_ms: args
            .get("timeoutMs")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_TIMEOUT_MS),
        quiet_ms: args
            .get("quietMs")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_QUIET_MS),
        waiting_ms: args
            .get("waitingMs")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_WAITING_MS),
        stuck_ms: args
            .get("stuckMs")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_STUCK_MS),
        max_buffer_bytes: args
            .get("maxBufferBytes")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_BUFFER_BYTES),
    };

    let outcome = tools.run(options).await?;
    let text = outcome.output.clone();
    Ok(ToolResult::text_and_json(text, serde_json::to_value(&outcome)?))
}

fn handle_status_tool(tools: &TerminalTools, args: Value) -> Result<ToolResult> {
    let session_id = required_session_id(&args)?;
    let tail = args
        .get("tail")
        .and_then(Value::as_u64)
        .map(|n| n as usize);
    let reply = tools.status(&session_id, tail)?;
    let text = format!("{}\n{}", reply.status, reply.text);
    Ok(ToolResult::text_and_json(text, serde_json::to_value(&reply)?))
}

async fn handle_write_tool(tools: &TerminalTools, args: Value) -> Result<ToolResult> {
    let session_id = required_session_id(&args)?;
    let data = args
        .get("data")
        .and_then(Value::as_str)
        .context("Missing data argument")?;
    tools.write(&session_id, data).await?;
    Ok(ToolResult::text_and_json(
        format!("wrote {} bytes to session {session_id}", data.len()),
        json!({ "sessionId": session_id, "bytes": data.len() }),
    ))
}

async fn handle_signal_tool(tools: &TerminalTools, args: Value) -> Result<ToolResult> {
    let session_id = required_session_id(&args)?;
    let signal: SignalSpec = args
        .get("signal")
        .and_then(Value::as_str)
        .unwrap_or("SIGINT")
        .parse()?;
    tools.signal(&session_id, signal).await?;
    Ok(ToolResult::text_and_json(
        format!("sent {signal} to session {session_id}"),
        json!({ "sessionId": session_id, "signal": signal.as_str() }),
    ))
}

fn handle_list_tool(tools: &TerminalTools) -> Result<ToolResult> {
    let sessions = tools.list();

    let mut text = String::new();
    if sessions.is_empty() {
        text.push_str("No sessions.\n");
    } else {
        text.push_str(&format!(
            "{:<26}  {:<14}  {:<20}  EXIT\n",
            "SESSION", "STATUS", "LAST OUTPUT"
        ));
        for brief in &sessions {
            let exit = match (&brief.exit_code, &brief.exit_signal) {
                (Some(code), _) => code.to_string(),
                (None, Some(signal)) => signal.clone(),
                (None, None) => "-".to_string(),
            };
            text.push_str(&format!(
                "{:<26}  {:<14}  {:<20}  {}\n",
                brief.id,
                brief.status.to_string(),
                brief.last_output_at.format("%Y-%m-%d %H:%M:%S"),
                exit,
            ));
        }
    }

    Ok(ToolResult::text_and_json(
        text,
        json!({ "sessions": sessions }),
    ))
}

fn handle_attach_tool(tools: &TerminalTools, args: Value) -> Result<ToolResult> {
    let session_id = required_session_id(&args)?;
    let reply = tools.attach(&session_id)?;
    let text = reply.text.clone();
    Ok(ToolResult::text_and_json(text, serde_json::to_value(&reply)?))
}

#[cfg(test)]
#[path = "mcp_server_tests.rs"]
mod tests;

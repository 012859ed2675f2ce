//! Stdio transport: newline-delimited JSON-RPC 2.0.
//!
//! One request per line on stdin, one response per line on stdout.
//! Notifications (requests without an id) are executed but never answered.
//! Oversized lines are rejected up front with `-32600` before any parsing.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};
use warden_types::{ErrorKind, ToolInput};

use crate::registry::ExecuteOutcome;
use crate::ServerState;

/// Largest accepted request line.
const MAX_LINE_BYTES: usize = 1_048_576;

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version marker, always "2.0".
    pub jsonrpc: String,
    /// Request id; absent for notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version marker, always "2.0".
    pub jsonrpc: String,
    /// Id echoed from the request (null when it could not be read).
    pub id: Value,
    /// Result payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error object on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code per the transport contract.
    pub code: i32,
    /// Human-readable message.
    pub message: String,
    /// Structured payload (a serialized ToolOutput where applicable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Value, code: i32, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data,
            }),
        }
    }
}

/// Parameters of `execute_tool`.
#[derive(Debug, Deserialize)]
struct ExecuteParams {
    name: String,
    input: ToolInput,
}

/// Serve stdin/stdout until EOF or until `shutdown` resolves.
pub async fn serve(
    state: ServerState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    info!("stdio transport reading newline-delimited JSON-RPC");
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = &mut shutdown => {
                info!("stdio transport shutting down");
                return Ok(());
            }
        };
        let Some(line) = line else {
            info!("stdin closed, stdio transport exiting");
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }
        if let Some(response) = handle_line(&state, &line).await {
            let mut serialized = serde_json::to_string(&response)?;
            serialized.push('\n');
            stdout.write_all(serialized.as_bytes()).await?;
            stdout.flush().await?;
        }
    }
}

/// Parse and dispatch one request line.
pub async fn handle_line(state: &ServerState, line: &str) -> Option<JsonRpcResponse> {
    if line.len() > MAX_LINE_BYTES {
        warn!(bytes = line.len(), "rejecting oversized JSON-RPC message");
        return Some(JsonRpcResponse::error(
            Value::Null,
            -32600,
            format!("message exceeds {MAX_LINE_BYTES} bytes"),
            None,
        ));
    }
    let request: JsonRpcRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(err) => {
            return Some(JsonRpcResponse::error(
                Value::Null,
                -32600,
                format!("invalid request: {err}"),
                None,
            ));
        }
    };
    let id = request.id.clone();
    let response = dispatch(state, request).await;
    match id {
        // Notifications get no response.
        None => None,
        Some(id) => Some(response.with_id(id)),
    }
}

impl JsonRpcResponse {
    fn with_id(mut self, id: Value) -> Self {
        self.id = id;
        self
    }
}

async fn dispatch(state: &ServerState, request: JsonRpcRequest) -> JsonRpcResponse {
    debug!(method = %request.method, "json-rpc request");
    match request.method.as_str() {
        "list_tools" => {
            let tools = state.registry().list();
            JsonRpcResponse::result(Value::Null, json!({ "tools": tools }))
        }
        "execute_tool" => {
            let params: ExecuteParams = match request
                .params
                .ok_or_else(|| "missing params".to_string())
                .and_then(|params| {
                    serde_json::from_value(params).map_err(|e| e.to_string())
                }) {
                Ok(params) => params,
                Err(reason) => {
                    return JsonRpcResponse::error(
                        Value::Null,
                        -32602,
                        format!("invalid params: {reason}"),
                        None,
                    );
                }
            };
            match state.registry().execute(&params.name, params.input).await {
                ExecuteOutcome::UnknownTool => JsonRpcResponse::error(
                    Value::Null,
                    -32601,
                    format!("unknown tool '{}'", params.name),
                    None,
                ),
                ExecuteOutcome::Disabled => JsonRpcResponse::error(
                    Value::Null,
                    -32002,
                    format!("tool '{}' is disabled", params.name),
                    None,
                ),
                ExecuteOutcome::Completed(output) => {
                    let data = serde_json::to_value(&*output).unwrap_or(Value::Null);
                    match output.error_type {
                        Some(ErrorKind::Validation) => JsonRpcResponse::error(
                            Value::Null,
                            -32602,
                            output.error.clone().unwrap_or_else(|| "validation failed".into()),
                            Some(data),
                        ),
                        Some(ErrorKind::CircuitBreakerOpen) => JsonRpcResponse::error(
                            Value::Null,
                            -32001,
                            output.error.clone().unwrap_or_else(|| "circuit breaker open".into()),
                            Some(data),
                        ),
                        Some(ErrorKind::Unknown) => JsonRpcResponse::error(
                            Value::Null,
                            -32000,
                            output.error.clone().unwrap_or_else(|| "execution error".into()),
                            Some(data),
                        ),
                        // Execution outcomes (including 124/127) are results.
                        _ => JsonRpcResponse::result(Value::Null, data),
                    }
                }
            }
        }
        other => JsonRpcResponse::error(
            Value::Null,
            -32601,
            format!("method '{other}' not found"),
            None,
        ),
    }
}

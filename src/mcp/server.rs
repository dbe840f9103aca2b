//! MCP Server Implementation
//!
//! Line-delimited JSON-RPC over stdio. Requests are handled one at a time in
//! arrival order; tool calls are cancelled when the server shuts down.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::mcp::protocol::{
    CallToolParams, CallToolResult, Implementation, InitializeParams, InitializeResult,
    JSONRPC_VERSION, JsonRpcError, JsonRpcErrorResponse, JsonRpcMessage, JsonRpcRequest,
    JsonRpcResponse, ListToolsResult, MCP_VERSION, RequestId, ServerCapabilities, Tool,
    ToolsCapability,
};
use crate::{DocIntelError, Result};

/// Protocol revisions this server can speak; anything else gets [`MCP_VERSION`]
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &[MCP_VERSION, "2025-03-26", "2024-11-05"];

const INSTRUCTIONS: &str = "Answers questions grounded in ingested PDF documents. \
Use `ingest_pdf` to add a document, then `ask` with a conversation_id to keep context.";

/// Connection state tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

/// A tool the server can dispatch `tools/call` to
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn definition(&self) -> Tool;

    /// `Err(DocIntelError::InvalidRequest)` becomes an invalid-params error;
    /// failures the caller should read belong in [`CallToolResult::error`].
    async fn handle(
        &self,
        arguments: Map<String, Value>,
        cancel: CancellationToken,
    ) -> Result<CallToolResult>;
}

pub struct McpServer {
    server_info: Implementation,
    tools: Vec<Box<dyn ToolHandler>>,
    connection_state: RwLock<ConnectionState>,
    shutdown: CancellationToken,
}

type MethodResult = std::result::Result<Value, JsonRpcError>;

impl McpServer {
    #[inline]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            server_info: Implementation {
                name: name.into(),
                version: version.into(),
            },
            tools: Vec::new(),
            connection_state: RwLock::new(ConnectionState::Uninitialized),
            shutdown: CancellationToken::new(),
        }
    }

    /// Register a tool with the server. A later tool with the same name
    /// replaces the earlier one.
    #[inline]
    #[must_use]
    pub fn with_tool(self, handler: impl ToolHandler + 'static) -> Self {
        self.with_tools(vec![Box::new(handler)])
    }

    #[inline]
    #[must_use]
    pub fn with_tools(mut self, handlers: Vec<Box<dyn ToolHandler>>) -> Self {
        for handler in handlers {
            let name = handler.definition().name;
            self.tools.retain(|tool| tool.definition().name != name);
            debug!("Registered tool: {}", name);
            self.tools.push(handler);
        }
        self
    }

    #[inline]
    pub fn tool_definitions(&self) -> Vec<Tool> {
        self.tools.iter().map(|tool| tool.definition()).collect()
    }

    /// Cancelling this token stops the serve loop and every running tool call
    #[inline]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    #[inline]
    pub async fn connection_state(&self) -> ConnectionState {
        *self.connection_state.read().await
    }

    /// Start the server using stdio transport
    #[inline]
    pub async fn serve_stdio(&self) -> Result<()> {
        info!("Starting MCP server with stdio transport");
        self.serve(BufReader::new(io::stdin()), io::stdout()).await
    }

    /// Reads one JSON-RPC message per line until EOF or shutdown
    #[inline]
    pub async fn serve<R, W>(&self, mut reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let mut line = String::new();
        loop {
            line.clear();
            let read = tokio::select! {
                () = self.shutdown.cancelled() => {
                    info!("Shutdown requested, closing connection");
                    break;
                }
                read = reader.read_line(&mut line) => read,
            };
            match read {
                Ok(0) => {
                    info!("EOF reached, closing connection");
                    break;
                }
                Ok(_) => {
                    if let Some(message) = self.handle_message(&line).await {
                        send_message(&mut writer, &message).await?;
                    }
                }
                Err(e) => {
                    error!("Error reading from stdin: {}", e);
                    break;
                }
            }
        }

        *self.connection_state.write().await = ConnectionState::Closed;
        self.shutdown.cancel();
        info!("MCP server stopped");
        Ok(())
    }

    /// Handles one raw line; `None` for blank lines and notifications
    #[inline]
    pub async fn handle_message(&self, line: &str) -> Option<JsonRpcMessage> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let raw: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to parse JSON: {}", e);
                return Some(error_message(JsonRpcError::parse_error(), None));
            }
        };
        let fallback_id = raw
            .get("id")
            .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok());

        let request: JsonRpcRequest = match serde_json::from_value(raw) {
            Ok(request) => request,
            Err(e) => {
                warn!("Message is not a JSON-RPC request: {}", e);
                return Some(error_message(JsonRpcError::invalid_request(), fallback_id));
            }
        };
        if request.jsonrpc != JSONRPC_VERSION {
            return Some(error_message(JsonRpcError::invalid_request(), request.id));
        }

        let Some(id) = request.id.clone() else {
            self.handle_notification(&request.method).await;
            return None;
        };

        let outcome = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params).await,
            "tools/list" => self.handle_list_tools(),
            "tools/call" => self.handle_call_tool(request.params).await,
            "ping" => Ok(Value::Object(Map::new())),
            method => Err(JsonRpcError::method_not_found(method)),
        };

        Some(match outcome {
            Ok(result) => JsonRpcMessage::Response(JsonRpcResponse::new(result, id)),
            Err(e) => {
                debug!("Request {} failed: {}", request.method, e.message);
                error_message(e, Some(id))
            }
        })
    }

    async fn handle_notification(&self, method: &str) {
        match method {
            "notifications/initialized" | "initialized" => {
                *self.connection_state.write().await = ConnectionState::Ready;
                info!("Server ready to handle requests");
            }
            "notifications/cancelled" => {
                debug!("Received cancellation notification");
            }
            _ => {
                warn!("Unknown notification method: {}", method);
            }
        }
    }

    async fn handle_initialize(&self, params: Option<Value>) -> MethodResult {
        let params: InitializeParams = params
            .ok_or_else(|| JsonRpcError::invalid_params("Initialize request missing parameters"))
            .and_then(|p| {
                serde_json::from_value(p).map_err(|e| JsonRpcError::invalid_params(e.to_string()))
            })?;

        let supported = SUPPORTED_PROTOCOL_VERSIONS.contains(&params.protocol_version.as_str());
        let protocol_version = if supported {
            params.protocol_version
        } else {
            warn!(
                "Client requested protocol {}, offering {}",
                params.protocol_version, MCP_VERSION
            );
            MCP_VERSION.to_string()
        };

        *self.connection_state.write().await = ConnectionState::Initializing;

        let result = InitializeResult {
            protocol_version,
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: Some(false),
                }),
            },
            server_info: self.server_info.clone(),
            instructions: Some(INSTRUCTIONS.to_string()),
        };

        info!(
            "Client initialized: {}",
            params
                .client_info
                .as_ref()
                .map_or("unknown", |client| client.name.as_str())
        );
        to_value(&result)
    }

    fn handle_list_tools(&self) -> MethodResult {
        to_value(&ListToolsResult {
            tools: self.tool_definitions(),
        })
    }

    async fn handle_call_tool(&self, params: Option<Value>) -> MethodResult {
        let params: CallToolParams = params
            .ok_or_else(|| JsonRpcError::invalid_params("Tool call request missing parameters"))
            .and_then(|p| {
                serde_json::from_value(p).map_err(|e| JsonRpcError::invalid_params(e.to_string()))
            })?;

        let handler = self
            .tools
            .iter()
            .find(|tool| tool.definition().name == params.name)
            .ok_or_else(|| {
                JsonRpcError::invalid_params(format!("Tool not found: {}", params.name))
            })?;

        debug!("Calling tool {}", params.name);
        let result = handler
            .handle(
                params.arguments.unwrap_or_default(),
                self.shutdown.child_token(),
            )
            .await
            .map_err(|e| match e {
                DocIntelError::InvalidRequest(message) => JsonRpcError::invalid_params(message),
                other => {
                    error!("Tool {} failed: {}", params.name, other);
                    JsonRpcError::internal_error(other.to_string())
                }
            })?;
        to_value(&result)
    }
}

fn error_message(error: JsonRpcError, id: Option<RequestId>) -> JsonRpcMessage {
    JsonRpcMessage::ErrorResponse(JsonRpcErrorResponse::new(error, id))
}

fn to_value<T: serde::Serialize>(value: &T) -> MethodResult {
    serde_json::to_value(value).map_err(|e| JsonRpcError::internal_error(e.to_string()))
}

/// Send a message to the client
async fn send_message<W>(writer: &mut W, message: &JsonRpcMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_string(message).map_err(|e| DocIntelError::Mcp(e.to_string()))?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

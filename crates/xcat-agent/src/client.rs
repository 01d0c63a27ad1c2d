//! MCP client over the streamable HTTP transport
//!
//! One session per client: `initialize` on connect, `tools/list` and
//! `tools/call` while open, `DELETE` on close. Responses arrive either as a
//! plain JSON body or as an SSE stream whose `data:` lines carry JSON-RPC
//! messages.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;
use uuid::Uuid;
use xcat_core::fail_open::fail_open;
use xcat_core::{Result, ToolInfo, XcatError};

use crate::auth;
use crate::toolset::Toolset;
use crate::types::{
    ClientInfo, InitializeResult, JsonRpcRequest, JsonRpcResponse, ServerInfo, ToolsListResult,
    PROTOCOL_VERSION,
};

const SESSION_HEADER: &str = "mcp-session-id";
const MCP_ACCEPT: &str = "application/json, text/event-stream";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const MAX_ERROR_BODY: usize = 200;

/// Connected MCP session against a single endpoint
#[derive(Debug)]
pub struct McpClient {
    http: reqwest::Client,
    endpoint: String,
    session_id: Option<String>,
    server_info: ServerInfo,
    timeout: Duration,
}

impl McpClient {
    /// Open a session against `endpoint` (e.g. `https://xcatcher.top/mcp`)
    pub async fn connect(endpoint: &str, api_key: &str) -> Result<Self> {
        Self::connect_with(endpoint, api_key, ClientInfo::default()).await
    }

    /// Open a session announcing a custom client identity
    pub async fn connect_with(endpoint: &str, api_key: &str, client_info: ClientInfo) -> Result<Self> {
        let http = reqwest::Client::builder()
            .default_headers(auth::bearer_headers(api_key)?)
            .build()
            .map_err(|e| XcatError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        let mut client = Self {
            http,
            endpoint: endpoint.to_string(),
            session_id: None,
            server_info: ServerInfo::default(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };

        tracing::info!("Initializing MCP session with {}", endpoint);

        let id = request_id("initialize");
        let request = JsonRpcRequest::new(
            id.clone(),
            "initialize",
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "clientInfo": client_info,
                "capabilities": {}
            }),
        );
        let response = client.post(&request).await?;

        client.session_id = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string);

        let result = read_response(response, &id).await?;
        let init: InitializeResult = serde_json::from_value(result)?;
        client.server_info = init.server_info;

        match &client.session_id {
            Some(_) => tracing::debug!("MCP session established"),
            None => tracing::debug!("No session id provided (stateless server)"),
        }
        tracing::info!(
            "Connected to {} v{} (protocol {})",
            client.server_info.name,
            client.server_info.version,
            init.protocol_version.as_deref().unwrap_or(PROTOCOL_VERSION)
        );

        if let Err(e) = client.notify("notifications/initialized").await {
            // The server already holds a session for us
            fail_open("session.close", || client.close()).await;
            return Err(e);
        }
        Ok(client)
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    fn session_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(MCP_ACCEPT));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(value) = self
            .session_id
            .as_deref()
            .and_then(|sid| HeaderValue::from_str(sid).ok())
        {
            headers.insert(SESSION_HEADER, value);
        }
        headers
    }

    async fn post(&self, request: &JsonRpcRequest) -> Result<reqwest::Response> {
        tracing::debug!("MCP -> {}", request.method);

        let response = self
            .http
            .post(&self.endpoint)
            .headers(self.session_headers())
            .json(request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| XcatError::Transport(format!("MCP request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND && self.session_id.is_some() {
            return Err(XcatError::Transport(
                "MCP session expired (404); reconnect required".to_string(),
            ));
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown".to_string());
            return Err(XcatError::Transport(format!(
                "MCP server returned {}: {}",
                status,
                truncate(&body, MAX_ERROR_BODY)
            )));
        }
        Ok(response)
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = request_id(method);
        let response = self.post(&JsonRpcRequest::new(id.clone(), method, params)).await?;
        read_response(response, &id).await
    }

    async fn notify(&self, method: &str) -> Result<()> {
        self.post(&JsonRpcRequest::notification(method)).await?;
        Ok(())
    }
}

#[async_trait]
impl Toolset for McpClient {
    async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = match &cursor {
                Some(c) => json!({ "cursor": c }),
                None => json!({}),
            };
            let page: ToolsListResult =
                serde_json::from_value(self.request("tools/list", params).await?)?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        tracing::debug!("tools/list returned {} tools", tools.len());
        Ok(tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        self.request(
            "tools/call",
            json!({ "name": name, "arguments": arguments }),
        )
        .await
    }

    async fn close(&self) -> Result<()> {
        let Some(session_id) = &self.session_id else {
            return Ok(());
        };

        let response = self
            .http
            .delete(&self.endpoint)
            .header(SESSION_HEADER, session_id)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| XcatError::Transport(format!("Failed to close MCP session: {}", e)))?;

        match response.status() {
            StatusCode::METHOD_NOT_ALLOWED => {
                tracing::debug!("Server does not support explicit session termination");
                Ok(())
            }
            status if status.is_success() || status == StatusCode::NOT_FOUND => {
                tracing::debug!("MCP session closed");
                Ok(())
            }
            status => Err(XcatError::Transport(format!(
                "Session close returned {}",
                status
            ))),
        }
    }
}

fn request_id(method: &str) -> String {
    format!("{}-{}", method, Uuid::new_v4())
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

async fn read_response(response: reqwest::Response, id: &str) -> Result<Value> {
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("application/json")
        .to_string();
    let body = response
        .text()
        .await
        .map_err(|e| XcatError::Transport(format!("Failed to read MCP response: {}", e)))?;
    extract_result(&content_type, &body, id)
}

/// Collect the JSON payloads of an SSE body
///
/// Multi-line `data:` fields of one event are joined with `\n`; events
/// whose data is not JSON are skipped.
pub(crate) fn parse_sse_messages(body: &str) -> Vec<Value> {
    let mut messages = Vec::new();
    let mut data: Vec<&str> = Vec::new();

    for line in body.lines() {
        if line.is_empty() {
            flush_event(&mut data, &mut messages);
        } else if let Some(rest) = line.strip_prefix("data:") {
            data.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    flush_event(&mut data, &mut messages);

    messages
}

fn flush_event(data: &mut Vec<&str>, messages: &mut Vec<Value>) {
    if data.is_empty() {
        return;
    }
    if let Ok(value) = serde_json::from_str(&data.join("\n")) {
        messages.push(value);
    }
    data.clear();
}

/// Pick the JSON-RPC response answering `id` out of a response body
pub(crate) fn extract_result(content_type: &str, body: &str, id: &str) -> Result<Value> {
    let messages = if content_type.starts_with("text/event-stream") {
        parse_sse_messages(body)
    } else {
        match serde_json::from_str::<Value>(body) {
            Ok(Value::Array(batch)) => batch,
            Ok(single) => vec![single],
            Err(e) => {
                return Err(XcatError::Transport(format!(
                    "Failed to parse MCP response: {} (body: {})",
                    e,
                    truncate(body, MAX_ERROR_BODY)
                )))
            }
        }
    };

    let response = messages
        .into_iter()
        .filter_map(|m| serde_json::from_value::<JsonRpcResponse>(m).ok())
        .find(|m| m.answers(id))
        .ok_or_else(|| XcatError::Transport(format!("No MCP response for request {}", id)))?;

    if let Some(error) = response.error {
        return Err(XcatError::Rpc {
            code: error.code,
            message: error.message,
        });
    }
    Ok(response.result.unwrap_or(Value::Null))
}

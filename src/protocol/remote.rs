//! JSON-RPC over HTTP for remote tool servers.
//!
//! Carries the same envelope as the stdio transport in the body of a POST.
//! Callers cannot tell the transports apart beyond the `transport` field in
//! call metadata: envelope-level errors, timeouts, and server results map to
//! the same taxonomy.

use std::collections::HashMap;

use serde_json::Value;

use super::stdio::CALL_TIMEOUT;
use crate::errors::McpError;
use crate::types::{JsonRpcRequest, JsonRpcResponse};

/// A remote tool-server endpoint.
#[derive(Debug, Clone)]
pub struct RemoteEndpoint {
    url: String,
    headers: HashMap<String, String>,
    client: reqwest::Client,
}

impl RemoteEndpoint {
    pub fn new(client: reqwest::Client, url: &str, headers: HashMap<String, String>) -> Self {
        Self {
            url: url.to_string(),
            headers,
            client,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Reachability probe: a plain GET answered with any 2xx status.
    pub async fn probe(&self) -> Result<(), McpError> {
        let mut request = self.client.get(&self.url);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let response = request.send().await.map_err(|e| McpError::RemoteUnreachable {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;

        if !response.status().is_success() {
            return Err(McpError::RemoteUnreachable {
                url: self.url.clone(),
                reason: format!("probe returned HTTP {}", response.status()),
            });
        }
        Ok(())
    }

    /// Issue one JSON-RPC call as an HTTP POST.
    pub async fn call(
        &self,
        id: Option<String>,
        method: &str,
        params: Value,
    ) -> Result<Value, McpError> {
        let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let envelope = JsonRpcRequest::new(&id, method, Some(params));

        let mut request = self
            .client
            .post(&self.url)
            .timeout(CALL_TIMEOUT)
            .json(&envelope);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                McpError::CallTimeout {
                    server: self.url.clone(),
                    method: method.to_string(),
                    timeout_secs: CALL_TIMEOUT.as_secs(),
                }
            } else {
                McpError::RemoteUnreachable {
                    url: self.url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        if !response.status().is_success() {
            return Err(McpError::RemoteUnreachable {
                url: self.url.clone(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let body: JsonRpcResponse =
            response
                .json()
                .await
                .map_err(|e| McpError::RemoteUnreachable {
                    url: self.url.clone(),
                    reason: format!("invalid response body: {e}"),
                })?;

        if let Some(error) = body.error {
            return Err(McpError::ServerError {
                message: error.message,
            });
        }

        Ok(body.result.unwrap_or(Value::Null))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

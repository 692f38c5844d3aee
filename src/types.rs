//! Shared types — JSON-RPC 2.0 messages and server domain model.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message. Call ids are strings end to end.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: &str, method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.to_string(),
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response message (success or error).
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[allow(dead_code)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    pub result: Option<serde_json::Value>,
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    #[serde(default)]
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

// ─── Server Definitions ──────────────────────────────────────────────────────

/// Transport-specific configuration, tagged by the persisted `type` field.
///
/// Required fields are enforced structurally: a stdio definition cannot
/// exist without a `command`, a remote one without a `url`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    Remote {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

impl TransportConfig {
    /// Short kind label used in status reads and call metadata.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stdio { .. } => "stdio",
            Self::Remote { .. } => "remote",
        }
    }

    /// Validate required fields for the chosen transport.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Stdio { command, .. } if command.trim().is_empty() => {
                Err("stdio servers require a command".to_string())
            }
            Self::Remote { url, .. } if url.trim().is_empty() => {
                Err("remote servers require a url".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// A named server definition as stored in the config file.
///
/// The name is the key of the `mcpServers` map and is filled in at load
/// time rather than serialized into the entry itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerDefinition {
    #[serde(skip)]
    pub name: String,
    #[serde(flatten)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub description: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServerDefinition {
    /// Build a fresh definition with both timestamps set to now.
    pub fn new(name: &str, transport: TransportConfig, description: &str, enabled: bool) -> Self {
        let now = Utc::now();
        Self {
            name: name.to_string(),
            transport,
            description: description.to_string(),
            enabled,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update for an existing definition. `None` fields are kept.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerDefinitionPatch {
    pub transport: Option<TransportConfig>,
    pub description: Option<String>,
    pub enabled: Option<bool>,
}

// ─── Runtime Status ──────────────────────────────────────────────────────────

/// Lifecycle status of a server handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Starting,
    Running,
    Initialized,
    Error,
    Stopped,
}

/// Runtime status snapshot for one server, as returned to callers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatusInfo {
    pub name: String,
    pub transport: String,
    pub status: ServerStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// One entry of `list_servers`: the stored definition plus live status.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerListEntry {
    #[serde(flatten)]
    pub definition: ServerDefinition,
    pub name: String,
    pub status: ServerStatus,
}

// ─── Tool Calls ──────────────────────────────────────────────────────────────

/// A tool invocation routed through the orchestrator.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRequest {
    pub server: String,
    pub tool: String,
    #[serde(default)]
    pub args: serde_json::Value,
    /// Caller-supplied correlation id; generated when absent.
    #[serde(default)]
    pub call_id: Option<String>,
}

/// Result of a routed tool call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallOutcome {
    pub call_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metadata: CallMetadata,
}

/// Transport and timing metadata attached to every tool-call outcome.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallMetadata {
    /// "stdio" or "remote" — the only caller-visible transport distinction.
    pub transport: String,
    pub duration_ms: u64,
}

/// A tool advertised by a server's `tools/list` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Option<serde_json::Value>,
}

// ─── Bulk Operations ─────────────────────────────────────────────────────────

/// Per-server outcome of a best-effort bulk operation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOutcome {
    pub name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BulkOutcome {
    pub fn ok(name: &str) -> Self {
        Self {
            name: name.to_string(),
            success: true,
            error: None,
        }
    }

    pub fn failed(name: &str, error: impl std::fmt::Display) -> Self {
        Self {
            name: name.to_string(),
            success: false,
            error: Some(error.to_string()),
        }
    }
}

/// Summary of a best-effort import from an external config file.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
    pub failures: Vec<ImportFailure>,
}

/// One entry that could not be imported.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportFailure {
    pub name: String,
    pub reason: String,
}

// ─── Runtime Diagnostics ─────────────────────────────────────────────────────

/// Availability of the scripting runtime the tool servers depend on.
///
/// Support shortcut only — nothing here gates correctness.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeDiagnostics {
    pub node_available: bool,
    pub npm_available: bool,
    pub npx_available: bool,
    pub suggestions: Vec<String>,
}

// ─── Tests ───────────────────────────────────────────────────────────────────

//! Server orchestration façade.
//!
//! The only surface exposed to the rest of the app. Owns the config store,
//! the table of running handles, and the shared HTTP client; every mutation
//! of either flows through here. Instances are self-contained — tests build
//! several against separate temp directories with no shared state.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{Mutex, RwLock};

use crate::config::{ConfigStore, SYSTEM_SERVER_NAME};
use crate::errors::McpError;
use crate::node_env;
use crate::paths::{self, BUNDLED_SERVER_COMMAND};
use crate::process::{self, SpawnedProcess};
use crate::protocol::{RemoteEndpoint, StdioConnection};
use crate::types::{
    BulkOutcome, CallMetadata, ImportFailure, ImportReport, RuntimeDiagnostics, ServerDefinition,
    ServerDefinitionPatch, ServerListEntry, ServerStatus, ServerStatusInfo, ToolCallOutcome,
    ToolCallRequest, ToolDescriptor, TransportConfig,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Pause between the stop and start halves of a restart, letting the old
/// process release its resources.
const RESTART_SETTLE: Duration = Duration::from_secs(1);

// ─── Running Handles ─────────────────────────────────────────────────────────

/// In-memory handle for one running server.
struct RunningServer {
    /// Definition snapshot taken at start time.
    definition: ServerDefinition,
    started_at: DateTime<Utc>,
    connection: ServerConnection,
    /// Present for stdio transports only.
    process: Option<SpawnedProcess>,
    /// Distinguishes this start from earlier instances under the same name,
    /// so a stale exit callback never evicts a newer handle.
    instance_id: u64,
}

/// Live transport attachment for a handle.
#[derive(Clone)]
enum ServerConnection {
    Stdio(Arc<StdioConnection>),
    Remote(RemoteEndpoint),
}

impl RunningServer {
    fn status(&self) -> ServerStatus {
        match &self.connection {
            ServerConnection::Stdio(conn) if conn.is_initialized() => ServerStatus::Initialized,
            _ => ServerStatus::Running,
        }
    }
}

type RunningTable = Arc<RwLock<HashMap<String, RunningServer>>>;

// ─── ServerOrchestrator ──────────────────────────────────────────────────────

/// Composes config storage, process supervision, and the call protocol into
/// the operation surface consumed by the UI layer.
pub struct ServerOrchestrator {
    store: Mutex<ConfigStore>,
    running: RunningTable,
    http: reqwest::Client,
    next_instance: AtomicU64,
}

impl ServerOrchestrator {
    /// Build an orchestrator over an already-loaded config store.
    pub fn new(store: ConfigStore) -> Self {
        Self {
            store: Mutex::new(store),
            running: Arc::new(RwLock::new(HashMap::new())),
            http: reqwest::Client::new(),
            next_instance: AtomicU64::new(1),
        }
    }

    /// Convenience constructor: load the store from the given path.
    pub fn with_config_path(path: impl Into<std::path::PathBuf>) -> Self {
        let mut store = ConfigStore::new(path);
        store.load();
        Self::new(store)
    }

    // ─── Definition Management ───────────────────────────────────────────

    /// Add a new server definition.
    pub async fn add_server(&self, def: ServerDefinition) -> Result<(), McpError> {
        self.store.lock().await.add(def)
    }

    /// Remove a definition, stopping the server first if it is running.
    pub async fn remove_server(&self, name: &str) -> Result<(), McpError> {
        {
            let store = self.store.lock().await;
            if !store.contains(name) {
                return Err(McpError::NotFound {
                    name: name.to_string(),
                });
            }
            if name == SYSTEM_SERVER_NAME {
                return Err(McpError::Protected {
                    name: name.to_string(),
                });
            }
        }

        // Force a stop before the definition disappears
        let _ = self.stop_server(name).await;
        self.store.lock().await.remove(name).map(|_| ())
    }

    /// Update a definition: full stop, patch, restart if it was running and
    /// is still enabled.
    pub async fn update_server(
        &self,
        name: &str,
        patch: ServerDefinitionPatch,
    ) -> Result<ServerDefinition, McpError> {
        let was_running = self.running.read().await.contains_key(name);
        if was_running {
            self.stop_server(name).await?;
        }

        let updated = self.store.lock().await.update(name, patch)?;

        if was_running && updated.enabled {
            self.start_server(name).await?;
        }
        Ok(updated)
    }

    /// All definitions with their live status. Self-healing read: the
    /// system-owned definition is re-synthesized if it went missing.
    pub async fn list_servers(&self) -> Vec<ServerListEntry> {
        let defs = {
            let mut store = self.store.lock().await;
            if store.ensure_system_server() {
                store.save();
            }
            store.all()
        };

        let running = self.running.read().await;
        defs.into_iter()
            .map(|def| {
                let status = running
                    .get(&def.name)
                    .map_or(ServerStatus::Stopped, RunningServer::status);
                ServerListEntry {
                    name: def.name.clone(),
                    definition: def,
                    status,
                }
            })
            .collect()
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Start a server by name.
    ///
    /// Remote transports are probed for reachability before the handle is
    /// recorded; stdio transports are spawned and handshake lazily on the
    /// first tool call.
    pub async fn start_server(&self, name: &str) -> Result<(), McpError> {
        let def = self
            .store
            .lock()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| McpError::NotFound {
                name: name.to_string(),
            })?;

        if self.running.read().await.contains_key(name) {
            return Err(McpError::AlreadyRunning {
                name: name.to_string(),
            });
        }

        let instance_id = self.next_instance.fetch_add(1, Ordering::Relaxed);
        let mut handle = match &def.transport {
            TransportConfig::Stdio { command, args, env } => {
                let running = Arc::clone(&self.running);
                let exit_name = name.to_string();
                let spawned = process::spawn_server(name, command, args, env, move || {
                    // Exited processes leave the running set immediately and
                    // are never resurrected automatically
                    tokio::spawn(remove_instance(running, exit_name, instance_id));
                })
                .await?;

                let conn = StdioConnection::new(name, spawned.stdout, spawned.stdin);
                RunningServer {
                    definition: def.clone(),
                    started_at: Utc::now(),
                    connection: ServerConnection::Stdio(Arc::new(conn)),
                    process: Some(spawned.process),
                    instance_id,
                }
            }
            TransportConfig::Remote { url, headers } => {
                let endpoint = RemoteEndpoint::new(self.http.clone(), url, headers.clone());
                endpoint.probe().await?;
                RunningServer {
                    definition: def.clone(),
                    started_at: Utc::now(),
                    connection: ServerConnection::Remote(endpoint),
                    process: None,
                    instance_id,
                }
            }
        };

        {
            let mut running = self.running.write().await;
            if running.contains_key(name) {
                // Lost a concurrent start race; tear the newcomer down
                if let Some(process) = handle.process.as_mut() {
                    process.stop();
                }
                return Err(McpError::AlreadyRunning {
                    name: name.to_string(),
                });
            }
            running.insert(name.to_string(), handle);
        }

        // A process that died during startup may have fired its exit callback
        // before the handle landed in the table; sweep it now
        let exited_early = {
            let running = self.running.read().await;
            running.get(name).is_some_and(|rs| {
                rs.instance_id == instance_id
                    && rs.process.as_ref().is_some_and(|p| p.exit_code().is_some())
            })
        };
        if exited_early {
            remove_instance(Arc::clone(&self.running), name.to_string(), instance_id).await;
        }

        tracing::info!(server = %name, transport = def.transport.kind(), "server started");
        Ok(())
    }

    /// Stop a server.
    ///
    /// For stdio this requests graceful-then-forced termination and returns
    /// immediately; in-flight calls resolve through their own deadlines.
    /// For remote transports it is local bookkeeping only.
    pub async fn stop_server(&self, name: &str) -> Result<(), McpError> {
        let mut handle = self
            .running
            .write()
            .await
            .remove(name)
            .ok_or_else(|| McpError::NotRunning {
                name: name.to_string(),
            })?;

        if let Some(process) = handle.process.as_mut() {
            process.stop();
        }
        tracing::info!(server = %name, "server stopped");
        Ok(())
    }

    /// Stop, settle, start.
    pub async fn restart_server(&self, name: &str) -> Result<(), McpError> {
        match self.stop_server(name).await {
            Ok(()) => {}
            Err(McpError::NotRunning { .. }) => {}
            Err(e) => return Err(e),
        }
        tokio::time::sleep(RESTART_SETTLE).await;
        self.start_server(name).await
    }

    /// Live status for one server.
    pub async fn server_status(&self, name: &str) -> Result<ServerStatusInfo, McpError> {
        let transport = self
            .store
            .lock()
            .await
            .get(name)
            .map(|def| def.transport.kind().to_string())
            .ok_or_else(|| McpError::NotFound {
                name: name.to_string(),
            })?;

        let running = self.running.read().await;
        Ok(match running.get(name) {
            Some(rs) => ServerStatusInfo {
                name: name.to_string(),
                transport,
                status: rs.status(),
                started_at: Some(rs.started_at),
                last_error: None,
            },
            None => ServerStatusInfo {
                name: name.to_string(),
                transport,
                status: ServerStatus::Stopped,
                started_at: None,
                last_error: None,
            },
        })
    }

    /// Start every enabled server, one outcome per attempt.
    ///
    /// A failing server never aborts the remaining attempts.
    pub async fn start_all_enabled(&self) -> Vec<BulkOutcome> {
        let names: Vec<String> = {
            let store = self.store.lock().await;
            store
                .all()
                .into_iter()
                .filter(|def| def.enabled)
                .map(|def| def.name)
                .collect()
        };

        let attempts = names.iter().map(|name| async move {
            match self.start_server(name).await {
                Ok(()) => BulkOutcome::ok(name),
                Err(e) => BulkOutcome::failed(name, e),
            }
        });
        futures::future::join_all(attempts).await
    }

    /// Stop every running server, one outcome per attempt.
    pub async fn stop_all(&self) -> Vec<BulkOutcome> {
        let names: Vec<String> = self.running.read().await.keys().cloned().collect();

        let mut outcomes = Vec::with_capacity(names.len());
        for name in names {
            outcomes.push(match self.stop_server(&name).await {
                Ok(()) => BulkOutcome::ok(&name),
                Err(e) => BulkOutcome::failed(&name, e),
            });
        }
        outcomes
    }

    /// Non-mutating connectivity check.
    ///
    /// Remote: reachability probe. Bundled stdio: file existence. System
    /// stdio command: a `--version` spawn probe.
    pub async fn test_server(&self, name: &str) -> Result<(), McpError> {
        let def = self
            .store
            .lock()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| McpError::NotFound {
                name: name.to_string(),
            })?;

        match &def.transport {
            TransportConfig::Remote { url, headers } => {
                RemoteEndpoint::new(self.http.clone(), url, headers.clone())
                    .probe()
                    .await
            }
            TransportConfig::Stdio { command, .. } if command == BUNDLED_SERVER_COMMAND => {
                paths::resolve(command).map(|_| ())
            }
            TransportConfig::Stdio { command, .. } => {
                if node_env::command_exists(command).await {
                    Ok(())
                } else {
                    Err(McpError::CommandNotFound {
                        command: command.clone(),
                    })
                }
            }
        }
    }

    // ─── Tool Calls ──────────────────────────────────────────────────────

    /// Route a tool call to its server.
    ///
    /// `tools/list` rides as a protocol-level method name; anything else is
    /// a `tools/call`. Stdio handles perform the handshake transparently,
    /// exactly once, before their first call.
    pub async fn execute_tool_call(
        &self,
        request: ToolCallRequest,
    ) -> Result<ToolCallOutcome, McpError> {
        let call_id = request
            .call_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let started = Instant::now();

        let (connection, transport) = {
            let running = self.running.read().await;
            let rs = running
                .get(&request.server)
                .ok_or_else(|| McpError::NotRunning {
                    name: request.server.clone(),
                })?;
            (
                rs.connection.clone(),
                rs.definition.transport.kind().to_string(),
            )
        };

        let (method, params) = if request.tool == "tools/list" {
            ("tools/list", json!({}))
        } else {
            (
                "tools/call",
                json!({ "name": request.tool, "arguments": request.args }),
            )
        };

        let result = match &connection {
            ServerConnection::Stdio(conn) => match conn.ensure_initialized().await {
                Ok(()) => conn.call(Some(call_id.clone()), method, params).await,
                Err(e) => Err(e),
            },
            ServerConnection::Remote(endpoint) => {
                endpoint.call(Some(call_id.clone()), method, params).await
            }
        };

        let metadata = CallMetadata {
            transport,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        Ok(match result {
            Ok(content) => ToolCallOutcome {
                call_id,
                success: true,
                content: Some(content),
                error: None,
                metadata,
            },
            Err(e) => {
                tracing::warn!(
                    server = %request.server,
                    tool = %request.tool,
                    error = %e,
                    "tool call failed"
                );
                ToolCallOutcome {
                    call_id,
                    success: false,
                    content: None,
                    error: Some(e.to_string()),
                    metadata,
                }
            }
        })
    }

    /// Discover the tools a running server advertises.
    pub async fn list_tools(&self, server: &str) -> Result<Vec<ToolDescriptor>, McpError> {
        let outcome = self
            .execute_tool_call(ToolCallRequest {
                server: server.to_string(),
                tool: "tools/list".to_string(),
                args: json!({}),
                call_id: None,
            })
            .await?;

        if !outcome.success {
            return Err(McpError::ServerError {
                message: outcome.error.unwrap_or_else(|| "tools/list failed".to_string()),
            });
        }

        let tools = outcome
            .content
            .and_then(|content| content.get("tools").cloned())
            .unwrap_or_else(|| json!([]));
        serde_json::from_value(tools).map_err(|e| McpError::ServerError {
            message: format!("invalid tools payload: {e}"),
        })
    }

    /// Node toolchain diagnostics (support shortcut).
    pub async fn diagnose_runtime(&self) -> RuntimeDiagnostics {
        node_env::diagnose().await
    }

    // ─── Running-State Snapshot ──────────────────────────────────────────

    /// Persist the set of currently running servers.
    pub async fn save_running_state(&self) {
        let mut names: Vec<String> = self.running.read().await.keys().cloned().collect();
        names.sort();
        self.store.lock().await.snapshot_running(names);
    }

    /// Start the servers recorded by the last snapshot.
    ///
    /// Names that no longer exist or are disabled are skipped silently;
    /// only actual attempts produce outcomes.
    pub async fn restore_previously_running(&self) -> Vec<BulkOutcome> {
        let to_start: Vec<String> = {
            let store = self.store.lock().await;
            store
                .last_running()
                .iter()
                .filter(|name| match store.get(name) {
                    Some(def) if def.enabled => true,
                    Some(_) => {
                        tracing::debug!(server = %name, "skipping restore of disabled server");
                        false
                    }
                    None => {
                        tracing::debug!(server = %name, "skipping restore of removed server");
                        false
                    }
                })
                .cloned()
                .collect()
        };

        let mut outcomes = Vec::with_capacity(to_start.len());
        for name in to_start {
            outcomes.push(match self.start_server(&name).await {
                Ok(()) => BulkOutcome::ok(&name),
                Err(e) => BulkOutcome::failed(&name, e),
            });
        }
        outcomes
    }

    // ─── External Import ─────────────────────────────────────────────────

    /// Import server definitions from an external tool-config file.
    ///
    /// Best-effort: entries whose names already exist are skipped, invalid
    /// entries are collected as failures, and one bad entry never aborts
    /// the rest.
    pub async fn import_from_external_config(
        &self,
        path: &Path,
    ) -> Result<ImportReport, McpError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| McpError::ConfigPersistence {
                reason: format!("cannot read {}: {e}", path.display()),
            })?;
        let external: ExternalConfigFile =
            serde_json::from_str(&content).map_err(|e| McpError::ConfigPersistence {
                reason: format!("cannot parse {}: {e}", path.display()),
            })?;

        let mut report = ImportReport::default();
        let mut store = self.store.lock().await;

        for (name, entry) in external.mcp_servers {
            if store.contains(&name) {
                tracing::debug!(server = %name, "import: name already exists, skipping");
                report.skipped += 1;
                continue;
            }

            let transport = match entry.into_transport() {
                Ok(transport) => transport,
                Err(reason) => {
                    report.failures.push(ImportFailure { name, reason });
                    continue;
                }
            };

            let def = ServerDefinition::new(&name, transport, "Imported server", true);
            match store.add(def) {
                Ok(()) => report.imported += 1,
                Err(e) => report.failures.push(ImportFailure {
                    name,
                    reason: e.to_string(),
                }),
            }
        }

        tracing::info!(
            imported = report.imported,
            skipped = report.skipped,
            failed = report.failures.len(),
            "external config import finished"
        );
        Ok(report)
    }
}

/// Remove a handle only if it still belongs to the given start instance.
async fn remove_instance(running: RunningTable, name: String, instance_id: u64) {
    let mut running = running.write().await;
    if running
        .get(&name)
        .is_some_and(|rs| rs.instance_id == instance_id)
    {
        running.remove(&name);
        tracing::info!(server = %name, "removed exited server from running set");
    }
}

// ─── External Config Format ──────────────────────────────────────────────────

/// Shape of the common external MCP config files (`mcpServers` keyed by
/// name, transport inferred from which fields are present).
#[derive(Debug, Deserialize)]
struct ExternalConfigFile {
    #[serde(default, rename = "mcpServers")]
    mcp_servers: BTreeMap<String, ExternalServerEntry>,
}

#[derive(Debug, Deserialize)]
struct ExternalServerEntry {
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    headers: HashMap<String, String>,
}

impl ExternalServerEntry {
    fn into_transport(self) -> Result<TransportConfig, String> {
        if let Some(url) = self.url {
            Ok(TransportConfig::Remote {
                url,
                headers: self.headers,
            })
        } else if let Some(command) = self.command {
            Ok(TransportConfig::Stdio {
                command,
                args: self.args,
                env: self.env,
            })
        } else {
            Err("entry has neither a command nor a url".to_string())
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn orchestrator_in(tmp: &TempDir) -> ServerOrchestrator {
        ServerOrchestrator::with_config_path(tmp.path().join("mcp_servers.json"))
    }

    fn stdio_def(name: &str, command: &str) -> ServerDefinition {
        ServerDefinition::new(
            name,
            TransportConfig::Stdio {
                command: command.to_string(),
                args: vec![],
                env: HashMap::new(),
            },
            "",
            true,
        )
    }

    fn remote_def(name: &str, url: &str) -> ServerDefinition {
        ServerDefinition::new(
            name,
            TransportConfig::Remote {
                url: url.to_string(),
                headers: HashMap::new(),
            },
            "",
            true,
        )
    }

    async fn disable_system_server(orch: &ServerOrchestrator) {
        orch.update_server(
            SYSTEM_SERVER_NAME,
            ServerDefinitionPatch {
                enabled: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_system_server_cannot_be_removed() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator_in(&tmp);

        let err = orch.remove_server(SYSTEM_SERVER_NAME).await.unwrap_err();
        assert!(matches!(err, McpError::Protected { .. }));

        // Still listed afterwards
        let listed = orch.list_servers().await;
        assert!(listed.iter().any(|entry| entry.name == SYSTEM_SERVER_NAME));
    }

    #[tokio::test]
    async fn test_remove_unknown_server() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator_in(&tmp);

        let err = orch.remove_server("ghost").await.unwrap_err();
        assert!(matches!(err, McpError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_start_unknown_server() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator_in(&tmp);

        let err = orch.start_server("ghost").await.unwrap_err();
        assert!(matches!(err, McpError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_start_missing_binary_is_command_not_found() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator_in(&tmp);

        orch.add_server(stdio_def("bad", "definitely-not-a-real-binary"))
            .await
            .unwrap();
        let err = orch.start_server("bad").await.unwrap_err();
        assert!(matches!(err, McpError::CommandNotFound { .. }));

        // Failed starts leave no handle behind
        let status = orch.server_status("bad").await.unwrap();
        assert_eq!(status.status, ServerStatus::Stopped);
    }

    #[tokio::test]
    async fn test_start_remote_closed_port_is_unreachable() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator_in(&tmp);

        orch.add_server(remote_def("web", "http://127.0.0.1:9/mcp"))
            .await
            .unwrap();
        let err = orch.start_server("web").await.unwrap_err();
        assert!(matches!(err, McpError::RemoteUnreachable { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_double_start_is_already_running() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator_in(&tmp);

        orch.add_server(stdio_def("cat", "cat")).await.unwrap();
        orch.start_server("cat").await.unwrap();

        let err = orch.start_server("cat").await.unwrap_err();
        assert!(matches!(err, McpError::AlreadyRunning { .. }));

        let status = orch.server_status("cat").await.unwrap();
        assert_eq!(status.status, ServerStatus::Running);
        assert!(status.started_at.is_some());

        orch.stop_server("cat").await.unwrap();
        let status = orch.server_status("cat").await.unwrap();
        assert_eq!(status.status, ServerStatus::Stopped);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_not_running() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator_in(&tmp);

        orch.add_server(stdio_def("cat", "cat")).await.unwrap();
        let err = orch.stop_server("cat").await.unwrap_err();
        assert!(matches!(err, McpError::NotRunning { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_crashed_server_leaves_running_set() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator_in(&tmp);

        orch.add_server(ServerDefinition::new(
            "oneshot",
            TransportConfig::Stdio {
                command: "sh".to_string(),
                args: vec!["-c".to_string(), "exit 0".to_string()],
                env: HashMap::new(),
            },
            "",
            true,
        ))
        .await
        .unwrap();

        orch.start_server("oneshot").await.unwrap();
        // Give the exit watcher a moment to sweep the handle
        tokio::time::sleep(Duration::from_millis(300)).await;

        let status = orch.server_status("oneshot").await.unwrap();
        assert_eq!(status.status, ServerStatus::Stopped);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_start_all_enabled_is_best_effort() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator_in(&tmp);
        disable_system_server(&orch).await;

        orch.add_server(stdio_def("a", "cat")).await.unwrap();
        orch.add_server(stdio_def("b", "cat")).await.unwrap();
        orch.add_server(stdio_def("broken", "definitely-not-a-real-binary"))
            .await
            .unwrap();

        let outcomes = orch.start_all_enabled().await;
        assert_eq!(outcomes.len(), 3);

        let succeeded = outcomes.iter().filter(|o| o.success).count();
        let failed: Vec<_> = outcomes.iter().filter(|o| !o.success).collect();
        assert_eq!(succeeded, 2);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].name, "broken");
        assert!(failed[0].error.is_some());

        let stopped = orch.stop_all().await;
        assert_eq!(stopped.len(), 2);
        assert!(stopped.iter().all(|o| o.success));
    }

    #[tokio::test]
    async fn test_start_all_skips_disabled() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator_in(&tmp);
        disable_system_server(&orch).await;

        let mut def = stdio_def("off", "definitely-not-a-real-binary");
        def.enabled = false;
        orch.add_server(def).await.unwrap();

        let outcomes = orch.start_all_enabled().await;
        assert!(outcomes.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_update_restarts_running_server() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator_in(&tmp);

        orch.add_server(stdio_def("cat", "cat")).await.unwrap();
        orch.start_server("cat").await.unwrap();

        let updated = orch
            .update_server(
                "cat",
                ServerDefinitionPatch {
                    description: Some("line echo".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.description, "line echo");

        // Still running, on a fresh handle
        let status = orch.server_status("cat").await.unwrap();
        assert_eq!(status.status, ServerStatus::Running);

        orch.stop_server("cat").await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_update_disabling_stops_without_restart() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator_in(&tmp);

        orch.add_server(stdio_def("cat", "cat")).await.unwrap();
        orch.start_server("cat").await.unwrap();

        orch.update_server(
            "cat",
            ServerDefinitionPatch {
                enabled: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let status = orch.server_status("cat").await.unwrap();
        assert_eq!(status.status, ServerStatus::Stopped);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_snapshot_and_restore_skip_vanished_and_disabled() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator_in(&tmp);
        disable_system_server(&orch).await;

        orch.add_server(stdio_def("keep", "cat")).await.unwrap();
        orch.add_server(stdio_def("drop", "cat")).await.unwrap();
        orch.add_server(stdio_def("off", "cat")).await.unwrap();

        orch.start_server("keep").await.unwrap();
        orch.start_server("drop").await.unwrap();
        orch.start_server("off").await.unwrap();
        orch.save_running_state().await;
        orch.stop_all().await;

        // One definition vanishes, one is disabled after the snapshot
        orch.remove_server("drop").await.unwrap();
        orch.update_server(
            "off",
            ServerDefinitionPatch {
                enabled: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let outcomes = orch.restore_previously_running().await;
        // Only the surviving enabled server is attempted; no error for the rest
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].name, "keep");
        assert!(outcomes[0].success);

        let status = orch.server_status("keep").await.unwrap();
        assert_eq!(status.status, ServerStatus::Running);
        orch.stop_all().await;
    }

    #[tokio::test]
    async fn test_execute_tool_call_requires_running_server() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator_in(&tmp);

        orch.add_server(stdio_def("idle", "cat")).await.unwrap();
        let err = orch
            .execute_tool_call(ToolCallRequest {
                server: "idle".to_string(),
                tool: "echo".to_string(),
                args: json!({}),
                call_id: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::NotRunning { .. }));
    }

    #[tokio::test]
    async fn test_import_external_config() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator_in(&tmp);

        // An existing definition to collide with
        orch.add_server(stdio_def("files", "npx")).await.unwrap();

        let external = tmp.path().join("claude_desktop_config.json");
        std::fs::write(
            &external,
            r#"{
                "mcpServers": {
                    "files": {"command": "npx", "args": ["-y", "@modelcontextprotocol/server-filesystem"]},
                    "memory": {"command": "npx", "args": ["-y", "@modelcontextprotocol/server-memory"]},
                    "web": {"url": "http://127.0.0.1:8123/mcp"},
                    "junk": {"args": ["no-command-or-url"]}
                }
            }"#,
        )
        .unwrap();

        let report = orch.import_from_external_config(&external).await.unwrap();
        assert_eq!(report.imported, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].name, "junk");

        let listed = orch.list_servers().await;
        assert!(listed.iter().any(|e| e.name == "memory"));
        assert!(listed.iter().any(|e| e.name == "web"));
    }

    #[tokio::test]
    async fn test_import_missing_file() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator_in(&tmp);

        let err = orch
            .import_from_external_config(&tmp.path().join("nope.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::ConfigPersistence { .. }));
    }

    #[tokio::test]
    async fn test_test_server_missing_command() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator_in(&tmp);

        orch.add_server(stdio_def("bad", "definitely-not-a-real-binary"))
            .await
            .unwrap();
        let err = orch.test_server("bad").await.unwrap_err();
        assert!(matches!(err, McpError::CommandNotFound { .. }));
    }

    #[tokio::test]
    async fn test_test_server_remote_closed_port() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator_in(&tmp);

        orch.add_server(remote_def("web", "http://127.0.0.1:9/mcp"))
            .await
            .unwrap();
        let err = orch.test_server("web").await.unwrap_err();
        assert!(matches!(err, McpError::RemoteUnreachable { .. }));
    }

    #[tokio::test]
    async fn test_system_server_test_reports_missing_bundle() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator_in(&tmp);

        // No bundled binary in the test tree: every candidate is reported
        let err = orch.test_server(SYSTEM_SERVER_NAME).await.unwrap_err();
        match err {
            McpError::ExecutableNotFound { attempted, .. } => assert!(!attempted.is_empty()),
            other => panic!("expected ExecutableNotFound, got {other:?}"),
        }
    }
}

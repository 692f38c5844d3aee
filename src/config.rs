//! Durable server configuration store.
//!
//! One JSON file holds every server definition plus the set of servers that
//! were running at the last snapshot:
//!
//! ```json
//! {
//!   "mcpServers": { "<name>": { "type": "stdio", ... } },
//!   "lastRunningServers": ["<name>"]
//! }
//! ```
//!
//! The in-memory map is authoritative between loads: a failed save is
//! logged and retried on the next mutation, never rolled back.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::errors::McpError;
use crate::paths::BUNDLED_SERVER_COMMAND;
use crate::types::{ServerDefinition, ServerDefinitionPatch, TransportConfig};

/// Name of the non-removable, application-owned server definition.
pub const SYSTEM_SERVER_NAME: &str = "deskpilot-core";

// ─── File Format ─────────────────────────────────────────────────────────────

/// On-disk shape of the config file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default, rename = "mcpServers")]
    mcp_servers: BTreeMap<String, ServerDefinition>,
    #[serde(default, rename = "lastRunningServers")]
    last_running_servers: Vec<String>,
}

// ─── ConfigStore ─────────────────────────────────────────────────────────────

/// In-memory view of the config file with explicit load/save.
pub struct ConfigStore {
    path: PathBuf,
    servers: BTreeMap<String, ServerDefinition>,
    last_running: Vec<String>,
}

impl ConfigStore {
    /// Create a store bound to a config file path. Call [`load`](Self::load)
    /// before first use.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            servers: BTreeMap::new(),
            last_running: Vec::new(),
        }
    }

    /// Store bound to the default location in the app data directory.
    pub fn at_default_location() -> Self {
        Self::new(crate::data_dir().join("mcp_servers.json"))
    }

    /// Load definitions from disk, tolerating a missing or corrupt file.
    ///
    /// Always self-heals the system-owned definition: after a successful
    /// load the store contains `deskpilot-core` even if the file predates
    /// it or someone edited it out by hand.
    pub fn load(&mut self) {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => match serde_json::from_str::<ConfigFile>(&content) {
                Ok(file) => {
                    self.servers = file.mcp_servers;
                    // Names live in the map keys; copy them into the entries
                    for (name, def) in &mut self.servers {
                        def.name.clone_from(name);
                    }
                    self.last_running = file.last_running_servers;
                    tracing::info!(
                        path = %self.path.display(),
                        servers = self.servers.len(),
                        "loaded server configuration"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        "failed to parse server configuration, starting empty"
                    );
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "no server configuration yet");
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "failed to read server configuration, starting empty"
                );
            }
        }

        self.ensure_system_server();
    }

    /// Insert the built-in server definition if it is missing.
    pub fn ensure_system_server(&mut self) -> bool {
        if self.servers.contains_key(SYSTEM_SERVER_NAME) {
            return false;
        }
        let def = ServerDefinition::new(
            SYSTEM_SERVER_NAME,
            TransportConfig::Stdio {
                command: BUNDLED_SERVER_COMMAND.to_string(),
                args: Vec::new(),
                env: HashMap::new(),
            },
            "Built-in tool server bundled with DeskPilot",
            true,
        );
        tracing::info!(name = SYSTEM_SERVER_NAME, "synthesized system server definition");
        self.servers.insert(SYSTEM_SERVER_NAME.to_string(), def);
        true
    }

    /// Write the store to disk (atomic tmp-file-then-rename).
    ///
    /// Persistence failures are logged and swallowed: the in-memory state
    /// stays authoritative until the next successful load.
    pub fn save(&self) {
        let file = ConfigFile {
            mcp_servers: self.servers.clone(),
            last_running_servers: self.last_running.clone(),
        };

        let content = match serde_json::to_string_pretty(&file) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize server configuration");
                return;
            }
        };

        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let tmp_path = self.path.with_extension("json.tmp");
        if let Err(e) = std::fs::write(&tmp_path, &content) {
            tracing::error!(error = %e, "failed to write server configuration temp file");
            return;
        }
        if let Err(e) = std::fs::rename(&tmp_path, &self.path) {
            tracing::error!(error = %e, "failed to rename server configuration file");
            return;
        }
        tracing::debug!(path = %self.path.display(), "saved server configuration");
    }

    // ─── Definition CRUD ─────────────────────────────────────────────────

    /// Add a new definition.
    pub fn add(&mut self, def: ServerDefinition) -> Result<(), McpError> {
        if self.servers.contains_key(&def.name) {
            return Err(McpError::AlreadyExists {
                name: def.name.clone(),
            });
        }
        def.transport
            .validate()
            .map_err(|reason| McpError::InvalidDefinition { reason })?;

        tracing::info!(name = %def.name, transport = def.transport.kind(), "added server");
        self.servers.insert(def.name.clone(), def);
        self.save();
        Ok(())
    }

    /// Remove a definition. The system-owned entry is protected.
    pub fn remove(&mut self, name: &str) -> Result<ServerDefinition, McpError> {
        if name == SYSTEM_SERVER_NAME {
            return Err(McpError::Protected {
                name: name.to_string(),
            });
        }
        let def = self.servers.remove(name).ok_or_else(|| McpError::NotFound {
            name: name.to_string(),
        })?;

        tracing::info!(name = %name, "removed server");
        self.save();
        Ok(def)
    }

    /// Apply a partial update, stamping `updated_at`.
    pub fn update(
        &mut self,
        name: &str,
        patch: ServerDefinitionPatch,
    ) -> Result<ServerDefinition, McpError> {
        let def = self
            .servers
            .get_mut(name)
            .ok_or_else(|| McpError::NotFound {
                name: name.to_string(),
            })?;

        if let Some(transport) = patch.transport {
            transport
                .validate()
                .map_err(|reason| McpError::InvalidDefinition { reason })?;
            def.transport = transport;
        }
        if let Some(description) = patch.description {
            def.description = description;
        }
        if let Some(enabled) = patch.enabled {
            def.enabled = enabled;
        }
        def.updated_at = Utc::now();

        let updated = def.clone();
        tracing::info!(name = %name, "updated server");
        self.save();
        Ok(updated)
    }

    /// Look up a single definition.
    pub fn get(&self, name: &str) -> Option<&ServerDefinition> {
        self.servers.get(name)
    }

    /// All definitions, in name order.
    pub fn all(&self) -> Vec<ServerDefinition> {
        self.servers.values().cloned().collect()
    }

    /// Whether any definition with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.servers.contains_key(name)
    }

    // ─── Running-State Snapshot ──────────────────────────────────────────

    /// Record which servers are currently running and persist.
    pub fn snapshot_running(&mut self, names: Vec<String>) {
        tracing::debug!(count = names.len(), "snapshotting running servers");
        self.last_running = names;
        self.save();
    }

    /// Names recorded by the last snapshot.
    pub fn last_running(&self) -> &[String] {
        &self.last_running
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

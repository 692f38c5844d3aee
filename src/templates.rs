//! Static catalog of well-known server templates.
//!
//! Offered by the UI as one-click definitions. Purely informational data;
//! nothing here is validated against live servers.

use std::collections::HashMap;

use serde::Serialize;

use crate::types::TransportConfig;

/// One catalog entry the UI can turn into a server definition.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTemplate {
    pub id: String,
    pub display_name: String,
    pub description: String,
    pub transport: TransportConfig,
}

/// The built-in template catalog.
pub fn builtin_templates() -> Vec<ServerTemplate> {
    vec![
        ServerTemplate {
            id: "filesystem".to_string(),
            display_name: "Filesystem".to_string(),
            description: "Read, write, and search files in a chosen directory.".to_string(),
            transport: TransportConfig::Stdio {
                command: "npx".to_string(),
                args: vec![
                    "-y".to_string(),
                    "@modelcontextprotocol/server-filesystem".to_string(),
                    "~".to_string(),
                ],
                env: HashMap::new(),
            },
        },
        ServerTemplate {
            id: "memory".to_string(),
            display_name: "Memory".to_string(),
            description: "Knowledge-graph memory persisted across conversations.".to_string(),
            transport: TransportConfig::Stdio {
                command: "npx".to_string(),
                args: vec![
                    "-y".to_string(),
                    "@modelcontextprotocol/server-memory".to_string(),
                ],
                env: HashMap::new(),
            },
        },
        ServerTemplate {
            id: "fetch".to_string(),
            display_name: "Web Fetch".to_string(),
            description: "Fetch web pages and convert them to model-friendly text.".to_string(),
            transport: TransportConfig::Stdio {
                command: "uvx".to_string(),
                args: vec!["mcp-server-fetch".to_string()],
                env: HashMap::new(),
            },
        },
        ServerTemplate {
            id: "remote-example".to_string(),
            display_name: "Remote server".to_string(),
            description: "Skeleton for an HTTP tool server; edit the URL before starting."
                .to_string(),
            transport: TransportConfig::Remote {
                url: "http://127.0.0.1:8123/mcp".to_string(),
                headers: HashMap::new(),
            },
        },
    ]
}

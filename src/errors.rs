//! Orchestrator error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by server management and tool-call operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// No server definition with this name exists.
    #[error("no server named '{name}'")]
    NotFound {
        name: String,
    },

    /// A definition with this name already exists.
    #[error("a server named '{name}' already exists")]
    AlreadyExists {
        name: String,
    },

    /// The server already has a running handle.
    #[error("server '{name}' is already running")]
    AlreadyRunning {
        name: String,
    },

    /// The operation requires a running handle and none exists.
    #[error("server '{name}' is not running")]
    NotRunning {
        name: String,
    },

    /// Attempted to delete the built-in system server.
    #[error("server '{name}' is managed by the application and cannot be removed")]
    Protected {
        name: String,
    },

    /// A definition is missing a required field for its transport.
    #[error("invalid server definition: {reason}")]
    InvalidDefinition {
        reason: String,
    },

    /// A system command could not be located.
    #[error("command not found: '{command}'")]
    CommandNotFound {
        command: String,
    },

    /// A bundled executable was not found at any candidate location.
    #[error("bundled executable '{identifier}' not found (tried {} locations)", attempted.len())]
    ExecutableNotFound {
        identifier: String,
        attempted: Vec<PathBuf>,
    },

    /// The OS rejected the spawn for a reason other than "not found".
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnError {
        name: String,
        reason: String,
    },

    /// The initialize request got no matching response in time.
    #[error("server '{server}' did not answer the initialize request in time")]
    HandshakeTimeout {
        server: String,
    },

    /// The initialize exchange failed outright.
    #[error("handshake with server '{server}' failed: {reason}")]
    HandshakeFailed {
        server: String,
        reason: String,
    },

    /// No matching response arrived before the call deadline.
    #[error("call '{method}' on server '{server}' timed out after {timeout_secs}s")]
    CallTimeout {
        server: String,
        method: String,
        timeout_secs: u64,
    },

    /// A remote endpoint could not be reached or answered non-2xx.
    #[error("remote server unreachable at {url}: {reason}")]
    RemoteUnreachable {
        url: String,
        reason: String,
    },

    /// The server answered with an envelope-level error.
    #[error("server error: {message}")]
    ServerError {
        message: String,
    },

    /// JSON-RPC communication failure (broken pipe, closed stream).
    #[error("transport error for server '{server}': {reason}")]
    Transport {
        server: String,
        reason: String,
    },

    /// The config file could not be written. Logged, never fatal.
    #[error("failed to persist configuration: {reason}")]
    ConfigPersistence {
        reason: String,
    },
}

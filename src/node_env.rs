//! Node.js environment composition for spawned tool servers.
//!
//! Desktop apps launched from a dock or installer inherit a minimal shell
//! environment, so `npx`-based servers routinely fail with "command not
//! found" even though Node is installed. This module builds an enriched
//! search path covering the common Node install locations (including a
//! best-effort nvm scan) and offers spawn-based existence probes for
//! support diagnostics.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::types::RuntimeDiagnostics;

/// How long a `--version` probe may run before we call the command missing.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

// ─── PATH Composition ────────────────────────────────────────────────────────

/// Platform PATH entry separator.
fn path_separator() -> char {
    if cfg!(windows) {
        ';'
    } else {
        ':'
    }
}

/// Well-known Node install directories for this platform.
///
/// Includes a scan of `~/.nvm/versions/node/`, taking the first version
/// found when several are installed.
fn well_known_node_dirs(home: Option<&Path>) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::new();

    #[cfg(target_os = "windows")]
    {
        dirs.push(PathBuf::from(r"C:\Program Files\nodejs"));
        if let Some(appdata) = std::env::var_os("APPDATA") {
            dirs.push(PathBuf::from(appdata).join("npm"));
        }
    }

    #[cfg(not(target_os = "windows"))]
    {
        dirs.push(PathBuf::from("/usr/local/bin"));
        dirs.push(PathBuf::from("/opt/homebrew/bin"));
        dirs.push(PathBuf::from("/usr/bin"));
    }

    if let Some(home) = home {
        dirs.push(home.join(".volta").join("bin"));
        if let Some(nvm_bin) = first_nvm_version_bin(home) {
            dirs.push(nvm_bin);
        }
    }

    dirs
}

/// Locate the bin directory of the first Node version under `~/.nvm`.
fn first_nvm_version_bin(home: &Path) -> Option<PathBuf> {
    let versions_dir = home.join(".nvm").join("versions").join("node");
    let entries = std::fs::read_dir(&versions_dir).ok()?;

    let mut versions: Vec<String> = entries
        .filter_map(Result::ok)
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    versions.sort();

    versions
        .first()
        .map(|version| versions_dir.join(version).join("bin"))
}

/// Concatenate the current PATH with existing well-known Node directories.
fn compose_from(current: &str, extra_dirs: Vec<PathBuf>) -> String {
    let sep = path_separator();
    let mut parts: Vec<String> = current
        .split(sep)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect();

    for dir in extra_dirs {
        if !dir.is_dir() {
            continue;
        }
        let dir = dir.to_string_lossy().to_string();
        if !parts.contains(&dir) {
            parts.push(dir);
        }
    }

    parts.join(&sep.to_string())
}

/// Build the enriched search path for child processes.
///
/// Pure function of the filesystem — no environment is mutated.
pub fn compose_path() -> String {
    let current = std::env::var("PATH").unwrap_or_default();
    let home = dirs::home_dir();
    compose_from(&current, well_known_node_dirs(home.as_deref()))
}

// ─── Existence Probes ────────────────────────────────────────────────────────

/// Check whether `name --version` runs and exits cleanly under the
/// composed PATH.
pub async fn command_exists(name: &str) -> bool {
    let mut cmd = Command::new(name);
    cmd.arg("--version")
        .env("PATH", compose_path())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    #[cfg(target_os = "windows")]
    {
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(_) => return false,
    };

    match tokio::time::timeout(PROBE_TIMEOUT, child.wait_with_output()).await {
        Ok(Ok(output)) => output.status.success(),
        _ => false,
    }
}

/// Probe the Node toolchain and produce remediation hints.
///
/// Support shortcut for diagnosing "server won't start" reports; nothing
/// here gates correctness.
pub async fn diagnose() -> RuntimeDiagnostics {
    let node_available = command_exists("node").await;
    let npm_available = command_exists("npm").await;
    let npx_available = command_exists("npx").await;

    let mut suggestions = Vec::new();
    if !node_available {
        suggestions.push(
            "Node.js was not found. Install it from https://nodejs.org or via your \
             package manager, then restart the app."
                .to_string(),
        );
    }
    if node_available && !npx_available {
        suggestions.push(
            "Node.js is present but npx is missing. Reinstall Node.js or run \
             `npm install -g npx`."
                .to_string(),
        );
    }
    if !npm_available && node_available {
        suggestions
            .push("npm was not found next to node; check your Node installation.".to_string());
    }

    tracing::info!(
        node = node_available,
        npm = npm_available,
        npx = npx_available,
        "node toolchain diagnostics"
    );

    RuntimeDiagnostics {
        node_available,
        npm_available,
        npx_available,
        suggestions,
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

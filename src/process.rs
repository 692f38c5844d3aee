//! Child-process supervision for stdio tool servers.
//!
//! Spawns a server with three piped byte streams, watches for exit, and
//! implements graceful-then-forced termination: a stop request sends the
//! polite signal, arms a grace timer, and only escalates to a hard kill if
//! the process outlives it. The stop call itself returns as soon as
//! termination has been requested — callers observe genuine exit through
//! the exit notification, not through `stop`.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, watch};

use crate::errors::McpError;
use crate::node_env;
use crate::paths;

// ─── Constants ───────────────────────────────────────────────────────────────

/// How long a stopped process gets to exit before it is killed outright.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Interpreter commands verified with a `--version` probe before spawning.
///
/// These are the pass-through commands users most often reference without
/// having the runtime installed; probing first turns an opaque OS spawn
/// error into a clear "command not found".
const INTERPRETER_COMMANDS: &[&str] = &["node", "npx", "npm", "uvx"];

// ─── SpawnedProcess ──────────────────────────────────────────────────────────

/// Control handle for a supervised server process.
///
/// Dropping the handle without calling [`stop`](Self::stop) also initiates
/// termination: the supervision task treats a vanished control handle as a
/// stop request.
#[derive(Debug)]
pub struct SpawnedProcess {
    pid: Option<u32>,
    term_tx: Option<oneshot::Sender<()>>,
    exit_rx: watch::Receiver<Option<i32>>,
}

impl SpawnedProcess {
    /// OS process id, while known.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Request termination. Returns immediately; the supervision task
    /// escalates from graceful to forced after the grace period.
    pub fn stop(&mut self) {
        if let Some(tx) = self.term_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Exit code if the process has already terminated.
    ///
    /// Signal-terminated processes report `-1`.
    pub fn exit_code(&self) -> Option<i32> {
        *self.exit_rx.borrow()
    }

    /// Wait until the process exits and return its code.
    pub async fn wait_for_exit(&self) -> Option<i32> {
        let mut rx = self.exit_rx.clone();
        loop {
            if let Some(code) = *rx.borrow() {
                return Some(code);
            }
            if rx.changed().await.is_err() {
                return *rx.borrow();
            }
        }
    }
}

/// A freshly spawned server: the control handle plus its protocol streams.
#[derive(Debug)]
pub struct SpawnedServer {
    pub process: SpawnedProcess,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
}

// ─── Spawning ────────────────────────────────────────────────────────────────

/// Whether a pass-through command gets the pre-spawn existence probe.
fn is_probed_interpreter(command: &str) -> bool {
    INTERPRETER_COMMANDS.contains(&command)
}

/// Spawn a stdio server process.
///
/// The executable is resolved through the bundled-path resolver, the child
/// gets the Node-enriched search path merged under the definition's own
/// environment (definition entries win), and `on_exit` fires exactly once
/// when the process terminates for any reason.
pub async fn spawn_server(
    name: &str,
    command: &str,
    args: &[String],
    env: &HashMap<String, String>,
    on_exit: impl FnOnce() + Send + 'static,
) -> Result<SpawnedServer, McpError> {
    let resolved = paths::resolve(command)?;

    // Fail fast on missing interpreters instead of surfacing an OS error
    // from deep inside the spawn path
    if resolved.pass_through && is_probed_interpreter(command) {
        if !node_env::command_exists(command).await {
            return Err(McpError::CommandNotFound {
                command: command.to_string(),
            });
        }
    }

    let mut cmd = Command::new(&resolved.program);
    cmd.args(args)
        .env("PATH", node_env::compose_path())
        .envs(env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    // Windows: prevent a console window from flashing up for child processes
    #[cfg(target_os = "windows")]
    {
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    let mut child = cmd.spawn().map_err(|e| {
        // Only "not found" maps to CommandNotFound; permission and other
        // spawn failures keep the OS message (see DESIGN.md)
        if e.kind() == std::io::ErrorKind::NotFound {
            McpError::CommandNotFound {
                command: command.to_string(),
            }
        } else {
            McpError::SpawnError {
                name: name.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    let pid = child.id();
    tracing::info!(server = %name, program = %resolved.program, pid = ?pid, "spawned server process");

    let stdin = child.stdin.take().ok_or_else(|| McpError::SpawnError {
        name: name.to_string(),
        reason: "failed to capture stdin".to_string(),
    })?;
    let stdout = child.stdout.take().ok_or_else(|| McpError::SpawnError {
        name: name.to_string(),
        reason: "failed to capture stdout".to_string(),
    })?;

    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(drain_stderr(name.to_string(), stderr));
    }

    let (term_tx, term_rx) = oneshot::channel();
    let (exit_tx, exit_rx) = watch::channel(None);
    tokio::spawn(supervise(name.to_string(), child, term_rx, exit_tx, on_exit));

    Ok(SpawnedServer {
        process: SpawnedProcess {
            pid,
            term_tx: Some(term_tx),
            exit_rx,
        },
        stdin,
        stdout,
    })
}

// ─── Supervision ─────────────────────────────────────────────────────────────

/// Own the child until it exits, honoring stop requests along the way.
async fn supervise(
    name: String,
    mut child: Child,
    mut term_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<Option<i32>>,
    on_exit: impl FnOnce() + Send,
) {
    let status = tokio::select! {
        status = child.wait() => status.ok(),
        // Resolves on stop() and when the control handle is dropped
        _ = &mut term_rx => {
            request_graceful_stop(&mut child);
            match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(status) => status.ok(),
                Err(_) => {
                    tracing::warn!(server = %name, "graceful stop timed out, killing");
                    let _ = child.kill().await;
                    child.wait().await.ok()
                }
            }
        }
    };

    let code = status.and_then(|s| s.code()).unwrap_or(-1);
    tracing::info!(server = %name, code, "server process exited");
    let _ = exit_tx.send(Some(code));
    on_exit();
}

/// Send the polite termination signal.
#[cfg(unix)]
fn request_graceful_stop(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
    }
}

/// Windows has no SIGTERM equivalent for console-less children; go straight
/// to termination and let the grace timer absorb slow exits.
#[cfg(not(unix))]
fn request_graceful_stop(child: &mut Child) {
    let _ = child.start_kill();
}

/// Forward child stderr lines into the structured log.
async fn drain_stderr(name: String, stderr: tokio::process::ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(server = %name, line = %line, "server stderr");
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_spawn_nonexistent_command_not_found() {
        let err = spawn_server(
            "ghost",
            "definitely-not-a-real-binary",
            &[],
            &HashMap::new(),
            || {},
        )
        .await
        .unwrap_err();
        assert!(matches!(err, McpError::CommandNotFound { .. }));
    }

    #[test]
    fn test_interpreter_probe_list() {
        assert!(is_probed_interpreter("npx"));
        assert!(is_probed_interpreter("node"));
        assert!(!is_probed_interpreter("cat"));
        assert!(!is_probed_interpreter("/usr/bin/python3"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_terminates_and_fires_on_exit() {
        let exited = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&exited);

        // `cat` with a piped stdin blocks forever until signalled
        let mut spawned = spawn_server("cat", "cat", &[], &HashMap::new(), move || {
            flag.store(true, Ordering::SeqCst);
        })
        .await
        .unwrap();

        assert!(spawned.process.pid().is_some());
        assert!(spawned.process.exit_code().is_none());

        spawned.process.stop();
        let code = spawned.process.wait_for_exit().await;
        // SIGTERM exit has no code; the supervisor reports -1
        assert_eq!(code, Some(-1));
        assert!(exited.load(Ordering::SeqCst));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_natural_exit_fires_on_exit() {
        let exited = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&exited);

        let spawned = spawn_server(
            "true",
            "sh",
            &["-c".to_string(), "exit 0".to_string()],
            &HashMap::new(),
            move || {
                flag.store(true, Ordering::SeqCst);
            },
        )
        .await
        .unwrap();

        let code = spawned.process.wait_for_exit().await;
        assert_eq!(code, Some(0));
        assert!(exited.load(Ordering::SeqCst));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_definition_env_reaches_child() {
        use tokio::io::AsyncReadExt;

        let mut env = HashMap::new();
        env.insert("MARKER".to_string(), "hello-from-env".to_string());

        let mut spawned = spawn_server(
            "env-echo",
            "sh",
            &["-c".to_string(), "printf '%s' \"$MARKER\"".to_string()],
            &env,
            || {},
        )
        .await
        .unwrap();

        let mut output = String::new();
        spawned.stdout.read_to_string(&mut output).await.unwrap();
        assert_eq!(output, "hello-from-env");
    }
}

//! Bundled-executable path resolution.
//!
//! The built-in tool server ships as a platform-specific binary inside the
//! packaged application. Definitions refer to it by the abstract identifier
//! [`BUNDLED_SERVER_COMMAND`]; this module maps that identifier to a concrete
//! file by probing an ordered list of candidate directories spanning the
//! packaged resource layout and the development tree. Any other command is
//! passed through untouched so arbitrary system executables keep working.

use std::path::{Path, PathBuf};

use crate::errors::McpError;

/// Abstract identifier for the bundled tool-server binary.
pub const BUNDLED_SERVER_COMMAND: &str = "deskpilot-mcp-server";

// ─── File Probe ──────────────────────────────────────────────────────────────

/// File-existence probe, injectable so tests can fake the filesystem.
pub trait FileProbe {
    fn is_file(&self, path: &Path) -> bool;
}

/// Production probe backed by the real filesystem.
pub struct SystemProbe;

impl FileProbe for SystemProbe {
    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }
}

// ─── Resolution ──────────────────────────────────────────────────────────────

/// Outcome of resolving a command identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCommand {
    /// Concrete program to hand to the process spawner.
    pub program: String,
    /// True when the identifier was returned unchanged (system command).
    pub pass_through: bool,
}

/// Platform/architecture-specific filename of the bundled binary.
#[cfg(target_os = "windows")]
pub fn platform_binary_name() -> &'static str {
    "deskpilot-mcp-win.exe"
}

#[cfg(all(target_os = "macos", target_arch = "aarch64"))]
pub fn platform_binary_name() -> &'static str {
    "deskpilot-mcp-mac-arm64"
}

#[cfg(all(target_os = "macos", not(target_arch = "aarch64")))]
pub fn platform_binary_name() -> &'static str {
    "deskpilot-mcp-mac"
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
pub fn platform_binary_name() -> &'static str {
    "deskpilot-mcp-linux"
}

/// Ordered candidate directories for the bundled binary.
///
/// Packaged locations come first, development-tree locations last, so an
/// installed build never accidentally picks up a stale dev artifact.
pub fn candidate_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    if let Ok(exe) = std::env::current_exe() {
        if let Some(exe_dir) = exe.parent() {
            dirs.push(exe_dir.join("resources").join("bin"));
            // macOS app bundles keep resources beside the MacOS/ directory
            #[cfg(target_os = "macos")]
            dirs.push(exe_dir.join("..").join("Resources").join("bin"));
        }
    }

    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd.join("resources").join("bin"));
        dirs.push(cwd.join("dist").join("bin"));
    }

    dirs
}

/// Resolve a command identifier to a spawnable program path.
///
/// Bundled identifiers are searched across [`candidate_dirs`]; everything
/// else passes through unchanged.
pub fn resolve(identifier: &str) -> Result<ResolvedCommand, McpError> {
    resolve_with(identifier, &candidate_dirs(), &SystemProbe)
}

/// Resolution with injected candidates and probe (for tests).
pub fn resolve_with(
    identifier: &str,
    candidates: &[PathBuf],
    probe: &dyn FileProbe,
) -> Result<ResolvedCommand, McpError> {
    if identifier != BUNDLED_SERVER_COMMAND {
        return Ok(ResolvedCommand {
            program: identifier.to_string(),
            pass_through: true,
        });
    }

    let binary = platform_binary_name();
    let mut attempted = Vec::with_capacity(candidates.len());

    for dir in candidates {
        let candidate = dir.join(binary);
        if probe.is_file(&candidate) {
            tracing::debug!(path = %candidate.display(), "resolved bundled server binary");
            return Ok(ResolvedCommand {
                program: candidate.to_string_lossy().to_string(),
                pass_through: false,
            });
        }
        attempted.push(candidate);
    }

    Err(McpError::ExecutableNotFound {
        identifier: identifier.to_string(),
        attempted,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    /// Fake filesystem: a set of paths that "exist".
    struct FakeProbe {
        files: HashSet<PathBuf>,
    }

    impl FakeProbe {
        fn new() -> Self {
            Self {
                files: HashSet::new(),
            }
        }

        fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
            self.files.insert(path.into());
            self
        }
    }

    impl FileProbe for FakeProbe {
        fn is_file(&self, path: &Path) -> bool {
            self.files.contains(path)
        }
    }

    #[test]
    fn test_non_bundled_command_passes_through() {
        let probe = FakeProbe::new();
        let resolved = resolve_with("npx", &[], &probe).unwrap();
        assert_eq!(resolved.program, "npx");
        assert!(resolved.pass_through);
    }

    #[test]
    fn test_absolute_path_passes_through() {
        let probe = FakeProbe::new();
        let resolved = resolve_with("/usr/local/bin/deno", &[], &probe).unwrap();
        assert_eq!(resolved.program, "/usr/local/bin/deno");
        assert!(resolved.pass_through);
    }

    #[test]
    fn test_bundled_first_match_wins() {
        let packaged = PathBuf::from("/app/resources/bin");
        let dev = PathBuf::from("/work/resources/bin");
        let probe = FakeProbe::new()
            .with_file(packaged.join(platform_binary_name()))
            .with_file(dev.join(platform_binary_name()));

        let resolved = resolve_with(
            BUNDLED_SERVER_COMMAND,
            &[packaged.clone(), dev],
            &probe,
        )
        .unwrap();

        assert!(!resolved.pass_through);
        assert_eq!(
            PathBuf::from(&resolved.program),
            packaged.join(platform_binary_name())
        );
    }

    #[test]
    fn test_bundled_falls_through_to_later_candidate() {
        let packaged = PathBuf::from("/app/resources/bin");
        let dev = PathBuf::from("/work/dist/bin");
        let probe = FakeProbe::new().with_file(dev.join(platform_binary_name()));

        let resolved =
            resolve_with(BUNDLED_SERVER_COMMAND, &[packaged, dev.clone()], &probe).unwrap();

        assert_eq!(
            PathBuf::from(&resolved.program),
            dev.join(platform_binary_name())
        );
    }

    #[test]
    fn test_bundled_not_found_reports_every_attempt() {
        let candidates = vec![
            PathBuf::from("/app/resources/bin"),
            PathBuf::from("/work/resources/bin"),
            PathBuf::from("/work/dist/bin"),
        ];
        let probe = FakeProbe::new();

        let err = resolve_with(BUNDLED_SERVER_COMMAND, &candidates, &probe).unwrap_err();
        match err {
            McpError::ExecutableNotFound {
                identifier,
                attempted,
            } => {
                assert_eq!(identifier, BUNDLED_SERVER_COMMAND);
                assert_eq!(attempted.len(), 3);
                assert!(attempted
                    .iter()
                    .all(|p| p.ends_with(platform_binary_name())));
            }
            other => panic!("expected ExecutableNotFound, got {other:?}"),
        }
    }
}

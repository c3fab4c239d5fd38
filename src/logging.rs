//! Logging setup for querydesk.
//!
//! Query results go to stdout, so diagnostics go to stderr or, with
//! `--log-file`, to a file in the platform state directory.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset. sqlx logs every statement at info
/// level, which would echo each submitted query back.
const DEFAULT_FILTER: &str = "info,sqlx=warn";

/// Where log lines are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    File,
}

impl LogTarget {
    /// Maps the `--log-file` flag to a target.
    pub fn from_flag(log_file: bool) -> Self {
        if log_file {
            Self::File
        } else {
            Self::Stderr
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs the global subscriber for `target`.
///
/// Returns the log file path when logging to a file. If the file cannot be
/// opened, logging falls back to stderr and `None` is returned.
pub fn init(target: LogTarget) -> Option<PathBuf> {
    match target {
        LogTarget::Stderr => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_writer(io::stderr)
                .init();
            None
        }
        LogTarget::File => {
            let path = get_log_path();
            match open_log_file(&path) {
                Ok(file) => {
                    tracing_subscriber::fmt()
                        .with_env_filter(env_filter())
                        .with_writer(file)
                        .with_ansi(false)
                        .init();
                    Some(path)
                }
                Err(e) => {
                    eprintln!(
                        "Warning: Could not open log file {}: {e}; logging to stderr",
                        path.display()
                    );
                    init(LogTarget::Stderr)
                }
            }
        }
    }
}

/// Creates the parent directory and truncates the file, so each run starts
/// with an empty log.
fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    File::create(path)
}

/// Returns the path for the log file: the XDG state directory on Linux, the
/// config directory elsewhere, the temp directory as a last resort.
pub fn get_log_path() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::config_dir)
        .map(|dir| dir.join("querydesk").join("querydesk.log"))
        .unwrap_or_else(|| std::env::temp_dir().join("querydesk.log"))
}

use std::path::PathBuf;

use thiserror::Error;

/// Errors that end a run before or outside of per-host dispatch.
#[derive(Error, Debug)]
pub enum GshError {
    #[error("Invalid configuration ({}): {message}", path.display())]
    Config { path: PathBuf, message: String },
    #[error(transparent)]
    Loader(#[from] LoaderError),
    #[error("No hosts to run the command on")]
    NoHosts,
    #[error("Engine task failed: {0}")]
    Engine(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Malformed host loader input. Always fatal at startup.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("[{loader}] Invalid host name '{value}'")]
    InvalidHost { loader: &'static str, value: String },
    #[error("[range] Invalid range expression '{expr}': {reason}")]
    InvalidRange { expr: String, reason: String },
    #[error("[file] {}: {reason}", path.display())]
    HostFile { path: PathBuf, reason: String },
}

/// Failure of the remote execution primitive itself, as opposed to the command
/// exiting with a non-zero status.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to start remote command: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("Lost connection to remote command: {0}")]
    Io(#[from] std::io::Error),
    #[error("Host unreachable: {0}")]
    Unreachable(String),
}

/// Error returned by a hook callback. Logged and otherwise ignored.
#[derive(Error, Debug)]
pub enum HookError {
    #[error("Failed to write hook output: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Message(String),
}

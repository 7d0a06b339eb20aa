//! Error types for the launcher core.
//!
//! Two families exist. [`LauncherError`] covers everything the supervisor and
//! the file-backed collaborators can report to the control surface.
//! [`TransportError`] covers remote-console failures and never travels past
//! [`RemoteConsoleClient::run_command`](crate::console::RemoteConsoleClient::run_command),
//! where it is flattened into the error sentinel string.

use std::io::Error as IoError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by supervisor operations and local storage.
#[derive(Debug, Error)]
pub enum LauncherError {
    /// Bad paths or configuration. The operation is aborted, nothing changes.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Server is already running")]
    AlreadyRunning,

    #[error("Server is not running")]
    NotRunning,

    /// The world data is held by another server instance.
    #[error("Resource is locked by another instance: {}", .0.display())]
    ResourceLocked(PathBuf),

    #[error("Failed to spawn server process: {0}")]
    Spawn(IoError),

    #[error("Failed to write to server input: {0}")]
    CommandWrite(IoError),

    #[error("I/O error on {0}: {1}")]
    Io(PathBuf, IoError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Archive error on {0}: {1}")]
    Archive(PathBuf, String),
}

/// Remote-console transport failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection to {0} failed: {1}")]
    Connect(String, String),

    #[error("console rejected the password")]
    Auth,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("console password is not configured")]
    MissingPassword,
}

pub type LauncherResult<T> = Result<T, LauncherError>;
pub type TransportResult<T> = Result<T, TransportError>;

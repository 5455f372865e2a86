use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid config for '{name}': {reason}")]
    Invalid { name: String, reason: String },

    #[error("'{0}' is configured more than once")]
    Duplicate(String),
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("marker {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("marker {path} holds unparseable value '{value}'")]
    Corrupt { path: PathBuf, value: String },
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("map '{0}' not found")]
    NotFound(String),

    #[error("failed to start map '{name}': {source}")]
    Spawn { name: String, source: io::Error },

    #[error("shutting down map '{name}' failed: {source}")]
    Shutdown { name: String, source: RconError },

    #[error(transparent)]
    State(#[from] StateError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("no backup configuration found for map '{0}'")]
    NotConfigured(String),

    #[error("no running backup schedule for map '{0}'")]
    NotScheduled(String),

    #[error("backup I/O on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("archive {path}: {source}")]
    Archive {
        path: PathBuf,
        source: zip::result::ZipError,
    },

    #[error("archive entry '{0}' escapes the source directory")]
    UnsafeEntry(String),

    #[error("backup task failed: {0}")]
    Task(String),

    #[error(transparent)]
    State(#[from] StateError),
}

#[derive(Debug, Error)]
pub enum RconError {
    #[error("no rcon endpoint configured for map '{0}'")]
    NotConfigured(String),

    #[error("rcon connection to {addr} failed: {source}")]
    Connect { addr: String, source: io::Error },

    #[error("rcon I/O: {0}")]
    Io(#[from] io::Error),

    #[error("rcon authentication rejected")]
    AuthRejected,

    #[error("rcon request timed out")]
    Timeout,

    #[error("malformed rcon packet: {0}")]
    Protocol(String),
}

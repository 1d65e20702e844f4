//! Error types for the process pool.

use std::io;
use thiserror::Error;

/// Why a write to a process's stdin failed.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The input pipe was never opened or has already been closed.
    #[error("process has no stdin channel")]
    NoStdin,

    /// The process is known to have exited.
    #[error("process has already exited")]
    Exited,

    /// The OS rejected the write (e.g. broken pipe).
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Errors returned by pool and process operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Spawn rejected because the pool is full.
    #[error("pool is at capacity ({current}/{max} processes)")]
    Capacity { max: usize, current: usize },

    /// No process with this id is registered.
    #[error("no process registered with id '{id}'")]
    NotFound { id: String },

    /// A process with this id is already registered.
    #[error("a process with id '{id}' is already registered")]
    AlreadyExists { id: String },

    /// The OS failed to start the process.
    #[error("failed to launch '{command}' for process '{id}': {source}")]
    Launch {
        id: String,
        command: String,
        #[source]
        source: io::Error,
    },

    /// Delivering a termination signal failed.
    #[error("failed to signal process '{id}': {source}")]
    Signal {
        id: String,
        #[source]
        source: io::Error,
    },

    /// Writing to the process's stdin failed.
    #[error("failed to write to process '{id}': {source}")]
    Write {
        id: String,
        #[source]
        source: WriteError,
    },

    /// Reading from an output channel failed.
    #[error("output stream failed: {source}")]
    Stream {
        #[source]
        source: io::Error,
    },

    /// The pool has been shut down and accepts no new processes.
    #[error("pool has been shut down")]
    Closed,

    /// The pool configuration is unusable.
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
}

impl PoolError {
    pub(crate) fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    pub(crate) fn write(id: impl Into<String>, source: impl Into<WriteError>) -> Self {
        Self::Write {
            id: id.into(),
            source: source.into(),
        }
    }
}

/// Result type for pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;

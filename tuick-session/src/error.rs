use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the session runtime: runner, control endpoint, drivers.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("format error: {0}")]
    Format(#[from] tuick_format::FormatError),

    #[error("block error: {0}")]
    Block(#[from] tuick_core::BlockError),

    #[error("watcher error: {0}")]
    Notify(#[from] notify::Error),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("checker not found: {program}")]
    CheckerNotFound { program: String },

    #[error("finder not found: {program}")]
    FinderNotFound { program: String },

    #[error("control protocol error: {0}")]
    Protocol(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SessionError {
    SessionError::Io {
        path: path.into(),
        source,
    }
}

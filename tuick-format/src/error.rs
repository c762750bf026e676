//! Error types for tuick-format.

use thiserror::Error;

/// All errors that can arise from recipe selection and block parsing.
#[derive(Debug, Error)]
pub enum FormatError {
    /// No recipe was given and the checker command matches no known tool.
    #[error(
        "cannot detect a tool recipe for '{program}'; \
         pass -f <name> or -e <pattern>"
    )]
    ToolNotDetected { program: String },

    /// A recipe pattern failed to compile.
    #[error("invalid errorformat pattern {pattern:?}: {message}")]
    Pattern { pattern: String, message: String },

    /// The external `errorformat` helper is not on PATH.
    #[error(
        "errorformat not found. Install with:\n  \
         go install github.com/reviewdog/errorformat/cmd/errorformat@latest"
    )]
    HelperNotFound,

    /// The external helper exited with a failure status.
    #[error("errorformat helper failed with status {code:?}")]
    HelperFailed { code: Option<i32> },

    /// Underlying I/O failure while driving the helper.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSONL entry from the helper.
    #[error("helper output error: {0}")]
    Json(#[from] serde_json::Error),

    /// A channel endpoint hung up mid-stream.
    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),
}

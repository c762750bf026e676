//! Error types for tuick-core.

use thiserror::Error;

/// All errors that can arise from encoding or decoding block records.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlockError {
    /// `content` contains a wire delimiter byte (`0x1F` or `0x00`).
    #[error("block content contains reserved delimiter byte 0x{byte:02x}")]
    Delimiter { byte: u8 },

    /// A block must carry at least one byte of content.
    #[error("block content is empty")]
    EmptyContent,

    /// Location fields are only meaningful with a file name.
    #[error("block has location fields but no file name")]
    LocationWithoutFile,

    /// A numeric location field failed to parse during decode.
    #[error("invalid {field} field: {value:?}")]
    InvalidField { field: &'static str, value: String },
}

/// Errors from building an editor launch command.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EditorError {
    /// Neither `$VISUAL` nor `$EDITOR` is set to a non-empty value.
    #[error("no editor configured; set the EDITOR environment variable")]
    NotConfigured,

    /// The editor variable could not be split into a command.
    #[error("cannot parse editor command {value:?}")]
    InvalidCommand { value: String },
}

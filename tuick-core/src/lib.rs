//! Tuick core library — block records, wire serialisation, editor launch.
//!
//! Public API surface:
//! - [`block`] — [`Block`], [`Location`], the `0x1F`/`0x00` wire format
//! - [`editor`] — jump-to-location command construction
//! - [`error`] — [`BlockError`], [`EditorError`]

pub mod block;
pub mod editor;
pub mod error;

pub use block::{Block, Location, FIELD_SEP, RECORD_SEP};
pub use editor::{editor_from_env, goto_command, EditorCommand, EditorKind};
pub use error::{BlockError, EditorError};

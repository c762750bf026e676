//! Tuick errorformat adapter — checker output in, block records out.
//!
//! Public API surface:
//! - [`registry`] — built-in tool recipes, auto-detection, [`Recipe`]
//! - [`pattern`] — the Vim-errorformat subset compiler
//! - [`adapter`] — the native streaming [`Parser`] and channel drivers
//! - [`helper`] — the external `errorformat -w=jsonl` engine
//! - [`error`] — [`FormatError`]
//!
//! Both engines consume a channel of raw (possibly ANSI-coloured) checker
//! lines and emit [`tuick_core::Block`] records with back-pressure.

pub mod adapter;
pub mod ansi;
pub mod error;
pub mod helper;
pub mod pattern;
pub mod registry;

use tokio::sync::mpsc;
use tuick_core::Block;

pub use adapter::Parser;
pub use error::FormatError;
pub use registry::{builtin, detect_tool, is_known_tool, resolve, Recipe};

/// Which parsing engine turns checker lines into blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Engine {
    /// The built-in errorformat subset parser.
    #[default]
    Native,
    /// The external reviewdog `errorformat` binary.
    Helper,
}

impl Engine {
    /// Engine selection from the environment: `TUICK_ERRORFORMAT=helper`
    /// switches to the external binary.
    pub fn from_env() -> Self {
        match std::env::var("TUICK_ERRORFORMAT").as_deref() {
            Ok("helper") => Self::Helper,
            _ => Self::Native,
        }
    }
}

/// Stream checker lines through the chosen engine.
pub async fn stream_lines(
    engine: Engine,
    recipe: &Recipe,
    lines: mpsc::Receiver<String>,
    blocks: mpsc::Sender<Block>,
) -> Result<(), FormatError> {
    match engine {
        Engine::Native => adapter::stream_lines(recipe, lines, blocks).await,
        Engine::Helper => helper::stream_lines(recipe, lines, blocks).await,
    }
}

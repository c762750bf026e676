//! Tuick session runtime: the orchestration core.
//!
//! - [`session`] — the composing state machine ([`SessionOptions`], [`run`])
//! - [`runner`] — checker child processes, one per generation
//! - [`control`] — the loopback reload endpoint and its client
//! - [`finder`] — the fzf driver and the block-stream writer
//! - [`watcher`] — file-change reload source (watchexec, notify fallback)
//! - [`save`] — the raw-output save file
//! - [`token`] — per-session reload secret

pub mod control;
mod error;
pub mod finder;
pub mod runner;
pub mod save;
pub mod session;
pub mod token;
pub mod watcher;

pub use control::{post_reload, post_reload_from_env, RELOAD_KEY_ENV, RELOAD_PORT_ENV};
pub use error::SessionError;
pub use finder::FinderCallbacks;
pub use session::{run, start_blocking, SessionOptions, LOG_FILE_ENV};
pub use token::ReloadToken;

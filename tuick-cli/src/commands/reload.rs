//! `tuick --reload` — the callback behind the manual-reload binding and the
//! watcher. Posts an authenticated reload to the session's control endpoint
//! (coordinates come from the environment), then optionally behaves like
//! `--format` for callers that consume the new stream directly.

use anyhow::{Context, Result};

use tuick_session::post_reload_from_env;

pub fn run(command: &[String], recipe_flag: &str, patterns: &[String]) -> Result<i32> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("tokio runtime")?;
    runtime
        .block_on(post_reload_from_env())
        .context("reload request failed")?;
    tracing::debug!("reload posted");

    if command.is_empty() {
        return Ok(0);
    }
    super::format::run(command, recipe_flag, patterns)
}

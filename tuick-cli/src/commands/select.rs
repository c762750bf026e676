//! `tuick --select` — the callback behind the finder's enter binding.
//!
//! Receives the five location fields of the highlighted block and jumps the
//! configured editor to `file:line:col`.

use std::process::Command;

use anyhow::{bail, Context, Result};

use tuick_core::{editor_from_env, goto_command, Location};

pub fn run(fields: &[String], verbose: bool) -> Result<i32> {
    let [file, line, col, end_line, end_col] = fields else {
        bail!("--select expects FILE LINE COL END_LINE END_COL");
    };
    let location = Location::from_fields(file, line, col, end_line, end_col)
        .context("invalid selection fields")?;

    if location.file.is_empty() {
        // An informational block was selected; nothing to jump to.
        if verbose {
            tracing::warn!("no location in selection");
        }
        return Ok(0);
    }

    let editor = editor_from_env()?;
    let command = goto_command(editor, &location);
    tracing::debug!(%command, "launching editor");

    let status = Command::new(&command.program)
        .args(&command.args)
        .status()
        .with_context(|| format!("failed to run editor {}", command.program))?;
    if !status.success() {
        bail!("editor exited with status {:?}", status.code());
    }
    Ok(0)
}

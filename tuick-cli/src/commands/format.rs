//! `tuick --format` — run the checker once and emit the block stream.
//!
//! Used by build tooling that wants the serialised stream on stdout, and by
//! `--reload` when a command is given. No finder, no endpoint, no watcher.

use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use tuick_format::{registry, Engine, Recipe};
use tuick_session::SessionError;

pub fn run(command: &[String], recipe_flag: &str, patterns: &[String]) -> Result<i32> {
    let recipe = registry::resolve(command, recipe_flag, patterns)?;
    let engine = Engine::from_env();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("tokio runtime")?;
    runtime.block_on(emit_stream(command, recipe, engine))
}

async fn emit_stream(command: &[String], recipe: Recipe, engine: Engine) -> Result<i32> {
    let program = command.first().context("no command specified")?;
    tracing::debug!(command = ?command, ?engine, "format run");

    let mut child = Command::new(program)
        .args(&command[1..])
        .env("FORCE_COLOR", "1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .spawn()
        .map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                anyhow::Error::from(SessionError::CheckerNotFound {
                    program: program.clone(),
                })
            } else {
                anyhow::Error::from(err).context(format!("failed to spawn {program}"))
            }
        })?;
    let stdout = child.stdout.take().expect("checker stdout piped");

    let (line_tx, line_rx) = mpsc::channel(16);
    let (block_tx, mut block_rx) = mpsc::channel(1);

    let reader_task = tokio::spawn(async move {
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = String::from_utf8_lossy(&buf);
            let line = line.strip_suffix('\n').unwrap_or(&line).to_owned();
            if line_tx.send(line).await.is_err() {
                break;
            }
        }
    });
    let format_task =
        tokio::spawn(async move { tuick_format::stream_lines(engine, &recipe, line_rx, block_tx).await });

    let mut out = tokio::io::stdout();
    while let Some(block) = block_rx.recv().await {
        match block.encode_lossy() {
            Ok(bytes) => {
                out.write_all(&bytes).await.context("write block stream")?;
                out.flush().await.context("flush block stream")?;
            }
            Err(err) => tracing::warn!(error = %err, "dropping unencodable block"),
        }
    }

    reader_task.await.context("reader task panicked")?;
    format_task
        .await
        .context("format task panicked")?
        .context("parse checker output")?;
    let status = child.wait().await.context("wait for checker")?;
    tracing::debug!(code = ?status.code(), "checker exited");
    Ok(0)
}

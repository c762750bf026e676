//! The finder driver: fzf in the foreground, block stream on its stdin.
//!
//! The finder is spawned attached to the controlling terminal and is fed the
//! NUL-terminated record stream. Display shows only the content column
//! (field 6, delimiter `0x1F`); enter hands the five location fields to the
//! select callback; the manual-reload key posts to the control endpoint.
//! Generations are written back to back on the same pipe — the writer task
//! switches sources only at record boundaries, so the cutover is atomic from
//! the finder's point of view.

use std::process::Stdio;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;

use tuick_core::{Block, FIELD_SEP};

use crate::error::SessionError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Shell-quoted callback commands bound to finder keys.
#[derive(Debug, Clone)]
pub struct FinderCallbacks {
    /// Prefix for the select binding; the five location fields are appended
    /// by the finder (e.g. `tuick --select`).
    pub select_prefix: String,
    /// Command that posts a manual reload (e.g. `tuick --reload`).
    pub reload_command: String,
}

#[derive(Debug, Clone)]
pub struct FinderConfig {
    /// Finder program; `fzf` in production, overridable for tests.
    pub program: String,
    /// Header shown while the checker is idle (the checker command line).
    pub header: String,
    pub callbacks: FinderCallbacks,
    /// Extra environment (the control endpoint variables).
    pub env: Vec<(String, String)>,
}

impl FinderConfig {
    fn running_header(&self) -> String {
        format!("{} Running...", self.header)
    }

    /// The full finder argv (without the program itself).
    pub fn args(&self) -> Vec<String> {
        let running = self.running_header();
        let bindings = [
            format!("start:change-header({running})"),
            format!("load:change-header({})", self.header),
            format!(
                "enter,right:execute({} {{1}} {{2}} {{3}} {{4}} {{5}})",
                self.callbacks.select_prefix
            ),
            format!("r:change-header({running})"),
            format!("r:+execute-silent({})", self.callbacks.reload_command),
            "q:abort".to_owned(),
            "zero:abort".to_owned(),
            "space:down".to_owned(),
            "backspace:up".to_owned(),
        ];
        vec![
            "--read0".to_owned(),
            "--track".to_owned(),
            "--no-sort".to_owned(),
            "--reverse".to_owned(),
            "--header-border".to_owned(),
            "--ansi".to_owned(),
            "--color=dark".to_owned(),
            "--highlight-line".to_owned(),
            "--wrap".to_owned(),
            "--disabled".to_owned(),
            "--no-input".to_owned(),
            format!("--delimiter={}", FIELD_SEP as char),
            "--with-nth=6".to_owned(),
            "--bind".to_owned(),
            bindings.join(","),
        ]
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

pub struct FinderDriver {
    child: Child,
}

impl FinderDriver {
    /// Spawn the finder in the terminal foreground with stdin piped.
    pub fn spawn(config: &FinderConfig) -> Result<(Self, ChildStdin), SessionError> {
        let mut cmd = Command::new(&config.program);
        cmd.args(config.args())
            .env("FORCE_COLOR", "1")
            .envs(config.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped());

        let mut child = cmd.spawn().map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                SessionError::FinderNotFound {
                    program: config.program.clone(),
                }
            } else {
                crate::error::io_err(&config.program, err)
            }
        })?;
        let stdin = child.stdin.take().expect("finder stdin piped");
        tracing::debug!(pid = ?child.id(), program = %config.program, "finder started");
        Ok((Self { child }, stdin))
    }

    /// Wait for the finder to exit. Cancel-safe.
    pub async fn wait(&mut self) -> Result<std::process::ExitStatus, SessionError> {
        self.child
            .wait()
            .await
            .map_err(|e| crate::error::io_err("finder wait", e))
    }

    /// Hard-kill the finder (fatal-error path only).
    pub async fn kill(&mut self) {
        let _ = self.child.kill().await;
    }
}

// ---------------------------------------------------------------------------
// Stream writer
// ---------------------------------------------------------------------------

/// One generation's block stream, handed to the writer at a cutover.
pub struct GenerationStream {
    pub generation: u64,
    /// A block already pulled off the stream (the initial-output probe).
    pub first: Option<Block>,
    pub blocks: mpsc::Receiver<Block>,
}

/// Copy block streams to the finder's stdin, one generation at a time.
///
/// The switch is atomic at the record boundary: when a new generation
/// arrives, the old receiver is dropped (discarding stale blocks) before any
/// new-generation byte is written. Closing the generation channel lets the
/// writer drain the stream it is on, then ends it, which closes the
/// finder's stdin.
pub async fn write_stream<W>(
    mut sink: W,
    mut generations: mpsc::Receiver<GenerationStream>,
) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin,
{
    let mut current: Option<GenerationStream> = None;
    let mut accepting = true;
    loop {
        match current.as_mut() {
            None if accepting => match generations.recv().await {
                Some(stream) => current = Some(stream),
                None => break,
            },
            None => break,
            Some(stream) => {
                if let Some(block) = stream.first.take() {
                    write_block(&mut sink, &block).await?;
                    continue;
                }
                if accepting {
                    tokio::select! {
                        // A pending cutover beats draining the superseded
                        // stream.
                        biased;
                        next = generations.recv() => match next {
                            Some(stream) => {
                                tracing::debug!(generation = stream.generation,
                                    "stream cutover, superseded blocks dropped");
                                // Replacing the slot drops the old receiver.
                                current = Some(stream);
                            }
                            None => accepting = false,
                        },
                        block = stream.blocks.recv() => match block {
                            Some(block) => write_block(&mut sink, &block).await?,
                            None => current = None,
                        },
                    }
                } else {
                    match stream.blocks.recv().await {
                        Some(block) => write_block(&mut sink, &block).await?,
                        None => current = None,
                    }
                }
            }
        }
    }
    sink.shutdown()
        .await
        .map_err(|e| crate::error::io_err("finder stdin", e))?;
    Ok(())
}

async fn write_block<W>(sink: &mut W, block: &Block) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin,
{
    match block.encode_lossy() {
        Ok(bytes) => {
            sink.write_all(&bytes)
                .await
                .map_err(|e| crate::error::io_err("finder stdin", e))?;
            sink.flush()
                .await
                .map_err(|e| crate::error::io_err("finder stdin", e))?;
        }
        Err(err) => {
            // One bad block is dropped, the stream goes on.
            tracing::warn!(error = %err, "dropping unencodable block");
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! The checker runner: one child process per generation.
//!
//! Spawns the checker in its own process group with stdout piped, tees every
//! raw output line to the save file, and feeds the errorformat engine whose
//! blocks come out of a bounded channel (capacity 1 — back-pressure reaches
//! the checker pipe). stderr lines go to the save file only.
//!
//! Termination is two-phase: SIGTERM to the process group, then SIGKILL
//! after the soft timeout. `wait` is serialised behind a lock because exit
//! can be observed from both the stdout reader and the controller, and
//! "no such process" is tolerated on the signal path.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use tuick_core::Block;
use tuick_format::{Engine, Recipe};

use crate::error::SessionError;
use crate::save::SaveMessage;

/// Default soft-terminate timeout before escalating to SIGKILL.
pub const SOFT_TIMEOUT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Child slot — serialised wait
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ChildSlot {
    child: Child,
    status: Option<ExitStatus>,
}

async fn slot_wait(slot: &Mutex<ChildSlot>) -> Result<ExitStatus, SessionError> {
    let mut guard = slot.lock().await;
    if let Some(status) = guard.status {
        return Ok(status);
    }
    let status = guard
        .child
        .wait()
        .await
        .map_err(|e| crate::error::io_err("checker wait", e))?;
    guard.status = Some(status);
    Ok(status)
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct CheckerRunner {
    generation: u64,
    pgid: Option<i32>,
    slot: Arc<Mutex<ChildSlot>>,
    blocks: Option<mpsc::Receiver<Block>>,
    stdout_task: Option<JoinHandle<()>>,
    stderr_task: Option<JoinHandle<()>>,
    format_task: Option<JoinHandle<Result<(), SessionError>>>,
}

impl CheckerRunner {
    /// Spawn the checker and wire up the block stream.
    ///
    /// `env` carries the control-endpoint variables for grandchildren;
    /// `FORCE_COLOR=1` is always set so tools keep colouring into the pipe.
    /// When the run ends naturally (stdout EOF and a real exit code, not a
    /// signal), the generation id is reported on `completed_tx`.
    pub fn start(
        generation: u64,
        command: &[String],
        recipe: Recipe,
        engine: Engine,
        save_tx: mpsc::Sender<SaveMessage>,
        completed_tx: mpsc::Sender<u64>,
        env: &[(String, String)],
    ) -> Result<Self, SessionError> {
        let program = command
            .first()
            .ok_or(SessionError::Protocol("empty checker command".to_owned()))?;

        let mut cmd = Command::new(program);
        cmd.args(&command[1..])
            .env("FORCE_COLOR", "1")
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                SessionError::CheckerNotFound {
                    program: program.clone(),
                }
            } else {
                crate::error::io_err(program, err)
            }
        })?;
        let pgid = child.id().map(|pid| pid as i32);
        tracing::debug!(generation, pid = ?child.id(), command = ?command, "checker started");

        let stdout = child.stdout.take().expect("checker stdout piped");
        let stderr = child.stderr.take().expect("checker stderr piped");
        let slot = Arc::new(Mutex::new(ChildSlot {
            child,
            status: None,
        }));

        // Raw lines fan out to the save file and to the format engine.
        let (line_tx, line_rx) = mpsc::channel::<String>(16);
        let (block_tx, block_rx) = mpsc::channel::<Block>(1);

        let stdout_task = {
            let save_tx = save_tx.clone();
            let slot = slot.clone();
            tokio::spawn(async move {
                tee_lines(BufReader::new(stdout), save_tx, Some(line_tx)).await;
                // Stdout EOF: the child is done writing; reap it here so a
                // naturally finished checker never lingers as a zombie.
                match slot_wait(&slot).await {
                    // An exit code (success or not) means the run completed
                    // and its output is whole; death by signal does not.
                    Ok(status) if status.code().is_some() => {
                        let _ = completed_tx.send(generation).await;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::debug!(error = %err, "checker reap after EOF failed");
                    }
                }
            })
        };

        let stderr_task = tokio::spawn(async move {
            tee_lines(BufReader::new(stderr), save_tx, None).await;
        });

        let format_task = tokio::spawn(async move {
            tuick_format::stream_lines(engine, &recipe, line_rx, block_tx)
                .await
                .map_err(SessionError::from)
        });

        Ok(Self {
            generation,
            pgid,
            slot,
            blocks: Some(block_rx),
            stdout_task: Some(stdout_task),
            stderr_task: Some(stderr_task),
            format_task: Some(format_task),
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The block stream for this generation. Taken exactly once.
    pub fn take_blocks(&mut self) -> mpsc::Receiver<Block> {
        self.blocks.take().expect("block stream already taken")
    }

    /// Block until the checker exits; safe to call from several tasks.
    pub async fn wait(&self) -> Result<ExitStatus, SessionError> {
        slot_wait(&self.slot).await
    }

    /// Two-phase termination of the checker's process group. Returns after
    /// the child is reaped and all runner tasks have wound down; no block is
    /// emitted on this generation's stream afterwards.
    pub async fn terminate(&mut self, soft_timeout: Duration) -> Result<(), SessionError> {
        // Close the block stream before touching the child: a superseded
        // generation must not emit once terminate returns, not even the
        // partial block the parser still holds open.
        if let Some(task) = self.format_task.take() {
            task.abort();
            let _ = task.await;
        }
        self.signal(TermSignal::Term);
        match timeout(soft_timeout, self.wait()).await {
            Ok(result) => {
                result?;
            }
            Err(_) => {
                tracing::debug!(
                    generation = self.generation,
                    "checker survived SIGTERM, escalating"
                );
                self.signal(TermSignal::Kill);
                self.wait().await?;
            }
        }
        self.join_tasks().await;
        Ok(())
    }

    /// Wait for the pipeline to drain after a natural end of stream.
    pub async fn join_tasks(&mut self) {
        for task in [self.stdout_task.take(), self.stderr_task.take()]
            .into_iter()
            .flatten()
        {
            if timeout(Duration::from_secs(1), task).await.is_err() {
                tracing::debug!(generation = self.generation, "runner tee task abandoned");
            }
        }
        if let Some(task) = self.format_task.take() {
            match timeout(Duration::from_secs(1), task).await {
                Ok(Ok(Err(err))) => {
                    tracing::warn!(generation = self.generation, error = %err,
                        "format engine error")
                }
                Ok(_) => {}
                Err(_) => {
                    tracing::debug!(generation = self.generation, "format task abandoned")
                }
            }
        }
    }

    #[cfg(unix)]
    fn signal(&self, signal: TermSignal) {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let Some(pgid) = self.pgid else { return };
        let signal = match signal {
            TermSignal::Term => Signal::SIGTERM,
            TermSignal::Kill => Signal::SIGKILL,
        };
        match killpg(Pid::from_raw(pgid), signal) {
            // Already gone: termination raced normal completion, fine.
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(err) => {
                tracing::warn!(pgid, %err, "failed to signal checker process group");
            }
        }
    }

    #[cfg(not(unix))]
    fn signal(&self, signal: TermSignal) {
        if matches!(signal, TermSignal::Kill) {
            let slot = self.slot.clone();
            tokio::spawn(async move {
                let mut guard = slot.lock().await;
                let _ = guard.child.start_kill();
            });
        }
    }
}

#[derive(Clone, Copy)]
enum TermSignal {
    Term,
    Kill,
}

/// Read lines to EOF, appending each to the save file and forwarding to the
/// format engine when a sender is given. Invalid UTF-8 is replaced.
async fn tee_lines<R>(
    mut reader: R,
    save_tx: mpsc::Sender<SaveMessage>,
    mut line_tx: Option<mpsc::Sender<String>>,
) where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(error = %err, "checker pipe read error");
                break;
            }
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.strip_suffix('\n').unwrap_or(&line).to_owned();
        if save_tx.send(SaveMessage::Line(line.clone())).await.is_err() {
            // Save writer gone: the session is tearing down.
            line_tx = None;
        }
        if let Some(tx) = line_tx.as_ref() {
            if tx.send(line).await.is_err() {
                // Format engine gone (superseded generation): keep saving.
                line_tx = None;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! The session controller.
//!
//! Composes runner, control endpoint, finder and watcher into the live
//! loop: run the checker, stream blocks into the finder, restart the
//! checker on reload events, and guarantee clean teardown. States:
//! `starting → running ⇄ reloading → draining → stopped`.
//!
//! The controller is the only owner of the current generation; reload
//! requests only ever reach it through the endpoint's single-slot queue, so
//! they are processed strictly in arrival order and coalesce while one is
//! being acted on. The block-stream cutover happens in the finder writer,
//! which switches sources at a record boundary after closing the old one.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

use tuick_format::{Engine, Recipe};

use crate::control::{ControlEndpoint, RELOAD_KEY_ENV, RELOAD_PORT_ENV};
use crate::error::{io_err, SessionError};
use crate::finder::{write_stream, FinderCallbacks, FinderConfig, FinderDriver, GenerationStream};
use crate::runner::{CheckerRunner, SOFT_TIMEOUT};
use crate::save::SaveFile;
use crate::token::ReloadToken;
use crate::watcher::{WatcherConfig, WatcherDriver};

/// Environment variable pointing children at the session log file.
pub const LOG_FILE_ENV: &str = "TUICK_LOG_FILE";

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// The checker command and its arguments.
    pub command: Vec<String>,
    pub recipe: Recipe,
    pub engine: Engine,
    /// Finder program, `fzf` unless overridden.
    pub finder_program: String,
    pub callbacks: FinderCallbacks,
    /// Directory the watcher observes.
    pub watch_root: PathBuf,
    pub debounce: Option<Duration>,
    /// Extra watchexec include/exclude arguments.
    pub watch_filters: Vec<String>,
    /// Soft-terminate timeout before SIGKILL.
    pub soft_timeout: Duration,
    /// Session log file propagated to children as `TUICK_LOG_FILE`.
    pub log_file: Option<PathBuf>,
}

impl SessionOptions {
    pub fn new(command: Vec<String>, recipe: Recipe, callbacks: FinderCallbacks) -> Self {
        Self {
            command,
            recipe,
            engine: Engine::default(),
            finder_program: "fzf".to_owned(),
            callbacks,
            watch_root: PathBuf::from("."),
            debounce: None,
            watch_filters: Vec::new(),
            soft_timeout: SOFT_TIMEOUT,
            log_file: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Starting,
    Running,
    Reloading,
    Draining,
    Stopped,
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Build the runtime and run the session to completion on this thread.
pub fn start_blocking(options: SessionOptions) -> Result<i32, SessionError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(options))
}

/// Run one session; returns the process exit code.
pub async fn run(options: SessionOptions) -> Result<i32, SessionError> {
    let mut state = SessionState::Starting;
    tracing::debug!(state = ?state, command = ?options.command, "session starting");

    let token = ReloadToken::generate();
    let (shutdown_tx, _) = broadcast::channel::<()>(4);
    let (endpoint, mut reload_rx) =
        ControlEndpoint::bind(token.clone(), shutdown_tx.subscribe()).await?;
    let save = SaveFile::create().await?;

    let mut child_env = vec![
        (RELOAD_PORT_ENV.to_owned(), endpoint.port().to_string()),
        (RELOAD_KEY_ENV.to_owned(), token.as_str().to_owned()),
    ];
    if let Some(path) = &options.log_file {
        child_env.push((LOG_FILE_ENV.to_owned(), path.display().to_string()));
    }

    let mut generation: u64 = 1;
    let mut run_offsets: HashMap<u64, u64> = HashMap::new();
    let mut last_completed_offset: Option<u64> = None;

    let (completed_tx, mut completed_rx) = mpsc::channel::<u64>(4);

    run_offsets.insert(generation, save.mark().await?);
    let mut runner = CheckerRunner::start(
        generation,
        &options.command,
        options.recipe.clone(),
        options.engine,
        save.sender(),
        completed_tx.clone(),
        &child_env,
    )?;
    let mut first_blocks = runner.take_blocks();

    // Probe the initial run: with no output at all the finder never starts
    // and the session ends once the checker does.
    let first = tokio::select! {
        block = first_blocks.recv() => block,
        _ = tokio::signal::ctrl_c() => {
            tracing::debug!("interrupted before first output");
            runner.terminate(options.soft_timeout).await?;
            endpoint.close().await;
            save.print_back(0, &mut tokio::io::stdout()).await?;
            return Ok(0);
        }
    };
    let Some(first) = first else {
        runner.join_tasks().await;
        let status = runner.wait().await?;
        tracing::debug!(code = ?status.code(), "checker produced no blocks");
        endpoint.close().await;
        save.print_back(0, &mut tokio::io::stdout()).await?;
        return Ok(0);
    };

    let finder_config = FinderConfig {
        program: options.finder_program.clone(),
        header: shell_words::join(&options.command),
        callbacks: options.callbacks.clone(),
        env: child_env.clone(),
    };
    let (mut finder, finder_stdin) = FinderDriver::spawn(&finder_config)?;

    let (gens_tx, gens_rx) = mpsc::channel::<GenerationStream>(2);
    let writer = tokio::spawn(write_stream(finder_stdin, gens_rx));
    gens_tx
        .send(GenerationStream {
            generation,
            first: Some(first),
            blocks: first_blocks,
        })
        .await
        .map_err(|_| SessionError::ChannelClosed("finder writer"))?;

    // A missing watcher degrades the session to manual reloads only.
    let watcher = match WatcherDriver::spawn(WatcherConfig {
        root: options.watch_root.clone(),
        debounce: options.debounce,
        filters: options.watch_filters.clone(),
        port: endpoint.port(),
        key: token.as_str().to_owned(),
    }) {
        Ok(watcher) => Some(watcher),
        Err(err) => {
            tracing::warn!(error = %err, "file watcher unavailable");
            None
        }
    };

    state = SessionState::Running;
    tracing::debug!(state = ?state, generation, "session running");

    let mut finder_status: Option<ExitStatus> = None;
    let loop_result: Result<(), SessionError> = async {
        loop {
            tokio::select! {
                event = reload_rx.recv() => {
                    if event.is_none() {
                        return Err(SessionError::ChannelClosed("reload queue"));
                    }
                    state = SessionState::Reloading;
                    generation += 1;
                    tracing::debug!(state = ?state, generation, "reload requested");

                    runner.terminate(options.soft_timeout).await?;
                    run_offsets.insert(generation, save.mark().await?);

                    match CheckerRunner::start(
                        generation,
                        &options.command,
                        options.recipe.clone(),
                        options.engine,
                        save.sender(),
                        completed_tx.clone(),
                        &child_env,
                    ) {
                        Ok(mut next) => {
                            let blocks = next.take_blocks();
                            runner = next;
                            if gens_tx
                                .send(GenerationStream { generation, first: None, blocks })
                                .await
                                .is_err()
                            {
                                return Err(SessionError::ChannelClosed("finder writer"));
                            }
                        }
                        Err(err) => {
                            // A checker that vanished mid-session is not
                            // fatal; the user can fix it and reload again.
                            tracing::warn!(error = %err, "checker restart failed");
                        }
                    }
                    state = SessionState::Running;
                    tracing::debug!(state = ?state, generation, "reload finished");
                }
                Some(done) = completed_rx.recv() => {
                    // Reported by the runner after reaping a natural exit.
                    if let Some(offset) = run_offsets.get(&done) {
                        last_completed_offset = Some(*offset);
                    }
                    tracing::debug!(generation = done, "generation completed");
                }
                status = finder.wait() => {
                    finder_status = Some(status?);
                    return Ok(());
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::debug!("interrupt received");
                    return Ok(());
                }
            }
        }
    }
    .await;

    // Draining: refuse new reloads first, then take the children down.
    state = SessionState::Draining;
    tracing::debug!(state = ?state, "session draining");
    let _ = shutdown_tx.send(());
    endpoint.close().await;
    if let Some(watcher) = watcher {
        watcher.shutdown().await;
    }
    if let Err(err) = runner.terminate(options.soft_timeout).await {
        tracing::warn!(error = %err, "checker termination during drain failed");
    }
    drop(gens_tx);
    match timeout(Duration::from_secs(2), writer).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(err))) => tracing::debug!(error = %err, "finder writer ended with error"),
        Ok(Err(_)) | Err(_) => tracing::debug!("finder writer abandoned"),
    }
    if finder_status.is_none() {
        finder.kill().await;
        let _ = finder.wait().await;
    }

    state = SessionState::Stopped;
    tracing::debug!(state = ?state, "session stopped");

    // Keep the last result visible after the TUI is gone.
    let offset = print_back_offset(
        last_completed_offset,
        run_offsets.get(&generation).copied(),
    );
    save.print_back(offset, &mut tokio::io::stdout()).await?;

    loop_result?;
    Ok(exit_code_from(finder_status.and_then(|s| s.code())))
}

/// Print-back starts at the last completed run, falling back to the start
/// of the most recent (interrupted) one.
fn print_back_offset(last_completed: Option<u64>, current_start: Option<u64>) -> u64 {
    last_completed.or(current_start).unwrap_or(0)
}

/// The finder's abort status (130) is a normal way to leave the TUI.
fn exit_code_from(finder_code: Option<i32>) -> i32 {
    match finder_code {
        Some(0) | Some(130) | None => 0,
        Some(code) => code,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

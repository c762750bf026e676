//! The watcher driver: file changes become reload requests.
//!
//! Preferred mode spawns `watchexec` emitting change events on stdout; a
//! reader task posts one authenticated reload per event group to the control
//! endpoint, exercising the same path as any external client. When
//! watchexec is not installed the driver falls back to an in-process
//! `notify` watcher with a debounce window.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::control::post_reload;
use crate::error::SessionError;

/// Debounce window for the native fallback when none is configured.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Directory to watch (the session working directory).
    pub root: PathBuf,
    /// Debounce passed to watchexec / used by the native fallback.
    pub debounce: Option<Duration>,
    /// Extra watchexec filter arguments (include/exclude patterns).
    pub filters: Vec<String>,
    /// Control endpoint coordinates.
    pub port: u16,
    pub key: String,
}

pub struct WatcherDriver {
    inner: Inner,
}

enum Inner {
    Watchexec {
        child: Child,
        reader: JoinHandle<()>,
    },
    Native {
        // Dropping the watcher stops event delivery.
        _watcher: RecommendedWatcher,
        task: JoinHandle<()>,
    },
}

impl WatcherDriver {
    pub fn spawn(config: WatcherConfig) -> Result<Self, SessionError> {
        match spawn_watchexec(&config) {
            Ok(driver) => Ok(driver),
            Err(SessionError::Io { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                tracing::debug!("watchexec not found, falling back to native watcher");
                spawn_native(&config)
            }
            Err(err) => Err(err),
        }
    }

    pub async fn shutdown(self) {
        match self.inner {
            Inner::Watchexec { mut child, reader } => {
                let _ = child.kill().await;
                reader.abort();
                let _ = reader.await;
            }
            Inner::Native { _watcher, task } => {
                task.abort();
                let _ = task.await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// watchexec mode
// ---------------------------------------------------------------------------

fn spawn_watchexec(config: &WatcherConfig) -> Result<WatcherDriver, SessionError> {
    let mut cmd = Command::new("watchexec");
    cmd.args([
        "--only-emit-events",
        "--emit-events-to=stdio",
        "--no-meta",
        "--postpone",
    ]);
    if let Some(debounce) = config.debounce {
        cmd.arg(format!("--debounce={}ms", debounce.as_millis()));
    }
    cmd.args(&config.filters)
        .current_dir(&config.root)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| crate::error::io_err("watchexec", e))?;
    let stdout = child.stdout.take().expect("watchexec stdout piped");
    tracing::debug!(pid = ?child.id(), root = %config.root.display(), "watchexec started");

    let port = config.port;
    let key = config.key.clone();
    let reader = tokio::spawn(async move {
        // Events arrive as `kind:path` lines; a blank line ends one group.
        let mut lines = BufReader::new(stdout).lines();
        let mut saw_change = false;
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                if saw_change {
                    saw_change = false;
                    send_reload(port, &key).await;
                }
            } else {
                saw_change = true;
            }
        }
        if saw_change {
            send_reload(port, &key).await;
        }
    });

    Ok(WatcherDriver {
        inner: Inner::Watchexec { child, reader },
    })
}

// ---------------------------------------------------------------------------
// Native fallback
// ---------------------------------------------------------------------------

fn spawn_native(config: &WatcherConfig) -> Result<WatcherDriver, SessionError> {
    if !config.filters.is_empty() {
        tracing::debug!("native watcher ignores watchexec filter arguments");
    }

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    watcher.watch(&config.root, RecursiveMode::Recursive)?;
    tracing::debug!(root = %config.root.display(), "native watcher started");

    let window = config.debounce.unwrap_or(DEBOUNCE_WINDOW);
    let port = config.port;
    let key = config.key.clone();
    let task = tokio::spawn(async move {
        let mut last_post: Option<Instant> = None;
        while let Some(event) = event_rx.recv().await {
            let event = match event {
                Ok(event) => event,
                Err(err) => {
                    tracing::warn!(error = %err, "watcher event error");
                    continue;
                }
            };
            if !is_relevant_event_kind(&event.kind) {
                continue;
            }
            if should_post(&mut last_post, Instant::now(), window) {
                send_reload(port, &key).await;
            }
        }
    });

    Ok(WatcherDriver {
        inner: Inner::Native {
            _watcher: watcher,
            task,
        },
    })
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

fn should_post(last_post: &mut Option<Instant>, now: Instant, window: Duration) -> bool {
    match last_post {
        Some(last) if now.duration_since(*last) < window => false,
        _ => {
            *last_post = Some(now);
            true
        }
    }
}

async fn send_reload(port: u16, key: &str) {
    match post_reload(port, key).await {
        Ok(()) => tracing::debug!("watcher posted reload"),
        Err(err) => tracing::warn!(error = %err, "watcher reload failed"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

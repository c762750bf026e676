//! Tuick — a text user interface for compilers and checkers.
//!
//! # Usage
//!
//! ```text
//! tuick [-v] [-f auto|NAME] [-e PATTERN]... [--] COMMAND [ARGS...]
//! tuick --format [opts] -- COMMAND [ARGS...]
//! tuick --reload [opts] [-- COMMAND [ARGS...]]
//! tuick --select FILE LINE COL END_LINE END_COL
//! ```
//!
//! The default form runs the full session: checker piped through the
//! errorformat adapter into fzf, with reload orchestration. `--format`,
//! `--reload` and `--select` are the callback surfaces used by fzf bindings,
//! the watcher, and build tooling.

mod commands;

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tuick_core::{BlockError, EditorError};
use tuick_format::FormatError;
use tuick_session::{SessionError, LOG_FILE_ENV};

// ---------------------------------------------------------------------------
// CLI surface
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "tuick",
    version,
    about = "Text User Interface for Compilers and checKers",
    long_about = None,
)]
struct Cli {
    /// The checker command and its arguments.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,

    /// Run COMMAND and emit the block stream to stdout, then exit.
    #[arg(long)]
    format: bool,

    /// Internal: post a reload to the running session, then emit blocks for
    /// COMMAND if one is given.
    #[arg(long)]
    reload: bool,

    /// Internal: open the editor at the given block location.
    #[arg(
        long,
        num_args = 5,
        value_names = ["FILE", "LINE", "COL", "END_LINE", "END_COL"]
    )]
    select: Option<Vec<String>>,

    /// Recipe selection: `auto` detects the tool from COMMAND.
    #[arg(short = 'f', long = "recipe", default_value = "auto", value_name = "NAME")]
    recipe: String,

    /// Raw errorformat pattern; repeatable, overrides -f.
    #[arg(short = 'e', long = "pattern", value_name = "PATTERN")]
    patterns: Vec<String>,

    /// Show verbose output.
    #[arg(short = 'v', long)]
    verbose: bool,
}

// ---------------------------------------------------------------------------
// Exit codes
// ---------------------------------------------------------------------------

const EXIT_USAGE: u8 = 1;
const EXIT_MISSING: u8 = 2;
const EXIT_INTERNAL: u8 = 3;

fn exit_code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(session) = cause.downcast_ref::<SessionError>() {
            return match session {
                SessionError::CheckerNotFound { .. } | SessionError::FinderNotFound { .. } => {
                    EXIT_MISSING
                }
                SessionError::Format(format) => format_exit_code(format),
                _ => EXIT_INTERNAL,
            };
        }
        if let Some(format) = cause.downcast_ref::<FormatError>() {
            return format_exit_code(format);
        }
        if cause.downcast_ref::<EditorError>().is_some()
            || cause.downcast_ref::<BlockError>().is_some()
        {
            return EXIT_USAGE;
        }
    }
    EXIT_INTERNAL
}

fn format_exit_code(err: &FormatError) -> u8 {
    match err {
        FormatError::ToolNotDetected { .. } | FormatError::Pattern { .. } => EXIT_USAGE,
        FormatError::HelperNotFound => EXIT_MISSING,
        _ => EXIT_INTERNAL,
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Where verbose diagnostics go. In a session the terminal belongs to fzf,
/// so logs are written to a file that children share via `TUICK_LOG_FILE`
/// and that is copied to stderr when the session ends.
enum LogSink {
    Stderr,
    Inherited(PathBuf),
    Owned {
        path: PathBuf,
        _temp: tempfile::TempPath,
    },
}

fn open_log_sink(session_mode: bool) -> LogSink {
    if let Ok(path) = std::env::var(LOG_FILE_ENV) {
        return LogSink::Inherited(PathBuf::from(path));
    }
    if !session_mode {
        return LogSink::Stderr;
    }
    match tempfile::Builder::new()
        .prefix("tuick-")
        .suffix(".log")
        .tempfile()
    {
        Ok(file) => {
            let (_, temp) = file.into_parts();
            LogSink::Owned {
                path: temp.to_path_buf(),
                _temp: temp,
            }
        }
        Err(_) => LogSink::Stderr,
    }
}

fn init_tracing(verbose: bool, sink: &LogSink) {
    let default = if verbose { "tuick=debug,warn" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false);

    let path = match sink {
        LogSink::Stderr => {
            let _ = builder.with_writer(std::io::stderr).try_init();
            return;
        }
        LogSink::Inherited(path) => path,
        LogSink::Owned { path, .. } => path,
    };
    match OpenOptions::new().append(true).open(path) {
        Ok(file) => {
            let _ = builder.with_writer(Arc::new(file)).try_init();
        }
        Err(_) => {
            let _ = builder.with_writer(std::io::stderr).try_init();
        }
    }
}

/// After the TUI closes, replay the session log so warnings are not lost.
fn replay_log(sink: &LogSink) {
    if let LogSink::Owned { path, .. } = sink {
        if let Ok(contents) = std::fs::read(path) {
            if !contents.is_empty() {
                use std::io::Write;
                let _ = std::io::stderr().write_all(&contents);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();

    let exclusive = [cli.format, cli.reload, cli.select.is_some()]
        .into_iter()
        .filter(|&flag| flag)
        .count();
    if exclusive > 1 {
        eprintln!("error: --format, --reload, and --select are mutually exclusive");
        return ExitCode::from(EXIT_USAGE);
    }

    let session_mode = exclusive == 0;
    if session_mode && cli.command.is_empty() {
        eprintln!("error: no command specified");
        return ExitCode::from(EXIT_USAGE);
    }

    let sink = open_log_sink(session_mode);
    init_tracing(cli.verbose, &sink);
    tracing::debug!(args = ?std::env::args().collect::<Vec<_>>(), "invoked");

    let result: Result<i32> = if let Some(fields) = &cli.select {
        commands::select::run(fields, cli.verbose)
    } else if cli.reload {
        commands::reload::run(&cli.command, &cli.recipe, &cli.patterns)
    } else if cli.format {
        commands::format::run(&cli.command, &cli.recipe, &cli.patterns)
    } else {
        let log_file = match &sink {
            LogSink::Owned { path, .. } => Some(path.clone()),
            LogSink::Inherited(path) => Some(path.clone()),
            LogSink::Stderr => None,
        };
        commands::run::run(
            &cli.command,
            &cli.recipe,
            &cli.patterns,
            cli.verbose,
            log_file,
        )
    };

    let code = match result {
        Ok(code) => {
            if session_mode {
                replay_log(&sink);
            }
            u8::try_from(code.clamp(0, 255)).unwrap_or(EXIT_INTERNAL)
        }
        Err(err) => {
            let code = exit_code_for(&err);
            eprintln!("error: {err:#}");
            if session_mode {
                replay_log(&sink);
            }
            code
        }
    };
    ExitCode::from(code)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

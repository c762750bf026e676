//! The default mode: run the full interactive session.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use tuick_format::registry;
use tuick_session::{start_blocking, FinderCallbacks, SessionOptions};

pub fn run(
    command: &[String],
    recipe_flag: &str,
    patterns: &[String],
    verbose: bool,
    log_file: Option<PathBuf>,
) -> Result<i32> {
    let recipe = registry::resolve(command, recipe_flag, patterns)?;
    let callbacks = callbacks(verbose)?;

    let mut options = SessionOptions::new(command.to_vec(), recipe, callbacks);
    options.engine = tuick_format::Engine::from_env();
    options.watch_root = std::env::current_dir().context("cannot determine working directory")?;
    options.log_file = log_file;

    start_blocking(options).context("session failed")
}

/// The fzf bindings call back into this very binary. Shortened to the bare
/// name when that resolves back to us through PATH, so the bindings stay
/// readable in `fzf --bind` listings.
fn callbacks(verbose: bool) -> Result<FinderCallbacks> {
    let myself = self_command().context("cannot locate the tuick binary")?;
    let verbose_flag = if verbose { " -v" } else { "" };
    Ok(FinderCallbacks {
        select_prefix: format!("{myself}{verbose_flag} --select"),
        reload_command: format!("{myself}{verbose_flag} --reload"),
    })
}

fn self_command() -> Result<String> {
    let exe = std::env::current_exe()?;
    if let Some(name) = exe.file_name().and_then(|n| n.to_str()) {
        if resolves_to(name, &exe) {
            return Ok(name.to_owned());
        }
    }
    Ok(shell_words::quote(&exe.to_string_lossy()).into_owned())
}

/// Does `name` on PATH resolve to the running executable?
fn resolves_to(name: &str, exe: &Path) -> bool {
    let Ok(path_var) = std::env::var("PATH") else {
        return false;
    };
    let target = std::fs::canonicalize(exe).ok();
    std::env::split_paths(&path_var).any(|dir| {
        let candidate = dir.join(name);
        candidate.is_file() && std::fs::canonicalize(&candidate).ok() == target
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callbacks_carry_the_verbose_flag() {
        let with = callbacks(true).expect("callbacks");
        assert!(with.select_prefix.ends_with(" -v --select"));
        assert!(with.reload_command.ends_with(" -v --reload"));

        let without = callbacks(false).expect("callbacks");
        assert!(without.select_prefix.ends_with(" --select"));
        assert!(!without.select_prefix.contains(" -v "));
    }
}

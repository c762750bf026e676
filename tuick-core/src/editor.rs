//! Editor launch commands for the select callback.
//!
//! Maps the user's `$VISUAL` / `$EDITOR` to a jump-to-location invocation.
//! The registry covers the editors with a known goto syntax; anything else
//! falls back to opening the bare file. Missing line/col fields are omitted
//! from the rendered command.

use std::env;
use std::fmt;

use crate::block::Location;
use crate::error::EditorError;

// ---------------------------------------------------------------------------
// Editor registry
// ---------------------------------------------------------------------------

/// Editors with a known jump-to-location syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorKind {
    /// `vi +LINE '+normal! COLl' FILE`
    Vi,
    /// `code --goto FILE:LINE:COL`
    VsCode,
    /// `subl FILE:LINE:COL`
    Sublime,
    /// `emacs +LINE:COL FILE`
    Emacs,
    /// `hx FILE:LINE:COL`
    Helix,
    /// `kak +LINE:COL FILE`
    Kakoune,
    /// Unknown editor: `EDITOR FILE`.
    Generic,
}

impl EditorKind {
    /// Classify an editor by the basename of its program.
    pub fn from_program(program: &str) -> Self {
        let base = program.rsplit('/').next().unwrap_or(program);
        match base {
            "vi" | "vim" | "nvim" => Self::Vi,
            "code" | "codium" | "code-insiders" | "cursor" => Self::VsCode,
            "subl" => Self::Sublime,
            "emacs" | "emacsclient" => Self::Emacs,
            "hx" => Self::Helix,
            "kak" => Self::Kakoune,
            _ => Self::Generic,
        }
    }
}

/// A ready-to-spawn editor invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl fmt::Display for EditorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut words = Vec::with_capacity(self.args.len() + 1);
        words.push(self.program.clone());
        words.extend(self.args.iter().cloned());
        write!(f, "{}", shell_words::join(&words))
    }
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

/// Read the configured editor command from `$VISUAL`, then `$EDITOR`.
///
/// The value may carry arguments of its own (`"code --wait"`); those are
/// preserved ahead of the location arguments.
pub fn editor_from_env() -> Result<EditorCommand, EditorError> {
    let raw = ["VISUAL", "EDITOR"]
        .iter()
        .filter_map(|name| env::var(name).ok())
        .find(|value| !value.trim().is_empty())
        .ok_or(EditorError::NotConfigured)?;

    let mut words = shell_words::split(&raw).map_err(|_| EditorError::InvalidCommand {
        value: raw.clone(),
    })?;
    if words.is_empty() {
        return Err(EditorError::NotConfigured);
    }
    let program = words.remove(0);
    Ok(EditorCommand {
        program,
        args: words,
    })
}

/// Extend an editor command with jump-to-location arguments.
pub fn goto_command(editor: EditorCommand, location: &Location) -> EditorCommand {
    let kind = EditorKind::from_program(&editor.program);
    let mut args = editor.args;
    let file = location.file.clone();

    match (kind, location.line) {
        (EditorKind::Vi, Some(line)) => {
            args.push(format!("+{line}"));
            if let Some(col) = location.col {
                args.push(format!("+normal! {col}l"));
            }
            args.push(file);
        }
        (EditorKind::VsCode, Some(_)) => {
            args.push("--goto".to_owned());
            args.push(colon_target(location));
        }
        (EditorKind::Sublime | EditorKind::Helix, Some(_)) => {
            args.push(colon_target(location));
        }
        (EditorKind::Emacs | EditorKind::Kakoune, Some(line)) => {
            match location.col {
                Some(col) => args.push(format!("+{line}:{col}")),
                None => args.push(format!("+{line}")),
            }
            args.push(file);
        }
        // No line, or an editor we know nothing about: open the file.
        _ => args.push(file),
    }

    EditorCommand {
        program: editor.program,
        args,
    }
}

fn colon_target(location: &Location) -> String {
    location.to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(file: &str, line: &str, col: &str) -> Location {
        Location::from_fields(file, line, col, "", "").expect("location")
    }

    fn bare(program: &str) -> EditorCommand {
        EditorCommand {
            program: program.into(),
            args: vec![],
        }
    }

    #[test]
    fn vi_goto_line_and_column() {
        let cmd = goto_command(bare("vi"), &loc("src/test.py", "10", "5"));
        assert_eq!(cmd.program, "vi");
        assert_eq!(cmd.args, vec!["+10", "+normal! 5l", "src/test.py"]);
        assert_eq!(cmd.to_string(), "vi +10 '+normal! 5l' src/test.py");
    }

    #[test]
    fn vi_goto_line_only() {
        let cmd = goto_command(bare("nvim"), &loc("a.py", "3", ""));
        assert_eq!(cmd.args, vec!["+3", "a.py"]);
    }

    #[test]
    fn vscode_goto_uses_colon_form() {
        let cmd = goto_command(bare("code"), &loc("a.py", "3", "5"));
        assert_eq!(cmd.args, vec!["--goto", "a.py:3:5"]);
    }

    #[test]
    fn code_with_existing_args_keeps_them_first() {
        let editor = EditorCommand {
            program: "code".into(),
            args: vec!["--wait".into()],
        };
        let cmd = goto_command(editor, &loc("a.py", "3", "5"));
        assert_eq!(cmd.args, vec!["--wait", "--goto", "a.py:3:5"]);
    }

    #[test]
    fn emacs_goto_line_and_column() {
        let cmd = goto_command(bare("emacs"), &loc("a.py", "3", "5"));
        assert_eq!(cmd.args, vec!["+3:5", "a.py"]);
    }

    #[test]
    fn unknown_editor_opens_bare_file() {
        let cmd = goto_command(bare("ed"), &loc("a.py", "3", "5"));
        assert_eq!(cmd.args, vec!["a.py"]);
    }

    #[test]
    fn missing_line_opens_bare_file() {
        let cmd = goto_command(bare("vi"), &loc("a.py", "", ""));
        assert_eq!(cmd.args, vec!["a.py"]);
    }

    #[test]
    fn kind_strips_path_prefix() {
        assert_eq!(EditorKind::from_program("/usr/bin/nvim"), EditorKind::Vi);
        assert_eq!(EditorKind::from_program("./bin/subl"), EditorKind::Sublime);
    }
}

//! Built-in tool recipes and tool auto-detection.
//!
//! A recipe is a list of errorformat pattern strings. The registry maps the
//! tools tuick knows out of the box; `-e` patterns bypass it entirely.

use crate::error::FormatError;

// ---------------------------------------------------------------------------
// Recipe
// ---------------------------------------------------------------------------

/// A parsing recipe: the tool it came from (if any) plus its patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipe {
    /// Built-in tool name, `None` for raw `-e` patterns.
    pub tool: Option<String>,
    pub patterns: Vec<String>,
}

impl Recipe {
    /// A recipe from raw errorformat patterns (`-e`).
    pub fn from_patterns(patterns: Vec<String>) -> Self {
        Self {
            tool: None,
            patterns,
        }
    }
}

// ---------------------------------------------------------------------------
// Built-in registry
// ---------------------------------------------------------------------------

const BUILTIN: &[(&str, &[&str])] = &[
    ("ruff", &["%f:%l:%c: %m"]),
    (
        "mypy",
        &[
            "%f:%l:%c: %t%*[^:]: %m",
            "%f:%l: %t%*[^:]: %m",
            "%f: note: %m",
        ],
    ),
    ("flake8", &["%f:%l:%c: %m"]),
    (
        "pylint",
        &["%f:%l:%c: %m", "%G************* Module %m"],
    ),
    (
        "pytest",
        &["%f:%l: %m", "%G===%.%#", "%G___%.%#", "%G_ _%.%#"],
    ),
];

/// Look up the recipe for a built-in tool.
pub fn builtin(tool: &str) -> Option<Recipe> {
    BUILTIN
        .iter()
        .find(|(name, _)| *name == tool)
        .map(|(name, patterns)| Recipe {
            tool: Some((*name).to_owned()),
            patterns: patterns.iter().map(|p| (*p).to_owned()).collect(),
        })
}

/// True if `tool` has a built-in recipe.
pub fn is_known_tool(tool: &str) -> bool {
    BUILTIN.iter().any(|(name, _)| *name == tool)
}

// ---------------------------------------------------------------------------
// Auto-detection
// ---------------------------------------------------------------------------

/// Extract the tool name from a checker command.
///
/// Takes the first non-option argument, strips any path prefix, and
/// recognises `python -m <tool>` / `python3 -m <tool>` forms.
pub fn detect_tool(command: &[String]) -> Option<String> {
    let mut args = command.iter().filter(|a| !a.starts_with('-'));
    let first = args.next()?;
    let base = basename(first);

    if matches!(base, "python" | "python3" | "py") {
        // `python -m mypy src/` — the module is the tool.
        let mut iter = command.iter();
        while let Some(arg) = iter.next() {
            if arg == "-m" {
                return iter.next().map(|m| basename(m).to_owned());
            }
        }
        return None;
    }

    Some(base.to_owned())
}

/// Resolve a recipe per the `-f` / `-e` flags and the checker command.
///
/// `explicit` is the `-f` value (`"auto"` means detect); `patterns` are raw
/// `-e` patterns which take precedence over everything else.
pub fn resolve(
    command: &[String],
    explicit: &str,
    patterns: &[String],
) -> Result<Recipe, FormatError> {
    if !patterns.is_empty() {
        return Ok(Recipe::from_patterns(patterns.to_vec()));
    }
    if explicit != "auto" {
        return builtin(explicit).ok_or_else(|| FormatError::ToolNotDetected {
            program: explicit.to_owned(),
        });
    }
    let program = command.first().cloned().unwrap_or_default();
    let tool = detect_tool(command).ok_or_else(|| FormatError::ToolNotDetected {
        program: program.clone(),
    })?;
    builtin(&tool).ok_or(FormatError::ToolNotDetected { program })
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

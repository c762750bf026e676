//! Compiler for the Vim-errorformat subset used by the built-in recipes.
//!
//! Supported tokens: `%f` `%l` `%c` `%e` `%k` `%m` `%t`, the wildcards
//! `%.%#`, `%*\d`, `%*\s`, `%*[...]`, the literal `%%`, and the prefixes
//! `%E %W %I %N` (anchors), `%C` (continuation), `%Z` (multiline end),
//! `%G` (general message), each with optional `+`/`-`. A pattern without a
//! prefix anchors a new block.

use regex::Regex;

use tuick_core::Block;

use crate::error::FormatError;

// ---------------------------------------------------------------------------
// Compiled patterns
// ---------------------------------------------------------------------------

/// What a matching line does to the block stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Starts a new block with the captured location.
    Anchor,
    /// Appends to the open block.
    Continuation,
    /// Appends to the open block and closes it.
    End,
    /// Starts a new informational block (no location).
    Info,
}

#[derive(Debug)]
pub struct CompiledPattern {
    pub kind: Kind,
    pub regex: Regex,
}

impl CompiledPattern {
    /// Match a (stripped) line; on an anchor match, build the block skeleton
    /// from the captured location fields. `content` stays empty — the caller
    /// fills it with the original coloured line.
    pub fn matches(&self, stripped: &str) -> Option<Block> {
        let caps = self.regex.captures(stripped)?;
        let mut block = Block::default();
        if let Some(file) = caps.name("file") {
            block.file = file.as_str().to_owned();
        }
        block.line = number(&caps, "line");
        block.col = number(&caps, "col");
        block.end_line = number(&caps, "end_line");
        block.end_col = number(&caps, "end_col");
        Some(block)
    }
}

fn number(caps: &regex::Captures<'_>, name: &str) -> Option<u32> {
    caps.name(name)
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .filter(|&n| n >= 1)
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

/// Compile one errorformat pattern into an anchored regex.
pub fn compile(pattern: &str) -> Result<CompiledPattern, FormatError> {
    let err = |message: &str| FormatError::Pattern {
        pattern: pattern.to_owned(),
        message: message.to_owned(),
    };

    let (kind, body) = split_prefix(pattern).map_err(|m| err(m))?;

    let mut regex = String::from("^");
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            regex.push_str(&regex::escape(&c.to_string()));
            continue;
        }
        match chars.next() {
            Some('f') => regex.push_str(r"(?P<file>[^\s:][^:]*?)"),
            Some('l') => regex.push_str(r"(?P<line>\d+)"),
            Some('c') => regex.push_str(r"(?P<col>\d+)"),
            Some('e') => regex.push_str(r"(?P<end_line>\d+)"),
            Some('k') => regex.push_str(r"(?P<end_col>\d+)"),
            Some('m') => regex.push_str(r"(?P<message>.*)"),
            Some('t') => regex.push_str(r"(?P<kind>[A-Za-z])"),
            Some('%') => regex.push_str(r"%"),
            Some('.') => regex.push('.'),
            Some('#') => regex.push('*'),
            Some('*') => match chars.next() {
                Some('\\') => match chars.next() {
                    Some('d') => regex.push_str(r"\d+"),
                    Some('s') => regex.push_str(r"\s+"),
                    _ => return Err(err("unsupported %*\\ conversion")),
                },
                Some('[') => {
                    let mut class = String::from("[");
                    for c in chars.by_ref() {
                        class.push(c);
                        if c == ']' {
                            break;
                        }
                    }
                    if !class.ends_with(']') {
                        return Err(err("unterminated %*[ class"));
                    }
                    regex.push_str(&class);
                    regex.push('+');
                }
                _ => return Err(err("unsupported %* conversion")),
            },
            Some(other) => {
                return Err(err(&format!("unsupported token %{other}")));
            }
            None => return Err(err("dangling %")),
        }
    }
    regex.push('$');

    let regex = Regex::new(&regex).map_err(|e| err(&e.to_string()))?;
    Ok(CompiledPattern { kind, regex })
}

/// Compile a whole recipe, preserving pattern order.
pub fn compile_all(patterns: &[String]) -> Result<Vec<CompiledPattern>, FormatError> {
    patterns.iter().map(|p| compile(p)).collect()
}

fn split_prefix(pattern: &str) -> Result<(Kind, &str), &'static str> {
    let rest = match pattern.strip_prefix('%') {
        Some(rest) => rest,
        None => return Ok((Kind::Anchor, pattern)),
    };
    // `%+C`, `%-G`: the +/- display flag is irrelevant here, the adapter
    // keeps every input line either way.
    let rest = rest
        .strip_prefix('+')
        .or_else(|| rest.strip_prefix('-'))
        .unwrap_or(rest);

    let mut chars = rest.chars();
    match chars.next() {
        Some('E' | 'W' | 'I' | 'N') => Ok((Kind::Anchor, chars.as_str())),
        Some('C') => Ok((Kind::Continuation, chars.as_str())),
        Some('Z') => Ok((Kind::End, chars.as_str())),
        Some('G') => Ok((Kind::Info, chars.as_str())),
        Some('O' | 'P' | 'Q') => Err("file-stack prefixes are not supported"),
        // Not a prefix at all — `%f...` and friends anchor by default.
        _ => Ok((Kind::Anchor, pattern)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

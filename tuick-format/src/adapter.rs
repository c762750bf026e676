//! The native streaming adapter: checker output lines in, blocks out.
//!
//! One line at a time, no buffering of the full output. ANSI escapes are
//! stripped for matching only; block content keeps the coloured original.
//! Grouping rules:
//!
//! - an anchor match closes the open block and starts a new one
//! - continuation matches, and unmatched lines while a block is open,
//!   append to the content joined by `\n`
//! - `%Z` appends and closes
//! - `%G` matches and unmatched lines with no open block start an
//!   informational block
//! - a blank line or EOF closes the open block
//!
//! No input line is ever dropped.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;

use tuick_core::Block;

use crate::ansi::strip_sgr;
use crate::error::FormatError;
use crate::pattern::{compile_all, CompiledPattern, Kind};
use crate::registry::Recipe;

// ---------------------------------------------------------------------------
// Parser state machine
// ---------------------------------------------------------------------------

/// Line-at-a-time block grouping. Feed lines without trailing newlines;
/// each call yields at most one completed block.
#[derive(Debug)]
pub struct Parser {
    patterns: Vec<CompiledPattern>,
    current: Option<Block>,
}

impl Parser {
    pub fn new(recipe: &Recipe) -> Result<Self, FormatError> {
        Ok(Self {
            patterns: compile_all(&recipe.patterns)?,
            current: None,
        })
    }

    /// Process one line of checker output (original, possibly coloured).
    pub fn feed_line(&mut self, raw: &str) -> Option<Block> {
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        let stripped = strip_sgr(raw);

        if stripped.trim().is_empty() {
            // Blank line closes the open block and is not itself emitted.
            return self.current.take();
        }

        let hit = self
            .patterns
            .iter()
            .find_map(|p| p.matches(&stripped).map(|block| (p.kind, block)));

        match hit {
            Some((Kind::Anchor, mut skeleton)) => {
                if skeleton.file.is_empty() {
                    // A location is only meaningful with a file name.
                    skeleton = Block::default();
                }
                skeleton.content = raw.to_owned();
                self.current.replace(skeleton)
            }
            Some((Kind::Info, _)) => {
                let done = self.current.take();
                self.current = Some(Block::info(raw));
                done
            }
            Some((Kind::Continuation, _)) | None => {
                match self.current.as_mut() {
                    Some(open) => {
                        open.push_line(raw);
                        None
                    }
                    None => {
                        self.current = Some(Block::info(raw));
                        None
                    }
                }
            }
            Some((Kind::End, _)) => match self.current.as_mut() {
                Some(open) => {
                    open.push_line(raw);
                    self.current.take()
                }
                None => Some(Block::info(raw)),
            },
        }
    }

    /// Flush the open block at end of input.
    pub fn finish(&mut self) -> Option<Block> {
        self.current.take()
    }
}

// ---------------------------------------------------------------------------
// Streaming drivers
// ---------------------------------------------------------------------------

/// Drive the parser from a channel of raw output lines.
///
/// Each completed block is sent before the next line is taken, so finder
/// back-pressure propagates to the checker pipe. A dropped block receiver
/// means the generation was superseded; the stream stops quietly.
pub async fn stream_lines(
    recipe: &Recipe,
    mut lines: mpsc::Receiver<String>,
    blocks: mpsc::Sender<Block>,
) -> Result<(), FormatError> {
    let mut parser = Parser::new(recipe)?;
    while let Some(line) = lines.recv().await {
        if let Some(block) = parser.feed_line(&line) {
            if blocks.send(block).await.is_err() {
                return Ok(());
            }
        }
    }
    if let Some(block) = parser.finish() {
        let _ = blocks.send(block).await;
    }
    Ok(())
}

/// Drive the parser straight from a byte reader (used by `--format`).
/// Invalid UTF-8 is replaced, never fatal.
pub async fn stream_reader<R>(
    recipe: &Recipe,
    mut reader: R,
    blocks: mpsc::Sender<Block>,
) -> Result<(), FormatError>
where
    R: AsyncBufRead + Unpin,
{
    let mut parser = Parser::new(recipe)?;
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = reader.read_until(b'\n', &mut buf).await?;
        if read == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.strip_suffix('\n').unwrap_or(&line);
        if let Some(block) = parser.feed_line(line) {
            if blocks.send(block).await.is_err() {
                return Ok(());
            }
        }
    }
    if let Some(block) = parser.finish() {
        let _ = blocks.send(block).await;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::builtin;

    fn parse_all(recipe: &Recipe, lines: &[&str]) -> Vec<Block> {
        let mut parser = Parser::new(recipe).expect("parser");
        let mut blocks: Vec<Block> = lines.iter().filter_map(|l| parser.feed_line(l)).collect();
        blocks.extend(parser.finish());
        blocks
    }

    #[test]
    fn single_ruff_line() {
        let recipe = builtin("ruff").unwrap();
        let blocks = parse_all(&recipe, &["a.py:3:5: oops"]);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].file, "a.py");
        assert_eq!(blocks[0].line, Some(3));
        assert_eq!(blocks[0].col, Some(5));
        assert_eq!(blocks[0].end_line, None);
        assert_eq!(blocks[0].end_col, None);
        assert_eq!(blocks[0].content, "a.py:3:5: oops");
    }

    #[test]
    fn multiline_mypy_block() {
        let recipe = builtin("mypy").unwrap();
        let blocks = parse_all(&recipe, &["b.py:1:1: error: bad", "    note: see here"]);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].file, "b.py");
        assert_eq!(blocks[0].line, Some(1));
        assert_eq!(blocks[0].col, Some(1));
        assert_eq!(blocks[0].content, "b.py:1:1: error: bad\n    note: see here");
    }

    #[test]
    fn informational_summary() {
        let recipe = builtin("ruff").unwrap();
        let blocks = parse_all(&recipe, &["Summary: 3 errors"]);
        assert_eq!(blocks.len(), 1);
        assert!(!blocks[0].has_location());
        assert_eq!(blocks[0].content, "Summary: 3 errors");
    }

    #[test]
    fn new_anchor_closes_previous_block() {
        let recipe = builtin("ruff").unwrap();
        let blocks = parse_all(&recipe, &["a.py:1:1: first", "a.py:2:2: second"]);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].line, Some(1));
        assert_eq!(blocks[1].line, Some(2));
    }

    #[test]
    fn blank_line_closes_block() {
        let recipe = builtin("mypy").unwrap();
        let blocks = parse_all(
            &recipe,
            &["a.py:1:1: error: x", "", "Found 1 error in 1 file"],
        );
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].file, "a.py");
        assert!(!blocks[1].has_location());
        assert_eq!(blocks[1].content, "Found 1 error in 1 file");
    }

    #[test]
    fn consecutive_unmatched_lines_share_one_info_block() {
        let recipe = builtin("ruff").unwrap();
        let blocks = parse_all(&recipe, &["first plain line", "second plain line"]);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].content, "first plain line\nsecond plain line");
    }

    #[test]
    fn ansi_is_stripped_for_matching_only() {
        let recipe = builtin("ruff").unwrap();
        let coloured = "\x1b[1ma.py\x1b[0m:3:5: \x1b[31moops\x1b[0m";
        let blocks = parse_all(&recipe, &[coloured]);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].file, "a.py");
        assert_eq!(blocks[0].content, coloured, "coloured original preserved");
    }

    #[test]
    fn pytest_separator_starts_info_block() {
        let recipe = builtin("pytest").unwrap();
        let blocks = parse_all(
            &recipe,
            &[
                "==================== FAILURES ====================",
                "____________________ test_foo ____________________",
            ],
        );
        // Each separator starts its own informational block.
        assert_eq!(blocks.len(), 2);
        assert!(blocks.iter().all(|b| !b.has_location()));
    }

    #[test]
    fn crlf_input_is_tolerated() {
        let recipe = builtin("ruff").unwrap();
        let blocks = parse_all(&recipe, &["a.py:3:5: oops\r"]);
        assert_eq!(blocks[0].content, "a.py:3:5: oops");
    }

    #[tokio::test]
    async fn channel_stream_preserves_order_and_backpressure() {
        let recipe = builtin("ruff").unwrap();
        let (line_tx, line_rx) = mpsc::channel(1);
        let (block_tx, mut block_rx) = mpsc::channel(1);

        let task = tokio::spawn(async move { stream_lines(&recipe, line_rx, block_tx).await });

        for i in 1..=3 {
            line_tx.send(format!("a.py:{i}:1: e{i}")).await.unwrap();
            // With a capacity-1 block channel the adapter cannot run ahead:
            // block i-1 must be consumed before line i+1 is accepted.
            if i > 1 {
                let block = block_rx.recv().await.expect("block");
                assert_eq!(block.line, Some(i - 1));
            }
        }
        drop(line_tx);
        let last = block_rx.recv().await.expect("final block");
        assert_eq!(last.line, Some(3));
        assert!(block_rx.recv().await.is_none());
        task.await.expect("join").expect("stream");
    }
}

//! External parsing engine: the reviewdog `errorformat` helper.
//!
//! Spawns `errorformat -w=jsonl`, feeds it ANSI-stripped checker lines, and
//! turns the JSONL entries back into blocks with the coloured originals
//! restored. Mypy note entries (no line number) are merged into the next
//! error from the same file, matching what the native engine's recipe does
//! with continuation lines.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use tuick_core::Block;

use crate::ansi::strip_sgr;
use crate::error::FormatError;
use crate::registry::Recipe;

// ---------------------------------------------------------------------------
// JSONL entries
// ---------------------------------------------------------------------------

/// One line of `errorformat -w=jsonl` output.
#[derive(Debug, Clone, Default, Deserialize)]
struct Entry {
    #[serde(default)]
    filename: String,
    #[serde(default)]
    lnum: u32,
    #[serde(default)]
    col: u32,
    #[serde(default)]
    end_lnum: u32,
    #[serde(default)]
    end_col: u32,
    #[serde(default)]
    lines: Vec<String>,
    #[serde(default)]
    text: String,
}

impl Entry {
    fn into_block(self, originals: &HashMap<String, String>) -> Block {
        let restored: Vec<String> = self
            .lines
            .iter()
            .map(|line| originals.get(line).cloned().unwrap_or_else(|| line.clone()))
            .collect();
        let content = if restored.is_empty() {
            self.text
        } else {
            restored.join("\n")
        };
        Block {
            file: self.filename,
            line: nonzero(self.lnum),
            col: nonzero(self.col),
            end_line: nonzero(self.end_lnum),
            end_col: nonzero(self.end_col),
            content,
        }
    }
}

fn nonzero(n: u32) -> Option<u32> {
    (n >= 1).then_some(n)
}

// ---------------------------------------------------------------------------
// Note grouping (mypy)
// ---------------------------------------------------------------------------

/// Merges line-less note entries into the following error from the same
/// file, and consecutive entries at the same location into one.
#[derive(Debug, Default)]
struct NoteGrouper {
    pending_note: Option<Entry>,
    pending_block: Option<Entry>,
}

impl NoteGrouper {
    fn push(&mut self, mut entry: Entry) -> Vec<Entry> {
        let mut out = Vec::new();

        if entry.lnum == 0 {
            match self.pending_note.as_mut() {
                Some(note) if note.filename == entry.filename => {
                    note.lines.append(&mut entry.lines);
                }
                Some(_) => {
                    out.extend(self.pending_note.replace(entry));
                }
                None => self.pending_note = Some(entry),
            }
            return out;
        }

        if let Some(note) = self.pending_note.take() {
            if note.filename == entry.filename {
                let mut lines = note.lines;
                lines.append(&mut entry.lines);
                entry.lines = lines;
            } else {
                out.push(note);
            }
        }

        let same_location = self.pending_block.as_ref().is_some_and(|b| {
            (b.filename.as_str(), b.lnum, b.col)
                == (entry.filename.as_str(), entry.lnum, entry.col)
        });
        if same_location {
            let block = self.pending_block.as_mut().unwrap();
            block.lines.append(&mut entry.lines);
        } else {
            out.extend(self.pending_block.replace(entry));
        }
        out
    }

    fn finish(&mut self) -> Vec<Entry> {
        self.pending_block
            .take()
            .into_iter()
            .chain(self.pending_note.take())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Streaming driver
// ---------------------------------------------------------------------------

/// Run the helper over a channel of raw checker lines, sending blocks out.
pub async fn stream_lines(
    recipe: &Recipe,
    mut lines: mpsc::Receiver<String>,
    blocks: mpsc::Sender<Block>,
) -> Result<(), FormatError> {
    let mut cmd = Command::new("errorformat");
    cmd.arg("-w=jsonl");
    match recipe.tool.as_deref() {
        Some(tool) => {
            cmd.arg(format!("-name={tool}"));
        }
        None => {
            cmd.args(&recipe.patterns);
        }
    }
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = cmd.spawn().map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            FormatError::HelperNotFound
        } else {
            FormatError::Io(err)
        }
    })?;

    let mut stdin = child.stdin.take().expect("helper stdin piped");
    let stdout = child.stdout.take().expect("helper stdout piped");

    // Stripped line -> coloured original, filled by the writer and read back
    // when entries come out the other side.
    let originals: Arc<Mutex<HashMap<String, String>>> = Arc::default();

    let writer = {
        let originals = originals.clone();
        tokio::spawn(async move {
            while let Some(line) = lines.recv().await {
                let line = line.strip_suffix('\r').unwrap_or(&line).to_owned();
                let stripped = strip_sgr(&line);
                originals
                    .lock()
                    .expect("originals lock")
                    .insert(stripped.clone(), line);
                if stdin.write_all(stripped.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.write_all(b"\n").await.is_err() {
                    break;
                }
            }
            // Dropping stdin signals EOF to the helper.
        })
    };

    let grouping = recipe.tool.as_deref() == Some("mypy");
    let mut grouper = NoteGrouper::default();
    let mut reader = BufReader::new(stdout).lines();
    let mut receiver_gone = false;

    while let Some(line) = reader.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let entry: Entry = match serde_json::from_str(&line) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(error = %err, "skipping malformed helper entry");
                continue;
            }
        };
        let ready = if grouping {
            grouper.push(entry)
        } else {
            vec![entry]
        };
        for entry in ready {
            if !send_entry(entry, &originals, &blocks).await {
                receiver_gone = true;
                break;
            }
        }
        if receiver_gone {
            break;
        }
    }

    if !receiver_gone {
        for entry in grouper.finish() {
            if !send_entry(entry, &originals, &blocks).await {
                break;
            }
        }
    }

    writer.await.map_err(|_| FormatError::ChannelClosed("helper writer"))?;
    let status = child.wait().await?;
    if !status.success() && !receiver_gone {
        return Err(FormatError::HelperFailed {
            code: status.code(),
        });
    }
    Ok(())
}

async fn send_entry(
    entry: Entry,
    originals: &Arc<Mutex<HashMap<String, String>>>,
    blocks: &mpsc::Sender<Block>,
) -> bool {
    let block = {
        let originals = originals.lock().expect("originals lock");
        entry.into_block(&originals)
    };
    if block.content.is_empty() {
        return true;
    }
    blocks.send(block).await.is_ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(filename: &str, lnum: u32, col: u32, lines: &[&str]) -> Entry {
        Entry {
            filename: filename.into(),
            lnum,
            col,
            lines: lines.iter().map(|l| (*l).to_owned()).collect(),
            ..Entry::default()
        }
    }

    #[test]
    fn note_merges_into_following_error_same_file() {
        let mut grouper = NoteGrouper::default();
        let out = grouper.push(entry("a.py", 0, 0, &["a.py: note: context"]));
        assert!(out.is_empty());
        let out = grouper.push(entry("a.py", 10, 2, &["a.py:10:2: error: bad"]));
        assert!(out.is_empty());
        let done = grouper.finish();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].lnum, 10);
        assert_eq!(
            done[0].lines,
            vec!["a.py: note: context", "a.py:10:2: error: bad"]
        );
    }

    #[test]
    fn note_for_other_file_is_flushed_alone() {
        let mut grouper = NoteGrouper::default();
        grouper.push(entry("a.py", 0, 0, &["a.py: note: context"]));
        let out = grouper.push(entry("b.py", 5, 1, &["b.py:5:1: error: bad"]));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].filename, "a.py");
        let done = grouper.finish();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].filename, "b.py");
    }

    #[test]
    fn same_location_entries_merge() {
        let mut grouper = NoteGrouper::default();
        grouper.push(entry("a.py", 3, 1, &["first"]));
        let out = grouper.push(entry("a.py", 3, 1, &["second"]));
        assert!(out.is_empty());
        let done = grouper.finish();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].lines, vec!["first", "second"]);
    }

    #[test]
    fn entry_restores_coloured_lines() {
        let mut originals = HashMap::new();
        originals.insert(
            "a.py:1:1: error: bad".to_owned(),
            "\x1b[1ma.py\x1b[0m:1:1: error: bad".to_owned(),
        );
        let block = entry("a.py", 1, 1, &["a.py:1:1: error: bad"]).into_block(&originals);
        assert_eq!(block.content, "\x1b[1ma.py\x1b[0m:1:1: error: bad");
        assert_eq!(block.line, Some(1));
    }

    #[test]
    fn entry_with_no_lines_falls_back_to_text() {
        let mut e = entry("a.py", 2, 1, &[]);
        e.text = "bad".into();
        let block = e.into_block(&HashMap::new());
        assert_eq!(block.content, "bad");
    }
}

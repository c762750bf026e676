//! The session save file.
//!
//! Raw checker output (stdout and stderr, unparsed) is appended by a single
//! writer task; everything else only reads. On exit the controller prints
//! the last completed run back to the user from here, so the result stays
//! visible after the TUI closes.

use std::path::{Path, PathBuf};

use tempfile::TempPath;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWrite, AsyncWriteExt, BufWriter, SeekFrom};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{io_err, SessionError};

/// Messages accepted by the writer task.
#[derive(Debug)]
pub enum SaveMessage {
    /// One raw output line, without trailing newline.
    Line(String),
    /// Report the current end-of-file offset, after everything queued
    /// before this message has been written.
    Mark(oneshot::Sender<u64>),
}

pub struct SaveFile {
    path: PathBuf,
    tx: mpsc::Sender<SaveMessage>,
    writer: JoinHandle<Result<(), SessionError>>,
    // Keeps the temp file alive for the session; removed on drop.
    _temp: TempPath,
}

impl SaveFile {
    pub async fn create() -> Result<Self, SessionError> {
        let file = tempfile::Builder::new()
            .prefix("tuick-")
            .suffix(".out")
            .tempfile()
            .map_err(|e| io_err(std::env::temp_dir(), e))?;
        let (std_file, temp) = file.into_parts();
        let path = temp.to_path_buf();

        let (tx, rx) = mpsc::channel(64);
        let writer = tokio::spawn(write_loop(File::from_std(std_file), path.clone(), rx));

        Ok(Self {
            path,
            tx,
            writer,
            _temp: temp,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sender handed to runner tee tasks.
    pub fn sender(&self) -> mpsc::Sender<SaveMessage> {
        self.tx.clone()
    }

    /// Current end offset, once all previously queued lines are on disk.
    /// Called at each generation boundary, after the old runner is reaped.
    pub async fn mark(&self) -> Result<u64, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SaveMessage::Mark(reply_tx))
            .await
            .map_err(|_| SessionError::ChannelClosed("save writer"))?;
        reply_rx
            .await
            .map_err(|_| SessionError::ChannelClosed("save mark"))
    }

    /// Stop the writer and copy everything from `offset` to `out`.
    pub async fn print_back<W>(self, offset: u64, out: &mut W) -> Result<(), SessionError>
    where
        W: AsyncWrite + Unpin,
    {
        drop(self.tx);
        self.writer
            .await
            .map_err(|_| SessionError::ChannelClosed("save writer"))??;

        let mut file = File::open(&self.path)
            .await
            .map_err(|e| io_err(&self.path, e))?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| io_err(&self.path, e))?;
        tokio::io::copy(&mut file, out)
            .await
            .map_err(|e| io_err(&self.path, e))?;
        out.flush().await.map_err(|e| io_err(&self.path, e))?;
        Ok(())
    }
}

async fn write_loop(
    file: File,
    path: PathBuf,
    mut rx: mpsc::Receiver<SaveMessage>,
) -> Result<(), SessionError> {
    let mut out = BufWriter::new(file);
    let mut offset: u64 = 0;
    while let Some(message) = rx.recv().await {
        match message {
            SaveMessage::Line(line) => {
                out.write_all(line.as_bytes())
                    .await
                    .map_err(|e| io_err(&path, e))?;
                out.write_all(b"\n").await.map_err(|e| io_err(&path, e))?;
                offset += line.len() as u64 + 1;
            }
            SaveMessage::Mark(reply) => {
                out.flush().await.map_err(|e| io_err(&path, e))?;
                let _ = reply.send(offset);
            }
        }
    }
    out.flush().await.map_err(|e| io_err(&path, e))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lines_are_appended_in_order() {
        let save = SaveFile::create().await.expect("create");
        let tx = save.sender();
        tx.send(SaveMessage::Line("first".into())).await.unwrap();
        tx.send(SaveMessage::Line("second".into())).await.unwrap();
        drop(tx);

        let mut out = Vec::new();
        save.print_back(0, &mut out).await.expect("print back");
        assert_eq!(out, b"first\nsecond\n");
    }

    #[tokio::test]
    async fn mark_reports_offset_after_queued_lines() {
        let save = SaveFile::create().await.expect("create");
        let tx = save.sender();
        tx.send(SaveMessage::Line("old run".into())).await.unwrap();
        let offset = save.mark().await.expect("mark");
        assert_eq!(offset, "old run\n".len() as u64);

        tx.send(SaveMessage::Line("new run".into())).await.unwrap();
        drop(tx);

        let mut out = Vec::new();
        save.print_back(offset, &mut out).await.expect("print back");
        assert_eq!(out, b"new run\n");
    }

    #[tokio::test]
    async fn save_file_is_removed_on_drop() {
        let save = SaveFile::create().await.expect("create");
        let path = save.path().to_path_buf();
        assert!(path.exists());
        let mut sink = Vec::new();
        save.print_back(0, &mut sink).await.expect("print back");
        assert!(!path.exists(), "temp file should be cleaned up");
    }
}

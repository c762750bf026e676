//! Block records and their wire serialisation.
//!
//! A block is one diagnostic unit of checker output: an optional source
//! location plus the original (possibly ANSI-coloured) text. On the wire a
//! block is six `0x1F`-separated fields terminated by `0x00`:
//!
//! ```text
//! file \x1f line \x1f col \x1f end_line \x1f end_col \x1f content \x00
//! ```
//!
//! Absent numeric fields serialise as empty strings. The finder displays
//! field 6 and hands fields 1–5 back through the select callback.

use std::fmt;

use crate::error::BlockError;

/// Field separator on the wire.
pub const FIELD_SEP: u8 = 0x1f;
/// Record terminator on the wire.
pub const RECORD_SEP: u8 = 0x00;

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// One parsed unit of checker output.
///
/// Invariant: if any location field is `Some`, `file` is non-empty.
/// Informational blocks (summaries, notes without an anchor) have an empty
/// `file`, all numeric fields absent, and non-empty `content`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Block {
    pub file: String,
    pub line: Option<u32>,
    pub col: Option<u32>,
    pub end_line: Option<u32>,
    pub end_col: Option<u32>,
    /// Original text, ANSI SGR sequences and embedded newlines preserved.
    pub content: String,
}

impl Block {
    /// An informational block: no location, content only.
    pub fn info(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    /// True when the block carries any location field.
    pub fn has_location(&self) -> bool {
        self.line.is_some()
            || self.col.is_some()
            || self.end_line.is_some()
            || self.end_col.is_some()
            || !self.file.is_empty()
    }

    /// Append a continuation line to the content, joined by `\n`.
    pub fn push_line(&mut self, line: &str) {
        if !self.content.is_empty() {
            self.content.push('\n');
        }
        self.content.push_str(line);
    }

    fn check(&self) -> Result<(), BlockError> {
        if self.content.is_empty() {
            return Err(BlockError::EmptyContent);
        }
        if self.file.is_empty()
            && (self.line.is_some()
                || self.col.is_some()
                || self.end_line.is_some()
                || self.end_col.is_some())
        {
            return Err(BlockError::LocationWithoutFile);
        }
        Ok(())
    }

    /// Serialise to the wire format.
    ///
    /// Fails with [`BlockError::Delimiter`] if `content` contains a reserved
    /// byte; use [`Block::encode_lossy`] to strip instead.
    pub fn encode(&self) -> Result<Vec<u8>, BlockError> {
        self.check()?;
        for &byte in [FIELD_SEP, RECORD_SEP].iter() {
            if self.content.as_bytes().contains(&byte) {
                return Err(BlockError::Delimiter { byte });
            }
        }
        Ok(self.encode_raw(&self.content))
    }

    /// Serialise to the wire format, stripping reserved bytes from the
    /// content. This is the default policy for the live stream: a dirty
    /// block is better shown than dropped.
    pub fn encode_lossy(&self) -> Result<Vec<u8>, BlockError> {
        self.check()?;
        match self.encode() {
            Ok(bytes) => Ok(bytes),
            Err(BlockError::Delimiter { .. }) => {
                let clean: String = self
                    .content
                    .chars()
                    .filter(|&c| c != FIELD_SEP as char && c != RECORD_SEP as char)
                    .collect();
                Ok(self.encode_raw(&clean))
            }
            Err(other) => Err(other),
        }
    }

    fn encode_raw(&self, content: &str) -> Vec<u8> {
        let mut out = Vec::with_capacity(content.len() + 24);
        out.extend_from_slice(self.file.as_bytes());
        for field in [self.line, self.col, self.end_line, self.end_col] {
            out.push(FIELD_SEP);
            if let Some(n) = field {
                out.extend_from_slice(n.to_string().as_bytes());
            }
        }
        out.push(FIELD_SEP);
        out.extend_from_slice(content.as_bytes());
        out.push(RECORD_SEP);
        out
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.line, self.col) {
            (Some(line), Some(col)) => write!(f, "{}:{line}:{col}", self.file),
            (Some(line), None) => write!(f, "{}:{line}", self.file),
            _ if !self.file.is_empty() => write!(f, "{}", self.file),
            _ => write!(f, "<info>"),
        }
    }
}

// ---------------------------------------------------------------------------
// Location (select-callback side)
// ---------------------------------------------------------------------------

/// The first five wire fields, as handed to the select callback.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Location {
    pub file: String,
    pub line: Option<u32>,
    pub col: Option<u32>,
    pub end_line: Option<u32>,
    pub end_col: Option<u32>,
}

impl Location {
    /// Parse the five location arguments of a select callback. Empty strings
    /// mean "absent"; anything else must be a positive integer.
    pub fn from_fields(
        file: &str,
        line: &str,
        col: &str,
        end_line: &str,
        end_col: &str,
    ) -> Result<Self, BlockError> {
        Ok(Self {
            file: file.to_owned(),
            line: parse_field("line", line)?,
            col: parse_field("col", col)?,
            end_line: parse_field("end_line", end_line)?,
            end_col: parse_field("end_col", end_col)?,
        })
    }

    /// Decode the location prefix of one wire record. Trailing content (the
    /// sixth field, up to the record terminator) is ignored.
    pub fn decode(record: &[u8]) -> Result<Self, BlockError> {
        let record = match record.iter().position(|&b| b == RECORD_SEP) {
            Some(end) => &record[..end],
            None => record,
        };
        let mut fields = record.split(|&b| b == FIELD_SEP);
        let mut next = |name: &'static str| -> Result<String, BlockError> {
            let raw = fields.next().unwrap_or_default();
            String::from_utf8(raw.to_vec()).map_err(|_| BlockError::InvalidField {
                field: name,
                value: String::from_utf8_lossy(raw).into_owned(),
            })
        };
        let file = next("file")?;
        let line = next("line")?;
        let col = next("col")?;
        let end_line = next("end_line")?;
        let end_col = next("end_col")?;
        Self::from_fields(&file, &line, &col, &end_line, &end_col)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file)?;
        if let Some(line) = self.line {
            write!(f, ":{line}")?;
            if let Some(col) = self.col {
                write!(f, ":{col}")?;
            }
        }
        Ok(())
    }
}

fn parse_field(field: &'static str, value: &str) -> Result<Option<u32>, BlockError> {
    if value.is_empty() {
        return Ok(None);
    }
    match value.parse::<u32>() {
        Ok(n) if n >= 1 => Ok(Some(n)),
        _ => Err(BlockError::InvalidField {
            field,
            value: value.to_owned(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn located(file: &str, line: u32, col: u32, content: &str) -> Block {
        Block {
            file: file.into(),
            line: Some(line),
            col: Some(col),
            content: content.into(),
            ..Block::default()
        }
    }

    #[test]
    fn encode_full_record() {
        let block = located("a.py", 3, 5, "a.py:3:5: oops");
        let bytes = block.encode().expect("encode");
        assert_eq!(bytes, b"a.py\x1f3\x1f5\x1f\x1f\x1fa.py:3:5: oops\x00");
    }

    #[test]
    fn encode_info_record() {
        let block = Block::info("Found 3 errors");
        let bytes = block.encode().expect("encode");
        assert_eq!(bytes, b"\x1f\x1f\x1f\x1f\x1fFound 3 errors\x00");
    }

    #[test]
    fn encode_rejects_delimiter_in_content() {
        let block = Block::info("bad\x1fbytes");
        assert_eq!(block.encode(), Err(BlockError::Delimiter { byte: 0x1f }));
    }

    #[test]
    fn encode_lossy_strips_delimiters() {
        let block = Block::info("bad\x1fand\x00worse");
        let bytes = block.encode_lossy().expect("lossy encode");
        assert_eq!(bytes, b"\x1f\x1f\x1f\x1f\x1fbadandworse\x00");
    }

    #[test]
    fn encode_rejects_empty_content() {
        assert_eq!(Block::default().encode(), Err(BlockError::EmptyContent));
    }

    #[test]
    fn encode_rejects_location_without_file() {
        let block = Block {
            line: Some(1),
            content: "oops".into(),
            ..Block::default()
        };
        assert_eq!(block.encode(), Err(BlockError::LocationWithoutFile));
    }

    #[test]
    fn multiline_content_survives_encode() {
        let mut block = located("b.py", 1, 1, "b.py:1:1: error: bad");
        block.push_line("    note: see here");
        let bytes = block.encode().expect("encode");
        assert_eq!(
            bytes,
            b"b.py\x1f1\x1f1\x1f\x1f\x1fb.py:1:1: error: bad\n    note: see here\x00"
        );
    }

    #[test]
    fn decode_location_ignores_content() {
        let record = b"a.py\x1f3\x1f5\x1f\x1f\x1fa.py:3:5: oops\x00";
        let loc = Location::decode(record).expect("decode");
        assert_eq!(loc.file, "a.py");
        assert_eq!(loc.line, Some(3));
        assert_eq!(loc.col, Some(5));
        assert_eq!(loc.end_line, None);
        assert_eq!(loc.end_col, None);
    }

    #[test]
    fn decode_rejects_zero_line() {
        let err = Location::from_fields("a.py", "0", "", "", "").unwrap_err();
        assert_eq!(
            err,
            BlockError::InvalidField {
                field: "line",
                value: "0".into()
            }
        );
    }

    #[test]
    fn location_display() {
        let loc = Location::from_fields("a.py", "3", "5", "", "").unwrap();
        assert_eq!(loc.to_string(), "a.py:3:5");
        let no_col = Location::from_fields("a.py", "3", "", "", "").unwrap();
        assert_eq!(no_col.to_string(), "a.py:3");
    }
}

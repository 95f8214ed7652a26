//! Newline-delimited JSON document source.

use std::io::{BufRead, Lines};

use serde_json::Value;

use crate::error::{DbError, DbResult};

/// Yields one document per non-blank line of a reader.
///
/// Lines are trimmed before parsing. A line that is not a JSON object yields
/// [`DbError::InvalidDocument`] carrying its 1-based line number.
pub struct NdjsonSource<R> {
    lines: Lines<R>,
    line: usize,
}

impl<R: BufRead> NdjsonSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line: 0,
        }
    }
}

impl<R: BufRead> Iterator for NdjsonSource<R> {
    type Item = DbResult<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let text = match self.lines.next()? {
                Ok(text) => text,
                Err(e) => return Some(Err(e.into())),
            };
            self.line += 1;
            let trimmed = text.trim();
            if trimmed.is_empty() {
                continue;
            }
            let line = self.line;
            return Some(match serde_json::from_str::<Value>(trimmed) {
                Ok(value) if value.is_object() => Ok(value),
                Ok(_) => Err(DbError::InvalidDocument {
                    line,
                    reason: "not a JSON object".into(),
                }),
                Err(e) => Err(DbError::InvalidDocument {
                    line,
                    reason: e.to_string(),
                }),
            });
        }
    }
}

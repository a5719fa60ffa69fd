//! Newline index for byte ↔ line mapping.
//!
//! - One memchr pass records every '\n'.
//! - Lines are 0-based here; callers reporting to users add one.
//! - A line's span excludes its terminator, including the '\r' of CRLF.
//! - An empty buffer has no lines; a trailing '\n' does not open a new one.

#[derive(Debug, Clone)]
pub struct LineIndex {
    /// Byte offset of every '\n'
    newlines: Vec<usize>,
    /// Buffer length
    len: usize,
}

impl LineIndex {
    pub fn build(bytes: &[u8]) -> Self {
        let newlines: Vec<usize> = memchr::memchr_iter(b'\n', bytes).collect();
        Self {
            newlines,
            len: bytes.len(),
        }
    }

    /// Number of lines with content or a terminator.
    pub fn line_count(&self) -> usize {
        if self.len == 0 {
            return 0;
        }
        match self.newlines.last() {
            Some(&last) if last + 1 == self.len => self.newlines.len(),
            _ => self.newlines.len() + 1,
        }
    }

    /// First byte of `line`.
    pub fn line_start(&self, line: usize) -> Option<usize> {
        if line >= self.line_count() {
            return None;
        }
        Some(match line {
            0 => 0,
            n => self.newlines[n - 1] + 1,
        })
    }

    /// `(start, end)` of `line`, end exclusive and before any "\r\n" / "\n".
    pub fn line_span(&self, line: usize, bytes: &[u8]) -> Option<(usize, usize)> {
        let start = self.line_start(line)?;
        let mut end = self.newlines.get(line).copied().unwrap_or(self.len);
        if end > start && bytes.get(end - 1) == Some(&b'\r') {
            end -= 1;
        }
        Some((start, end))
    }

    /// Iterate `(start, end)` spans of every line.
    pub fn spans<'a>(&'a self, bytes: &'a [u8]) -> impl Iterator<Item = (usize, usize)> + 'a {
        (0..self.line_count()).filter_map(move |line| self.line_span(line, bytes))
    }
}

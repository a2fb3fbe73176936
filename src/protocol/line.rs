//! Newline-delimited UTF-8 text messages.
//!
//! One message per line. A single read may carry zero, one or several
//! lines plus an incomplete tail, which stays buffered until a later read
//! completes it.

/// Encode `text` as one line: embedded line breaks become spaces, then a
/// single `\n` terminator is appended.
pub fn encode_line(text: &str) -> Vec<u8> {
    let mut line: String = text
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    line.push('\n');
    line.into_bytes()
}

/// Incremental line splitter for a byte stream.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed received bytes, returning every line they complete.
    ///
    /// Lines are decoded lossily and lose their terminator (and a trailing
    /// `\r`, if any). Empty lines are returned as empty strings; callers
    /// decide whether they count as messages.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            lines.push(decode(&self.pending[start..end]));
            start = end + 1;
        }
        self.pending.drain(..start);
        lines
    }

    /// Bytes buffered after the last complete line.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Take the unterminated tail at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let tail = decode(&self.pending);
        self.pending.clear();
        Some(tail)
    }
}

fn decode(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

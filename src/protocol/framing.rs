//! Newline-delimited frame reassembly.
//!
//! Server stdout arrives as arbitrary byte chunks: one chunk may carry
//! several complete lines plus a partial tail, and a single line may span
//! many chunks. The accumulator owns the carry-over buffer so the reader
//! loop stays a plain `read` → `push` cycle.

/// Accumulates byte chunks and yields complete lines.
#[derive(Debug, Default)]
pub struct LineAccumulator {
    buf: Vec<u8>,
}

impl LineAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns every line completed by it.
    ///
    /// Lines are returned without their trailing `\n` (and `\r`, for
    /// servers that emit CRLF). Invalid UTF-8 is replaced rather than
    /// dropped so a garbled line still gets logged downstream.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop(); // the newline itself
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Bytes held back waiting for a newline.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

//! Response Line Framing

use obd_protocol::PROMPT;

/// One framed unit read from the adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete, trimmed, non-empty response line
    Line(String),
    /// The adapter printed its prompt and is ready for the next command
    Prompt,
}

/// Incremental splitter turning raw bytes into [`Frame`]s
///
/// Both `\r` and `\n` terminate a line since some adapters only send bare
/// carriage returns. Empty lines are swallowed, so a `\r\n` pair never
/// yields the same line twice.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
}

impl LineFramer {
    /// Create an empty framer
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning every frame they complete
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        for &byte in bytes {
            match byte {
                b'\r' | b'\n' => self.flush_line(&mut frames),
                PROMPT => {
                    self.flush_line(&mut frames);
                    frames.push(Frame::Prompt);
                }
                // Some clones pad their output with NUL bytes
                0 => {}
                _ => self.buffer.push(byte),
            }
        }
        frames
    }

    /// Bytes received that do not yet form a complete line
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn flush_line(&mut self, frames: &mut Vec<Frame>) {
        if self.buffer.is_empty() {
            return;
        }
        let line = String::from_utf8_lossy(&self.buffer).trim().to_string();
        self.buffer.clear();
        if !line.is_empty() {
            frames.push(Frame::Line(line));
        }
    }
}

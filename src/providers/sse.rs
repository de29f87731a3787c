//! Minimal server-sent-events line reassembly.
//!
//! Provider byte streams arrive in arbitrary chunk boundaries; this buffer
//! reassembles them into complete `data:` payloads for the adapters to parse.

/// Accumulates raw bytes and yields the payload of each complete `data:` line.
#[derive(Default)]
pub(crate) struct DataLineBuffer {
    buf: String,
}

impl DataLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns the `data:` payloads of every line completed
    /// by it, in order. Non-data lines (event names, comments, blanks) are
    /// skipped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.push_str(&String::from_utf8_lossy(chunk));
        let mut out = Vec::new();
        while let Some(pos) = self.buf.find('\n') {
            let line: String = self.buf.drain(..=pos).collect();
            let line = line.trim();
            if let Some(payload) = line.strip_prefix("data:") {
                out.push(payload.trim().to_string());
            }
        }
        out
    }
}

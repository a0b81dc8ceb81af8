//! Framing for the generation response body.
//!
//! The body is a sequence of records separated by a blank line (`\n\n`).
//! Chunks may split a record anywhere, including inside a multi-byte
//! character, so the decoder buffers raw bytes and only decodes text once a
//! record is complete.

/// Prefix that marks a line as carrying a record payload.
pub const DATA_PREFIX: &str = "data: ";

const DELIMITER: &[u8] = b"\n\n";

/// Incremental decoder turning body chunks into candidate frame payloads.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Offset in `buffer` below which no delimiter can start.
    scanned: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return the payloads of every record it completes.
    ///
    /// Returned strings have the `data: ` prefix removed. Lines without the
    /// prefix are discarded.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut consumed = 0;
        let mut from = self.scanned;

        while let Some(pos) = find_delimiter(&self.buffer[from..]) {
            let end = from + pos;
            collect_payloads(&self.buffer[consumed..end], &mut frames);
            consumed = end + DELIMITER.len();
            from = consumed;
        }

        // A delimiter may straddle this chunk and the next one.
        self.scanned = self
            .buffer
            .len()
            .saturating_sub(DELIMITER.len() - 1)
            .max(consumed)
            - consumed;
        if consumed > 0 {
            self.buffer.drain(..consumed);
        }

        frames
    }

    /// End of body. The unterminated remainder is dropped, never parsed.
    /// Returns how many bytes were discarded.
    pub fn finish(&mut self) -> usize {
        let discarded = self.buffer.len();
        self.buffer.clear();
        self.scanned = 0;
        discarded
    }
}

fn find_delimiter(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(DELIMITER.len())
        .position(|window| window == DELIMITER)
}

fn collect_payloads(block: &[u8], out: &mut Vec<String>) {
    let text = String::from_utf8_lossy(block);
    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if let Some(payload) = line.strip_prefix(DATA_PREFIX) {
            out.push(payload.to_string());
        }
    }
}

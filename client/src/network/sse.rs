//! Incremental Server-Sent Events parser.

/// One dispatched SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Splits a byte stream into SSE frames. Comment lines (keep-alives) and
/// frames without data are dropped.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    pending: Vec<u8>,
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every frame completed by them.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.pending.extend_from_slice(chunk);
        // Keep a trailing partial UTF-8 sequence for the next chunk.
        let valid = match std::str::from_utf8(&self.pending) {
            Ok(text) => text.len(),
            Err(e) => e.valid_up_to() + e.error_len().unwrap_or(0),
        };
        self.buffer.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
        self.pending.drain(..valid);
        normalize_line_endings(&mut self.buffer);

        let mut frames = Vec::new();
        while let Some(end) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..end + 2).collect();
            if let Some(frame) = parse_block(&block) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Bytes held back waiting for a frame terminator.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len() + self.pending.len()
    }
}

/// Rewrite CRLF and lone CR to LF. A trailing CR is kept as is, since the
/// LF completing it may arrive with the next chunk.
fn normalize_line_endings(buffer: &mut String) {
    if !buffer.contains('\r') {
        return;
    }
    let mut out = String::with_capacity(buffer.len());
    let mut chars = buffer.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\r' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('\n') => {}
            Some(_) => out.push('\n'),
            None => out.push('\r'),
        }
    }
    *buffer = out;
}

fn parse_block(block: &str) -> Option<SseFrame> {
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();

    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => event = Some(value.to_string()),
            "data" => data.push(value),
            _ => {}
        }
    }

    if data.is_empty() {
        return None;
    }
    Some(SseFrame {
        event,
        data: data.join("\n"),
    })
}

//! Minimal `text/event-stream` framing: blank-line separated frames, `data:`
//! lines joined with `\n`, `:` comment lines (keep-alives) dropped.

/// Incremental frame decoder. Bytes are buffered until a full frame arrives so
/// multi-byte characters split across chunks survive.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return the `data` payload of every frame it
    /// completes. Frames without data (keep-alives) produce nothing.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer
            .extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut payloads = Vec::new();
        while let Some(pos) = find_frame_end(&self.buffer) {
            let frame: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            let frame = String::from_utf8_lossy(&frame[..pos]);
            if let Some(data) = frame_data(&frame) {
                payloads.push(data);
            }
        }
        payloads
    }
}

fn find_frame_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

fn frame_data(frame: &str) -> Option<String> {
    let mut lines = Vec::new();
    for line in frame.lines() {
        if line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_frames_and_skips_keep_alives() {
        let mut decoder = SseDecoder::new();
        let out = decoder.push(b": keep-alive\n\ndata: {\"id\":\"m1\"}\n\nevent: message\ndata: x\n\n");
        assert_eq!(out, vec!["{\"id\":\"m1\"}".to_string(), "x".to_string()]);
    }

    #[test]
    fn frames_can_span_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"text\":\"ol").is_empty());
        let out = decoder.push("á\"}\r\n\r\n".as_bytes());
        assert_eq!(out, vec!["{\"text\":\"olá\"}".to_string()]);
    }

    #[test]
    fn multi_line_data_is_joined() {
        let mut decoder = SseDecoder::new();
        let out = decoder.push(b"data: a\ndata:b\n\n");
        assert_eq!(out, vec!["a\nb".to_string()]);
    }
}

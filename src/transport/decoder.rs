use serde::Deserialize;
use tracing::warn;

use crate::model::Source;

/// One parsed unit of the newline-delimited JSON stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Start {
        #[serde(default)]
        sources: Vec<Source>,
    },
    Chunk {
        #[serde(default)]
        text: String,
        #[serde(rename = "chargedRemaining", default)]
        charged_remaining: Option<u32>,
    },
    End {
        #[serde(default)]
        text: Option<String>,
        #[serde(rename = "finalAnswer", alias = "conclusion", default)]
        final_answer: Option<String>,
        #[serde(default)]
        confidence: Option<u8>,
        #[serde(rename = "chargedRemaining", default)]
        charged_remaining: Option<u32>,
    },
    Error {
        error: String,
    },
}

/// Incremental frame decoder. Bytes are appended to an internal buffer and
/// split on newlines; only complete lines are parsed, any trailing partial
/// line waits for the next read. A malformed line is skipped so the rest
/// of the stream stays usable.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.buf.extend_from_slice(bytes);

        let mut frames = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(frame) = parse_line(&line[..line.len() - 1]) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Drain the buffer at end of stream; the final line may lack a
    /// trailing newline.
    pub fn finish(&mut self) -> Option<Frame> {
        let rest = std::mem::take(&mut self.buf);
        parse_line(&rest)
    }
}

fn parse_line(raw: &[u8]) -> Option<Frame> {
    let line = std::str::from_utf8(raw).ok()?.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(frame) => Some(frame),
        Err(err) => {
            warn!(line, "skipping malformed stream line: {err}");
            None
        }
    }
}

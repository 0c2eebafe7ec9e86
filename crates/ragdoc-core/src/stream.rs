//! Decoder for line-delimited streamed completions.
//!
//! A backend emits one frame per line. A frame is either blank, the
//! terminal sentinel, or a JSON payload carrying an optional text delta at
//! `choices[0].delta.content`. Payloads may be prefixed with `data: `;
//! bare JSON lines are accepted as well.
//!
//! [`StreamAssembler`] is fed raw network chunks, which may split lines and
//! multi-byte characters anywhere. A frame that fails to parse is logged and
//! skipped; it never ends the stream.

use serde_json::Value;
use tracing::warn;

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Blank,
    /// Parsed payload with a non-empty delta.
    Delta(String),
    /// Parsed payload without a delta (role announcements, finish reasons).
    Empty,
    Done,
    Malformed(String),
}

pub fn parse_frame(line: &str) -> Frame {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Frame::Blank;
    }
    let payload = line.strip_prefix(DATA_PREFIX).unwrap_or(line).trim();
    if payload == DONE_SENTINEL {
        return Frame::Done;
    }
    match serde_json::from_str::<Value>(payload) {
        Ok(v) => match v.pointer("/choices/0/delta/content").and_then(Value::as_str) {
            Some(delta) if !delta.is_empty() => Frame::Delta(delta.to_string()),
            _ => Frame::Empty,
        },
        Err(_) => Frame::Malformed(payload.to_string()),
    }
}

/// Result of consuming a whole stream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamOutcome {
    pub text: String,
    /// Malformed frames that were skipped.
    pub skipped: usize,
    /// True if the sentinel was seen, false if the stream just ended.
    pub terminated: bool,
}

#[derive(Debug, Default)]
pub struct StreamAssembler {
    pending: Vec<u8>,
    outcome: StreamOutcome,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network chunk. Returns `true` once the sentinel has been
    /// seen; later input is ignored.
    pub fn feed(&mut self, chunk: &[u8]) -> bool {
        if self.outcome.terminated {
            return true;
        }
        self.pending.extend_from_slice(chunk);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.apply(&String::from_utf8_lossy(&line));
            if self.outcome.terminated {
                self.pending.clear();
                break;
            }
        }
        self.outcome.terminated
    }

    /// Flush any unterminated last line and return the accumulated text.
    pub fn finish(mut self) -> StreamOutcome {
        if !self.outcome.terminated && !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.apply(&String::from_utf8_lossy(&line));
        }
        self.outcome
    }

    pub fn text(&self) -> &str {
        &self.outcome.text
    }

    fn apply(&mut self, line: &str) {
        match parse_frame(line) {
            Frame::Blank | Frame::Empty => {}
            Frame::Delta(delta) => self.outcome.text.push_str(&delta),
            Frame::Done => self.outcome.terminated = true,
            Frame::Malformed(payload) => {
                self.outcome.skipped += 1;
                warn!(frame = %payload, "skipping malformed completion frame");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(s: &str) -> String {
        format!(
            "data: {}\n",
            serde_json::json!({"choices": [{"delta": {"content": s}}]})
        )
    }

    #[test]
    fn frame_kinds() {
        assert_eq!(parse_frame(""), Frame::Blank);
        assert_eq!(parse_frame("  \r"), Frame::Blank);
        assert_eq!(parse_frame("data: [DONE]"), Frame::Done);
        assert_eq!(parse_frame("[DONE]\r\n"), Frame::Done);
        assert_eq!(
            parse_frame(r#"data: {"choices":[{"delta":{"content":"hi"}}]}"#),
            Frame::Delta("hi".into())
        );
        assert_eq!(
            parse_frame(r#"{"choices":[{"delta":{"content":"bare"}}]}"#),
            Frame::Delta("bare".into())
        );
        assert_eq!(
            parse_frame(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            Frame::Empty
        );
        assert!(matches!(parse_frame("data: {oops"), Frame::Malformed(_)));
    }

    #[test]
    fn malformed_frame_between_valid_frames_is_skipped() {
        let mut asm = StreamAssembler::new();
        let body = format!("{}data: {{not json\n\n{}data: [DONE]\n", delta("Hel"), delta("lo"));
        assert!(asm.feed(body.as_bytes()));
        let out = asm.finish();
        assert_eq!(out.text, "Hello");
        assert_eq!(out.skipped, 1);
        assert!(out.terminated);
    }

    #[test]
    fn chunks_may_split_lines_and_characters() {
        let body = format!("{}{}data: [DONE]\n", delta("naïve "), delta("café"));
        let bytes = body.as_bytes();
        let mut asm = StreamAssembler::new();
        for chunk in bytes.chunks(3) {
            asm.feed(chunk);
        }
        assert_eq!(asm.finish().text, "naïve café");
    }

    #[test]
    fn input_after_sentinel_is_ignored() {
        let mut asm = StreamAssembler::new();
        asm.feed(format!("{}data: [DONE]\n{}", delta("a"), delta("b")).as_bytes());
        asm.feed(delta("c").as_bytes());
        assert_eq!(asm.text(), "a");
    }

    #[test]
    fn stream_without_sentinel_keeps_trailing_line() {
        let mut asm = StreamAssembler::new();
        let last = delta("end");
        asm.feed(format!("{}{}", delta("the "), last.trim_end()).as_bytes());
        let out = asm.finish();
        assert_eq!(out.text, "the end");
        assert!(!out.terminated);
    }
}

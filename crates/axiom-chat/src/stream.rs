//! Incremental decoder for `data: <json>` event streams.
//!
//! Bytes arrive in arbitrary chunks. The decoder keeps the unterminated tail
//! (and any incomplete UTF-8 sequence) between calls, classifies each complete
//! line, and emits text deltas in source order.

use crate::config::DecoderConfig;
use axiom_core::AxiomError;
use serde_json::Value;
use tracing::{debug, warn};

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";
const ANOMALY_PREVIEW_CHARS: usize = 120;

/// Event produced by the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeEvent {
    /// A non-empty fragment of assistant text.
    Delta(String),
    /// The `[DONE]` sentinel was seen.
    Done,
    /// The endpoint reported an error inside the stream.
    Error(String),
}

/// Scanning state of a [`StreamDecoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// Lines are classified as they complete.
    Scanning,
    /// The line at the front of the buffer did not parse and was pushed back.
    Stalled {
        /// How many later feeds re-attempted it.
        retries: u32,
    },
    /// The sentinel was seen or the stream was flushed; input is ignored.
    Finished,
}

/// Why a line was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyKind {
    /// A terminated line whose payload never parsed.
    Unparseable,
    /// An unterminated line outgrew `max_line_bytes`.
    Oversized,
}

/// A piece of input the decoder had to drop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeAnomaly {
    /// Why the line was dropped.
    pub kind: AnomalyKind,
    /// Leading part of the dropped line.
    pub preview: String,
    /// Length of the dropped line in bytes.
    pub bytes: usize,
}

impl From<&DecodeAnomaly> for AxiomError {
    fn from(anomaly: &DecodeAnomaly) -> Self {
        let what = match anomaly.kind {
            AnomalyKind::Unparseable => "unparseable line",
            AnomalyKind::Oversized => "oversized line",
        };
        AxiomError::Decode(format!(
            "{what} ({} bytes): {}",
            anomaly.bytes, anomaly.preview
        ))
    }
}

enum Line {
    Skip,
    Done,
    Event(DecodeEvent),
    Unparseable,
}

/// Chunk-boundary tolerant decoder for the chat event stream.
#[derive(Debug)]
pub struct StreamDecoder {
    config: DecoderConfig,
    buffer: String,
    utf8_tail: Vec<u8>,
    state: DecoderState,
    anomalies: Vec<DecodeAnomaly>,
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new(DecoderConfig::default())
    }
}

impl StreamDecoder {
    /// Creates a decoder with an empty buffer.
    pub fn new(config: DecoderConfig) -> Self {
        Self {
            config,
            buffer: String::new(),
            utf8_tail: Vec::new(),
            state: DecoderState::Scanning,
            anomalies: Vec::new(),
        }
    }

    /// Decodes a complete body in one shot, including the final flush.
    pub fn decode_all(body: &[u8]) -> Vec<DecodeEvent> {
        let mut decoder = Self::default();
        let mut events = decoder.feed(body);
        events.extend(decoder.finish());
        events
    }

    /// Current scanning state.
    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Whether the sentinel was seen or the decoder was flushed.
    pub fn is_finished(&self) -> bool {
        self.state == DecoderState::Finished
    }

    /// Bytes currently held in the carry-over buffer.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len() + self.utf8_tail.len()
    }

    /// Anomalies recorded so far, leaving the list empty.
    pub fn take_anomalies(&mut self) -> Vec<DecodeAnomaly> {
        std::mem::take(&mut self.anomalies)
    }

    /// Feeds the next chunk and returns the events completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<DecodeEvent> {
        let mut events = Vec::new();
        if self.is_finished() {
            return events;
        }
        self.push_bytes(chunk);
        self.scan(&mut events);
        self.enforce_line_limit();
        events
    }

    /// Final flush once no more chunks will arrive.
    ///
    /// Remaining lines are classified the same way as in [`feed`](Self::feed);
    /// the last one does not need a terminator. Lines that still fail to parse
    /// are dropped and recorded as anomalies.
    pub fn finish(&mut self) -> Vec<DecodeEvent> {
        let mut events = Vec::new();
        if self.is_finished() {
            return events;
        }
        self.state = DecoderState::Finished;

        if !self.utf8_tail.is_empty() {
            let tail = std::mem::take(&mut self.utf8_tail);
            self.buffer.push_str(&String::from_utf8_lossy(&tail));
        }
        let remaining = std::mem::take(&mut self.buffer);
        for raw in remaining.split('\n') {
            match classify(raw) {
                Line::Skip => {}
                Line::Done => {
                    events.push(DecodeEvent::Done);
                    break;
                }
                Line::Event(event) => events.push(event),
                Line::Unparseable => self.record(AnomalyKind::Unparseable, raw),
            }
        }
        events
    }

    /// Appends raw bytes to the text buffer, holding back an incomplete
    /// trailing UTF-8 sequence for the next chunk.
    fn push_bytes(&mut self, chunk: &[u8]) {
        let mut bytes = std::mem::take(&mut self.utf8_tail);
        bytes.extend_from_slice(chunk);

        let mut rest: &[u8] = &bytes;
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    self.buffer.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.utf8_tail = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
    }

    fn scan(&mut self, events: &mut Vec<DecodeEvent>) {
        while let Some(end) = self.buffer.find('\n') {
            let prior_retries = match self.state {
                DecoderState::Stalled { retries } => Some(retries),
                _ => None,
            };
            self.state = DecoderState::Scanning;

            let line: String = self.buffer.drain(..=end).collect();
            match classify(&line[..end]) {
                Line::Skip => {}
                Line::Done => {
                    events.push(DecodeEvent::Done);
                    self.state = DecoderState::Finished;
                    return;
                }
                Line::Event(event) => events.push(event),
                Line::Unparseable => {
                    let retries = prior_retries.map_or(0, |r| r + 1);
                    if retries >= self.config.max_parse_retries {
                        self.record(AnomalyKind::Unparseable, &line[..end]);
                        continue;
                    }
                    debug!(retries, bytes = line.len(), "Line did not parse, waiting for more data");
                    self.buffer.insert_str(0, &line);
                    self.state = DecoderState::Stalled { retries };
                    return;
                }
            }
        }
    }

    fn enforce_line_limit(&mut self) {
        if self.state != DecoderState::Scanning || self.buffer.len() <= self.config.max_line_bytes
        {
            return;
        }
        let dropped = std::mem::take(&mut self.buffer);
        self.record(AnomalyKind::Oversized, &dropped);
    }

    fn record(&mut self, kind: AnomalyKind, line: &str) {
        let anomaly = DecodeAnomaly {
            kind,
            preview: line.chars().take(ANOMALY_PREVIEW_CHARS).collect(),
            bytes: line.len(),
        };
        warn!(error = %AxiomError::from(&anomaly), "Dropped undecodable stream input");
        self.anomalies.push(anomaly);
    }
}

fn classify(line: &str) -> Line {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.trim().is_empty() || line.starts_with(':') {
        return Line::Skip;
    }
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return Line::Skip;
    };
    let payload = payload.trim();
    if payload == DONE_SENTINEL {
        return Line::Done;
    }
    match serde_json::from_str::<Value>(payload) {
        Ok(value) => extract_event(&value).map_or(Line::Skip, Line::Event),
        Err(_) => Line::Unparseable,
    }
}

fn extract_event(value: &Value) -> Option<DecodeEvent> {
    if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
        let message = error
            .as_str()
            .or_else(|| error.get("message").and_then(Value::as_str))
            .map(ToString::to_string)
            .unwrap_or_else(|| error.to_string());
        return Some(DecodeEvent::Error(message));
    }

    let content = value.pointer("/choices/0/delta/content")?.as_str()?;
    if content.is_empty() {
        None
    } else {
        Some(DecodeEvent::Delta(content.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn delta_line(text: &str) -> String {
        format!(
            "data: {}\n",
            serde_json::json!({"choices": [{"delta": {"content": text}}]})
        )
    }

    #[test]
    fn emits_deltas_for_complete_lines() {
        let mut d = StreamDecoder::default();
        let events = d.feed(delta_line("Hello").as_bytes());
        assert_eq!(events, vec![DecodeEvent::Delta("Hello".into())]);
        assert_eq!(d.buffered_len(), 0);
    }

    #[test]
    fn ignores_comments_blank_and_foreign_lines() {
        let body = format!(
            ": keep-alive\n\nevent: ping\nid: 7\n{}\r\n",
            delta_line("x").trim_end()
        );
        let events = StreamDecoder::decode_all(body.as_bytes());
        assert_eq!(events, vec![DecodeEvent::Delta("x".into())]);
    }

    #[test]
    fn skips_empty_and_missing_content() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"\"}}]}\n",
            "data: {\"choices\":[]}\n",
            "data: {\"id\":\"chatcmpl-1\"}\n",
        );
        assert!(StreamDecoder::decode_all(body.as_bytes()).is_empty());
    }

    #[test]
    fn sentinel_finishes_and_ignores_rest() {
        let body = format!("{}data: [DONE]\n{}", delta_line("a"), delta_line("b"));
        let mut d = StreamDecoder::default();
        let events = d.feed(body.as_bytes());
        assert_eq!(
            events,
            vec![DecodeEvent::Delta("a".into()), DecodeEvent::Done]
        );
        assert!(d.is_finished());
        assert!(d.feed(delta_line("c").as_bytes()).is_empty());
        assert!(d.finish().is_empty());
    }

    #[test]
    fn sentinel_tolerates_surrounding_whitespace() {
        let events = StreamDecoder::decode_all(b"data:  [DONE]  \r\n");
        assert_eq!(events, vec![DecodeEvent::Done]);
    }

    #[test]
    fn split_json_waits_for_rest_of_line() {
        let mut d = StreamDecoder::default();
        assert!(d
            .feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"ab")
            .is_empty());
        assert_eq!(d.state(), DecoderState::Scanning);
        let events = d.feed(b"c\"}}]}\n");
        assert_eq!(events, vec![DecodeEvent::Delta("abc".into())]);
    }

    #[test]
    fn split_inside_prefix() {
        let line = delta_line("hi");
        let mut d = StreamDecoder::default();
        assert!(d.feed(&line.as_bytes()[..3]).is_empty());
        assert_eq!(
            d.feed(&line.as_bytes()[3..]),
            vec![DecodeEvent::Delta("hi".into())]
        );
    }

    #[test]
    fn split_inside_multibyte_character() {
        let line = delta_line("héllo ✓");
        let bytes = line.as_bytes();
        let check = line.find('✓').unwrap() + 1;
        let mut d = StreamDecoder::default();
        let mut events = d.feed(&bytes[..check]);
        assert!(events.is_empty());
        events.extend(d.feed(&bytes[check..]));
        assert_eq!(events, vec![DecodeEvent::Delta("héllo ✓".into())]);
    }

    #[test]
    fn invalid_utf8_is_replaced_not_fatal() {
        let mut body = b"data: {\"choices\":[{\"delta\":{\"content\":\"a".to_vec();
        body.push(0xff);
        body.extend_from_slice(b"b\"}}]}\n");
        let events = StreamDecoder::decode_all(&body);
        assert_eq!(events, vec![DecodeEvent::Delta("a\u{fffd}b".into())]);
    }

    #[test]
    fn malformed_line_stalls_then_is_dropped() {
        let mut d = StreamDecoder::new(DecoderConfig {
            max_parse_retries: 2,
            ..DecoderConfig::default()
        });

        let mut input = b"data: {not json}\n".to_vec();
        input.extend_from_slice(delta_line("after").as_bytes());
        assert!(d.feed(&input).is_empty());
        assert_eq!(d.state(), DecoderState::Stalled { retries: 0 });

        assert!(d.feed(b"").is_empty());
        assert_eq!(d.state(), DecoderState::Stalled { retries: 1 });

        let events = d.feed(b"");
        assert_eq!(events, vec![DecodeEvent::Delta("after".into())]);
        assert_eq!(d.state(), DecoderState::Scanning);

        let anomalies = d.take_anomalies();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].kind, AnomalyKind::Unparseable);
        assert_eq!(anomalies[0].preview, "data: {not json}");
    }

    #[test]
    fn stalled_line_is_not_duplicated_or_lost() {
        let mut d = StreamDecoder::default();
        let stalled = "data: {\"choices\":[{\"delta\":{\"content\":\"x\"\n";
        d.feed(stalled.as_bytes());
        assert_eq!(d.buffered_len(), stalled.len());
        d.feed(b"data: ");
        assert_eq!(d.buffered_len(), stalled.len() + "data: ".len());
    }

    #[test]
    fn zero_retries_drops_immediately() {
        let mut d = StreamDecoder::new(DecoderConfig {
            max_parse_retries: 0,
            ..DecoderConfig::default()
        });
        let body = format!("data: oops\n{}", delta_line("ok"));
        assert_eq!(
            d.feed(body.as_bytes()),
            vec![DecodeEvent::Delta("ok".into())]
        );
        assert_eq!(d.take_anomalies().len(), 1);
    }

    #[test]
    fn oversized_unterminated_line_is_discarded() {
        let mut d = StreamDecoder::new(DecoderConfig {
            max_line_bytes: 16,
            ..DecoderConfig::default()
        });
        assert!(d.feed(b"data: 0123456789abcdef").is_empty());
        assert_eq!(d.buffered_len(), 0);
        let anomalies = d.take_anomalies();
        assert_eq!(anomalies[0].kind, AnomalyKind::Oversized);
    }

    #[test]
    fn finish_flushes_unterminated_last_line() {
        let mut d = StreamDecoder::default();
        let line = delta_line("tail");
        assert!(d.feed(line.trim_end().as_bytes()).is_empty());
        assert_eq!(d.finish(), vec![DecodeEvent::Delta("tail".into())]);
        assert!(d.is_finished());
    }

    #[test]
    fn finish_drops_truncated_fragment() {
        let mut d = StreamDecoder::default();
        d.feed(b"data: {\"choices\":[{\"delta\":");
        assert!(d.finish().is_empty());
        assert_eq!(d.take_anomalies().len(), 1);
    }

    #[test]
    fn finish_processes_lines_behind_a_stalled_one() {
        let mut d = StreamDecoder::default();
        let body = format!("data: {{bad\n{}", delta_line("kept"));
        assert!(d.feed(body.as_bytes()).is_empty());
        assert_eq!(d.finish(), vec![DecodeEvent::Delta("kept".into())]);
    }

    #[test]
    fn error_payload_becomes_error_event() {
        let body = concat!(
            "data: {\"error\":\"model overloaded\"}\n",
            "data: {\"error\":{\"message\":\"quota\"}}\n",
            "data: {\"error\":null,\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n",
        );
        let events = StreamDecoder::decode_all(body.as_bytes());
        assert_eq!(
            events,
            vec![
                DecodeEvent::Error("model overloaded".into()),
                DecodeEvent::Error("quota".into()),
                DecodeEvent::Delta("ok".into()),
            ]
        );
    }

    #[test]
    fn anomaly_converts_to_decode_error() {
        let mut d = StreamDecoder::new(DecoderConfig {
            max_parse_retries: 0,
            ..DecoderConfig::default()
        });
        d.feed(b"data: nope\n");
        let anomaly = d.take_anomalies().pop().unwrap();
        let err = AxiomError::from(&anomaly);
        assert!(matches!(&err, AxiomError::Decode(m) if m.contains("data: nope")));
    }
}

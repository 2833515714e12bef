//! Stream parser (C3, §4.2): incrementally turns the upstream's line-tagged chunked
//! format into structured events. Grounded on `_process_lmarena_stream` in the original
//! bridge, but kept pure — unlike the original, this module never touches the
//! multiplexer or rotation state directly; it only classifies frames. The orchestrator
//! (C6) reacts to the events this produces by driving the rotation engine (C5).

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::rotation::looks_like_rate_limit;
use crate::wire::Frame;

static TEXT_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[ab]0:"((?:\\.|[^"\\])*)""#).unwrap());
static FINISH_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[ab]d:(\{.*?"finishReason".*?\})"#).unwrap());
static ERROR_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?s)(\{\s*"error".*?\})"#).unwrap());
static CLOUDFLARE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)<title>Just a moment\.\.\.</title>").unwrap(),
        Regex::new(r"(?i)Enable JavaScript and cookies to continue").unwrap(),
    ]
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParserEvent {
    Content(String),
    Finish(String),
    Error(String),
    AttachmentTooLarge,
    CloudflareChallenge,
    /// A rate limit was detected. `model_id` is `Some` only when the browser's control
    /// frame carried it directly; a content-sidechannel detection leaves it `None` and
    /// the caller is expected to fall back to the request's own current model (§4.2).
    RateLimit { model_id: Option<String> },
}

/// Whether the sub-stream has reached a point where nothing more will be read from it:
/// either the natural `[DONE]` sentinel, or a terminal event (error, rate limit,
/// Cloudflare challenge). A `Finish` event is explicitly *not* terminal (§4.2) — the
/// parser keeps draining until `[DONE]` so a race between the finish frame and the
/// sink's drain can't drop trailing content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedOutcome {
    pub done: bool,
}

#[derive(Default)]
pub struct StreamParser {
    buffer: String,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one inbound frame and returns whatever events it produced, in the order
    /// recognized, plus whether the sub-stream is now done.
    pub fn feed(&mut self, frame: Frame) -> (Vec<ParserEvent>, FeedOutcome) {
        match frame {
            Frame::Done => (Vec::new(), FeedOutcome { done: true }),
            Frame::Control(control) => {
                if control.rate_limit_detected {
                    let event = ParserEvent::RateLimit {
                        model_id: control.model_id,
                    };
                    return (vec![event], FeedOutcome { done: true });
                }
                if let Some(message) = control.error {
                    let event = classify_error(&message);
                    return (vec![event], FeedOutcome { done: true });
                }
                (Vec::new(), FeedOutcome { done: false })
            }
            Frame::Text(text) => {
                self.buffer.push_str(&text);
                self.scan_buffer()
            }
            Frame::List(items) => {
                for item in items {
                    self.buffer.push_str(&item);
                }
                self.scan_buffer()
            }
        }
    }

    fn scan_buffer(&mut self) -> (Vec<ParserEvent>, FeedOutcome) {
        let mut events = Vec::new();

        // Content-sidechannel rate limit: checked against the whole buffer before any
        // content is peeled off, matching the original's ordering exactly.
        if looks_like_rate_limit(&self.buffer) {
            events.push(ParserEvent::RateLimit { model_id: None });
            return (events, FeedOutcome { done: true });
        }

        if CLOUDFLARE_PATTERNS.iter().any(|re| re.is_match(&self.buffer)) {
            events.push(ParserEvent::CloudflareChallenge);
            return (events, FeedOutcome { done: true });
        }

        if let Some(caps) = ERROR_PATTERN.captures(&self.buffer) {
            if let Ok(value) = serde_json::from_str::<Value>(&caps[1]) {
                let message = value
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown upstream error")
                    .to_string();
                events.push(classify_error(&message));
                return (events, FeedOutcome { done: true });
            }
        }

        let mut buf = std::mem::take(&mut self.buffer);
        loop {
            let Some(caps) = TEXT_PATTERN.captures(&buf) else {
                break;
            };
            let whole = caps.get(0).unwrap();
            let end = whole.end();
            let decoded = decode_json_string_fragment(&caps[1]);
            buf.replace_range(..end, "");

            let Some(text) = decoded else { continue };
            if text.is_empty() {
                continue;
            }
            if looks_like_rate_limit(&text) {
                events.push(ParserEvent::RateLimit { model_id: None });
                self.buffer = buf;
                return (events, FeedOutcome { done: true });
            }
            events.push(ParserEvent::Content(text));
        }

        if let Some(caps) = FINISH_PATTERN.captures(&buf) {
            if let Ok(value) = serde_json::from_str::<Value>(&caps[1]) {
                let reason = value
                    .get("finishReason")
                    .and_then(Value::as_str)
                    .unwrap_or("stop")
                    .to_string();
                events.push(ParserEvent::Finish(reason));
            }
            let end = caps.get(0).unwrap().end();
            buf.replace_range(..end, "");
        }

        self.buffer = buf;
        (events, FeedOutcome { done: false })
    }
}

fn classify_error(message: &str) -> ParserEvent {
    let lower = message.to_lowercase();
    if lower.contains("413") || lower.contains("too large") {
        return ParserEvent::AttachmentTooLarge;
    }
    if CLOUDFLARE_PATTERNS.iter().any(|re| re.is_match(message)) {
        return ParserEvent::CloudflareChallenge;
    }
    ParserEvent::Error(message.to_string())
}

/// Decodes a regex-captured JSON string body (without its surrounding quotes) honoring
/// `\n`, `\"`, `\uXXXX`, etc. (§4.2).
fn decode_json_string_fragment(raw: &str) -> Option<String> {
    serde_json::from_str::<String>(&format!("\"{raw}\"")).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_streaming_yields_content_then_finish() {
        let mut parser = StreamParser::new();
        let (events, outcome) = parser.feed(Frame::Text(r#"a0:"Hel""#.to_string()));
        assert_eq!(events, vec![ParserEvent::Content("Hel".to_string())]);
        assert!(!outcome.done);

        let (events, outcome) = parser.feed(Frame::Text(r#"a0:"lo"ad:{"finishReason":"stop"}"#.to_string()));
        assert_eq!(
            events,
            vec![ParserEvent::Content("lo".to_string()), ParserEvent::Finish("stop".to_string())]
        );
        assert!(!outcome.done);

        let (events, outcome) = parser.feed(Frame::Done);
        assert!(events.is_empty());
        assert!(outcome.done);
    }

    #[test]
    fn idempotent_under_arbitrary_fragmentation() {
        let whole = r#"a0:"Hello, "a0:"world"ad:{"finishReason":"stop"}"#;

        let mut one_shot = StreamParser::new();
        let (events_one, _) = one_shot.feed(Frame::Text(whole.to_string()));

        let mut fragmented = StreamParser::new();
        let mut events_many = Vec::new();
        for ch in whole.chars() {
            let (mut events, _) = fragmented.feed(Frame::Text(ch.to_string()));
            events_many.append(&mut events);
        }

        assert_eq!(events_one, events_many);
    }

    #[test]
    fn content_sidechannel_rate_limit_is_detected() {
        let mut parser = StreamParser::new();
        let (events, outcome) = parser.feed(Frame::Text("429 Too Many Requests from upstream".to_string()));
        assert_eq!(events, vec![ParserEvent::RateLimit { model_id: None }]);
        assert!(outcome.done);
    }

    #[test]
    fn control_rate_limit_carries_model_id() {
        let mut parser = StreamParser::new();
        let control = crate::wire::ControlFrame {
            rate_limit_detected: true,
            model_id: Some("abc-123".to_string()),
            ..Default::default()
        };
        let (events, outcome) = parser.feed(Frame::Control(control));
        assert_eq!(
            events,
            vec![ParserEvent::RateLimit {
                model_id: Some("abc-123".to_string())
            }]
        );
        assert!(outcome.done);
    }

    #[test]
    fn cloudflare_challenge_is_classified_from_error_control_frame() {
        let mut parser = StreamParser::new();
        let control = crate::wire::ControlFrame {
            error: Some("Enable JavaScript and cookies to continue".to_string()),
            ..Default::default()
        };
        let (events, outcome) = parser.feed(Frame::Control(control));
        assert_eq!(events, vec![ParserEvent::CloudflareChallenge]);
        assert!(outcome.done);
    }

    #[test]
    fn attachment_too_large_is_classified_from_error_message() {
        let mut parser = StreamParser::new();
        let control = crate::wire::ControlFrame {
            error: Some("413 too large".to_string()),
            ..Default::default()
        };
        let (events, outcome) = parser.feed(Frame::Control(control));
        assert_eq!(events, vec![ParserEvent::AttachmentTooLarge]);
        assert!(outcome.done);
    }

    #[test]
    fn finish_is_not_terminal_parser_keeps_draining_until_done() {
        let mut parser = StreamParser::new();
        let (events, outcome) = parser.feed(Frame::Text(r#"a0:"hi"ad:{"finishReason":"stop"}"#.to_string()));
        assert!(events.contains(&ParserEvent::Finish("stop".to_string())));
        assert!(!outcome.done);
        let (_, outcome) = parser.feed(Frame::Done);
        assert!(outcome.done);
    }
}

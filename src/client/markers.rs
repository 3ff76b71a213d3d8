//! Inline marker scanner for streamed agent output
//!
//! The backend embeds structured payloads in its text stream:
//!
//! - `[INTERRUPT]{json}[/INTERRUPT]`: the agent paused and wants a yes/no
//! - `[TRANSACTION]{json}[/TRANSACTION]`: a wallet transaction to sign
//!
//! Markers can be cut anywhere by chunking, including inside a tag, so the
//! scanner holds back any suffix that could still grow into an opening tag.

use serde::Serialize;

use crate::error::Result;
use crate::types::{InterruptRequest, WalletTransaction};

/// Kinds of inline markers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    Interrupt,
    Transaction,
}

impl MarkerKind {
    pub const ALL: [MarkerKind; 2] = [MarkerKind::Interrupt, MarkerKind::Transaction];

    pub fn open(self) -> &'static str {
        match self {
            MarkerKind::Interrupt => "[INTERRUPT]",
            MarkerKind::Transaction => "[TRANSACTION]",
        }
    }

    pub fn close(self) -> &'static str {
        match self {
            MarkerKind::Interrupt => "[/INTERRUPT]",
            MarkerKind::Transaction => "[/TRANSACTION]",
        }
    }

    /// Render a payload as a marker, as the backend would emit it.
    pub fn encode<T: Serialize>(self, payload: &T) -> Result<String> {
        Ok(format!(
            "{}{}{}",
            self.open(),
            serde_json::to_string(payload)?,
            self.close()
        ))
    }
}

/// One decoded piece of the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Text(String),
    Interrupt(InterruptRequest),
    Transaction(WalletTransaction),
}

/// Incremental scanner turning text chunks into `StreamEvent`s
#[derive(Debug, Default)]
pub struct MarkerScanner {
    buffer: String,
    inside: Option<MarkerKind>,
}

impl MarkerScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next decoded chunk.
    ///
    /// Returns the events that are certain so far; adjacent text is merged.
    pub fn feed(&mut self, chunk: &str) -> Vec<StreamEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        loop {
            match self.inside {
                Some(kind) => {
                    let Some(end) = self.buffer.find(kind.close()) else {
                        break;
                    };
                    let body: String = self.buffer.drain(..end).collect();
                    self.buffer.drain(..kind.close().len());
                    self.inside = None;
                    push_event(&mut events, parse_marker(kind, &body));
                }
                None => match earliest_open(&self.buffer) {
                    Some((idx, kind)) => {
                        let text: String = self.buffer.drain(..idx).collect();
                        push_text(&mut events, text);
                        self.buffer.drain(..kind.open().len());
                        self.inside = Some(kind);
                    }
                    None => {
                        let keep = partial_open_suffix_len(&self.buffer);
                        let emit = self.buffer.len() - keep;
                        let text: String = self.buffer.drain(..emit).collect();
                        push_text(&mut events, text);
                        break;
                    }
                },
            }
        }

        events
    }

    /// Flush at end of stream.
    ///
    /// Held-back text is released; an unterminated marker is returned as the
    /// raw text it was, opening tag included.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let rest = std::mem::take(&mut self.buffer);
        let text = match self.inside.take() {
            Some(kind) => {
                tracing::warn!(marker = kind.open(), "Stream ended inside an unterminated marker");
                format!("{}{}", kind.open(), rest)
            }
            None => rest,
        };

        let mut events = Vec::new();
        push_text(&mut events, text);
        events
    }

    /// True while the scanner is inside a marker body.
    pub fn in_marker(&self) -> bool {
        self.inside.is_some()
    }
}

/// Scan a complete text in one go.
pub fn scan_all(text: &str) -> Vec<StreamEvent> {
    let mut scanner = MarkerScanner::new();
    let mut events = scanner.feed(text);
    for event in scanner.finish() {
        push_event(&mut events, event);
    }
    events
}

fn parse_marker(kind: MarkerKind, body: &str) -> StreamEvent {
    let parsed = match kind {
        MarkerKind::Interrupt => {
            serde_json::from_str::<InterruptRequest>(body.trim()).map(StreamEvent::Interrupt)
        }
        MarkerKind::Transaction => {
            serde_json::from_str::<WalletTransaction>(body.trim()).map(StreamEvent::Transaction)
        }
    };

    parsed.unwrap_or_else(|e| {
        tracing::warn!(marker = kind.open(), error = %e, "Malformed marker payload, keeping it as text");
        StreamEvent::Text(format!("{}{}{}", kind.open(), body, kind.close()))
    })
}

fn earliest_open(buffer: &str) -> Option<(usize, MarkerKind)> {
    MarkerKind::ALL
        .iter()
        .filter_map(|&kind| buffer.find(kind.open()).map(|idx| (idx, kind)))
        .min_by_key(|(idx, _)| *idx)
}

/// Length of the longest buffer suffix that is a proper prefix of some opening tag.
fn partial_open_suffix_len(buffer: &str) -> usize {
    MarkerKind::ALL
        .iter()
        .flat_map(|kind| {
            let open = kind.open();
            (1..open.len()).rev().find(|&k| buffer.ends_with(&open[..k]))
        })
        .max()
        .unwrap_or(0)
}

fn push_text(events: &mut Vec<StreamEvent>, text: String) {
    if text.is_empty() {
        return;
    }
    if let Some(StreamEvent::Text(last)) = events.last_mut() {
        last.push_str(&text);
    } else {
        events.push(StreamEvent::Text(text));
    }
}

fn push_event(events: &mut Vec<StreamEvent>, event: StreamEvent) {
    match event {
        StreamEvent::Text(text) => push_text(events, text),
        other => events.push(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TX: &str = r#"{"to":"0x1111111111111111111111111111111111111111","value":"1000"}"#;

    fn text(s: &str) -> StreamEvent {
        StreamEvent::Text(s.to_string())
    }

    fn feed_all(chunks: &[&str]) -> Vec<StreamEvent> {
        let mut scanner = MarkerScanner::new();
        let mut events = Vec::new();
        for chunk in chunks {
            for event in scanner.feed(chunk) {
                push_event(&mut events, event);
            }
        }
        for event in scanner.finish() {
            push_event(&mut events, event);
        }
        events
    }

    #[test]
    fn test_plain_text_passes_through() {
        let mut scanner = MarkerScanner::new();
        assert_eq!(scanner.feed("The chain has "), vec![text("The chain has ")]);
        assert_eq!(scanner.feed("1.2M blocks."), vec![text("1.2M blocks.")]);
        assert!(scanner.finish().is_empty());
    }

    #[test]
    fn test_interrupt_marker_in_one_chunk() {
        let events = scan_all(
            r#"Sending now. [INTERRUPT]{"interrupt_id":"int-7","message":"Send 1 IP?"}[/INTERRUPT] Waiting."#,
        );
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], text("Sending now. "));
        match &events[1] {
            StreamEvent::Interrupt(i) => {
                assert_eq!(i.interrupt_id, "int-7");
                assert_eq!(i.message.as_deref(), Some("Send 1 IP?"));
            }
            other => panic!("expected interrupt, got {other:?}"),
        }
        assert_eq!(events[2], text(" Waiting."));
    }

    #[test]
    fn test_marker_split_inside_opening_tag() {
        let events = feed_all(&["Here [TRANS", "ACTION]", TX, "[/TRANSACTION] done"]);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], text("Here "));
        assert!(matches!(&events[1], StreamEvent::Transaction(tx) if tx.value == "1000"));
        assert_eq!(events[2], text(" done"));
    }

    #[test]
    fn test_marker_split_inside_closing_tag_and_body() {
        let marker = format!("[TRANSACTION]{TX}[/TRANSACTION]");
        let chunks: Vec<String> = marker.chars().map(|c| c.to_string()).collect();
        let chunk_refs: Vec<&str> = chunks.iter().map(String::as_str).collect();
        let events = feed_all(&chunk_refs);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], StreamEvent::Transaction(_)));
    }

    #[test]
    fn test_partial_tag_prefix_is_held_back() {
        let mut scanner = MarkerScanner::new();
        assert_eq!(scanner.feed("array[IN"), vec![text("array")]);
        // Not a tag after all
        assert_eq!(scanner.feed("DEX] value"), vec![text("[INDEX] value")]);
    }

    #[test]
    fn test_bracket_text_at_end_is_released_on_finish() {
        let mut scanner = MarkerScanner::new();
        assert_eq!(scanner.feed("see note ["), vec![text("see note ")]);
        assert_eq!(scanner.finish(), vec![text("[")]);
    }

    #[test]
    fn test_malformed_payload_becomes_text() {
        let events = scan_all("a[INTERRUPT]{not json}[/INTERRUPT]b");
        assert_eq!(events, vec![text("a[INTERRUPT]{not json}[/INTERRUPT]b")]);
    }

    #[test]
    fn test_unterminated_marker_flushed_as_text() {
        let mut scanner = MarkerScanner::new();
        assert_eq!(scanner.feed("x [INTERRUPT]{\"interrupt_id\""), vec![text("x ")]);
        assert!(scanner.in_marker());
        assert_eq!(scanner.finish(), vec![text("[INTERRUPT]{\"interrupt_id\"")]);
        assert!(!scanner.in_marker());
    }

    #[test]
    fn test_two_markers_back_to_back() {
        let interrupt = r#"{"interrupt_id":"int-1"}"#;
        let input = format!("[INTERRUPT]{interrupt}[/INTERRUPT][TRANSACTION]{TX}[/TRANSACTION]");
        let events = scan_all(&input);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], StreamEvent::Interrupt(_)));
        assert!(matches!(events[1], StreamEvent::Transaction(_)));
    }

    #[test]
    fn test_encode_then_scan() {
        let request = InterruptRequest {
            interrupt_id: "int-9".into(),
            message: Some("Approve?".into()),
            action: Some("send_ip".into()),
            transaction: None,
        };
        let marker = MarkerKind::Interrupt.encode(&request).unwrap();
        assert_eq!(scan_all(&marker), vec![StreamEvent::Interrupt(request)]);
    }

    #[test]
    fn test_multibyte_text_around_markers() {
        let events = feed_all(&["Coût: ", "5 IP → [INT", "ERRUPT]{\"interrupt_id\":\"é\"}[/INTERRUPT]✓"]);
        assert_eq!(events[0], text("Coût: 5 IP → "));
        assert!(matches!(&events[1], StreamEvent::Interrupt(i) if i.interrupt_id == "é"));
        assert_eq!(events[2], text("✓"));
    }
}

//! Incremental `text/event-stream` decoder.
//!
//! Bytes arrive in arbitrary chunks; complete lines are folded into the
//! pending event and an event is emitted on each blank line.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field, `message` when absent.
    pub event: String,
    pub data: String,
}

impl SseEvent {
    pub fn is_message(&self) -> bool {
        self.event == "message"
    }
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }

        events
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            // `id` and `retry` only matter for reconnection, which the run never does.
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_event_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"function\":\"scr").is_empty());
        let events = decoder.push(b"ape\",\"status\":\"started\"}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, r#"{"function":"scrape","status":"started"}"#);
        assert!(events[0].is_message());
    }

    #[test]
    fn skips_comments_and_padding() {
        let mut decoder = SseDecoder::new();
        let padding = format!(":{}\n\n", " ".repeat(2048));
        assert!(decoder.push(padding.as_bytes()).is_empty());
        assert!(decoder.push(b": keep-alive 12\n\n").is_empty());
    }

    #[test]
    fn named_event_and_crlf() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"event: ping\r\ndata: connected\r\n\r\ndata: x\r\n\r\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "ping");
        assert!(!events[0].is_message());
        assert_eq!(events[1].event, "message");
    }

    #[test]
    fn joins_multi_line_data_and_ignores_id_retry() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"id: 4\nretry: 1500\ndata: a\ndata: b\n\n");
        assert_eq!(
            events,
            vec![SseEvent {
                event: "message".into(),
                data: "a\nb".into(),
            }]
        );
    }
}

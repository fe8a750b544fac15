//! Minimal `text/event-stream` decoder.

use futures::{Stream, StreamExt};

use crate::error::{Error, Result};

/// One dispatched server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

impl SseFrame {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
            id: None,
        }
    }
}

/// Incremental decoder; feed it raw chunks as they arrive.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    /// Last event id seen on the stream; carried by every later frame
    id: Option<String>,
    /// The previous line ended with `\r`, so a leading `\n` completes it
    after_cr: bool,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        // Lines end with `\r\n`, `\n` or a bare `\r`
        while let Some(end) = self.buffer.iter().position(|&b| b == b'\n' || b == b'\r') {
            let terminator = self.buffer[end];
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            let after_cr = std::mem::replace(&mut self.after_cr, terminator == b'\r');
            if after_cr && terminator == b'\n' && end == 0 {
                continue;
            }
            let line = String::from_utf8_lossy(&line[..end]);
            if let Some(frame) = self.feed_line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    fn feed_line(&mut self, line: &str) -> Option<SseFrame> {
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
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        if self.event.is_none() && self.data.is_empty() {
            return None;
        }
        let frame = SseFrame {
            event: self.event.take().unwrap_or_else(|| "message".to_string()),
            data: self.data.join("\n"),
            id: self.id.clone(),
        };
        self.data.clear();
        Some(frame)
    }
}

/// Turn an HTTP body stream into a stream of frames. A transport error is
/// yielded once and ends the stream.
pub fn frames<S, B>(bytes: S) -> impl Stream<Item = Result<SseFrame>> + Send + 'static
where
    S: Stream<Item = reqwest::Result<B>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    async_stream::stream! {
        let mut decoder = SseDecoder::default();
        futures::pin_mut!(bytes);

        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(chunk) => {
                    for frame in decoder.push(chunk.as_ref()) {
                        yield Ok(frame);
                    }
                }
                Err(err) => {
                    yield Err(Error::from(err));
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_event() {
        let mut decoder = SseDecoder::default();
        let frames = decoder.push(b"event: STATUS\ndata: {\"items\":[]}\nid: HAID\n\n");
        assert_eq!(
            frames,
            vec![SseFrame {
                event: "STATUS".into(),
                data: "{\"items\":[]}".into(),
                id: Some("HAID".into()),
            }]
        );
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"event:KEEP-").is_empty());
        assert!(decoder.push(b"ALIVE\r\n").is_empty());
        let frames = decoder.push(b"\r\n");
        assert_eq!(frames, vec![SseFrame::new("KEEP-ALIVE", "")]);
    }

    #[test]
    fn test_bare_carriage_return_ends_lines() {
        let mut decoder = SseDecoder::default();
        let frames = decoder.push(b"event: STATUS\rdata: a\r\revent: KEEP-ALIVE\r\r");
        assert_eq!(
            frames,
            vec![SseFrame::new("STATUS", "a"), SseFrame::new("KEEP-ALIVE", "")]
        );
    }

    #[test]
    fn test_crlf_split_between_chunks_is_one_line_end() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: a\r").is_empty());
        // The `\n` completes the previous line, it is not a blank line
        assert!(decoder.push(b"\ndata: b\r").is_empty());
        let frames = decoder.push(b"\n\r\n");
        assert_eq!(frames, vec![SseFrame::new("message", "a\nb")]);
    }

    #[test]
    fn test_id_carries_over_to_later_frames() {
        let mut decoder = SseDecoder::default();
        let frames = decoder.push(b"id: 7\nevent: STATUS\n\nevent: EVENT\n\nid: 8\nevent: NOTIFY\n\n");
        let ids: Vec<_> = frames.iter().map(|frame| frame.id.as_deref()).collect();
        assert_eq!(ids, vec![Some("7"), Some("7"), Some("8")]);
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let mut decoder = SseDecoder::default();
        let raw = "event: NOTIFY\ndata: 180°C\n\n".as_bytes();
        let split = raw.iter().position(|&b| b == 0xC2).unwrap() + 1;
        assert!(decoder.push(&raw[..split]).is_empty());
        let frames = decoder.push(&raw[split..]);
        assert_eq!(frames[0].data, "180°C");
    }

    #[test]
    fn test_multi_line_data_and_comments() {
        let mut decoder = SseDecoder::default();
        let frames = decoder.push(b": comment\ndata: a\ndata: b\n\nevent: EVENT\n\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event, "message");
        assert_eq!(frames[0].data, "a\nb");
        assert_eq!(frames[1].event, "EVENT");
    }

    #[test]
    fn test_blank_lines_alone_dispatch_nothing() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"\n\n\n").is_empty());
    }

    #[tokio::test]
    async fn test_frames_from_byte_stream() {
        let chunks: Vec<reqwest::Result<&'static [u8]>> = vec![
            Ok(&b"event: CONNECTED\ndata: {}\n\nevent: DISC"[..]),
            Ok(&b"ONNECTED\ndata: {}\n\n"[..]),
        ];
        let frames: Vec<_> = frames(futures::stream::iter(chunks)).collect().await;
        let names: Vec<_> = frames
            .into_iter()
            .map(|frame| frame.unwrap().event)
            .collect();
        assert_eq!(names, vec!["CONNECTED", "DISCONNECTED"]);
    }
}

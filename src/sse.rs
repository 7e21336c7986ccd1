//! Server-Sent Events (SSE) stream processing utilities.
//!
//! Shared by the upstream provider client and the downstream frame consumer.
//!
//! SSE format:
//! ```text
//! data: {"key": "value"}
//!
//! data: {"another": "event"}
//!
//! data: [DONE]
//! ```

use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::collections::VecDeque;
use tracing::warn;

use crate::client::ClientError;

/// Longest line the decoder will hold while waiting for its terminator.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Incremental SSE line decoder.
///
/// Bytes are buffered until a newline is seen, so a payload split across
/// reads (including a multi-byte UTF-8 character) is only decoded once it is
/// complete. Each read is searched only past the bytes already scanned. A
/// line that grows beyond [`MAX_LINE_BYTES`] is dropped up to its newline.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    scanned: usize,
    discarding: bool,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one read worth of bytes, returning every complete `data:` payload.
    ///
    /// Nothing is returned once the `[DONE]` marker has been seen.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        if self.done {
            return Vec::new();
        }
        self.buffer.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            self.scanned = end + 1;
            let line = &self.buffer[start..end];
            start = end + 1;

            if self.discarding {
                self.discarding = false;
                continue;
            }
            match decode_line(line) {
                Some(data) if is_done_marker(&data) => {
                    self.done = true;
                    self.buffer.clear();
                    self.scanned = 0;
                    return payloads;
                }
                Some(data) => payloads.push(data),
                None => {}
            }
        }

        self.buffer.drain(..start);
        self.scanned = self.buffer.len();

        if self.buffer.len() > MAX_LINE_BYTES {
            warn!(
                "Dropping SSE line over {} bytes without a terminator",
                MAX_LINE_BYTES
            );
            self.buffer.clear();
            self.scanned = 0;
            self.discarding = true;
        }
        payloads
    }

    /// Flush a final unterminated line once the underlying body has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.done || self.discarding || self.buffer.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        decode_line(&line).filter(|data| !is_done_marker(data))
    }

    /// Whether the `[DONE]` marker has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Bytes held back waiting for a line terminator.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn decode_line(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    parse_sse_line(line.trim()).map(str::to_string)
}

/// Extension trait turning a byte stream into a stream of SSE data payloads.
///
/// # Example
/// ```ignore
/// use chatrelay::sse::SseStreamExt;
///
/// let response = client.post(url).send().await?;
/// let mut payloads = response.bytes_stream().sse();
/// while let Some(payload) = payloads.next().await {
///     println!("SSE data: {}", payload?);
/// }
/// ```
pub trait SseStreamExt {
    /// Convert the byte stream into raw SSE data payloads.
    ///
    /// Stops when the `[DONE]` marker is encountered or the stream ends.
    /// A read error is yielded once and ends the stream.
    fn sse(self) -> BoxStream<'static, Result<String, ClientError>>;
}

impl<S, E> SseStreamExt for S
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<ClientError> + Send + 'static,
{
    fn sse(self) -> BoxStream<'static, Result<String, ClientError>> {
        struct State<S> {
            bytes: S,
            decoder: SseDecoder,
            ready: VecDeque<String>,
            ended: bool,
        }

        let state = State {
            bytes: Box::pin(self),
            decoder: SseDecoder::new(),
            ready: VecDeque::new(),
            ended: false,
        };

        stream::unfold(state, |mut state| async move {
            loop {
                if let Some(data) = state.ready.pop_front() {
                    return Some((Ok(data), state));
                }
                if state.ended || state.decoder.is_done() {
                    return None;
                }

                match state.bytes.next().await {
                    Some(Ok(chunk)) => {
                        state.ready.extend(state.decoder.push(&chunk));
                    }
                    Some(Err(e)) => {
                        state.ended = true;
                        return Some((Err(e.into()), state));
                    }
                    None => {
                        state.ended = true;
                        state.ready.extend(state.decoder.finish());
                    }
                }
            }
        })
        .boxed()
    }
}

/// Parse an SSE line to extract the data portion.
///
/// # Example
/// ```
/// use chatrelay::sse::parse_sse_line;
///
/// let line = "data: {\"key\": \"value\"}";
/// assert_eq!(parse_sse_line(line), Some("{\"key\": \"value\"}"));
///
/// let line = "invalid";
/// assert_eq!(parse_sse_line(line), None);
/// ```
pub fn parse_sse_line(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(|s| s.trim())
}

/// Check if an SSE data line indicates the stream is done.
///
/// # Example
/// ```
/// use chatrelay::sse::is_done_marker;
///
/// assert!(is_done_marker("[DONE]"));
/// assert!(!is_done_marker(""));
/// ```
pub fn is_done_marker(data: &str) -> bool {
    data == "[DONE]"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sse_line() {
        assert_eq!(parse_sse_line("data: hello"), Some("hello"));
        assert_eq!(
            parse_sse_line("data: {\"key\": \"value\"}"),
            Some("{\"key\": \"value\"}")
        );
        assert_eq!(parse_sse_line("data:   spaces  "), Some("spaces"));
        assert_eq!(parse_sse_line("data:tight"), Some("tight"));
        assert_eq!(parse_sse_line("event: ping"), None);
        assert_eq!(parse_sse_line(""), None);
    }

    #[test]
    fn test_is_done_marker() {
        assert!(is_done_marker("[DONE]"));
        assert!(!is_done_marker(""));
        assert!(!is_done_marker("data"));
    }

    #[test]
    fn test_decoder_buffers_across_reads() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"typ").is_empty());
        assert!(decoder.pending() > 0);
        let out = decoder.push(b"e\":\"chunk\"}\n\ndata: second\n");
        assert_eq!(out, vec!["{\"type\":\"chunk\"}".to_string(), "second".to_string()]);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_decoder_split_utf8() {
        let text = "data: héllo\n".as_bytes();
        // split inside the two-byte 'é'
        let split = text.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(&text[..split]).is_empty());
        assert_eq!(decoder.push(&text[split..]), vec!["héllo".to_string()]);
    }

    #[test]
    fn test_decoder_stops_at_done() {
        let mut decoder = SseDecoder::new();
        let out = decoder.push(b"data: a\n\ndata: [DONE]\n\ndata: late\n\n");
        assert_eq!(out, vec!["a".to_string()]);
        assert!(decoder.is_done());
        assert!(decoder.push(b"data: more\n").is_empty());
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_decoder_flushes_unterminated_tail() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: tail").is_empty());
        assert_eq!(decoder.finish(), Some("tail".to_string()));
    }

    #[test]
    fn test_decoder_byte_at_a_time() {
        let body = b"data: first\r\n\n: comment\ndata: second\n\ndata: [DONE]\n\n";
        let mut decoder = SseDecoder::new();
        let mut out = Vec::new();
        for byte in body.iter() {
            out.extend(decoder.push(std::slice::from_ref(byte)));
        }
        assert_eq!(out, vec!["first".to_string(), "second".to_string()]);
        assert!(decoder.is_done());
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_decoder_drops_oversized_line() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: ok-before\n\ndata: ").len() == 1);

        let filler = vec![b'x'; MAX_LINE_BYTES];
        assert!(decoder.push(&filler).is_empty());
        assert_eq!(decoder.pending(), 0);

        // The rest of the oversized line is dropped, the next line survives.
        assert!(decoder.push(&filler[..1024]).is_empty());
        let out = decoder.push(b"xxx\ndata: ok-after\n\n");
        assert_eq!(out, vec!["ok-after".to_string()]);
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_decoder_finish_after_oversized_tail_is_empty() {
        let mut decoder = SseDecoder::new();
        let mut line = b"data: ".to_vec();
        line.extend(vec![b'y'; MAX_LINE_BYTES]);
        assert!(decoder.push(&line).is_empty());
        assert!(decoder.push(b"yyy").is_empty());
        assert_eq!(decoder.pending(), 3);
        assert_eq!(decoder.finish(), None);
    }

    #[tokio::test]
    async fn test_sse_stream_extension() {
        let reads: Vec<Result<Bytes, ClientError>> = vec![
            Ok(Bytes::from_static(b"data: one\n\nda")),
            Ok(Bytes::from_static(b"ta: two\n\n")),
            Ok(Bytes::from_static(b"data: [DONE]\n\n")),
        ];
        let payloads: Vec<String> = stream::iter(reads)
            .sse()
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(payloads, vec!["one".to_string(), "two".to_string()]);
    }

    #[tokio::test]
    async fn test_sse_stream_yields_read_error_after_data() {
        let reads: Vec<Result<Bytes, ClientError>> = vec![
            Ok(Bytes::from_static(b"data: one\n\n")),
            Err(ClientError::Unavailable("reset".into())),
        ];
        let items: Vec<_> = stream::iter(reads).sse().collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "one");
        assert!(matches!(items[1], Err(ClientError::Unavailable(_))));
    }
}

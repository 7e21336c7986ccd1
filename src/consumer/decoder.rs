use tracing::warn;

use crate::frame::StreamEvent;
use crate::sse::SseDecoder;

/// Incremental decoder for the relay's frame stream.
///
/// Frames split across reads are reassembled before parsing. A frame whose
/// payload is not a known event is logged and skipped; the stream goes on.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    lines: SseDecoder,
    skipped: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one read, returning every event completed by it.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        let payloads = self.lines.push(bytes);
        self.parse_all(payloads)
    }

    /// Flush an unterminated trailing frame after the body ended.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let payloads = self.lines.finish().into_iter().collect();
        self.parse_all(payloads)
    }

    /// Number of frames dropped as malformed so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn parse_all(&mut self, payloads: Vec<String>) -> Vec<StreamEvent> {
        payloads
            .into_iter()
            .filter_map(|payload| match StreamEvent::decode(&payload) {
                Ok(event) => Some(event),
                Err(e) => {
                    self.skipped += 1;
                    warn!("Skipping malformed frame ({} bytes): {}", payload.len(), e);
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_frame_is_reassembled() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"data: {\"type\":\"chu").is_empty());
        let events = decoder.push(b"nk\",\"content\":\"Recur\"}\n\ndata: {\"type\":\"chunk\",\"content\":\"sion\"}\n\n");
        assert_eq!(
            events,
            vec![StreamEvent::chunk("Recur"), StreamEvent::chunk("sion")]
        );
    }

    #[test]
    fn test_multibyte_split_across_reads() {
        let frame = "data: {\"type\":\"chunk\",\"content\":\"héllo 🚀\"}\n\n".as_bytes();
        let cut = frame.iter().position(|b| *b == 0xF0).unwrap() + 2;

        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(&frame[..cut]).is_empty());
        assert_eq!(decoder.push(&frame[cut..]), vec![StreamEvent::chunk("héllo 🚀")]);
    }

    #[test]
    fn test_malformed_frame_is_skipped() {
        let mut decoder = FrameDecoder::new();
        let events = decoder.push(
            b"data: {not json}\n\ndata: {\"type\":\"mystery\"}\n\ndata: {\"type\":\"error\",\"message\":\"boom\"}\n\n",
        );
        assert_eq!(events, vec![StreamEvent::error("boom")]);
        assert_eq!(decoder.skipped(), 2);
    }

    #[test]
    fn test_corrupt_frame_between_valid_frames_leaves_neighbours_intact() {
        let mut decoder = FrameDecoder::new();
        let events = decoder.push(
            b"data: {\"type\":\"chunk\",\"content\":\"Recur\"}\n\ndata: {\"type\":\"chunk\",\"content\n\ndata: {\"type\":\"chunk\",\"content\":\"sion\"}\n\n",
        );
        assert_eq!(
            events,
            vec![StreamEvent::chunk("Recur"), StreamEvent::chunk("sion")]
        );
        assert_eq!(decoder.skipped(), 1);

        // Same again, with the corrupt frame arriving in its own read.
        let mut decoder = FrameDecoder::new();
        assert_eq!(
            decoder.push(b"data: {\"type\":\"chunk\",\"content\":\"a\"}\n\n"),
            vec![StreamEvent::chunk("a")]
        );
        assert!(decoder.push(b"data: \xff\xfe{]\n\n").is_empty());
        assert_eq!(
            decoder.push(b"data: {\"type\":\"complete\",\"suggestions\":[]}\n\n").len(),
            1
        );
        assert_eq!(decoder.skipped(), 1);
    }

    #[test]
    fn test_finish_flushes_unterminated_frame() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder
            .push(b"data: {\"type\":\"complete\",\"suggestions\":[]}")
            .is_empty());
        let events = decoder.finish();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_terminal());
        assert!(decoder.finish().is_empty());
    }
}

//! Sentinel-delimited frame extraction for the producer's stdout.
//!
//! The producer prints records embedded in otherwise free-form output:
//!
//! ```text
//! loading model...\nJSON_START{"LAT": 33.7, "LON": -78.8}JSON_END\nprocessing row 2\n
//! ```
//!
//! Reads from a pipe split this text at arbitrary points, so a frame can
//! arrive in pieces or several frames can arrive at once. [`SentinelBuffer`]
//! accumulates bytes and hands out complete frames strictly left to right.
//! [`FrameExtractor`] decodes them into [`Record`]s, dropping payloads that
//! don't decode without losing its place in the stream.
//!
//! Extraction depends only on the concatenated bytes, never on how they were
//! chunked.

use crate::constants::{DEFAULT_MAX_BUFFER_BYTES, END_SENTINEL, LOGGED_PAYLOAD_LIMIT, START_SENTINEL};
use crate::record::{Record, RecordError};

/// Errors raised by the accumulation buffer.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FramingError {
    /// An unterminated frame grew past the configured limit.
    #[error("frame buffer overflow: {pending} pending bytes exceed limit of {limit}")]
    Overflow {
        /// Bytes held when the limit was checked.
        pending: usize,
        /// Configured maximum.
        limit: usize,
    },
}

/// The payload between one matched pair of sentinels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Vec<u8>,
}

impl Frame {
    /// Raw payload bytes (sentinels excluded).
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Decode the payload as a record.
    pub fn decode(&self) -> Result<Record, RecordError> {
        Record::decode(&self.payload)
    }
}

/// Accumulation buffer that yields sentinel-delimited frames.
///
/// Pure data structure: no I/O, no logging, independently testable.
#[derive(Debug)]
pub struct SentinelBuffer {
    buf: Vec<u8>,
    start: Vec<u8>,
    end: Vec<u8>,
    limit: usize,
}

impl SentinelBuffer {
    /// Create a buffer with custom sentinels and size limit.
    ///
    /// # Panics
    ///
    /// Panics if either sentinel is empty.
    #[must_use]
    pub fn new(start: &str, end: &str, limit: usize) -> Self {
        assert!(!start.is_empty() && !end.is_empty(), "sentinels must be non-empty");
        Self {
            buf: Vec::new(),
            start: start.as_bytes().to_vec(),
            end: end.as_bytes().to_vec(),
            limit,
        }
    }

    /// Append bytes read from the stream.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Remove and return the next complete frame, if the buffer holds one.
    ///
    /// Finds the first start sentinel, then the first end sentinel after it.
    /// Everything up to and including that end sentinel is consumed. When no
    /// complete pair exists the buffer is compacted and `None` is returned.
    pub fn extract_next(&mut self) -> Option<Frame> {
        let Some(start_at) = find(&self.buf, &self.start, 0) else {
            self.discard_noise(None);
            return None;
        };
        let payload_from = start_at + self.start.len();
        let Some(end_at) = find(&self.buf, &self.end, payload_from) else {
            self.discard_noise(Some(start_at));
            return None;
        };

        let payload = self.buf[payload_from..end_at].to_vec();
        self.buf.drain(..end_at + self.end.len());
        Some(Frame { payload })
    }

    /// Fail if the unconsumed bytes exceed the configured limit.
    pub fn check_limit(&self) -> Result<(), FramingError> {
        if self.buf.len() > self.limit {
            return Err(FramingError::Overflow {
                pending: self.buf.len(),
                limit: self.limit,
            });
        }
        Ok(())
    }

    /// Drop all pending bytes.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Number of unconsumed bytes.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if bytes are buffered awaiting more input.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Drop bytes that can never become part of a frame.
    ///
    /// With an open start sentinel, everything before it is noise. Without
    /// one, only a tail shorter than the start sentinel could still be the
    /// beginning of one.
    fn discard_noise(&mut self, open_start: Option<usize>) {
        let keep_from = match open_start {
            Some(start_at) => start_at,
            None => self.buf.len().saturating_sub(self.start.len() - 1),
        };
        if keep_from > 0 {
            self.buf.drain(..keep_from);
        }
    }
}

impl Default for SentinelBuffer {
    fn default() -> Self {
        Self::new(START_SENTINEL, END_SENTINEL, DEFAULT_MAX_BUFFER_BYTES)
    }
}

/// Decodes records out of raw producer output.
#[derive(Debug, Default)]
pub struct FrameExtractor {
    buffer: SentinelBuffer,
}

impl FrameExtractor {
    /// Create an extractor over the given buffer configuration.
    #[must_use]
    pub fn new(buffer: SentinelBuffer) -> Self {
        Self { buffer }
    }

    /// Feed a chunk and return every record completed by it, in order.
    ///
    /// Undecodable payloads are logged and skipped. Call
    /// [`check_limit`](Self::check_limit) afterwards to detect a runaway
    /// frame.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Record> {
        self.buffer.push(chunk);
        let mut records = Vec::new();
        while let Some(frame) = self.buffer.extract_next() {
            match frame.decode() {
                Ok(record) => records.push(record),
                Err(e) => {
                    log::warn!(
                        "[Framing] Dropping undecodable frame ({e}): {}",
                        truncate_for_log(frame.payload())
                    );
                }
            }
        }
        records
    }

    /// See [`SentinelBuffer::check_limit`].
    pub fn check_limit(&self) -> Result<(), FramingError> {
        self.buffer.check_limit()
    }

    /// Discard any half-received frame.
    pub fn reset(&mut self) {
        if self.buffer.has_partial() {
            log::debug!("[Framing] Discarding {} pending bytes", self.buffer.pending());
        }
        self.buffer.clear();
    }

    /// Number of unconsumed bytes.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.pending()
    }
}

/// Position of `needle` in `haystack` at or after `from`.
fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|offset| offset + from)
}

fn truncate_for_log(payload: &[u8]) -> String {
    let text = String::from_utf8_lossy(payload);
    if text.chars().count() <= LOGGED_PAYLOAD_LIMIT {
        return text.into_owned();
    }
    let cut: String = text.chars().take(LOGGED_PAYLOAD_LIMIT).collect();
    format!("{cut}…")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(json: &str) -> String {
        format!("{START_SENTINEL}{json}{END_SENTINEL}")
    }

    fn lats(records: &[Record]) -> Vec<f64> {
        records.iter().map(|r| r.lat).collect()
    }

    /// A stream mixing noise, valid frames and one undecodable frame.
    fn sample_stream() -> String {
        format!(
            "booting\n{}\nlog line\n{}{}trailing {}\n",
            frame(r#"{"LAT": 1, "LON": 1}"#),
            frame(r#"{"LAT": 2, "LON": 2, "anomaly": 1}"#),
            frame("{broken"),
            frame(r#"{"LAT": 3, "LON": 3}"#),
        )
    }

    #[test]
    fn test_single_frame_extracted() {
        let mut buffer = SentinelBuffer::default();
        buffer.push(frame(r#"{"LAT": 1, "LON": 2}"#).as_bytes());
        let extracted = buffer.extract_next().unwrap();
        assert_eq!(extracted.payload(), br#"{"LAT": 1, "LON": 2}"#);
        assert!(buffer.extract_next().is_none());
        assert!(!buffer.has_partial());
    }

    #[test]
    fn test_multiple_frames_in_one_chunk_yielded_in_order() {
        let mut extractor = FrameExtractor::default();
        let records = extractor.feed(sample_stream().as_bytes());
        assert_eq!(lats(&records), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_split_frame_only_yielded_after_second_chunk() {
        let stream = frame(r#"{"LAT": 5, "LON": 6}"#);
        let (head, tail) = stream.split_at(stream.len() / 2);

        let mut extractor = FrameExtractor::default();
        assert!(extractor.feed(head.as_bytes()).is_empty());
        assert!(extractor.pending() > 0);
        let records = extractor.feed(tail.as_bytes());
        assert_eq!(lats(&records), vec![5.0]);
        assert_eq!(extractor.pending(), 0);
    }

    #[test]
    fn test_split_invariance_for_every_two_way_split() {
        let stream = sample_stream();
        let bytes = stream.as_bytes();
        let whole = FrameExtractor::default().feed(bytes);

        for cut in 0..=bytes.len() {
            let mut extractor = FrameExtractor::default();
            let mut records = extractor.feed(&bytes[..cut]);
            records.extend(extractor.feed(&bytes[cut..]));
            assert_eq!(records, whole, "split at byte {cut}");
        }
    }

    #[test]
    fn test_split_invariance_byte_at_a_time() {
        let stream = sample_stream();
        let whole = FrameExtractor::default().feed(stream.as_bytes());

        let mut extractor = FrameExtractor::default();
        let mut records = Vec::new();
        for byte in stream.as_bytes() {
            records.extend(extractor.feed(&[*byte]));
        }
        assert_eq!(records, whole);
    }

    #[test]
    fn test_undecodable_frame_does_not_corrupt_later_frames() {
        let mut extractor = FrameExtractor::default();
        assert!(extractor.feed(frame("not json at all").as_bytes()).is_empty());
        let records = extractor.feed(frame(r#"{"LAT": 7, "LON": 8}"#).as_bytes());
        assert_eq!(lats(&records), vec![7.0]);
    }

    #[test]
    fn test_end_sentinel_without_start_waits() {
        let mut buffer = SentinelBuffer::default();
        buffer.push(format!("garbage{END_SENTINEL}more").as_bytes());
        assert!(buffer.extract_next().is_none());

        buffer.push(frame(r#"{"LAT": 1, "LON": 1}"#).as_bytes());
        let extracted = buffer.extract_next().unwrap();
        assert_eq!(extracted.decode().unwrap().lat, 1.0);
    }

    #[test]
    fn test_start_without_end_keeps_frame_pending() {
        let mut buffer = SentinelBuffer::default();
        buffer.push(format!("noise{START_SENTINEL}{{\"LAT\": 1,").as_bytes());
        assert!(buffer.extract_next().is_none());
        assert!(buffer.has_partial());

        buffer.push(format!(" \"LON\": 4}}{END_SENTINEL}").as_bytes());
        let extracted = buffer.extract_next().unwrap();
        assert_eq!(extracted.decode().unwrap().lon, 4.0);
    }

    #[test]
    fn test_noise_is_not_accumulated() {
        let mut buffer = SentinelBuffer::new(START_SENTINEL, END_SENTINEL, 64);
        for _ in 0..100 {
            buffer.push(b"progress: 10% 20% 30%\n");
            assert!(buffer.extract_next().is_none());
            assert!(buffer.check_limit().is_ok());
        }
        assert!(buffer.pending() < START_SENTINEL.len());
    }

    #[test]
    fn test_partial_start_sentinel_survives_compaction() {
        let mut buffer = SentinelBuffer::default();
        buffer.push(b"noise JSON_ST");
        assert!(buffer.extract_next().is_none());
        buffer.push(br#"ART{"LAT": 9, "LON": 9}JSON_END"#);
        let extracted = buffer.extract_next().unwrap();
        assert_eq!(extracted.decode().unwrap().lat, 9.0);
    }

    #[test]
    fn test_unterminated_frame_overflows() {
        let mut buffer = SentinelBuffer::new(START_SENTINEL, END_SENTINEL, 32);
        buffer.push(START_SENTINEL.as_bytes());
        buffer.push(&[b'x'; 40]);
        assert!(buffer.extract_next().is_none());
        assert_eq!(
            buffer.check_limit(),
            Err(FramingError::Overflow {
                pending: START_SENTINEL.len() + 40,
                limit: 32,
            })
        );
    }

    #[test]
    fn test_large_chunk_of_complete_frames_does_not_overflow() {
        let mut extractor = FrameExtractor::new(SentinelBuffer::new(START_SENTINEL, END_SENTINEL, 64));
        let stream: String = (0..50).map(|i| frame(&format!(r#"{{"LAT": {i}, "LON": 0}}"#))).collect();
        let records = extractor.feed(stream.as_bytes());
        assert_eq!(records.len(), 50);
        assert!(extractor.check_limit().is_ok());
    }

    #[test]
    fn test_reset_discards_half_frame() {
        let mut extractor = FrameExtractor::default();
        extractor.feed(format!("{START_SENTINEL}{{\"LAT\": 1,").as_bytes());
        extractor.reset();
        // The tail of the old frame must not combine with new output.
        let records = extractor.feed(format!(" \"LON\": 1}}{END_SENTINEL}").as_bytes());
        assert!(records.is_empty());
        assert!(extractor.pending() < START_SENTINEL.len());

        let records = extractor.feed(frame(r#"{"LAT": 2, "LON": 2}"#).as_bytes());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].lat, 2.0);
    }

    #[test]
    fn test_empty_payload_is_dropped() {
        let mut extractor = FrameExtractor::default();
        assert!(extractor.feed(frame("").as_bytes()).is_empty());
    }

    #[test]
    fn test_truncate_for_log() {
        assert_eq!(truncate_for_log(b"short"), "short");
        let long = vec![b'a'; LOGGED_PAYLOAD_LIMIT + 10];
        assert_eq!(truncate_for_log(&long).chars().count(), LOGGED_PAYLOAD_LIMIT + 1);
    }
}

//! MJPEG frame extraction.
//!
//! Upstream cameras deliver an unbounded multipart body. Rather than parsing
//! multipart headers, the extractor scans for the JPEG start-of-image
//! (`FF D8`) and end-of-image (`FF D9`) markers and cuts complete images out
//! of whatever chunks the network hands us.

/// Upper bound on unresolved bytes held between chunks.
pub const MAX_BUFFERED_BYTES: usize = 10 * 1024 * 1024;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Incremental JPEG cutter over an arbitrarily chunked byte stream.
///
/// Each call resolves at most one start/end marker pair. Bytes up to and
/// including the end marker are discarded once a frame is cut; anything after
/// it stays buffered for the next call.
#[derive(Debug, Default)]
pub struct MjpegExtractor {
    buffer: Vec<u8>,
    /// Offset of the start marker of the frame in progress, once seen.
    start: Option<usize>,
    /// Bytes before this offset hold no marker still being looked for.
    scan_from: usize,
}

impl MjpegExtractor {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(64 * 1024),
            start: None,
            scan_from: 0,
        }
    }

    /// Append `chunk` and try to cut one frame.
    pub fn push(&mut self, chunk: &[u8]) -> Option<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        let frame = self.next_frame();
        if frame.is_none() && self.buffer.len() > MAX_BUFFERED_BYTES {
            // Keep the last byte: it may be the first half of a marker.
            let drain_len = self.buffer.len() - 1;
            self.buffer.drain(..drain_len);
            self.reset_scan();
        }
        frame
    }

    /// Cut the next frame out of already buffered bytes, if one is complete.
    ///
    /// Resumes scanning where the previous call stopped, so a frame arriving in
    /// many small chunks is scanned once rather than once per chunk.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        // A marker may straddle the current end of the buffer.
        let resume = self.buffer.len().saturating_sub(1);
        let start = match self.start {
            Some(start) => start,
            None => match find_marker(&self.buffer, SOI, self.scan_from) {
                Some(start) => {
                    self.start = Some(start);
                    self.scan_from = start + SOI.len();
                    start
                }
                None => {
                    self.scan_from = resume;
                    return None;
                }
            },
        };
        let body_from = start + SOI.len();
        let Some(eoi) = find_marker(&self.buffer, EOI, self.scan_from.max(body_from)) else {
            self.scan_from = resume.max(body_from);
            return None;
        };
        let end = eoi + EOI.len();
        let frame = self.buffer[start..end].to_vec();
        self.buffer.drain(..end);
        self.reset_scan();
        Some(frame)
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drop all unresolved bytes (used when a new upstream connection starts).
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.reset_scan();
    }

    fn reset_scan(&mut self) {
        self.start = None;
        self.scan_from = 0;
    }
}

fn find_marker(buffer: &[u8], marker: [u8; 2], from: usize) -> Option<usize> {
    buffer
        .get(from..)?
        .windows(2)
        .position(|w| w == marker)
        .map(|pos| from + pos)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_jpeg(payload: &[u8]) -> Vec<u8> {
        let mut bytes = SOI.to_vec();
        bytes.extend_from_slice(payload);
        bytes.extend_from_slice(&EOI);
        bytes
    }

    fn multipart(frames: &[Vec<u8>]) -> Vec<u8> {
        let mut body = Vec::new();
        for frame in frames {
            body.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
            body.extend_from_slice(frame);
            body.extend_from_slice(b"\r\n");
        }
        body
    }

    fn drain(extractor: &mut MjpegExtractor, chunk: &[u8], out: &mut Vec<Vec<u8>>) {
        if let Some(frame) = extractor.push(chunk) {
            out.push(frame);
        }
        while let Some(frame) = extractor.next_frame() {
            out.push(frame);
        }
    }

    #[test]
    fn extracts_single_frame_and_discards_leading_garbage() {
        let frame = fake_jpeg(b"hello");
        let mut input = b"garbage\xFF\x00".to_vec();
        input.extend_from_slice(&frame);

        let mut extractor = MjpegExtractor::new();
        let got = extractor.push(&input).expect("frame");
        assert_eq!(got, frame);
        assert_eq!(extractor.buffered_len(), 0);
    }

    #[test]
    fn keeps_trailing_bytes_after_end_marker() {
        let frame = fake_jpeg(b"abc");
        let mut input = frame.clone();
        input.extend_from_slice(b"\r\n--fr");

        let mut extractor = MjpegExtractor::new();
        assert_eq!(extractor.push(&input), Some(frame));
        assert_eq!(extractor.buffered_len(), 6);
    }

    #[test]
    fn resolves_one_pair_per_call() {
        let frames = vec![fake_jpeg(b"one"), fake_jpeg(b"two"), fake_jpeg(b"three")];
        let body = multipart(&frames);

        let mut extractor = MjpegExtractor::new();
        assert_eq!(extractor.push(&body).as_ref(), Some(&frames[0]));
        assert_eq!(extractor.next_frame().as_ref(), Some(&frames[1]));
        assert_eq!(extractor.next_frame().as_ref(), Some(&frames[2]));
        assert_eq!(extractor.next_frame(), None);
    }

    #[test]
    fn chunking_does_not_change_extracted_frames() {
        let frames: Vec<Vec<u8>> = (0u8..8)
            .map(|i| fake_jpeg(&vec![i.wrapping_mul(37); 50 + i as usize * 13]))
            .collect();
        let mut body = b"\x00\x01preamble".to_vec();
        body.extend_from_slice(&multipart(&frames));

        let mut whole = Vec::new();
        drain(&mut MjpegExtractor::new(), &body, &mut whole);
        assert_eq!(whole, frames);

        for chunk_size in [1, 2, 3, 7, 64, 1024] {
            let mut extractor = MjpegExtractor::new();
            let mut chunked = Vec::new();
            for chunk in body.chunks(chunk_size) {
                drain(&mut extractor, chunk, &mut chunked);
            }
            assert_eq!(chunked, whole, "chunk size {}", chunk_size);
        }
    }

    #[test]
    fn marker_split_across_chunks() {
        let frame = fake_jpeg(b"split");
        let mut extractor = MjpegExtractor::new();
        assert_eq!(extractor.push(&frame[..1]), None);
        assert_eq!(extractor.push(&frame[1..frame.len() - 1]), None);
        assert_eq!(extractor.push(&frame[frame.len() - 1..]), Some(frame));
    }

    #[test]
    fn end_marker_before_start_is_skipped() {
        let frame = fake_jpeg(b"ok");
        let mut input = EOI.to_vec();
        input.extend_from_slice(&frame);

        let mut extractor = MjpegExtractor::new();
        assert_eq!(extractor.push(&input), Some(frame));
    }

    #[test]
    fn malformed_bytes_yield_nothing_and_do_not_poison() {
        let mut extractor = MjpegExtractor::new();
        assert_eq!(extractor.push(b"\x00\x01\x02"), None);
        assert_eq!(extractor.next_frame(), None);

        let frame = fake_jpeg(b"valid");
        assert_eq!(extractor.push(&frame), Some(frame));
    }

    #[test]
    fn start_without_end_is_retained() {
        let mut extractor = MjpegExtractor::new();
        assert_eq!(extractor.push(&[0xFF, 0xD8, 1, 2, 3]), None);
        assert_eq!(extractor.buffered_len(), 5);
        assert_eq!(extractor.push(&[4, 0xFF, 0xD9]), Some(vec![0xFF, 0xD8, 1, 2, 3, 4, 0xFF, 0xD9]));
    }

    #[test]
    fn small_chunks_never_rescan_resolved_bytes() {
        let frame = fake_jpeg(&vec![0x55; 100 * 1024]);
        let mut body = b"--frame\r\n\r\n".to_vec();
        body.extend_from_slice(&frame);

        let mut extractor = MjpegExtractor::new();
        let mut got = None;
        for chunk in body.chunks(1024) {
            got = extractor.push(chunk);
            if got.is_none() {
                assert_eq!(extractor.start, Some(b"--frame\r\n\r\n".len()));
                assert_eq!(extractor.scan_from, extractor.buffered_len() - 1);
            }
        }
        assert_eq!(got, Some(frame));
        assert_eq!((extractor.start, extractor.scan_from), (None, 0));
    }

    #[test]
    fn oversized_unresolved_buffer_is_trimmed() {
        let mut extractor = MjpegExtractor::new();
        let junk = vec![0u8; MAX_BUFFERED_BYTES];
        assert_eq!(extractor.push(&junk), None);
        assert_eq!(extractor.push(&[0xAA, 0xFF]), None);
        assert_eq!(extractor.buffered_len(), 1);

        // The retained 0xFF pairs with the next byte to form SOI.
        assert_eq!(extractor.push(&[0xD8, 7, 0xFF, 0xD9]), Some(vec![0xFF, 0xD8, 7, 0xFF, 0xD9]));
    }
}

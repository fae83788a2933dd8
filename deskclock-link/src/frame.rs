//! Serial telegram framing and decoding
//!
//! The host companion sends short ASCII telegrams such as
//! `CCc 23 G45c12 RL61.5`. A frame ends on CR/LF, or after 50 ms of silence
//! when the sender dropped the terminator. Decoding searches for tags instead of
//! reading fixed offsets, so missing or reordered fields are tolerated:
//! - `CCc ` + integer: CPU load percent
//! - `G` + digits, then `c` + digits: GPU temperature, then GPU load percent
//! - `RL` + decimal: RAM load percent
//!
//! Fields a frame does not mention keep their previous value.

use crate::telemetry::TelemetrySample;
use std::time::{Duration, Instant};

/// Bytes past this are dropped until the frame completes
pub const FRAME_CAPACITY: usize = 256;

/// Silence that completes a pending frame
pub const FRAME_GAP: Duration = Duration::from_millis(50);

const CPU_LOAD_TAG: &[u8] = b"CCc ";
const RAM_LOAD_TAG: &[u8] = b"RL";

/// Accumulates bytes into frames and decodes them into samples.
///
/// Completion on silence is driven by [`FrameParser::poll_idle_at`]; the
/// ingestion loop calls it between reads.
#[derive(Debug)]
pub struct FrameParser {
    buffer: Vec<u8>,
    last_byte_at: Option<Instant>,
    gap: Duration,
    last: TelemetrySample,
    dropped: usize,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::with_gap(FRAME_GAP)
    }

    pub fn with_gap(gap: Duration) -> Self {
        Self {
            buffer: Vec::with_capacity(FRAME_CAPACITY),
            last_byte_at: None,
            gap,
            last: TelemetrySample::default(),
            dropped: 0,
        }
    }

    /// Feeds one byte received now
    pub fn feed(&mut self, byte: u8) -> Option<TelemetrySample> {
        self.feed_at(byte, Instant::now())
    }

    /// Feeds one byte received at `now`; returns a sample when it terminated a frame
    pub fn feed_at(&mut self, byte: u8, now: Instant) -> Option<TelemetrySample> {
        self.last_byte_at = Some(now);

        if byte == b'\r' || byte == b'\n' {
            return Some(self.complete());
        }

        if self.buffer.len() < FRAME_CAPACITY {
            self.buffer.push(byte);
        } else {
            self.dropped += 1;
        }
        None
    }

    pub fn poll_idle(&mut self) -> Option<TelemetrySample> {
        self.poll_idle_at(Instant::now())
    }

    /// Completes a non-empty pending frame once the line has been silent for the gap
    pub fn poll_idle_at(&mut self, now: Instant) -> Option<TelemetrySample> {
        let last = self.last_byte_at?;
        if self.buffer.is_empty() || now.saturating_duration_since(last) < self.gap {
            return None;
        }
        Some(self.complete())
    }

    /// Completes whatever is pending; used when the source closes
    pub fn finish(&mut self) -> Option<TelemetrySample> {
        if self.buffer.is_empty() {
            return None;
        }
        Some(self.complete())
    }

    /// Bytes currently waiting for a terminator
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes discarded because a frame outgrew the buffer
    pub fn dropped_bytes(&self) -> usize {
        self.dropped
    }

    fn complete(&mut self) -> TelemetrySample {
        let sample = decode_frame(&self.buffer, self.last);
        if sample.valid {
            self.last = sample;
        }
        self.buffer.clear();
        sample
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Decodes one frame on top of `previous`, leaving unseen fields untouched.
///
/// `valid` reports whether this frame yielded at least one field.
pub fn decode_frame(frame: &[u8], previous: TelemetrySample) -> TelemetrySample {
    let mut sample = previous;
    let mut found = false;

    if let Some(at) = find(frame, CPU_LOAD_TAG) {
        if let Some(cpu) = parse_int(&frame[at + CPU_LOAD_TAG.len()..]) {
            sample.cpu_load_pct = cpu;
            found = true;
        }
    }

    let gpu_tag = frame
        .windows(2)
        .position(|w| w[0] == b'G' && w[1].is_ascii_digit());
    if let Some(at) = gpu_tag {
        let marker = frame[at..].iter().position(|&b| b == b'c').map(|m| at + m);
        if let Some(marker) = marker {
            let temp = parse_int(&frame[at + 1..marker]);
            let load = parse_int(&frame[marker + 1..]);
            if let Some(temp) = temp {
                sample.gpu_temp_c = temp;
                found = true;
            }
            if let Some(load) = load {
                sample.gpu_load_pct = load;
                found = true;
            }
        }
    }

    if let Some(at) = find(frame, RAM_LOAD_TAG) {
        if let Some(ram) = parse_decimal(&frame[at + RAM_LOAD_TAG.len()..]) {
            sample.ram_load_pct = ram;
            found = true;
        }
    }

    sample.valid = found;
    sample
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Leading number after optional whitespace and sign; the end of the digits is
/// where the number stops
fn number_prefix(input: &[u8], allow_fraction: bool) -> Option<&str> {
    let start = input.iter().position(|b| !b.is_ascii_whitespace())?;
    let rest = &input[start..];

    let mut end = 0;
    if matches!(rest.first(), Some(b'-') | Some(b'+')) {
        end = 1;
    }
    let digits_start = end;
    while end < rest.len() && rest[end].is_ascii_digit() {
        end += 1;
    }
    let mut has_digits = end > digits_start;

    if allow_fraction && end < rest.len() && rest[end] == b'.' {
        let mut frac = end + 1;
        while frac < rest.len() && rest[frac].is_ascii_digit() {
            frac += 1;
        }
        if frac > end + 1 {
            has_digits = true;
            end = frac;
        }
    }

    if !has_digits {
        return None;
    }
    std::str::from_utf8(&rest[..end]).ok()
}

fn parse_int(input: &[u8]) -> Option<i32> {
    number_prefix(input, false)?.parse().ok()
}

fn parse_decimal(input: &[u8]) -> Option<f32> {
    number_prefix(input, true)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(parser: &mut FrameParser, bytes: &[u8], at: Instant) -> Vec<TelemetrySample> {
        bytes.iter().filter_map(|&b| parser.feed_at(b, at)).collect()
    }

    #[test]
    fn test_decodes_full_telegram() {
        let sample = decode_frame(b"CCc 23 G45c12 RL61.5", TelemetrySample::default());
        assert!(sample.valid);
        assert_eq!(sample.cpu_load_pct, 23);
        assert_eq!(sample.gpu_temp_c, 45);
        assert_eq!(sample.gpu_load_pct, 12);
        assert_eq!(sample.ram_load_pct, 61.5);
    }

    #[test]
    fn test_fields_can_come_in_any_order() {
        let sample = decode_frame(b"RL 40.0 G70c99 CCc 5", TelemetrySample::default());
        assert_eq!(sample.cpu_load_pct, 5);
        assert_eq!(sample.gpu_temp_c, 70);
        assert_eq!(sample.gpu_load_pct, 99);
        assert_eq!(sample.ram_load_pct, 40.0);
    }

    #[test]
    fn test_missing_fields_stay_sticky() {
        let previous = decode_frame(b"CCc 23 G45c12 RL61.5", TelemetrySample::default());
        let sample = decode_frame(b"CCc 80", previous);
        assert!(sample.valid);
        assert_eq!(sample.cpu_load_pct, 80);
        assert_eq!(sample.gpu_temp_c, 45);
        assert_eq!(sample.ram_load_pct, 61.5);
    }

    #[test]
    fn test_frame_without_tags_is_invalid_and_changes_nothing() {
        let previous = decode_frame(b"CCc 23 RL10", TelemetrySample::default());
        let sample = decode_frame(b"hello world", previous);
        assert!(!sample.valid);
        assert_eq!(sample.cpu_load_pct, 23);
        assert_eq!(sample.ram_load_pct, 10.0);
    }

    #[test]
    fn test_gpu_tag_needs_marker_and_digit() {
        let sample = decode_frame(b"GPU busy G12", TelemetrySample::default());
        assert!(!sample.valid);

        // the first G is not followed by a digit, the second one is
        let sample = decode_frame(b"GX G55c7", TelemetrySample::default());
        assert_eq!(sample.gpu_temp_c, 55);
        assert_eq!(sample.gpu_load_pct, 7);
    }

    #[test]
    fn test_tag_without_number_is_not_extracted() {
        let sample = decode_frame(b"CCc abc RL", TelemetrySample::default());
        assert!(!sample.valid);
    }

    #[test]
    fn test_terminator_completes_frame() {
        let mut parser = FrameParser::new();
        let now = Instant::now();
        let frames = feed_all(&mut parser, b"CCc 9 RL1.5\n", now);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].cpu_load_pct, 9);
        assert_eq!(parser.pending(), 0);
    }

    #[test]
    fn test_crlf_yields_two_frames_second_empty() {
        let mut parser = FrameParser::new();
        let now = Instant::now();
        let frames = feed_all(&mut parser, b"CCc 9\r\n", now);
        assert_eq!(frames.len(), 2);
        assert!(frames[0].valid);
        assert!(!frames[1].valid);
        // sticky value survives the empty frame
        assert_eq!(frames[1].cpu_load_pct, 9);
    }

    #[test]
    fn test_silence_completes_pending_frame() {
        let mut parser = FrameParser::new();
        let start = Instant::now();
        feed_all(&mut parser, b"CCc 42", start);

        assert!(parser.poll_idle_at(start + Duration::from_millis(49)).is_none());
        let sample = parser.poll_idle_at(start + FRAME_GAP).expect("gap completes the frame");
        assert_eq!(sample.cpu_load_pct, 42);
        assert!(parser.poll_idle_at(start + Duration::from_secs(5)).is_none());
    }

    #[test]
    fn test_silence_without_pending_bytes_is_not_a_frame() {
        let mut parser = FrameParser::new();
        assert!(parser.poll_idle_at(Instant::now()).is_none());
    }

    #[test]
    fn test_finish_flushes_pending_bytes() {
        let mut parser = FrameParser::new();
        assert!(parser.finish().is_none());
        feed_all(&mut parser, b"RL 12.5", Instant::now());
        assert_eq!(parser.finish().unwrap().ram_load_pct, 12.5);
        assert_eq!(parser.pending(), 0);
    }

    #[test]
    fn test_overflow_bytes_are_dropped() {
        let mut parser = FrameParser::new();
        let now = Instant::now();
        let mut noise = vec![b'x'; FRAME_CAPACITY + 44];
        noise.extend_from_slice(b"CCc 50");
        feed_all(&mut parser, &noise, now);
        assert_eq!(parser.pending(), FRAME_CAPACITY);
        assert_eq!(parser.dropped_bytes(), 50);

        // tag landed past capacity, so nothing decodes; the parser still makes progress
        let sample = parser.feed_at(b'\n', now).unwrap();
        assert!(!sample.valid);
        assert_eq!(parser.pending(), 0);
    }

    #[test]
    fn test_frame_count_matches_terminators_plus_gaps() {
        // (byte, arrival offset in ms)
        let stream: &[(&[u8], u64)] = &[
            (b"CCc 1\n", 0),
            (b"RL2", 10),      // no terminator, completed by the gap
            (b"G3c4\r\n", 200), // two terminators
            (b"junk", 300),    // gap after non-empty junk
            (b"\n", 500),      // lone terminator on an empty buffer
        ];

        let mut parser = FrameParser::new();
        let start = Instant::now();
        let mut frames = 0;
        let mut terminators = 0;
        let mut gaps = 0;

        for (chunk, offset) in stream {
            let at = start + Duration::from_millis(*offset);
            if parser.poll_idle_at(at).is_some() {
                frames += 1;
                gaps += 1;
            }
            for &b in chunk.iter() {
                if b == b'\n' || b == b'\r' {
                    terminators += 1;
                }
                if parser.feed_at(b, at).is_some() {
                    frames += 1;
                }
            }
        }
        if parser.poll_idle_at(start + Duration::from_secs(1)).is_some() {
            frames += 1;
            gaps += 1;
        }

        assert_eq!(gaps, 2);
        assert_eq!(frames, terminators + gaps);
    }
}

//! Audio rebuffering for incremental speech playback.
//!
//! Upstream speech synthesis yields byte fragments of arbitrary size.
//! Forwarding them as-is produces jittery client-side segments, so the
//! pipeline repacks them into fixed-size frames: a frame is emitted
//! exactly when the accumulator reaches the target size, and any short
//! remainder is flushed once at end-of-stream. Byte order and total byte
//! count are preserved, and memory stays bounded by one frame plus the
//! largest in-flight fragment.
//!
//! Long input text is split into sentence/phrase segments before
//! synthesis; each segment runs through a fresh [`FrameBuffer`], so the
//! accumulator resets per segment and a short final frame may occur once
//! per segment rather than once per request.

use bytes::{Bytes, BytesMut};

/// Target frame size for synthesized audio.
pub const DEFAULT_FRAME_SIZE: usize = 16 * 1024;

/// Maximum characters handed to a single synthesis call.
pub const DEFAULT_SEGMENT_CHARS: usize = 4096;

/// Fixed-size reframing accumulator for one synthesis stream.
#[derive(Debug)]
pub struct FrameBuffer {
    frame_size: usize,
    buf: BytesMut,
}

impl FrameBuffer {
    /// Create an accumulator emitting `frame_size`-byte frames.
    pub fn new(frame_size: usize) -> Self {
        Self {
            frame_size: frame_size.max(1),
            buf: BytesMut::with_capacity(frame_size),
        }
    }

    /// Absorb one upstream fragment, returning every full frame it completes.
    pub fn push(&mut self, fragment: &[u8]) -> Vec<Bytes> {
        self.buf.extend_from_slice(fragment);

        let mut frames = Vec::new();
        while self.buf.len() >= self.frame_size {
            frames.push(self.buf.split_to(self.frame_size).freeze());
        }
        frames
    }

    /// Flush the remainder as one final short frame, if any bytes are left.
    pub fn finish(mut self) -> Option<Bytes> {
        if self.buf.is_empty() {
            None
        } else {
            Some(self.buf.split().freeze())
        }
    }

    /// Bytes currently held back waiting for a full frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_SIZE)
    }
}

/// Split text into synthesis-sized segments at sentence boundaries.
///
/// Sentences are packed greedily up to `max_chars`; a single sentence
/// longer than the limit is hard-split. Whitespace-only segments are
/// dropped.
pub fn segment_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut segments = Vec::new();
    let mut current = String::new();

    for sentence in split_sentences(text) {
        if current.chars().count() + sentence.chars().count() > max_chars && !current.is_empty() {
            push_segment(&mut segments, &mut current);
        }

        if sentence.chars().count() > max_chars {
            // Oversized sentence: hard-split on the character limit.
            let chars: Vec<char> = sentence.chars().collect();
            for piece in chars.chunks(max_chars) {
                let mut piece: String = piece.iter().collect();
                push_segment(&mut segments, &mut piece);
            }
        } else {
            current.push_str(sentence);
        }
    }
    push_segment(&mut segments, &mut current);

    segments
}

/// Split on sentence terminators, keeping the terminator with its sentence.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;

    for (i, ch) in text.char_indices() {
        if matches!(ch, '.' | '!' | '?' | '\n') {
            let end = i + ch.len_utf8();
            sentences.push(&text[start..end]);
            start = end;
        }
    }
    if start < text.len() {
        sentences.push(&text[start..]);
    }
    sentences
}

fn push_segment(segments: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        segments.push(trimmed.to_string());
    }
    current.clear();
}

//! Hex frame codec
//!
//! Converts between raw payload bytes and the textual wire encoding:
//! every byte travels as two hex characters, annotations in square
//! brackets are free text for humans and protocol analyzers, and a
//! newline terminates one frame.
//!
//! The decoder is incremental and restartable. A malformed frame (odd
//! hex digit count, annotation still open at the newline, oversize
//! payload) is reported as a [`WireFrame::Malformed`] item and the
//! decoder resynchronizes at the delimiter; one bad frame never takes
//! the stream down.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::error::LinkError;

/// Frame delimiter on the wire
pub const FRAME_DELIMITER: u8 = b'\n';

/// One decoder output: a complete payload or a diagnosed bad frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    /// A fully decoded frame payload
    Complete(Vec<u8>),
    /// A frame that failed to decode; the stream has already resynced
    Malformed(String),
}

/// Incremental codec for hex-pair text frames
#[derive(Debug)]
pub struct WireCodec {
    max_frame_len: usize,
    payload: Vec<u8>,
    pending_nibble: Option<u8>,
    annotation_depth: u32,
    /// First problem seen in the current frame; sticky until the delimiter
    defect: Option<String>,
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl WireCodec {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            max_frame_len,
            payload: Vec::new(),
            pending_nibble: None,
            annotation_depth: 0,
            defect: None,
        }
    }

    fn hex_value(c: u8) -> Option<u8> {
        match c {
            b'0'..=b'9' => Some(c - b'0'),
            b'A'..=b'F' => Some(c - b'A' + 10),
            b'a'..=b'f' => Some(c - b'a' + 10),
            _ => None,
        }
    }

    fn push_hex_digit(&mut self, digit: u8) {
        match self.pending_nibble.take() {
            Some(hi) => {
                if self.payload.len() >= self.max_frame_len {
                    self.defect = Some(format!(
                        "frame exceeds {} payload bytes",
                        self.max_frame_len
                    ));
                } else {
                    self.payload.push((hi << 4) | digit);
                }
            }
            None => self.pending_nibble = Some(digit),
        }
    }

    /// Close out the current frame at a delimiter
    fn finish_frame(&mut self) -> Option<WireFrame> {
        let defect = self.defect.take();
        let dangling = self.pending_nibble.take().is_some();
        let open_annotation = self.annotation_depth > 0;
        self.annotation_depth = 0;
        let payload = std::mem::take(&mut self.payload);

        if let Some(reason) = defect {
            return Some(WireFrame::Malformed(reason));
        }
        if open_annotation {
            return Some(WireFrame::Malformed(
                "unterminated annotation at frame end".to_string(),
            ));
        }
        if dangling {
            return Some(WireFrame::Malformed(
                "odd number of hex digits in frame".to_string(),
            ));
        }
        if payload.is_empty() {
            // blank line between frames, not a frame
            return None;
        }
        trace!(bytes = payload.len(), "decoded wire frame");
        Some(WireFrame::Complete(payload))
    }

    fn accept(&mut self, byte: u8) {
        if self.defect.is_some() {
            // already doomed; just wait for the delimiter
            return;
        }
        if self.annotation_depth > 0 {
            match byte {
                b'[' => self.annotation_depth += 1,
                b']' => self.annotation_depth -= 1,
                _ => {}
            }
            return;
        }
        match byte {
            b'[' => self.annotation_depth = 1,
            b']' => {
                self.defect = Some("unmatched annotation terminator".to_string());
            }
            c => {
                if let Some(digit) = Self::hex_value(c) {
                    self.push_hex_digit(digit);
                }
                // anything else (spaces, CR, stray text) separates pairs
            }
        }
    }
}

impl Decoder for WireCodec {
    type Item = WireFrame;
    type Error = LinkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<WireFrame>, LinkError> {
        while src.has_remaining() {
            let byte = src.get_u8();
            if byte == FRAME_DELIMITER {
                if let Some(frame) = self.finish_frame() {
                    return Ok(Some(frame));
                }
                continue;
            }
            self.accept(byte);
        }
        Ok(None)
    }
}

impl Encoder<&[u8]> for WireCodec {
    type Error = LinkError;

    fn encode(&mut self, payload: &[u8], dst: &mut BytesMut) -> Result<(), LinkError> {
        const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
        dst.reserve(payload.len() * 3 + 1);
        for byte in payload {
            dst.put_u8(DIGITS[(byte >> 4) as usize]);
            dst.put_u8(DIGITS[(byte & 0x0F) as usize]);
            dst.put_u8(b' ');
        }
        dst.put_u8(FRAME_DELIMITER);
        Ok(())
    }
}

impl WireCodec {
    /// Encode a frame with a leading human-readable annotation
    pub fn encode_annotated(
        &mut self,
        payload: &[u8],
        annotation: &str,
        dst: &mut BytesMut,
    ) -> Result<(), LinkError> {
        if annotation.contains(['[', ']', '\n']) {
            return Err(LinkError::validation(
                "annotation must not contain brackets or newlines",
            ));
        }
        dst.put_u8(b'[');
        dst.put_slice(annotation.as_bytes());
        dst.put_u8(b']');
        self.encode(payload, dst)
    }
}

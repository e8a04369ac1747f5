//! # Framing Codec
//!
//! `Content-Length` framing on top of an unstructured byte stream.
//!
//! [`FrameDecoder`] is incremental: bytes are fed in whatever chunks the
//! transport produced and complete messages are pulled out one at a time.
//! A frame whose body fails to parse is consumed and reported, so one bad
//! message never wedges the stream.

use crate::error::{ProtocolError, Result};
use crate::message::ProtocolMessage;

/// Largest body accepted by the decoder.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const HEADER_END: &[u8] = b"\r\n\r\n";
const CONTENT_LENGTH: &str = "content-length";

/// Serialize `message` into one frame.
///
/// ## Errors
///
/// Fails only if the message cannot be serialized to JSON.
pub fn encode(message: &ProtocolMessage) -> Result<Vec<u8>>
{
    let body = serde_json::to_vec(message)?;
    let mut frame = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Incremental frame reassembler.
#[derive(Debug, Default)]
pub struct FrameDecoder
{
    buffer: Vec<u8>,
}

impl FrameDecoder
{
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Append raw bytes from the transport.
    pub fn feed(&mut self, bytes: &[u8])
    {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes buffered but not yet part of a returned message.
    #[must_use]
    pub fn buffered(&self) -> usize
    {
        self.buffer.len()
    }

    /// Drop everything buffered, e.g. after the peer reconnected.
    pub fn reset(&mut self)
    {
        self.buffer.clear();
    }

    /// Pull the next complete message.
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    ///
    /// ## Errors
    ///
    /// Header errors discard the malformed header block; body errors
    /// discard that frame. Decoding can continue afterwards.
    pub fn next_message(&mut self) -> Result<Option<ProtocolMessage>>
    {
        let Some(header_end) = find(&self.buffer, HEADER_END) else {
            return Ok(None);
        };
        let body_start = header_end + HEADER_END.len();

        let length = match parse_content_length(&self.buffer[..header_end]) {
            Ok(length) => length,
            Err(e) => {
                self.buffer.drain(..body_start);
                return Err(e);
            }
        };

        if self.buffer.len() < body_start + length {
            return Ok(None);
        }

        let frame: Vec<u8> = self.buffer.drain(..body_start + length).collect();
        let message = serde_json::from_slice(&frame[body_start..])?;
        Ok(Some(message))
    }
}

fn parse_content_length(header: &[u8]) -> Result<usize>
{
    let text = std::str::from_utf8(header)
        .map_err(|_| ProtocolError::InvalidHeader("header is not UTF-8".to_string()))?;

    let mut length = None;
    for line in text.split("\r\n").filter(|l| !l.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ProtocolError::InvalidHeader(line.to_string()))?;
        if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
            let parsed = value
                .trim()
                .parse::<usize>()
                .map_err(|_| ProtocolError::InvalidHeader(line.to_string()))?;
            length = Some(parsed);
        }
    }

    let length = length.ok_or(ProtocolError::MissingContentLength)?;
    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }
    Ok(length)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize>
{
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::message::Event;

    fn event(seq: i64) -> ProtocolMessage
    {
        ProtocolMessage::Event(Event {
            seq,
            event: "output".to_string(),
            body: Some(serde_json::json!({"output": "héllo\n"})),
        })
    }

    #[test]
    fn test_decode_byte_by_byte()
    {
        let frame = encode(&event(1)).unwrap();
        let mut decoder = FrameDecoder::new();
        for (i, byte) in frame.iter().enumerate() {
            decoder.feed(std::slice::from_ref(byte));
            let msg = decoder.next_message().unwrap();
            if i + 1 < frame.len() {
                assert!(msg.is_none());
            } else {
                assert_eq!(msg, Some(event(1)));
            }
        }
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decode_two_frames_in_one_chunk()
    {
        let mut bytes = encode(&event(1)).unwrap();
        bytes.extend(encode(&event(2)).unwrap());

        let mut decoder = FrameDecoder::new();
        decoder.feed(&bytes);
        assert_eq!(decoder.next_message().unwrap().map(|m| m.seq()), Some(1));
        assert_eq!(decoder.next_message().unwrap().map(|m| m.seq()), Some(2));
        assert!(decoder.next_message().unwrap().is_none());
    }

    #[test]
    fn test_content_length_counts_bytes()
    {
        let frame = encode(&event(1)).unwrap();
        let text = String::from_utf8(frame).unwrap();
        let (header, body) = text.split_once("\r\n\r\n").unwrap();
        assert_eq!(header, format!("Content-Length: {}", body.len()));
    }

    #[test]
    fn test_missing_length_is_skipped()
    {
        let mut decoder = FrameDecoder::new();
        decoder.feed(b"X-Other: 1\r\n\r\n");
        decoder.feed(&encode(&event(5)).unwrap());
        assert!(matches!(
            decoder.next_message(),
            Err(ProtocolError::MissingContentLength)
        ));
        assert_eq!(decoder.next_message().unwrap().map(|m| m.seq()), Some(5));
    }

    #[test]
    fn test_bad_body_is_consumed()
    {
        let mut decoder = FrameDecoder::new();
        decoder.feed(b"Content-Length: 3\r\n\r\n{x}");
        decoder.feed(&encode(&event(6)).unwrap());
        assert!(matches!(decoder.next_message(), Err(ProtocolError::Json(_))));
        assert_eq!(decoder.next_message().unwrap().map(|m| m.seq()), Some(6));
    }

    #[test]
    fn test_oversized_frame_rejected()
    {
        let mut decoder = FrameDecoder::new();
        decoder.feed(format!("Content-Length: {}\r\n\r\n", MAX_FRAME_SIZE + 1).as_bytes());
        assert!(matches!(
            decoder.next_message(),
            Err(ProtocolError::FrameTooLarge(_))
        ));
    }
}

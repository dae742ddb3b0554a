//! Daemon wire framing.
//!
//! ```text
//! +----------------+--------------+---------------------------+
//! | length (4)     | corr. id (2) | body (length - 6)         |
//! | u32 LE, total  | u16 LE       | request or reply payload  |
//! +----------------+--------------+---------------------------+
//! ```
//!
//! The length field counts the whole frame, header included.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

pub const HEADER_SIZE: usize = 6;

/// Upper bound on a single frame (16 MB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

pub type CorrelationId = u16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub correlation_id: CorrelationId,
    pub body: Bytes,
}

impl Frame {
    pub fn new(correlation_id: CorrelationId, body: impl Into<Bytes>) -> Self {
        Self {
            correlation_id,
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let length = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if length < HEADER_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame length {} is shorter than the header", length),
            ));
        }
        if length > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame length {} exceeds maximum {}", length, self.max_frame_size),
            ));
        }

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        src.advance(4);
        let correlation_id = src.get_u16_le();
        let body = src.split_to(length - HEADER_SIZE).freeze();

        Ok(Some(Frame { correlation_id, body }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), io::Error> {
        let length = HEADER_SIZE + frame.body.len();
        if length > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame length {} exceeds maximum {}", length, self.max_frame_size),
            ));
        }

        dst.reserve(length);
        dst.put_u32_le(length as u32);
        dst.put_u16_le(frame.correlation_id);
        dst.extend_from_slice(&frame.body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_little_endian_total_length() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(Frame::new(0x0102, &b"abc"[..]), &mut buf).unwrap();

        assert_eq!(&buf[..], &[9, 0, 0, 0, 0x02, 0x01, b'a', b'b', b'c']);
    }

    #[test]
    fn decode_waits_for_full_frame() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&[9u8, 0, 0, 0, 7][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&[0, b'x', b'y']);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&[b'z', 10, 0]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.correlation_id, 7);
        assert_eq!(&frame.body[..], b"xyz");
        // Trailing bytes of the next frame stay buffered
        assert_eq!(&buf[..], &[10, 0]);
    }

    #[test]
    fn empty_body_is_a_valid_reply() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&[6u8, 0, 0, 0, 3, 0][..]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.correlation_id, 3);
        assert!(frame.body.is_empty());
    }

    #[test]
    fn undersized_length_is_rejected() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&[5u8, 0, 0, 0, 0, 0][..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn oversized_length_is_rejected() {
        let mut codec = FrameCodec::with_max_size(64);
        let mut buf = BytesMut::from(&[65u8, 0, 0, 0, 0, 0][..]);
        assert!(codec.decode(&mut buf).is_err());
    }
}

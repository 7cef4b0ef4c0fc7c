//! Length-prefixed framing for opaque byte-stream channels.
//!
//! WebSocket transports carry one encoded [`Frame`] per binary message and
//! need no extra framing. Channels provided by a custom transport are raw
//! byte streams, so frames there are wrapped as:
//!
//! ```text
//! [4 byte magic "WEFT"] [4 byte big-endian length] [bincode frame body]
//! ```

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use weft_core::serialization;

use crate::config::{FRAME_MAGIC, MAX_FRAME_SIZE};
use crate::error::P2pError;
use crate::protocol::Frame;

const HEADER_LEN: usize = 8;

/// Codec turning a raw byte stream into a stream of [`Frame`]s.
#[derive(Debug, Default)]
pub struct FrameCodec;

impl FrameCodec {
    /// Create a new codec.
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = P2pError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, P2pError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&src[..4]);
        if magic != FRAME_MAGIC {
            return Err(P2pError::InvalidMagic { actual: magic });
        }

        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&src[4..8]);
        let body_len = u32::from_be_bytes(len_bytes) as usize;
        if body_len > MAX_FRAME_SIZE {
            return Err(P2pError::FrameTooLarge {
                size: body_len,
                max: MAX_FRAME_SIZE,
            });
        }

        if src.len() < HEADER_LEN + body_len {
            src.reserve(HEADER_LEN + body_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let body = src.split_to(body_len);
        let frame = serialization::deserialize(&body)?;
        Ok(Some(frame))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = P2pError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), P2pError> {
        let body = serialization::serialize(&frame)?;
        if body.len() > MAX_FRAME_SIZE {
            return Err(P2pError::FrameTooLarge {
                size: body.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        dst.reserve(HEADER_LEN + body.len());
        dst.put_slice(&FRAME_MAGIC);
        dst.put_u32(body.len() as u32);
        dst.put_slice(&body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::NodeId;

    fn id(fill: u8) -> NodeId {
        NodeId::from_bytes(&[fill; 20]).unwrap()
    }

    fn sample() -> Frame {
        Frame::Data {
            src: id(1),
            dst: id(2),
            payload: b"payload".to_vec(),
            ttl: 16,
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(sample(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, sample());
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_frame_waits_for_more() {
        let mut codec = FrameCodec::new();
        let mut full = BytesMut::new();
        codec.encode(sample(), &mut full).unwrap();

        let mut partial = BytesMut::from(&full[..full.len() - 3]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full[full.len() - 3..]);
        assert_eq!(codec.decode(&mut partial).unwrap().unwrap(), sample());
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&b"NOPE\x00\x00\x00\x01x"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(P2pError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn oversized_length_is_rejected() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        buf.put_slice(&FRAME_MAGIC);
        buf.put_u32((MAX_FRAME_SIZE + 1) as u32);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(P2pError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn two_frames_back_to_back() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(sample(), &mut buf).unwrap();
        let second = Frame::Directory { entries: vec![] };
        codec.encode(second.clone(), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), sample());
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), second);
        assert!(buf.is_empty());
    }

    #[test]
    fn garbage_body_is_a_serialization_error() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        buf.put_slice(&FRAME_MAGIC);
        buf.put_u32(3);
        buf.put_slice(&[0xff, 0xfe, 0xfd]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(P2pError::Serialization(_))
        ));
    }
}

//! Stream framing for publish messages.
//!
//! A TCP stream carries a sequence of publishes, each framed as:
//! ```text
//! channel_len:  u16  (big-endian)
//! channel:      [u8] (UTF-8)
//! payload_len:  u32  (big-endian)
//! payload:      [u8]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::TransportError;

/// Default ceiling on a single payload.
pub const MAX_MESSAGE_SIZE: usize = 128 * 1024;

/// One message on a named channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub channel: String,
    pub payload: Bytes,
}

/// `tokio_util` codec for [`Publish`] frames.
#[derive(Debug, Clone, Copy)]
pub struct PublishCodec {
    max_payload: usize,
}

impl PublishCodec {
    pub fn new(max_payload: usize) -> Self {
        Self { max_payload }
    }
}

impl Default for PublishCodec {
    fn default() -> Self {
        Self::new(MAX_MESSAGE_SIZE)
    }
}

impl Decoder for PublishCodec {
    type Item = Publish;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 2 {
            return Ok(None);
        }
        let channel_len = u16::from_be_bytes([src[0], src[1]]) as usize;
        let len_at = 2 + channel_len;
        if src.len() < len_at + 4 {
            return Ok(None);
        }
        let payload_len =
            u32::from_be_bytes([src[len_at], src[len_at + 1], src[len_at + 2], src[len_at + 3]])
                as usize;
        if payload_len > self.max_payload {
            return Err(TransportError::MessageTooLarge {
                size: payload_len,
                max: self.max_payload,
            });
        }

        let frame_len = len_at + 4 + payload_len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(2);
        let channel = src.split_to(channel_len);
        let channel = String::from_utf8(channel.to_vec()).map_err(|e| {
            TransportError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        src.advance(4);
        let payload = src.split_to(payload_len).freeze();

        Ok(Some(Publish { channel, payload }))
    }
}

impl Encoder<Publish> for PublishCodec {
    type Error = TransportError;

    fn encode(&mut self, item: Publish, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.payload.len() > self.max_payload {
            return Err(TransportError::MessageTooLarge {
                size: item.payload.len(),
                max: self.max_payload,
            });
        }
        let channel = item.channel.as_bytes();
        if channel.len() > u16::MAX as usize {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "channel name too long",
            )));
        }

        dst.reserve(2 + channel.len() + 4 + item.payload.len());
        dst.put_u16(channel.len() as u16);
        dst.put_slice(channel);
        dst.put_u32(item.payload.len() as u32);
        dst.put_slice(&item.payload);
        Ok(())
    }
}

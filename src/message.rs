//! Messages as they appear inside fetch payloads and produce requests.
//!
//! Each message is `length(4) | magic(1) | [attributes(1)] | crc32(4) | payload`
//! where the attributes byte is only present for magic 1. The low two bits of
//! the attributes carry the compression codec. A gzip message wraps a whole
//! compressed message set as its payload.

use std::io::{Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::warn;

use crate::{KafkaError, Result};

pub const MAGIC_V0: u8 = 0;
pub const MAGIC_V1: u8 = 1;
const COMPRESSION_MASK: u8 = 0x03;

pub const NO_COMPRESSION: u8 = 0;
pub const GZIP_COMPRESSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub magic: u8,
    pub attributes: u8,
    pub checksum: u32,
    pub payload: Bytes,
}

impl Message {
    /// A new uncompressed message with its checksum filled in.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        Self {
            magic: MAGIC_V1,
            attributes: 0,
            checksum: crc32fast::hash(&payload),
            payload,
        }
    }

    /// A gzip message whose payload is `messages` encoded as one set.
    pub fn gzip(messages: &[Message]) -> Result<Self> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&MessageSet::encode(messages))
            .map_err(|e| KafkaError::InvalidMessage(format!("gzip compression failed: {e}")))?;
        let compressed = encoder
            .finish()
            .map_err(|e| KafkaError::InvalidMessage(format!("gzip compression failed: {e}")))?;

        let mut message = Message::new(compressed);
        message.attributes = GZIP_COMPRESSION;
        Ok(message)
    }

    pub fn compression(&self) -> u8 {
        self.attributes & COMPRESSION_MASK
    }

    pub fn is_valid(&self) -> bool {
        crc32fast::hash(&self.payload) == self.checksum
    }

    fn header_len(&self) -> usize {
        if self.magic == MAGIC_V1 {
            1 + 1 + 4
        } else {
            1 + 4
        }
    }

    /// Appends this message, length prefix included, to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32((self.header_len() + self.payload.len()) as u32);
        buf.put_u8(self.magic);
        if self.magic == MAGIC_V1 {
            buf.put_u8(self.attributes);
        }
        buf.put_u32(self.checksum);
        buf.put_slice(&self.payload);
    }

    fn decode(mut body: Bytes) -> Result<Self> {
        if !body.has_remaining() {
            return Err(KafkaError::InvalidMessage("empty message".to_string()));
        }
        let magic = body.get_u8();
        let attributes = match magic {
            MAGIC_V0 => 0,
            MAGIC_V1 if body.has_remaining() => body.get_u8(),
            MAGIC_V1 => {
                return Err(KafkaError::InvalidMessage(
                    "message ends before its attributes".to_string(),
                ))
            }
            other => {
                return Err(KafkaError::InvalidMessage(format!(
                    "unsupported magic byte {other}"
                )))
            }
        };
        if body.remaining() < 4 {
            return Err(KafkaError::InvalidMessage(
                "message ends before its checksum".to_string(),
            ));
        }
        let checksum = body.get_u32();
        Ok(Message {
            magic,
            attributes,
            checksum,
            payload: body,
        })
    }
}

fn gunzip(data: &[u8]) -> Result<Bytes> {
    let mut decoder = GzDecoder::new(data);
    let mut output = Vec::new();
    decoder
        .read_to_end(&mut output)
        .map_err(|e| KafkaError::InvalidMessage(format!("gzip decompression failed: {e}")))?;
    Ok(Bytes::from(output))
}

/// The complete messages found in one fetch payload, with compressed
/// wrappers already expanded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageSet {
    pub messages: Vec<Message>,
    /// Bytes taken up by the complete messages as they sit on the wire, so a
    /// compressed wrapper counts its own length and not the expanded one. A
    /// truncated trailing message is not counted, so the next fetch starts at
    /// its beginning.
    pub size: usize,
}

impl MessageSet {
    pub fn parse(data: Bytes) -> Result<Self> {
        let mut rest = data;
        let mut set = MessageSet::default();
        while rest.remaining() >= 4 {
            let len = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
            if rest.remaining() < 4 + len {
                break;
            }
            rest.advance(4);
            let message = Message::decode(rest.split_to(len))?;
            if !message.is_valid() {
                warn!(
                    "Message checksum mismatch: expected {}, got {}",
                    message.checksum,
                    crc32fast::hash(&message.payload)
                );
            }
            match message.compression() {
                NO_COMPRESSION => set.messages.push(message),
                GZIP_COMPRESSION => {
                    let inner = MessageSet::parse(gunzip(&message.payload)?)?;
                    set.messages.extend(inner.messages);
                }
                other => return Err(KafkaError::UnsupportedCompression(other)),
            }
            set.size += 4 + len;
        }
        Ok(set)
    }

    pub fn encode(messages: &[Message]) -> Bytes {
        let mut buf = BytesMut::new();
        for message in messages {
            message.encode(&mut buf);
        }
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse_two_messages() {
        let data = MessageSet::encode(&[Message::new("hello"), Message::new("world")]);
        let set = MessageSet::parse(data.clone()).unwrap();
        assert_eq!(set.size, data.len());
        let payloads: Vec<_> = set.messages.iter().map(|m| m.payload.clone()).collect();
        assert_eq!(payloads, vec![Bytes::from("hello"), Bytes::from("world")]);
        assert!(set.messages.iter().all(Message::is_valid));
    }

    #[test]
    fn test_empty_payload_is_empty_set() {
        let set = MessageSet::parse(Bytes::new()).unwrap();
        assert!(set.messages.is_empty());
        assert_eq!(set.size, 0);
    }

    #[test]
    fn test_truncated_tail_is_not_counted() {
        let whole = MessageSet::encode(&[Message::new("first")]);
        let mut data = BytesMut::from(&whole[..]);
        data.extend_from_slice(&MessageSet::encode(&[Message::new("second")])[..7]);

        let set = MessageSet::parse(data.freeze()).unwrap();
        assert_eq!(set.messages.len(), 1);
        assert_eq!(set.size, whole.len());
    }

    #[test]
    fn test_magic_zero_has_no_attributes() {
        let mut buf = BytesMut::new();
        buf.put_u32(1 + 4 + 2);
        buf.put_u8(MAGIC_V0);
        buf.put_u32(crc32fast::hash(b"ok"));
        buf.put_slice(b"ok");

        let set = MessageSet::parse(buf.freeze()).unwrap();
        assert_eq!(set.messages[0].payload, Bytes::from("ok"));
        assert_eq!(set.messages[0].attributes, 0);
    }

    #[test]
    fn test_bad_checksum_is_still_delivered() {
        let mut message = Message::new("payload");
        message.checksum ^= 1;
        let set = MessageSet::parse(MessageSet::encode(&[message])).unwrap();
        assert_eq!(set.messages.len(), 1);
        assert!(!set.messages[0].is_valid());
    }

    #[test]
    fn test_gzip_wrapper_is_expanded() {
        let inner = vec![Message::new("one"), Message::new("two")];
        let wrapper = Message::gzip(&inner).unwrap();
        assert_eq!(wrapper.compression(), GZIP_COMPRESSION);
        assert!(wrapper.is_valid());

        let mut data = BytesMut::from(&MessageSet::encode(&[wrapper])[..]);
        let wrapper_len = data.len();
        data.extend_from_slice(&MessageSet::encode(&[Message::new("three")]));

        let set = MessageSet::parse(data.clone().freeze()).unwrap();
        let payloads: Vec<_> = set.messages.iter().map(|m| m.payload.clone()).collect();
        assert_eq!(
            payloads,
            vec![Bytes::from("one"), Bytes::from("two"), Bytes::from("three")]
        );
        assert!(set.size > wrapper_len);
        assert_eq!(set.size, data.len());
    }

    #[test]
    fn test_nested_gzip_wrappers() {
        let inner = Message::gzip(&[Message::new("deep")]).unwrap();
        let outer = Message::gzip(&[inner]).unwrap();
        let data = MessageSet::encode(&[outer]);

        let set = MessageSet::parse(data.clone()).unwrap();
        assert_eq!(set.messages, vec![Message::new("deep")]);
        assert_eq!(set.size, data.len());
    }

    #[test]
    fn test_corrupt_gzip_payload_is_invalid() {
        let mut message = Message::new("not gzip at all");
        message.attributes = GZIP_COMPRESSION;
        assert_matches!(
            MessageSet::parse(MessageSet::encode(&[message])),
            Err(KafkaError::InvalidMessage(_))
        );
    }

    #[test]
    fn test_unknown_codec_is_rejected() {
        let mut message = Message::new("snappy");
        message.attributes = 2;
        assert_matches!(
            MessageSet::parse(MessageSet::encode(&[message])),
            Err(KafkaError::UnsupportedCompression(2))
        );
    }
}

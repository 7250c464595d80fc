//! Binary framing shared by every request/response pair.
//!
//! All integers are big-endian. A request on the wire is
//! `size(4) | opcode(2) | topic_len(2) | topic | partition(4) | offset(8) | bound(4)`
//! and a response is `size(4) | error_code(2) | payload`. The functions here
//! never touch a socket: the size prefix is produced separately so callers can
//! write it and the payload as two distinct transport writes.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error_codes::ErrorCode;
use crate::{KafkaError, Result};

/// Offset sentinel asking the broker for the newest offset.
pub const LATEST_OFFSET: i64 = -1;
/// Number of offsets requested when resolving the start position.
pub const MAX_OFFSETS: u32 = 1;

/// Bytes of a fetch/offsets request that do not depend on the topic name.
const FIXED_REQUEST_LEN: usize = 2 + 2 + 4 + 8 + 4;
pub const SIZE_PREFIX_LEN: usize = 4;
const ERROR_CODE_LEN: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum RequestType {
    Produce = 0,
    Fetch = 1,
    Offsets = 4,
}

impl RequestType {
    pub fn opcode(self) -> u16 {
        self as u16
    }
}

/// A fetch or offsets request. `bound` is the max bytes to fetch for
/// `Fetch` and the max number of offsets to return for `Offsets`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub request_type: RequestType,
    pub topic: String,
    pub partition: u32,
    pub offset: i64,
    pub bound: u32,
}

impl Request {
    pub fn fetch(topic: &str, partition: u32, offset: i64, max_size: u32) -> Self {
        Self {
            request_type: RequestType::Fetch,
            topic: topic.to_string(),
            partition,
            offset,
            bound: max_size,
        }
    }

    pub fn offsets(topic: &str, partition: u32, time: i64, max_offsets: u32) -> Self {
        Self {
            request_type: RequestType::Offsets,
            topic: topic.to_string(),
            partition,
            offset: time,
            bound: max_offsets,
        }
    }

    /// The largest response body (error code plus payload) a well-behaved
    /// broker can send back for this request.
    pub fn max_response_size(&self) -> usize {
        let payload = match self.request_type {
            RequestType::Fetch => self.bound as usize,
            RequestType::Offsets => 4 + 8 * self.bound as usize,
            RequestType::Produce => 0,
        };
        ERROR_CODE_LEN + payload
    }

    pub fn encode(&self) -> Result<Bytes> {
        encode_request(
            self.request_type,
            &self.topic,
            self.partition,
            self.offset,
            self.bound,
        )
    }
}

fn topic_len(topic: &str) -> Result<u16> {
    u16::try_from(topic.len()).map_err(|_| {
        KafkaError::ConfigError(format!("Topic name is {} bytes, too long", topic.len()))
    })
}

/// Encodes a request body, without its size prefix.
pub fn encode_request(
    request_type: RequestType,
    topic: &str,
    partition: u32,
    offset: i64,
    bound: u32,
) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(FIXED_REQUEST_LEN + topic.len());
    buf.put_u16(request_type.opcode());
    buf.put_u16(topic_len(topic)?);
    buf.put_slice(topic.as_bytes());
    buf.put_u32(partition);
    buf.put_i64(offset);
    buf.put_u32(bound);
    Ok(buf.freeze())
}

/// Length of an encoded fetch/offsets request for `topic`.
pub fn request_size(topic: &str) -> u32 {
    (FIXED_REQUEST_LEN + topic.len()) as u32
}

/// The 4-byte size prefix that precedes a payload of `len` bytes.
pub fn encode_size(len: usize) -> Result<[u8; SIZE_PREFIX_LEN]> {
    let len = u32::try_from(len)
        .map_err(|_| KafkaError::ConfigError(format!("Frame of {len} bytes is too large")))?;
    Ok(len.to_be_bytes())
}

pub fn decode_size(prefix: &[u8]) -> Result<u32> {
    let bytes: [u8; SIZE_PREFIX_LEN] = prefix.try_into().map_err(|_| {
        KafkaError::InvalidResponse(format!("size prefix of {} bytes", prefix.len()))
    })?;
    Ok(u32::from_be_bytes(bytes))
}

/// Encodes a produce request body: `opcode | topic_len | topic | partition |
/// set_len(4) | message_set`.
pub fn encode_produce_request(topic: &str, partition: u32, message_set: &[u8]) -> Result<Bytes> {
    let set_len = u32::try_from(message_set.len()).map_err(|_| {
        KafkaError::ConfigError(format!("Message set of {} bytes is too large", message_set.len()))
    })?;
    let mut buf = BytesMut::with_capacity(2 + 2 + topic.len() + 4 + 4 + message_set.len());
    buf.put_u16(RequestType::Produce.opcode());
    buf.put_u16(topic_len(topic)?);
    buf.put_slice(topic.as_bytes());
    buf.put_u32(partition);
    buf.put_u32(set_len);
    buf.put_slice(message_set);
    Ok(buf.freeze())
}

/// A decoded response frame, error code not yet checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub error_code: u16,
    pub payload: Bytes,
}

impl Response {
    /// Returns the payload, or the catalog's error for a non-zero code.
    pub fn into_payload(self) -> Result<Bytes> {
        ErrorCode::check(self.error_code)?;
        Ok(self.payload)
    }
}

/// Splits a response body (the bytes after the size prefix) into its error
/// code and payload.
pub fn decode_response(mut frame: Bytes) -> Result<Response> {
    if frame.len() < ERROR_CODE_LEN {
        return Err(KafkaError::InvalidResponse(format!(
            "response of {} bytes has no error code",
            frame.len()
        )));
    }
    let error_code = frame.get_u16();
    Ok(Response {
        error_code,
        payload: frame,
    })
}

/// Decodes an offsets payload: `count(4) | count x offset(8)`.
pub fn decode_offsets(mut payload: Bytes) -> Result<Vec<i64>> {
    if payload.remaining() < 4 {
        return Err(KafkaError::InvalidResponse(
            "offsets response is missing its count".to_string(),
        ));
    }
    let count = payload.get_u32() as usize;
    if payload.remaining() < count.saturating_mul(8) {
        return Err(KafkaError::InvalidResponse(format!(
            "offsets response announces {count} offsets but carries {} bytes",
            payload.remaining()
        )));
    }
    Ok((0..count).map(|_| payload.get_i64()).collect())
}

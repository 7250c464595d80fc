//! Broker error codes carried in the first two bytes of every response.

use crate::{KafkaError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NoError,
    OffsetOutOfRange,
    InvalidMessage,
    WrongPartition,
    InvalidFetchSize,
    /// Anything the catalog does not know, including the broker's `-1`.
    Unknown,
}

impl ErrorCode {
    pub fn from_code(code: u16) -> Self {
        match code {
            0 => ErrorCode::NoError,
            1 => ErrorCode::OffsetOutOfRange,
            2 => ErrorCode::InvalidMessage,
            3 => ErrorCode::WrongPartition,
            4 => ErrorCode::InvalidFetchSize,
            _ => ErrorCode::Unknown,
        }
    }

    /// Turns a non-zero code into a `ProtocolError`.
    pub fn check(code: u16) -> Result<()> {
        match Self::from_code(code) {
            ErrorCode::NoError => Ok(()),
            kind => Err(KafkaError::ProtocolError { code, kind }),
        }
    }
}

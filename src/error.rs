use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::error_codes::ErrorCode;

#[derive(Error, Debug)]
pub enum KafkaError {
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Connection to {host} refused: timed out after {timeout:?}")]
    ConnectTimeout { host: String, timeout: Duration },

    #[error("Connection to {host} refused: {source}")]
    ConnectRefused {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot read: {0}")]
    TransportReadFailure(#[source] io::Error),

    #[error("cannot write: {0}")]
    TransportWriteFailure(#[source] io::Error),

    #[error("Broker error: code={code}, kind={kind:?}")]
    ProtocolError { code: u16, kind: ErrorCode },

    /// Rotation hit a host still cooling down, or the rotation bound, without
    /// a successful connection. `source` is the last connect failure seen.
    #[error("All hosts exhausted after {attempts} connection attempts: {source}")]
    AllHostsExhausted {
        attempts: usize,
        #[source]
        source: Box<KafkaError>,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Unsupported compression codec {0}")]
    UnsupportedCompression(u8),
}

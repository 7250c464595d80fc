//! Reads and writes on a [`Connection`]'s socket.
//!
//! Any failure that escapes these functions has already torn the socket down,
//! so the connection never keeps a socket known to be bad.

use std::io;

use bytes::Bytes;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::connection::{Connection, Connector};
use crate::{KafkaError, Result};

/// Conditions where waiting for writability and trying again may help.
fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Conditions that mean the connection itself is gone.
fn is_fatal(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::TimedOut
    )
}

impl<C: Connector> Connection<C> {
    /// Reads exactly `len` bytes. There is no retry: on any error the socket
    /// is dropped and no partial data is returned.
    pub async fn read(&mut self, len: usize) -> Result<Bytes> {
        if self.socket.is_none() {
            self.reconnect().await?;
        }
        let wait = self.timeout;
        let outcome = match self.socket.as_mut() {
            Some(socket) => {
                let mut buf = vec![0u8; len];
                let read = timeout(wait, socket.read_exact(&mut buf)).await;
                match read {
                    Ok(Ok(())) => Ok(buf),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("no data within {wait:?}"),
                    )),
                }
            }
            None => Err(io::ErrorKind::NotConnected.into()),
        };

        match outcome {
            Ok(buf) => Ok(Bytes::from(buf)),
            Err(e) => {
                self.disconnect().await;
                Err(KafkaError::TransportReadFailure(e))
            }
        }
    }

    /// Writes all of `data`, returning the number of bytes the socket took.
    ///
    /// A would-block waits for writability and tries again; a broken
    /// connection reconnects and resends `data` from its first byte. Both
    /// draw on the same budget of `retries` extra attempts. A socket that
    /// accepts zero bytes ends the write early and the short count is
    /// returned.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        if self.socket.is_none() {
            self.reconnect().await?;
        }
        match self.write_with_retry(data).await {
            Ok(sent) => Ok(sent),
            Err(err) => {
                error!("Write of {} bytes failed: {}", data.len(), err);
                self.disconnect().await;
                Err(err)
            }
        }
    }

    async fn write_with_retry(&mut self, data: &[u8]) -> Result<usize> {
        let wait = self.timeout;
        let mut retries_left = self.retries;
        let mut total_sent = 0;

        while total_sent < data.len() {
            let Some(socket) = self.socket.as_mut() else {
                return Err(KafkaError::TransportWriteFailure(
                    io::ErrorKind::NotConnected.into(),
                ));
            };
            match socket.try_write(&data[total_sent..]) {
                Ok(0) => {
                    warn!(
                        "Socket accepted no bytes, {} of {} sent",
                        total_sent,
                        data.len()
                    );
                    break;
                }
                Ok(n) => total_sent += n,
                Err(e) if is_transient(&e) => {
                    if retries_left == 0 {
                        return Err(KafkaError::TransportWriteFailure(e));
                    }
                    retries_left -= 1;
                    match timeout(wait, socket.writable()).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => return Err(KafkaError::TransportWriteFailure(e)),
                        Err(_) => debug!("Socket not writable within {:?}, retrying", wait),
                    }
                }
                Err(e) if is_fatal(&e) => {
                    if retries_left == 0 {
                        return Err(KafkaError::TransportWriteFailure(e));
                    }
                    retries_left -= 1;
                    warn!(
                        "Connection lost after {} of {} bytes ({}), resending from the start",
                        total_sent,
                        data.len(),
                        e
                    );
                    self.reconnect().await?;
                    total_sent = 0;
                }
                Err(e) => return Err(KafkaError::TransportWriteFailure(e)),
            }
        }
        Ok(total_sent)
    }
}

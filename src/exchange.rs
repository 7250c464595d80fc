//! Request/response round trips shared by the producer and the consumer.

use bytes::Bytes;
use tracing::{debug, warn};

use crate::codec::{
    decode_response, decode_size, encode_size, request_size, Request, Response, SIZE_PREFIX_LEN,
};
use crate::connection::{Connection, Connector};
use crate::{KafkaError, Result};

impl<C: Connector> Connection<C> {
    /// Sends `payload` as one frame. The size prefix and the payload are two
    /// separate writes.
    pub async fn send_frame(&mut self, payload: &[u8]) -> Result<()> {
        let size = encode_size(payload.len())?;
        let sent = self.write(&size).await?;
        if sent < size.len() {
            warn!(
                "Size prefix cut short ({} of {} bytes), frame will be malformed",
                sent,
                size.len()
            );
        }
        let sent = self.write(payload).await?;
        if sent < payload.len() {
            warn!("Frame payload cut short ({} of {} bytes)", sent, payload.len());
        }
        Ok(())
    }

    pub async fn send_request(&mut self, request: &Request) -> Result<()> {
        debug!(
            "Sending {:?} request for {}-{} at {} (bound {}, {} bytes)",
            request.request_type,
            request.topic,
            request.partition,
            request.offset,
            request.bound,
            request_size(&request.topic)
        );
        self.send_frame(&request.encode()?).await
    }

    /// Reads one length-prefixed response frame whose body may be at most
    /// `max_len` bytes. A larger size prefix means the stream is out of sync,
    /// so the socket is dropped before anything is allocated for the body.
    pub async fn read_response(&mut self, max_len: usize) -> Result<Response> {
        let prefix = self.read(SIZE_PREFIX_LEN).await?;
        let len = decode_size(&prefix)? as usize;
        if len > max_len {
            self.disconnect().await;
            return Err(KafkaError::InvalidResponse(format!(
                "response announces {len} bytes, at most {max_len} expected"
            )));
        }
        let body = self.read(len).await?;
        let response = decode_response(body)?;
        debug!(
            "Received response: error_code={}, {} payload bytes",
            response.error_code,
            response.payload.len()
        );
        Ok(response)
    }

    /// Sends `request` and returns the payload of its response, failing on a
    /// non-zero error code.
    pub async fn round_trip(&mut self, request: &Request) -> Result<Bytes> {
        self.send_request(request).await?;
        self.read_response(request.max_response_size())
            .await?
            .into_payload()
    }
}

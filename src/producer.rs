use bytes::Bytes;
use tracing::debug;

use crate::codec::encode_produce_request;
use crate::config::ProducerConfig;
use crate::connection::{Connection, Connector, TcpConnector};
use crate::message::{Message, MessageSet};
use crate::Result;

/// Sends messages to a single topic partition.
///
/// Produce requests get no response from the broker, so a successful send
/// only means every byte reached the socket.
pub struct KafkaProducer<C = TcpConnector> {
    connection: Connection<C>,
    topic: String,
    partition: u32,
}

impl KafkaProducer<TcpConnector> {
    /// Create a new KafkaProducer connected to one of the configured hosts.
    pub async fn new(config: ProducerConfig) -> Result<Self> {
        Self::with_connector(config, TcpConnector).await
    }
}

impl<C: Connector> KafkaProducer<C> {
    pub async fn with_connector(config: ProducerConfig, connector: C) -> Result<Self> {
        let connection = Connection::connect_with(&config.client, connector).await?;
        Ok(Self {
            connection,
            topic: config.topic,
            partition: config.partition,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> u32 {
        self.partition
    }

    /// Send `messages` as one message set.
    pub async fn send(&mut self, messages: &[Message]) -> Result<()> {
        let message_set = MessageSet::encode(messages);
        let request = encode_produce_request(&self.topic, self.partition, &message_set)?;
        debug!(
            "Producing {} messages ({} bytes) to {}-{}",
            messages.len(),
            message_set.len(),
            self.topic,
            self.partition
        );
        self.connection.send_frame(&request).await
    }

    /// Send a single message.
    pub async fn send_message(&mut self, payload: impl Into<Bytes>) -> Result<()> {
        self.send(&[Message::new(payload)]).await
    }

    pub async fn close(&mut self) {
        self.connection.disconnect().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedConnector, ScriptedSocket, WriteStep};
    use bytes::Buf;
    use std::io;

    #[tokio::test]
    async fn test_send_message_writes_produce_frame() {
        let socket = ScriptedSocket::default();
        let log = socket.log();
        let config = ProducerConfig::new("localhost:9092", "test-topic").with_partition(2);
        let mut producer =
            KafkaProducer::with_connector(config, ScriptedConnector::with_sockets([socket]))
                .await
                .unwrap();

        producer.send_message("Hello Kafka!").await.unwrap();

        let mut written = Bytes::from(log.written());
        let size = written.get_u32() as usize;
        assert_eq!(size, written.remaining());
        assert_eq!(written.get_u16(), 0);
        assert_eq!(written.get_u16(), 10);
        assert_eq!(&written.split_to(10)[..], b"test-topic");
        assert_eq!(written.get_u32(), 2);
        let set_len = written.get_u32() as usize;
        assert_eq!(set_len, written.remaining());

        let set = MessageSet::parse(written).unwrap();
        assert_eq!(set.messages, vec![Message::new("Hello Kafka!")]);
    }

    #[tokio::test]
    async fn test_send_survives_broken_pipe() {
        let first = ScriptedSocket::with_steps([WriteStep::Fail(io::ErrorKind::BrokenPipe)]);
        let second = ScriptedSocket::default();
        let second_log = second.log();
        let config = ProducerConfig::new("localhost:9092", "t");
        let mut producer =
            KafkaProducer::with_connector(config, ScriptedConnector::with_sockets([first, second]))
                .await
                .unwrap();

        producer
            .send(&[Message::new("one"), Message::new("two")])
            .await
            .unwrap();

        let expected = encode_produce_request(
            "t",
            0,
            &MessageSet::encode(&[Message::new("one"), Message::new("two")]),
        )
        .unwrap();
        let written = second_log.written();
        assert_eq!(&written[4..], expected.as_ref());
    }
}

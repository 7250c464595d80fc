use std::ops::ControlFlow;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::codec::{decode_offsets, Request, LATEST_OFFSET, MAX_OFFSETS};
use crate::config::ConsumerConfig;
use crate::connection::{Connection, Connector, TcpConnector};
use crate::message::{Message, MessageSet};
use crate::{KafkaError, Result};

/// Reads one topic partition, tracking its own offset.
///
/// When no starting offset is configured, the latest offset is asked for
/// once, right before the first fetch. After every fetch the offset moves
/// forward by the bytes of the messages received, so the next fetch resumes
/// where the previous one stopped.
///
/// # Examples
///
/// ```no_run
/// use std::ops::ControlFlow;
/// use tiny_kafka7::{ConsumerConfig, KafkaConsumer};
///
/// # async fn run() -> tiny_kafka7::Result<()> {
/// let config = ConsumerConfig::new("localhost:9092", "my_topic");
/// let mut consumer = KafkaConsumer::new(config).await?;
/// let (_stop, shutdown) = tokio::sync::watch::channel(false);
/// consumer
///     .run_loop(
///         |msg| {
///             println!("Received: {:?}", msg.payload);
///             ControlFlow::Continue(())
///         },
///         shutdown,
///     )
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct KafkaConsumer<C = TcpConnector> {
    connection: Connection<C>,
    topic: String,
    partition: u32,
    offset: Option<i64>,
    max_size: u32,
    poll_interval: Duration,
}

impl KafkaConsumer<TcpConnector> {
    /// Connects to one of the configured hosts.
    pub async fn new(config: ConsumerConfig) -> Result<Self> {
        Self::with_connector(config, TcpConnector).await
    }
}

impl<C: Connector> KafkaConsumer<C> {
    pub async fn with_connector(config: ConsumerConfig, connector: C) -> Result<Self> {
        let connection = Connection::connect_with(&config.client, connector).await?;
        Ok(Self::from_connection(config, connection))
    }

    pub fn from_connection(config: ConsumerConfig, connection: Connection<C>) -> Self {
        Self {
            connection,
            poll_interval: config.poll_interval(),
            topic: config.topic,
            partition: config.partition,
            offset: config.offset,
            max_size: config.max_size,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> u32 {
        self.partition
    }

    /// The offset the next fetch starts at, once known.
    pub fn offset(&self) -> Option<i64> {
        self.offset
    }

    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Asks the broker for the newest offset of the partition.
    ///
    /// Only the first offset of the response is used.
    pub async fn fetch_latest_offset(&mut self) -> Result<i64> {
        let request = Request::offsets(&self.topic, self.partition, LATEST_OFFSET, MAX_OFFSETS);
        let payload = self.connection.round_trip(&request).await?;
        let offsets = decode_offsets(payload)?;
        offsets.first().copied().ok_or_else(|| {
            KafkaError::InvalidResponse(format!(
                "no offsets returned for {}-{}",
                self.topic, self.partition
            ))
        })
    }

    /// Fetches the next batch of messages. An empty payload yields no
    /// messages and leaves the offset where it was.
    pub async fn consume(&mut self) -> Result<Vec<Message>> {
        let offset = match self.offset {
            Some(offset) => offset,
            None => {
                let offset = self.fetch_latest_offset().await?;
                info!(
                    "Starting {}-{} at latest offset {}",
                    self.topic, self.partition, offset
                );
                self.offset = Some(offset);
                offset
            }
        };

        let request = Request::fetch(&self.topic, self.partition, offset, self.max_size);
        let payload = self.connection.round_trip(&request).await?;
        let set = MessageSet::parse(payload)?;
        self.offset = Some(offset + set.size as i64);
        debug!(
            "Fetched {} messages ({} bytes) from {}-{}, next offset {}",
            set.messages.len(),
            set.size,
            self.topic,
            self.partition,
            offset + set.size as i64
        );
        Ok(set.messages)
    }

    /// Fetches forever, handing every message to `callback` in order and
    /// sleeping the poll interval between rounds.
    ///
    /// Returns `Ok(())` when `callback` breaks or when `shutdown` becomes
    /// `true`. Fetch errors end the loop and are returned.
    pub async fn run_loop<F>(
        &mut self,
        mut callback: F,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()>
    where
        F: FnMut(Message) -> ControlFlow<()>,
    {
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            for message in self.consume().await? {
                if callback(message).is_break() {
                    return Ok(());
                }
            }
            if wait_or_shutdown(Instant::now() + self.poll_interval, &mut shutdown).await {
                info!("Consumer for {}-{} shutting down", self.topic, self.partition);
                return Ok(());
            }
        }
    }

    pub async fn close(&mut self) {
        self.connection.disconnect().await;
    }
}

/// Sleeps until `deadline`. Returns true if shutdown was signalled first.
async fn wait_or_shutdown(deadline: Instant, shutdown: &mut watch::Receiver<bool>) -> bool {
    loop {
        tokio::select! {
            _ = sleep_until(deadline) => return false,
            changed = shutdown.changed() => {
                if changed.is_err() {
                    // Nobody can signal any more.
                    sleep_until(deadline).await;
                    return false;
                }
                if *shutdown.borrow() {
                    return true;
                }
            }
        }
    }
}

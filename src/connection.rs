//! Socket ownership and failover across a list of candidate brokers.
//!
//! A [`Connection`] holds at most one live socket. When opening a socket
//! fails, the cursor moves to the next host in the (shuffled) list until a
//! host is reached that was itself tried less than [`DEAD_SERVER_COOLDOWN`]
//! ago, at which point the last failure is reported.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::{KafkaError, Result};

/// How long a host that was just tried is skipped during rotation.
pub const DEAD_SERVER_COOLDOWN: Duration = Duration::from_secs(30);

/// A single `reconnect` never makes more than `hosts * ROTATION_MULTIPLIER`
/// attempts.
const ROTATION_MULTIPLIER: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEntry {
    pub hostname: String,
    pub port: u16,
    pub last_connect_time: Option<Instant>,
}

impl HostEntry {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            last_connect_time: None,
        }
    }

    pub fn address(&self) -> String {
        if self.hostname.contains(':') {
            format!("[{}]:{}", self.hostname, self.port)
        } else {
            format!("{}:{}", self.hostname, self.port)
        }
    }

    fn is_cooling_down(&self, now: Instant) -> bool {
        match self.last_connect_time {
            Some(at) => now.saturating_duration_since(at) < DEAD_SERVER_COOLDOWN,
            None => false,
        }
    }
}

/// Hosts in connection order plus the cursor of the one in use.
#[derive(Debug, Clone)]
pub struct HostList {
    entries: Vec<HostEntry>,
    cursor: usize,
}

impl HostList {
    pub fn new(entries: Vec<HostEntry>) -> Result<Self> {
        Self::with_rng(entries, &mut rand::thread_rng())
    }

    /// Shuffles `entries` with `rng` so that many clients sharing one host
    /// list do not all hit the same broker first.
    pub fn with_rng<R: Rng + ?Sized>(mut entries: Vec<HostEntry>, rng: &mut R) -> Result<Self> {
        if entries.is_empty() {
            return Err(KafkaError::ConfigError("No host specified".to_string()));
        }
        entries.shuffle(rng);
        Ok(Self { entries, cursor: 0 })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn entries(&self) -> &[HostEntry] {
        &self.entries
    }

    pub fn current(&self) -> &HostEntry {
        &self.entries[self.cursor]
    }

    fn current_mut(&mut self) -> &mut HostEntry {
        &mut self.entries[self.cursor]
    }

    fn advance(&mut self) {
        self.cursor = (self.cursor + 1) % self.entries.len();
    }
}

/// The byte-level operations the transport needs from a connected socket.
#[async_trait]
pub trait Socket: Send {
    /// One non-blocking write. Returns `WouldBlock` when the send buffer is full.
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Resolves once the socket may accept more bytes.
    async fn writable(&mut self) -> io::Result<()>;

    async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()>;

    async fn shutdown(&mut self) -> io::Result<()>;
}

#[async_trait]
impl Socket for TcpStream {
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        TcpStream::try_write(self, buf)
    }

    async fn writable(&mut self) -> io::Result<()> {
        TcpStream::writable(self).await
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        AsyncReadExt::read_exact(self, buf).await.map(|_| ())
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        AsyncWriteExt::shutdown(self).await
    }
}

/// Opens sockets to individual hosts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, host: &HostEntry, timeout: Duration) -> Result<Box<dyn Socket>>;
}

/// Plain TCP, connected without blocking and bounded by the timeout.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn open(&self, host: &HostEntry, wait: Duration) -> Result<Box<dyn Socket>> {
        let address = host.address();
        let refused = |source: io::Error| KafkaError::ConnectRefused {
            host: address.clone(),
            source,
        };

        let addr = lookup_host(address.as_str())
            .await
            .map_err(refused)?
            .next()
            .ok_or_else(|| {
                refused(io::Error::new(
                    io::ErrorKind::NotFound,
                    "host resolved to no address",
                ))
            })?;
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(refused)?;

        match timeout(wait, socket.connect(addr)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Could not set TCP_NODELAY on {}: {}", address, e);
                }
                Ok(Box::new(stream))
            }
            Ok(Err(e)) => Err(refused(e)),
            Err(_) => Err(KafkaError::ConnectTimeout {
                host: address.clone(),
                timeout: wait,
            }),
        }
    }
}

/// Owns the socket to exactly one host of a [`HostList`], or none.
pub struct Connection<C = TcpConnector> {
    hosts: HostList,
    pub(crate) socket: Option<Box<dyn Socket>>,
    connector: C,
    pub(crate) timeout: Duration,
    pub(crate) retries: u32,
}

impl Connection<TcpConnector> {
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        Self::connect_with(config, TcpConnector).await
    }
}

impl<C: Connector> Connection<C> {
    pub async fn connect_with(config: &ClientConfig, connector: C) -> Result<Self> {
        let hosts = HostList::new(config.hosts.entries()?)?;
        Self::connect_hosts(hosts, config, connector).await
    }

    /// Connects to the first reachable host of an already-built list.
    pub async fn connect_hosts(hosts: HostList, config: &ClientConfig, connector: C) -> Result<Self> {
        let mut connection = Self {
            hosts,
            socket: None,
            connector,
            timeout: config.timeout(),
            retries: config.retries,
        };
        connection.reconnect().await?;
        Ok(connection)
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    pub fn hosts(&self) -> &HostList {
        &self.hosts
    }

    pub fn current_host(&self) -> &HostEntry {
        self.hosts.current()
    }

    /// Opens a fresh socket, rotating through the host list on failure.
    pub async fn reconnect(&mut self) -> Result<()> {
        self.disconnect().await;

        let max_attempts = self.hosts.len() * ROTATION_MULTIPLIER;
        let mut attempts = 0;
        loop {
            let host = self.hosts.current_mut();
            host.last_connect_time = Some(Instant::now());
            let host = host.clone();
            attempts += 1;

            match self.connector.open(&host, self.timeout).await {
                Ok(socket) => {
                    info!("Connected to {}", host.address());
                    self.socket = Some(socket);
                    return Ok(());
                }
                Err(err) => {
                    warn!("Failed to connect to {}: {}", host.address(), err);
                    self.disconnect().await;
                    self.hosts.advance();

                    let next = self.hosts.current();
                    if next.is_cooling_down(Instant::now()) || attempts >= max_attempts {
                        error!(
                            "Giving up after {} connection attempts, {} was tried less than {:?} ago",
                            attempts,
                            next.address(),
                            DEAD_SERVER_COOLDOWN
                        );
                        return Err(KafkaError::AllHostsExhausted {
                            attempts,
                            source: Box::new(err),
                        });
                    }
                }
            }
        }
    }

    /// Closes the socket if there is one. Errors while closing are logged and
    /// dropped; the handle is cleared either way.
    pub async fn disconnect(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            if let Err(e) = socket.shutdown().await {
                debug!("Ignoring error while closing socket: {}", e);
            }
        }
    }
}

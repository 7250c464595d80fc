use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::connection::HostEntry;
use crate::{KafkaError, Result};

pub const DEFAULT_PORT: u16 = 9092;
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_RETRIES: u32 = 1;
pub const DEFAULT_MAX_SIZE: u32 = 1_048_576;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;

/// One `host[:port]` string or a list of them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Hosts {
    One(String),
    Many(Vec<String>),
}

impl Default for Hosts {
    fn default() -> Self {
        Hosts::Many(Vec::new())
    }
}

impl From<&str> for Hosts {
    fn from(host: &str) -> Self {
        Hosts::One(host.to_string())
    }
}

impl From<String> for Hosts {
    fn from(host: String) -> Self {
        Hosts::One(host)
    }
}

impl From<Vec<String>> for Hosts {
    fn from(hosts: Vec<String>) -> Self {
        Hosts::Many(hosts)
    }
}

impl From<&[&str]> for Hosts {
    fn from(hosts: &[&str]) -> Self {
        Hosts::Many(hosts.iter().map(|h| h.to_string()).collect())
    }
}

impl Hosts {
    /// Parses every entry into a `HostEntry`.
    ///
    /// Fails with `ConfigError` when there is nothing to connect to or when
    /// an entry is malformed.
    pub fn entries(&self) -> Result<Vec<HostEntry>> {
        let raw: Vec<&str> = match self {
            Hosts::One(host) => vec![host.as_str()],
            Hosts::Many(hosts) => hosts.iter().map(String::as_str).collect(),
        };
        let raw: Vec<&str> = raw
            .into_iter()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .collect();
        if raw.is_empty() {
            return Err(KafkaError::ConfigError("No host specified".to_string()));
        }
        raw.into_iter().map(parse_host).collect()
    }
}

fn host_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:\[(?P<v6>[^\]]+)\]|(?P<name>[^:\[\]\s]+))(?::(?P<port>\d+))?$")
            .expect("host pattern is valid")
    })
}

/// Parses `host`, `host:port` or `[v6addr]:port`.
pub fn parse_host(raw: &str) -> Result<HostEntry> {
    let caps = host_pattern()
        .captures(raw)
        .ok_or_else(|| KafkaError::ConfigError(format!("Malformed host {raw:?}")))?;
    let hostname = caps
        .name("v6")
        .or_else(|| caps.name("name"))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| KafkaError::ConfigError(format!("Malformed host {raw:?}")))?;
    let port = match caps.name("port") {
        Some(port) => port
            .as_str()
            .parse::<u16>()
            .map_err(|_| KafkaError::ConfigError(format!("Invalid port in {raw:?}")))?,
        None => DEFAULT_PORT,
    };
    Ok(HostEntry::new(hostname, port))
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_retries() -> u32 {
    DEFAULT_RETRIES
}

fn default_max_size() -> u32 {
    DEFAULT_MAX_SIZE
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

/// Settings shared by every connection.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub hosts: Hosts,
    /// Upper bound for every connect, readiness and read wait.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Extra write attempts allowed after a would-block or a broken connection.
    #[serde(default = "default_retries")]
    pub retries: u32,
}

impl ClientConfig {
    pub fn new(hosts: impl Into<Hosts>) -> Self {
        Self {
            hosts: hosts.into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retries: DEFAULT_RETRIES,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerConfig {
    #[serde(flatten)]
    pub client: ClientConfig,
    pub topic: String,
    #[serde(default)]
    pub partition: u32,
    /// Starting offset. When absent the latest offset is asked for once.
    #[serde(default)]
    pub offset: Option<i64>,
    #[serde(default = "default_max_size")]
    pub max_size: u32,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl ConsumerConfig {
    pub fn new(hosts: impl Into<Hosts>, topic: impl Into<String>) -> Self {
        Self {
            client: ClientConfig::new(hosts),
            topic: topic.into(),
            partition: 0,
            offset: None,
            max_size: DEFAULT_MAX_SIZE,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
        }
    }

    pub fn with_partition(mut self, partition: u32) -> Self {
        self.partition = partition;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_poll_interval_secs(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProducerConfig {
    #[serde(flatten)]
    pub client: ClientConfig,
    pub topic: String,
    #[serde(default)]
    pub partition: u32,
}

impl ProducerConfig {
    pub fn new(hosts: impl Into<Hosts>, topic: impl Into<String>) -> Self {
        Self {
            client: ClientConfig::new(hosts),
            topic: topic.into(),
            partition: 0,
        }
    }

    pub fn with_partition(mut self, partition: u32) -> Self {
        self.partition = partition;
        self
    }
}

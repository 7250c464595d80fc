//! A tiny client for the Kafka 0.7 wire protocol.
//!
//! [`KafkaConsumer`] and [`KafkaProducer`] sit on a [`Connection`] that fails
//! over across a list of brokers and never hands out a socket it knows to be
//! broken.

pub mod codec;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod error;
pub mod error_codes;
mod exchange;
pub mod message;
pub mod producer;
mod transport;

#[cfg(test)]
mod testing;

pub use config::{ClientConfig, ConsumerConfig, Hosts, ProducerConfig};
pub use connection::{Connection, Connector, HostEntry, HostList, Socket, TcpConnector};
pub use consumer::KafkaConsumer;
pub use error::KafkaError;
pub use error_codes::ErrorCode;
pub use message::{Message, MessageSet};
pub use producer::KafkaProducer;

pub type Result<T> = std::result::Result<T, KafkaError>;

//! Message transport seams
//!
//! Producers hand serialized envelopes to a `MessageBus`; the indexer pulls
//! raw messages from a `MessageSource`. Both transports (in-process channel
//! and Kafka REST Proxy) implement the same pair of traits.

pub mod channel;
pub mod dead_letter;
pub mod kafka_rest;
pub mod publisher;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use channel::{channel, ChannelBus, ChannelSource};
pub use dead_letter::DeadLetterChannel;
pub use kafka_rest::{KafkaRestBus, KafkaRestSource};
pub use publisher::{Publisher, SendMode};

/// Acknowledgment bound for sends and flushes
pub const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Channel closed: {0}")]
    Closed(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Record rejected: {0}")]
    Rejected(String),

    #[error("No acknowledgment within {0:?}")]
    Timeout(Duration),
}

impl From<reqwest::Error> for BusError {
    fn from(e: reqwest::Error) -> Self {
        BusError::Transport(e.to_string())
    }
}

/// Where a record landed, when the transport reports it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivery {
    pub partition: Option<i32>,
    pub offset: Option<i64>,
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Channel name for log lines (topic or queue name)
    fn name(&self) -> &str;

    /// Send one payload and wait for the transport's acknowledgment.
    async fn send(&self, payload: &str) -> Result<Delivery, BusError>;

    /// Push anything buffered to the transport.
    async fn flush(&self) -> Result<(), BusError>;
}

#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Next batch of raw messages, `None` once the source is closed.
    async fn receive(&self) -> Result<Option<Vec<String>>, BusError>;
}

/// Send with an acknowledgment bound.
pub async fn send_bounded(
    bus: &dyn MessageBus,
    payload: &str,
    bound: Duration,
) -> Result<Delivery, BusError> {
    match tokio::time::timeout(bound, bus.send(payload)).await {
        Ok(result) => result,
        Err(_) => Err(BusError::Timeout(bound)),
    }
}

//! In-process bus backed by a bounded async channel

use async_channel::{bounded, Receiver, Sender};
use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use super::{BusError, Delivery, MessageBus, MessageSource};

/// Sending half; cloning shares the queue.
#[derive(Clone)]
pub struct ChannelBus {
    name: String,
    tx: Sender<String>,
    offset: Arc<AtomicI64>,
}

/// Receiving half
#[derive(Clone)]
pub struct ChannelSource {
    rx: Receiver<String>,
}

/// Create a bounded channel bus and its source.
pub fn channel(name: impl Into<String>, capacity: usize) -> (ChannelBus, ChannelSource) {
    let (tx, rx) = bounded(capacity.max(1));
    (
        ChannelBus {
            name: name.into(),
            tx,
            offset: Arc::new(AtomicI64::new(0)),
        },
        ChannelSource { rx },
    )
}

impl ChannelBus {
    /// Close the queue; the source drains what is left, then reports closed.
    pub fn close(&self) {
        self.tx.close();
    }
}

#[async_trait]
impl MessageBus for ChannelBus {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, payload: &str) -> Result<Delivery, BusError> {
        self.tx
            .send(payload.to_string())
            .await
            .map_err(|_| BusError::Closed(self.name.clone()))?;

        Ok(Delivery {
            partition: Some(0),
            offset: Some(self.offset.fetch_add(1, Ordering::SeqCst)),
        })
    }

    async fn flush(&self) -> Result<(), BusError> {
        Ok(())
    }
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn receive(&self) -> Result<Option<Vec<String>>, BusError> {
        match self.rx.recv().await {
            Ok(message) => Ok(Some(vec![message])),
            Err(_) => Ok(None),
        }
    }
}

//! Envelope publisher with dead-letter fallback
//!
//! `send` never fails the caller: a record that cannot be delivered to the
//! primary bus within the acknowledgment bound is routed to the dead-letter
//! channel and discovery carries on.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{send_bounded, DeadLetterChannel, MessageBus, SEND_TIMEOUT};
use crate::resource::Envelope;

/// How `send` waits for the primary bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SendMode {
    /// Each send awaits its acknowledgment.
    #[default]
    Sync,
    /// Sends run in the background; `flush` waits for all of them.
    Queued,
}

pub struct Publisher {
    primary: Arc<dyn MessageBus>,
    dead_letter: DeadLetterChannel,
    mode: SendMode,
    timeout: Duration,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl Publisher {
    pub fn new(primary: Arc<dyn MessageBus>, dead_letter: DeadLetterChannel) -> Self {
        Self {
            primary,
            dead_letter,
            mode: SendMode::Sync,
            timeout: SEND_TIMEOUT,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn mode(mut self, mode: SendMode) -> Self {
        self.mode = mode;
        self
    }

    /// Override the acknowledgment bound
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Serialize and send an envelope, returning the serialized form.
    pub async fn send(&self, envelope: &Envelope) -> String {
        let resource_id = envelope.contents.display_id().to_string();

        let payload = match serde_json::to_string_pretty(envelope) {
            Ok(payload) => payload,
            Err(e) => {
                error!(resource_id = %resource_id, error = %e, "Failed to serialize envelope");
                return format!("uninitialized json for resource {}", resource_id);
            }
        };

        match self.mode {
            SendMode::Sync => {
                deliver(
                    self.primary.as_ref(),
                    &self.dead_letter,
                    self.timeout,
                    &resource_id,
                    &payload,
                )
                .await;
            }
            SendMode::Queued => {
                let primary = Arc::clone(&self.primary);
                let dead_letter = self.dead_letter.clone();
                let timeout = self.timeout;
                let queued = payload.clone();

                let handle = tokio::spawn(async move {
                    deliver(primary.as_ref(), &dead_letter, timeout, &resource_id, &queued).await;
                });
                self.pending.lock().await.push(handle);
            }
        }

        payload
    }

    /// Forward a raw payload to the dead-letter channel.
    pub async fn send_to_dead_letter(&self, raw: &str) -> bool {
        self.dead_letter.send(raw).await
    }

    /// Wait for queued sends, then flush the primary bus.
    pub async fn flush(&self) {
        let pending = std::mem::take(&mut *self.pending.lock().await);
        if !pending.is_empty() {
            debug!(count = pending.len(), "Waiting for queued sends");
        }

        for result in join_all(pending).await {
            if let Err(e) = result {
                warn!(error = %e, "Queued send task failed");
            }
        }

        match tokio::time::timeout(self.timeout, self.primary.flush()).await {
            Ok(Ok(())) => debug!(topic = %self.primary.name(), "Flushed publisher"),
            Ok(Err(e)) => warn!(topic = %self.primary.name(), error = %e, "Flush failed"),
            Err(_) => warn!(topic = %self.primary.name(), timeout = ?self.timeout, "Flush timed out"),
        }
    }
}

async fn deliver(
    primary: &dyn MessageBus,
    dead_letter: &DeadLetterChannel,
    timeout: Duration,
    resource_id: &str,
    payload: &str,
) {
    match send_bounded(primary, payload, timeout).await {
        Ok(delivery) => info!(
            resource_id = %resource_id,
            topic = %primary.name(),
            partition = ?delivery.partition,
            offset = ?delivery.offset,
            "Sent record"
        ),
        Err(e) => {
            error!(resource_id = %resource_id, topic = %primary.name(), error = %e, "Error publishing resource");
            dead_letter.send(payload).await;
        }
    }
}

//! Dead-letter channel
//!
//! Payloads that could not be delivered or indexed are forwarded here
//! verbatim. A failed dead-letter send is the end of the line: it is logged
//! and reported, never retried or raised.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use super::{send_bounded, MessageBus, SEND_TIMEOUT};
use crate::telemetry::ErrorSink;

#[derive(Clone)]
pub struct DeadLetterChannel {
    bus: Arc<dyn MessageBus>,
    errors: Arc<dyn ErrorSink>,
    timeout: Duration,
}

impl DeadLetterChannel {
    pub fn new(bus: Arc<dyn MessageBus>, errors: Arc<dyn ErrorSink>) -> Self {
        Self {
            bus,
            errors,
            timeout: SEND_TIMEOUT,
        }
    }

    /// Override the acknowledgment bound
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Forward `raw` unmodified. Returns whether the channel acknowledged it.
    pub async fn send(&self, raw: &str) -> bool {
        match send_bounded(self.bus.as_ref(), raw, self.timeout).await {
            Ok(delivery) => {
                info!(
                    topic = %self.bus.name(),
                    partition = ?delivery.partition,
                    offset = ?delivery.offset,
                    "Sent message to dead-letter channel"
                );
                true
            }
            Err(e) => {
                error!(topic = %self.bus.name(), error = %e, "Failed to send message to dead-letter channel");
                self.errors
                    .report(&anyhow::Error::new(e), "dead-letter delivery");
                false
            }
        }
    }
}

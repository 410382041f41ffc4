//! Envelope consumer
//!
//! Parses each raw message, derives the target index and the deterministic
//! document id, and upserts the record. A message that cannot be parsed or
//! saved is forwarded verbatim to the dead-letter channel; nothing is
//! retried in place.

pub mod elasticsearch;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::messaging::{DeadLetterChannel, MessageSource};
use crate::resource::{document_id, Envelope};

pub use elasticsearch::ElasticsearchStore;
pub use store::{MemoryStore, SearchStore, StoreError};

const RECEIVE_BACKOFF: Duration = Duration::from_secs(1);
const IDLE_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid envelope: {0}")]
    Syntax(#[from] serde_json::Error),

    #[error("Envelope record has an empty arn")]
    MissingArn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterReason {
    Parse,
    Save,
}

/// What happened to one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    Indexed { index: String, document_id: String },
    DeadLettered { reason: DeadLetterReason },
}

/// Parse and validate a raw envelope.
pub fn parse_envelope(raw: &str) -> Result<Envelope, ParseError> {
    let envelope: Envelope = serde_json::from_str(raw)?;
    if envelope.contents.arn.is_empty() {
        return Err(ParseError::MissingArn);
    }
    Ok(envelope)
}

pub struct Indexer {
    store: Arc<dyn SearchStore>,
    dead_letter: DeadLetterChannel,
}

impl Indexer {
    pub fn new(store: Arc<dyn SearchStore>, dead_letter: DeadLetterChannel) -> Self {
        Self { store, dead_letter }
    }

    /// Index one raw message. Never fails; failures end in the dead-letter channel.
    pub async fn handle(&self, raw: &str) -> IndexOutcome {
        let envelope = match parse_envelope(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(error = %e, "Error parsing message");
                self.dead_letter.send(raw).await;
                return IndexOutcome::DeadLettered {
                    reason: DeadLetterReason::Parse,
                };
            }
        };

        let resource_id = envelope.contents.display_id().to_string();
        let session = envelope.discovery_session.clone();

        // Own task so a panicking store is contained like a failed write.
        let task = {
            let store = Arc::clone(&self.store);
            tokio::spawn(save(store, envelope))
        };
        let saved = match task.await {
            Ok(result) => result,
            Err(join_error) => Err(anyhow!("save task aborted: {}", join_error)),
        };

        match saved {
            Ok((index, document_id)) => {
                info!(
                    resource_id = %resource_id,
                    session = %session,
                    index = %index,
                    document_id = %document_id,
                    "Saved resource"
                );
                IndexOutcome::Indexed { index, document_id }
            }
            Err(e) => {
                error!(
                    resource_id = %resource_id,
                    session = %session,
                    error = ?e,
                    "Error saving resource"
                );
                self.dead_letter.send(raw).await;
                IndexOutcome::DeadLettered {
                    reason: DeadLetterReason::Save,
                }
            }
        }
    }

    /// Consume `source` until it closes.
    pub async fn run<S>(&self, source: &S)
    where
        S: MessageSource + ?Sized,
    {
        info!("Indexer started");

        loop {
            match source.receive().await {
                Ok(Some(batch)) if batch.is_empty() => tokio::time::sleep(IDLE_POLL).await,
                Ok(Some(batch)) => {
                    for raw in batch {
                        self.handle(&raw).await;
                    }
                }
                Ok(None) => {
                    info!("Message source closed, indexer stopping");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, backoff = ?RECEIVE_BACKOFF, "Failed to receive messages");
                    tokio::time::sleep(RECEIVE_BACKOFF).await;
                }
            }
        }
    }
}

async fn save(store: Arc<dyn SearchStore>, envelope: Envelope) -> Result<(String, String)> {
    let mut record = envelope.contents;
    let index = record.resource_type.index_name();
    let document_id = document_id(&record.arn.to_lowercase())?;

    record.document_id = Some(document_id.clone());
    record.touch();

    let document = serde_json::to_value(&record).context("Failed to serialize document")?;
    store
        .upsert(&index, &document_id, document)
        .await
        .with_context(|| format!("Failed to upsert into {}", index))?;

    Ok((index, document_id))
}

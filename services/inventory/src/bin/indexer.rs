//! Asset inventory indexer - standalone binary
//!
//! Consumes discovered resources from Kafka (through the REST Proxy) and
//! upserts them into Elasticsearch.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use inventory_engine::config::{BusKind, Config};
use inventory_engine::messaging::{DeadLetterChannel, KafkaRestSource};
use inventory_engine::telemetry::{init_tracing, TracingErrorSink};
use inventory_engine::Indexer;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::parse();
    config.validate()?;

    if config.bus != BusKind::KafkaRest {
        anyhow::bail!("The indexer consumes from Kafka; run `inventory --bus channel` for in-process indexing");
    }

    info!(
        topic = %config.topic,
        group = %config.consumer_group,
        search_url = %config.search_url,
        "Starting asset indexer"
    );

    let (_, dead_letter) = config.kafka_buses()?;
    let indexer = Indexer::new(
        config.search_store()?,
        DeadLetterChannel::new(dead_letter, Arc::new(TracingErrorSink)),
    );

    let source = KafkaRestSource::connect(&config.kafka_rest_url, &config.consumer_group, &config.topic)
        .await
        .context("Failed to connect to the REST proxy")?;

    tokio::select! {
        _ = indexer.run(&source) => {}
        _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
    }

    source.close().await?;

    Ok(())
}

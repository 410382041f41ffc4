//! Asset inventory producer
//!
//! Runs discovery sessions on a cron schedule (or once) and publishes every
//! discovered resource. With `--bus channel` the indexer runs in the same
//! process, consuming from an in-memory queue.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use inventory_engine::config::{BusKind, Config};
use inventory_engine::discoverers;
use inventory_engine::messaging::{channel, ChannelBus, DeadLetterChannel, MessageSource};
use inventory_engine::scheduler::{FileSchedule, ScheduleSource, Scheduler, StaticSchedule};
use inventory_engine::telemetry::{init_tracing, AnalyticsSink, ErrorSink, SegmentAnalytics, TracingErrorSink};
use inventory_engine::{DiscoveryContext, DiscoveryRegistry, Indexer, Publisher};

const CHANNEL_CAPACITY: usize = 1000;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::parse();
    config.validate()?;

    info!(
        integration = %config.integration,
        regions = ?config.regions(),
        roles = config.role_arns.len(),
        discoverers = ?config.discoverers,
        bus = ?config.bus,
        "Starting asset inventory"
    );

    let errors: Arc<dyn ErrorSink> = Arc::new(TracingErrorSink);
    let analytics: Arc<dyn AnalyticsSink> = Arc::new(SegmentAnalytics::new(
        config.analytics_enabled,
        config.analytics_write_key.clone(),
    )?);

    let (publisher, standalone) = match config.bus {
        BusKind::KafkaRest => {
            let (primary, dead_letter) = config.kafka_buses()?;
            let publisher = Publisher::new(primary, DeadLetterChannel::new(dead_letter, errors.clone()));
            (publisher, None)
        }
        BusKind::Channel => {
            let standalone = Standalone::start(&config, errors.clone())?;
            let publisher = Publisher::new(
                Arc::new(standalone.primary.clone()),
                DeadLetterChannel::new(Arc::new(standalone.dead_letter.clone()), errors.clone()),
            );
            (publisher, Some(standalone))
        }
    };
    let publisher = Arc::new(publisher.mode(config.send_mode));

    let context = DiscoveryContext {
        publisher: publisher.clone(),
        integration: config.integration.clone(),
        regions: config.regions(),
        errors: errors.clone(),
    };

    let registry = discoverers::build_enabled(&config.discoverers, &context, &config.role_arns)
        .with_context(|| format!("Known discoverers: {}", discoverers::KNOWN.join(", ")))?
        .into_iter()
        .fold(
            DiscoveryRegistry::new(publisher, analytics, errors).cluster_id(config.cluster_id.clone()),
            |registry, discoverer| registry.register(discoverer),
        );
    let registry = Arc::new(registry);

    info!(discoverers = ?registry.names(), "Discovery registry ready");

    if config.once {
        let output = registry.discover(config.resource_id.as_deref()).await;
        info!(bytes = output.len(), "Discovery run complete");
    } else {
        let schedule: Arc<dyn ScheduleSource> = match &config.schedule_file {
            Some(path) => Arc::new(FileSchedule::new(path)),
            None => Arc::new(StaticSchedule(config.cron.clone())),
        };

        let scheduler = Scheduler::new(registry.clone(), schedule).run_on_start(config.run_on_start);

        tokio::select! {
            _ = scheduler.run() => {}
            _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
        }
    }

    if let Some(standalone) = standalone {
        standalone.shutdown().await;
    }

    Ok(())
}

/// In-process indexer fed by channel buses
struct Standalone {
    primary: ChannelBus,
    dead_letter: ChannelBus,
    indexer: JoinHandle<()>,
    dead_letter_drain: JoinHandle<()>,
}

impl Standalone {
    fn start(config: &Config, errors: Arc<dyn ErrorSink>) -> Result<Self> {
        let (primary, source) = channel(&config.topic, CHANNEL_CAPACITY);
        let (dead_letter, dead_letter_source) = channel(&config.dead_letter_topic, CHANNEL_CAPACITY);

        let indexer = Indexer::new(
            config.search_store()?,
            DeadLetterChannel::new(Arc::new(dead_letter.clone()), errors),
        );

        let indexer = tokio::spawn(async move { indexer.run(&source).await });

        // Nothing consumes the dead-letter queue in-process; surface it in the logs.
        let dead_letter_drain = tokio::spawn(async move {
            while let Ok(Some(batch)) = dead_letter_source.receive().await {
                for raw in batch {
                    warn!(payload = %raw, "Dead-lettered payload");
                }
            }
        });

        info!(topic = %config.topic, "Started in-process indexer");

        Ok(Self {
            primary,
            dead_letter,
            indexer,
            dead_letter_drain,
        })
    }

    /// Drain both queues, then stop.
    async fn shutdown(self) {
        self.primary.close();
        if let Err(e) = self.indexer.await {
            warn!(error = %e, "In-process indexer failed");
        }

        self.dead_letter.close();
        if let Err(e) = self.dead_letter_drain.await {
            warn!(error = %e, "Dead-letter drain failed");
        }
    }
}

//! End-to-end pipeline: registry -> publisher -> channel bus -> indexer -> memory store

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use inventory_engine::indexer::{MemoryStore, SearchStore};
use inventory_engine::messaging::{channel, DeadLetterChannel, MessageBus, MessageSource};
use inventory_engine::payload;
use inventory_engine::registry::resource_matches;
use inventory_engine::resource::document_id;
use inventory_engine::telemetry::{AnalyticsSink, TracingErrorSink};
use inventory_engine::{
    DiscoveryContext, DiscoveryRegistry, Discoverer, Indexer, Publisher, ResourceRecord, ResourceType,
};

#[derive(Default)]
struct CountingAnalytics {
    events: AtomicUsize,
}

impl AnalyticsSink for CountingAnalytics {
    fn track(&self, _event: &str, _properties: &BTreeMap<String, String>) {
        self.events.fetch_add(1, Ordering::SeqCst);
    }
}

/// Publishes a fixed set of buckets; the size of each bucket changes per run.
struct BucketDiscoverer {
    context: DiscoveryContext,
    arns: Vec<&'static str>,
    run: AtomicUsize,
}

#[async_trait]
impl Discoverer for BucketDiscoverer {
    fn name(&self) -> &str {
        "buckets"
    }

    async fn run(&self, resource_id: Option<&str>, session_id: &str) -> Result<Vec<String>> {
        let run = self.run.fetch_add(1, Ordering::SeqCst) + 1;
        let mut confirmations = Vec::new();

        for arn in self.arns.iter().filter(|arn| resource_matches(arn, resource_id)) {
            let mut record = ResourceRecord::new(ResourceType::S3Bucket, *arn)
                .region(&self.context.regions[0])
                .session(session_id);
            record.configuration = payload::merge_named(None, [("sizeBytes", run * 100)]);
            record.tags = Some(payload::tags_to_object([("run", run.to_string())]));

            confirmations.push(self.context.publish(session_id, record).await);
        }

        Ok(confirmations)
    }
}

struct BrokenDiscoverer;

#[async_trait]
impl Discoverer for BrokenDiscoverer {
    fn name(&self) -> &str {
        "broken"
    }

    async fn run(&self, _: Option<&str>, _: &str) -> Result<Vec<String>> {
        anyhow::bail!("credentials expired")
    }
}

#[tokio::test]
async fn test_rediscovery_updates_single_document() {
    let errors = Arc::new(TracingErrorSink);
    let (bus, source) = channel("discovered-resources", 64);
    let (dead_letter_bus, dead_letter_source) = channel("discovered-resources-dlq", 64);

    let publisher = Arc::new(Publisher::new(
        Arc::new(bus.clone()),
        DeadLetterChannel::new(Arc::new(dead_letter_bus.clone()), errors.clone()),
    ));
    let context = DiscoveryContext {
        publisher: publisher.clone(),
        integration: "aws".to_string(),
        regions: vec!["eu-west-1".to_string()],
        errors: errors.clone(),
    };

    let analytics = Arc::new(CountingAnalytics::default());
    let registry = DiscoveryRegistry::new(publisher, analytics.clone(), errors.clone())
        .register(Arc::new(BrokenDiscoverer))
        .register(Arc::new(BucketDiscoverer {
            context,
            arns: vec!["arn:aws:s3:::Logs", "arn:aws:s3:::assets"],
            run: AtomicUsize::new(0),
        }));

    let first = registry.discover(None).await;
    let second = registry.discover(None).await;
    assert_eq!(first.split("\n\n").count(), 2);
    assert_eq!(second.split("\n\n").count(), 2);

    let store = Arc::new(MemoryStore::new());
    let indexer = Indexer::new(
        store.clone(),
        DeadLetterChannel::new(Arc::new(dead_letter_bus.clone()), errors),
    );

    bus.close();
    indexer.run(&source).await;

    assert_eq!(store.len().await, 2);

    let id = document_id("arn:aws:s3:::logs").unwrap();
    let doc = store.get("awss3bucket", &id).await.unwrap().expect("bucket indexed");
    assert_eq!(doc["configuration"], json!({"sizeBytes": 200}));
    assert_eq!(doc["tags"], json!({"run": "2"}));
    assert_eq!(doc["awsRegion"], "eu-west-1");
    assert_eq!(doc["documentId"], id.as_str());

    // broken: start only; buckets: start + complete; two sessions
    assert_eq!(analytics.events.load(Ordering::SeqCst), 6);

    dead_letter_bus.close();
    assert_eq!(dead_letter_source.receive().await.unwrap(), None);
}

#[tokio::test]
async fn test_garbage_is_dead_lettered_verbatim() {
    let errors = Arc::new(TracingErrorSink);
    let (bus, source) = channel("discovered-resources", 8);
    let (dead_letter_bus, dead_letter_source) = channel("discovered-resources-dlq", 8);

    let store = Arc::new(MemoryStore::new());
    let indexer = Indexer::new(
        store.clone(),
        DeadLetterChannel::new(Arc::new(dead_letter_bus.clone()), errors),
    );

    let garbage = "{\"integration\": \"aws\", \"contents\": ";

    bus.send(garbage).await.unwrap();
    bus.close();
    indexer.run(&source).await;
    dead_letter_bus.close();

    let mut dead_lettered = Vec::new();
    while let Some(batch) = dead_letter_source.receive().await.unwrap() {
        dead_lettered.extend(batch);
    }

    assert!(store.is_empty().await);
    assert_eq!(dead_lettered, vec![garbage.to_string()]);
}

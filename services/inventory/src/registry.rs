//! Discovery orchestration
//!
//! One `discover()` call is one discovery session: a fresh session id, every
//! registered discoverer run in registration order, lifecycle telemetry
//! around each run and a publisher flush after each run whether it
//! succeeded or not. A failing or panicking discoverer is reported and the
//! session moves on to the next one.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{error, info};
use uuid::Uuid;

use crate::messaging::Publisher;
use crate::resource::{Envelope, ResourceRecord};
use crate::telemetry::{AnalyticsSink, ErrorSink};

/// Enumerates one kind of resource and publishes what it finds.
#[async_trait]
pub trait Discoverer: Send + Sync {
    /// Name used for configuration and logging
    fn name(&self) -> &str;

    /// Prefix of the lifecycle telemetry events
    fn analytics_name(&self) -> String {
        self.name().to_string()
    }

    /// Enumerate and publish resources, returning one confirmation per
    /// published record. With `resource_id` set, only the resource whose
    /// identifier matches it (ignoring case) is processed.
    async fn run(&self, resource_id: Option<&str>, session_id: &str) -> Result<Vec<String>>;
}

/// Whether `candidate` passes an optional resource-id filter.
pub fn resource_matches(candidate: &str, filter: Option<&str>) -> bool {
    filter.map_or(true, |f| f.to_lowercase() == candidate.to_lowercase())
}

/// What every discoverer needs from the outside
#[derive(Clone)]
pub struct DiscoveryContext {
    pub publisher: Arc<Publisher>,
    pub integration: String,
    pub regions: Vec<String>,
    pub errors: Arc<dyn ErrorSink>,
}

impl DiscoveryContext {
    /// Wrap a record in an envelope for `session_id` and publish it.
    pub async fn publish(&self, session_id: &str, record: ResourceRecord) -> String {
        let envelope = Envelope::new(&self.integration, session_id, record);
        self.publisher.send(&envelope).await
    }

    /// Run `operation` once per configured region, in order.
    ///
    /// A failing region is logged and reported, and the remaining regions
    /// still run. Returns the outputs of the regions that succeeded.
    pub async fn for_each_region<T, F, Fut>(&self, mut operation: F) -> Vec<T>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut outputs = Vec::with_capacity(self.regions.len());

        for region in &self.regions {
            info!(region = %region, "Starting discovery in region");
            match operation(region.clone()).await {
                Ok(output) => outputs.push(output),
                Err(e) => {
                    error!(region = %region, error = ?e, "Failed for region");
                    self.errors.report(&e, &format!("Failed for region {}", region));
                }
            }
        }

        outputs
    }
}

/// Terminal state of one discoverer run within a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { published: usize },
    Failed,
}

pub struct DiscoveryRegistry {
    discoverers: Vec<Arc<dyn Discoverer>>,
    publisher: Arc<Publisher>,
    analytics: Arc<dyn AnalyticsSink>,
    errors: Arc<dyn ErrorSink>,
    cluster_id: String,
    session_lock: Mutex<()>,
}

impl DiscoveryRegistry {
    pub fn new(
        publisher: Arc<Publisher>,
        analytics: Arc<dyn AnalyticsSink>,
        errors: Arc<dyn ErrorSink>,
    ) -> Self {
        Self {
            discoverers: Vec::new(),
            publisher,
            analytics,
            errors,
            cluster_id: String::new(),
            session_lock: Mutex::new(()),
        }
    }

    pub fn cluster_id(mut self, cluster_id: impl Into<String>) -> Self {
        self.cluster_id = cluster_id.into();
        self
    }

    /// Append a discoverer; sessions run them in registration order.
    pub fn register(mut self, discoverer: Arc<dyn Discoverer>) -> Self {
        self.discoverers.push(discoverer);
        self
    }

    pub fn names(&self) -> Vec<String> {
        self.discoverers.iter().map(|d| d.name().to_string()).collect()
    }

    /// Run one discovery session and return every confirmation joined by a blank line.
    ///
    /// Sessions do not overlap: a call made while another session is
    /// running waits for it to finish.
    pub async fn discover(&self, resource_id: Option<&str>) -> String {
        let _session = self.session_lock.lock().await;
        let session_id = Uuid::new_v4().to_string();

        info!(
            session = %session_id,
            resource_id = ?resource_id,
            discoverers = self.discoverers.len(),
            "Starting discovery session"
        );

        let mut output: Vec<String> = Vec::new();

        for discoverer in &self.discoverers {
            let outcome = self
                .run_discoverer(discoverer, resource_id, &session_id, &mut output)
                .await;

            self.publisher.flush().await;

            info!(
                session = %session_id,
                discoverer = %discoverer.name(),
                outcome = ?outcome,
                "Discoverer flushed"
            );
        }

        info!(session = %session_id, resources = output.len(), "Discovery session complete");

        output.join("\n\n")
    }

    async fn run_discoverer(
        &self,
        discoverer: &Arc<dyn Discoverer>,
        resource_id: Option<&str>,
        session_id: &str,
        output: &mut Vec<String>,
    ) -> RunOutcome {
        let event = discoverer.analytics_name();
        self.track(&format!("{}-start", event), session_id, None);

        // Own task so a panic is contained like an error.
        let task = {
            let discoverer = Arc::clone(discoverer);
            let resource_id = resource_id.map(str::to_string);
            let session_id = session_id.to_string();
            tokio::spawn(async move { discoverer.run(resource_id.as_deref(), &session_id).await })
        };

        let result = match task.await {
            Ok(result) => result,
            Err(join_error) => Err(anyhow!("discoverer task aborted: {}", join_error)),
        };

        match result {
            Ok(items) => {
                let published = items.len();
                output.extend(items);
                self.track(&format!("{}-complete", event), session_id, Some(output.len()));
                RunOutcome::Completed { published }
            }
            Err(e) => {
                error!(
                    session = %session_id,
                    discoverer = %discoverer.name(),
                    error = ?e,
                    "Error running discoverer"
                );
                self.errors
                    .report(&e, &format!("discoverer {} failed", discoverer.name()));
                RunOutcome::Failed
            }
        }
    }

    fn track(&self, event: &str, session_id: &str, resources: Option<usize>) {
        let mut properties = BTreeMap::new();
        properties.insert("discovery-session".to_string(), session_id.to_string());
        properties.insert("clusterID".to_string(), self.cluster_id.clone());
        if let Some(count) = resources {
            properties.insert("num-resources".to_string(), count.to_string());
        }
        self.analytics.track(event, &properties);
    }
}

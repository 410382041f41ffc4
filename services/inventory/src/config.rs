//! Runtime configuration
//!
//! Every option can be given as a flag or through the environment.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use thiserror::Error;

use crate::indexer::{ElasticsearchStore, SearchStore};
use crate::messaging::{BusError, KafkaRestBus, MessageBus, SendMode};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("At least one region must be configured")]
    NoRegions,

    #[error("Integration label must not be empty")]
    EmptyIntegration,

    #[error("Topic names must not be empty")]
    EmptyTopic,

    #[error("Dead-letter topic must differ from the primary topic ({0})")]
    SameTopics(String),

    #[error("Unknown discoverer: {0}")]
    UnknownDiscoverer(String),

    #[error("Transport setup failed: {0}")]
    Transport(#[from] BusError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BusKind {
    /// In-process queue; the producer also runs the indexer
    Channel,
    /// Kafka through the Confluent REST Proxy
    KafkaRest,
}

/// Asset inventory: discovers cloud resources and indexes them for search
#[derive(Parser, Debug, Clone)]
#[command(name = "inventory", version, about)]
pub struct Config {
    /// Integration label stamped into every envelope
    #[arg(long, env = "INVENTORY_INTEGRATION", default_value = "aws")]
    pub integration: String,

    /// Regions to discover in
    #[arg(long, env = "INVENTORY_REGIONS", value_delimiter = ',', default_value = "us-east-1")]
    pub regions: Vec<String>,

    /// Cross-account roles to assume, in addition to the local identity
    #[arg(long = "role-arn", env = "INVENTORY_ROLE_ARNS", value_delimiter = ',')]
    pub role_arns: Vec<String>,

    /// Discoverers to enable
    #[arg(long = "discoverer", env = "INVENTORY_DISCOVERERS", value_delimiter = ',', default_value = "accounts")]
    pub discoverers: Vec<String>,

    /// Cluster id reported with lifecycle telemetry
    #[arg(long, env = "INVENTORY_CLUSTER_ID", default_value = "")]
    pub cluster_id: String,

    /// Forward lifecycle telemetry to Segment
    #[arg(long, env = "ANALYTICS_ENABLED", default_value = "false")]
    pub analytics_enabled: bool,

    /// Segment write key
    #[arg(long, env = "ANALYTICS_WRITE_KEY", hide_env_values = true)]
    pub analytics_write_key: Option<String>,

    /// Message bus transport
    #[arg(long, env = "INVENTORY_BUS", value_enum, default_value_t = BusKind::KafkaRest)]
    pub bus: BusKind,

    /// Kafka REST Proxy base URL
    #[arg(long, env = "KAFKA_REST_URL", default_value = "http://localhost:8082")]
    pub kafka_rest_url: String,

    /// Topic for discovered resources
    #[arg(long, env = "INVENTORY_TOPIC", default_value = "discovered-resources")]
    pub topic: String,

    /// Topic for payloads that could not be delivered or indexed
    #[arg(long, env = "INVENTORY_DEAD_LETTER_TOPIC", default_value = "discovered-resources-dlq")]
    pub dead_letter_topic: String,

    /// Consumer group of the indexer
    #[arg(long, env = "INVENTORY_CONSUMER_GROUP", default_value = "resource-indexer")]
    pub consumer_group: String,

    /// Elasticsearch / OpenSearch base URL
    #[arg(long, env = "SEARCH_URL", default_value = "http://localhost:9200")]
    pub search_url: String,

    #[arg(long, env = "SEARCH_USERNAME")]
    pub search_username: Option<String>,

    #[arg(long, env = "SEARCH_PASSWORD", hide_env_values = true)]
    pub search_password: Option<String>,

    /// Discovery schedule (six fields, with seconds)
    #[arg(long, env = "INVENTORY_CRON", default_value = "0 0 */6 * * *")]
    pub cron: String,

    /// File holding the schedule; re-read before every wait and overrides --cron
    #[arg(long, env = "INVENTORY_SCHEDULE_FILE")]
    pub schedule_file: Option<PathBuf>,

    /// Run one discovery immediately at startup
    #[arg(long, env = "INVENTORY_RUN_ON_START", default_value = "false")]
    pub run_on_start: bool,

    /// Run once and exit (for CronJob mode)
    #[arg(long, default_value = "false")]
    pub once: bool,

    /// Limit a --once run to a single resource identifier
    #[arg(long)]
    pub resource_id: Option<String>,

    /// How the publisher waits for the bus
    #[arg(long, env = "INVENTORY_SEND_MODE", value_enum, default_value_t = SendMode::Sync)]
    pub send_mode: SendMode,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.integration.trim().is_empty() {
            return Err(ConfigError::EmptyIntegration);
        }
        if self.regions.iter().all(|r| r.trim().is_empty()) {
            return Err(ConfigError::NoRegions);
        }
        if self.topic.is_empty() || self.dead_letter_topic.is_empty() {
            return Err(ConfigError::EmptyTopic);
        }
        if self.topic == self.dead_letter_topic {
            return Err(ConfigError::SameTopics(self.topic.clone()));
        }
        Ok(())
    }

    /// Regions with blanks removed
    pub fn regions(&self) -> Vec<String> {
        self.regions
            .iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect()
    }

    /// Producer buses for the primary and dead-letter topics
    pub fn kafka_buses(&self) -> Result<(Arc<dyn MessageBus>, Arc<dyn MessageBus>), ConfigError> {
        let primary = KafkaRestBus::new(&self.kafka_rest_url, &self.topic)?;
        let dead_letter = KafkaRestBus::new(&self.kafka_rest_url, &self.dead_letter_topic)?;
        Ok((Arc::new(primary), Arc::new(dead_letter)))
    }

    /// Basic-auth credentials, only when both halves are set
    pub fn search_credentials(&self) -> Option<(String, String)> {
        match (&self.search_username, &self.search_password) {
            (Some(username), Some(password)) => Some((username.clone(), password.clone())),
            _ => None,
        }
    }

    pub fn search_store(&self) -> anyhow::Result<Arc<dyn SearchStore>> {
        let mut store = ElasticsearchStore::new(&self.search_url)?;
        if let Some((username, password)) = self.search_credentials() {
            store = store.basic_auth(username, password);
        }
        Ok(Arc::new(store))
    }
}

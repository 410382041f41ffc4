//! Logging, error reporting and lifecycle analytics

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Initialise JSON logging for a binary. `RUST_LOG` overrides the default `info` level.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .json()
        .init();
}

/// Receives every failure that is contained instead of propagated.
pub trait ErrorSink: Send + Sync {
    fn report(&self, error: &anyhow::Error, context: &str);
}

/// Error sink that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, error: &anyhow::Error, context: &str) {
        error!(context = %context, error = ?error, "Reported failure");
    }
}

/// Lifecycle telemetry events (`{name}-start`, `{name}-complete`).
pub trait AnalyticsSink: Send + Sync {
    fn track(&self, event: &str, properties: &BTreeMap<String, String>);
}

/// Analytics sink that logs every event and, when enabled, forwards it to
/// the Segment HTTP tracking API.
pub struct SegmentAnalytics {
    http_client: reqwest::Client,
    endpoint: String,
    write_key: Option<String>,
    enabled: bool,
}

const SEGMENT_TRACK_URL: &str = "https://api.segment.io/v1/track";

impl SegmentAnalytics {
    pub fn new(enabled: bool, write_key: Option<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        if enabled && write_key.is_none() {
            warn!("Analytics enabled without a write key, events will only be logged");
        }

        Ok(Self {
            http_client,
            endpoint: SEGMENT_TRACK_URL.to_string(),
            write_key,
            enabled,
        })
    }

    /// Log-only sink
    pub fn disabled() -> Result<Self> {
        Self::new(false, None)
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

impl AnalyticsSink for SegmentAnalytics {
    fn track(&self, event: &str, properties: &BTreeMap<String, String>) {
        info!(event = %event, properties = ?properties, "Sending telemetry event");

        let Some(write_key) = self.write_key.clone().filter(|_| self.enabled) else {
            return;
        };

        let body = json!({
            "event": event,
            "anonymousId": "0",
            "properties": properties,
        });
        let request = self
            .http_client
            .post(&self.endpoint)
            .basic_auth(write_key, Some(""))
            .json(&body);
        let event = event.to_string();

        // Delivery happens off the discovery path.
        tokio::spawn(async move {
            match request.send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!(event = %event, "Telemetry event delivered");
                }
                Ok(resp) => warn!(event = %event, status = %resp.status(), "Telemetry event rejected"),
                Err(e) => warn!(event = %event, error = %e, "Failed to deliver telemetry event"),
            }
        });
    }
}

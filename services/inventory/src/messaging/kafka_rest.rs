//! Kafka transport over the Confluent REST Proxy (v2 JSON API)
//!
//! Records are produced as JSON string values so the consumer receives the
//! exact serialized envelope that was sent.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{BusError, Delivery, MessageBus, MessageSource};

const JSON_RECORDS: &str = "application/vnd.kafka.json.v2+json";
const PROXY_V2: &str = "application/vnd.kafka.v2+json";

fn http_client() -> Result<reqwest::Client, BusError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(BusError::from)
}

#[derive(Debug, Deserialize)]
struct ProduceResponse {
    #[serde(default)]
    offsets: Vec<ProduceOffset>,
}

#[derive(Debug, Deserialize)]
struct ProduceOffset {
    partition: Option<i32>,
    offset: Option<i64>,
    error_code: Option<i64>,
    error: Option<String>,
}

/// Producer for one topic
pub struct KafkaRestBus {
    http_client: reqwest::Client,
    base_url: String,
    topic: String,
}

impl KafkaRestBus {
    pub fn new(base_url: &str, topic: &str) -> Result<Self, BusError> {
        Ok(Self {
            http_client: http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            topic: topic.to_string(),
        })
    }

    fn topic_url(&self) -> String {
        format!("{}/topics/{}", self.base_url, urlencoding::encode(&self.topic))
    }
}

#[async_trait]
impl MessageBus for KafkaRestBus {
    fn name(&self) -> &str {
        &self.topic
    }

    async fn send(&self, payload: &str) -> Result<Delivery, BusError> {
        let body = json!({ "records": [{ "value": payload }] });

        let response = self
            .http_client
            .post(self.topic_url())
            .header(reqwest::header::CONTENT_TYPE, JSON_RECORDS)
            .header(reqwest::header::ACCEPT, PROXY_V2)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BusError::Transport(format!(
                "REST proxy returned {} for topic {}: {}",
                status, self.topic, body
            )));
        }

        let produced: ProduceResponse = response.json().await?;
        let offset = produced
            .offsets
            .into_iter()
            .next()
            .ok_or_else(|| BusError::Rejected(format!("no offset returned for topic {}", self.topic)))?;

        if offset.error_code.is_some() || offset.error.is_some() {
            return Err(BusError::Rejected(format!(
                "topic {} error {:?}: {}",
                self.topic,
                offset.error_code,
                offset.error.unwrap_or_default()
            )));
        }

        Ok(Delivery {
            partition: offset.partition,
            offset: offset.offset,
        })
    }

    async fn flush(&self) -> Result<(), BusError> {
        // Every POST is acknowledged before it returns.
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ConsumerInstance {
    instance_id: String,
    base_uri: String,
}

#[derive(Debug, Deserialize)]
struct ConsumedRecord {
    value: Value,
    #[serde(default)]
    partition: Option<i32>,
    #[serde(default)]
    offset: Option<i64>,
}

/// Consumer instance subscribed to one topic.
///
/// The proxy drops instances on restart or after its idle timeout; a poll
/// answered with 404 creates and subscribes a fresh instance in the same
/// group.
pub struct KafkaRestSource {
    http_client: reqwest::Client,
    base_url: String,
    group: String,
    topic: String,
    instance: RwLock<ConsumerInstance>,
}

impl KafkaRestSource {
    /// Create a consumer instance in `group` and subscribe it to `topic`.
    pub async fn connect(base_url: &str, group: &str, topic: &str) -> Result<Self, BusError> {
        let http_client = http_client()?;
        let base_url = base_url.trim_end_matches('/').to_string();
        let instance = subscribe(&http_client, &base_url, group, topic).await?;

        Ok(Self {
            http_client,
            base_url,
            group: group.to_string(),
            topic: topic.to_string(),
            instance: RwLock::new(instance),
        })
    }

    /// Replace a lost instance with a new subscription.
    async fn recreate(&self, lost: &ConsumerInstance) -> Result<(), BusError> {
        let mut instance = self.instance.write().await;
        if instance.instance_id != lost.instance_id {
            // Another poll already replaced it.
            return Ok(());
        }

        *instance = subscribe(&self.http_client, &self.base_url, &self.group, &self.topic).await?;
        warn!(
            lost = %lost.instance_id,
            instance = %instance.instance_id,
            "Consumer instance recreated"
        );
        Ok(())
    }

    /// Delete the consumer instance so the group rebalances promptly.
    pub async fn close(&self) -> Result<(), BusError> {
        let instance = self.instance.read().await.clone();
        let response = self
            .http_client
            .delete(&instance.base_uri)
            .header(reqwest::header::CONTENT_TYPE, PROXY_V2)
            .send()
            .await?;

        if !response.status().is_success() {
            warn!(
                instance = %instance.instance_id,
                status = %response.status(),
                "Failed to delete consumer instance"
            );
        }

        Ok(())
    }
}

async fn subscribe(
    http_client: &reqwest::Client,
    base_url: &str,
    group: &str,
    topic: &str,
) -> Result<ConsumerInstance, BusError> {
    let name = format!("{}-{}", group, Uuid::new_v4());

    let response = http_client
        .post(format!("{}/consumers/{}", base_url, urlencoding::encode(group)))
        .header(reqwest::header::CONTENT_TYPE, PROXY_V2)
        .json(&json!({
            "name": name,
            "format": "json",
            "auto.offset.reset": "earliest",
            "auto.commit.enable": "true",
        }))
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(BusError::Transport(format!(
            "Failed to create consumer in group {}: {} {}",
            group, status, body
        )));
    }

    let instance: ConsumerInstance = response.json().await?;

    let response = http_client
        .post(format!("{}/subscription", instance.base_uri))
        .header(reqwest::header::CONTENT_TYPE, PROXY_V2)
        .json(&json!({ "topics": [topic] }))
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(BusError::Transport(format!(
            "Failed to subscribe to {}: {}",
            topic,
            response.status()
        )));
    }

    info!(
        group = %group,
        topic = %topic,
        instance = %instance.instance_id,
        "Subscribed REST proxy consumer"
    );

    Ok(instance)
}

#[async_trait]
impl MessageSource for KafkaRestSource {
    async fn receive(&self) -> Result<Option<Vec<String>>, BusError> {
        let instance = self.instance.read().await.clone();

        let response = self
            .http_client
            .get(format!("{}/records", instance.base_uri))
            .header(reqwest::header::ACCEPT, JSON_RECORDS)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            warn!(instance = %instance.instance_id, body = %body, "Consumer instance not found");
            self.recreate(&instance).await?;
            return Ok(Some(Vec::new()));
        }

        if !response.status().is_success() {
            return Err(BusError::Transport(format!(
                "Polling records failed: {}",
                response.status()
            )));
        }

        let records: Vec<ConsumedRecord> = response.json().await?;
        debug!(instance = %instance.instance_id, count = records.len(), "Polled records");

        let messages = records
            .into_iter()
            .map(|record| {
                debug!(partition = ?record.partition, offset = ?record.offset, "Received record");
                raw_value(record.value)
            })
            .collect();

        Ok(Some(messages))
    }
}

/// String values are the payload as sent; anything else is re-serialized.
fn raw_value(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::response::{IntoResponse, Response};
    use axum::routing::{delete, get, post};
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// REST proxy that has already forgotten the first consumer instance
    #[derive(Default)]
    struct FakeProxy {
        base: String,
        creates: AtomicUsize,
        polls: AtomicUsize,
        delivered: AtomicBool,
        deleted: Mutex<Vec<String>>,
    }

    impl FakeProxy {
        async fn start() -> Arc<Self> {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let proxy = Arc::new(Self {
                base: format!("http://{}", listener.local_addr().unwrap()),
                ..Default::default()
            });

            let app = Router::new()
                .route("/consumers/:group", post(create_consumer))
                .route("/consumers/:group/instances/:id", delete(delete_consumer))
                .route("/consumers/:group/instances/:id/subscription", post(subscribe_consumer))
                .route("/consumers/:group/instances/:id/records", get(poll_records))
                .with_state(proxy.clone());

            tokio::spawn(async move {
                let _ = axum::serve(listener, app).await;
            });

            proxy
        }

        fn creates(&self) -> usize {
            self.creates.load(Ordering::SeqCst)
        }
    }

    async fn create_consumer(State(proxy): State<Arc<FakeProxy>>, Path(group): Path<String>) -> Json<Value> {
        let id = format!("i{}", proxy.creates.fetch_add(1, Ordering::SeqCst) + 1);
        Json(json!({
            "instance_id": id,
            "base_uri": format!("{}/consumers/{}/instances/{}", proxy.base, group, id),
        }))
    }

    async fn subscribe_consumer() -> axum::http::StatusCode {
        axum::http::StatusCode::NO_CONTENT
    }

    async fn delete_consumer(
        State(proxy): State<Arc<FakeProxy>>,
        Path((_, id)): Path<(String, String)>,
    ) -> axum::http::StatusCode {
        proxy.deleted.lock().unwrap().push(id);
        axum::http::StatusCode::NO_CONTENT
    }

    async fn poll_records(
        State(proxy): State<Arc<FakeProxy>>,
        Path((_, id)): Path<(String, String)>,
    ) -> Response {
        proxy.polls.fetch_add(1, Ordering::SeqCst);

        if id == "i1" {
            let body = json!({"error_code": 40403, "message": "Consumer instance not found."});
            return (axum::http::StatusCode::NOT_FOUND, Json(body)).into_response();
        }

        if proxy.delivered.swap(true, Ordering::SeqCst) {
            return Json(json!([])).into_response();
        }

        Json(json!([{
            "topic": "assets",
            "key": null,
            "value": "{\"arn\":\"arn:aws:s3:::a\"}",
            "partition": 0,
            "offset": 5
        }]))
        .into_response()
    }

    #[tokio::test]
    async fn test_lost_instance_is_recreated() {
        let proxy = FakeProxy::start().await;
        let source = KafkaRestSource::connect(&proxy.base, "resource-indexer", "assets")
            .await
            .unwrap();
        assert_eq!(proxy.creates(), 1);

        // 404 on the first instance: new instance, nothing delivered yet
        assert_eq!(source.receive().await.unwrap(), Some(vec![]));
        assert_eq!(proxy.creates(), 2);

        assert_eq!(
            source.receive().await.unwrap(),
            Some(vec!["{\"arn\":\"arn:aws:s3:::a\"}".to_string()])
        );
        assert_eq!(source.receive().await.unwrap(), Some(vec![]));
        assert_eq!(proxy.creates(), 2);
        assert_eq!(proxy.polls.load(Ordering::SeqCst), 3);

        source.close().await.unwrap();
        assert_eq!(*proxy.deleted.lock().unwrap(), vec!["i2".to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_polls_recreate_once() {
        let proxy = FakeProxy::start().await;
        let source = KafkaRestSource::connect(&proxy.base, "resource-indexer", "assets")
            .await
            .unwrap();

        let (a, b) = tokio::join!(source.receive(), source.receive());
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(proxy.creates(), 2);
    }

    #[test]
    fn test_raw_value() {
        assert_eq!(raw_value(json!("{\"a\":1}")), "{\"a\":1}");
        assert_eq!(raw_value(json!({"a": 1})), "{\"a\":1}");
    }

    #[test]
    fn test_produce_response_parsing() {
        let ok: ProduceResponse = serde_json::from_value(json!({
            "key_schema_id": null,
            "value_schema_id": null,
            "offsets": [{"partition": 2, "offset": 17, "error_code": null, "error": null}]
        }))
        .unwrap();
        assert_eq!(ok.offsets[0].partition, Some(2));
        assert_eq!(ok.offsets[0].offset, Some(17));

        let failed: ProduceResponse = serde_json::from_value(json!({
            "offsets": [{"partition": null, "offset": null, "error_code": 40403, "error": "unknown topic"}]
        }))
        .unwrap();
        assert_eq!(failed.offsets[0].error_code, Some(40403));
    }

    #[test]
    fn test_topic_url_encoding() {
        let bus = KafkaRestBus::new("http://proxy:8082/", "discovered assets").unwrap();
        assert_eq!(bus.topic_url(), "http://proxy:8082/topics/discovered%20assets");
    }
}

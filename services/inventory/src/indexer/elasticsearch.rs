//! Elasticsearch / OpenSearch REST store
//!
//! Uses the index API, which inserts or fully replaces the document at the
//! given id.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

use super::store::{SearchStore, StoreError};

pub struct ElasticsearchStore {
    http_client: reqwest::Client,
    base_url: String,
    credentials: Option<(String, String)>,
}

impl ElasticsearchStore {
    pub fn new(base_url: &str) -> Result<Self, StoreError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials: None,
        })
    }

    /// Authenticate with HTTP basic auth
    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    fn document_url(&self, index: &str, document_id: &str) -> String {
        format!(
            "{}/{}/_doc/{}",
            self.base_url,
            urlencoding::encode(index),
            urlencoding::encode(document_id)
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credentials {
            Some((username, password)) => request.basic_auth(username, Some(password)),
            None => request,
        }
    }
}

#[async_trait]
impl SearchStore for ElasticsearchStore {
    async fn upsert(&self, index: &str, document_id: &str, document: Value) -> Result<(), StoreError> {
        let request = self
            .http_client
            .put(self.document_url(index, document_id))
            .query(&[("refresh", "wait_for")])
            .json(&document);

        let response = self.authorize(request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Rejected {
                index: index.to_string(),
                document_id: document_id.to_string(),
                reason: format!("{}: {}", status, body),
            });
        }

        let body: Value = response.json().await?;
        debug!(
            index = %index,
            document_id = %document_id,
            result = %body["result"].as_str().unwrap_or("unknown"),
            "Indexed document"
        );

        Ok(())
    }

    async fn get(&self, index: &str, document_id: &str) -> Result<Option<Value>, StoreError> {
        let request = self.http_client.get(self.document_url(index, document_id));
        let response = self.authorize(request).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            return Err(StoreError::Request(format!(
                "GET {}/{} returned {}",
                index,
                document_id,
                response.status()
            )));
        }

        let body: Value = response.json().await?;
        Ok(body.get("_source").cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_url() {
        let store = ElasticsearchStore::new("https://search.local:9200/").unwrap();
        assert_eq!(
            store.document_url("awss3bucket", "edadxoLTMkOJn7kNGKBbVg"),
            "https://search.local:9200/awss3bucket/_doc/edadxoLTMkOJn7kNGKBbVg"
        );
    }
}

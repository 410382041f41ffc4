//! Region discovery
//!
//! One `AWS::Region` record per configured region and account. Each region
//! is discovered through its own regional STS endpoint, so a region that is
//! disabled or unreachable for an account yields no record for it.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use crate::fanout::{AwsClientProvider, CredentialFanoutRunner, SessionFor};
use crate::registry::{resource_matches, DiscoveryContext, Discoverer};
use crate::resource::{ResourceRecord, ResourceType};
use crate::telemetry::ErrorSink;

type StsProvider = AwsClientProvider<aws_sdk_sts::Client>;

pub struct RegionDiscoverer {
    context: DiscoveryContext,
    runner: CredentialFanoutRunner<StsProvider>,
}

impl RegionDiscoverer {
    pub const NAME: &'static str = "regions";

    pub fn new(context: DiscoveryContext, role_arns: Vec<String>, errors: Arc<dyn ErrorSink>) -> Self {
        Self {
            context,
            runner: CredentialFanoutRunner::new(
                AwsClientProvider::new(aws_sdk_sts::Client::new),
                role_arns,
                errors,
            ),
        }
    }

    pub fn region_arn(region: &str, account_id: &str) -> String {
        format!("arn:aws::{}:{}", region, account_id)
    }

    pub fn region_record(region: &str, account_id: &str, session_id: &str) -> ResourceRecord {
        ResourceRecord::new(ResourceType::Region, Self::region_arn(region, account_id))
            .id(region)
            .name(region)
            .region(region)
            .account(account_id)
            .session(session_id)
    }

    async fn discover_region(
        &self,
        session: SessionFor<StsProvider>,
        region: &str,
        resource_id: Option<&str>,
        session_id: &str,
    ) -> Result<Vec<String>> {
        let identity = session
            .client()
            .get_caller_identity()
            .send()
            .await
            .with_context(|| format!("Failed to reach STS in {}", region))?;

        let account_id = identity.account().context("STS returned no account id")?;
        let record = Self::region_record(region, account_id, session_id);

        if !resource_matches(&record.arn, resource_id) {
            debug!(arn = %record.arn, "Region does not match resource filter");
            return Ok(Vec::new());
        }

        Ok(vec![self.context.publish(session_id, record).await])
    }
}

#[async_trait]
impl Discoverer for RegionDiscoverer {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self, resource_id: Option<&str>, session_id: &str) -> Result<Vec<String>> {
        let outputs = self
            .context
            .for_each_region(|region| async move {
                let region = region.as_str();
                let published = self
                    .runner
                    .apply_client(region, move |session| {
                        self.discover_region(session, region, resource_id, session_id)
                    })
                    .await;
                Ok::<_, anyhow::Error>(published.into_iter().flatten().collect::<Vec<_>>())
            })
            .await;

        Ok(outputs.into_iter().flatten().collect())
    }
}

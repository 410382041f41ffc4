//! AWS client provider
//!
//! Local credentials come from the default provider chain (environment,
//! profile, IRSA web identity, instance metadata). Cross-account access
//! assumes each role through STS with a fresh random session name.

use anyhow::Result;
use async_trait::async_trait;
use aws_config::sts::AssumeRoleProvider;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use tracing::info;
use uuid::Uuid;

use super::ClientProvider;

/// Provider for any SDK client constructible from an `SdkConfig`,
/// e.g. `AwsClientProvider::new(aws_sdk_sts::Client::new)`.
pub struct AwsClientProvider<C> {
    build: fn(&SdkConfig) -> C,
}

impl<C> AwsClientProvider<C> {
    pub fn new(build: fn(&SdkConfig) -> C) -> Self {
        Self { build }
    }
}

#[async_trait]
impl<C> ClientProvider for AwsClientProvider<C>
where
    C: Send + Sync + 'static,
{
    type Client = C;
    type Credentials = SdkConfig;

    async fn local_credentials(&self, region: &str) -> Result<SdkConfig> {
        Ok(aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await)
    }

    async fn assume_role(&self, role_arn: &str, region: &str) -> Result<SdkConfig> {
        let base = self.local_credentials(region).await?;
        let session_name = Uuid::new_v4().to_string();

        let provider = AssumeRoleProvider::builder(role_arn)
            .session_name(session_name.clone())
            .region(Region::new(region.to_string()))
            .configure(&base)
            .build()
            .await;

        info!(role = %role_arn, region = %region, session = %session_name, "Assuming cross-account role");

        Ok(aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(provider)
            .load()
            .await)
    }

    fn create_client(&self, _region: &str, credentials: &SdkConfig) -> Result<C> {
        Ok((self.build)(credentials))
    }
}

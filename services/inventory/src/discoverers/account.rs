//! Account discovery
//!
//! Resolves the account behind every identity the fan-out runs as, so each
//! cross-account role yields one `AWS::Account` record named by its IAM alias.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::SdkConfig;
use tracing::{debug, info, warn};

use crate::fanout::{AwsClientProvider, CredentialFanoutRunner, SessionFor};
use crate::payload;
use crate::registry::{resource_matches, DiscoveryContext, Discoverer};
use crate::resource::{ResourceRecord, ResourceType};
use crate::telemetry::ErrorSink;

/// Account lookups are global; STS and IAM are called in this region.
const ACCOUNT_REGION: &str = "us-east-1";

/// STS resolves the account, IAM its alias.
struct AccountClients {
    sts: aws_sdk_sts::Client,
    iam: aws_sdk_iam::Client,
}

impl AccountClients {
    fn new(config: &SdkConfig) -> Self {
        Self {
            sts: aws_sdk_sts::Client::new(config),
            iam: aws_sdk_iam::Client::new(config),
        }
    }
}

type AccountProvider = AwsClientProvider<AccountClients>;

pub struct AccountDiscoverer {
    context: DiscoveryContext,
    runner: CredentialFanoutRunner<AccountProvider>,
}

impl AccountDiscoverer {
    pub const NAME: &'static str = "accounts";

    pub fn new(context: DiscoveryContext, role_arns: Vec<String>, errors: Arc<dyn ErrorSink>) -> Self {
        Self {
            context,
            runner: CredentialFanoutRunner::new(AwsClientProvider::new(AccountClients::new), role_arns, errors),
        }
    }

    /// Arn used as the account's unique identifier
    pub fn account_arn(account_id: &str) -> String {
        format!("arn:aws:organizations::{}", account_id)
    }

    /// Account records carry no region; the name is the first alias, if any.
    pub fn account_record(account_id: &str, alias: Option<String>, session_id: &str) -> ResourceRecord {
        let mut record = ResourceRecord::new(ResourceType::Account, Self::account_arn(account_id))
            .id(account_id)
            .account(account_id)
            .session(session_id);
        record.resource_name = alias;
        record
    }

    async fn account_alias(clients: &AccountClients, account_id: &str) -> Option<String> {
        match clients.iam.list_account_aliases().send().await {
            Ok(output) => output.account_aliases().first().cloned(),
            Err(e) => {
                warn!(account = %account_id, error = ?e, "Failed to list account aliases");
                None
            }
        }
    }

    async fn discover_account(
        &self,
        session: SessionFor<AccountProvider>,
        resource_id: Option<&str>,
        session_id: &str,
    ) -> Result<Vec<String>> {
        let identity = session
            .client()
            .sts
            .get_caller_identity()
            .send()
            .await
            .context("Failed to get caller identity")?;

        let account_id = identity.account().context("STS returned no account id")?;
        let arn = Self::account_arn(account_id);

        if !resource_matches(&arn, resource_id) {
            debug!(arn = %arn, "Account does not match resource filter");
            return Ok(Vec::new());
        }

        let alias = Self::account_alias(session.client(), account_id).await;
        let mut record = Self::account_record(account_id, alias, session_id);

        record.configuration = payload::merge_named(
            None,
            [
                ("callerArn", identity.arn()),
                ("userId", identity.user_id()),
            ],
        );
        record.supplementary_configuration = payload::merge_named(
            None,
            [("discoveredAs", session.context().identity().to_string())],
        );

        info!(
            account = %account_id,
            alias = ?record.resource_name,
            identity = %session.context().identity(),
            category = %record.resource_type.category(),
            "Discovered account"
        );

        Ok(vec![self.context.publish(session_id, record).await])
    }
}

#[async_trait]
impl Discoverer for AccountDiscoverer {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self, resource_id: Option<&str>, session_id: &str) -> Result<Vec<String>> {
        let outputs = self
            .runner
            .apply_client(ACCOUNT_REGION, move |session| {
                self.discover_account(session, resource_id, session_id)
            })
            .await;

        Ok(outputs.into_iter().flatten().collect())
    }
}

//! Credential fan-out
//!
//! Runs one unit of discovery work per identity in a region: first as the
//! local identity, then once per configured cross-account role. Every
//! iteration gets its own client and credentials, and a failure in one
//! iteration is reported and skipped so the remaining identities still run.

pub mod aws;

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, error};

use crate::telemetry::ErrorSink;

pub use aws::AwsClientProvider;

/// Which identity an iteration runs as
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    Local,
    Role(String),
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Identity::Local => write!(f, "local"),
            Identity::Role(arn) => write!(f, "{}", arn),
        }
    }
}

/// (identity, region) pair for one iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialContext {
    identity: Identity,
    region: String,
}

impl CredentialContext {
    pub fn local(region: &str) -> Self {
        Self {
            identity: Identity::Local,
            region: region.to_string(),
        }
    }

    pub fn role(role_arn: &str, region: &str) -> Self {
        Self {
            identity: Identity::Role(role_arn.to_string()),
            region: region.to_string(),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

/// Builds credentials and clients for the fan-out runner.
#[async_trait]
pub trait ClientProvider: Send + Sync {
    type Client: Send + Sync + 'static;
    type Credentials: Send + Sync + 'static;

    /// Credentials of the process's own identity
    async fn local_credentials(&self, region: &str) -> Result<Self::Credentials>;

    /// Credentials for a cross-account role
    async fn assume_role(&self, role_arn: &str, region: &str) -> Result<Self::Credentials>;

    fn create_client(&self, region: &str, credentials: &Self::Credentials) -> Result<Self::Client>;
}

/// Client and credentials owned by a single iteration.
///
/// Dropping the session releases both, on every exit path.
pub struct ScopedSession<C, K> {
    client: C,
    credentials: K,
    context: CredentialContext,
}

impl<C, K> ScopedSession<C, K> {
    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn credentials(&self) -> &K {
        &self.credentials
    }

    pub fn context(&self) -> &CredentialContext {
        &self.context
    }
}

impl<C, K> Drop for ScopedSession<C, K> {
    fn drop(&mut self) {
        debug!(
            identity = %self.context.identity,
            region = %self.context.region,
            "Released scoped session"
        );
    }
}

/// Session type handed to operations run through `P`
pub type SessionFor<P> = ScopedSession<<P as ClientProvider>::Client, <P as ClientProvider>::Credentials>;

pub struct CredentialFanoutRunner<P: ClientProvider> {
    provider: P,
    role_arns: Arc<[String]>,
    errors: Arc<dyn ErrorSink>,
}

impl<P: ClientProvider> CredentialFanoutRunner<P> {
    pub fn new(provider: P, role_arns: Vec<String>, errors: Arc<dyn ErrorSink>) -> Self {
        Self {
            provider,
            role_arns: role_arns.into(),
            errors,
        }
    }

    pub fn role_arns(&self) -> &[String] {
        &self.role_arns
    }

    /// Run `operation` as the local identity, then once per role, in `region`.
    ///
    /// Returns the outputs of the iterations that succeeded. Failures are
    /// logged and reported, never returned.
    pub async fn apply_client<T, F, Fut>(&self, region: &str, mut operation: F) -> Vec<T>
    where
        F: FnMut(SessionFor<P>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut outputs = Vec::with_capacity(self.role_arns.len() + 1);

        let local = CredentialContext::local(region);
        if let Some(output) = self.run_iteration(&local, &mut operation).await {
            outputs.push(output);
        }

        if self.role_arns.is_empty() {
            return outputs;
        }

        debug!(region = %region, roles = self.role_arns.len(), "Fanning out across roles");

        for role_arn in self.role_arns.iter() {
            let context = CredentialContext::role(role_arn, region);
            if let Some(output) = self.run_iteration(&context, &mut operation).await {
                outputs.push(output);
            }
        }

        outputs
    }

    async fn run_iteration<T, F, Fut>(&self, context: &CredentialContext, operation: &mut F) -> Option<T>
    where
        F: FnMut(SessionFor<P>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let result = match self.open_session(context).await {
            Ok(session) => operation(session).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(output) => Some(output),
            Err(e) => {
                let description = match context.identity() {
                    Identity::Local => format!("Unable to run local discovery in region {}", context.region()),
                    Identity::Role(arn) => format!(
                        "Unable to apply client in region {} to role {}",
                        context.region(),
                        arn
                    ),
                };
                error!(
                    identity = %context.identity(),
                    region = %context.region(),
                    error = ?e,
                    "{}", description
                );
                self.errors.report(&e, &description);
                None
            }
        }
    }

    async fn open_session(&self, context: &CredentialContext) -> Result<SessionFor<P>> {
        let credentials = match context.identity() {
            Identity::Local => self
                .provider
                .local_credentials(context.region())
                .await
                .context("Failed to resolve local credentials")?,
            Identity::Role(arn) => self
                .provider
                .assume_role(arn, context.region())
                .await
                .with_context(|| format!("Failed to assume role {}", arn))?,
        };

        let client = self
            .provider
            .create_client(context.region(), &credentials)
            .context("Failed to create client")?;

        Ok(ScopedSession {
            client,
            credentials,
            context: context.clone(),
        })
    }
}

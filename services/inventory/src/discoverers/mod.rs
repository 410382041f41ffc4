//! Built-in discoverers and the name-based selection used at startup

mod account;
mod region;

use std::sync::Arc;

use crate::config::ConfigError;
use crate::registry::{DiscoveryContext, Discoverer};

pub use account::AccountDiscoverer;
pub use region::RegionDiscoverer;

/// Names accepted by `--discoverer`
pub const KNOWN: &[&str] = &[AccountDiscoverer::NAME, RegionDiscoverer::NAME];

/// Build the enabled discoverers in the order they were named.
pub fn build_enabled(
    names: &[String],
    context: &DiscoveryContext,
    role_arns: &[String],
) -> Result<Vec<Arc<dyn Discoverer>>, ConfigError> {
    let mut enabled: Vec<Arc<dyn Discoverer>> = Vec::new();

    for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
        if enabled.iter().any(|d| d.name() == name) {
            continue;
        }

        let discoverer: Arc<dyn Discoverer> = match name {
            AccountDiscoverer::NAME => Arc::new(AccountDiscoverer::new(
                context.clone(),
                role_arns.to_vec(),
                context.errors.clone(),
            )),
            RegionDiscoverer::NAME => Arc::new(RegionDiscoverer::new(
                context.clone(),
                role_arns.to_vec(),
                context.errors.clone(),
            )),
            other => return Err(ConfigError::UnknownDiscoverer(other.to_string())),
        };
        enabled.push(discoverer);
    }

    Ok(enabled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{DeadLetterChannel, Publisher};
    use crate::testing::{RecordingBus, RecordingErrorSink};

    fn context() -> DiscoveryContext {
        let errors = Arc::new(RecordingErrorSink::default());
        let dead_letter = DeadLetterChannel::new(Arc::new(RecordingBus::new("dlq")), errors.clone());
        DiscoveryContext {
            publisher: Arc::new(Publisher::new(Arc::new(RecordingBus::new("assets")), dead_letter)),
            integration: "aws".to_string(),
            regions: vec!["us-east-1".to_string(), "eu-west-1".to_string()],
            errors,
        }
    }

    #[test]
    fn test_build_in_named_order_without_duplicates() {
        let names: Vec<String> = ["regions", " accounts", "regions", ""].iter().map(|s| s.to_string()).collect();

        let enabled = build_enabled(&names, &context(), &[]).unwrap();

        let built: Vec<&str> = enabled.iter().map(|d| d.name()).collect();
        assert_eq!(built, vec!["regions", "accounts"]);
    }

    #[test]
    fn test_unknown_name_rejected() {
        let names = vec!["accounts".to_string(), "buckets".to_string()];

        assert!(matches!(
            build_enabled(&names, &context(), &[]),
            Err(ConfigError::UnknownDiscoverer(name)) if name == "buckets"
        ));
    }
}

//! Asset Inventory Engine Library
//!
//! Discovers cloud resources across accounts and regions, publishes them to
//! a message bus and indexes them into a search store.

pub mod config;
pub mod discoverers;
pub mod fanout;
pub mod indexer;
pub mod messaging;
pub mod payload;
pub mod registry;
pub mod resource;
pub mod scheduler;
pub mod telemetry;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use fanout::CredentialFanoutRunner;
pub use indexer::Indexer;
pub use messaging::Publisher;
pub use registry::{DiscoveryContext, DiscoveryRegistry, Discoverer};
pub use resource::{Envelope, ResourceRecord, ResourceType};

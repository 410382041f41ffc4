//! Wire types shared by the producer and the indexer
//!
//! A `ResourceRecord` is one discovered asset. It travels inside an
//! `Envelope` and is stored by the indexer as a search document.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use thiserror::Error;

/// Closed set of resource kinds.
///
/// The wire tag is the discriminator of the serialized record and the
/// source of the index name the indexer routes the document to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    #[serde(rename = "AWS::Account")]
    Account,
    #[serde(rename = "AWS::Region")]
    Region,
    #[serde(rename = "AWS::Backup::BackupVault")]
    BackupVault,
    #[serde(rename = "AWS::DynamoDB::Table")]
    DynamoDbTable,
    #[serde(rename = "AWS::DynamoDB::GlobalTable")]
    DynamoDbGlobalTable,
    #[serde(rename = "AWS::EC2::Instance")]
    Ec2Instance,
    #[serde(rename = "AWS::EC2::VPC")]
    Ec2Vpc,
    #[serde(rename = "AWS::EFS::FileSystem")]
    EfsFileSystem,
    #[serde(rename = "AWS::Elasticsearch::Domain")]
    ElasticsearchDomain,
    #[serde(rename = "AWS::FSx::FileSystem")]
    FsxFileSystem,
    #[serde(rename = "AWS::RDS::DBInstance")]
    RdsInstance,
    #[serde(rename = "AWS::Redshift::Cluster")]
    RedshiftCluster,
    #[serde(rename = "AWS::S3::Bucket")]
    S3Bucket,
}

/// Coarse grouping used in log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceCategory {
    Account,
    Region,
    Compute,
    Storage,
    Database,
    Networking,
}

impl std::fmt::Display for ResourceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceCategory::Account => write!(f, "account"),
            ResourceCategory::Region => write!(f, "region"),
            ResourceCategory::Compute => write!(f, "compute"),
            ResourceCategory::Storage => write!(f, "storage"),
            ResourceCategory::Database => write!(f, "database"),
            ResourceCategory::Networking => write!(f, "networking"),
        }
    }
}

impl ResourceType {
    pub const ALL: [ResourceType; 13] = [
        ResourceType::Account,
        ResourceType::Region,
        ResourceType::BackupVault,
        ResourceType::DynamoDbTable,
        ResourceType::DynamoDbGlobalTable,
        ResourceType::Ec2Instance,
        ResourceType::Ec2Vpc,
        ResourceType::EfsFileSystem,
        ResourceType::ElasticsearchDomain,
        ResourceType::FsxFileSystem,
        ResourceType::RdsInstance,
        ResourceType::RedshiftCluster,
        ResourceType::S3Bucket,
    ];

    /// The wire tag, e.g. `AWS::S3::Bucket`
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Account => "AWS::Account",
            ResourceType::Region => "AWS::Region",
            ResourceType::BackupVault => "AWS::Backup::BackupVault",
            ResourceType::DynamoDbTable => "AWS::DynamoDB::Table",
            ResourceType::DynamoDbGlobalTable => "AWS::DynamoDB::GlobalTable",
            ResourceType::Ec2Instance => "AWS::EC2::Instance",
            ResourceType::Ec2Vpc => "AWS::EC2::VPC",
            ResourceType::EfsFileSystem => "AWS::EFS::FileSystem",
            ResourceType::ElasticsearchDomain => "AWS::Elasticsearch::Domain",
            ResourceType::FsxFileSystem => "AWS::FSx::FileSystem",
            ResourceType::RdsInstance => "AWS::RDS::DBInstance",
            ResourceType::RedshiftCluster => "AWS::Redshift::Cluster",
            ResourceType::S3Bucket => "AWS::S3::Bucket",
        }
    }

    pub fn category(&self) -> ResourceCategory {
        match self {
            ResourceType::Account => ResourceCategory::Account,
            ResourceType::Region => ResourceCategory::Region,
            ResourceType::Ec2Instance => ResourceCategory::Compute,
            ResourceType::Ec2Vpc => ResourceCategory::Networking,
            ResourceType::BackupVault
            | ResourceType::EfsFileSystem
            | ResourceType::FsxFileSystem
            | ResourceType::S3Bucket => ResourceCategory::Storage,
            ResourceType::DynamoDbTable
            | ResourceType::DynamoDbGlobalTable
            | ResourceType::ElasticsearchDomain
            | ResourceType::RdsInstance
            | ResourceType::RedshiftCluster => ResourceCategory::Database,
        }
    }

    /// Search index for documents of this type: the tag without colons, lowercased.
    pub fn index_name(&self) -> String {
        self.as_str().replace(':', "").to_lowercase()
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown resource type: {0}")]
pub struct UnknownResourceType(pub String);

impl FromStr for ResourceType {
    type Err = UnknownResourceType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownResourceType(s.to_string()))
    }
}

/// A discovered asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRecord {
    /// Globally unique identifier of the asset
    pub arn: String,
    pub resource_name: Option<String>,
    pub resource_id: Option<String>,
    pub resource_type: ResourceType,
    pub aws_region: Option<String>,
    pub aws_account_id: Option<String>,
    pub updated_iso: Option<String>,
    pub discovery_session_id: Option<String>,
    pub document_id: Option<String>,
    pub configuration: Option<Value>,
    pub supplementary_configuration: Option<Value>,
    #[serde(default)]
    pub relationships: Vec<Value>,
    pub tags: Option<Value>,
}

impl ResourceRecord {
    pub fn new(resource_type: ResourceType, arn: impl Into<String>) -> Self {
        Self {
            arn: arn.into(),
            resource_name: None,
            resource_id: None,
            resource_type,
            aws_region: None,
            aws_account_id: None,
            updated_iso: None,
            discovery_session_id: None,
            document_id: None,
            configuration: None,
            supplementary_configuration: None,
            relationships: Vec::new(),
            tags: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.resource_name = Some(name.into());
        self
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.resource_id = Some(id.into());
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.aws_region = Some(region.into());
        self
    }

    pub fn account(mut self, account_id: impl Into<String>) -> Self {
        self.aws_account_id = Some(account_id.into());
        self
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.discovery_session_id = Some(session_id.into());
        self
    }

    /// Identifier used in log lines: the internal id when known, else the arn.
    pub fn display_id(&self) -> &str {
        self.resource_id.as_deref().unwrap_or(&self.arn)
    }

    /// Stamp the current time as the last update.
    pub fn touch(&mut self) {
        self.updated_iso = Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));
    }
}

/// Transport wrapper around a single record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub integration: String,
    pub discovery_session: String,
    pub ts: DateTime<Utc>,
    pub contents: ResourceRecord,
}

impl Envelope {
    pub fn new(
        integration: impl Into<String>,
        discovery_session: impl Into<String>,
        contents: ResourceRecord,
    ) -> Self {
        Self {
            integration: integration.into(),
            discovery_session: discovery_session.into(),
            ts: Utc::now(),
            contents,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_tags_match_serde() {
        for t in ResourceType::ALL {
            let wire = serde_json::to_value(t).unwrap();
            assert_eq!(wire, json!(t.as_str()));
            assert_eq!(t.as_str().parse::<ResourceType>().unwrap(), t);
        }
    }

    #[test]
    fn test_index_name() {
        assert_eq!(ResourceType::S3Bucket.index_name(), "awss3bucket");
        assert_eq!(ResourceType::RdsInstance.index_name(), "awsrdsdbinstance");
        assert_eq!(ResourceType::Account.index_name(), "awsaccount");
    }

    #[test]
    fn test_unknown_tag_rejected() {
        assert!("AWS::Lambda::Function".parse::<ResourceType>().is_err());

        let raw = json!({ "arn": "arn:aws:lambda:::fn", "resourceType": "AWS::Lambda::Function" });
        assert!(serde_json::from_value::<ResourceRecord>(raw).is_err());
    }

    #[test]
    fn test_record_camel_case_fields() {
        let record = ResourceRecord::new(ResourceType::S3Bucket, "arn:aws:s3:::logs")
            .name("logs")
            .region("us-west-2")
            .account("123456789012")
            .session("session-1");

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["resourceType"], "AWS::S3::Bucket");
        assert_eq!(value["resourceName"], "logs");
        assert_eq!(value["awsRegion"], "us-west-2");
        assert_eq!(value["awsAccountId"], "123456789012");
        assert_eq!(value["discoverySessionId"], "session-1");
        assert_eq!(value["relationships"], json!([]));
    }

    #[test]
    fn test_record_minimal_payload() {
        let raw = json!({ "arn": "arn:aws:s3:::logs", "resourceType": "AWS::S3::Bucket" });
        let record: ResourceRecord = serde_json::from_value(raw).unwrap();

        assert_eq!(record.resource_type, ResourceType::S3Bucket);
        assert!(record.configuration.is_none());
        assert!(record.relationships.is_empty());
        assert_eq!(record.display_id(), "arn:aws:s3:::logs");
    }

    #[test]
    fn test_envelope_round_trip() {
        let record = ResourceRecord::new(ResourceType::Ec2Instance, "arn:aws:ec2:::i-1").id("i-1");
        let envelope = Envelope::new("aws", "session-1", record);

        let text = serde_json::to_string_pretty(&envelope).unwrap();
        assert!(text.contains("\"discoverySession\""));

        let back: Envelope = serde_json::from_str(&text).unwrap();
        assert_eq!(back, envelope);
    }
}

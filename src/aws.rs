use anyhow::Result;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_sts::config::Credentials;
use aws_types::region::Region;
use clap::ValueEnum;
use std::collections::BTreeMap;
use tracing::debug;

use crate::config::AuthConfig;

pub mod cloudwatch;
pub mod database;
pub mod ec2;
pub mod elb;
pub mod instance;
pub mod rds;
pub mod s3;
pub mod sns;
pub mod sts;

/// Well-known tag keys
pub mod tags {
    pub const ENVIRONMENT: &str = "environment";
    pub const PURPOSE: &str = "purpose";
    pub const NAME: &str = "Name";
    pub const USER: &str = "user";
    pub const ELASTIC_IP: &str = "elastic_ip";
    pub const ELASTIC_IP_ALLOCATION_ID: &str = "elastic_ip_allocation_id";
    pub const ELASTIC_LB: &str = "elastic_lb";
    /// Comma separated `group_id:port` rules opened to the instance's public ip
    pub const SECURITY_GROUP_INGRESS: &str = "security_group_ingress";
}

/// Short region codes accepted on the command line
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum RegionCode {
    /// Oregon (us-west-2)
    Or,
    /// California (us-west-1)
    Ca,
    /// Virginia (us-east-1)
    Va,
}

impl RegionCode {
    pub fn name(self) -> &'static str {
        match self {
            RegionCode::Or => "us-west-2",
            RegionCode::Ca => "us-west-1",
            RegionCode::Va => "us-east-1",
        }
    }
}

/// Tags of one resource, keyed by tag name.
///
/// Built from the SDK's `{ key, value }` lists: entries without a key are
/// dropped and a missing value reads as the empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagMap(BTreeMap<String, String>);

impl TagMap {
    pub fn from_sdk<'a>(pairs: impl IntoIterator<Item = (Option<&'a str>, Option<&'a str>)>) -> Self {
        Self(
            pairs
                .into_iter()
                .filter_map(|(k, v)| k.map(|k| (k.to_string(), v.unwrap_or_default().to_string())))
                .collect(),
        )
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TagMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// One region's worth of AWS clients for a single invocation
pub struct AwsRegion {
    code: RegionCode,
    account_id: String,
    sdk_config: SdkConfig,
}

impl AwsRegion {
    /// Load the SDK config with the given credentials, resolving the account
    /// id through STS when the credentials file does not carry one.
    pub async fn connect(code: RegionCode, auth: &AuthConfig) -> Result<Self> {
        let credentials = Credentials::new(
            auth.access_key_id.clone(),
            auth.secret_access_key.clone(),
            None,
            None,
            "auth-file",
        );
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(code.name()))
            .credentials_provider(credentials)
            .load()
            .await;

        let account_id = match &auth.account_id {
            Some(id) => id.clone(),
            None => sts::caller_account(&sdk_config).await?,
        };
        debug!(region = code.name(), account_id = %account_id, "connected");

        Ok(Self {
            code,
            account_id,
            sdk_config,
        })
    }

    pub fn name(&self) -> &'static str {
        self.code.name()
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn ec2(&self) -> ec2::Ec2 {
        let config = aws_sdk_ec2::config::Builder::from(&self.sdk_config).build();
        ec2::Ec2::new(aws_sdk_ec2::Client::from_conf(config))
    }

    pub fn rds(&self) -> rds::Rds {
        rds::Rds::new(aws_sdk_rds::Client::new(&self.sdk_config))
    }

    pub fn elb(&self) -> elb::Elb {
        elb::Elb::new(aws_sdk_elasticloadbalancing::Client::new(&self.sdk_config))
    }

    pub fn s3(&self) -> s3::S3 {
        s3::S3::new(aws_sdk_s3::Client::new(&self.sdk_config))
    }

    pub fn cloudwatch(&self) -> cloudwatch::Metrics {
        cloudwatch::Metrics::new(aws_sdk_cloudwatch::Client::new(&self.sdk_config))
    }

    pub fn sns(&self) -> sns::Sns {
        sns::Sns::new(aws_sdk_sns::Client::new(&self.sdk_config))
    }
}

impl std::fmt::Debug for AwsRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsRegion")
            .field("region", &self.name())
            .field("account_id", &self.account_id)
            .finish_non_exhaustive()
    }
}

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_ec2 as ec2;
use chrono::{DateTime, SecondsFormat, Utc};
use ec2::types::{
    IamInstanceProfileSpecification, InstanceType, IpPermission, IpRange, Placement, Tag,
};
use ec2::Client;
use std::fmt;

use super::{tags, TagMap};
use crate::select::Candidate;
use crate::template::LaunchSpec;

pub const TERMINATED: &str = "terminated";

/// An EC2 instance as listed by the provider, plus its tags
#[derive(Debug, Clone)]
pub struct Instance {
    descriptor: ec2::types::Instance,
    tags: TagMap,
}

impl Instance {
    pub fn new(descriptor: ec2::types::Instance) -> Self {
        let tags = TagMap::from_sdk(descriptor.tags().iter().map(|t| (t.key(), t.value())));
        Self { descriptor, tags }
    }

    pub fn id(&self) -> &str {
        self.descriptor.instance_id().unwrap_or_default()
    }

    /// State as of the listing this handle came from
    pub fn state(&self) -> &str {
        self.descriptor
            .state()
            .and_then(|s| s.name())
            .map(|n| n.as_str().trim())
            .unwrap_or_default()
    }

    pub fn public_ip(&self) -> Option<&str> {
        self.descriptor
            .public_ip_address()
            .filter(|ip| !ip.is_empty())
    }

    pub fn private_ip(&self) -> Option<&str> {
        self.descriptor
            .private_ip_address()
            .filter(|ip| !ip.is_empty())
    }

    pub fn tags(&self) -> &TagMap {
        &self.tags
    }
}

impl Candidate for Instance {
    fn id(&self) -> &str {
        Instance::id(self)
    }

    fn launched_at(&self) -> Option<DateTime<Utc>> {
        self.descriptor
            .launch_time()
            .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos()))
    }

    fn describe_row(&self) -> String {
        let launched = self
            .launched_at()
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_default();
        format!(
            "{} / {} / {} / {}",
            self.private_ip().unwrap_or_default(),
            self.public_ip().unwrap_or_default(),
            self.id(),
            launched
        )
    }
}

/// Which instances a lookup should return
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceFilter {
    /// Both tags must equal the given values; `None` only matches an
    /// instance that lacks the tag
    Tags {
        environment: Option<String>,
        purpose: Option<String>,
    },
    Id(String),
}

impl InstanceFilter {
    pub fn matches(&self, instance: &Instance) -> bool {
        match self {
            InstanceFilter::Tags {
                environment,
                purpose,
            } => {
                instance.tags.get(tags::ENVIRONMENT) == environment.as_deref()
                    && instance.tags.get(tags::PURPOSE) == purpose.as_deref()
            }
            InstanceFilter::Id(id) => instance.id() == id,
        }
    }
}

impl fmt::Display for InstanceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceFilter::Tags {
                environment,
                purpose,
            } => write!(
                f,
                "environment={} purpose={}",
                environment.as_deref().unwrap_or("-"),
                purpose.as_deref().unwrap_or("-")
            ),
            InstanceFilter::Id(id) => write!(f, "id={id}"),
        }
    }
}

/// Address to attach once an instance is running
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElasticAddress {
    PublicIp(String),
    Allocation(String),
}

/// The EC2 calls the lifecycle logic depends on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Compute: Send + Sync {
    async fn list_instances(&self) -> Result<Vec<Instance>>;

    async fn describe_instance(&self, id: &str) -> Result<Option<Instance>>;

    async fn start_instance(&self, id: &str) -> Result<()>;

    async fn stop_instance(&self, id: &str) -> Result<()>;

    async fn terminate_instance(&self, id: &str) -> Result<()>;

    async fn associate_address(&self, id: &str, address: ElasticAddress) -> Result<()>;

    /// CIDRs currently allowed on `group_id` for tcp `port`
    async fn ingress_cidrs(&self, group_id: &str, port: i32) -> Result<Vec<String>>;

    async fn authorize_ingress(&self, group_id: &str, port: i32, cidr: &str) -> Result<()>;

    async fn revoke_ingress(&self, group_id: &str, port: i32, cidr: &str) -> Result<()>;

    async fn run_instance(&self, spec: LaunchSpec) -> Result<Instance>;

    async fn create_tags(&self, id: &str, tags: TagMap) -> Result<()>;

    async fn set_security_groups(&self, id: &str, groups: Vec<String>) -> Result<()>;
}

/// All non-terminated instances accepted by `filter`, in listing order.
pub async fn find_instances<C: Compute>(compute: &C, filter: &InstanceFilter) -> Result<Vec<Instance>> {
    let instances = compute.list_instances().await?;
    Ok(instances
        .into_iter()
        .filter(|i| i.state() != TERMINATED && filter.matches(i))
        .collect())
}

/// Keep instances whose cached state is one of `states`; empty keeps all.
pub fn filter_by_state(instances: Vec<Instance>, states: &[&str]) -> Vec<Instance> {
    if states.is_empty() {
        return instances;
    }
    instances
        .into_iter()
        .filter(|i| states.contains(&i.state()))
        .collect()
}

pub struct Ec2 {
    client: Client,
}

impl Ec2 {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn tcp_permission(port: i32, cidr: &str) -> IpPermission {
        IpPermission::builder()
            .ip_protocol("tcp")
            .from_port(port)
            .to_port(port)
            .ip_ranges(IpRange::builder().cidr_ip(cidr).build())
            .build()
    }
}

#[async_trait]
impl Compute for Ec2 {
    async fn list_instances(&self) -> Result<Vec<Instance>> {
        let mut pages = self.client.describe_instances().into_paginator().send();
        let mut instances = vec![];
        while let Some(page) = pages.next().await {
            let page = page.context("failed to describe ec2 instances")?;
            instances.extend(
                page.reservations()
                    .iter()
                    .flat_map(|r| r.instances())
                    .cloned()
                    .map(Instance::new),
            );
        }
        Ok(instances)
    }

    async fn describe_instance(&self, id: &str) -> Result<Option<Instance>> {
        let res = self
            .client
            .describe_instances()
            .instance_ids(id)
            .send()
            .await
            .with_context(|| format!("failed to describe ec2 instance {id}"))?;
        Ok(res
            .reservations()
            .iter()
            .flat_map(|r| r.instances())
            .find(|i| i.instance_id() == Some(id))
            .cloned()
            .map(Instance::new))
    }

    async fn start_instance(&self, id: &str) -> Result<()> {
        self.client
            .start_instances()
            .instance_ids(id)
            .send()
            .await
            .with_context(|| format!("failed to start {id}"))?;
        Ok(())
    }

    async fn stop_instance(&self, id: &str) -> Result<()> {
        self.client
            .stop_instances()
            .instance_ids(id)
            .send()
            .await
            .with_context(|| format!("failed to stop {id}"))?;
        Ok(())
    }

    async fn terminate_instance(&self, id: &str) -> Result<()> {
        self.client
            .terminate_instances()
            .instance_ids(id)
            .send()
            .await
            .with_context(|| format!("failed to terminate {id}"))?;
        Ok(())
    }

    async fn associate_address(&self, id: &str, address: ElasticAddress) -> Result<()> {
        let req = self.client.associate_address().instance_id(id);
        let req = match &address {
            ElasticAddress::PublicIp(ip) => req.public_ip(ip),
            ElasticAddress::Allocation(alloc) => req.allocation_id(alloc),
        };
        req.send()
            .await
            .with_context(|| format!("failed to associate {address:?} with {id}"))?;
        Ok(())
    }

    async fn ingress_cidrs(&self, group_id: &str, port: i32) -> Result<Vec<String>> {
        let res = self
            .client
            .describe_security_groups()
            .group_ids(group_id)
            .send()
            .await
            .with_context(|| format!("failed to describe security group {group_id}"))?;
        Ok(res
            .security_groups()
            .iter()
            .flat_map(|g| g.ip_permissions())
            .filter(|p| {
                p.ip_protocol() == Some("tcp")
                    && p.from_port() == Some(port)
                    && p.to_port() == Some(port)
            })
            .flat_map(|p| p.ip_ranges())
            .filter_map(|r| r.cidr_ip())
            .map(String::from)
            .collect())
    }

    async fn authorize_ingress(&self, group_id: &str, port: i32, cidr: &str) -> Result<()> {
        self.client
            .authorize_security_group_ingress()
            .group_id(group_id)
            .ip_permissions(Self::tcp_permission(port, cidr))
            .send()
            .await
            .with_context(|| format!("failed to authorize {cidr} on {group_id}:{port}"))?;
        Ok(())
    }

    async fn revoke_ingress(&self, group_id: &str, port: i32, cidr: &str) -> Result<()> {
        self.client
            .revoke_security_group_ingress()
            .group_id(group_id)
            .ip_permissions(Self::tcp_permission(port, cidr))
            .send()
            .await
            .with_context(|| format!("failed to revoke {cidr} on {group_id}:{port}"))?;
        Ok(())
    }

    async fn run_instance(&self, spec: LaunchSpec) -> Result<Instance> {
        let mut req = self
            .client
            .run_instances()
            .image_id(&spec.image_id)
            .instance_type(InstanceType::from(spec.instance_type.as_str()))
            .min_count(spec.min_count)
            .max_count(spec.max_count)
            .set_key_name(spec.key_name.clone())
            .set_subnet_id(spec.subnet_id.clone());
        if let Some(zone) = &spec.availability_zone {
            req = req.placement(Placement::builder().availability_zone(zone).build());
        }
        if let Some(profile) = &spec.iam_instance_profile {
            req = req.iam_instance_profile(
                IamInstanceProfileSpecification::builder()
                    .name(profile)
                    .build(),
            );
        }

        let res = req
            .send()
            .await
            .with_context(|| format!("failed to run instance from {}", spec.image_id))?;
        let instance = res
            .instances()
            .first()
            .cloned()
            .context("error creating instance using template: no instance returned")?;
        Ok(Instance::new(instance))
    }

    async fn create_tags(&self, id: &str, tags: TagMap) -> Result<()> {
        let sdk_tags = tags
            .iter()
            .map(|(k, v)| Tag::builder().key(k).value(v).build())
            .collect();
        self.client
            .create_tags()
            .resources(id)
            .set_tags(Some(sdk_tags))
            .send()
            .await
            .with_context(|| format!("failed to tag {id}"))?;
        Ok(())
    }

    async fn set_security_groups(&self, id: &str, groups: Vec<String>) -> Result<()> {
        self.client
            .modify_instance_attribute()
            .instance_id(id)
            .set_groups(Some(groups))
            .send()
            .await
            .with_context(|| format!("failed to set security groups on {id}"))?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use ec2::primitives::DateTime as AwsDateTime;
    use ec2::types::{InstanceState, InstanceStateName};

    pub fn instance(
        id: &str,
        state: &str,
        public_ip: Option<&str>,
        launched: i64,
        tags: &[(&str, &str)],
    ) -> Instance {
        let mut b = ec2::types::Instance::builder()
            .instance_id(id)
            .private_ip_address("10.0.0.5")
            .launch_time(AwsDateTime::from_secs(launched))
            .state(
                InstanceState::builder()
                    .name(InstanceStateName::from(state))
                    .build(),
            );
        if let Some(ip) = public_ip {
            b = b.public_ip_address(ip);
        }
        for (k, v) in tags {
            b = b.tags(Tag::builder().key(*k).value(*v).build());
        }
        Instance::new(b.build())
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::instance;
    use super::*;

    fn tagged(id: &str, state: &str, env: &str, purpose: &str) -> Instance {
        instance(
            id,
            state,
            None,
            0,
            &[(tags::ENVIRONMENT, env), (tags::PURPOSE, purpose)],
        )
    }

    #[test]
    fn test_instance_handle() {
        let i = instance("i-0522030c", "running", Some("54.1.2.3"), 1_400_000_000, &[("user", "ubuntu")]);
        assert_eq!(i.id(), "i-0522030c");
        assert_eq!(i.state(), "running");
        assert_eq!(i.public_ip(), Some("54.1.2.3"));
        assert_eq!(i.tags().get("user"), Some("ubuntu"));
        assert_eq!(
            i.describe_row(),
            "10.0.0.5 / 54.1.2.3 / i-0522030c / 2014-05-13T16:53:20Z"
        );
    }

    #[test]
    fn test_tag_filter() {
        let filter = InstanceFilter::Tags {
            environment: Some("test".into()),
            purpose: Some("app32".into()),
        };
        assert!(filter.matches(&tagged("i-1", "running", "test", "app32")));
        assert!(!filter.matches(&tagged("i-2", "running", "test", "hub")));
        assert!(!filter.matches(&instance("i-3", "running", None, 0, &[])));
    }

    #[test]
    fn test_tag_filter_missing_value_matches_untagged() {
        let filter = InstanceFilter::Tags {
            environment: None,
            purpose: None,
        };
        assert!(filter.matches(&instance("i-3", "running", None, 0, &[])));
        assert!(!filter.matches(&tagged("i-1", "running", "test", "app32")));
    }

    #[tokio::test]
    async fn test_find_skips_terminated() {
        let mut compute = MockCompute::new();
        compute.expect_list_instances().returning(|| {
            Ok(vec![
                tagged("i-1", "running", "prod", "app"),
                tagged("i-2", "terminated", "prod", "app"),
                tagged("i-3", "stopped", "prod", "app"),
                tagged("i-4", "running", "prod", "hub"),
            ])
        });
        let filter = InstanceFilter::Tags {
            environment: Some("prod".into()),
            purpose: Some("app".into()),
        };
        let found = find_instances(&compute, &filter).await.unwrap();
        let ids: Vec<_> = found.iter().map(|i| i.id()).collect();
        assert_eq!(ids, ["i-1", "i-3"]);

        let running = filter_by_state(found, &["running"]);
        assert_eq!(running.len(), 1);
    }

    #[tokio::test]
    async fn test_find_by_id() {
        let mut compute = MockCompute::new();
        compute
            .expect_list_instances()
            .returning(|| Ok(vec![tagged("i-1", "running", "a", "b"), tagged("i-2", "running", "a", "b")]));
        let found = find_instances(&compute, &InstanceFilter::Id("i-2".into()))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), "i-2");
    }

    #[test]
    fn test_filter_by_state_empty_keeps_all() {
        let all = vec![
            tagged("i-1", "running", "a", "b"),
            tagged("i-2", "stopped", "a", "b"),
        ];
        assert_eq!(filter_by_state(all, &[]).len(), 2);
    }
}

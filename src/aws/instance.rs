//! Start / stop / terminate / connect, and the tag-driven attachments that
//! go with them (elastic ip, load balancer, security group ingress).

use anyhow::{anyhow, Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::str::FromStr;
use tracing::{info, warn};

use super::ec2::{Compute, ElasticAddress, Instance};
use super::elb::LoadBalancing;
use super::{tags, TagMap};
use crate::template::InstanceTemplate;
use crate::wait::{poll_until, INSTANCE_POLL_INTERVAL};

pub const RUNNING: &str = "running";
pub const STOPPED: &str = "stopped";

/// Result of a state transition request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Done,
    /// Instance was not in the required state; nothing was changed
    Skipped { state: String },
}

/// A `group_id:port` ingress rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressRule {
    pub group_id: String,
    pub port: i32,
}

impl FromStr for IngressRule {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        lazy_static! {
            static ref RULE: Regex = Regex::new(r"^\s*(sg-[0-9A-Za-z]+):(\d{1,5})\s*$").unwrap();
        }
        let caps = RULE
            .captures(s)
            .ok_or_else(|| anyhow!("invalid ingress rule {s:?}, expected group_id:port"))?;
        Ok(Self {
            group_id: caps[1].to_string(),
            port: caps[2].parse()?,
        })
    }
}

impl IngressRule {
    /// Rules listed in a `security_group_ingress` tag value
    pub fn parse_list(value: &str) -> Result<Vec<Self>> {
        value
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(str::parse)
            .collect()
    }
}

/// Lifecycle operations for one region's compute and load balancer clients
pub struct Lifecycle<'a, C, L> {
    compute: &'a C,
    elb: &'a L,
    region: &'a str,
}

impl<'a, C: Compute, L: LoadBalancing> Lifecycle<'a, C, L> {
    pub fn new(compute: &'a C, elb: &'a L, region: &'a str) -> Self {
        Self {
            compute,
            elb,
            region,
        }
    }

    /// State straight from the provider; empty when the instance is gone
    pub async fn fresh_state(&self, id: &str) -> Result<String> {
        let instance = self.compute.describe_instance(id).await?;
        Ok(instance.map(|i| i.state().to_string()).unwrap_or_default())
    }

    /// Poll every 10s until `desired`. There is no timeout.
    async fn wait_for_state(&self, id: &str, desired: &str) -> Result<()> {
        poll_until(INSTANCE_POLL_INTERVAL, None, || async move {
            let state = self.fresh_state(id).await?;
            info!("Waiting for instance: {}://{id} - state: {state}", self.region);
            Ok(state == desired)
        })
        .await?;
        Ok(())
    }

    pub async fn start(&self, instance: &Instance, wait: bool) -> Result<Transition> {
        let id = instance.id();
        let state = self.fresh_state(id).await?;
        if state != STOPPED {
            warn!(
                "Instance cannot be started - {}://{id} is in the state: {state}",
                self.region
            );
            return Ok(Transition::Skipped { state });
        }

        info!("Starting instance: {}://{id}", self.region);
        self.compute.start_instance(id).await?;
        if wait {
            self.wait_for_state(id, RUNNING).await?;
        }

        // a started instance usually comes back with a new public ip
        let current = self
            .compute
            .describe_instance(id)
            .await?
            .unwrap_or_else(|| instance.clone());
        self.attach(&current).await?;
        Ok(Transition::Done)
    }

    pub async fn stop(&self, instance: &Instance, wait: bool) -> Result<Transition> {
        let id = instance.id();
        let state = self.fresh_state(id).await?;
        if state != RUNNING {
            warn!(
                "Instance cannot be stopped - {}://{id} is in the state: {state}",
                self.region
            );
            return Ok(Transition::Skipped { state });
        }

        self.eject(instance).await?;
        info!("Stopping instance: {}://{id}", self.region);
        self.compute.stop_instance(id).await?;
        if wait {
            self.wait_for_state(id, STOPPED).await?;
            info!("Instance stopped: {}://{id}", self.region);
        }
        Ok(Transition::Done)
    }

    /// Fire and forget; the instance is ejected from its environment first.
    pub async fn terminate(&self, instance: &Instance) -> Result<()> {
        self.eject(instance).await?;
        info!("Terminating instance: {}://{}", self.region, instance.id());
        self.compute.terminate_instance(instance.id()).await
    }

    /// `user@ip` to hand to ssh, or `None` when the instance is not running.
    pub async fn connect_target(
        &self,
        instance: &Instance,
        default_user: Option<&str>,
    ) -> Result<Option<String>> {
        let id = instance.id();
        let state = self.fresh_state(id).await?;
        if state != RUNNING {
            warn!(
                "Cannot connect, instance: {}://{id} due to its state: {state}",
                self.region
            );
            return Ok(None);
        }

        let ip = instance
            .public_ip()
            .or(instance.private_ip())
            .with_context(|| format!("instance {id} has no ip address"))?;
        let user = instance
            .tags()
            .get(tags::USER)
            .filter(|u| !u.is_empty())
            .or(default_user);
        Ok(Some(match user {
            Some(user) => format!("{user}@{ip}"),
            None => ip.to_string(),
        }))
    }

    /// Apply the tag-driven attachments of a (re)started instance.
    ///
    /// Ingress rules are opened for the address the instance holds once any
    /// elastic ip is associated, so `eject` later revokes the same CIDR.
    async fn attach(&self, instance: &Instance) -> Result<()> {
        let id = instance.id();
        let labels = instance.tags();
        let public_ip = if let Some(ip) = labels.get(tags::ELASTIC_IP) {
            self.compute
                .associate_address(id, ElasticAddress::PublicIp(ip.to_string()))
                .await?;
            info!("Associated ip: {ip} with instance: {id}");
            Some(ip.to_string())
        } else if let Some(alloc) = labels.get(tags::ELASTIC_IP_ALLOCATION_ID) {
            self.compute
                .associate_address(id, ElasticAddress::Allocation(alloc.to_string()))
                .await?;
            info!("Associated allocation id: {alloc} with instance: {id}");
            self.compute
                .describe_instance(id)
                .await?
                .and_then(|i| i.public_ip().map(String::from))
        } else {
            instance.public_ip().map(String::from)
        };
        if let Some(lb) = labels.get(tags::ELASTIC_LB) {
            info!("Adding instance: {id} to '{lb}' load balancer");
            self.add_to_lb(id, lb).await?;
        }
        if let Some(rules) = labels.get(tags::SECURITY_GROUP_INGRESS) {
            match public_ip.as_deref() {
                Some(ip) => {
                    for rule in IngressRule::parse_list(rules)? {
                        self.authorize_ingress(&rule, ip).await?;
                    }
                }
                None => warn!("Instance {id} has no public ip; ingress rules not opened"),
            }
        }
        Ok(())
    }

    /// Remove an instance from its load balancer and close its ingress rules.
    pub async fn eject(&self, instance: &Instance) -> Result<()> {
        let id = instance.id();
        let labels = instance.tags();
        if let Some(lb) = labels.get(tags::ELASTIC_LB) {
            info!("Removing instance: {id} from '{lb}' load balancer");
            self.remove_from_lb(id, lb).await?;
        }
        if let (Some(rules), Some(ip)) = (labels.get(tags::SECURITY_GROUP_INGRESS), instance.public_ip()) {
            for rule in IngressRule::parse_list(rules)? {
                self.revoke_ingress(&rule, ip).await?;
            }
        }
        Ok(())
    }

    pub async fn add_to_lb(&self, id: &str, lb_name: &str) -> Result<()> {
        self.elb.register(lb_name, id).await
    }

    /// Deregister only if currently registered.
    pub async fn remove_from_lb(&self, id: &str, lb_name: &str) -> Result<()> {
        let registered = self.elb.registered_instances(lb_name).await?;
        if registered.iter().any(|i| i == id) {
            self.elb.deregister(lb_name, id).await?;
        }
        Ok(())
    }

    /// Open `rule` to `public_ip/32`. Returns false if it was already open.
    pub async fn authorize_ingress(&self, rule: &IngressRule, public_ip: &str) -> Result<bool> {
        let cidr = format!("{public_ip}/32");
        let existing = self.compute.ingress_cidrs(&rule.group_id, rule.port).await?;
        if existing.contains(&cidr) {
            return Ok(false);
        }
        info!("Authorizing {cidr} on {}:{}", rule.group_id, rule.port);
        self.compute
            .authorize_ingress(&rule.group_id, rule.port, &cidr)
            .await?;
        Ok(true)
    }

    /// Close `rule` for `public_ip/32`. Returns false if it was not open.
    pub async fn revoke_ingress(&self, rule: &IngressRule, public_ip: &str) -> Result<bool> {
        let cidr = format!("{public_ip}/32");
        let existing = self.compute.ingress_cidrs(&rule.group_id, rule.port).await?;
        if !existing.contains(&cidr) {
            return Ok(false);
        }
        info!("Revoking {cidr} on {}:{}", rule.group_id, rule.port);
        self.compute
            .revoke_ingress(&rule.group_id, rule.port, &cidr)
            .await?;
        Ok(true)
    }

    /// Launch from a template, then tag, set security groups and register.
    pub async fn run(
        &self,
        template: &InstanceTemplate,
        environment: Option<&str>,
        purpose: Option<&str>,
    ) -> Result<Instance> {
        for rule in &template.ingress {
            rule.parse::<IngressRule>()?;
        }
        let instance = self.compute.run_instance(template.template.clone()).await?;
        let id = instance.id().to_string();
        info!("Launched instance: {}://{id}", self.region);

        let mut new_tags = TagMap::default();
        new_tags.insert(tags::NAME, &template.name);
        if let Some(env) = environment.or(template.environment.as_deref()) {
            new_tags.insert(tags::ENVIRONMENT, env);
        }
        if let Some(purpose) = purpose.or(template.purpose.as_deref()) {
            new_tags.insert(tags::PURPOSE, purpose);
        }
        if let Some(user) = &template.user {
            new_tags.insert(tags::USER, user);
        }
        if let Some(lb) = &template.elastic_lb {
            new_tags.insert(tags::ELASTIC_LB, lb);
        }
        if !template.ingress.is_empty() {
            new_tags.insert(tags::SECURITY_GROUP_INGRESS, template.ingress.join(","));
        }
        self.compute.create_tags(&id, new_tags).await?;

        if !template.security_group_ids.is_empty() {
            self.compute
                .set_security_groups(&id, template.security_group_ids.clone())
                .await?;
        }
        if let Some(lb) = &template.elb {
            self.add_to_lb(&id, lb).await?;
        }
        Ok(instance)
    }
}

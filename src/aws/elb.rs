//! Classic load balancer membership

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_elasticloadbalancing::{types::Instance, Client};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LoadBalancing: Send + Sync {
    /// Ids of instances registered with `lb_name`; empty when it does not exist
    async fn registered_instances(&self, lb_name: &str) -> Result<Vec<String>>;

    async fn register(&self, lb_name: &str, instance_id: &str) -> Result<()>;

    async fn deregister(&self, lb_name: &str, instance_id: &str) -> Result<()>;
}

pub struct Elb {
    client: Client,
}

impl Elb {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LoadBalancing for Elb {
    async fn registered_instances(&self, lb_name: &str) -> Result<Vec<String>> {
        let res = self
            .client
            .describe_load_balancers()
            .load_balancer_names(lb_name)
            .send()
            .await
            .with_context(|| format!("failed to describe load balancer {lb_name}"))?;
        Ok(res
            .load_balancer_descriptions()
            .first()
            .map(|lb| {
                lb.instances()
                    .iter()
                    .filter_map(|i| i.instance_id())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn register(&self, lb_name: &str, instance_id: &str) -> Result<()> {
        self.client
            .register_instances_with_load_balancer()
            .load_balancer_name(lb_name)
            .instances(Instance::builder().instance_id(instance_id).build())
            .send()
            .await
            .with_context(|| format!("failed to register {instance_id} with {lb_name}"))?;
        Ok(())
    }

    async fn deregister(&self, lb_name: &str, instance_id: &str) -> Result<()> {
        self.client
            .deregister_instances_from_load_balancer()
            .load_balancer_name(lb_name)
            .instances(Instance::builder().instance_id(instance_id).build())
            .send()
            .await
            .with_context(|| format!("failed to deregister {instance_id} from {lb_name}"))?;
        Ok(())
    }
}

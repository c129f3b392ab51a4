use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_rds::{
    types::{DbSnapshot, Tag},
    Client,
};

use super::TagMap;
use crate::template::RestoreRequest;

/// An RDS instance as listed by the provider, plus its tags
#[derive(Debug, Clone)]
pub struct DbInstance {
    descriptor: aws_sdk_rds::types::DbInstance,
    tags: TagMap,
}

impl DbInstance {
    pub fn new(descriptor: aws_sdk_rds::types::DbInstance) -> Self {
        let tags = TagMap::from_sdk(descriptor.tag_list().iter().map(|t| (t.key(), t.value())));
        Self { descriptor, tags }
    }

    pub fn id(&self) -> &str {
        self.descriptor.db_instance_identifier().unwrap_or_default()
    }

    pub fn status(&self) -> &str {
        self.descriptor.db_instance_status().unwrap_or_default()
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.descriptor.endpoint().and_then(|e| e.address())
    }

    pub fn arn(&self) -> Option<&str> {
        self.descriptor.db_instance_arn()
    }

    pub fn tags(&self) -> &TagMap {
        &self.tags
    }
}

/// The RDS calls the database lifecycle depends on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Databases: Send + Sync {
    async fn list_db_instances(&self) -> Result<Vec<DbInstance>>;

    async fn list_db_snapshots(&self) -> Result<Vec<DbSnapshot>>;

    async fn restore_from_snapshot(
        &self,
        request: RestoreRequest,
        snapshot_id: &str,
    ) -> Result<DbInstance>;

    async fn add_tags(&self, arn: &str, tags: TagMap) -> Result<()>;

    async fn set_security_groups(&self, id: &str, groups: Vec<String>) -> Result<()>;

    async fn delete_db_instance(&self, id: &str, final_snapshot_id: &str) -> Result<()>;

    async fn delete_db_snapshot(&self, snapshot_id: &str) -> Result<()>;
}

pub struct Rds {
    client: Client,
}

impl Rds {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Databases for Rds {
    async fn list_db_instances(&self) -> Result<Vec<DbInstance>> {
        let mut pages = self.client.describe_db_instances().into_paginator().send();
        let mut instances = vec![];
        while let Some(page) = pages.next().await {
            let page = page.context("failed to describe db instances")?;
            instances.extend(page.db_instances().iter().cloned().map(DbInstance::new));
        }
        Ok(instances)
    }

    async fn list_db_snapshots(&self) -> Result<Vec<DbSnapshot>> {
        let mut pages = self.client.describe_db_snapshots().into_paginator().send();
        let mut snapshots = vec![];
        while let Some(page) = pages.next().await {
            let page = page.context("failed to describe db snapshots")?;
            snapshots.extend(page.db_snapshots().iter().cloned());
        }
        Ok(snapshots)
    }

    async fn restore_from_snapshot(
        &self,
        request: RestoreRequest,
        snapshot_id: &str,
    ) -> Result<DbInstance> {
        let res = self
            .client
            .restore_db_instance_from_db_snapshot()
            .db_instance_identifier(&request.db_instance_identifier)
            .db_snapshot_identifier(snapshot_id)
            .set_db_instance_class(request.db_instance_class)
            .set_availability_zone(request.availability_zone)
            .set_db_subnet_group_name(request.db_subnet_group_name)
            .set_multi_az(request.multi_az)
            .set_publicly_accessible(request.publicly_accessible)
            .set_port(request.port)
            .set_storage_type(request.storage_type)
            .set_auto_minor_version_upgrade(request.auto_minor_version_upgrade)
            .send()
            .await
            .with_context(|| {
                format!(
                    "failed to restore {} from {snapshot_id}",
                    request.db_instance_identifier
                )
            })?;
        let instance = res
            .db_instance()
            .cloned()
            .context("restore response carries no db instance")?;
        Ok(DbInstance::new(instance))
    }

    async fn add_tags(&self, arn: &str, tags: TagMap) -> Result<()> {
        let sdk_tags = tags
            .iter()
            .map(|(k, v)| Tag::builder().key(k).value(v).build())
            .collect();
        self.client
            .add_tags_to_resource()
            .resource_name(arn)
            .set_tags(Some(sdk_tags))
            .send()
            .await
            .with_context(|| format!("failed to tag {arn}"))?;
        Ok(())
    }

    async fn set_security_groups(&self, id: &str, groups: Vec<String>) -> Result<()> {
        self.client
            .modify_db_instance()
            .db_instance_identifier(id)
            .set_vpc_security_group_ids(Some(groups))
            .send()
            .await
            .with_context(|| format!("failed to modify security groups of {id}"))?;
        Ok(())
    }

    async fn delete_db_instance(&self, id: &str, final_snapshot_id: &str) -> Result<()> {
        self.client
            .delete_db_instance()
            .db_instance_identifier(id)
            .skip_final_snapshot(false)
            .final_db_snapshot_identifier(final_snapshot_id)
            .send()
            .await
            .with_context(|| format!("failed to delete database {id}"))?;
        Ok(())
    }

    async fn delete_db_snapshot(&self, snapshot_id: &str) -> Result<()> {
        self.client
            .delete_db_snapshot()
            .db_snapshot_identifier(snapshot_id)
            .send()
            .await
            .with_context(|| format!("failed to delete snapshot {snapshot_id}"))?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::db;

    #[test]
    fn test_db_handle() {
        let d = db("testapp", "available", &[("environment", "test")]);
        assert_eq!(d.id(), "testapp");
        assert_eq!(d.status(), "available");
        assert_eq!(d.endpoint(), Some("testapp.abc.rds.amazonaws.com"));
        assert_eq!(d.tags().get("environment"), Some("test"));
        assert!(d.arn().is_none());
    }
}

//! RDS lifecycle: create from snapshot, delete, wait, snapshot purge.

use anyhow::Result;
use aws_sdk_rds::types::DbSnapshot;
use chrono::{DateTime, Local};
use std::time::Duration;
use tracing::{info, warn};

use super::rds::{DbInstance, Databases};
use super::sts::rds_db_arn;
use super::{tags, TagMap};
use crate::error::Error;
use crate::template::DbTemplate;
use crate::wait::{poll_until, DB_POLL_INTERVAL};

pub const AVAILABLE: &str = "available";
pub const MANUAL: &str = "manual";

/// Which databases a lookup should return.
///
/// The id must match when given; both tags must match when both are given.
/// A filter with neither matches nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DbFilter {
    pub instance_id: Option<String>,
    pub environment: Option<String>,
    pub purpose: Option<String>,
}

impl DbFilter {
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            instance_id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, db: &DbInstance) -> bool {
        let by_tags = match (&self.environment, &self.purpose) {
            (Some(env), Some(purpose)) => Some(
                db.tags().get(tags::ENVIRONMENT) == Some(env.as_str())
                    && db.tags().get(tags::PURPOSE) == Some(purpose.as_str()),
            ),
            _ => None,
        };
        let by_id = self.instance_id.as_deref().map(|id| db.id() == id);
        match (by_id, by_tags) {
            (None, None) => false,
            (id, tags) => id.unwrap_or(true) && tags.unwrap_or(true),
        }
    }

    fn describe(&self) -> String {
        format!(
            "id={} environment={} purpose={}",
            self.instance_id.as_deref().unwrap_or("-"),
            self.environment.as_deref().unwrap_or("-"),
            self.purpose.as_deref().unwrap_or("-")
        )
    }
}

pub async fn find_db_instances<D: Databases>(db: &D, filter: &DbFilter) -> Result<Vec<DbInstance>> {
    let instances = db.list_db_instances().await?;
    Ok(instances.into_iter().filter(|i| filter.matches(i)).collect())
}

fn snapshot_secs(s: &DbSnapshot) -> Option<i64> {
    s.snapshot_create_time().map(|t| t.secs())
}

/// Most recent manual snapshot taken from `source_id` (first-seen wins ties).
pub fn latest_snapshot<'a>(snapshots: &'a [DbSnapshot], source_id: &str) -> Option<&'a DbSnapshot> {
    let mut latest: Option<&DbSnapshot> = None;
    for s in snapshots
        .iter()
        .filter(|s| s.snapshot_type() == Some(MANUAL) && s.db_instance_identifier() == Some(source_id))
    {
        let newer = match latest {
            None => true,
            Some(l) => snapshot_secs(s) > snapshot_secs(l),
        };
        if newer {
            latest = Some(s);
        }
    }
    latest
}

/// Manual snapshots of one instance, split by the keep-one-latest policy.
#[derive(Debug, Default)]
pub struct PurgePlan<'a> {
    pub keep: Vec<&'a DbSnapshot>,
    pub remove: Vec<&'a DbSnapshot>,
}

/// Every manual snapshot whose creation second equals the newest is kept;
/// the rest are removed.
pub fn plan_purge<'a>(snapshots: &'a [DbSnapshot], instance_id: &str) -> PurgePlan<'a> {
    let manual: Vec<_> = snapshots
        .iter()
        .filter(|s| s.snapshot_type() == Some(MANUAL) && s.db_instance_identifier() == Some(instance_id))
        .collect();
    let newest = manual.iter().filter_map(|s| snapshot_secs(s)).max();

    let mut plan = PurgePlan::default();
    for s in manual {
        if snapshot_secs(s) == newest {
            plan.keep.push(s);
        } else {
            plan.remove.push(s);
        }
    }
    plan
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub kept: Vec<String>,
    pub removed: Vec<String>,
    pub failed: Vec<String>,
}

impl PurgeReport {
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// `{id}-{yyyy-mm-dd-HH-MM-SS}`
pub fn final_snapshot_id(id: &str, now: DateTime<Local>) -> String {
    format!("{id}-{}", now.format("%Y-%m-%d-%H-%M-%S"))
}

fn describe_snapshot(s: &DbSnapshot) -> String {
    format!(
        "{}/{}",
        s.db_snapshot_identifier().unwrap_or_default(),
        s.snapshot_create_time()
            .map(|t| t.to_string())
            .unwrap_or_default()
    )
}

/// Database operations for one region
pub struct DbManager<'a, D> {
    db: &'a D,
    region: &'a str,
    account_id: &'a str,
}

impl<'a, D: Databases> DbManager<'a, D> {
    pub fn new(db: &'a D, region: &'a str, account_id: &'a str) -> Self {
        Self {
            db,
            region,
            account_id,
        }
    }

    pub async fn find(&self, filter: &DbFilter) -> Result<Vec<DbInstance>> {
        find_db_instances(self.db, filter).await
    }

    /// Exactly the first database matching `filter`
    pub async fn locate(&self, filter: &DbFilter) -> Result<DbInstance> {
        self.find(filter)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found("database", filter.describe()).into())
    }

    pub async fn latest_snapshot(&self, source_id: &str) -> Result<Option<DbSnapshot>> {
        let snapshots = self.db.list_db_snapshots().await?;
        Ok(latest_snapshot(&snapshots, source_id).cloned())
    }

    /// Restore a new database from the latest snapshot named in `template`.
    pub async fn create(&self, template: &DbTemplate, timeout: Duration) -> Result<DbInstance> {
        let id = template.opts.db_instance_identifier.as_str();
        if !self.find(&DbFilter::by_id(id)).await?.is_empty() {
            return Err(Error::precondition(format!("database {id}"), "already exists").into());
        }

        let source = template.snapshot_source();
        let snapshot = self
            .latest_snapshot(source)
            .await?
            .ok_or_else(|| Error::not_found("snapshot", format!("of {source}")))?;
        let snapshot_id = snapshot.db_snapshot_identifier().unwrap_or_default();
        info!(
            "Restoring: {id}, snapshot: {snapshot_id} from : {}",
            snapshot
                .snapshot_create_time()
                .map(|t| t.to_string())
                .unwrap_or_default()
        );

        let restored = self
            .db
            .restore_from_snapshot(template.opts.clone(), snapshot_id)
            .await?;
        let arn = restored
            .arn()
            .map(String::from)
            .unwrap_or_else(|| rds_db_arn(self.region, self.account_id, id));
        let new_tags: TagMap = [
            (tags::ENVIRONMENT, template.environment.as_str()),
            (tags::PURPOSE, template.purpose.as_str()),
        ]
        .into_iter()
        .collect();
        self.db.add_tags(&arn, new_tags).await?;

        if !self.wait(id, AVAILABLE, timeout).await? {
            return Err(Error::Timeout {
                resource: format!("database {id}"),
                desired: AVAILABLE.to_string(),
                timeout,
            }
            .into());
        }

        if !template.vpc_security_group_ids.is_empty() {
            self.db
                .set_security_groups(id, template.vpc_security_group_ids.clone())
                .await?;
        }
        self.locate(&DbFilter::by_id(id)).await
    }

    /// Delete, always taking a final snapshot. Returns the snapshot id.
    pub async fn delete(&self, instance: &DbInstance) -> Result<String> {
        info!("Deleting database: {}", instance.id());
        let snapshot_id = final_snapshot_id(instance.id(), Local::now());
        self.db
            .delete_db_instance(instance.id(), &snapshot_id)
            .await?;
        Ok(snapshot_id)
    }

    /// Poll every 20s until the database reports `desired`.
    ///
    /// Returns `false` on timeout. A database that cannot be found is an
    /// error.
    pub async fn wait(&self, id: &str, desired: &str, timeout: Duration) -> Result<bool> {
        let filter = DbFilter::by_id(id);
        let outcome = poll_until(DB_POLL_INTERVAL, Some(timeout), || {
            let filter = &filter;
            async move {
                let current = self.locate(filter).await?;
                info!(
                    "Database: {id} at {}.  Current status: {}",
                    current.endpoint().unwrap_or_default(),
                    current.status()
                );
                Ok(current.status() == desired)
            }
        })
        .await?;

        if !outcome.is_ready() {
            warn!("Timed out waiting for database: {id} to move into status: {desired}");
        }
        Ok(outcome.is_ready())
    }

    /// Delete all but the newest manual snapshots of `instance`.
    ///
    /// Individual deletion failures are logged and reported; the batch goes on.
    pub async fn purge_snapshots(&self, instance: &DbInstance) -> Result<PurgeReport> {
        let snapshots = self.db.list_db_snapshots().await?;
        let plan = plan_purge(&snapshots, instance.id());

        let mut report = PurgeReport::default();
        for s in plan.keep {
            info!("Keeping snapshot: {}", describe_snapshot(s));
            report.kept.push(s.db_snapshot_identifier().unwrap_or_default().to_string());
        }
        for s in plan.remove {
            let snapshot_id = s.db_snapshot_identifier().unwrap_or_default();
            info!("Removing snapshot: {}", describe_snapshot(s));
            match self.db.delete_db_snapshot(snapshot_id).await {
                Ok(()) => report.removed.push(snapshot_id.to_string()),
                Err(e) => {
                    warn!("Error removing snapshot: {}: {e:#}", describe_snapshot(s));
                    report.failed.push(snapshot_id.to_string());
                }
            }
        }
        Ok(report)
    }
}

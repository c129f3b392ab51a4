use anyhow::{bail, Context, Result};
use aws_manager::{
    aws::database::{DbFilter, DbManager, AVAILABLE},
    template::{self, DbTemplate},
};
use clap::Args;
use std::{path::PathBuf, time::Duration};
use tracing::info;

use super::{Globals, Session};

fn db_filter(globals: &Globals, id: Option<&str>) -> DbFilter {
    DbFilter {
        instance_id: id.map(String::from),
        environment: globals.environment.clone(),
        purpose: globals.purpose.clone(),
    }
}

#[derive(Args)]
pub struct DbArgs {
    /// Database instance identifier
    id: Option<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DbCmd {
    Delete,
    Status,
    Endpoint,
    PurgeSnapshots,
}

impl DbArgs {
    pub async fn main(self, cmd: DbCmd, session: &Session) -> Result<()> {
        let rds = session.region.rds();
        let manager = DbManager::new(&rds, session.region.name(), session.region.account_id());
        let db = manager
            .locate(&db_filter(&session.globals, self.id.as_deref()))
            .await?;

        match cmd {
            DbCmd::Delete => {
                let snapshot = manager.delete(&db).await?;
                info!("Final snapshot: {snapshot}");
                println!("{}", db.id());
            }
            DbCmd::Status => println!("{}", db.status()),
            DbCmd::Endpoint => {
                let endpoint = db
                    .endpoint()
                    .with_context(|| format!("database {} has no endpoint yet", db.id()))?;
                println!("{endpoint}");
            }
            DbCmd::PurgeSnapshots => {
                let report = manager.purge_snapshots(&db).await?;
                for id in &report.removed {
                    println!("{id}");
                }
                if !report.success() {
                    bail!(
                        "failed to remove {} snapshot(s): {}",
                        report.failed.len(),
                        report.failed.join(", ")
                    );
                }
            }
        }
        Ok(())
    }
}

#[derive(Args)]
pub struct WaitForDbArgs {
    /// Database instance identifier
    id: Option<String>,

    /// Status to wait for
    #[arg(long, short = 's', default_value = AVAILABLE)]
    status: String,

    /// Seconds to wait (default: from settings)
    #[arg(long, short = 't')]
    timeout: Option<u64>,
}

impl WaitForDbArgs {
    pub async fn main(self, session: &Session) -> Result<()> {
        let rds = session.region.rds();
        let manager = DbManager::new(&rds, session.region.name(), session.region.account_id());
        let id = match self.id {
            Some(id) => id,
            None => manager
                .locate(&db_filter(&session.globals, None))
                .await?
                .id()
                .to_string(),
        };
        let timeout = self
            .timeout
            .map(Duration::from_secs)
            .unwrap_or_else(|| session.settings.db_wait_timeout());

        if !manager.wait(&id, &self.status, timeout).await? {
            bail!("database {id} did not reach {} within {timeout:?}", self.status);
        }
        println!("{id}");
        Ok(())
    }
}

#[derive(Args)]
pub struct CreateDbArgs {
    /// Database template (YAML; `${VAR}` is replaced from the environment)
    template: PathBuf,
}

impl CreateDbArgs {
    pub async fn main(self, session: &Session) -> Result<()> {
        let mut template: DbTemplate = template::load(&self.template)?;
        if let Some(env) = &session.globals.environment {
            template.environment = env.clone();
        }
        if let Some(purpose) = &session.globals.purpose {
            template.purpose = purpose.clone();
        }

        let rds = session.region.rds();
        let manager = DbManager::new(&rds, session.region.name(), session.region.account_id());
        let db = manager
            .create(&template, session.settings.db_wait_timeout())
            .await?;
        println!("{}", db.endpoint().unwrap_or(db.id()));
        Ok(())
    }
}

mod bucket;
mod db;
mod instance;
mod notify;

pub use bucket::{DeleteObjectArgs, GetObjectArgs, ListBucketArgs, PutObjectArgs};
pub use db::{CreateDbArgs, DbArgs, DbCmd, WaitForDbArgs};
pub use instance::{InstanceArgs, InstanceCmd, RunInstanceArgs};
pub use notify::{MetricArgs, SnsArgs};

use anyhow::{bail, Result};
use aws_manager::{
    aws::{ec2::InstanceFilter, AwsRegion, RegionCode},
    config::Settings,
    select::Choose,
};
use clap::Args;

/// Flags shared by every command
#[derive(Args, Debug, Clone)]
pub struct Globals {
    /// Region: or (us-west-2), ca (us-west-1), va (us-east-1)
    #[arg(long, short = 'r', value_enum)]
    pub region: RegionCode,

    /// Value of the `environment` tag to select resources by
    #[arg(long, short = 'e')]
    pub environment: Option<String>,

    /// Value of the `purpose` tag to select resources by
    #[arg(long, short = 'p')]
    pub purpose: Option<String>,

    /// Pick among several matches without prompting
    #[arg(long, short = 'c', value_enum)]
    pub choose: Option<Choose>,

    /// Refuse to stop or terminate the last running instance of a group
    #[arg(long, short = 'k')]
    pub keep_one: bool,

    /// Return as soon as a start/stop request is accepted
    #[arg(long)]
    pub no_wait: bool,
}

/// Everything a command needs for one invocation
pub struct Session {
    pub globals: Globals,
    pub settings: Settings,
    pub region: AwsRegion,
}

impl Session {
    /// Tag filter when either tag flag is given, else the literal id.
    pub fn instance_filter(&self, id: Option<&str>) -> Result<InstanceFilter> {
        instance_filter(&self.globals, id)
    }
}

fn instance_filter(globals: &Globals, id: Option<&str>) -> Result<InstanceFilter> {
    if globals.environment.is_some() || globals.purpose.is_some() {
        return Ok(InstanceFilter::Tags {
            environment: globals.environment.clone(),
            purpose: globals.purpose.clone(),
        });
    }
    match id {
        Some(id) if id.len() > 2 => Ok(InstanceFilter::Id(id.to_string())),
        _ => bail!("select instances with --environment/--purpose or an instance id"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn globals(environment: Option<&str>, purpose: Option<&str>) -> Globals {
        Globals {
            region: RegionCode::Or,
            environment: environment.map(String::from),
            purpose: purpose.map(String::from),
            choose: None,
            keep_one: false,
            no_wait: false,
        }
    }

    #[test]
    fn test_filter_prefers_tags() {
        let f = instance_filter(&globals(Some("prod"), None), Some("i-4fcaed46")).unwrap();
        assert_eq!(
            f,
            InstanceFilter::Tags {
                environment: Some("prod".into()),
                purpose: None
            }
        );
    }

    #[test]
    fn test_filter_by_id() {
        let f = instance_filter(&globals(None, None), Some("i-4fcaed46")).unwrap();
        assert_eq!(f, InstanceFilter::Id("i-4fcaed46".into()));
        assert!(instance_filter(&globals(None, None), Some("1")).is_err());
        assert!(instance_filter(&globals(None, None), None).is_err());
    }
}

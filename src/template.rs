//! Instance and database templates.
//!
//! Templates are YAML (JSON parses too). `${NAME}` references are replaced
//! with environment variables before parsing.

use anyhow::{bail, Context, Result};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{de::DeserializeOwned, Deserialize};
use std::{env, fs::read_to_string, path::Path};

/// Parameters for `RunInstances`
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    pub image_id: String,
    pub instance_type: String,
    #[serde(default = "one")]
    pub min_count: i32,
    #[serde(default = "one")]
    pub max_count: i32,
    pub key_name: Option<String>,
    pub subnet_id: Option<String>,
    pub availability_zone: Option<String>,
    pub iam_instance_profile: Option<String>,
}

fn one() -> i32 {
    1
}

/// Everything needed to build a server from `run_instance`
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct InstanceTemplate {
    /// Value of the `Name` tag
    pub name: String,
    /// Login for `connect`, stored in the `user` tag
    pub user: Option<String>,
    pub environment: Option<String>,
    pub purpose: Option<String>,
    /// Stored in the `elastic_lb` tag so start/stop manage membership
    pub elastic_lb: Option<String>,
    /// Registered with once, right after launch
    pub elb: Option<String>,
    #[serde(default)]
    pub security_group_ids: Vec<String>,
    /// `group_id:port` rules, stored in the `security_group_ingress` tag
    #[serde(default)]
    pub ingress: Vec<String>,
    pub template: LaunchSpec,
}

/// Parameters for `RestoreDBInstanceFromDBSnapshot`
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct RestoreRequest {
    pub db_instance_identifier: String,
    pub db_instance_class: Option<String>,
    pub availability_zone: Option<String>,
    pub db_subnet_group_name: Option<String>,
    pub multi_az: Option<bool>,
    pub publicly_accessible: Option<bool>,
    pub port: Option<i32>,
    pub storage_type: Option<String>,
    pub auto_minor_version_upgrade: Option<bool>,
}

/// Everything needed to restore a database from `create_db`
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct DbTemplate {
    pub opts: RestoreRequest,
    /// Source instance whose snapshots are searched (default: the new id)
    pub snapshot_name: Option<String>,
    pub environment: String,
    pub purpose: String,
    #[serde(default)]
    pub vpc_security_group_ids: Vec<String>,
}

impl DbTemplate {
    pub fn snapshot_source(&self) -> &str {
        self.snapshot_name
            .as_deref()
            .unwrap_or(&self.opts.db_instance_identifier)
    }
}

/// Read, render and parse a template file.
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = read_to_string(path)
        .with_context(|| format!("cannot find template {}", path.display()))?;
    let rendered = render(&text, |name| env::var(name).ok())
        .with_context(|| format!("cannot render template {}", path.display()))?;
    let parsed = serde_yaml::from_str(&rendered)
        .with_context(|| format!("invalid template {}", path.display()))?;
    Ok(parsed)
}

/// Substitute `${NAME}` references using `lookup`.
pub fn render(text: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<String> {
    lazy_static! {
        static ref VAR: Regex = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    }

    let mut missing = Vec::new();
    let rendered = VAR.replace_all(text, |caps: &Captures| {
        let name = &caps[1];
        lookup(name).unwrap_or_else(|| {
            missing.push(name.to_string());
            String::new()
        })
    });
    if !missing.is_empty() {
        bail!("undefined variables: {}", missing.join(", "));
    }
    Ok(rendered.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    const INSTANCE: &str = r#"
name: Testapp32
user: ubuntu
elastic_lb: TestAppELB
security_group_ids: ["sg-9d0c06ff"]
ingress: ["sg-0a1b2c3d:5432"]
template:
  image_id: ami-743e5444
  instance_type: m1.small
  subnet_id: subnet-0a5dcc63
  availability_zone: ${AZ}
"#;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "AZ" => Some("us-west-2a".to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_render_substitutes() {
        let out = render("zone: ${AZ}, again ${AZ}", lookup).unwrap();
        assert_eq!(out, "zone: us-west-2a, again us-west-2a");
    }

    #[test]
    fn test_render_reports_missing() {
        let err = render("a: ${NOPE}\nb: ${ALSO_NOPE}", lookup).unwrap_err();
        assert!(err.to_string().contains("NOPE, ALSO_NOPE"));
    }

    #[test]
    fn test_render_leaves_plain_dollars() {
        assert_eq!(render("cost: $5", lookup).unwrap(), "cost: $5");
    }

    #[test]
    fn test_instance_template() {
        let text = render(INSTANCE, lookup).unwrap();
        let tpl: InstanceTemplate = serde_yaml::from_str(&text).unwrap();
        assert_eq!(tpl.name, "Testapp32");
        assert_eq!(tpl.template.min_count, 1);
        assert_eq!(tpl.template.availability_zone.as_deref(), Some("us-west-2a"));
        assert_eq!(tpl.ingress, vec!["sg-0a1b2c3d:5432"]);
        assert!(tpl.elb.is_none());
    }

    #[test]
    fn test_db_template_json() {
        let tpl: DbTemplate = serde_yaml::from_str(
            r#"{"opts": {"db_instance_identifier": "mazama", "db_instance_class": "db.t3.small"},
                "environment": "test", "purpose": "app32",
                "vpc_security_group_ids": ["sg-1"]}"#,
        )
        .unwrap();
        assert_eq!(tpl.snapshot_source(), "mazama");
        assert_eq!(tpl.opts.db_instance_class.as_deref(), Some("db.t3.small"));
    }

    #[test]
    fn test_load_from_file() {
        std::env::set_var("AWS_MANAGER_TEST_AZ", "us-west-1b");
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            "image_id: ami-1\ninstance_type: t3.micro\navailability_zone: ${AWS_MANAGER_TEST_AZ}\n",
        )
        .unwrap();
        let spec: LaunchSpec = load(file.path()).unwrap();
        assert_eq!(spec.availability_zone.as_deref(), Some("us-west-1b"));
        assert_eq!(spec.max_count, 1);
    }
}

//! Custom metric data points

use anyhow::{anyhow, bail, Context, Result};
use aws_sdk_cloudwatch::{
    primitives::DateTime,
    types::{Dimension, MetricDatum},
    Client,
};
use std::{str::FromStr, time::SystemTime};
use tracing::debug;

/// One data point in `namespace,name,value,dims` form, where `dims` is a
/// `;`-separated list of `name:value` pairs (possibly empty).
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    pub namespace: String,
    pub name: String,
    pub value: f64,
    pub dimensions: Vec<(String, String)>,
}

impl FromStr for MetricRecord {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.trim().split(',').map(str::trim).collect();
        let &[namespace, name, value, dims] = fields.as_slice() else {
            bail!("expected namespace,name,value,dims; got {s:?}");
        };
        if namespace.is_empty() || name.is_empty() {
            bail!("metric namespace and name must not be empty: {s:?}");
        }
        let value = value
            .parse()
            .with_context(|| format!("invalid metric value {value:?}"))?;
        let dimensions = dims
            .split(';')
            .filter(|d| !d.trim().is_empty())
            .map(|d| {
                d.split_once(':')
                    .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                    .filter(|(k, _)| !k.is_empty())
                    .ok_or_else(|| anyhow!("invalid dimension {d:?}, expected name:value"))
            })
            .collect::<Result<_>>()?;

        Ok(Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            value,
            dimensions,
        })
    }
}

impl MetricRecord {
    fn datum(&self, at: SystemTime) -> MetricDatum {
        let dimensions = self
            .dimensions
            .iter()
            .map(|(k, v)| Dimension::builder().name(k).value(v).build())
            .collect();
        MetricDatum::builder()
            .metric_name(&self.name)
            .value(self.value)
            .timestamp(DateTime::from(at))
            .set_dimensions(Some(dimensions))
            .build()
    }
}

pub struct Metrics {
    client: Client,
}

impl Metrics {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Parse `csv` and emit it as a single data point stamped now.
    pub async fn put_metric(&self, csv: &str) -> Result<MetricRecord> {
        let record: MetricRecord = csv.parse()?;
        debug!(namespace = %record.namespace, name = %record.name, value = record.value, "Pushing metric");
        self.client
            .put_metric_data()
            .namespace(&record.namespace)
            .metric_data(record.datum(SystemTime::now()))
            .send()
            .await
            .with_context(|| format!("failed to put metric {}", record.name))?;
        Ok(record)
    }
}

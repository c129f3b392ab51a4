use anyhow::Result;
use aws_manager::aws::sns::notify;
use clap::Args;

use super::Session;

#[derive(Args)]
pub struct MetricArgs {
    /// `namespace,name,value,dims` with dims as `name:value;name:value`
    record: String,
}

impl MetricArgs {
    pub async fn main(self, session: &Session) -> Result<()> {
        session.region.cloudwatch().put_metric(&self.record).await?;
        Ok(())
    }
}

#[derive(Args)]
pub struct SnsArgs {
    /// Topic ARN to publish to
    topic_arn: String,

    /// Message subject
    subject: String,
}

impl SnsArgs {
    pub async fn main(self, session: &Session) -> Result<()> {
        let message_id = notify(&session.region.sns(), &self.topic_arn, &self.subject).await?;
        println!("{message_id}");
        Ok(())
    }
}

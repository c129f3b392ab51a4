use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_sns::Client;
use tracing::info;

/// Body sent with every notification; only the subject varies.
pub const MESSAGE_BODY: &str = "This is a notification from aws-manager.";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Topics: Send + Sync {
    /// Returns the message id
    async fn publish(&self, topic_arn: &str, subject: &str, message: &str) -> Result<String>;
}

pub struct Sns {
    client: Client,
}

impl Sns {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Topics for Sns {
    async fn publish(&self, topic_arn: &str, subject: &str, message: &str) -> Result<String> {
        let res = self
            .client
            .publish()
            .topic_arn(topic_arn)
            .subject(subject)
            .message(message)
            .send()
            .await
            .with_context(|| format!("failed to publish to {topic_arn}"))?;
        Ok(res.message_id().unwrap_or_default().to_string())
    }
}

/// Publish the fixed notification body under `subject`.
pub async fn notify<T: Topics>(topics: &T, topic_arn: &str, subject: &str) -> Result<String> {
    info!(topic = topic_arn, subject, "Publishing notification");
    topics.publish(topic_arn, subject, MESSAGE_BODY).await
}

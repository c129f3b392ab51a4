use anyhow::{Context, Result};
use aws_config::SdkConfig;
use aws_sdk_sts::Client;

/// Account id of the credentials in `sdk_config`.
pub async fn caller_account(sdk_config: &SdkConfig) -> Result<String> {
    let client = Client::new(sdk_config);
    let identity = client
        .get_caller_identity()
        .send()
        .await
        .context("failed to look up caller identity")?;

    let account = identity
        .account()
        .context("caller identity carries no account id")?;
    Ok(account.to_string())
}

/// Build the ARN RDS uses for tagging a database instance.
pub fn rds_db_arn(region: &str, account_id: &str, db_instance_id: &str) -> String {
    format!("arn:aws:rds:{region}:{account_id}:db:{db_instance_id}")
}

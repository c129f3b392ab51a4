use anyhow::Result;
use aws_manager::aws::s3::{ensure_bucket, find_bucket, parse_object_ref};
use clap::Args;
use std::path::PathBuf;

use super::Session;

#[derive(Args)]
pub struct PutObjectArgs {
    /// Local file to upload
    file: PathBuf,

    /// Destination as `bucket:key`; the bucket is created if missing
    target: String,
}

impl PutObjectArgs {
    pub async fn main(self, session: &Session) -> Result<()> {
        let (bucket, key) = parse_object_ref(&self.target)?;
        let s3 = session.region.s3();
        let bucket = ensure_bucket(&s3, session.region.name(), bucket).await?;
        bucket.put_file(&self.file, key).await?;
        println!("{}:{key}", bucket.name());
        Ok(())
    }
}

#[derive(Args)]
pub struct GetObjectArgs {
    /// Source as `bucket:key`
    source: String,

    /// Local destination; replaced if it exists
    dest: PathBuf,
}

impl GetObjectArgs {
    pub async fn main(self, session: &Session) -> Result<()> {
        let (bucket, key) = parse_object_ref(&self.source)?;
        let s3 = session.region.s3();
        let bucket = find_bucket(&s3, bucket).await?;
        bucket.get(key, &self.dest).await?;
        println!("{}", self.dest.display());
        Ok(())
    }
}

#[derive(Args)]
pub struct ListBucketArgs {
    bucket: String,

    /// Directory-like path inside the bucket
    #[arg(default_value = "")]
    path: String,

    /// Key prefix under `path`
    #[arg(default_value = "")]
    prefix: String,
}

impl ListBucketArgs {
    pub async fn main(self, session: &Session) -> Result<()> {
        let s3 = session.region.s3();
        let bucket = find_bucket(&s3, &self.bucket).await?;
        for key in bucket.find(&self.path, &self.prefix).await? {
            println!("{key}");
        }
        Ok(())
    }
}

#[derive(Args)]
pub struct DeleteObjectArgs {
    /// Object as `bucket:key`
    target: String,
}

impl DeleteObjectArgs {
    pub async fn main(self, session: &Session) -> Result<()> {
        let (bucket, key) = parse_object_ref(&self.target)?;
        let s3 = session.region.s3();
        let bucket = find_bucket(&s3, bucket).await?;
        bucket.delete_object(key).await?;
        Ok(())
    }
}

//! S3 buckets and objects

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::{
    primitives::ByteStream,
    types::{BucketLocationConstraint, CreateBucketConfiguration, ObjectCannedAcl, StorageClass},
    Client,
};
use std::{fs, io::Write, path::Path};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::Error;

/// Region that rejects an explicit location constraint
const DEFAULT_LOCATION: &str = "us-east-1";

/// How an object is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upload {
    /// Grant the bucket owner full control
    OwnerFullControl,
    /// Standard ACL, reduced redundancy storage
    ReducedRedundancy,
}

/// One page of a key listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyPage {
    pub keys: Vec<String>,
    /// Present when more keys follow
    pub next_token: Option<String>,
}

/// The S3 calls the bucket operations depend on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn bucket_names(&self) -> Result<Vec<String>>;

    /// `location` is `None` for the default region
    async fn create_bucket(&self, name: &str, location: Option<String>) -> Result<()>;

    async fn delete_bucket(&self, name: &str) -> Result<()>;

    async fn put_object(&self, bucket: &str, key: &str, local: &Path, mode: Upload) -> Result<()>;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    async fn list_keys(&self, bucket: &str, prefix: &str, token: Option<String>) -> Result<KeyPage>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;
}

pub struct S3 {
    client: Client,
}

impl S3 {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3 {
    async fn bucket_names(&self) -> Result<Vec<String>> {
        let res = self
            .client
            .list_buckets()
            .send()
            .await
            .context("failed to list buckets")?;
        Ok(res
            .buckets()
            .iter()
            .filter_map(|b| b.name())
            .map(String::from)
            .collect())
    }

    async fn create_bucket(&self, name: &str, location: Option<String>) -> Result<()> {
        let mut req = self.client.create_bucket().bucket(name);
        if let Some(location) = location {
            req = req.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(location.as_str()))
                    .build(),
            );
        }
        req.send()
            .await
            .with_context(|| format!("failed to create bucket {name}"))?;
        Ok(())
    }

    async fn delete_bucket(&self, name: &str) -> Result<()> {
        self.client
            .delete_bucket()
            .bucket(name)
            .send()
            .await
            .with_context(|| format!("failed to delete bucket {name}"))?;
        Ok(())
    }

    async fn put_object(&self, bucket: &str, key: &str, local: &Path, mode: Upload) -> Result<()> {
        let body = ByteStream::from_path(local)
            .await
            .with_context(|| format!("failed to read {}", local.display()))?;
        let req = self.client.put_object().bucket(bucket).key(key).body(body);
        let req = match mode {
            Upload::OwnerFullControl => req.acl(ObjectCannedAcl::BucketOwnerFullControl),
            Upload::ReducedRedundancy => req.storage_class(StorageClass::ReducedRedundancy),
        };
        req.send()
            .await
            .with_context(|| format!("failed to upload {bucket}:{key}"))?;
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let res = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("failed to fetch {bucket}:{key}"))?;
        let data = res
            .body
            .collect()
            .await
            .with_context(|| format!("failed to read {bucket}:{key}"))?;
        Ok(data.into_bytes().to_vec())
    }

    async fn list_keys(&self, bucket: &str, prefix: &str, token: Option<String>) -> Result<KeyPage> {
        let mut request = self.client.list_objects_v2().bucket(bucket);
        if !prefix.is_empty() {
            request = request.prefix(prefix);
        }
        if let Some(token) = token {
            request = request.continuation_token(token);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("failed to list {bucket}"))?;

        let keys = response
            .contents()
            .iter()
            .filter_map(|o| o.key())
            .map(String::from)
            .collect();
        let next_token = if response.is_truncated() == Some(true) {
            response.next_continuation_token().map(String::from)
        } else {
            None
        };
        Ok(KeyPage { keys, next_token })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("failed to delete {bucket}:{key}"))?;
        Ok(())
    }
}

/// Split a `bucket:key` reference.
pub fn parse_object_ref(reference: &str) -> Result<(&str, &str)> {
    match reference.split_once(':') {
        Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => Ok((bucket, key)),
        _ => bail!("expected bucket:key, got {reference:?}"),
    }
}

/// Key for `local` uploaded under `aws_path`: `aws_path/basename`.
pub fn object_key(aws_path: &str, local: &Path) -> Result<String> {
    let base = local
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("{} has no file name", local.display()))?;
    let dir = aws_path.trim_end_matches('/');
    Ok(if dir.is_empty() {
        base.to_string()
    } else {
        format!("{dir}/{base}")
    })
}

/// Listing prefix for keys under `aws_path` starting with `prefix`.
pub fn search_prefix(aws_path: &str, prefix: &str) -> String {
    let dir = aws_path.trim_end_matches('/');
    if dir.is_empty() {
        prefix.to_string()
    } else {
        format!("{dir}/{prefix}")
    }
}

/// Replace `dest` with `data`, writing through a temp file in the same
/// directory so a partial download never lands at `dest`.
pub fn write_replacing(dest: &Path, data: &[u8]) -> Result<()> {
    if dest.exists() {
        fs::remove_file(dest).with_context(|| format!("failed to remove {}", dest.display()))?;
    }
    let dir = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(dest)
        .with_context(|| format!("failed to write {}", dest.display()))?;
    Ok(())
}

/// Buckets whose name is exactly `name`
pub async fn find_buckets<'a, S: ObjectStore>(store: &'a S, name: &str) -> Result<Vec<Bucket<'a, S>>> {
    Ok(store
        .bucket_names()
        .await?
        .into_iter()
        .filter(|b| b == name)
        .map(|b| Bucket::new(store, b))
        .collect())
}

pub async fn find_bucket<'a, S: ObjectStore>(store: &'a S, name: &str) -> Result<Bucket<'a, S>> {
    find_buckets(store, name)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| Error::not_found("bucket", name).into())
}

/// Return the named bucket, creating it first if it does not exist.
pub async fn ensure_bucket<'a, S: ObjectStore>(
    store: &'a S,
    region: &str,
    name: &str,
) -> Result<Bucket<'a, S>> {
    if let Some(bucket) = find_buckets(store, name).await?.into_iter().next() {
        return Ok(bucket);
    }

    info!(bucket = %name, region, "Creating bucket");
    let location = (region != DEFAULT_LOCATION).then(|| region.to_string());
    store.create_bucket(name, location).await?;

    find_buckets(store, name)
        .await?
        .into_iter()
        .next()
        .with_context(|| format!("bucket {name} still missing after create"))
}

pub struct Bucket<'a, S> {
    store: &'a S,
    name: String,
}

impl<'a, S: ObjectStore> Bucket<'a, S> {
    pub fn new(store: &'a S, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Upload `local` as `key`, granting the bucket owner full control.
    pub async fn put_file(&self, local: &Path, key: &str) -> Result<()> {
        debug!(bucket = %self.name, key, path = %local.display(), "Uploading file");
        self.store
            .put_object(&self.name, key, local, Upload::OwnerFullControl)
            .await
    }

    /// Upload `local` under `aws_path` with reduced redundancy; returns the key.
    pub async fn put(&self, local: &Path, aws_path: &str) -> Result<String> {
        let key = object_key(aws_path, local)?;
        info!("Uploading {} to {}:{key}", local.display(), self.name);
        self.store
            .put_object(&self.name, &key, local, Upload::ReducedRedundancy)
            .await?;
        Ok(key)
    }

    pub async fn get(&self, key: &str, dest: &Path) -> Result<()> {
        info!("Downloading {}:{key} to {}", self.name, dest.display());
        let data = self.store.get_object(&self.name, key).await?;
        write_replacing(dest, &data)
    }

    /// Keys under `aws_path` that start with `prefix`
    pub async fn find(&self, aws_path: &str, prefix: &str) -> Result<Vec<String>> {
        self.all_keys(&search_prefix(aws_path, prefix)).await
    }

    async fn all_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = vec![];
        let mut token = None;
        loop {
            let page = self.store.list_keys(&self.name, prefix, token).await?;
            keys.extend(page.keys);
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(keys)
    }

    pub async fn delete_object(&self, key: &str) -> Result<()> {
        debug!(bucket = %self.name, key, "Deleting object");
        self.store.delete_object(&self.name, key).await
    }

    pub async fn delete_all_objects(&self) -> Result<usize> {
        let keys = self.all_keys("").await?;
        for key in &keys {
            self.delete_object(key).await?;
        }
        Ok(keys.len())
    }

    /// Delete the bucket itself; it must already be empty.
    pub async fn delete(&self) -> Result<()> {
        info!(bucket = %self.name, "Deleting bucket");
        self.store.delete_bucket(&self.name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    };

    /// Successive bucket listings return each entry in turn, then the last
    fn listings(store: &mut MockObjectStore, answers: &'static [&'static [&'static str]]) {
        let calls = Arc::new(AtomicUsize::new(0));
        store.expect_bucket_names().returning(move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            let names = answers[n.min(answers.len() - 1)];
            Ok(names.iter().map(|s| s.to_string()).collect())
        });
    }

    #[test]
    fn test_object_ref() {
        assert_eq!(
            parse_object_ref("logs:app/2014/out.txt").unwrap(),
            ("logs", "app/2014/out.txt")
        );
        assert!(parse_object_ref("logs").is_err());
        assert!(parse_object_ref(":key").is_err());
        assert!(parse_object_ref("logs:").is_err());
    }

    #[test]
    fn test_object_key_strips_trailing_slash() {
        let local = Path::new("/var/log/app/out.txt");
        assert_eq!(object_key("backups/", local).unwrap(), "backups/out.txt");
        assert_eq!(object_key("backups", local).unwrap(), "backups/out.txt");
        assert_eq!(object_key("", local).unwrap(), "out.txt");
        assert!(object_key("backups", Path::new("/")).is_err());
    }

    #[test]
    fn test_search_prefix() {
        assert_eq!(search_prefix("db/", "mazama-"), "db/mazama-");
        assert_eq!(search_prefix("", "mazama-"), "mazama-");
        assert_eq!(search_prefix("db", ""), "db/");
    }

    #[test]
    fn test_write_replacing_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.txt");
        fs::write(&dest, "stale contents that are longer").unwrap();

        write_replacing(&dest, b"fresh").unwrap();
        assert_eq!(fs::read_to_string(&dest).unwrap(), "fresh");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_ensure_existing_bucket_is_not_created() {
        let mut store = MockObjectStore::new();
        listings(&mut store, &[&["other", "logs"]]);
        store.expect_create_bucket().never();

        let bucket = ensure_bucket(&store, "us-west-2", "logs").await.unwrap();
        assert_eq!(bucket.name(), "logs");
    }

    #[tokio::test]
    async fn test_ensure_creates_missing_bucket() {
        let mut store = MockObjectStore::new();
        listings(&mut store, &[&["other"], &["other", "logs"]]);
        store.expect_create_bucket().times(1).returning(|name, location| {
            assert_eq!(name, "logs");
            assert_eq!(location.as_deref(), Some("us-west-2"));
            Ok(())
        });

        let bucket = ensure_bucket(&store, "us-west-2", "logs").await.unwrap();
        assert_eq!(bucket.name(), "logs");
    }

    #[tokio::test]
    async fn test_ensure_without_location_in_us_east_1() {
        let mut store = MockObjectStore::new();
        listings(&mut store, &[&[], &["logs"]]);
        store.expect_create_bucket().times(1).returning(|_, location| {
            assert!(location.is_none());
            Ok(())
        });

        assert!(ensure_bucket(&store, "us-east-1", "logs").await.is_ok());
    }

    #[tokio::test]
    async fn test_ensure_fails_when_still_missing() {
        let mut store = MockObjectStore::new();
        listings(&mut store, &[&[]]);
        store.expect_create_bucket().times(1).returning(|_, _| Ok(()));

        let err = ensure_bucket(&store, "us-west-2", "logs").await.err().unwrap();
        assert!(err.to_string().contains("still missing"));
    }

    #[tokio::test]
    async fn test_find_bucket_missing_is_not_found() {
        let mut store = MockObjectStore::new();
        listings(&mut store, &[&["logs-archive"]]);

        let err = find_bucket(&store, "logs").await.err().unwrap();
        assert!(crate::error::kind_of(&err).unwrap().is_not_found());
    }

    #[tokio::test]
    async fn test_put_uses_reduced_redundancy() {
        let mut store = MockObjectStore::new();
        store.expect_put_object().times(1).returning(|bucket, key, local, mode| {
            assert_eq!((bucket, key), ("logs", "backups/out.txt"));
            assert_eq!(local, Path::new("/var/log/app/out.txt"));
            assert_eq!(mode, Upload::ReducedRedundancy);
            Ok(())
        });

        let bucket = Bucket::new(&store, "logs");
        let key = bucket.put(Path::new("/var/log/app/out.txt"), "backups/").await.unwrap();
        assert_eq!(key, "backups/out.txt");
    }

    #[tokio::test]
    async fn test_put_file_grants_owner_control() {
        let mut store = MockObjectStore::new();
        store.expect_put_object().times(1).returning(|_, key, _, mode| {
            assert_eq!(key, "app/out.txt");
            assert_eq!(mode, Upload::OwnerFullControl);
            Ok(())
        });

        let bucket = Bucket::new(&store, "logs");
        bucket.put_file(Path::new("out.txt"), "app/out.txt").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_all_objects_follows_pages() {
        let mut store = MockObjectStore::new();
        store.expect_list_keys().times(2).returning(|bucket, prefix, token| {
            assert_eq!((bucket, prefix), ("logs", ""));
            Ok(match token.as_deref() {
                None => KeyPage {
                    keys: vec!["a".into(), "b".into()],
                    next_token: Some("page-2".into()),
                },
                Some("page-2") => KeyPage {
                    keys: vec!["c".into()],
                    next_token: None,
                },
                Some(other) => panic!("unexpected token {other}"),
            })
        });
        let deleted = Arc::new(Mutex::new(vec![]));
        let sink = deleted.clone();
        store.expect_delete_object().times(3).returning(move |_, key| {
            sink.lock().unwrap().push(key.to_string());
            Ok(())
        });
        store.expect_delete_bucket().times(1).returning(|name| {
            assert_eq!(name, "logs");
            Ok(())
        });

        let bucket = Bucket::new(&store, "logs");
        assert_eq!(bucket.delete_all_objects().await.unwrap(), 3);
        bucket.delete().await.unwrap();
        assert_eq!(*deleted.lock().unwrap(), ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_find_lists_under_path() {
        let mut store = MockObjectStore::new();
        store.expect_list_keys().times(1).returning(|_, prefix, _| {
            assert_eq!(prefix, "db/mazama-");
            Ok(KeyPage {
                keys: vec!["db/mazama-1".into()],
                next_token: None,
            })
        });

        let bucket = Bucket::new(&store, "logs");
        assert_eq!(bucket.find("db/", "mazama-").await.unwrap(), ["db/mazama-1"]);
    }

    #[tokio::test]
    async fn test_get_replaces_destination() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.txt");
        fs::write(&dest, "old").unwrap();

        let mut store = MockObjectStore::new();
        store
            .expect_get_object()
            .times(1)
            .returning(|_, _| Ok(b"new contents".to_vec()));

        Bucket::new(&store, "logs").get("app/out.txt", &dest).await.unwrap();
        assert_eq!(fs::read_to_string(&dest).unwrap(), "new contents");
    }
}

//! Artifact stores: where serialized models live before they are loaded.

use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use tracing::debug;

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn fetch(&self, location: &str) -> Result<Bytes>;
}

/// Reads artifacts from a directory. Locations are relative to `root` and may not escape it.
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, location: &str) -> Result<PathBuf> {
        let relative = Path::new(location);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            bail!("artifact location '{location}' must be a relative path inside the store");
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn fetch(&self, location: &str) -> Result<Bytes> {
        let path = self.resolve(location)?;
        debug!("Reading artifact {}", path.display());
        let data = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read artifact {}", path.display()))?;
        Ok(Bytes::from(data))
    }
}

/// Reads artifacts from an S3 (or MinIO) bucket, using the location as the object key.
pub struct S3ArtifactStore {
    client: S3Client,
    bucket: String,
    prefix: String,
}

impl S3ArtifactStore {
    pub fn new(client: S3Client, bucket: String, prefix: String) -> Self {
        Self {
            client,
            bucket,
            prefix,
        }
    }

    fn key(&self, location: &str) -> String {
        if self.prefix.is_empty() {
            location.to_string()
        } else {
            format!("{}/{}", self.prefix.trim_end_matches('/'), location)
        }
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    async fn fetch(&self, location: &str) -> Result<Bytes> {
        let key = self.key(location);
        debug!("Fetching artifact s3://{}/{}", self.bucket, key);
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| anyhow!("S3 get_object {key} failed: {e}"))?;
        let body = object
            .body
            .collect()
            .await
            .map_err(|e| anyhow!("S3 body read {key} failed: {e}"))?;
        Ok(body.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fs_store_reads_relative_path() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join("embed")).await.unwrap();
        tokio::fs::write(dir.path().join("embed/model.json"), b"{}")
            .await
            .unwrap();

        let store = FsArtifactStore::new(dir.path());
        let bytes = store.fetch("embed/model.json").await.unwrap();
        assert_eq!(&bytes[..], b"{}");
    }

    #[tokio::test]
    async fn test_fs_store_rejects_escaping_paths() {
        let store = FsArtifactStore::new("/tmp/artifacts");
        assert!(store.fetch("../etc/passwd").await.is_err());
        assert!(store.fetch("/etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn test_fs_store_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let err = store.fetch("missing.json").await.unwrap_err();
        assert!(err.to_string().contains("missing.json"));
    }
}

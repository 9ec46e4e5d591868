//! Deployment bucket access using object_store.
//!
//! Supports GCS, a local directory per bucket and an in-process memory backend.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::future::try_join_all;
use futures::TryStreamExt;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectMeta, ObjectStore};
use tracing::{debug, info};

use crate::config::{StorageConfig, StorageType};
use crate::error::{ControlError, ControlResult};

/// One deployment bucket.
#[derive(Debug, Clone)]
pub struct DeploymentBucket {
    store: Arc<dyn ObjectStore>,
    name: String,
}

impl DeploymentBucket {
    /// Wrap a pre-configured object store holding the bucket's objects.
    #[must_use]
    pub fn with_store(store: Arc<dyn ObjectStore>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
        }
    }

    /// Bucket name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// List every object, optionally below a prefix.
    pub async fn list(&self, prefix: Option<&str>) -> ControlResult<Vec<ObjectMeta>> {
        let prefix = prefix.map(ObjectPath::from);
        let objects: Vec<ObjectMeta> = self.store.list(prefix.as_ref()).try_collect().await?;
        debug!(bucket = %self.name, count = objects.len(), "listed objects");
        Ok(objects)
    }

    /// Upload a local file to `object_path`. Returns the uploaded size.
    pub async fn upload(&self, object_path: &str, local: &Path) -> ControlResult<u64> {
        let data = tokio::fs::read(local).await?;
        let size = data.len() as u64;
        let location = ObjectPath::from(object_path);

        debug!(bucket = %self.name, path = %location, size, "uploading artifact");
        self.store.put(&location, Bytes::from(data).into()).await?;

        info!(bucket = %self.name, path = %location, size, "artifact uploaded");
        Ok(size)
    }

    /// Delete the named objects concurrently.
    pub async fn delete_all<I, S>(&self, names: I) -> ControlResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let deletes = names.into_iter().map(|name| {
            let location = ObjectPath::from(name.as_ref());
            async move {
                self.store.delete(&location).await?;
                debug!(bucket = %self.name, path = %location, "deleted object");
                Ok::<_, ControlError>(())
            }
        });
        try_join_all(deletes).await?;
        Ok(())
    }

    /// Delete every object in the bucket. Returns the number removed.
    pub async fn empty(&self) -> ControlResult<usize> {
        let objects = self.list(None).await?;
        let count = objects.len();
        self.delete_all(objects.iter().map(|o| o.location.as_ref())).await?;
        info!(bucket = %self.name, count, "emptied deployment bucket");
        Ok(count)
    }
}

/// Opens deployment buckets for the configured backend.
///
/// Memory buckets are kept for the lifetime of the provider so that
/// repeated opens of the same name see the same objects.
#[derive(Debug)]
pub struct BucketProvider {
    config: StorageConfig,
    memory: Mutex<HashMap<String, Arc<dyn ObjectStore>>>,
}

impl BucketProvider {
    /// Create a provider for a storage configuration.
    #[must_use]
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            memory: Mutex::new(HashMap::new()),
        }
    }

    /// Open the bucket called `name`.
    pub fn open(&self, name: &str) -> ControlResult<DeploymentBucket> {
        let store: Arc<dyn ObjectStore> = match self.config.storage_type {
            StorageType::Gcs => {
                let store = GoogleCloudStorageBuilder::from_env()
                    .with_bucket_name(name)
                    .build()?;
                Arc::new(store)
            }
            StorageType::Local => {
                let root = self.config.path.join(name);
                std::fs::create_dir_all(&root)?;
                Arc::new(LocalFileSystem::new_with_prefix(root)?)
            }
            StorageType::Memory => {
                let mut buckets = self
                    .memory
                    .lock()
                    .map_err(|_| ControlError::internal("lock poisoned"))?;
                Arc::clone(
                    buckets
                        .entry(name.to_owned())
                        .or_insert_with(|| Arc::new(InMemory::new())),
                )
            }
        };

        Ok(DeploymentBucket::with_store(store, name))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn memory_provider() -> BucketProvider {
        BucketProvider::new(StorageConfig {
            storage_type: StorageType::Memory,
            ..StorageConfig::default()
        })
    }

    #[tokio::test]
    async fn upload_then_empty() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("svc.zip");
        std::fs::write(&artifact, b"zip").unwrap();

        let provider = memory_provider();
        let bucket = provider.open("sls-svc-dev-1").unwrap();
        let size = bucket
            .upload("serverless/svc/dev/1-x/svc.zip", &artifact)
            .await
            .unwrap();
        assert_eq!(size, 3);

        // Reopening sees the same objects.
        let reopened = provider.open("sls-svc-dev-1").unwrap();
        assert_eq!(reopened.list(Some("serverless")).await.unwrap().len(), 1);
        let other = provider.open("other").unwrap();
        assert!(other.list(None).await.unwrap().is_empty());

        assert_eq!(reopened.empty().await.unwrap(), 1);
        assert!(bucket.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn local_backend_uses_directory_per_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("svc.zip");
        std::fs::write(&artifact, b"zip").unwrap();

        let provider = BucketProvider::new(StorageConfig {
            storage_type: StorageType::Local,
            path: dir.path().join("buckets"),
        });
        let bucket = provider.open("sls-svc-dev-1").unwrap();
        bucket.upload("a/svc.zip", &artifact).await.unwrap();

        assert!(dir.path().join("buckets/sls-svc-dev-1/a/svc.zip").exists());
    }

    #[tokio::test]
    async fn missing_local_file_is_io_error() {
        let bucket = memory_provider().open("b").unwrap();
        let err = bucket
            .upload("a.zip", Path::new("/does/not/exist.zip"))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Io(_)));
    }
}

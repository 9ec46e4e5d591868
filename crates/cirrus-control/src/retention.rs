//! Pruning of old deployment artifacts.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{info, warn};

use crate::bucket::DeploymentBucket;
use crate::error::ControlResult;

/// `serverless/{service}/{stage}/{millis}-{date}/{file}.zip`
static ARTIFACT_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^serverless/([^/]+)/([^/]+)/(\d+)-([^/]+)/([^/]+\.zip)$").ok()
});

/// An uploaded artifact recognised in a deployment bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactObject {
    /// Bucket holding the object.
    pub bucket: String,
    /// Full object name.
    pub name: String,
    /// Upload time in epoch milliseconds, taken from the directory name.
    pub timestamp: i64,
}

impl ArtifactObject {
    /// Recognise an artifact object name. `None` when it does not match the layout.
    #[must_use]
    pub fn parse(bucket: &str, name: &str) -> Option<Self> {
        let captures = ARTIFACT_PATTERN.as_ref()?.captures(name)?;
        let timestamp = captures.get(3)?.as_str().parse().ok()?;
        Some(Self {
            bucket: bucket.to_owned(),
            name: name.to_owned(),
            timestamp,
        })
    }
}

/// Keeps the newest `keep_count` artifacts of a bucket.
#[derive(Debug, Clone, Copy)]
pub struct ArtifactRetentionManager {
    keep_count: usize,
}

impl ArtifactRetentionManager {
    #[must_use]
    pub const fn new(keep_count: usize) -> Self {
        Self { keep_count }
    }

    /// Artifacts in the bucket, oldest first. Objects outside the layout are skipped.
    pub async fn artifacts(&self, bucket: &DeploymentBucket) -> ControlResult<Vec<ArtifactObject>> {
        let mut artifacts: Vec<ArtifactObject> = bucket
            .list(Some("serverless"))
            .await?
            .into_iter()
            .filter_map(|meta| {
                let name = meta.location.as_ref();
                let parsed = ArtifactObject::parse(bucket.name(), name);
                if parsed.is_none() {
                    warn!(bucket = %bucket.name(), object = %name, "skipping unrecognised object");
                }
                parsed
            })
            .collect();
        artifacts.sort_by_key(|a| a.timestamp);
        Ok(artifacts)
    }

    /// Delete all but the newest artifacts and return the deleted ones.
    ///
    /// Nothing is deleted while the bucket holds `keep_count` artifacts or fewer.
    pub async fn retain(&self, bucket: &DeploymentBucket) -> ControlResult<Vec<ArtifactObject>> {
        let artifacts = self.artifacts(bucket).await?;
        if artifacts.len() <= self.keep_count {
            return Ok(Vec::new());
        }

        let excess = artifacts.len() - self.keep_count;
        let doomed: Vec<ArtifactObject> = artifacts.into_iter().take(excess).collect();
        bucket.delete_all(doomed.iter().map(|a| a.name.as_str())).await?;

        info!(
            bucket = %bucket.name(),
            deleted = doomed.len(),
            kept = self.keep_count,
            "pruned old artifacts"
        );
        Ok(doomed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use object_store::memory::InMemory;
    use object_store::path::Path as ObjectPath;
    use object_store::ObjectStore;
    use rstest::rstest;

    use super::*;

    fn artifact_name(millis: i64) -> String {
        format!("serverless/svc/dev/{millis}-2020-01-01T00:00:00.000Z/svc.zip")
    }

    async fn bucket_with(names: &[String]) -> DeploymentBucket {
        let store = Arc::new(InMemory::new());
        for name in names {
            store
                .put(&ObjectPath::from(name.as_str()), Bytes::from_static(b"zip").into())
                .await
                .unwrap();
        }
        DeploymentBucket::with_store(store, "sls-svc-dev-1")
    }

    #[test]
    fn artifact_pattern_compiles() {
        assert!(ARTIFACT_PATTERN.is_some());
    }

    #[rstest]
    #[case("serverless/svc/dev/1577836800000-2020-01-01T00:00:00.000Z/svc.zip", Some(1_577_836_800_000))]
    #[case("serverless/svc/dev/notanumber-x/svc.zip", None)]
    #[case("serverless/svc/dev/100-x/svc.tar", None)]
    #[case("other/svc/dev/100-x/svc.zip", None)]
    fn parses_artifact_names(#[case] name: &str, #[case] expected: Option<i64>) {
        assert_eq!(ArtifactObject::parse("b", name).map(|a| a.timestamp), expected);
    }

    #[tokio::test]
    async fn keeps_newest_four() {
        // Deliberately unordered; 900 sorts numerically before 1000.
        let names: Vec<String> = [1000, 900, 3000, 2000, 5000, 4000]
            .into_iter()
            .map(artifact_name)
            .collect();
        let bucket = bucket_with(&names).await;

        let deleted = ArtifactRetentionManager::new(4).retain(&bucket).await.unwrap();
        let deleted: Vec<i64> = deleted.iter().map(|a| a.timestamp).collect();
        assert_eq!(deleted, [900, 1000]);

        let left = bucket.list(None).await.unwrap();
        assert_eq!(left.len(), 4);
    }

    #[tokio::test]
    async fn fewer_than_keep_count_deletes_nothing() {
        let names: Vec<String> = [1, 2, 3].into_iter().map(artifact_name).collect();
        let bucket = bucket_with(&names).await;

        let deleted = ArtifactRetentionManager::new(4).retain(&bucket).await.unwrap();
        assert!(deleted.is_empty());
        assert_eq!(bucket.list(None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn unrecognised_objects_are_left_alone() {
        let mut names: Vec<String> = [1, 2, 3, 4, 5].into_iter().map(artifact_name).collect();
        names.push("serverless/svc/dev/readme.txt".to_owned());
        let bucket = bucket_with(&names).await;

        let deleted = ArtifactRetentionManager::new(4).retain(&bucket).await.unwrap();
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].timestamp, 1);
        assert_eq!(bucket.list(None).await.unwrap().len(), 5);
    }
}

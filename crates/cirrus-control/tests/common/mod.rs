//! Shared fixtures for pipeline tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cirrus_compile::{DeploymentContext, ServiceDefinition};
use cirrus_control::config::{DeploymentConfig, StorageConfig};
use cirrus_control::{ControlConfig, MemoryControlPlane, Pipeline, StorageType};
use tempfile::TempDir;

pub const PROJECT: &str = "my-project";

pub const SERVICE: &str = r#"
service = "my-service"

[provider]
project = "my-project"
region = "europe-west1"

[functions.hello]
handler = "hello"
events = [{ http = "hello" }]
allowUnauthenticated = true

[functions.worker]
handler = "worker"
events = [{ event = { eventType = "providers/cloud.pubsub/eventTypes/topic.publish", resource = "projects/my-project/topics/jobs" } }]
"#;

pub struct Harness {
    pub plane: Arc<MemoryControlPlane>,
    pub pipeline: Pipeline,
    pub definition: ServiceDefinition,
    pub ctx: DeploymentContext,
    pub artifact: PathBuf,
    pub dir: TempDir,
}

impl Harness {
    pub fn new(service: &str) -> Self {
        Self::with_plane(service, MemoryControlPlane::new())
    }

    pub fn with_plane(service: &str, plane: MemoryControlPlane) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("my-service.zip");
        std::fs::write(&artifact, b"PK\x03\x04").unwrap();

        let config = ControlConfig {
            storage: StorageConfig {
                storage_type: StorageType::Memory,
                ..StorageConfig::default()
            },
            deployment: DeploymentConfig {
                work_dir: dir.path().join(".cirrus"),
                ..DeploymentConfig::default()
            },
            ..ControlConfig::default()
        };

        let plane = Arc::new(plane);
        let pipeline = Pipeline::new(plane.clone(), config);
        let definition = ServiceDefinition::from_toml(service).unwrap();
        let ctx = DeploymentContext::resolve(&definition, None, None);

        Self {
            plane,
            pipeline,
            definition,
            ctx,
            artifact,
            dir,
        }
    }

    pub fn work_dir(&self) -> &Path {
        self.dir.path()
    }
}

/// `serverless/my-service/dev/{millis}-x/my-service.zip`
pub fn artifact_object(millis: i64) -> String {
    format!("serverless/my-service/dev/{millis}-1970-01-01T00:00:00.000Z/my-service.zip")
}

//! Configuration for cirrus-control.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use secrecy::SecretString;
use serde::Deserialize;

use crate::error::{ControlError, ControlResult};

const ENV_PREFIX: &str = "CIRRUS_";

/// Top-level configuration of the deployment tool.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ControlConfig {
    /// Control-plane client configuration.
    #[serde(default)]
    pub control_plane: ControlPlaneConfig,

    /// Operation monitoring configuration.
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Artifact retention configuration.
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Deployment bucket storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Deployment behaviour configuration.
    #[serde(default)]
    pub deployment: DeploymentConfig,
}

impl ControlConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. `cirrus.toml` in the current directory (if present)
    /// 3. Environment variables with `CIRRUS_` prefix
    pub fn load() -> ControlResult<Self> {
        Self::from_file("cirrus.toml")
    }

    /// Load configuration from a specific TOML file, then the environment.
    pub fn from_file(path: impl AsRef<Path>) -> ControlResult<Self> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| ControlError::Settings(e.to_string()))
    }
}

/// Control-plane client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlPlaneConfig {
    /// Base URL of the API host.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Base URL of the functions API host.
    #[serde(default = "default_functions_base_url")]
    pub functions_base_url: String,

    /// OAuth bearer token. Credential loading is left to the caller.
    #[serde(default)]
    pub access_token: Option<SecretString>,

    /// Request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://www.googleapis.com".to_owned()
}

fn default_functions_base_url() -> String {
    "https://cloudfunctions.googleapis.com".to_owned()
}

const fn default_request_timeout_secs() -> u64 {
    30
}

impl ControlPlaneConfig {
    /// Request timeout as a [`Duration`].
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            functions_base_url: default_functions_base_url(),
            access_token: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Operation monitoring configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Fixed delay between polls, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Hard limit on the whole wait, in seconds.
    #[serde(default = "default_monitor_timeout_secs")]
    pub timeout_secs: u64,
}

const fn default_poll_interval_ms() -> u64 {
    5000
}

const fn default_monitor_timeout_secs() -> u64 {
    600 // 10 minutes
}

impl MonitorConfig {
    /// Poll interval as a [`Duration`].
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            timeout_secs: default_monitor_timeout_secs(),
        }
    }
}

/// Artifact retention configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    /// Number of most recent artifacts kept after a deploy.
    #[serde(default = "default_keep_count")]
    pub keep_count: usize,
}

const fn default_keep_count() -> usize {
    4
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            keep_count: default_keep_count(),
        }
    }
}

/// Backend used for the deployment bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageType {
    /// Google Cloud Storage; the bucket is the deployment bucket.
    #[default]
    Gcs,
    /// Local directory per bucket, for dry runs.
    Local,
    /// In-process memory, for tests.
    Memory,
}

/// Deployment bucket storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Storage backend.
    #[serde(default)]
    pub storage_type: StorageType,

    /// Root directory for the `local` backend.
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from(".cirrus/buckets")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: StorageType::default(),
            path: default_storage_path(),
        }
    }
}

/// Deployment behaviour configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentConfig {
    /// Target the `-partial` deployment name.
    #[serde(default)]
    pub partial: bool,

    /// Directory compiled templates are written to.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(".cirrus")
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            partial: false,
            work_dir: default_work_dir(),
        }
    }
}

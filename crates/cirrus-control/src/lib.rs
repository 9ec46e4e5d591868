//! Cirrus control
//!
//! Applies compiled templates to the deployment control plane and manages
//! the deployment bucket that holds function artifacts.
//!
//! # Architecture
//!
//! - **Planning**: [`DeploymentPlanner`] lists deployments fresh before each
//!   decision and submits an insert or a fingerprinted update
//! - **Monitoring**: [`DeploymentMonitor`] polls an operation at a fixed
//!   interval until it is done, fails, times out or is cancelled
//! - **Artifacts**: [`DeploymentBucket`] uploads and deletes objects through
//!   `object_store`; [`ArtifactRetentionManager`] keeps the newest uploads
//! - **Pipelines**: [`Pipeline`] strings these together for package, deploy
//!   and remove
//!
//! # Operation lifecycle
//!
//! ```text
//! submit ──▶ PENDING/RUNNING ──poll──▶ DONE ──▶ ok
//!                  │                     └────▶ OperationFailed
//!                  ├── deadline ──▶ Timeout
//!                  └── cancel ────▶ Cancelled
//! ```
//!
//! Timeout and cancellation leave the remote outcome unknown; see
//! [`ControlError::is_indeterminate`].

#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

pub mod bucket;
pub mod config;
pub mod control_plane;
pub mod error;
pub mod monitor;
pub mod pipeline;
pub mod planner;
pub mod retention;
pub mod types;

// Re-export commonly used types at the crate root
pub use bucket::{BucketProvider, DeploymentBucket};
pub use config::{ControlConfig, StorageType};
pub use control_plane::{ControlPlane, DeploymentManagerClient, MemoryControlPlane};
pub use error::{ControlError, ControlResult};
pub use monitor::DeploymentMonitor;
pub use pipeline::{DeployOutcome, PackageOutcome, Pipeline, RemoveOutcome};
pub use planner::{ApplyRequest, DeploymentPlanner};
pub use retention::{ArtifactObject, ArtifactRetentionManager};
pub use types::{Deployment, DeploymentResource, Operation, OperationStatus};

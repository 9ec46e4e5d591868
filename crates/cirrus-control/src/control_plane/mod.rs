//! Deployment control-plane access.
//!
//! [`ControlPlane`] is the seam between the pipeline and the remote API. The
//! HTTP implementation talks to the deployment manager and functions REST
//! APIs; the memory implementation is scriptable and records every request
//! for tests.

mod client;
mod memory;

pub use client::DeploymentManagerClient;
pub use memory::{MemoryControlPlane, Request};

use async_trait::async_trait;
use cirrus_compile::IamBinding;

use crate::error::ControlResult;
use crate::types::{Deployment, DeploymentResource, Operation, ResourceSummary};

/// Operations the pipeline needs from the control plane.
///
/// Every call is scoped to a cloud project. Implementations perform no
/// retries; callers decide whether to re-run the pipeline.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// List all deployments in the project.
    async fn list_deployments(&self, project: &str) -> ControlResult<Vec<Deployment>>;

    /// Create a deployment.
    async fn insert_deployment(
        &self,
        project: &str,
        resource: &DeploymentResource,
    ) -> ControlResult<Operation>;

    /// Replace a deployment's template. `resource.fingerprint` must be current.
    async fn update_deployment(
        &self,
        project: &str,
        resource: &DeploymentResource,
    ) -> ControlResult<Operation>;

    /// Delete a deployment and its resources.
    async fn delete_deployment(&self, project: &str, deployment: &str)
        -> ControlResult<Operation>;

    /// Fetch an operation by name.
    async fn get_operation(&self, project: &str, operation: &str) -> ControlResult<Operation>;

    /// List the resources of a deployment. Empty when the deployment does not exist.
    async fn list_resources(
        &self,
        project: &str,
        deployment: &str,
    ) -> ControlResult<Vec<ResourceSummary>>;

    /// Full resource names of the functions deployed in a project region.
    async fn list_functions(&self, project: &str, region: &str) -> ControlResult<Vec<String>>;

    /// Replace the IAM policy of a function with `bindings`.
    async fn set_function_iam_policy(
        &self,
        function: &str,
        bindings: &[IamBinding],
    ) -> ControlResult<()>;
}

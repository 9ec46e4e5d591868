//! Create-versus-update planning.
//!
//! The remote deployment is looked up by its deterministic name right before
//! every decision. Fingerprints are never cached between attempts.

use std::sync::Arc;

use cirrus_compile::{DeploymentName, TemplateDocument};
use tracing::{info, warn};

use crate::control_plane::ControlPlane;
use crate::error::ControlResult;
use crate::types::{Deployment, DeploymentResource, Operation};

/// An apply request ready to be submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyRequest {
    /// The deployment does not exist yet.
    Insert(DeploymentResource),
    /// The deployment exists; the request carries its fingerprint.
    Update(DeploymentResource),
}

impl ApplyRequest {
    /// The request body.
    #[must_use]
    pub const fn resource(&self) -> &DeploymentResource {
        match self {
            Self::Insert(r) | Self::Update(r) => r,
        }
    }

    /// `insert` or `update`.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Insert(_) => "insert",
            Self::Update(_) => "update",
        }
    }
}

/// Decides between insert and update and submits the request.
///
/// No retries happen here. A fingerprint conflict surfaces as
/// [`ControlError::PlanningConflict`](crate::ControlError::PlanningConflict)
/// and planning must restart from a fresh list.
#[derive(Clone)]
pub struct DeploymentPlanner {
    control_plane: Arc<dyn ControlPlane>,
    project: String,
}

impl DeploymentPlanner {
    /// Create a planner for a project.
    #[must_use]
    pub fn new(control_plane: Arc<dyn ControlPlane>, project: impl Into<String>) -> Self {
        Self {
            control_plane,
            project: project.into(),
        }
    }

    /// Look up the deployment with the given name.
    pub async fn find(&self, name: &DeploymentName) -> ControlResult<Option<Deployment>> {
        let deployments = self.control_plane.list_deployments(&self.project).await?;
        Ok(deployments.into_iter().find(|d| d.name == name.as_str()))
    }

    /// Build the apply request for `template`.
    pub async fn plan(
        &self,
        name: &DeploymentName,
        template: &TemplateDocument,
    ) -> ControlResult<ApplyRequest> {
        let content = template.to_content()?;
        let request = match self.find(name).await? {
            None => ApplyRequest::Insert(DeploymentResource::new(name.as_str(), None, content)),
            Some(existing) => {
                if existing.fingerprint.is_none() {
                    warn!(deployment = %name, "existing deployment has no fingerprint");
                }
                ApplyRequest::Update(DeploymentResource::new(
                    name.as_str(),
                    existing.fingerprint,
                    content,
                ))
            }
        };

        info!(deployment = %name, action = request.kind(), "planned deployment");
        Ok(request)
    }

    /// Submit a planned request and return the started operation.
    pub async fn submit(&self, request: &ApplyRequest) -> ControlResult<Operation> {
        let operation = match request {
            ApplyRequest::Insert(resource) => {
                self.control_plane
                    .insert_deployment(&self.project, resource)
                    .await?
            }
            ApplyRequest::Update(resource) => {
                self.control_plane
                    .update_deployment(&self.project, resource)
                    .await?
            }
        };

        info!(
            deployment = %request.resource().name,
            action = request.kind(),
            operation = %operation.name,
            "submitted deployment"
        );
        Ok(operation)
    }
}

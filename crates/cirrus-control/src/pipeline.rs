//! Package, deploy and remove pipelines.
//!
//! ```text
//! deploy:  validate ─▶ resolve bucket ─▶ compile ─▶ write templates
//!            ─▶ create deployment if absent ─▶ upload artifact
//!            ─▶ update deployment ─▶ set function policies ─▶ prune artifacts
//! remove:  resolve bucket ─▶ empty bucket ─▶ delete deployment
//! ```
//!
//! Every step that starts an operation waits for it before the next step
//! runs. A failure stops the pipeline and leaves earlier steps in place.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use futures::future::try_join_all;
use cirrus_compile::template::BUCKET_TYPE;
use cirrus_compile::{
    compile_service, naming, ArtifactLocation, CompiledService, ConfigValidator,
    DeploymentContext, DeploymentName, FunctionResourceId, IamBinding, ServiceDefinition,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bucket::BucketProvider;
use crate::config::ControlConfig;
use crate::control_plane::ControlPlane;
use crate::error::{ControlError, ControlResult};
use crate::monitor::DeploymentMonitor;
use crate::planner::{ApplyRequest, DeploymentPlanner};
use crate::retention::{ArtifactObject, ArtifactRetentionManager};
use crate::types::{DeploymentResource, Operation};

/// Create-time template file name inside the work directory.
pub const CREATE_TEMPLATE_FILE: &str = "configuration-template-create.json";

/// Full template file name inside the work directory.
pub const UPDATE_TEMPLATE_FILE: &str = "configuration-template-update.json";

/// Result of packaging a service.
#[derive(Debug, Clone)]
pub struct PackageOutcome {
    /// Target deployment.
    pub deployment: DeploymentName,
    /// Where the artifact goes.
    pub artifact: ArtifactLocation,
    /// Compiled templates and bindings.
    pub compiled: CompiledService,
    /// Written create template.
    pub create_template_path: PathBuf,
    /// Written update template.
    pub update_template_path: PathBuf,
}

/// Result of a deploy.
#[derive(Debug, Clone)]
pub struct DeployOutcome {
    /// Target deployment.
    pub deployment: DeploymentName,
    /// Deployment bucket used.
    pub bucket: String,
    /// Uploaded object path.
    pub artifact_path: String,
    /// Whether the deployment had to be created first.
    pub created: bool,
    /// The finished update operation.
    pub operation: Operation,
    /// Artifacts pruned after the update.
    pub pruned: Vec<ArtifactObject>,
    /// Per-function bindings applied after the update.
    pub function_bindings: BTreeMap<FunctionResourceId, Vec<IamBinding>>,
}

/// Result of a remove.
#[derive(Debug, Clone)]
pub struct RemoveOutcome {
    /// Removed deployment.
    pub deployment: DeploymentName,
    /// Bucket that was emptied, if one was found.
    pub bucket: Option<String>,
    /// Objects deleted from the bucket.
    pub emptied: usize,
    /// The finished delete operation.
    pub operation: Operation,
}

/// Drives the control plane and deployment bucket for one project.
pub struct Pipeline {
    control_plane: Arc<dyn ControlPlane>,
    buckets: BucketProvider,
    config: ControlConfig,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Create a pipeline. Buckets are opened with `config.storage`.
    #[must_use]
    pub fn new(control_plane: Arc<dyn ControlPlane>, config: ControlConfig) -> Self {
        Self {
            control_plane,
            buckets: BucketProvider::new(config.storage.clone()),
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Use `token` to abort operation monitoring.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Bucket provider used by the pipeline.
    #[must_use]
    pub const fn buckets(&self) -> &BucketProvider {
        &self.buckets
    }

    /// Validate, compile and write both templates to the work directory.
    ///
    /// Only reads from the control plane, to find an existing bucket.
    pub async fn package(
        &self,
        definition: &ServiceDefinition,
        ctx: &DeploymentContext,
        artifact: &Path,
    ) -> ControlResult<PackageOutcome> {
        ConfigValidator.validate_service(definition)?;

        let deployment = DeploymentName::new(ctx, self.config.deployment.partial);
        let bucket = self.resolve_bucket_name(definition, ctx, &deployment).await?;
        let directory = naming::artifact_directory_name(ctx, Utc::now());
        let artifact = ArtifactLocation::new(bucket, directory, artifact);

        let compiled = compile_service(definition, ctx, &artifact)?;

        let work_dir = &self.config.deployment.work_dir;
        let create_template_path = work_dir.join(CREATE_TEMPLATE_FILE);
        let update_template_path = work_dir.join(UPDATE_TEMPLATE_FILE);
        compiled.create_template.write_to(&create_template_path)?;
        compiled.update_template.write_to(&update_template_path)?;

        info!(
            deployment = %deployment,
            bucket = %artifact.bucket,
            directory = %artifact.directory,
            "packaged service"
        );

        Ok(PackageOutcome {
            deployment,
            artifact,
            compiled,
            create_template_path,
            update_template_path,
        })
    }

    /// Package, then apply the templates and upload the artifact.
    pub async fn deploy(
        &self,
        definition: &ServiceDefinition,
        ctx: &DeploymentContext,
        artifact: &Path,
    ) -> ControlResult<DeployOutcome> {
        let package = self.package(definition, ctx, artifact).await?;
        let planner = DeploymentPlanner::new(Arc::clone(&self.control_plane), &ctx.project);
        let monitor = self.monitor(ctx);

        let created = self.create_if_absent(&planner, &monitor, &package).await?;

        let bucket = self.buckets.open(&package.artifact.bucket)?;
        let artifact_path = package.artifact.object_path();
        bucket.upload(&artifact_path, artifact).await?;

        let request = planner
            .plan(&package.deployment, &package.compiled.update_template)
            .await?;
        let submitted = planner.submit(&request).await?;
        let operation = monitor.monitor(&submitted.name, &self.cancel).await?;

        self.apply_function_policies(ctx, &package.compiled.function_bindings)
            .await?;

        let pruned = ArtifactRetentionManager::new(self.config.retention.keep_count)
            .retain(&bucket)
            .await?;

        info!(
            deployment = %package.deployment,
            created,
            pruned = pruned.len(),
            "deployed service"
        );

        Ok(DeployOutcome {
            deployment: package.deployment,
            bucket: package.artifact.bucket,
            artifact_path,
            created,
            operation,
            pruned,
            function_bindings: package.compiled.function_bindings,
        })
    }

    /// Replace the IAM policy of every function that declares bindings.
    ///
    /// Every named function must already be deployed in the target region;
    /// nothing is set when one is missing. Policies are set concurrently.
    pub async fn apply_function_policies(
        &self,
        ctx: &DeploymentContext,
        policies: &BTreeMap<FunctionResourceId, Vec<IamBinding>>,
    ) -> ControlResult<()> {
        if policies.is_empty() {
            return Ok(());
        }

        let deployed = self
            .control_plane
            .list_functions(&ctx.project, &ctx.region)
            .await?;
        if let Some(missing) = policies
            .keys()
            .find(|function| !deployed.iter().any(|name| name == function.as_str()))
        {
            return Err(ControlError::FunctionNotFound {
                function: missing.to_string(),
                project: ctx.project.clone(),
                region: ctx.region.clone(),
            });
        }

        info!(functions = policies.len(), "setting function IAM policies");
        let updates = policies.iter().map(|(function, bindings)| async move {
            self.control_plane
                .set_function_iam_policy(function.as_str(), bindings)
                .await?;
            debug!(function = %function, bindings = bindings.len(), "set function IAM policy");
            Ok::<_, ControlError>(())
        });
        try_join_all(updates).await?;
        Ok(())
    }

    /// Empty the deployment bucket, then delete the deployment.
    pub async fn remove(
        &self,
        definition: &ServiceDefinition,
        ctx: &DeploymentContext,
    ) -> ControlResult<RemoveOutcome> {
        ConfigValidator.validate_service_name(&definition.service)?;

        let deployment = DeploymentName::new(ctx, self.config.deployment.partial);
        let bucket_name = match &definition.provider.deployment_bucket.name {
            Some(name) => Some(name.clone()),
            None => self.find_existing_bucket(ctx, &deployment).await?,
        };

        let emptied = match &bucket_name {
            Some(name) => self.buckets.open(name)?.empty().await?,
            None => {
                debug!(deployment = %deployment, "no deployment bucket to empty");
                0
            }
        };

        let submitted = self
            .control_plane
            .delete_deployment(&ctx.project, deployment.as_str())
            .await?;
        let operation = self.monitor(ctx).monitor(&submitted.name, &self.cancel).await?;

        info!(deployment = %deployment, emptied, "removed service");
        Ok(RemoveOutcome {
            deployment,
            bucket: bucket_name,
            emptied,
            operation,
        })
    }

    /// Bucket name: declared, else the one the deployment already owns, else fresh.
    async fn resolve_bucket_name(
        &self,
        definition: &ServiceDefinition,
        ctx: &DeploymentContext,
        deployment: &DeploymentName,
    ) -> ControlResult<String> {
        if let Some(name) = &definition.provider.deployment_bucket.name {
            return Ok(name.clone());
        }
        if let Some(existing) = self.find_existing_bucket(ctx, deployment).await? {
            debug!(bucket = %existing, "reusing existing deployment bucket");
            return Ok(existing);
        }
        Ok(naming::generate_bucket_name(ctx, Utc::now()))
    }

    async fn find_existing_bucket(
        &self,
        ctx: &DeploymentContext,
        deployment: &DeploymentName,
    ) -> ControlResult<Option<String>> {
        let prefix = naming::bucket_prefix(ctx);
        let resources = self
            .control_plane
            .list_resources(&ctx.project, deployment.as_str())
            .await?;
        Ok(resources
            .into_iter()
            .find(|r| {
                r.kind == BUCKET_TYPE && r.name.len() > prefix.len() && r.name.starts_with(&prefix)
            })
            .map(|r| r.name))
    }

    /// Insert the create template when the deployment does not exist yet.
    async fn create_if_absent(
        &self,
        planner: &DeploymentPlanner,
        monitor: &DeploymentMonitor,
        package: &PackageOutcome,
    ) -> ControlResult<bool> {
        if planner.find(&package.deployment).await?.is_some() {
            return Ok(false);
        }

        let content = package.compiled.create_template.to_content()?;
        let request = ApplyRequest::Insert(DeploymentResource::new(
            package.deployment.as_str(),
            None,
            content,
        ));
        let submitted = planner.submit(&request).await?;
        monitor.monitor(&submitted.name, &self.cancel).await?;
        Ok(true)
    }

    fn monitor(&self, ctx: &DeploymentContext) -> DeploymentMonitor {
        DeploymentMonitor::new(
            Arc::clone(&self.control_plane),
            &ctx.project,
            &self.config.monitor,
        )
    }
}

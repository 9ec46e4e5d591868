//! Service definition model.
//!
//! A service definition is a TOML document:
//!
//! ```toml
//! service = "my-service"
//!
//! [provider]
//! project = "my-project"
//! memorySize = 512
//!
//! [functions.hello]
//! handler = "hello"
//! events = [{ http = "path" }]
//! ```
//!
//! The model is read once per compile pass and never mutated afterwards.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{CompileResult, ConfigError};

/// Stage used when none is given.
pub const DEFAULT_STAGE: &str = "dev";

/// Region used when none is given.
pub const DEFAULT_REGION: &str = "us-central1";

/// Root of a service definition.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceDefinition {
    /// Service name.
    pub service: String,

    /// Provider-level defaults.
    #[serde(default)]
    pub provider: ProviderDefaults,

    /// Functions keyed by logical name.
    #[serde(default)]
    pub functions: BTreeMap<String, FunctionSpec>,

    /// Extra template resources appended verbatim after compiled ones.
    #[serde(default)]
    pub resources: Vec<Value>,

    /// Packaging options.
    #[serde(default)]
    pub package: PackageConfig,
}

impl ServiceDefinition {
    /// Parse a service definition from TOML text.
    pub fn from_toml(source: &str) -> CompileResult<Self> {
        Ok(toml::from_str(source)?)
    }

    /// Read and parse a service definition file.
    pub fn from_file(path: impl AsRef<Path>) -> CompileResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let source = std::fs::read_to_string(path)?;
        Self::from_toml(&source)
    }
}

/// Provider-level settings shared by every function.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDefaults {
    /// Cloud project identifier.
    #[serde(default)]
    pub project: String,

    /// Region, overridable from the command line.
    pub region: Option<String>,

    /// Stage, overridable from the command line.
    pub stage: Option<String>,

    /// Default runtime identifier.
    pub runtime: Option<String>,

    /// Default memory size in MB.
    pub memory_size: Option<u32>,

    /// Default timeout, e.g. `"60s"`.
    pub timeout: Option<String>,

    /// Base labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Base environment variables.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    /// Default VPC connector.
    pub vpc: Option<String>,

    /// Default VPC egress setting.
    pub vpc_egress: Option<String>,

    /// Default ingress setting.
    pub ingress: Option<String>,

    /// Default maximum instance count.
    pub max_instances: Option<u32>,

    /// Default runtime service account.
    pub service_account_email: Option<String>,

    /// Provider-level IAM configuration.
    #[serde(default)]
    pub iam: IamConfig,

    /// Allow unauthenticated invocation of every HTTP function.
    #[serde(default)]
    pub allow_unauthenticated: bool,

    /// Deployment bucket settings.
    #[serde(default)]
    pub deployment_bucket: DeploymentBucketConfig,
}

/// Deployment bucket settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeploymentBucketConfig {
    /// Explicit bucket name. Generated when absent.
    pub name: Option<String>,
}

/// IAM configuration at provider or function level.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IamConfig {
    /// Role bindings attached to function resources.
    #[serde(default)]
    pub bindings: Vec<BindingSpec>,

    /// Permissions granted to a generated service account. Provider only.
    #[serde(default)]
    pub permissions: Vec<PermissionSpec>,
}

/// An IAM binding as declared. Validation checks that both fields are set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BindingSpec {
    /// Role name.
    pub role: Option<String>,
    /// Member principals.
    pub members: Option<Vec<String>>,
}

/// A provider permission: either a bare permission or a scoped group.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PermissionSpec {
    /// Project-wide permission, e.g. `"storage.objects.get"`.
    Permission(String),
    /// Permissions scoped to one resource.
    Scoped(ScopedPermissions),
}

/// Permissions scoped to a single target resource.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopedPermissions {
    /// Permissions to grant.
    pub permissions: Vec<String>,
    /// Storage bucket target.
    pub bucket: Option<String>,
    /// Organisation target.
    pub organization_id: Option<String>,
    /// Folder target.
    pub folder_id: Option<String>,
    /// Project target.
    pub project_id: Option<String>,
    /// Cloud function target.
    pub cloud_function: Option<String>,
}

/// A function as declared in the service definition.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionSpec {
    /// Entry point inside the deployed artifact.
    pub handler: Option<String>,

    /// Raw trigger declarations; exactly one is accepted.
    pub events: Option<Vec<Map<String, Value>>>,

    /// Runtime identifier.
    pub runtime: Option<String>,

    /// Memory size in MB.
    pub memory_size: Option<u32>,

    /// Timeout, e.g. `"120s"`.
    pub timeout: Option<String>,

    /// Environment variables, merged over the provider's.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    /// Labels, merged over the provider's.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// VPC connector, short or fully-qualified.
    pub vpc: Option<String>,

    /// VPC egress setting.
    pub vpc_egress: Option<String>,

    /// Ingress setting.
    pub ingress: Option<String>,

    /// Maximum instance count.
    pub max_instances: Option<u32>,

    /// Runtime service account.
    pub service_account_email: Option<String>,

    /// Function-level IAM bindings.
    #[serde(default)]
    pub iam: IamConfig,

    /// Allow unauthenticated invocation (HTTP triggers only).
    #[serde(default)]
    pub allow_unauthenticated: bool,
}

/// Packaging options.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageConfig {
    /// Path of the packaged archive, produced by an external packager.
    pub artifact: Option<String>,
}

/// Immutable per-run context threaded through every compile call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentContext {
    /// Service name.
    pub service: String,
    /// Stage name.
    pub stage: String,
    /// Region.
    pub region: String,
    /// Cloud project.
    pub project: String,
}

impl DeploymentContext {
    /// Resolve the context from a definition and optional command-line overrides.
    ///
    /// Overrides win over provider values, which win over
    /// [`DEFAULT_STAGE`] / [`DEFAULT_REGION`].
    #[must_use]
    pub fn resolve(
        definition: &ServiceDefinition,
        stage: Option<&str>,
        region: Option<&str>,
    ) -> Self {
        let provider = &definition.provider;
        Self {
            service: definition.service.clone(),
            stage: stage
                .or(provider.stage.as_deref())
                .unwrap_or(DEFAULT_STAGE)
                .to_owned(),
            region: region
                .or(provider.region.as_deref())
                .unwrap_or(DEFAULT_REGION)
                .to_owned(),
            project: provider.project.clone(),
        }
    }

    /// `projects/{project}/locations/{region}`.
    #[must_use]
    pub fn location_path(&self) -> String {
        format!("projects/{}/locations/{}", self.project, self.region)
    }

    /// `{service}-{stage}`.
    #[must_use]
    pub fn service_with_stage(&self) -> String {
        format!("{}-{}", self.service, self.stage)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_definition() {
        let toml = r#"
            service = "my-service"

            [functions.func1]
            handler = "func1"
            events = [{ http = "foo" }]
        "#;

        let definition = ServiceDefinition::from_toml(toml).unwrap();
        assert_eq!(definition.service, "my-service");
        assert_eq!(definition.functions.len(), 1);

        let func = &definition.functions["func1"];
        assert_eq!(func.handler.as_deref(), Some("func1"));
        let events = func.events.as_ref().unwrap();
        assert_eq!(events[0]["http"], Value::String("foo".to_owned()));
        assert!(func.environment.is_empty());
        assert!(!func.allow_unauthenticated);
    }

    #[test]
    fn parse_full_provider() {
        let toml = r#"
            service = "my-service"

            [provider]
            project = "my-project"
            region = "europe-west1"
            runtime = "nodejs10"
            memorySize = 1024
            timeout = "120s"
            vpcEgress = "all"
            maxInstances = 5
            allowUnauthenticated = true

            [provider.labels]
            team = "core"

            [provider.environment]
            LOG_LEVEL = "debug"

            [provider.deploymentBucket]
            name = "my-bucket"

            [provider.iam]
            permissions = [
                "storage.objects.get",
                { permissions = ["pubsub.topics.publish"], projectId = "other" },
            ]

            [[provider.iam.bindings]]
            role = "roles/viewer"
            members = ["user:a@example.com"]
        "#;

        let definition = ServiceDefinition::from_toml(toml).unwrap();
        let provider = &definition.provider;
        assert_eq!(provider.project, "my-project");
        assert_eq!(provider.memory_size, Some(1024));
        assert_eq!(provider.vpc_egress.as_deref(), Some("all"));
        assert_eq!(provider.max_instances, Some(5));
        assert!(provider.allow_unauthenticated);
        assert_eq!(provider.labels["team"], "core");
        assert_eq!(provider.deployment_bucket.name.as_deref(), Some("my-bucket"));
        assert_eq!(provider.iam.bindings.len(), 1);
        assert_eq!(provider.iam.permissions.len(), 2);
        assert!(matches!(
            provider.iam.permissions[1],
            PermissionSpec::Scoped(ScopedPermissions { ref project_id, .. })
                if project_id.as_deref() == Some("other")
        ));
    }

    #[test]
    fn context_applies_defaults_and_overrides() {
        let definition = ServiceDefinition::from_toml(
            r#"
            service = "svc"
            [provider]
            project = "p"
            region = "europe-west1"
            "#,
        )
        .unwrap();

        let ctx = DeploymentContext::resolve(&definition, None, None);
        assert_eq!(ctx.stage, DEFAULT_STAGE);
        assert_eq!(ctx.region, "europe-west1");

        let ctx = DeploymentContext::resolve(&definition, Some("prod"), Some("asia-east1"));
        assert_eq!(ctx.stage, "prod");
        assert_eq!(ctx.region, "asia-east1");
        assert_eq!(ctx.location_path(), "projects/p/locations/asia-east1");
        assert_eq!(ctx.service_with_stage(), "svc-prod");
    }

    #[test]
    fn missing_file_is_reported() {
        let err = ServiceDefinition::from_file("/nonexistent/service.toml").unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }
}

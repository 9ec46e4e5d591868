//! Compiles validated functions into control-plane resources.
//!
//! Every overridable attribute resolves as: function value, else provider
//! value, else a built-in default. Labels and environment variables are
//! merged with function keys winning.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{CompileResult, ConfigError};
use crate::iam::{IamBinding, IamBindingAggregator};
use crate::naming;
use crate::roles::IamRoleGenerator;
use crate::service::{DeploymentContext, FunctionSpec, ProviderDefaults, ServiceDefinition};
use crate::template::{AccessControl, Resource, TemplateDocument};
use crate::trigger::{EventTrigger, EventTriggerBlock, HttpsTriggerBlock};
use crate::validate::ConfigValidator;

/// Resource type of a compiled function.
pub const FUNCTION_TYPE: &str = "gcp-types/cloudfunctions-v1:projects.locations.functions";

/// Runtime used when neither function nor provider declares one.
pub const DEFAULT_RUNTIME: &str = "nodejs10";

/// Memory size in MB used when neither function nor provider declares one.
pub const DEFAULT_MEMORY_MB: u32 = 256;

/// Timeout used when neither function nor provider declares one.
pub const DEFAULT_TIMEOUT: &str = "60s";

/// Where the packaged archive lives in the deployment bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocation {
    /// Deployment bucket name.
    pub bucket: String,
    /// Artifact directory inside the bucket.
    pub directory: String,
    /// Archive file name.
    pub file_name: String,
}

impl ArtifactLocation {
    /// Build a location from the local archive path; only its file name is kept.
    #[must_use]
    pub fn new(bucket: impl Into<String>, directory: impl Into<String>, artifact: &Path) -> Self {
        let file_name = artifact
            .file_name()
            .map_or_else(|| artifact.to_string_lossy(), |n| n.to_string_lossy())
            .into_owned();
        Self {
            bucket: bucket.into(),
            directory: directory.into(),
            file_name,
        }
    }

    /// Object path inside the bucket: `{directory}/{file}`.
    #[must_use]
    pub fn object_path(&self) -> String {
        format!("{}/{}", self.directory, self.file_name)
    }

    /// Fully-qualified `gs://` URL of the archive.
    #[must_use]
    pub fn source_archive_url(&self) -> String {
        naming::source_archive_url(&self.bucket, &self.directory, &self.file_name)
    }
}

/// Typed identity of a deployed function: `projects/{p}/locations/{r}/functions/{name}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FunctionResourceId(String);

impl FunctionResourceId {
    /// Identity of the function resource named `resource_name`.
    #[must_use]
    pub fn new(ctx: &DeploymentContext, resource_name: &str) -> Self {
        Self(format!("{}/functions/{resource_name}", ctx.location_path()))
    }

    /// Get the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FunctionResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for FunctionResourceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Properties of a function resource, in control-plane attribute names.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionProperties {
    pub parent: String,
    pub runtime: String,
    pub function: String,
    pub entry_point: String,
    pub available_memory_mb: u32,
    pub timeout: String,
    pub source_archive_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub https_trigger: Option<HttpsTriggerBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_trigger: Option<EventTriggerBlock>,
    /// Always emitted, possibly as `{}`.
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub environment_variables: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpc_connector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpc_connector_egress_settings: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingress_settings: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_instances: Option<u32>,
}

/// One compiled function.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFunction {
    /// Typed identity used to key IAM bindings.
    pub id: FunctionResourceId,
    /// The template resource.
    pub resource: Resource,
    /// Aggregated bindings, also attached to `resource` when non-empty.
    pub bindings: Vec<IamBinding>,
}

/// Compiles functions against one provider and deployment context.
#[derive(Debug, Clone)]
pub struct ResourceCompiler<'a> {
    ctx: &'a DeploymentContext,
    provider: &'a ProviderDefaults,
    provider_bindings: Vec<IamBinding>,
    service_account: Option<String>,
    aggregator: IamBindingAggregator,
}

impl<'a> ResourceCompiler<'a> {
    /// Create a compiler, checking the provider bindings.
    pub fn new(ctx: &'a DeploymentContext, provider: &'a ProviderDefaults) -> CompileResult<Self> {
        Ok(Self {
            ctx,
            provider,
            provider_bindings: IamBinding::parse_all("provider", &provider.iam.bindings)?,
            service_account: provider.service_account_email.clone(),
            aggregator: IamBindingAggregator,
        })
    }

    /// Run functions as `email` unless they declare their own account.
    #[must_use]
    pub fn with_service_account(mut self, email: impl Into<String>) -> Self {
        self.service_account = Some(email.into());
        self
    }

    /// Compile one function whose trigger was decided by validation.
    pub fn compile(
        &self,
        name: &str,
        spec: &FunctionSpec,
        trigger: &EventTrigger,
        artifact: &ArtifactLocation,
    ) -> CompileResult<CompiledFunction> {
        let provider = self.provider;
        let resource_name = format!("{}-{name}", self.ctx.service_with_stage());
        let id = FunctionResourceId::new(self.ctx, &resource_name);

        let egress = spec
            .vpc_egress
            .as_deref()
            .or(provider.vpc_egress.as_deref())
            .map(|v| normalise_egress(name, v))
            .transpose()?;
        let ingress = spec
            .ingress
            .as_deref()
            .or(provider.ingress.as_deref())
            .map(|v| normalise_ingress(name, v))
            .transpose()?;

        let (https_trigger, event_trigger) = match trigger {
            EventTrigger::Http { url } => (Some(HttpsTriggerBlock { url: url.clone() }), None),
            EventTrigger::Event(sub) => (None, Some(EventTriggerBlock::from(sub))),
        };

        let properties = FunctionProperties {
            parent: self.ctx.location_path(),
            runtime: spec
                .runtime
                .clone()
                .or_else(|| provider.runtime.clone())
                .unwrap_or_else(|| DEFAULT_RUNTIME.to_owned()),
            function: resource_name.clone(),
            entry_point: spec.handler.clone().unwrap_or_default(),
            available_memory_mb: spec
                .memory_size
                .or(provider.memory_size)
                .unwrap_or(DEFAULT_MEMORY_MB),
            timeout: spec
                .timeout
                .clone()
                .or_else(|| provider.timeout.clone())
                .unwrap_or_else(|| DEFAULT_TIMEOUT.to_owned()),
            source_archive_url: artifact.source_archive_url(),
            https_trigger,
            event_trigger,
            labels: merged(&provider.labels, &spec.labels),
            environment_variables: merged(&provider.environment, &spec.environment),
            service_account_email: spec
                .service_account_email
                .clone()
                .or_else(|| self.service_account.clone()),
            vpc_connector: spec.vpc.clone().or_else(|| provider.vpc.clone()),
            vpc_connector_egress_settings: egress,
            ingress_settings: ingress,
            max_instances: spec.max_instances.or(provider.max_instances),
        };

        let function_bindings =
            IamBinding::parse_all(&format!("function \"{name}\""), &spec.iam.bindings)?;
        let bindings = self.aggregator.aggregate(
            trigger,
            &function_bindings,
            &self.provider_bindings,
            spec.allow_unauthenticated || provider.allow_unauthenticated,
        );

        let mut resource = Resource::new(
            FUNCTION_TYPE,
            &resource_name,
            serde_json::to_value(&properties)?,
        );
        resource.access_control = AccessControl::from_bindings(bindings.clone());

        debug!(
            function = %name,
            resource = %resource_name,
            trigger = trigger.key(),
            bindings = bindings.len(),
            "compiled function"
        );

        Ok(CompiledFunction {
            id,
            resource,
            bindings,
        })
    }
}

/// Output of compiling a whole service.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledService {
    /// Create-time template: the deployment bucket only.
    pub create_template: TemplateDocument,
    /// Full template: bucket, generated identity, functions, custom resources.
    pub update_template: TemplateDocument,
    /// Non-empty aggregated bindings per function.
    pub function_bindings: BTreeMap<FunctionResourceId, Vec<IamBinding>>,
}

/// Validate and compile every function of a service, in function-name order.
pub fn compile_service(
    definition: &ServiceDefinition,
    ctx: &DeploymentContext,
    artifact: &ArtifactLocation,
) -> CompileResult<CompiledService> {
    let triggers = ConfigValidator.validate_service(definition)?;

    let create_template = TemplateDocument::core(&artifact.bucket, &ctx.region);
    let mut update_template = create_template.clone();

    let mut compiler = ResourceCompiler::new(ctx, &definition.provider)?;
    if let Some(identity) = IamRoleGenerator.generate(ctx, &definition.provider)? {
        compiler = compiler.with_service_account(identity.service_account_email);
        update_template.resources.extend(identity.resources);
    }

    let mut function_bindings = BTreeMap::new();
    for (name, trigger) in &triggers {
        let spec = &definition.functions[name];
        let compiled = compiler.compile(name, spec, trigger, artifact)?;
        update_template.resources.push(compiled.resource);
        if !compiled.bindings.is_empty() {
            function_bindings.insert(compiled.id, compiled.bindings);
        }
    }

    update_template.extend_custom(&definition.resources)?;

    info!(
        service = %ctx.service,
        stage = %ctx.stage,
        functions = triggers.len(),
        resources = update_template.resources.len(),
        "compiled service"
    );

    Ok(CompiledService {
        create_template,
        update_template,
        function_bindings,
    })
}

fn merged(
    base: &BTreeMap<String, String>,
    over: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut out = base.clone();
    out.extend(over.iter().map(|(k, v)| (k.clone(), v.clone())));
    out
}

/// Expand `all` / `private` and validate full egress names, ignoring case.
fn normalise_egress(function: &str, value: &str) -> CompileResult<String> {
    match value.to_ascii_uppercase().as_str() {
        "ALL" | "ALL_TRAFFIC" => Ok("ALL_TRAFFIC".to_owned()),
        "PRIVATE" | "PRIVATE_RANGES_ONLY" => Ok("PRIVATE_RANGES_ONLY".to_owned()),
        _ => Err(ConfigError::InvalidNetworkSetting {
            function: function.to_owned(),
            setting: "egress",
            value: value.to_owned(),
        }),
    }
}

fn normalise_ingress(function: &str, value: &str) -> CompileResult<String> {
    match value.to_ascii_uppercase().as_str() {
        "ALL" | "ALLOW_ALL" => Ok("ALLOW_ALL".to_owned()),
        "INTERNAL" | "ALLOW_INTERNAL_ONLY" => Ok("ALLOW_INTERNAL_ONLY".to_owned()),
        "INTERNAL_AND_GCLB" | "ALLOW_INTERNAL_AND_GCLB" => {
            Ok("ALLOW_INTERNAL_AND_GCLB".to_owned())
        }
        _ => Err(ConfigError::InvalidNetworkSetting {
            function: function.to_owned(),
            setting: "ingress",
            value: value.to_owned(),
        }),
    }
}

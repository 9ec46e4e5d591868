//! Cirrus compiler
//!
//! Validates a service definition and compiles it into the resource-template
//! document the control plane applies.
//!
//! # Pipeline
//!
//! ```text
//! ServiceDefinition ──▶ ConfigValidator ──▶ ResourceCompiler ──▶ TemplateDocument
//!                                               │
//!                                               ▼
//!                                      IamBindingAggregator
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::path::Path;
//! use cirrus_compile::{compile_service, ArtifactLocation, DeploymentContext, ServiceDefinition};
//!
//! let definition = ServiceDefinition::from_file("service.toml")?;
//! let ctx = DeploymentContext::resolve(&definition, Some("prod"), None);
//! let artifact = ArtifactLocation::new(
//!     "sls-my-service-prod-1700000000000",
//!     "serverless/my-service/prod/1700000000000-2023-11-14T22:13:20.000Z",
//!     Path::new(".cirrus/my-service.zip"),
//! );
//! let compiled = compile_service(&definition, &ctx, &artifact)?;
//! println!("{}", compiled.update_template.to_content()?);
//! ```

#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

pub mod compiler;
pub mod error;
pub mod iam;
pub mod naming;
pub mod roles;
pub mod service;
pub mod template;
pub mod trigger;
pub mod validate;

pub use compiler::{
    compile_service, ArtifactLocation, CompiledFunction, CompiledService, FunctionResourceId,
    ResourceCompiler,
};
pub use error::{CompileResult, ConfigError};
pub use iam::{IamBinding, IamBindingAggregator};
pub use naming::DeploymentName;
pub use roles::{GeneratedIdentity, IamRoleGenerator};
pub use service::{DeploymentContext, FunctionSpec, ProviderDefaults, ServiceDefinition};
pub use template::{Resource, TemplateDocument};
pub use trigger::EventTrigger;
pub use validate::ConfigValidator;

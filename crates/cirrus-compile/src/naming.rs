//! Deterministic names shared by local and remote state.
//!
//! The deployment name is the only correlation key between the service
//! definition and the control plane; nothing else is persisted.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::service::DeploymentContext;

/// Name of the control-plane deployment for a service and stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeploymentName(String);

impl DeploymentName {
    /// `sls-{service}-{stage}`, or `sls-{service}-{stage}-partial`.
    #[must_use]
    pub fn new(ctx: &DeploymentContext, partial: bool) -> Self {
        let base = format!("sls-{}-{}", ctx.service, ctx.stage);
        if partial {
            Self(format!("{base}-partial"))
        } else {
            Self(base)
        }
    }

    /// Get the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeploymentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for DeploymentName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Prefix shared by every deployment bucket of a service and stage.
#[must_use]
pub fn bucket_prefix(ctx: &DeploymentContext) -> String {
    format!("sls-{}-{}-", ctx.service, ctx.stage)
}

/// Fresh deployment bucket name: `sls-{service}-{stage}-{epochMillis}`.
#[must_use]
pub fn generate_bucket_name(ctx: &DeploymentContext, now: DateTime<Utc>) -> String {
    format!("{}{}", bucket_prefix(ctx), now.timestamp_millis())
}

/// Artifact directory: `serverless/{service}/{stage}/{epochMillis}-{isoDate}`.
///
/// The retention manager parses the millisecond prefix back out of this path.
#[must_use]
pub fn artifact_directory_name(ctx: &DeploymentContext, now: DateTime<Utc>) -> String {
    format!(
        "serverless/{}/{}/{}-{}",
        ctx.service,
        ctx.stage,
        now.timestamp_millis(),
        now.to_rfc3339_opts(SecondsFormat::Millis, true)
    )
}

/// `gs://{bucket}/{directory}/{file}`.
#[must_use]
pub fn source_archive_url(bucket: &str, directory: &str, file_name: &str) -> String {
    format!("gs://{bucket}/{directory}/{file_name}")
}

//! Implementation of the `cirrus` subcommands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use cirrus_compile::{DeploymentContext, ServiceDefinition};
use cirrus_control::{ControlConfig, DeploymentManagerClient, Pipeline};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::Target;

struct Loaded {
    definition: ServiceDefinition,
    ctx: DeploymentContext,
    pipeline: Pipeline,
}

fn load(target: &Target, cancel: CancellationToken) -> anyhow::Result<Loaded> {
    let definition = ServiceDefinition::from_file(&target.service)
        .with_context(|| format!("failed to read {}", target.service.display()))?;
    let ctx = DeploymentContext::resolve(
        &definition,
        target.stage.as_deref(),
        target.region.as_deref(),
    );

    let config = config(target)?;
    let client = DeploymentManagerClient::new(&config.control_plane)?;
    let pipeline = Pipeline::new(Arc::new(client), config).with_cancellation(cancel);

    info!(
        service = %ctx.service,
        stage = %ctx.stage,
        region = %ctx.region,
        project = %ctx.project,
        "loaded service"
    );
    Ok(Loaded {
        definition,
        ctx,
        pipeline,
    })
}

/// The `--config` file when given, else the default sources.
fn config(target: &Target) -> anyhow::Result<ControlConfig> {
    let config = match &target.config {
        Some(path) => ControlConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => ControlConfig::load()?,
    };
    Ok(config)
}

fn artifact_path(definition: &ServiceDefinition, flag: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    match flag.or_else(|| definition.package.artifact.as_ref().map(PathBuf::from)) {
        Some(path) => Ok(path),
        None => bail!("no artifact given; pass --artifact or set package.artifact"),
    }
}

pub async fn package(target: &Target, artifact: Option<PathBuf>) -> anyhow::Result<()> {
    let loaded = load(target, CancellationToken::new())?;
    let artifact = artifact_path(&loaded.definition, artifact)?;

    let outcome = loaded
        .pipeline
        .package(&loaded.definition, &loaded.ctx, &artifact)
        .await?;

    println!("Packaged {}", outcome.deployment);
    println!("  create template: {}", outcome.create_template_path.display());
    println!("  update template: {}", outcome.update_template_path.display());
    println!("  artifact: {}", outcome.artifact.source_archive_url());
    Ok(())
}

pub async fn deploy(
    target: &Target,
    artifact: Option<PathBuf>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let loaded = load(target, cancel)?;
    let artifact = artifact_path(&loaded.definition, artifact)?;
    if !artifact.is_file() {
        bail!("artifact {} does not exist", artifact.display());
    }

    let outcome = loaded
        .pipeline
        .deploy(&loaded.definition, &loaded.ctx, &artifact)
        .await?;

    println!("Deployed {}", outcome.deployment);
    println!("  bucket: {}", outcome.bucket);
    println!("  artifact: {}", outcome.artifact_path);
    if !outcome.function_bindings.is_empty() {
        println!(
            "  set IAM policies on {} function(s)",
            outcome.function_bindings.len()
        );
    }
    if !outcome.pruned.is_empty() {
        println!("  pruned {} old artifact(s)", outcome.pruned.len());
    }
    Ok(())
}

pub async fn remove(target: &Target, cancel: CancellationToken) -> anyhow::Result<()> {
    let loaded = load(target, cancel)?;

    let outcome = loaded
        .pipeline
        .remove(&loaded.definition, &loaded.ctx)
        .await?;

    println!("Removed {}", outcome.deployment);
    if let Some(bucket) = &outcome.bucket {
        println!("  emptied {bucket} ({} object(s))", outcome.emptied);
    }
    Ok(())
}

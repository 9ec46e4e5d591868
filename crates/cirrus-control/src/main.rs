//! Cirrus CLI - package, deploy and remove serverless services.

mod commands;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cirrus")]
#[command(about = "Deploy serverless services to the cloud control plane")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command.
#[derive(Args, Debug, Clone)]
struct Target {
    /// Service definition file
    #[arg(short, long, default_value = "service.toml")]
    service: PathBuf,

    /// Stage (overrides the provider stage)
    #[arg(long)]
    stage: Option<String>,

    /// Region (overrides the provider region)
    #[arg(long)]
    region: Option<String>,

    /// Tool configuration file (defaults to ./cirrus.toml when present)
    #[arg(short, long, env = "CIRRUS_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile templates into the work directory without applying them
    Package {
        #[command(flatten)]
        target: Target,

        /// Artifact archive (defaults to `package.artifact`)
        #[arg(short, long)]
        artifact: Option<PathBuf>,
    },

    /// Package, upload and apply the service
    Deploy {
        #[command(flatten)]
        target: Target,

        /// Artifact archive (defaults to `package.artifact`)
        #[arg(short, long)]
        artifact: Option<PathBuf>,
    },

    /// Empty the deployment bucket and delete the deployment
    Remove {
        #[command(flatten)]
        target: Target,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("cirrus_control=info".parse()?)
                .add_directive("cirrus_compile=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling");
            on_signal.cancel();
        }
    });

    match cli.command {
        Commands::Package { target, artifact } => commands::package(&target, artifact).await,
        Commands::Deploy { target, artifact } => commands::deploy(&target, artifact, cancel).await,
        Commands::Remove { target } => commands::remove(&target, cancel).await,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn target(args: &[&str]) -> Target {
        match Cli::try_parse_from(args).unwrap().command {
            Commands::Package { target, .. }
            | Commands::Deploy { target, .. }
            | Commands::Remove { target } => target,
        }
    }

    #[test]
    fn config_flag_is_optional() {
        let target = target(&["cirrus", "deploy"]);
        assert!(target.config.is_none());
        assert_eq!(target.service, PathBuf::from("service.toml"));
    }

    #[test]
    fn config_flag_names_the_file() {
        let target = target(&["cirrus", "remove", "--config", "ops/cirrus.toml"]);
        assert_eq!(target.config, Some(PathBuf::from("ops/cirrus.toml")));
    }
}

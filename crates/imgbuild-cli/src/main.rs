//! imgbuild - Container image builder CLI

mod commands;

use clap::{Parser, Subcommand};
use imgbuild_config::GlobalConfig;
use imgbuild_core::{Builder, StreamSettings};
use imgbuild_provider::{create_backend, ProviderType};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "imgbuild")]
#[command(author, version, about = "Container Image Builder", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Override default provider (docker or podman)
    #[arg(long, global = true, value_parser = ["docker", "podman"])]
    provider: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an image from a context directory
    Build {
        /// Build context directory
        dir: PathBuf,
        /// Image tag (name:tag)
        #[arg(short, long)]
        tag: Option<String>,
        /// Dockerfile path relative to the context
        #[arg(short = 'f', long = "file")]
        file: Option<String>,
        /// Build argument (KEY=VALUE), may be repeated
        #[arg(long = "build-arg", value_parser = parse_key_val)]
        build_arg: Vec<(String, String)>,
        /// Don't use cache when building the image
        #[arg(long)]
        no_cache: bool,
        /// Always pull base images
        #[arg(long)]
        pull: bool,
        /// Print the build summary as JSON on stdout (progress goes to stderr)
        #[arg(long)]
        json: bool,
    },

    /// Show global configuration
    Config {
        /// Write the default config file if it does not exist
        #[arg(long)]
        init: bool,
    },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("invalid KEY=VALUE: no `=` found in `{}`", s)),
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging (stderr, so stdout stays clean for build output)
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = match GlobalConfig::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("Ignoring invalid config: {}", e);
            GlobalConfig::default()
        }
    };

    match cli.command {
        Commands::Config { init } => commands::config(&config, init),
        Commands::Build {
            dir,
            tag,
            file,
            build_arg,
            no_cache,
            pull,
            json,
        } => {
            // Fail on a bad context before touching the daemon
            if !dir.is_dir() {
                anyhow::bail!("Build context not found: {}", dir.display());
            }

            let builder = connect(cli.provider.as_deref(), &config).await?;
            let args = commands::BuildArgs {
                dir,
                tag,
                dockerfile: file.unwrap_or_else(|| config.build.dockerfile.clone()),
                build_args: build_arg,
                no_cache: no_cache || config.build.no_cache,
                pull: pull || config.build.pull,
                json,
            };
            commands::build(&builder, args).await
        }
    }
}

async fn connect(provider: Option<&str>, config: &GlobalConfig) -> anyhow::Result<Builder> {
    let builder = match provider {
        Some(name) => {
            let provider_type: ProviderType = name.parse().map_err(anyhow::Error::msg)?;
            let backend = create_backend(provider_type, config).await?;
            Builder::new(Arc::from(backend)).with_settings(StreamSettings::from(&config.build))
        }
        None => Builder::connect(config).await?,
    };
    tracing::debug!("Using backend {:?}", builder.backend().info());
    Ok(builder)
}

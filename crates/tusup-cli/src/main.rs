//! tusup - resumable uploads to TUS endpoints from the command line

mod commands;
mod config;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use tusup_client::Uploader;

use crate::output::{OutputContext, OutputFormat};

#[derive(Parser)]
#[command(name = "tusup")]
#[command(author, version, about = "Resumable TUS upload client")]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path (TOML or YAML)
    #[arg(short, long, env = "TUSUP_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    output: OutputFormat,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Minimal output (for scripting)
    #[arg(short, long)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload (or resume uploading) a file to an existing upload URL
    Upload {
        /// Upload URL created by the server
        url: String,

        /// File to upload
        file: PathBuf,

        /// Offset to start from (defaults to 0)
        #[arg(long)]
        offset: Option<u64>,

        /// Send at most this many bytes per PATCH
        #[arg(long)]
        chunk_size: Option<u64>,
    },

    /// Ask the server how many bytes of an upload it has stored
    Offset {
        /// Upload URL
        url: String,
    },

    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    let file_config = config::load(cli.config.as_deref())?;
    tracing::debug!(?file_config, "Loaded configuration");
    let ctx = OutputContext::new(cli.output, cli.no_color, cli.quiet);

    match cli.command {
        Commands::Upload {
            url,
            file,
            offset,
            chunk_size,
        } => {
            let client_config = config::merge_with_args(file_config, chunk_size);
            let mut uploader = create_uploader(client_config)?;
            commands::upload(&mut uploader, &url, &file, offset, &ctx).await?;
        }

        Commands::Offset { url } => {
            let uploader = create_uploader(file_config)?;
            commands::offset(&uploader, &url, &ctx).await?;
        }

        Commands::Config => {
            commands::show_config(&file_config, cli.config.as_deref(), &ctx)?;
        }
    }

    Ok(())
}

fn create_uploader(config: tusup_client::ClientConfig) -> Result<Uploader> {
    Uploader::new(config).context("Failed to create uploader")
}

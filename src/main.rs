mod cli;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use embedcache::config::EmbedCacheConfig;

#[derive(Parser)]
#[command(name = "embedcache", version, about = "Cached, batched text embeddings")]
struct Cli {
    /// Config file (defaults to ~/.embedcache/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Embed texts, reusing cached vectors where possible
    Embed {
        /// Embedding role: query or document
        #[arg(long, default_value = "document")]
        kind: String,
        /// Read additional texts from a file, one per line
        #[arg(long)]
        file: Option<PathBuf>,
        /// Include the vectors in the output
        #[arg(long)]
        vectors: bool,
        /// Texts to embed
        texts: Vec<String>,
    },
    /// Show cache statistics
    Stats,
    /// Remove expired entries from the snapshot
    Prune,
    /// Print all live entries as JSON
    Export,
    /// Import entries from an `export` JSON file
    Import {
        file: PathBuf,
    },
    /// Delete every cached embedding
    Clear,
    /// Check model files and snapshot health
    Doctor,
    /// Manage the embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download the embedding model to the configured model directory
    Download,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EmbedCacheConfig::load_from(path)?,
        None => EmbedCacheConfig::load()?,
    };

    // Log to stderr so stdout stays clean for command output.
    let filter = EnvFilter::try_new(&config.logging.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Embed {
            kind,
            file,
            vectors,
            texts,
        } => {
            cli::embed::embed(&config, &kind, texts, file.as_deref(), vectors).await?;
        }
        Command::Stats => cli::stats::stats(&config).await?,
        Command::Prune => cli::prune::prune(&config).await?,
        Command::Export => cli::export::export(&config).await?,
        Command::Import { file } => cli::import::import(&config, &file).await?,
        Command::Clear => cli::clear::clear(&config).await?,
        Command::Doctor => cli::doctor::doctor(&config)?,
        Command::Model { action } => match action {
            ModelAction::Download => {
                cli::model_download(&config.embedding).await?;
            }
        },
    }

    Ok(())
}

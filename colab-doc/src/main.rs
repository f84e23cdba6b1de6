//! Operator CLI for colab statement and sheet documents

use anyhow::Result;
use clap::Parser;
use colab_doc::commands::{self, Command};
use colab_doc_core::config::StoreConfig;
use colab_doc_core::events::drain;
use colab_doc_core::storage::crdt::DocumentStore;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "colab-doc")]
#[command(about = "Inspect and edit colab documents as a given principal")]
struct Cli {
    /// Directory holding document snapshots
    #[arg(long, global = true, env = "COLAB_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// JSON store configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Principals to act as, comma separated
    #[arg(
        long = "as",
        global = true,
        env = "COLAB_PRINCIPALS",
        value_delimiter = ','
    )]
    principals: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => StoreConfig::from_file(path)?,
        None => StoreConfig::from_env(),
    };
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    info!("using data dir {}", config.data_dir.display());

    let mut store = DocumentStore::new(config)?;
    let mut events = store.events().subscribe();
    let output = commands::run(&mut store, &cli.principals, cli.command)?;
    commands::log_events(&drain(&mut events));
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

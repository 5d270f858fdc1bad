//! # OAI-PMH server CLI (`oaipmh`)
//!
//! ## Usage
//!
//! ```bash
//! oaipmh --config ./config/oaipmh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `oaipmh serve` | Start the OAI-PMH HTTP endpoint |
//! | `oaipmh formats` | Load the transform definitions and list metadata formats |
//! | `oaipmh sets` | Resolve the set catalog against Solr |
//!
//! Logging is controlled with `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fcrepo_oaipmh::config;
use fcrepo_oaipmh::server;
use fcrepo_oaipmh::sets::SetCatalog;
use fcrepo_oaipmh::solr::{Index, SolrClient};
use fcrepo_oaipmh::transform::TransformRegistry;

/// OAI-PMH data provider for a Fedora repository indexed in Solr.
#[derive(Parser)]
#[command(name = "oaipmh", version)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Values may be overridden by environment variables such as
    /// `SOLR_URL` and `OAI_NAMESPACE_IDENTIFIER`. See
    /// `config/oaipmh.example.toml`.
    #[arg(long, global = true, default_value = "./config/oaipmh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    Serve {
        /// Address and port to listen on (overrides `[server].listen`).
        #[arg(long, value_name = "ADDRESS:PORT")]
        listen: Option<String>,
    },

    /// List the metadata formats defined in the transforms directory.
    Formats,

    /// List the harvestable sets.
    Sets,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve { listen } => {
            server::run_server(&cfg, listen.as_deref()).await?;
        }
        Commands::Formats => {
            let registry =
                TransformRegistry::load_dir(&cfg.transforms.dir, &cfg.transforms.prefixes)
                    .context("Failed to load transforms")?;
            for format in registry.list_formats() {
                println!("{}\t{}\t{}", format.prefix, format.namespace, format.schema);
            }
        }
        Commands::Sets => {
            let engine = Arc::new(SolrClient::from_config(&cfg.solr)?);
            let index = Arc::new(Index::new(cfg.solr.clone(), engine));
            let sets = SetCatalog::new(index)
                .list_sets()
                .await
                .context("Failed to resolve the set catalog")?;
            if sets.is_empty() {
                println!("No sets configured.");
            }
            for set in sets.values() {
                println!("{}\t{}\t{}", set.spec, set.name, set.filter);
            }
        }
    }

    Ok(())
}

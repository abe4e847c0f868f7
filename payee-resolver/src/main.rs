//! payee-resolver - operator CLI
//!
//! Supplier cache lookups and direct inspection of provider bulk searches.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use payee_common::config::{init_tracing, load_toml, resolve_config_path, CONFIG_ENV_VAR};
use payee_resolver::{BulkSearchClient, ResolverConfig, SearchStatus, SupplierCache};
use serde_json::json;
use tracing::info;

/// Command-line arguments for payee-resolver
#[derive(Parser, Debug)]
#[command(name = "payee-resolver")]
#[command(about = "Payee identity resolution tools")]
#[command(version)]
struct Args {
    /// Configuration file (default: $PAYEE_RESOLVER_CONFIG, then ~/.config/payee-resolver/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Match payee names against the supplier snapshot
    Lookup {
        /// Supplier snapshot JSON (overrides `supplier_snapshot`)
        #[arg(long)]
        snapshot: Option<PathBuf>,

        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Poll the status of a provider bulk search
    Status { search_id: String },

    /// Print every result of a COMPLETED provider bulk search as JSON
    Results {
        search_id: String,

        #[arg(long)]
        page_size: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref(), CONFIG_ENV_VAR)?;
    let mut config: ResolverConfig = load_toml(config_path.as_deref())?;

    init_tracing(&config.logging, payee_resolver::DEFAULT_LOG_FILTER)?;
    if let Some(path) = &config_path {
        info!("Configuration: {}", path.display());
    }

    match args.command {
        Command::Lookup { snapshot, names } => {
            let snapshot = snapshot
                .or(config.supplier_snapshot)
                .context("No supplier snapshot given (--snapshot or supplier_snapshot)")?;

            let cache = SupplierCache::new();
            let loaded = cache
                .load_snapshot_file(&snapshot)
                .with_context(|| format!("Failed to load {}", snapshot.display()))?;
            info!("Loaded {} suppliers", loaded);

            let results: Vec<_> = names
                .iter()
                .map(|name| {
                    json!({
                        "input": name,
                        "normalized": payee_common::normalize_name(name),
                        "match": cache.lookup(name),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&results)?);
        }

        Command::Status { search_id } => {
            config.provider.validate()?;
            let client = BulkSearchClient::from_config(&config.provider)?;
            let search = client.poll(&client.attach(&search_id)).await?;

            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "searchId": search_id,
                    "status": search.status,
                    "failureReason": search.failure_reason,
                }))?
            );
        }

        Command::Results { search_id, page_size } => {
            if let Some(page_size) = page_size {
                config.provider.page_size = page_size;
            }
            config.provider.validate()?;
            let client = BulkSearchClient::from_config(&config.provider)?;

            let search = client.poll(&client.attach(&search_id)).await?;
            if search.status != SearchStatus::Completed {
                bail!(
                    "Search {} is {}{}",
                    search_id,
                    search.status.as_str(),
                    search
                        .failure_reason
                        .map(|r| format!(" ({})", r))
                        .unwrap_or_default()
                );
            }

            let items = client.drain_results(&search).await?;
            info!("Fetched {} result items", items.len());
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
    }

    Ok(())
}

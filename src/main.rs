//! Main entry point for the vanity-pool daemon
//!
//! Without a subcommand the daemon keeps the pool topped up until Ctrl-C.
//! `status` and `fetch` print JSON to stdout; in program-derived mode they
//! take `--creator` and `--mint`, and `status` without them reports the whole
//! pool.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use solana_sdk::pubkey::Pubkey;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vanity_pool::pool::{PoolConfig, PoolManager};
use vanity_pool::types::{KeyContext, KeyLabel, PoolKey};

const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "vanity-pool")]
#[command(about = "Keeps a pool of vanity addresses ready to hand out")]
#[command(version)]
struct Cli {
    /// JSON config file; defaults apply without it
    #[arg(short, long, env = "VANITY_POOL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print pool status as JSON
    Status {
        #[command(flatten)]
        context: ContextArgs,
    },
    /// Claim one candidate and print it as JSON
    Fetch {
        #[command(flatten)]
        context: ContextArgs,
    },
}

#[derive(Args)]
struct ContextArgs {
    /// Creator of the token the address is for
    #[arg(long, value_parser = parse_pubkey, requires = "mint")]
    creator: Option<Pubkey>,

    /// Mint of the token the address is for
    #[arg(long, value_parser = parse_pubkey, requires = "creator")]
    mint: Option<Pubkey>,
}

impl ContextArgs {
    fn key(&self) -> PoolKey {
        match (self.creator, self.mint) {
            (Some(creator), Some(mint)) => Some(KeyContext::new(creator, mint)),
            _ => None,
        }
    }
}

fn parse_pubkey(s: &str) -> Result<Pubkey, String> {
    Pubkey::from_str(s).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging; RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => PoolConfig::from_file(path)?,
        None => PoolConfig::default(),
    };

    let manager = PoolManager::start(config).await?;

    match cli.command {
        None => run_daemon(&manager).await?,
        Some(Command::Status { context }) => {
            let status = manager.pool_status(context.key()).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Some(Command::Fetch { context }) => {
            let key = context.key();
            let candidate = manager.fetch_candidate(key).await?;
            info!("Claimed {} for {}", candidate.address, KeyLabel(&key));
            println!("{}", serde_json::to_string_pretty(&candidate)?);
        }
    }

    manager.shutdown().await;
    Ok(())
}

/// Log pool status every minute until Ctrl-C.
async fn run_daemon(manager: &PoolManager) -> Result<()> {
    info!(
        "vanity-pool running (pattern {}, pool file {}); press Ctrl-C to stop",
        manager.config().pattern,
        manager.config().pool_file.display()
    );

    let mut ticker = tokio::time::interval(STATUS_LOG_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let metrics = manager.metrics();
                info!(
                    "Pool: [{}] served {} pooled / {} on demand, {} unavailable, {} generated, {} refill failures",
                    manager.summary().await,
                    metrics.served_from_pool,
                    metrics.served_on_demand,
                    metrics.unavailable,
                    metrics.generated,
                    metrics.refill_failures
                );
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                info!("Shutdown requested");
                break;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_context_and_config() {
        let creator = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let (creator_arg, mint_arg) = (creator.to_string(), mint.to_string());
        let cli = Cli::try_parse_from([
            "vanity-pool",
            "--config",
            "pool.json",
            "fetch",
            "--creator",
            creator_arg.as_str(),
            "--mint",
            mint_arg.as_str(),
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("pool.json")));
        match cli.command {
            Some(Command::Fetch { context }) => {
                assert_eq!(context.key(), Some(KeyContext::new(creator, mint)));
            }
            _ => panic!("expected fetch"),
        }
    }

    #[test]
    fn test_cli_without_context_or_command() {
        let cli = Cli::try_parse_from(["vanity-pool", "status"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Status { ref context }) if context.key().is_none()));

        let cli = Cli::try_parse_from(["vanity-pool"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_rejects_half_a_context_and_bad_keys() {
        let creator = Pubkey::new_unique().to_string();
        assert!(Cli::try_parse_from(["vanity-pool", "fetch", "--creator", creator.as_str()]).is_err());
        assert!(Cli::try_parse_from(["vanity-pool", "fetch", "--creator", "0OIl", "--mint", creator.as_str()]).is_err());
    }
}

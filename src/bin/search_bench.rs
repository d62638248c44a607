//! Throughput probe: attempts per second for portable and accelerated search
//! in both generation modes.

use anyhow::Result;
use clap::Parser;
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use tracing::{info, warn, Level};
use vanity_pool::pool::{
    AcceleratorConfig, CandidateSource, KeypairSource, NativeAccelerator, PortableSearch,
    ProgramAddressSource, SearchBudget, SearchEngine, Searcher, VanityPattern,
};
use vanity_pool::types::KeyContext;

/// Long enough that no run ever matches, so every run spends its full budget.
const UNREACHABLE_SUFFIX: &str = "zzzzzzzzzz";

#[derive(Parser)]
#[command(name = "search_bench")]
#[command(about = "Measure vanity search throughput")]
struct BenchArgs {
    /// Attempts per run
    #[arg(long, default_value_t = 50_000)]
    attempts: u64,

    /// Accelerator worker threads (0 = one per core)
    #[arg(long, default_value_t = 0)]
    threads: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let args = BenchArgs::parse();
    let attempts = args.attempts;
    info!("Measuring search throughput over {} attempts per run", attempts);

    let pattern = VanityPattern::suffix(UNREACHABLE_SUFFIX)?;
    let budget = SearchBudget {
        max_attempts: attempts,
        max_wall_clock_ms: 120_000,
        batch_size: 256,
    };

    let context = KeyContext::new(Pubkey::new_unique(), Pubkey::new_unique());
    let sources: Vec<(&str, Arc<dyn CandidateSource>)> = vec![
        ("keypair", Arc::new(KeypairSource) as Arc<dyn CandidateSource>),
        (
            "program-derived",
            Arc::new(ProgramAddressSource::new(Pubkey::new_unique(), "vanity", context, 8)?)
                as Arc<dyn CandidateSource>,
        ),
    ];

    let accelerator_config = AcceleratorConfig {
        enabled: true,
        threads: args.threads,
    };
    let accelerated = match NativeAccelerator::detect(&accelerator_config) {
        Ok(accelerator) => Some(SearchEngine::with_accelerator(accelerator)),
        Err(e) => {
            warn!("Accelerated path unavailable: {}", e);
            None
        }
    };

    for (mode, source) in sources {
        let outcome = PortableSearch.search(Arc::clone(&source), &pattern, &budget).await;
        let stats = outcome.stats();
        info!(
            "{:>16} portable:    {:>10.0} attempts/s ({} attempts, {} yields, {:?})",
            mode,
            stats.attempts_per_second(),
            stats.attempts,
            stats.yields,
            stats.elapsed
        );

        if let Some(engine) = &accelerated {
            let outcome = engine.search(Arc::clone(&source), &pattern, &budget).await;
            let stats = outcome.stats();
            info!(
                "{:>16} accelerated: {:>10.0} attempts/s ({} attempts, {:?})",
                mode,
                stats.attempts_per_second(),
                stats.attempts,
                stats.elapsed
            );
        }
    }

    Ok(())
}

//! Probe: sold-price sampling for a single query
//!
//! Runs the configured sampler (or one transport explicitly) for a search
//! query and prints:
//! - Raw sold prices and fetch latency
//! - The profit analysis for an optional buy price
//! - The alert text the watcher would post

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::{Parser, ValueEnum};

use resell_watcher::analyzer::analyze;
use resell_watcher::config::{AppConfig, CONFIG_PATH};
use resell_watcher::formatter::AlertFormatter;
use resell_watcher::sampler::{
    FindingApiSampler, ListingSampler, SoldPageSampler, build_sampler, sold_listings_url,
};

#[derive(Clone, Copy, ValueEnum)]
enum Source {
    /// Whatever the config selects (API with page fallback)
    Auto,
    /// Finding API only
    Api,
    /// Sold listings page only
    Page,
}

#[derive(Parser)]
#[command(name = "probe_sold", about = "Fetch eBay sold prices and print a profit analysis")]
struct Args {
    /// Product search query
    query: String,

    /// Buy price to compare against
    #[arg(long, default_value_t = 0.0)]
    buy_price: f64,

    #[arg(long, value_enum, default_value_t = Source::Auto)]
    source: Source,

    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut config = AppConfig::load_or_default(&args.config)?;
    config.apply_env(|key| std::env::var(key).ok())?;
    let ebay = &config.ebay;
    let timeout = Duration::from_secs(ebay.timeout_secs);

    let sampler: Arc<dyn ListingSampler> = match args.source {
        Source::Auto => build_sampler(ebay)?,
        Source::Api => {
            let app_id = ebay
                .app_id
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("--source api needs EBAY_APP_ID or [ebay].app_id"))?;
            Arc::new(FindingApiSampler::new(app_id, &ebay.global_id, ebay.max_results, timeout)?)
        }
        Source::Page => Arc::new(SoldPageSampler::new(ebay.max_results, timeout)?),
    };

    println!("=== Probe: eBay sold prices ===");
    println!("Query: {}", args.query);
    println!("Sampler: {}", sampler.name());
    println!("Search page: {}", sold_listings_url(&args.query));
    println!();

    // Errors are printed rather than degraded so failures stay visible
    println!("--- 1. Fetch ---");
    let start = Instant::now();
    let prices = match tokio::time::timeout(timeout, sampler.fetch(&args.query)).await {
        Ok(Ok(prices)) => prices,
        Ok(Err(e)) => {
            println!("Fetch failed: {e:#}");
            Vec::new()
        }
        Err(_) => {
            println!("Fetch timed out after {timeout:?}");
            Vec::new()
        }
    };
    println!("Latency: {:?}", start.elapsed());
    println!("Prices ({}): {:?}", prices.len(), prices);
    println!();

    println!("--- 2. Analysis (buy price {:.2}) ---", args.buy_price);
    let analysis = analyze(args.buy_price, &prices)?;
    println!("{}", serde_json::to_string_pretty(&analysis)?);
    println!();

    println!("--- 3. Alert text ---");
    let formatter = AlertFormatter::new(config.discord.notify_role_id);
    println!("{}", formatter.format(&args.query, &analysis, &[], None));
    println!();

    println!("=== Probe complete ===");
    Ok(())
}

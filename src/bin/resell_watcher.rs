use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};

use resell_watcher::DISCORD_GATEWAY_URL;
use resell_watcher::config::{AppConfig, CONFIG_PATH};
use resell_watcher::discord::DiscordClient;
use resell_watcher::gateway::{self, GatewayEvent, WATCHER_INTENTS};
use resell_watcher::sampler::build_sampler;
use resell_watcher::watcher::ChannelWatcher;

#[derive(Parser)]
#[command(name = "resell-watcher", about = "Discord deal watcher with eBay resale estimates")]
struct Args {
    /// Path to the TOML config file (optional; env vars override it)
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Analyze alerts but log them instead of posting to Discord
    #[arg(long)]
    dry_run: bool,
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
    let settings = config.watch_settings()?;

    let sampler = build_sampler(&config.ebay)?;
    let sample_timeout = Duration::from_secs(config.ebay.timeout_secs);

    let mode = if args.dry_run { "dry-run" } else { "live" };
    info!(
        "Starting resell-watcher ({mode}): channel={} alerts={} role={:?} sampler={}",
        settings.monitored_channel_id,
        settings.alert_channel_id,
        settings.notify_role_id,
        sampler.name(),
    );

    let poster = if args.dry_run {
        None
    } else {
        Some(DiscordClient::new(&settings.token))
    };
    let token = settings.token.clone();
    let watcher = Arc::new(ChannelWatcher::new(settings, sampler, sample_timeout, poster));

    let (tx, mut rx) = mpsc::channel::<GatewayEvent>(64);
    let mut gateway_task = tokio::spawn(async move {
        gateway::run(DISCORD_GATEWAY_URL, &token, WATCHER_INTENTS, tx).await
    });

    info!("Connecting to Discord gateway. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            result = &mut gateway_task => {
                // Only a fatal close ends the gateway loop
                return result?;
            }
            event = rx.recv() => {
                match event {
                    Some(GatewayEvent::Ready { user_id }) => {
                        info!("Connected as user {user_id}, monitoring for deals");
                        watcher.set_bot_user(user_id);
                    }
                    Some(GatewayEvent::MessageCreate(msg)) => {
                        let watcher = Arc::clone(&watcher);
                        tokio::spawn(async move {
                            watcher.handle_message(&msg).await;
                        });
                    }
                    None => {
                        warn!("Gateway event channel closed");
                        return gateway_task.await?;
                    }
                }
            }
        }
    }

    gateway_task.abort();
    Ok(())
}

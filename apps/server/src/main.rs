//! Token Alert Bot - Headless Server
//!
//! Watches the XRP Ledger for new trust lines and alerts Telegram subscribers
//! about tokens it has not seen before.

mod config;
mod pipeline;

use clap::Parser;
use config::{AppConfig, ConfigError, Tunables};
use pipeline::AlertPipeline;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tokenwatch_alerts::{AlertDispatcher, Database, DbError, SubscriberRegistry, TelegramBot, TelegramError};
use tokenwatch_engine::{DexScreenerClient, MarketDataError, NoveltySet, StoreError, TokenClassifier};
use tokenwatch_ledger::{spawn_stream, LedgerMonitor, RangeScanner, WsRangeSource};

/// Token Alert Bot CLI
#[derive(Parser, Debug)]
#[command(name = "tokenwatch")]
#[command(about = "XRPL new token alert bot for Telegram", long_about = None)]
struct Args {
    /// Log level: trace, debug, info, warn, error (RUST_LOG overrides)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// First reconnect delay in milliseconds
    #[arg(long, default_value_t = 5_000)]
    reconnect_base_ms: u64,

    /// Maximum reconnect delay in milliseconds
    #[arg(long, default_value_t = 300_000)]
    reconnect_max_ms: u64,

    /// Seconds between subscriber membership re-checks
    #[arg(long, default_value_t = 86_400)]
    reverify_interval_secs: u64,

    /// Market-data lookups in flight per scanned range
    #[arg(long, default_value_t = 4)]
    max_concurrent_lookups: usize,

    /// Per-recipient alert delivery timeout in seconds
    #[arg(long, default_value_t = 10)]
    delivery_timeout_secs: u64,

    /// Ledger range fetch timeout in seconds
    #[arg(long, default_value_t = 30)]
    scan_timeout_secs: u64,
}

impl From<&Args> for Tunables {
    fn from(args: &Args) -> Self {
        Tunables {
            reconnect_base_ms: args.reconnect_base_ms,
            reconnect_max_ms: args.reconnect_max_ms,
            reverify_interval_secs: args.reverify_interval_secs,
            max_concurrent_lookups: args.max_concurrent_lookups,
            delivery_timeout_secs: args.delivery_timeout_secs,
            scan_timeout_secs: args.scan_timeout_secs,
            ..Default::default()
        }
    }
}

#[derive(Debug, Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("Failed to load subscribers: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Telegram(#[from] TelegramError),
    #[error(transparent)]
    MarketData(#[from] MarketDataError),
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let result = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .try_init();

    if let Err(e) = result {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

async fn run(args: Args) -> Result<(), StartupError> {
    let config = AppConfig::from_env(Tunables::from(&args))?;

    info!("🚀 Token Alert Bot starting...");
    info!("  Ledger server: {}", config.xrpl_ws_url);
    info!("  Required channel: {}", config.required_channel_id);
    info!("  Market data: {}", config.market_data_url);
    info!(
        "  Persistence: {}",
        config.database_url.as_deref().unwrap_or("disabled (in-memory)")
    );

    let db = match &config.database_url {
        Some(url) => Some(Database::connect(url).await?),
        None => None,
    };

    let novelty = Arc::new(NoveltySet::new());
    if let Some(db) = &db {
        novelty.seed(db.list_seen_tokens().await?);
        info!("  Known tokens: {}", novelty.len());
    }

    let bot = Arc::new(TelegramBot::new(
        &config.telegram_token,
        &config.required_channel_id,
        &config.required_channel_url,
    )?);

    let mut registry = SubscriberRegistry::new(bot.clone());
    if let Some(db) = &db {
        registry = registry.with_store(Arc::new(db.clone()));
    }
    registry.load().await?;
    let registry = Arc::new(registry);
    info!("  Subscribers: {}", registry.len());

    let market = Arc::new(DexScreenerClient::new(
        config.market_data_url.clone(),
        config.market_timeout(),
    )?);
    let mut classifier = TokenClassifier::new(config.classifier_config(), market, novelty);
    if let Some(db) = &db {
        classifier = classifier.with_store(Arc::new(db.clone()));
    }

    let dispatcher = AlertDispatcher::new(registry.clone(), bot.clone(), config.delivery_timeout());
    let pipeline = AlertPipeline::new(classifier, dispatcher);

    let bot_handle = tokio::spawn(bot.clone().run(registry.clone()));
    let reverify_handle = tokio::spawn(
        registry
            .clone()
            .run_reverify_loop(bot.clone(), config.reverify_interval()),
    );

    let (rx, stream_handle) = spawn_stream(config.stream_config());
    let scanner = RangeScanner::new(WsRangeSource::new(
        config.xrpl_ws_url.clone(),
        config.scan_timeout(),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut monitor_handle =
        tokio::spawn(LedgerMonitor::new(scanner, pipeline).run(rx, shutdown_rx));

    info!("Monitoring for new tokens. Press Ctrl+C to stop...");

    let finished = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
            warn!("Shutdown signal received");
            None
        }
        result = &mut monitor_handle => {
            error!("Ledger monitor exited unexpectedly");
            Some(result)
        }
    };

    // The monitor finishes its current scan and returns without draining the queue.
    let _ = shutdown_tx.send(true);
    stream_handle.abort();
    bot_handle.abort();
    reverify_handle.abort();

    let monitor = match finished {
        Some(result) => result.ok(),
        None => match tokio::time::timeout(Duration::from_secs(5), &mut monitor_handle).await {
            Ok(result) => result.ok(),
            Err(_) => {
                warn!("Ledger monitor did not stop in time, aborting");
                monitor_handle.abort();
                None
            }
        },
    };

    if let Some(monitor) = monitor {
        let stats = monitor.stats();
        info!("📈 Final Stats:");
        info!("  Last ledger: {:?}", monitor.cursor());
        info!("  Notifications: {}", stats.notifications);
        info!("  Range scans: {} ({} failed)", stats.scans, stats.scan_failures);
        info!("  Trust-line candidates: {}", stats.candidates);
        info!("  Reconnects: {}", stats.reconnects);
        info!(
            "  New tokens: {}",
            monitor.handler().stats().new_tokens.load(Ordering::Relaxed)
        );
    }
    info!("  Subscribers: {}", registry.len());

    info!("👋 Token Alert Bot stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    init_logging(&args.log_level);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Startup failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

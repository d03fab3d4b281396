//! Unwetter bot CLI
//!
//! Runs the bot and offers a few offline helpers for checking pages and
//! configuration.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use unwetter::{
    error::{AppError, Result},
    models::{Config, Region, Warning},
    pipeline::{self, DedupCache, SubscriberRegistry},
    services::{HttpPageSource, PageSource, TelegramBot, WarningParser},
    storage::{LocalStorage, Persister, StateStore},
};

/// Unwetter - severe-weather warnings by postal code
#[derive(Parser, Debug)]
#[command(name = "unwetter", version, about = "Severe-weather warning bot")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "storage/config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the bot: poll for commands and deliver warnings
    Run,

    /// Parse a saved bulletin page and print the warnings
    Parse {
        /// HTML file to parse
        file: PathBuf,
    },

    /// Fetch and parse the live page of one postal code
    Check {
        /// 4-digit postal code
        region: String,
    },

    /// Validate the configuration file
    Validate,

    /// Show subscriber and cache statistics
    Info,
}

/// Initialize logging based on verbosity flag and the configured level.
fn init_logging(verbose: bool, level: &str) {
    let level = if verbose { "debug" } else { level };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn print_warnings(warnings: &[Warning]) {
    if warnings.is_empty() {
        println!("No active warnings.");
        return;
    }
    for (i, warning) in warnings.iter().enumerate() {
        println!("--- ({}) {}", i + 1, warning.fingerprint());
        println!("{}\n", warning.render());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, found) = Config::load_or_default(&cli.config)?;
    init_logging(cli.verbose, &config.logging.level);

    if found {
        log::info!("Loaded configuration from {}", cli.config.display());
    } else {
        log::warn!("No config at {}, using defaults", cli.config.display());
    }

    let storage = LocalStorage::from_config(&config.storage);

    match cli.command {
        Command::Run => run(config, storage).await?,

        Command::Parse { file } => {
            let html = tokio::fs::read_to_string(&file).await?;
            let parser = WarningParser::new(config.parser.clone())?;
            print_warnings(&parser.parse(&html)?);
        }

        Command::Check { region } => {
            let region = Region::parse(&region)?;
            let parser = WarningParser::new(config.parser.clone())?;
            let source = HttpPageSource::new(config.fetch.clone())?;

            log::info!("Fetching {}", config.fetch.page_url(&region)?);
            let html = source.fetch_page(&region).await?;
            print_warnings(&parser.parse(&html)?);
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            WarningParser::new(config.parser.clone())?;
            log::info!("✓ Config OK");

            match config.bot.resolve_token() {
                Ok(_) => log::info!("✓ Bot token available"),
                Err(e) => log::warn!("{}", e),
            }
        }

        Command::Info => {
            log::info!("Storage directory: {}", storage.root_dir().display());

            let registry = SubscriberRegistry::from_snapshot(storage.load_registry().await?);
            let cache = DedupCache::from_snapshot(storage.load_cache().await?);

            log::info!(
                "Subscribers: {} across {} regions",
                registry.subscriber_count(),
                registry.active_regions().len()
            );
            for region in registry.active_regions() {
                log::info!("  {}: {}", region, registry.subscribers(&region).len());
            }
            log::info!(
                "Cache: {} fingerprints across {} regions",
                cache.fingerprint_count(),
                cache.region_count()
            );
        }
    }

    Ok(())
}

async fn run(config: Config, storage: LocalStorage) -> Result<()> {
    config.validate()?;
    let token = config.bot.resolve_token()?;

    let bot = Arc::new(TelegramBot::new(&config.bot, &token)?);
    let me = bot.get_me().await?;
    log::info!(
        "Authorized on account {}",
        me.username.as_deref().unwrap_or(&me.first_name)
    );

    let registry = Arc::new(SubscriberRegistry::from_snapshot(storage.load_registry().await?));
    let cache = DedupCache::from_snapshot(storage.load_cache().await?);
    log::info!(
        "Loaded {} subscribers and {} cached warnings",
        registry.subscriber_count(),
        cache.fingerprint_count()
    );

    let persister = Persister::spawn(Arc::new(storage));
    let source = Arc::new(HttpPageSource::new(config.fetch.clone())?);

    let pipeline = pipeline::start(
        &config,
        registry,
        cache,
        source,
        bot.clone(),
        persister.handle(),
    )?;

    let commands = pipeline.handle.command_sender();
    let poller = tokio::spawn(async move { bot.poll_commands(commands).await });

    tokio::signal::ctrl_c().await?;
    log::info!("Shutting down...");

    poller.abort();
    match poller.await {
        Ok(Err(e)) => log::error!("Update polling failed: {}", e),
        Err(e) if !e.is_cancelled() => {
            return Err(AppError::Telegram(format!("update poller panicked: {e}")));
        }
        _ => {}
    }

    pipeline.shutdown().await;
    persister.shutdown().await;

    log::info!("Done!");
    Ok(())
}

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use interfaces::{ChatPlatform, FeedFetcher, SqliteStore, Store};
use knowsee::{
    CommandBot, Config, DigestBuilder, DigestSettings, FetchConfig, Fetcher, KnowseeError, Markup,
    Scheduler, SyncContext, SyncOrchestrator, TelegramClient,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(name = "knowsee", about = "Keeps a pinned digest of calendar events in Telegram chats")]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Print the digest of one calendar group and exit.
    #[arg(long, value_name = "GROUP")]
    preview: Option<String>,

    /// Days before today, overriding `crawler.date_range` in preview mode.
    #[arg(long, requires = "preview")]
    days_before: Option<u32>,

    /// Days after today, overriding `crawler.date_range` in preview mode.
    #[arg(long, requires = "preview")]
    days_after: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    info!("Using config file: {}", args.config);
    let config = Config::from_file(&args.config)?;

    match args.preview.as_deref() {
        Some(group) => preview(&config, group, args.days_before, args.days_after).await?,
        None => run(config).await?,
    }
    Ok(())
}

async fn preview(
    config: &Config,
    group: &str,
    days_before: Option<u32>,
    days_after: Option<u32>,
) -> knowsee::Result<()> {
    let calendars = config
        .group(group)
        .ok_or_else(|| KnowseeError::Config(format!("unknown calendar group `{group}`")))?;

    let mut settings = DigestSettings::from_config(config, Markup::Markdown)?;
    settings.days_before = days_before.unwrap_or(settings.days_before);
    settings.days_after = days_after.unwrap_or(settings.days_after);

    let fetcher: Arc<dyn FeedFetcher> = Arc::new(Fetcher::new(FetchConfig::default())?);
    let builder = DigestBuilder::new(fetcher, settings);

    let now = Utc::now();
    let aggregator = builder.build(&SyncContext::new(), calendars, now).await?;

    println!("{}", builder.compose(&aggregator, now));
    println!("{}", aggregator.to_json()?);
    Ok(())
}

async fn run(config: Config) -> knowsee::Result<()> {
    if config.telegram.api_token.trim().is_empty() {
        return Err(KnowseeError::Config("telegram.api_token is required".to_string()));
    }

    let sqlite = Arc::new(SqliteStore::connect(&config.db_path).await?);
    let store: Arc<dyn Store> = sqlite.clone();
    let fetcher: Arc<dyn FeedFetcher> = Arc::new(Fetcher::new(FetchConfig::default())?);
    let telegram = Arc::new(TelegramClient::new(&config.telegram.api_token)?);
    let platform: Arc<dyn ChatPlatform> = telegram.clone();

    let orchestrator = Arc::new(SyncOrchestrator::new(
        store.clone(),
        fetcher,
        platform.clone(),
        DigestSettings::from_config(&config, Markup::Html)?,
    ));

    let username = match telegram.username().await {
        Ok(username) => username,
        Err(e) => {
            warn!("Could not look up the bot username: {}", e);
            None
        }
    };
    let bot = Arc::new(
        CommandBot::new(platform, store, orchestrator.clone(), &config)?.with_username(username),
    );
    let scheduler = Scheduler::new(orchestrator, config.crawler.interval());

    let ctx = SyncContext::new();
    ctx.spawn({
        let ctx = ctx.clone();
        async move {
            scheduler.run(ctx).await;
        }
    });
    ctx.spawn(bot.run(telegram, ctx.clone()));

    info!("Knowsee running, press Ctrl-C to stop");
    wait_for_shutdown().await;

    info!("Shutting down");
    if !ctx.shutdown(SHUTDOWN_TIMEOUT).await {
        error!("Some tasks did not finish in time");
    }
    sqlite.close().await;
    info!("Knowsee stopped");
    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(e) => warn!("Cannot listen for SIGTERM: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Cannot listen for Ctrl-C: {}", e);
    }
}

use anyhow::Result;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::update_listeners::webhooks;
use teloxide::update_listeners::Polling;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use turnitq::billing::webhook::WebhookState;
use turnitq::billing::{BillingProvider, PaystackClient};
use turnitq::check::processor::{ProcessorConfig, SubmissionProcessor};
use turnitq::check::scoring::{LocalScorer, ScoringProvider, VendorScorer};
use turnitq::cli::{Cli, Commands};
use turnitq::core::housekeeping::{self, Housekeeping};
use turnitq::core::web_server::{self, WebState};
use turnitq::core::{config, init_logger, log_startup_configuration, metrics};
use turnitq::storage::{accounts, create_pool, get_connection, meta, submissions, DbPool};
use turnitq::telegram::transport::{ChatTransport, TelegramTransport};
use turnitq::telegram::{create_bot, schema, setup_bot_commands, HandlerDeps};

const MAX_DISPATCHER_RETRIES: u32 = 5;
const TELEGRAM_WEBHOOK_PATH: &str = "/telegram/webhook";

/// Main entry point for the Telegram bot
///
/// Parses CLI arguments and dispatches to appropriate subcommand.
#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env before any config static is read
    let _ = dotenv();

    let cli = Cli::parse_args();

    // Log panics from spawned tasks instead of losing them on stderr
    std::panic::set_hook(Box::new(|panic_info| {
        log::error!("Panic caught: {:?}", panic_info);
        if let Some(location) = panic_info.location() {
            log::error!("Panic at {}:{}:{}", location.file(), location.line(), location.column());
        }
    }));

    init_logger(&config::LOG_FILE_PATH)?;

    match cli.command {
        Some(Commands::Run { webhook }) => {
            log::info!("Running bot (webhook: {})", webhook);
            run_bot(webhook).await
        }
        Some(Commands::ResetDaily) => run_reset_daily(),
        Some(Commands::ExpireSubscriptions) => run_expire_subscriptions(),
        Some(Commands::Stats) => run_stats(),
        None => {
            log::info!("No command specified, running bot in default mode");
            run_bot(false).await
        }
    }
}

fn open_pool() -> Result<Arc<DbPool>> {
    let pool =
        create_pool(&config::DATABASE_PATH).map_err(|e| anyhow::anyhow!("Failed to create database pool: {}", e))?;
    Ok(Arc::new(pool))
}

fn run_reset_daily() -> Result<()> {
    let pool = open_pool()?;
    let mut conn = get_connection(&pool)?;
    let count = housekeeping::reset_daily_counters(&mut conn)?;
    log::info!("Daily counters reset ({} account(s) had usage)", count);
    Ok(())
}

fn run_expire_subscriptions() -> Result<()> {
    let pool = open_pool()?;
    let mut conn = get_connection(&pool)?;
    let expired = housekeeping::expire_subscriptions(&mut conn, chrono::Utc::now())?;
    log::info!("Expired {} subscription(s): {:?}", expired.len(), expired);
    Ok(())
}

fn run_stats() -> Result<()> {
    let pool = open_pool()?;
    let conn = get_connection(&pool)?;

    let alloc = meta::global_allocation(&conn)?;
    println!("Global allocation: {}/{}", alloc.used, alloc.max);
    println!("Accounts by plan:");
    for (plan, count) in accounts::count_by_plan(&conn)? {
        println!("  {:<6} {}", plan.to_string(), count);
    }
    println!("Submissions by status:");
    for (status, count) in submissions::count_by_status(&conn)? {
        println!("  {:<10} {}", status.to_string(), count);
    }
    Ok(())
}

async fn run_bot(use_webhook: bool) -> Result<()> {
    let bot_init_start = std::time::Instant::now();
    log::info!("Starting bot...");

    metrics::init_metrics();
    log_startup_configuration();

    let bot = create_bot()?;
    let me = bot.get_me().await?;
    log::info!("Bot username: {:?}, Bot ID: {}", me.username, me.id);

    if let Err(e) = setup_bot_commands(&bot).await {
        log::warn!("Failed to set bot commands: {}", e);
    }

    let db_pool = open_pool()?;
    {
        let conn = get_connection(&db_pool)?;
        meta::set_global_max(&conn, *config::quota::GLOBAL_DAILY_MAX)?;
    }
    tokio::fs::create_dir_all(config::UPLOADS_DIR.as_str()).await?;

    let transport: Arc<dyn ChatTransport> = Arc::new(TelegramTransport::new(bot.clone()));
    let primary = VendorScorer::from_config().map(|scorer| Arc::new(scorer) as Arc<dyn ScoringProvider>);
    let processor = SubmissionProcessor::new(
        Arc::clone(&db_pool),
        Arc::clone(&transport),
        primary,
        Arc::new(LocalScorer),
        ProcessorConfig::from_env(),
    );

    match processor.recover().await {
        Ok(0) => log::info!("✅ No interrupted submissions to recover"),
        Ok(count) => log::info!("🔄 Recovered {} submission(s)", count),
        Err(e) => log::error!("Failed to recover interrupted submissions: {}", e),
    }

    let shutdown = CancellationToken::new();
    let housekeeping = Arc::new(
        Housekeeping::new(Arc::clone(&db_pool), Arc::clone(&transport)).with_processor(processor.clone()),
    );
    let _housekeeping_tasks = housekeeping.start(shutdown.clone());

    let billing: Option<Arc<dyn BillingProvider>> =
        PaystackClient::from_config().map(|client| Arc::new(client) as Arc<dyn BillingProvider>);
    if billing.is_none() {
        log::warn!("PAYSTACK_SECRET_KEY not set: upgrades are disabled");
    }
    let web_state = WebState {
        billing: billing.clone().map(|provider| WebhookState {
            pool: Arc::clone(&db_pool),
            provider,
            transport: Arc::clone(&transport),
        }),
    };

    let handler = schema(HandlerDeps::new(Arc::clone(&db_pool), transport, processor, billing));

    if use_webhook {
        let url = config::public_url(TELEGRAM_WEBHOOK_PATH)
            .ok_or_else(|| anyhow::anyhow!("--webhook requires PUBLIC_BASE_URL"))?;
        let addr = SocketAddr::from(([0, 0, 0, 0], *config::WEB_PORT));
        let options = webhooks::Options::new(addr, url::Url::parse(&url)?);

        let (listener, _stop_flag, telegram_router) = webhooks::axum_to_router(bot.clone(), options).await?;
        let app = web_server::router(web_state).merge(telegram_router);
        let server = tokio::spawn(web_server::start_web_server(*config::WEB_PORT, app, shutdown.clone()));

        log::info!("================================================");
        log::info!("🎉 Bot initialization complete in {:.2}s", bot_init_start.elapsed().as_secs_f64());
        log::info!("📡 Receiving updates via webhook at {}", url);
        log::info!("================================================");

        Dispatcher::builder(bot, handler)
            .enable_ctrlc_handler()
            .build()
            .dispatch_with_listener(
                listener,
                LoggingErrorHandler::with_custom_text("An error from the update listener"),
            )
            .await;

        shutdown.cancel();
        if let Ok(Err(e)) = server.await {
            log::error!("Web server failed: {}", e);
        }
    } else {
        let server = tokio::spawn(web_server::start_web_server(
            *config::WEB_PORT,
            web_server::router(web_state),
            shutdown.clone(),
        ));

        if let Err(e) = bot.delete_webhook().await {
            log::warn!("Failed to delete webhook: {}", e);
        }

        log::info!("================================================");
        log::info!("🎉 Bot initialization complete in {:.2}s", bot_init_start.elapsed().as_secs_f64());
        log::info!("📡 Ready to receive updates (long polling)");
        log::info!("================================================");

        // Run the dispatcher in its own task so a panic can be retried
        let mut retry_count = 0;
        loop {
            let bot_clone = bot.clone();
            let handler_clone = handler.clone();
            let handle = tokio::spawn(async move {
                let listener = Polling::builder(bot_clone.clone()).drop_pending_updates().build();
                Dispatcher::builder(bot_clone, handler_clone)
                    .enable_ctrlc_handler()
                    .build()
                    .dispatch_with_listener(
                        listener,
                        LoggingErrorHandler::with_custom_text("An error from the update listener"),
                    )
                    .await
            });

            match handle.await {
                Ok(()) => {
                    log::info!("Dispatcher shutdown gracefully");
                    break;
                }
                Err(join_err) if join_err.is_panic() && retry_count < MAX_DISPATCHER_RETRIES => {
                    retry_count += 1;
                    log::error!(
                        "Dispatcher panicked: {}. Retrying (attempt {}/{})...",
                        join_err,
                        retry_count,
                        MAX_DISPATCHER_RETRIES
                    );
                    sleep(Duration::from_secs(5 * u64::from(retry_count))).await;
                }
                Err(join_err) => {
                    log::error!("Dispatcher stopped: {}", join_err);
                    break;
                }
            }
        }

        shutdown.cancel();
        if let Ok(Err(e)) = server.await {
            log::error!("Web server failed: {}", e);
        }
    }

    log::info!("Shutting down");
    Ok(())
}

use anyhow::Context as AnyhowContext;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use groupmind::bot::Bot;
use groupmind::config::Config;
use groupmind::digest::DigestGenerator;
use groupmind::embeddings::EmbeddingClient;
use groupmind::indexer::SyncJob;
use groupmind::llm::LlmClient;
use groupmind::locale;
use groupmind::quota::QuotaGovernor;
use groupmind::retrieval::{RetrievalParams, Retriever};
use groupmind::scheduler::Scheduler;
use groupmind::store::postgrest::PostgrestStore;
use groupmind::store::Store;
use groupmind::telegram::api::{BotApi, ChatSender, UpdateSource};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Config first: the log level comes from it.
    let config = Config::from_env().context("failed to load configuration")?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "groupmind={},reqwest=warn,hyper=warn,rustls=warn",
            config.log_level
        ))
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).compact())
        .init();

    info!(
        environment = %config.environment,
        timezone = %config.timezone,
        tier_a_limit = config.tier_a_daily_limit,
        tier_b_limit = config.tier_b_daily_limit,
        allowed_chats = config.allowed_chat_ids.len(),
        "starting groupmind"
    );

    let config = Arc::new(config);
    let locale = &locale::EN;

    let store: Arc<dyn Store> = Arc::new(PostgrestStore::new(
        &config.store_url,
        &config.store_key,
        config.store_timeout_secs,
        config.timezone,
    )?);
    store.ping().await.context("store is unreachable")?;
    info!("store connection verified");

    let embedder = Arc::new(EmbeddingClient::new(&config));
    let generator = Arc::new(LlmClient::new(&config));

    let retriever = Arc::new(Retriever::new(
        store.clone(),
        embedder.clone(),
        RetrievalParams::from_config(&config),
        locale,
    ));
    info!(
        enabled = config.rag_enabled,
        top_k = config.rag_top_k,
        floor = config.rag_similarity_floor,
        "retriever initialized"
    );

    let quota = Arc::new(QuotaGovernor::new(
        store.clone(),
        config.timezone,
        config.tier_a_daily_limit,
        config.tier_b_daily_limit,
    ));

    let sync_job = Arc::new(SyncJob::new(
        store.clone(),
        embedder.clone(),
        config.sync_batch_size,
        config.sync_max_messages,
    ));

    let digester = Arc::new(DigestGenerator::new(
        generator.clone(),
        config.tier_b_model.clone(),
        config.timezone,
        locale,
    ));

    let api = Arc::new(BotApi::new(&config.bot_token)?);
    let sender: Arc<dyn ChatSender> = api.clone();
    let source: Arc<dyn UpdateSource> = api;

    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        sync_job.clone(),
        digester,
        sender.clone(),
        config.allowed_chat_ids.clone(),
        config.timezone,
    ));

    let bot = Arc::new(Bot::new(
        config.clone(),
        store,
        generator,
        retriever,
        quota,
        sync_job,
        scheduler.clone(),
        sender,
        locale,
    ));

    // Ctrl-c flips the shutdown signal; every loop and sleep observes it.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "could not register ctrl-c handler");
            return;
        }
        info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx.clone()));

    bot.run(source, shutdown_rx).await;

    let _ = scheduler_handle.await;
    info!("groupmind stopped");
    Ok(())
}

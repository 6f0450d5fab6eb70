use std::sync::Arc;

use anyhow::{Error, Result};
use tokio::{signal, sync::watch, time::Duration};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use notification_pipeline::{
    aggregation::WindowManager,
    clients::{
        EventSink,
        database::{DatabaseClient, PostgresAuditSink, PostgresFallbackStore},
        health::BrokerHealth,
        kafka::KafkaClient,
        memory::AllowAllPreferences,
        redis::RedisAggregationStore,
    },
    config::Config,
    fallback::{FallbackStore, RecoveryWorker},
    pipeline::{AuditSink, EventPipeline, PreferenceProvider, spawn_tier_workers},
    sweep::Sweeper,
};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting notification pipeline");

    // Missing streams are fatal: external supervision restarts the process.
    let kafka = Arc::new(KafkaClient::connect(&config)?);
    kafka.provision_topics(&config).await?;

    let database = Arc::new(DatabaseClient::connect(&config.database_url).await?);
    database.ensure_schema().await?;

    let aggregation_store = Arc::new(RedisAggregationStore::connect(&config).await?);
    let windows = Arc::new(WindowManager::new(
        aggregation_store,
        config.window_duration_ms,
        config.max_batch_size,
    ));

    let sink: Arc<dyn EventSink> = kafka.clone();
    let preferences: Arc<dyn PreferenceProvider> = Arc::new(AllowAllPreferences);
    let audit: Arc<dyn AuditSink> = Arc::new(PostgresAuditSink::new(Arc::clone(&database)));

    let pipeline = Arc::new(EventPipeline::new(
        Arc::clone(&windows),
        Arc::clone(&sink),
        preferences,
        audit,
        config.ready_topic.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut handles = spawn_tier_workers(&config, Arc::clone(&pipeline), shutdown_rx.clone())?;

    handles.push(
        Sweeper::new(
            Arc::clone(&windows),
            Arc::clone(&pipeline),
            Duration::from_secs(config.sweep_interval_secs),
        )
        .spawn(shutdown_rx.clone()),
    );

    let health = Arc::new(BrokerHealth::new(config.broker_recovery_after_secs));
    let fallback_store: Arc<dyn FallbackStore> = Arc::new(PostgresFallbackStore::new(
        Arc::clone(&database),
        config.fallback_max_retries,
    ));

    handles.push(
        RecoveryWorker::new(
            fallback_store,
            Arc::clone(&sink),
            health,
            config.fallback_batch_size,
            Duration::from_secs(config.recovery_interval_secs),
        )
        .spawn(shutdown_rx.clone()),
    );

    info!("Notification pipeline started");

    signal::ctrl_c().await?;
    info!("Shutdown signal received, draining in-flight work");

    shutdown_tx.send(true).ok();

    let grace = Duration::from_secs(config.shutdown_grace_secs);
    let drain = futures_util::future::join_all(handles);

    if tokio::time::timeout(grace, drain).await.is_err() {
        warn!("Shutdown grace period elapsed with workers still running");
    }

    info!("Notification pipeline stopped");
    Ok(())
}

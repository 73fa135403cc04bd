//! afet-consumer - Feed enrichment consumer
//!
//! Joins the feed consumer group, runs both pipeline stages over the
//! location-resolved and intent topics, and serves `/healthcheck` and
//! `/metrics` until SIGINT or SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use afet_common::config::ServiceConfig;
use afet_common::db::{init_database, FeedStore, SqliteFeedStore};
use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use afet_consumer::resolvers::{HttpDuplicateDetector, HttpIntentClassifier, HttpNeedsClassifier};
use afet_consumer::runtime::{wait_until_ready, ConsumerGroup, PartitionRouter, RetryPolicy};
use afet_consumer::search::ElasticLocationIndex;
use afet_consumer::transport::kafka::{create_consumer, GroupContext, KafkaCommitter, KafkaPublisher};
use afet_consumer::{build_router, AppState, ConsumerMetrics, FeedPipeline, PipelineDeps, PipelineSettings};

/// Command-line arguments; each overrides the config file and environment
#[derive(Parser, Debug)]
#[command(name = "afet-consumer")]
#[command(about = "Feed enrichment consumer")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "AFET_CONFIG")]
    config: Option<PathBuf>,

    /// Kafka bootstrap servers
    #[arg(long)]
    brokers: Option<String>,

    /// Consumer group id
    #[arg(long)]
    group_id: Option<String>,

    /// Feed store connection URL
    #[arg(long)]
    database_url: Option<String>,

    /// Health and metrics listen address
    #[arg(long)]
    health_addr: Option<String>,

    /// Default log filter when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn apply(&self, config: &mut ServiceConfig) {
        if let Some(brokers) = &self.brokers {
            config.kafka.brokers = brokers.clone();
        }
        if let Some(group_id) = &self.group_id {
            config.kafka.group_id = group_id.clone();
        }
        if let Some(url) = &self.database_url {
            config.database.url = url.clone();
        }
        if let Some(addr) = &self.health_addr {
            config.http.health_addr = addr.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (mut config, source) =
        ServiceConfig::resolve(args.config.as_deref()).context("Failed to load configuration")?;
    args.apply(&mut config);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!("Starting afet-consumer v{}", env!("CARGO_PKG_VERSION"));
    source.log();
    config.validate().context("Invalid configuration")?;

    let pool = init_database(&config.database)
        .await
        .context("Failed to open feed store")?;
    let timeout = config.pipeline.operation_timeout();
    let store = Arc::new(
        SqliteFeedStore::new(pool)
            .with_masking(config.masking.clone())
            .with_write_timeout(timeout),
    );
    info!("Feed store ready");

    let index = Arc::new(
        ElasticLocationIndex::new(&config.search, timeout)?.with_masking(config.masking.clone()),
    );
    let intents = Arc::new(HttpIntentClassifier::new(config.resolvers.intent.clone(), timeout)?);
    let needs = Arc::new(HttpNeedsClassifier::new(config.resolvers.needs.clone(), timeout)?);
    let duplicates = Arc::new(HttpDuplicateDetector::new(
        config.resolvers.duplicate.clone(),
        timeout,
    )?);

    let publisher =
        Arc::new(KafkaPublisher::new(&config.kafka).context("Failed to create Kafka producer")?);
    let (context, ready, revoked) = GroupContext::new();
    let consumer = Arc::new(
        create_consumer(&config.kafka, context).context("Failed to create Kafka consumer")?,
    );
    let committer = Arc::new(KafkaCommitter::new(consumer.clone()));

    let deps = PipelineDeps {
        store: store.clone(),
        publisher,
        index,
        intents,
        needs,
        duplicates,
    };
    let pipeline = Arc::new(FeedPipeline::new(deps, PipelineSettings::from(&config)));

    let metrics = Arc::new(ConsumerMetrics::new());
    let shutdown = CancellationToken::new();
    let router = PartitionRouter::new(
        pipeline,
        committer,
        metrics.clone(),
        RetryPolicy::from(&config.pipeline),
        shutdown.clone(),
    );

    let app = build_router(AppState::new(metrics, ready.clone()));
    let listener = tokio::net::TcpListener::bind(&config.http.health_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.http.health_addr))?;
    info!("Health check: http://{}/healthcheck", config.http.health_addr);

    let server = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
        }
    });

    let group = tokio::spawn(ConsumerGroup::new(consumer, revoked, router).run(shutdown.clone()));

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    if wait_until_ready(ready, &shutdown).await {
        info!("Consumer group up and running");
    }

    if let Err(e) = group.await {
        error!("Consumer group task failed: {}", e);
    }
    match server.await {
        Ok(Err(e)) => error!("Health server error: {}", e),
        Err(e) => error!("Health server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    store.close().await;
    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}

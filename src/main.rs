use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use webhook_relay::config::{self, ServerConfig};
use webhook_relay::insights::{DealSource, InMemoryDealSource, InsightAggregator};
use webhook_relay::server::{self, AppState};
use webhook_relay::{
    telemetry, DeliveryLogStore, Dispatcher, InMemoryDeliveryLog, InMemoryRegistry,
    SubscriptionRegistry,
};

struct Backends {
    registry: Arc<dyn SubscriptionRegistry>,
    log: Arc<dyn DeliveryLogStore>,
    deals: Arc<dyn DealSource>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();
    telemetry::init(config.log_format);

    let backends = build_backends(&config).await?;
    let dispatcher = Dispatcher::new(config.dispatcher_config(), backends.registry, backends.log);
    let state = AppState {
        dispatcher: Arc::new(dispatcher),
        insights: Arc::new(InsightAggregator::new(backends.deals)),
    };

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;

    tokio::select! {
        result = server::run(listener, state) => result.context("HTTP server error")?,
        _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
    }
    Ok(())
}

async fn build_backends(config: &ServerConfig) -> anyhow::Result<Backends> {
    let deals: Arc<dyn DealSource> = match &config.deals_file {
        Some(path) => {
            let deals = config::load_deals(path)?;
            info!(count = deals.len(), "loaded deal records");
            Arc::new(InMemoryDealSource::new(deals))
        }
        None => Arc::new(InMemoryDealSource::default()),
    };

    #[cfg(feature = "postgres")]
    if let Some(url) = &config.database_url {
        let (client, connection) = tokio_postgres::connect(url, tokio_postgres::NoTls)
            .await
            .context("failed to connect to PostgreSQL")?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::error!("PostgreSQL connection error: {err}");
            }
        });
        let storage = Arc::new(webhook_relay::PostgresStorage::new(client).await?);
        if let Some(path) = &config.subscriptions_file {
            for subscription in config::load_subscriptions(path)? {
                storage.upsert_subscription(&subscription).await?;
            }
        }
        info!("using PostgreSQL storage");
        return Ok(Backends {
            registry: storage.clone(),
            log: storage.clone(),
            deals: storage,
        });
    }

    #[cfg(feature = "redis")]
    if let Some(url) = &config.redis_url {
        let client = redis::Client::open(url.as_str()).context("invalid Redis URL")?;
        let storage = Arc::new(webhook_relay::RedisStorage::new(client, "webhook-relay"));
        if let Some(path) = &config.subscriptions_file {
            for subscription in config::load_subscriptions(path)? {
                storage.upsert_subscription(&subscription).await?;
            }
        }
        info!("using Redis storage");
        return Ok(Backends {
            registry: storage.clone(),
            log: storage,
            deals,
        });
    }

    let subscriptions = match &config.subscriptions_file {
        Some(path) => config::load_subscriptions(path)?,
        None => Vec::new(),
    };
    info!(count = subscriptions.len(), "using in-memory storage");

    Ok(Backends {
        registry: Arc::new(InMemoryRegistry::with_subscriptions(subscriptions)),
        log: Arc::new(InMemoryDeliveryLog::new()),
        deals,
    })
}

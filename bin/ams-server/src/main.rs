//! Auto Message Sender Server
//!
//! Accepts messages over HTTP, stores them, and delivers pending ones to a
//! webhook from a background dispatcher.
//!
//! ## Configuration
//!
//! TOML file selected by `APP_ENV` (`config/config.<env>.toml`, then
//! `config/config.toml`, then `config.toml`, or `AMS_CONFIG`), with `AMS_*`
//! environment variable overrides:
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `APP_ENV` | `test` | `prod`/`production` or anything else for test |
//! | `AMS_HTTP_PORT` | `8080` | API port |
//! | `AMS_DATABASE_KIND` | `postgres` | `postgres`, `sqlite` or `memory` |
//! | `AMS_DATABASE_URL` | local postgres | Connection URL |
//! | `AMS_DATABASE_SEED` | `false` | Insert sample messages into an empty store |
//! | `AMS_WEBHOOK_URL` | - | Delivery endpoint (deliveries fail while unset) |
//! | `AMS_WEBHOOK_AUTH_KEY` | - | Value for the webhook auth header |
//! | `AMS_REDIS_ENABLED` | `true` | Mirror sent times into Redis |
//! | `AMS_REDIS_URL` | `redis://localhost:6379` | Redis URL |
//! | `AMS_DISPATCHER_AUTO_START` | `true` | Start dispatching at boot |
//! | `AMS_DISPATCHER_POLL_INTERVAL_SECS` | `120` | Seconds between ticks |
//! | `AMS_DISPATCHER_BATCH_SIZE` | `2` | Messages per tick |
//! | `LOG_FORMAT` | `text` | `json` for structured logs |
//! | `RUST_LOG` | `info` | Log level |

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

use ams_api::{create_router, AppState};
use ams_config::{AppConfig, DatabaseConfig, DatabaseKind};
use ams_dispatch::{
    DispatchConfig, DispatchControl, Dispatcher, NoopSideCache, RedisSideCache, SideCache,
    WebhookChannel, WebhookChannelConfig,
};
use ams_store::{
    seed_messages, MemoryMessageStore, MessageStore, PostgresMessageStore, SqliteMessageStore,
};

const DISPATCHER_STOP_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    ams_common::logging::init_logging("ams-server");

    info!("Starting Auto Message Sender");

    let config = AppConfig::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    info!(
        environment = %config.environment,
        database = %config.database.kind,
        "Configuration loaded"
    );

    // Message store
    let store = create_message_store(&config.database).await?;
    if config.database.seed {
        seed_messages(store.as_ref())
            .await
            .context("Failed to seed message store")?;
    }

    // Delivery channel and side cache
    if config.webhook.url.is_empty() {
        warn!("Webhook URL is not configured, deliveries will fail until it is set");
    }
    let channel = Arc::new(
        WebhookChannel::new(WebhookChannelConfig {
            url: config.webhook.url.clone(),
            timeout: config.webhook.timeout(),
            auth_key_name: config.webhook.auth_key_name.clone(),
            auth_key: config.webhook.auth_key.clone(),
        })
        .context("Failed to build webhook client")?,
    );

    let cache: Arc<dyn SideCache> = if config.redis.enabled {
        info!("Mirroring sent times into Redis");
        Arc::new(RedisSideCache::new(&config.redis.url).context("Invalid Redis URL")?)
    } else {
        info!("Redis side cache disabled");
        Arc::new(NoopSideCache)
    };

    // Dispatcher
    let dispatcher = Arc::new(Dispatcher::new(
        DispatchConfig {
            poll_interval: config.dispatcher.poll_interval(),
            batch_size: config.dispatcher.batch_size,
        },
        store.clone(),
        channel,
        cache,
    ));
    if config.dispatcher.auto_start {
        dispatcher.start().await.context("Failed to start dispatcher")?;
    } else {
        info!("Dispatcher auto start disabled, use POST /api/v1/messages/start");
    }

    // HTTP API
    let app = create_router(AppState::new(store, dispatcher.clone()));
    let addr = config.http.bind_address();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP server listening on http://{}", addr);
    info!("API documentation at http://{}/swagger-ui", addr);

    let shutdown_dispatcher = Arc::clone(&dispatcher);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutdown signal received, stopping dispatcher...");
            match tokio::time::timeout(DISPATCHER_STOP_TIMEOUT, shutdown_dispatcher.stop()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Dispatcher did not stop cleanly"),
                Err(_) => warn!("Timed out waiting for the dispatcher to stop"),
            }
        })
        .await
        .context("HTTP server error")?;

    info!("Auto Message Sender shutdown complete");
    Ok(())
}

async fn create_message_store(config: &DatabaseConfig) -> Result<Arc<dyn MessageStore>> {
    let store: Arc<dyn MessageStore> = match config.kind {
        DatabaseKind::Sqlite => {
            let store = SqliteMessageStore::connect(&config.url, config.max_connections)
                .await
                .with_context(|| format!("Failed to open SQLite database {}", config.url))?;
            info!("Using SQLite message store: {}", config.url);
            Arc::new(store)
        }
        DatabaseKind::Postgres => {
            let store = PostgresMessageStore::connect(&config.url, config.max_connections)
                .await
                .context("Failed to connect to PostgreSQL")?;
            info!("Using PostgreSQL message store");
            Arc::new(store)
        }
        DatabaseKind::Memory => {
            warn!("Using in-memory message store, messages are lost on restart");
            Arc::new(MemoryMessageStore::new())
        }
    };

    store
        .init_schema()
        .await
        .context("Failed to initialize message schema")?;
    Ok(store)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

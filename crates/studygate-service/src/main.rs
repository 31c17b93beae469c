use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use studygate_adapters::MockBillingConnector;
use studygate_core::{EngineConfig, StorageConfig};
use studygate_service::{build_router, ServiceConfig, ServiceState};
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StorageMode {
    Auto,
    Memory,
    Postgres,
}

#[derive(Debug, Parser)]
#[command(name = "studygated", version, about = "Studygate subscription access service")]
struct Cli {
    /// Socket address to bind, e.g. 127.0.0.1:8080
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,
    /// Subscription persistence backend. `auto` picks postgres when a
    /// database url is configured.
    #[arg(long, value_enum, default_value_t = StorageMode::Auto, env = "STUDYGATE_STORAGE")]
    storage: StorageMode,
    /// PostgreSQL url for subscription record persistence.
    #[arg(long, env = "STUDYGATE_DATABASE_URL")]
    database_url: Option<String>,
    /// Max PostgreSQL pool connections.
    #[arg(long, default_value_t = 5, env = "STUDYGATE_PG_MAX_CONNECTIONS")]
    pg_max_connections: u32,
    /// Shared secret for verifying billing provider webhooks.
    #[arg(long, env = "STUDYGATE_WEBHOOK_SECRET")]
    webhook_secret: Option<String>,
    /// Secret keying credential digests.
    #[arg(long, env = "STUDYGATE_AUTH_SECRET")]
    auth_secret: Option<String>,
    /// Upper bound in seconds for any single billing provider call.
    #[arg(long, default_value_t = 10, env = "STUDYGATE_PROVIDER_TIMEOUT_SECS")]
    provider_timeout_secs: u64,
    /// Session lifetime in days.
    #[arg(long, default_value_t = 7, env = "STUDYGATE_SESSION_TTL_DAYS")]
    session_ttl_days: i64,
}

fn resolve_storage(cli: &Cli) -> anyhow::Result<StorageConfig> {
    let resolved_url = cli
        .database_url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok());

    let storage = match cli.storage {
        StorageMode::Memory => StorageConfig::Memory,
        StorageMode::Postgres => {
            let database_url = resolved_url.ok_or_else(|| {
                anyhow::anyhow!("storage=postgres requires --database-url or DATABASE_URL")
            })?;
            StorageConfig::postgres(database_url, cli.pg_max_connections)
        }
        StorageMode::Auto => {
            if let Some(database_url) = resolved_url {
                StorageConfig::postgres(database_url, cli.pg_max_connections)
            } else {
                StorageConfig::Memory
            }
        }
    };

    Ok(storage)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "studygate_service=info,info".to_string()),
        )
        .init();

    let cli = Cli::parse();
    let storage = resolve_storage(&cli)?;

    let mut engine = EngineConfig {
        storage,
        provider_timeout: Duration::from_secs(cli.provider_timeout_secs.max(1)),
        ..EngineConfig::default()
    };
    if let Some(secret) = cli.webhook_secret.clone() {
        engine.webhook_secret = secret;
    } else {
        tracing::warn!("using built-in development webhook secret");
    }

    let config = ServiceConfig {
        engine,
        auth_secret: cli
            .auth_secret
            .clone()
            .unwrap_or_else(|| "studygate-local-auth-secret".to_string()),
        session_ttl: chrono::Duration::days(cli.session_ttl_days.max(1)),
    };

    let state = ServiceState::bootstrap(config, Arc::new(MockBillingConnector)).await?;
    info!(storage_backend = state.engine.storage_label(), "engine ready");

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!("studygate-service listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}

use std::sync::Arc;

use sqlx::sqlite::SqlitePoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use acerto::{
    api,
    config::Settings,
    gateways::GatewayRegistry,
    repository::NotificationEndpointRepository,
    service::ServiceContext,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "acerto=debug,tower_http=debug,axum=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let settings = Settings::new().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config: {}. Using defaults.", e);
        Settings::default()
    });
    let settings = Arc::new(settings);

    tracing::info!(
        "Starting acerto server on {}:{}",
        settings.server.host,
        settings.server.port
    );

    // Initialize database
    let db_pool = SqlitePoolOptions::new()
        .max_connections(settings.database.max_connections)
        .connect(&settings.database.url)
        .await?;

    // Run migrations
    sqlx::migrate!("./migrations").run(&db_pool).await?;

    let http = reqwest::Client::new();
    let registry = Arc::new(GatewayRegistry::with_defaults(http.clone()));
    let shutdown = CancellationToken::new();

    let services = Arc::new(ServiceContext::new(
        db_pool,
        registry.clone(),
        settings.clone(),
        http,
        shutdown.clone(),
    ));

    // Seed the configured downstream endpoint so the notifier has a target
    // even on a fresh database.
    if let Some(url) = &settings.notifications.default_url {
        let endpoint = services.notification_endpoints.ensure_url(url).await?;
        tracing::info!("Downstream notifications enabled for {}", endpoint.url);
    }

    for adapter in registry.iter() {
        let configured = settings.gateways.for_kind(adapter.kind()).is_some();
        if configured {
            tracing::info!("Gateway {} configured", adapter.kind());
        } else {
            tracing::warn!("Gateway {} has no credentials; its endpoints will reject calls", adapter.kind());
        }
    }

    let app = api::create_app(services, registry, settings.clone());

    let listener = tokio::net::TcpListener::bind(format!(
        "{}:{}",
        settings.server.host, settings.server.port
    ))
    .await?;

    tracing::info!(
        "Server listening on http://{}:{}",
        settings.server.host,
        settings.server.port
    );

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown signal received");
            }
            server_shutdown.cancel();
        })
        .await?;

    Ok(())
}

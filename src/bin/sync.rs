//! Operator CLI: resync one order or a batch of recent pending orders
//! against their gateways, with the same engine the server uses.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use sqlx::sqlite::SqlitePoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use acerto::{config::Settings, gateways::GatewayRegistry, service::ServiceContext};

#[derive(Parser, Debug)]
#[command(name = "acerto-sync", about = "Resync order payment state from the gateways")]
struct Args {
    /// Resync this single order instead of a batch.
    #[arg(long)]
    order: Option<Uuid>,

    /// Only poll pending orders newer than this many hours.
    #[arg(long)]
    max_age_hours: Option<i64>,

    /// Poll at most this many orders.
    #[arg(long)]
    limit: Option<i64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "acerto=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let settings = Settings::new().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config: {}. Using defaults.", e);
        Settings::default()
    });
    let settings = Arc::new(settings);

    let db_pool = SqlitePoolOptions::new()
        .max_connections(settings.database.max_connections)
        .connect(&settings.database.url)
        .await?;
    sqlx::migrate!("./migrations").run(&db_pool).await?;

    let http = reqwest::Client::new();
    let registry = Arc::new(GatewayRegistry::with_defaults(http.clone()));
    let services = ServiceContext::new(
        db_pool,
        registry,
        settings,
        http,
        CancellationToken::new(),
    );

    if let Some(order_id) = args.order {
        let outcome = services.engine.sync_order(order_id).await?;
        println!(
            "order {} -> {} ({})",
            outcome.order_id,
            outcome.status.as_str(),
            if outcome.applied { "updated" } else { "unchanged" }
        );
        return Ok(ExitCode::SUCCESS);
    }

    let report = services
        .engine
        .sync_pending_orders(args.max_age_hours, args.limit)
        .await?;
    println!(
        "scanned {} orders: {} updated, {} unchanged, {} failed",
        report.scanned, report.updated, report.unchanged, report.failed
    );

    Ok(if report.failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

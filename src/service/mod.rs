pub mod reconciliation;
pub mod resolver;

use std::sync::Arc;

use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::gateways::GatewayRegistry;
use crate::integrations::DownstreamNotifier;
use crate::repository::*;

pub use reconciliation::{ReconcileOutcome, ReconciliationEngine, SyncReport};
pub use resolver::OrderResolver;

pub struct ServiceContext {
    pub orders: Arc<dyn OrderRepository>,
    pub notification_endpoints: Arc<dyn NotificationEndpointRepository>,
    pub notifier: Arc<DownstreamNotifier>,
    pub engine: Arc<ReconciliationEngine>,
    pub db_pool: SqlitePool,
}

impl ServiceContext {
    pub fn new(
        db_pool: SqlitePool,
        registry: Arc<GatewayRegistry>,
        settings: Arc<Settings>,
        http: reqwest::Client,
        shutdown: CancellationToken,
    ) -> Self {
        let orders: Arc<dyn OrderRepository> =
            Arc::new(SqliteOrderRepository::new(db_pool.clone()));
        let notification_endpoints: Arc<dyn NotificationEndpointRepository> =
            Arc::new(SqliteNotificationEndpointRepository::new(db_pool.clone()));

        let notifier = Arc::new(DownstreamNotifier::new(
            http,
            notification_endpoints.clone(),
            settings.notifications.clone(),
            shutdown,
        ));
        let engine = Arc::new(ReconciliationEngine::new(
            orders.clone(),
            registry,
            notifier.clone(),
            settings,
        ));

        Self {
            orders,
            notification_endpoints,
            notifier,
            engine,
            db_pool,
        }
    }
}

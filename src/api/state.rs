use std::sync::Arc;

use crate::{config::Settings, gateways::GatewayRegistry, service::ServiceContext};

#[derive(Clone)]
pub struct AppState {
    pub services: Arc<ServiceContext>,
    pub registry: Arc<GatewayRegistry>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(
        services: Arc<ServiceContext>,
        registry: Arc<GatewayRegistry>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            services,
            registry,
            settings,
        }
    }
}

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::domain::GatewayKind;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub gateways: GatewaysConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Credentials for one payment gateway. Which fields are required depends on
/// the gateway: the domestic acquirer authenticates with `merchant_id` +
/// `merchant_key` (Basic auth), Mercado Pago with `access_token` (Bearer),
/// Stripe with `secret_key`. These are handed into every adapter call; no
/// adapter holds credentials of its own.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct GatewayCredentials {
    #[serde(default)]
    pub base_url: String,
    pub merchant_id: Option<String>,
    pub merchant_key: Option<String>,
    pub access_token: Option<String>,
    pub secret_key: Option<String>,
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct GatewaysConfig {
    pub cobrepag: Option<GatewayCredentials>,
    pub mercadopago: Option<GatewayCredentials>,
    pub stripe: Option<GatewayCredentials>,
    /// HMAC secret for webhooks from the legacy storefront.
    pub legacy_webhook_secret: Option<String>,
}

impl GatewaysConfig {
    pub fn for_kind(&self, kind: GatewayKind) -> Option<&GatewayCredentials> {
        match kind {
            GatewayKind::Cobrepag => self.cobrepag.as_ref(),
            GatewayKind::Mercadopago => self.mercadopago.as_ref(),
            GatewayKind::Stripe => self.stripe.as_ref(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotificationConfig {
    /// Seeded into notification_endpoints on startup when the table does not
    /// already carry it. Endpoints added at runtime live only in the table.
    pub default_url: Option<String>,
    pub max_attempts: u32,
    pub timeout_secs: u64,
    pub retry_delay_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            default_url: None,
            max_attempts: 3,
            timeout_secs: 30,
            retry_delay_secs: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Pending orders older than this are left alone by the batch sync.
    pub max_age_hours: i64,
    pub limit: i64,
    /// Fixed delay between consecutive gateway polls.
    pub throttle_ms: u64,
    /// Upper bound on a single status poll.
    pub call_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_age_hours: 72,
            limit: 50,
            throttle_ms: 500,
            call_timeout_secs: 15,
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("database.max_connections", 10)?
            .set_default("notifications.max_attempts", 3)?
            .set_default("notifications.timeout_secs", 30)?
            .set_default("notifications.retry_delay_secs", 5)?
            .set_default("sync.max_age_hours", 72)?
            .set_default("sync.limit", 50)?
            .set_default("sync.throttle_ms", 500)?
            .set_default("sync.call_timeout_secs", 15)?
            // Add config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables (with ACERTO__ prefix, double underscore separates levels)
            .add_source(Environment::with_prefix("ACERTO").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "sqlite://acerto.db".to_string(),
                max_connections: 10,
            },
            gateways: GatewaysConfig::default(),
            notifications: NotificationConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

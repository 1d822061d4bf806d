use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use service_core::error::AppError;

pub const CONFIG_FILE: &str = "configuration";
pub const ENV_PREFIX: &str = "SUBSCRIPTION";

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub urls: UrlConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Mongo,
    Memory,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_database_url")]
    pub url: Secret<String>,
    #[serde(default = "default_db_name")]
    pub db_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_base_url")]
    pub base_url: String,
    #[serde(default = "empty_secret")]
    pub api_key: Secret<String>,
    /// The single currency the gateway settles in.
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// HMAC key for inbound webhook signatures. Unsigned webhooks are accepted
    /// when unset.
    #[serde(default)]
    pub webhook_secret: Option<Secret<String>>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct UrlConfig {
    /// Where the gateway sends the customer back after checkout.
    #[serde(default = "default_frontend_url")]
    pub frontend_url: String,
    /// Public base URL of this service, used to build the webhook URL.
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
}

impl Config {
    /// Load from `configuration.*` and `SUBSCRIPTION__*` environment variables,
    /// e.g. `SUBSCRIPTION__GATEWAY__API_KEY`.
    pub fn load() -> Result<Self, AppError> {
        service_core::config::load(CONFIG_FILE, ENV_PREFIX)
    }
}

impl GatewayConfig {
    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty() && !self.api_key.expose_secret().is_empty()
    }
}

impl UrlConfig {
    pub fn default_callback_url(&self) -> String {
        format!("{}/payment/callback", self.frontend_url.trim_end_matches('/'))
    }

    pub fn default_webhook_url(&self) -> String {
        format!("{}/payments/webhook", self.backend_url.trim_end_matches('/'))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            url: default_database_url(),
            db_name: default_db_name(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_gateway_base_url(),
            api_key: empty_secret(),
            currency: default_currency(),
            locale: default_locale(),
            timeout_secs: default_timeout_secs(),
            webhook_secret: None,
        }
    }
}

impl Default for UrlConfig {
    fn default() -> Self {
        Self {
            frontend_url: default_frontend_url(),
            backend_url: default_backend_url(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            otlp_endpoint: None,
        }
    }
}

fn default_service_name() -> String {
    "subscription-service".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3010
}

fn default_database_url() -> Secret<String> {
    Secret::new("mongodb://localhost:27017".to_string())
}

fn default_db_name() -> String {
    "subscription_db".to_string()
}

fn default_gateway_base_url() -> String {
    "https://sindipay.xyz/api/v1".to_string()
}

fn empty_secret() -> Secret<String> {
    Secret::new(String::new())
}

fn default_currency() -> String {
    "IQD".to_string()
}

fn default_locale() -> String {
    "ar".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_frontend_url() -> String {
    "http://localhost:5173".to_string()
}

fn default_backend_url() -> String {
    "http://localhost:3010".to_string()
}

fn default_log_level() -> String {
    "info,subscription_service=debug".to_string()
}

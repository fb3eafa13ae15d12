//! Runtime configuration.
//!
//! Values are layered from `config/default`, `config/$ENV` and `config/local` files (all
//! optional), then `GATE__`-prefixed environment variables, e.g.
//! `GATE__POLICIES__SEND_CONTACT_EMAIL__REQUESTS_PER_MINUTE=5`.

use crate::cors::{CorsError, CorsPolicy, DEFAULT_ALLOW_HEADERS, DEFAULT_ALLOW_METHODS};
use crate::functions::{ContactSettings, FunctionPolicies};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file error: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Invalid CORS configuration: {0}")]
    Cors(#[from] CorsError),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub cors: CorsConfig,
    pub store: StoreConfig,
    pub policies: FunctionPolicies,
    pub auth: AuthConfig,
    pub cloudflare: CloudflareConfig,
    pub stripe: StripeConfig,
    pub resend: ResendConfig,
    pub contact: ContactSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Exact origins or single-wildcard patterns; the first one is the fallback origin.
    pub allowed_origins: Vec<String>,
    /// `https` origins on this domain or its subdomains are allowed (and echoed back) when the
    /// site root itself is in `allowed_origins`.
    pub site_root_domain: Option<String>,
    pub allow_headers: String,
    pub allow_methods: String,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            site_root_domain: None,
            allow_headers: DEFAULT_ALLOW_HEADERS.to_string(),
            allow_methods: DEFAULT_ALLOW_METHODS.to_string(),
        }
    }
}

impl CorsConfig {
    pub fn policy(&self) -> Result<CorsPolicy, CorsError> {
        Ok(CorsPolicy::new(&self.allowed_origins)?
            .site_root_domain(self.site_root_domain.as_deref())
            .allow_headers(&self.allow_headers)
            .allow_methods(&self.allow_methods))
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub redis_url: String,
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "function-gate:".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Base URL of the auth backend; static tokens are used when unset.
    pub backend_url: Option<String>,
    pub api_key: String,
    /// Token to user id, for local development.
    pub static_tokens: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudflareConfig {
    pub account_id: String,
    pub api_token: String,
    pub workers_subdomain: String,
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StripeConfig {
    pub secret_key: String,
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResendConfig {
    pub api_key: String,
    pub api_base: Option<String>,
}

impl GatewayConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false));
        if let Ok(env) = std::env::var("ENV") {
            builder = builder
                .add_source(config::File::with_name(&format!("config/{env}")).required(false));
        }
        builder = builder
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("GATE")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("cors.allowed_origins"),
            );

        let config: GatewayConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cors.policy()?;
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server.port must be non-zero".into()));
        }
        if matches!(&self.auth.backend_url, Some(url) if url.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "auth.backend_url must not be empty when set".into(),
            ));
        }
        if self.store.backend == StoreBackend::Redis && self.store.redis_url.is_empty() {
            return Err(ConfigError::Invalid(
                "store.redis_url is required for the redis backend".into(),
            ));
        }
        if self.contact.recipient.is_empty() || self.contact.from.is_empty() {
            return Err(ConfigError::Invalid(
                "contact.recipient and contact.from are required".into(),
            ));
        }
        Ok(())
    }
}

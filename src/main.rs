use actix_web::{web, App, HttpServer};
use function_gate::auth::{Authenticator, BackendAuthenticator, StaticTokenAuthenticator};
use function_gate::backend::RateLimitStore;
use function_gate::config::{ConfigError, GatewayConfig, StoreBackend};
use function_gate::error_log::ErrorLog;
use function_gate::functions::{self, FunctionState};
use function_gate::upstream::{CloudflareClient, ResendClient, StripeClient};
use function_gate::{CorsGate, RateLimiter};
use std::sync::Arc;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[cfg(not(any(feature = "dashmap", feature = "redis")))]
compile_error!("at least one of the `dashmap` or `redis` features is required");

#[derive(Debug, Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Store backend {0:?} is not compiled in")]
    UnsupportedStore(StoreBackend),
    #[cfg(feature = "redis")]
    #[error("Unable to connect to redis: {0}")]
    Redis(#[from] redis::RedisError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

async fn open_store(
    config: &GatewayConfig,
) -> Result<(Arc<dyn RateLimitStore>, Arc<dyn ErrorLog>), StartupError> {
    match config.store.backend {
        #[cfg(feature = "dashmap")]
        StoreBackend::Memory => Ok((
            Arc::new(function_gate::backend::memory::InMemoryStore::new()),
            Arc::new(function_gate::error_log::InMemoryErrorLog::new()),
        )),
        #[cfg(feature = "redis")]
        StoreBackend::Redis => {
            use function_gate::backend::redis::{RedisErrorLog, RedisStore};
            let client = redis::Client::open(config.store.redis_url.as_str())?;
            let manager = redis::aio::ConnectionManager::new(client).await?;
            let prefix = &config.store.key_prefix;
            let store = RedisStore::builder(manager.clone())
                .key_prefix(Some(prefix.as_str()))
                .build();
            let error_log = RedisErrorLog::new(manager, format!("{prefix}error_logs"));
            Ok((Arc::new(store), Arc::new(error_log)))
        }
        #[allow(unreachable_patterns)]
        other => Err(StartupError::UnsupportedStore(other)),
    }
}

fn authenticator(config: &GatewayConfig, client: &reqwest::Client) -> Arc<dyn Authenticator> {
    match &config.auth.backend_url {
        Some(url) => Arc::new(BackendAuthenticator::new(
            client.clone(),
            url,
            config.auth.api_key.clone(),
        )),
        None => {
            log::warn!("No auth backend configured, accepting static tokens only");
            let authenticator = config
                .auth
                .static_tokens
                .iter()
                .fold(StaticTokenAuthenticator::new(), |a, (token, user)| {
                    a.with_token(token.clone(), user.clone())
                });
            Arc::new(authenticator)
        }
    }
}

fn state(
    config: &GatewayConfig,
    store: Arc<dyn RateLimitStore>,
    error_log: Arc<dyn ErrorLog>,
) -> FunctionState {
    let client = reqwest::Client::new();

    let mut workers = CloudflareClient::new(
        client.clone(),
        config.cloudflare.account_id.clone(),
        config.cloudflare.api_token.clone(),
        config.cloudflare.workers_subdomain.clone(),
    );
    if let Some(base) = &config.cloudflare.api_base {
        workers = workers.with_api_base(base);
    }
    let mut billing = StripeClient::new(client.clone(), config.stripe.secret_key.clone());
    if let Some(base) = &config.stripe.api_base {
        billing = billing.with_api_base(base);
    }
    let mut email = ResendClient::new(client.clone(), config.resend.api_key.clone());
    if let Some(base) = &config.resend.api_base {
        email = email.with_api_base(base);
    }

    FunctionState {
        limiter: RateLimiter::new(store),
        authenticator: authenticator(config, &client),
        error_log,
        workers: Arc::new(workers),
        billing: Arc::new(billing),
        email: Arc::new(email),
        policies: config.policies,
        contact: config.contact.clone(),
    }
}

#[actix_web::main]
async fn main() -> Result<(), StartupError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = GatewayConfig::load()?;
    let (store, error_log) = open_store(&config).await?;
    let state = web::Data::new(state(&config, store, error_log));
    let cors = config.cors.policy().map_err(ConfigError::from)?;

    log::info!(
        "Listening on {}:{} with the {:?} store",
        config.server.host,
        config.server.port,
        config.store.backend
    );
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(functions::configure)
            .wrap(CorsGate::new(cors.clone()))
    })
    .bind((config.server.host.as_str(), config.server.port))?
    .run()
    .await?;
    Ok(())
}

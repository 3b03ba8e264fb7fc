//! Layered settings
//!
//! Sources, lowest precedence first: built-in defaults, `config/default`,
//! `config/{ENVIRONMENT}`, `config/local`, then `VANTAGE_EDGE__*`
//! environment variables (`VANTAGE_EDGE__AUTH__JWT_SECRET=...`).

use crate::error::Error;
use crate::gateway::auth::JwtVerifier;
use crate::gateway::cache::CacheLimits;
use crate::gateway::circuit_breaker::BreakerPolicy;
use crate::gateway::GatewayConfig;
use config::{Config, ConfigError, Environment, File};
use nutype::nutype;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Minimum HS256 secret length accepted at startup
const MIN_JWT_SECRET_LEN: usize = 32;

/// Listener port; zero is rejected
#[nutype(
    validate(greater = 0),
    derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRef, Deserialize)
)]
pub struct Port(u16);

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub gateway: GatewaySettings,
    pub auth: AuthSettings,
    pub cache: CacheSettings,
    pub rate_limit: RateLimitSettings,
    pub circuit_breaker: CircuitBreakerSettings,
    pub health: HealthSettings,
    pub store: StoreSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApplicationSettings {
    pub host: String,
    pub gateway_port: Port,
    pub management_port: Port,
    pub environment: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewaySettings {
    pub base_domain: String,
    pub allow_tenant_header: bool,
    pub max_request_body_bytes: usize,
    pub max_cacheable_body_bytes: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthSettings {
    pub jwt_secret: String,
    #[serde(default)]
    pub jwt_issuer: Option<String>,
    pub leeway_secs: u64,
    pub token_ttl_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheSettings {
    pub max_entries: usize,
    pub shards: usize,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitSettings {
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CircuitBreakerSettings {
    pub cooldown_secs: u64,
    pub backoff_multiplier: f64,
    pub max_cooldown_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HealthSettings {
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreSettings {
    /// JSON seed preloaded into the config store at startup
    #[serde(default)]
    pub seed_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
    /// `json` or `pretty`
    pub format: String,
}

impl Settings {
    /// Load from `./config` for the environment named by `ENVIRONMENT`
    pub fn new() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());
        Self::load(Path::new("config"), &environment)
    }

    pub fn load(config_dir: &Path, environment: &str) -> Result<Self, ConfigError> {
        let file = |name: &str| File::from(config_dir.join(name)).required(false);

        let config = Config::builder()
            .set_default("application.host", "0.0.0.0")?
            .set_default("application.gateway_port", 8000)?
            .set_default("application.management_port", 8080)?
            .set_default("application.environment", environment)?
            .set_default("gateway.base_domain", "gateway.local")?
            .set_default("gateway.allow_tenant_header", true)?
            .set_default("gateway.max_request_body_bytes", 10 * 1024 * 1024)?
            .set_default("gateway.max_cacheable_body_bytes", 1024 * 1024)?
            .set_default("auth.jwt_secret", "")?
            .set_default("auth.leeway_secs", 30)?
            .set_default("auth.token_ttl_secs", 3600)?
            .set_default("cache.max_entries", 10_000)?
            .set_default("cache.shards", 16)?
            .set_default("cache.sweep_interval_secs", 60)?
            .set_default("rate_limit.sweep_interval_secs", 60)?
            .set_default("circuit_breaker.cooldown_secs", 30)?
            .set_default("circuit_breaker.backoff_multiplier", 2.0)?
            .set_default("circuit_breaker.max_cooldown_secs", 300)?
            .set_default("health.enabled", true)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?
            .add_source(file("default"))
            .add_source(file(environment))
            .add_source(file("local"))
            .add_source(Environment::with_prefix("VANTAGE_EDGE").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    /// Checks that cannot be expressed in the types
    pub fn validate(&self) -> crate::Result<()> {
        if self.auth.jwt_secret.len() < MIN_JWT_SECRET_LEN {
            return Err(Error::invalid_setting(
                "auth.jwt_secret",
                format!("must be at least {MIN_JWT_SECRET_LEN} bytes"),
            ));
        }
        if self.application.gateway_port == self.application.management_port {
            return Err(Error::invalid_setting(
                "application.management_port",
                "must differ from application.gateway_port",
            ));
        }
        if self.cache.shards == 0 || self.cache.max_entries == 0 {
            return Err(Error::invalid_setting(
                "cache",
                "max_entries and shards must be positive",
            ));
        }
        if self.circuit_breaker.backoff_multiplier < 1.0 {
            return Err(Error::invalid_setting(
                "circuit_breaker.backoff_multiplier",
                "must be at least 1.0",
            ));
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            return Err(Error::invalid_setting(
                "logging.format",
                "expected 'json' or 'pretty'",
            ));
        }
        Ok(())
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            base_domain: self.gateway.base_domain.trim_matches('.').to_ascii_lowercase(),
            allow_tenant_header: self.gateway.allow_tenant_header,
            max_request_body_bytes: self.gateway.max_request_body_bytes,
            max_cacheable_body_bytes: self.gateway.max_cacheable_body_bytes,
        }
    }

    pub fn cache_limits(&self) -> CacheLimits {
        CacheLimits {
            max_entries: self.cache.max_entries,
            shards: self.cache.shards,
        }
    }

    pub fn breaker_policy(&self) -> BreakerPolicy {
        BreakerPolicy {
            cooldown: Duration::from_secs(self.circuit_breaker.cooldown_secs),
            backoff_multiplier: self.circuit_breaker.backoff_multiplier,
            max_cooldown: Duration::from_secs(self.circuit_breaker.max_cooldown_secs),
        }
    }

    pub fn jwt_verifier(&self) -> JwtVerifier {
        JwtVerifier::new(
            &self.auth.jwt_secret,
            self.auth.jwt_issuer.clone(),
            self.auth.leeway_secs,
            self.auth.token_ttl_secs,
        )
    }
}

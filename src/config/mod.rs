use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::TtlPolicy;
use crate::error::ConfigError;
use crate::limiter::{CallerClass, ProbeSettings, QuotaTable, Rate};

/// Route quotas applied when `RATE_LIMIT_QUOTAS` is not set.
pub const DEFAULT_QUOTAS: &str = "auth.register=5/hour,auth.token=10/minute,root=2/minute,\
health=100/minute,predict=30/minute,predict.batch=10/hour,admin=60/minute";

#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub redis_url: Option<String>,
    pub jwt_secret: Option<String>,
    pub rate_limit_enabled: bool,
    pub quotas: QuotaTable,
    pub rate_limit_grace_secs: u64,
    pub remote_timeout_ms: u64,
    pub cache_bulk_timeout_ms: u64,
    pub failover_threshold: u32,
    pub failover_period_secs: u64,
    pub probe_interval_ms: u64,
    pub probe_max_backoff_ms: u64,
    pub cache_ttl: TtlPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let default_rate = parse_or(var("RATE_LIMIT_DEFAULT"), "RATE_LIMIT_DEFAULT", "100/hour")?;
        let quotas = parse_quotas(
            QuotaTable::new(default_rate),
            var("RATE_LIMIT_QUOTAS").as_deref().unwrap_or(DEFAULT_QUOTAS),
        )?;

        let default_ttl: u64 = parse_or(var("CACHE_DEFAULT_TTL"), "CACHE_DEFAULT_TTL", "300")?;
        if default_ttl == 0 {
            return Err(ConfigError::invalid("CACHE_DEFAULT_TTL", "0", "ttl must be positive"));
        }
        let cache_ttl = parse_ttls(default_ttl, var("CACHE_TTLS").as_deref())?;

        let config = Config {
            server_host: var("SERVER_HOST").unwrap_or_else(|| "::".to_string()),
            server_port: parse_or(var("SERVER_PORT"), "SERVER_PORT", "3000")?,
            redis_url: var("REDIS_URL"),
            jwt_secret: var("JWT_SECRET"),
            rate_limit_enabled: parse_flag(var("RATE_LIMIT_ENABLED"), "RATE_LIMIT_ENABLED", true)?,
            quotas,
            rate_limit_grace_secs: parse_or(var("RATE_LIMIT_GRACE_SECS"), "RATE_LIMIT_GRACE_SECS", "5")?,
            remote_timeout_ms: parse_or(var("REMOTE_TIMEOUT_MS"), "REMOTE_TIMEOUT_MS", "50")?,
            cache_bulk_timeout_ms: parse_or(var("CACHE_BULK_TIMEOUT_MS"), "CACHE_BULK_TIMEOUT_MS", "2000")?,
            failover_threshold: parse_or(var("FAILOVER_THRESHOLD"), "FAILOVER_THRESHOLD", "3")?,
            failover_period_secs: parse_or(var("FAILOVER_PERIOD_SECS"), "FAILOVER_PERIOD_SECS", "10")?,
            probe_interval_ms: parse_or(var("PROBE_INTERVAL_MS"), "PROBE_INTERVAL_MS", "1000")?,
            probe_max_backoff_ms: parse_or(var("PROBE_MAX_BACKOFF_MS"), "PROBE_MAX_BACKOFF_MS", "30000")?,
            cache_ttl,
        };

        if config.failover_threshold == 0 {
            return Err(ConfigError::invalid("FAILOVER_THRESHOLD", "0", "threshold must be positive"));
        }
        if config.remote_timeout_ms == 0 {
            return Err(ConfigError::invalid("REMOTE_TIMEOUT_MS", "0", "timeout must be positive"));
        }
        if config.cache_bulk_timeout_ms < config.remote_timeout_ms {
            return Err(ConfigError::invalid(
                "CACHE_BULK_TIMEOUT_MS",
                &config.cache_bulk_timeout_ms.to_string(),
                "must not be below REMOTE_TIMEOUT_MS",
            ));
        }
        if config.probe_max_backoff_ms < config.probe_interval_ms {
            return Err(ConfigError::invalid(
                "PROBE_MAX_BACKOFF_MS",
                &config.probe_max_backoff_ms.to_string(),
                "must not be below PROBE_INTERVAL_MS",
            ));
        }

        Ok(config)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    /// Limit for cache prefix scans and deferred-delete replays.
    pub fn cache_bulk_timeout(&self) -> Duration {
        Duration::from_millis(self.cache_bulk_timeout_ms)
    }

    pub fn probe_settings(&self) -> ProbeSettings {
        ProbeSettings {
            interval: Duration::from_millis(self.probe_interval_ms),
            max_backoff: Duration::from_millis(self.probe_max_backoff_ms),
        }
    }
}

fn parse_or<T>(value: Option<String>, var: &'static str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    let raw = value.unwrap_or_else(|| default.to_string());
    raw.parse()
        .map_err(|e: T::Err| ConfigError::invalid(var, &raw, e.to_string()))
}

fn parse_flag(value: Option<String>, var: &'static str, default: bool) -> Result<bool, ConfigError> {
    match value.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(ConfigError::invalid(var, other, "expected a boolean")),
    }
}

/// Parses `route[@class]=N/unit` entries separated by commas.
fn parse_quotas(mut table: QuotaTable, raw: &str) -> Result<QuotaTable, ConfigError> {
    const VAR: &str = "RATE_LIMIT_QUOTAS";

    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (target, rate) = item
            .split_once('=')
            .ok_or_else(|| ConfigError::invalid(VAR, item, "expected route=N/unit"))?;
        let rate: Rate = rate
            .parse()
            .map_err(|e: String| ConfigError::invalid(VAR, item, e))?;

        table = match target.trim().split_once('@') {
            Some((route, class)) => {
                let class: CallerClass = class
                    .parse()
                    .map_err(|e: String| ConfigError::invalid(VAR, item, e))?;
                table.with_class(route.trim(), class, rate)
            }
            None => table.with_route(target.trim(), rate),
        };
    }
    Ok(table)
}

/// Parses `namespace=secs` entries separated by commas on top of the
/// built-in namespace TTLs.
fn parse_ttls(default_ttl: u64, raw: Option<&str>) -> Result<TtlPolicy, ConfigError> {
    const VAR: &str = "CACHE_TTLS";

    let base = TtlPolicy::default();
    let mut policy = TtlPolicy::new(default_ttl);
    for namespace in ["prediction", "user", "analytics", "model", "history"] {
        policy = policy.with(namespace, base.ttl_for(namespace));
    }

    for item in raw.unwrap_or("").split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (namespace, secs) = item
            .split_once('=')
            .ok_or_else(|| ConfigError::invalid(VAR, item, "expected namespace=secs"))?;
        let secs: u64 = secs
            .trim()
            .parse()
            .map_err(|_| ConfigError::invalid(VAR, item, "ttl is not a number"))?;
        if secs == 0 {
            return Err(ConfigError::invalid(VAR, item, "ttl must be positive"));
        }
        policy = policy.with(namespace.trim(), secs);
    }
    Ok(policy)
}

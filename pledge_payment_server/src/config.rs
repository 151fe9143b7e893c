use std::{env, time::Duration as StdDuration};

use chrono::Duration;
use log::*;
use ppg_common::parse_boolean_flag;
use rand::Rng;

const DEFAULT_PPG_HOST: &str = "127.0.0.1";
const DEFAULT_PPG_PORT: u16 = 8480;
const DEFAULT_RELAY_POLL_INTERVAL: StdDuration = StdDuration::from_secs(5);
const DEFAULT_RELAY_BATCH_SIZE: i64 = 100;
const DEFAULT_RELAY_MAX_RETRIES: i64 = 10;
const DEFAULT_PUBLISH_TIMEOUT: StdDuration = StdDuration::from_secs(5);
const DEFAULT_LEASE_TTL_SECS: i64 = 30;
const DEFAULT_PURGE_AFTER_DAYS: i64 = 7;
const DEFAULT_IDEMPOTENCY_TTL_SECS: i64 = 86_400;
const DEFAULT_IDEMPOTENCY_FAST_TTL: StdDuration = StdDuration::from_secs(300);
const DEFAULT_TOTALS_CACHE_TTL: StdDuration = StdDuration::from_secs(30);

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub relay: RelayConfig,
    pub idempotency: IdempotencyConfig,
    /// TTL of hot-cache entries on the totals read path.
    pub totals_cache_ttl: StdDuration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_PPG_HOST.to_string(),
            port: DEFAULT_PPG_PORT,
            database_url: String::default(),
            relay: RelayConfig::default(),
            idempotency: IdempotencyConfig::default(),
            totals_cache_ttl: DEFAULT_TOTALS_CACHE_TTL,
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("PPG_HOST").ok().unwrap_or_else(|| DEFAULT_PPG_HOST.into());
        let port = env::var("PPG_PORT")
            .map(|s| {
                s.parse::<u16>().unwrap_or_else(|e| {
                    error!("🪛️ {s} is not a valid port for PPG_PORT. {e} Using the default, {DEFAULT_PPG_PORT}, instead.");
                    DEFAULT_PPG_PORT
                })
            })
            .ok()
            .unwrap_or(DEFAULT_PPG_PORT);
        let database_url = env::var("PPG_DATABASE_URL").ok().unwrap_or_else(|| {
            error!("🪛️ PPG_DATABASE_URL is not set. Please set it to the URL for the pledge database.");
            String::default()
        });
        Self {
            host,
            port,
            database_url,
            relay: RelayConfig::from_env_or_default(),
            idempotency: IdempotencyConfig::from_env_or_default(),
            totals_cache_ttl: seconds_from_env("PPG_TOTALS_CACHE_TTL", DEFAULT_TOTALS_CACHE_TTL),
        }
    }
}

//-------------------------------------------------  RelayConfig  -----------------------------------------------------
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Set to false on replicas that should never poll the outbox (the lease protects against overlap regardless).
    pub enabled: bool,
    pub poll_interval: StdDuration,
    /// Maximum number of events fetched per poll.
    pub batch_size: i64,
    /// Events that have failed this many times stop being fetched and must be recovered by an operator.
    pub max_retries: i64,
    /// Bound on a single broker publish. A timed-out publish counts as a failed one.
    pub publish_timeout: StdDuration,
    pub lease_ttl: Duration,
    /// Processed events older than this are deleted by the periodic cleanup.
    pub purge_after: Duration,
    /// Identifies this process as a lease holder.
    pub holder_id: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: DEFAULT_RELAY_POLL_INTERVAL,
            batch_size: DEFAULT_RELAY_BATCH_SIZE,
            max_retries: DEFAULT_RELAY_MAX_RETRIES,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            lease_ttl: Duration::seconds(DEFAULT_LEASE_TTL_SECS),
            purge_after: Duration::days(DEFAULT_PURGE_AFTER_DAYS),
            holder_id: default_holder_id(),
        }
    }
}

impl RelayConfig {
    pub fn from_env_or_default() -> Self {
        let enabled = parse_boolean_flag(env::var("PPG_RELAY_ENABLED").ok(), true);
        let poll_interval = seconds_from_env("PPG_RELAY_POLL_INTERVAL", DEFAULT_RELAY_POLL_INTERVAL);
        let batch_size = int_from_env("PPG_RELAY_BATCH_SIZE", DEFAULT_RELAY_BATCH_SIZE);
        let max_retries = int_from_env("PPG_RELAY_MAX_RETRIES", DEFAULT_RELAY_MAX_RETRIES);
        let publish_timeout = seconds_from_env("PPG_RELAY_PUBLISH_TIMEOUT", DEFAULT_PUBLISH_TIMEOUT);
        let lease_ttl = Duration::seconds(int_from_env("PPG_RELAY_LEASE_TTL", DEFAULT_LEASE_TTL_SECS));
        let purge_after = Duration::days(int_from_env("PPG_RELAY_PURGE_DAYS", DEFAULT_PURGE_AFTER_DAYS));
        let holder_id = env::var("PPG_RELAY_HOLDER_ID").ok().unwrap_or_else(default_holder_id);
        Self { enabled, poll_interval, batch_size, max_retries, publish_timeout, lease_ttl, purge_after, holder_id }
    }
}

fn default_holder_id() -> String {
    format!("relay-{}-{:04x}", std::process::id(), rand::thread_rng().gen::<u16>())
}

//-------------------------------------------------  IdempotencyConfig  -----------------------------------------------
#[derive(Clone, Debug)]
pub struct IdempotencyConfig {
    /// Lifetime of durable idempotency records. Must cover the gateway's webhook retry window.
    pub retention: Duration,
    /// TTL of fast-tier entries. Purely a performance knob; the durable tier is the source of truth.
    pub fast_ttl: StdDuration,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self { retention: Duration::seconds(DEFAULT_IDEMPOTENCY_TTL_SECS), fast_ttl: DEFAULT_IDEMPOTENCY_FAST_TTL }
    }
}

impl IdempotencyConfig {
    pub fn from_env_or_default() -> Self {
        let retention = Duration::seconds(int_from_env("PPG_IDEMPOTENCY_TTL", DEFAULT_IDEMPOTENCY_TTL_SECS));
        let fast_ttl = seconds_from_env("PPG_IDEMPOTENCY_FAST_TTL", DEFAULT_IDEMPOTENCY_FAST_TTL);
        Self { retention, fast_ttl }
    }
}

//-------------------------------------------------  env helpers  -----------------------------------------------------
fn int_from_env(var: &str, default: i64) -> i64 {
    env::var(var)
        .map_err(|_| info!("🪛️ {var} is not set. Using the default value of {default}."))
        .and_then(|s| {
            s.parse::<i64>().map_err(|e| warn!("🪛️ Invalid configuration value for {var}: {s}. {e}"))
        })
        .ok()
        .unwrap_or(default)
}

fn seconds_from_env(var: &str, default: StdDuration) -> StdDuration {
    env::var(var)
        .map_err(|_| info!("🪛️ {var} is not set. Using the default value of {}s.", default.as_secs()))
        .and_then(|s| {
            s.parse::<u64>()
                .map(StdDuration::from_secs)
                .map_err(|e| warn!("🪛️ Invalid configuration value for {var}: {s}. {e}"))
        })
        .ok()
        .unwrap_or(default)
}

//! Environment-driven configuration for the gateway.
//!
//! Every tunable documented in the configuration surface lives here. Values
//! come from environment variables with production defaults; services receive
//! their settings by value at construction time.

use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

fn var_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

fn var_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|raw| matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

fn var_decimal(key: &str, default: Decimal) -> Decimal {
    env::var(key)
        .ok()
        .and_then(|raw| Decimal::from_str(&raw).ok())
        .unwrap_or(default)
}

/// Query queue sizing and priority knobs.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub max_queue_size: usize,
    pub max_concurrent: usize,
    pub max_per_user: usize,
    pub execution_timeout: Duration,
    pub default_priority: i32,
    pub priority_boost_premium: i32,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
            max_concurrent: 50,
            max_per_user: 10,
            execution_timeout: Duration::from_secs(300),
            default_priority: 5,
            priority_boost_premium: 3,
        }
    }
}

impl QueueSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_queue_size: var_parse("QUERY_QUEUE_MAX_SIZE", defaults.max_queue_size),
            max_concurrent: var_parse("QUERY_QUEUE_MAX_CONCURRENT", defaults.max_concurrent),
            max_per_user: var_parse("QUERY_QUEUE_MAX_PER_USER", defaults.max_per_user),
            execution_timeout: Duration::from_secs(var_parse("QUERY_QUEUE_TIMEOUT", 300)),
            default_priority: var_parse("QUERY_DEFAULT_PRIORITY", defaults.default_priority),
            priority_boost_premium: var_parse(
                "QUERY_PRIORITY_BOOST_PREMIUM",
                defaults.priority_boost_premium,
            ),
        }
    }

    /// Priority for a user tier: premium tiers get the configured boost.
    pub fn priority_for_tier(&self, tier_is_premium: bool) -> i32 {
        if tier_is_premium {
            self.default_priority + self.priority_boost_premium
        } else {
            self.default_priority
        }
    }
}

/// Admission control thresholds and load-shed hysteresis.
#[derive(Debug, Clone)]
pub struct AdmissionSettings {
    /// Memory usage percentage above which submissions are rejected.
    pub memory_threshold: f64,
    /// CPU usage percentage above which submissions are rejected.
    pub cpu_threshold: f64,
    /// Queue fill ratio (0..1) above which submissions are rejected.
    pub queue_threshold: f64,
    pub check_interval: Duration,
    pub load_shedding_enabled: bool,
    pub shed_start_pressure: f64,
    pub shed_stop_pressure: f64,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            memory_threshold: 85.0,
            cpu_threshold: 90.0,
            queue_threshold: 0.9,
            check_interval: Duration::from_secs(5),
            load_shedding_enabled: true,
            shed_start_pressure: 0.8,
            shed_stop_pressure: 0.6,
        }
    }
}

impl AdmissionSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            memory_threshold: var_parse("ADMISSION_MEMORY_THRESHOLD", defaults.memory_threshold),
            cpu_threshold: var_parse("ADMISSION_CPU_THRESHOLD", defaults.cpu_threshold),
            queue_threshold: var_parse("ADMISSION_QUEUE_THRESHOLD", defaults.queue_threshold),
            check_interval: Duration::from_secs(var_parse("ADMISSION_CHECK_INTERVAL", 5)),
            load_shedding_enabled: var_bool(
                "LOAD_SHEDDING_ENABLED",
                defaults.load_shedding_enabled,
            ),
            shed_start_pressure: var_parse("LOAD_SHED_START_PRESSURE", defaults.shed_start_pressure),
            shed_stop_pressure: var_parse("LOAD_SHED_STOP_PRESSURE", defaults.shed_stop_pressure),
        }
    }
}

/// SSE delivery limits.
#[derive(Debug, Clone)]
pub struct SseSettings {
    pub enabled: bool,
    /// Consecutive publish failures before the publisher breaker opens.
    pub max_publish_failures: u32,
    pub max_connections_per_user: usize,
    pub connection_rate_per_minute: usize,
    pub keepalive: Duration,
    /// Retention of persisted operation event logs.
    pub event_retention: Duration,
    /// Maximum persisted events per operation.
    pub max_events_per_operation: usize,
}

impl Default for SseSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_publish_failures: 3,
            max_connections_per_user: 5,
            connection_rate_per_minute: 10,
            keepalive: Duration::from_secs(15),
            event_retention: Duration::from_secs(3600),
            max_events_per_operation: 1000,
        }
    }
}

impl SseSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: var_bool("SSE_ENABLED", defaults.enabled),
            max_publish_failures: var_parse(
                "SSE_MAX_REDIS_FAILURES",
                defaults.max_publish_failures,
            ),
            max_connections_per_user: var_parse(
                "SSE_MAX_CONNECTIONS_PER_USER",
                defaults.max_connections_per_user,
            ),
            connection_rate_per_minute: var_parse(
                "SSE_CONNECTION_RATE_PER_MINUTE",
                defaults.connection_rate_per_minute,
            ),
            keepalive: defaults.keepalive,
            event_retention: defaults.event_retention,
            max_events_per_operation: defaults.max_events_per_operation,
        }
    }
}

/// Streaming chunk sizes per tenant tier.
#[derive(Debug, Clone)]
pub struct ChunkSettings {
    pub standard: usize,
    pub enterprise: usize,
    pub premium: usize,
}

impl Default for ChunkSettings {
    fn default() -> Self {
        Self {
            standard: 1000,
            enterprise: 2000,
            premium: 5000,
        }
    }
}

impl ChunkSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            standard: var_parse("GRAPH_STANDARD_CHUNK_SIZE", defaults.standard),
            enterprise: var_parse("GRAPH_ENTERPRISE_CHUNK_SIZE", defaults.enterprise),
            premium: var_parse("GRAPH_PREMIUM_CHUNK_SIZE", defaults.premium),
        }
    }

    pub fn for_tier(&self, tier: crate::graph::GraphTier) -> usize {
        use crate::graph::GraphTier;
        match tier {
            GraphTier::Enterprise => self.enterprise,
            GraphTier::Premium => self.premium,
            GraphTier::Standard | GraphTier::Shared => self.standard,
        }
    }

    /// Clamps a requested chunk size into the supported range.
    pub fn clamp(size: usize) -> usize {
        size.clamp(10, 10_000)
    }
}

/// Credit pricing knobs that are configuration rather than code.
#[derive(Debug, Clone)]
pub struct CreditSettings {
    /// Historically non-zero; the current pricing includes it.
    pub mcp_call_cost: Decimal,
    /// Minimum charge applied to dynamic AI token costs.
    pub ai_minimum_charge: Decimal,
}

impl Default for CreditSettings {
    fn default() -> Self {
        Self {
            mcp_call_cost: Decimal::ZERO,
            ai_minimum_charge: Decimal::new(1, 2), // 0.01
        }
    }
}

impl CreditSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            mcp_call_cost: var_decimal("MCP_CALL_COST", defaults.mcp_call_cost),
            ai_minimum_charge: var_decimal("AI_MINIMUM_CHARGE", defaults.ai_minimum_charge),
        }
    }
}

/// Request-level limits for the query endpoint.
#[derive(Debug, Clone)]
pub struct QuerySettings {
    pub default_timeout: Duration,
    pub max_query_length: usize,
    /// Per-user query rate against a shared repository. Reads there are
    /// included in the subscription, so rate is the only control.
    pub shared_repo_rate_per_minute: usize,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(60),
            max_query_length: 50_000,
            shared_repo_rate_per_minute: 60,
        }
    }
}

impl QuerySettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_timeout: Duration::from_secs(var_parse("DEFAULT_QUERY_TIMEOUT", 60)),
            max_query_length: var_parse("MAX_QUERY_LENGTH", 50_000),
            shared_repo_rate_per_minute: var_parse(
                "SHARED_REPO_RATE_PER_MINUTE",
                defaults.shared_repo_rate_per_minute,
            ),
        }
    }
}

/// Aggregate configuration assembled at startup.
#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    pub queue: QueueSettings,
    pub admission: AdmissionSettings,
    pub sse: SseSettings,
    pub chunks: ChunkSettings,
    pub credits: CreditSettings,
    pub query: QuerySettings,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self {
            queue: QueueSettings::from_env(),
            admission: AdmissionSettings::from_env(),
            sse: SseSettings::from_env(),
            chunks: ChunkSettings::from_env(),
            credits: CreditSettings::from_env(),
            query: QuerySettings::from_env(),
        }
    }
}

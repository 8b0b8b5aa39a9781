use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Recognized engine configuration options and their effects (spec §6).
///
/// Deserializable so a host application can load it from whatever config
/// format it already owns (TOML, JSON, env) — this crate does not pick one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub busy_timeout_ms: u64,
    pub transaction_retry: RetryConfig,
    pub cache: CacheConfig,
    pub pagination: PaginationConfig,
    pub performance: PerformanceConfig,
    /// `false` by default: stock engine refuses mutations that would drive
    /// `current_stock` negative unless the movement reason is `"adjustment"`.
    pub allow_negative_stock: bool,
    /// Wall-clock budget for a single public engine operation before it is
    /// rolled back with `EngineError::Timeout`.
    pub operation_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 30_000,
            transaction_retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            pagination: PaginationConfig::default(),
            performance: PerformanceConfig::default(),
            allow_negative_stock: false,
            operation_timeout_ms: 30_000,
        }
    }
}

impl EngineConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max: u32,
    pub initial_backoff_ms: u64,
    pub factor: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max: 5,
            initial_backoff_ms: 1000,
            factor: 2,
        }
    }
}

impl RetryConfig {
    /// Backoff before the (1-indexed) `attempt`'th retry: `initial * factor^(attempt-1)`.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let millis = self.initial_backoff_ms.saturating_mul(self.factor.saturating_pow(attempt.saturating_sub(1) as u32));
        Duration::from_millis(millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_size: usize,
    pub default_ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            default_ttl_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    pub default_limit: u32,
    pub max_limit: u32,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_limit: 50,
            max_limit: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub slow_query_threshold_ms: u64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            slow_query_threshold_ms: 1000,
        }
    }
}

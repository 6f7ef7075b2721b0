//! Gate configuration.
//!
//! Deserialized from the host's configuration file. Keys are camelCase and
//! unknown keys are rejected; every option other than `rateLimiter` has a
//! default, so the minimal configuration names an algorithm and nothing else:
//!
//! ```json
//! { "rateLimiter": { "type": "TOKEN_BUCKET", "bucketSize": 100, "refillRate": 10 } }
//! ```

use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

/// Raised while checking a deserialized configuration. Fatal at setup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    /// The tag is recognized but the algorithm has no implementation yet.
    #[error("rate limiter `{0}` is not implemented")]
    UnimplementedRateLimiter(&'static str),

    #[error("`rateLimiter.bucketSize` must be greater than zero")]
    InvalidBucketSize,

    #[error("`rateLimiter.refillRate` must be a finite number greater than zero")]
    InvalidRefillRate,

    #[error("`redis.keyExpiry` must be greater than zero")]
    InvalidKeyExpiry,

    #[error("`depthLimit` must be greater than zero when present")]
    InvalidDepthLimit,
}

/// Rate limiting algorithms the configuration recognizes.
///
/// Only the token bucket is implemented. The remaining tags deserialize so
/// that a configuration naming one fails at setup with
/// [`ConfigurationError::UnimplementedRateLimiter`] instead of a generic
/// parse error.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RateLimiterConfig {
    /// Lazily refilled token bucket backed by the shared counter store.
    #[serde(rename_all = "camelCase")]
    TokenBucket {
        /// Maximum number of tokens a client can hold.
        bucket_size: u64,
        /// Tokens restored per second.
        refill_rate: f64,
    },
    LeakyBucket,
    FixedWindow,
    SlidingWindowLog,
    SlidingWindowCounter,
}

impl RateLimiterConfig {
    /// The configuration tag for this algorithm.
    pub fn kind(&self) -> &'static str {
        match self {
            RateLimiterConfig::TokenBucket { .. } => "TOKEN_BUCKET",
            RateLimiterConfig::LeakyBucket => "LEAKY_BUCKET",
            RateLimiterConfig::FixedWindow => "FIXED_WINDOW",
            RateLimiterConfig::SlidingWindowLog => "SLIDING_WINDOW_LOG",
            RateLimiterConfig::SlidingWindowCounter => "SLIDING_WINDOW_COUNTER",
        }
    }
}

/// Base weights per type kind, merged over `{10, 1, 0, 2}`.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TypeWeights {
    /// Cost of the mutation root.
    #[serde(default = "default_mutation_weight")]
    pub mutation: u64,
    /// Cost of materializing one object, interface, or union value.
    #[serde(default = "default_object_weight")]
    pub object: u64,
    /// Cost of a scalar or enum leaf.
    #[serde(default = "default_scalar_weight")]
    pub scalar: u64,
    /// Cost of a connection-pattern type.
    #[serde(default = "default_connection_weight")]
    pub connection: u64,
}

impl Default for TypeWeights {
    fn default() -> Self {
        TypeWeights {
            mutation: default_mutation_weight(),
            object: default_object_weight(),
            scalar: default_scalar_weight(),
            connection: default_connection_weight(),
        }
    }
}

fn default_mutation_weight() -> u64 {
    10
}

fn default_object_weight() -> u64 {
    1
}

fn default_scalar_weight() -> u64 {
    0
}

fn default_connection_weight() -> u64 {
    2
}

/// Counter store connection options, passed through to the store adapter.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RedisConfig {
    /// Connection URL.
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// TTL applied to every counter row, in milliseconds.
    #[serde(default = "default_key_expiry")]
    pub key_expiry: u64,

    /// Upper bound on one admission round trip, in milliseconds.
    #[serde(default = "default_command_timeout")]
    pub command_timeout: u64,

    /// Prefix for counter keys.
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl RedisConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout)
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        RedisConfig {
            url: default_redis_url(),
            key_expiry: default_key_expiry(),
            command_timeout: default_command_timeout(),
            namespace: default_namespace(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

// 24 hours.
fn default_key_expiry() -> u64 {
    86_400_000
}

fn default_command_timeout() -> u64 {
    2_000
}

fn default_namespace() -> String {
    "graphql-gate".to_string()
}

/// Top-level gate configuration.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Configuration {
    /// Which algorithm guards admission.
    pub rate_limiter: RateLimiterConfig,

    /// Per-kind base weights for the weight table.
    #[serde(default)]
    pub type_weights: TypeWeights,

    #[serde(default)]
    pub redis: RedisConfig,

    /// Compute and record every decision but never reject.
    #[serde(default)]
    pub dark: bool,

    /// Fail weight-table construction on list fields with no slicing argument.
    #[serde(default)]
    pub enforce_bounded_lists: bool,

    /// Selection nesting limit. Recognized and validated, and turns on depth
    /// reporting in the admission record; this gate does not reject on it.
    #[serde(default)]
    pub depth_limit: Option<u64>,

    /// Cardinality assumed for unbounded lists when
    /// `enforceBoundedLists` is off.
    #[serde(default = "default_list_size")]
    pub default_list_size: u64,

    /// Argument names recognized as slicing arguments.
    #[serde(default = "default_slicing_arguments")]
    pub slicing_arguments: Vec<String>,
}

pub(crate) fn default_list_size() -> u64 {
    100
}

pub(crate) fn default_slicing_arguments() -> Vec<String> {
    vec!["first".to_string(), "last".to_string(), "limit".to_string()]
}

impl Configuration {
    /// Checks the values serde cannot: positivity requirements and the
    /// unimplemented algorithm tags.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        match &self.rate_limiter {
            RateLimiterConfig::TokenBucket {
                bucket_size,
                refill_rate,
            } => {
                if *bucket_size == 0 {
                    return Err(ConfigurationError::InvalidBucketSize);
                }
                if !refill_rate.is_finite() || *refill_rate <= 0.0 {
                    return Err(ConfigurationError::InvalidRefillRate);
                }
            }
            other => {
                return Err(ConfigurationError::UnimplementedRateLimiter(other.kind()));
            }
        }
        if self.redis.key_expiry == 0 {
            return Err(ConfigurationError::InvalidKeyExpiry);
        }
        if self.depth_limit == Some(0) {
            return Err(ConfigurationError::InvalidDepthLimit);
        }
        Ok(())
    }
}

//! The gate itself: per-request orchestration.
//!
//! One [`Gate`] serves a schema for the lifetime of the process. Per request
//! it derives the client identity, validates the query, prices it, and spends
//! the price against the client's token bucket, with all admissions for one
//! client serialized FIFO.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Schema;
use apollo_compiler::validation::Valid;
use http::HeaderMap;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use crate::configuration::Configuration;
use crate::configuration::ConfigurationError;
use crate::configuration::RateLimiterConfig;
use crate::cost::CostOptions;
use crate::cost::CostSchema;
use crate::cost::Variables;
use crate::cost::analyze;
use crate::cost::measure_depth;
use crate::error::GateError;
use crate::rate_limit::ClientSerializer;
use crate::rate_limit::TokenBucket;
use crate::storage::CounterStore;

/// A query admission request, as handed over by the host server.
#[derive(Debug, Default)]
pub struct GateRequest {
    /// Raw GraphQL document.
    pub query: String,
    /// Request variables.
    pub variables: Variables,
    /// Request headers, consulted for proxy-aware addressing.
    pub headers: HeaderMap,
    /// Transport peer address.
    pub peer_addr: Option<SocketAddr>,
}

/// What the host should do with the query.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Execute the query.
    Allow,
    /// Answer 429 with a `Retry-After` header.
    Deny { retry_after: Duration },
}

impl Decision {
    /// `Retry-After` header value in whole seconds, rounded up.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Decision::Allow => None,
            Decision::Deny { retry_after } => {
                Some((retry_after.as_millis() as u64).div_ceil(1_000))
            }
        }
    }
}

/// Structured trace of one admission decision, attached to every response
/// for downstream inspection. In dark mode a would-be rejection is the one
/// case where `success` is false on an allowed request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRecord {
    /// Decision time, unix milliseconds.
    pub timestamp: u64,
    /// Complexity cost charged for the query.
    pub complexity: u64,
    /// Tokens remaining after the bucket transaction.
    pub tokens: f64,
    /// Whether the bucket covered the cost.
    pub success: bool,
    /// Selection depth, present when depth limiting is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<u64>,
}

#[derive(Debug)]
pub struct GateResponse {
    pub decision: Decision,
    pub record: AdmissionRecord,
}

/// Admission control for one schema.
#[derive(Debug)]
pub struct Gate {
    schema: Valid<Schema>,
    weights: Arc<CostSchema>,
    bucket: TokenBucket,
    serializer: ClientSerializer,
    dark: bool,
    depth_limit: Option<u64>,
}

impl Gate {
    /// Validates `configuration`, builds the weight table, and wires the
    /// bucket to `store`. Fails fast on unimplemented rate limiter tags and
    /// on weight-table errors; nothing here is recoverable per request.
    pub fn new(
        schema: Valid<Schema>,
        configuration: Configuration,
        store: Arc<dyn CounterStore>,
    ) -> Result<Self, GateError> {
        configuration.validate()?;
        let RateLimiterConfig::TokenBucket {
            bucket_size,
            refill_rate,
        } = configuration.rate_limiter
        else {
            return Err(ConfigurationError::UnimplementedRateLimiter(
                configuration.rate_limiter.kind(),
            )
            .into());
        };

        let weights = CostSchema::build(&schema, &CostOptions::from(&configuration))?;
        let bucket = TokenBucket::new(
            bucket_size,
            refill_rate,
            configuration.redis.key_expiry,
            store,
        );

        Ok(Gate {
            schema,
            weights: Arc::new(weights),
            bucket,
            serializer: ClientSerializer::new(),
            dark: configuration.dark,
            depth_limit: configuration.depth_limit,
        })
    }

    /// Decides whether `request` may be executed.
    pub async fn handle(&self, request: &GateRequest) -> Result<GateResponse, GateError> {
        let client_id = client_identity(request).ok_or(GateError::MissingClientIdentity)?;

        let document =
            ExecutableDocument::parse_and_validate(&self.schema, &request.query, "request.graphql")
                .map_err(|invalid| GateError::InvalidQuery {
                    errors: invalid
                        .errors
                        .iter()
                        .map(|diagnostic| diagnostic.to_string())
                        .collect(),
                })?;

        let depth = measure_depth(&document);
        let complexity = analyze(&document, &request.variables, &self.weights)?;
        let now_ms = now_unix_ms();
        let admission = self
            .serializer
            .run(&client_id, self.bucket.admit(&client_id, now_ms, complexity))
            .await?;

        let decision = if admission.success {
            Decision::Allow
        } else if self.dark {
            warn!(
                client = %client_id,
                complexity,
                tokens = admission.tokens,
                "rate limit exceeded, admitting in dark mode"
            );
            Decision::Allow
        } else {
            Decision::Deny {
                retry_after: Duration::from_millis(admission.retry_after_ms.unwrap_or_default()),
            }
        };
        debug!(
            client = %client_id,
            complexity,
            tokens = admission.tokens,
            success = admission.success,
            "admission decided"
        );

        Ok(GateResponse {
            decision,
            record: AdmissionRecord {
                timestamp: now_ms,
                complexity,
                tokens: admission.tokens,
                success: admission.success,
                depth: self.depth_limit.is_some().then_some(depth),
            },
        })
    }
}

/// Stable requester identity: the first hop of `x-forwarded-for` when a
/// proxy supplied one, the peer IP otherwise.
fn client_identity(request: &GateRequest) -> Option<String> {
    if let Some(forwarded) = request
        .headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
    {
        let first = forwarded.split(',').next().unwrap_or_default().trim();
        if !first.is_empty() {
            return Some(first.to_string());
        }
    }
    request.peer_addr.map(|addr| addr.ip().to_string())
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

//! Shared counter storage.
//!
//! The bucket never reads and writes the counter in separate steps: the whole
//! read-refill-decide-write cycle is one transaction the store executes
//! atomically, so any number of gate processes can share one counter per
//! client. [`RedisCounterStore`] runs the transaction as a server-side Lua
//! script; [`InMemoryCounterStore`] runs the same algorithm under a mutex for
//! tests and single-process deployments.

pub mod memory;
pub mod redis;

pub use memory::InMemoryCounterStore;
pub use redis::RedisCounterStore;

use async_trait::async_trait;

/// Outcome of one admission transaction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Admission {
    /// Whether the cost was deducted.
    pub success: bool,
    /// Tokens remaining after the transaction.
    pub tokens: f64,
    /// On rejection, how long until the bucket can cover the cost.
    pub retry_after_ms: Option<u64>,
}

/// Parameters of the admission transaction.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionParams<'a> {
    pub client_id: &'a str,
    pub now_ms: u64,
    pub cost: u64,
    pub capacity: f64,
    /// Tokens restored per second.
    pub refill_rate: f64,
    /// TTL re-applied to the counter row on every write.
    pub key_expiry_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("counter store timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("counter store request failed: {0}")]
    Backend(String),

    #[error("admission transaction returned a malformed response: {0}")]
    MalformedResponse(String),
}

impl StoreError {
    /// Transient errors may succeed on a later request; permanent ones
    /// (a broken transaction script) will not.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Timeout(_) | StoreError::Backend(_))
    }
}

/// A key/value store that can run the admission transaction atomically.
#[async_trait]
pub trait CounterStore: std::fmt::Debug + Send + Sync + 'static {
    /// Runs one admission transaction:
    ///
    /// 1. Read `{ tokens, lastRefill }` for the client; absent rows start at
    ///    `{ capacity, now_ms }`.
    /// 2. Refill: `tokens = min(capacity, tokens + refill_rate * elapsed_s)`.
    /// 3. Deduct `cost` on success, or compute `retry_after_ms` on rejection.
    /// 4. Write the row back with the TTL, atomically with the read.
    async fn admit(&self, params: AdmissionParams<'_>) -> Result<Admission, StoreError>;
}

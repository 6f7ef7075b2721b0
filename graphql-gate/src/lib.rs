//! Complexity-based admission control for GraphQL servers.
//!
//! Before the host server executes a query, the gate computes a static
//! complexity cost for it against a weight table derived from the schema,
//! then spends that cost against a distributed token bucket keyed by client
//! identity. The query is admitted, shadow-admitted (dark mode), or rejected
//! with a backoff signal the host renders as `429` + `Retry-After`.
//!
//! The crate is a library; parsing HTTP requests and serializing responses
//! stay with the host. The typical wiring is:
//!
//! 1. Parse the schema once with [`apollo_compiler::Schema::parse_and_validate`].
//! 2. Connect a counter store: [`RedisCounterStore`] in production,
//!    [`InMemoryCounterStore`] for tests or a single process.
//! 3. Build a [`Gate`] from the schema, a [`Configuration`], and the store.
//! 4. Call [`Gate::handle`] per request.

pub mod configuration;
pub mod cost;
pub mod error;
pub mod rate_limit;
pub mod service;
pub mod storage;

pub use configuration::Configuration;
pub use configuration::RateLimiterConfig;
pub use cost::CostSchema;
pub use error::GateError;
pub use service::AdmissionRecord;
pub use service::Decision;
pub use service::Gate;
pub use service::GateRequest;
pub use service::GateResponse;
pub use storage::Admission;
pub use storage::CounterStore;
pub use storage::InMemoryCounterStore;
pub use storage::RedisCounterStore;

//! Admission rate limiting.
//!
//! [`TokenBucket`] holds the algorithm parameters and runs each admission as
//! one atomic transaction against the counter store. [`ClientSerializer`]
//! keeps those transactions from interleaving per client: at most one call
//! per client identity is in flight, the rest wait FIFO.

pub mod serializer;
pub mod token_bucket;

pub use serializer::ClientSerializer;
pub use token_bucket::TokenBucket;

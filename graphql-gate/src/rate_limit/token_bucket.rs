//! Token bucket over the shared counter store.

use std::sync::Arc;

use crate::storage::Admission;
use crate::storage::AdmissionParams;
use crate::storage::CounterStore;
use crate::storage::StoreError;

/// Lazily refilled token bucket.
///
/// The bucket itself is stateless: per-client state lives in the counter
/// store and every admission is one atomic store transaction, so buckets in
/// different processes can share counters. Serializing concurrent callers is
/// the serializer's job, not the bucket's.
#[derive(Clone, Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    key_expiry_ms: u64,
    store: Arc<dyn CounterStore>,
}

impl TokenBucket {
    pub fn new(
        capacity: u64,
        refill_rate: f64,
        key_expiry_ms: u64,
        store: Arc<dyn CounterStore>,
    ) -> Self {
        TokenBucket {
            capacity: capacity as f64,
            refill_rate,
            key_expiry_ms,
            store,
        }
    }

    /// Tries to deduct `cost` tokens for `client_id` at `now_ms`.
    pub async fn admit(
        &self,
        client_id: &str,
        now_ms: u64,
        cost: u64,
    ) -> Result<Admission, StoreError> {
        self.store
            .admit(AdmissionParams {
                client_id,
                now_ms,
                cost,
                capacity: self.capacity,
                refill_rate: self.refill_rate,
                key_expiry_ms: self.key_expiry_ms,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryCounterStore;

    fn bucket(capacity: u64, refill_rate: f64) -> TokenBucket {
        TokenBucket::new(
            capacity,
            refill_rate,
            86_400_000,
            Arc::new(InMemoryCounterStore::new()),
        )
    }

    #[tokio::test]
    async fn admits_until_the_bucket_is_empty() {
        let bucket = bucket(10, 1.0);
        let first = bucket.admit("client", 0, 6).await.unwrap();
        assert!(first.success);
        assert_eq!(first.tokens, 4.0);

        let second = bucket.admit("client", 0, 6).await.unwrap();
        assert!(!second.success);
        assert_eq!(second.tokens, 4.0);
        assert_eq!(second.retry_after_ms, Some(2_000));
    }

    #[tokio::test]
    async fn refills_between_admissions() {
        let bucket = bucket(10, 1.0);
        assert!(bucket.admit("client", 0, 6).await.unwrap().success);
        let admission = bucket.admit("client", 2_000, 6).await.unwrap();
        assert!(admission.success);
        assert_eq!(admission.tokens, 0.0);
    }

    #[tokio::test]
    async fn tokens_stay_within_bounds() {
        let bucket = bucket(10, 100.0);
        let drained = bucket.admit("client", 0, 10).await.unwrap();
        assert_eq!(drained.tokens, 0.0);

        // A long idle period refills to capacity, never beyond.
        let rested = bucket.admit("client", 60_000, 0).await.unwrap();
        assert_eq!(rested.tokens, 10.0);
    }

    #[tokio::test]
    async fn rejection_never_goes_negative() {
        let bucket = bucket(4, 1.0);
        let admission = bucket.admit("client", 0, 9).await.unwrap();
        assert!(!admission.success);
        assert!(admission.tokens >= 0.0);
        assert_eq!(admission.retry_after_ms, Some(5_000));
    }
}

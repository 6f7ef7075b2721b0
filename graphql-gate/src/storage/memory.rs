//! In-process counter store.

use ahash::HashMap;
use async_trait::async_trait;
use parking_lot::Mutex;

use super::Admission;
use super::AdmissionParams;
use super::CounterStore;
use super::StoreError;

#[derive(Debug, Clone, Copy)]
struct BucketRow {
    tokens: f64,
    last_refill_ms: u64,
    expires_at_ms: u64,
}

/// Mutex-guarded rendition of the admission transaction. Matches the Redis
/// script's arithmetic exactly, including the TTL: a row whose expiry has
/// passed reads as absent.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    rows: Mutex<HashMap<String, BucketRow>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn admit(&self, params: AdmissionParams<'_>) -> Result<Admission, StoreError> {
        let mut rows = self.rows.lock();
        let row = rows
            .get(params.client_id)
            .copied()
            .filter(|row| row.expires_at_ms > params.now_ms);
        let (tokens, last_refill_ms) = match row {
            Some(row) => (row.tokens, row.last_refill_ms),
            None => (params.capacity, params.now_ms),
        };

        let elapsed_ms = params.now_ms.saturating_sub(last_refill_ms);
        let mut tokens =
            (tokens + params.refill_rate * elapsed_ms as f64 / 1000.0).min(params.capacity);

        let cost = params.cost as f64;
        let admission = if tokens >= cost {
            tokens -= cost;
            Admission {
                success: true,
                tokens,
                retry_after_ms: None,
            }
        } else {
            let retry_after_ms = ((cost - tokens) * 1000.0 / params.refill_rate).ceil() as u64;
            Admission {
                success: false,
                tokens,
                retry_after_ms: Some(retry_after_ms),
            }
        };

        rows.insert(
            params.client_id.to_string(),
            BucketRow {
                tokens,
                last_refill_ms: params.now_ms,
                expires_at_ms: params.now_ms.saturating_add(params.key_expiry_ms),
            },
        );
        Ok(admission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(client_id: &str, now_ms: u64, cost: u64) -> AdmissionParams<'_> {
        AdmissionParams {
            client_id,
            now_ms,
            cost,
            capacity: 10.0,
            refill_rate: 1.0,
            key_expiry_ms: 86_400_000,
        }
    }

    #[tokio::test]
    async fn first_admission_starts_from_a_full_bucket() {
        let store = InMemoryCounterStore::new();
        let admission = store.admit(params("client", 0, 6)).await.unwrap();
        assert!(admission.success);
        assert_eq!(admission.tokens, 4.0);
        assert_eq!(admission.retry_after_ms, None);
    }

    #[tokio::test]
    async fn rejection_reports_the_refill_delay() {
        let store = InMemoryCounterStore::new();
        assert!(store.admit(params("client", 0, 6)).await.unwrap().success);
        let admission = store.admit(params("client", 0, 6)).await.unwrap();
        assert!(!admission.success);
        assert_eq!(admission.tokens, 4.0);
        assert_eq!(admission.retry_after_ms, Some(2_000));
    }

    #[tokio::test]
    async fn tokens_refill_with_elapsed_time() {
        let store = InMemoryCounterStore::new();
        assert!(store.admit(params("client", 0, 6)).await.unwrap().success);
        let admission = store.admit(params("client", 2_000, 6)).await.unwrap();
        assert!(admission.success);
        assert_eq!(admission.tokens, 0.0);
    }

    #[tokio::test]
    async fn refill_clamps_at_capacity() {
        let store = InMemoryCounterStore::new();
        assert!(store.admit(params("client", 0, 6)).await.unwrap().success);
        let admission = store.admit(params("client", 3_600_000, 0)).await.unwrap();
        assert_eq!(admission.tokens, 10.0);
    }

    #[tokio::test]
    async fn expired_rows_read_as_absent() {
        let store = InMemoryCounterStore::new();
        let mut first = params("client", 0, 10);
        first.key_expiry_ms = 1_000;
        assert_eq!(store.admit(first).await.unwrap().tokens, 0.0);
        // Past the TTL the client starts from a full bucket again.
        let admission = store.admit(params("client", 1_000, 0)).await.unwrap();
        assert_eq!(admission.tokens, 10.0);
    }

    #[tokio::test]
    async fn clients_do_not_share_buckets() {
        let store = InMemoryCounterStore::new();
        assert!(store.admit(params("a", 0, 10)).await.unwrap().success);
        assert!(store.admit(params("b", 0, 10)).await.unwrap().success);
    }
}

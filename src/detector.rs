use crate::store::{ChainStore, StoreError};
use crate::types::{Chain, NewChainDetection};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info};

/// Reconciles a fetched batch of chains against the store.
///
/// "New" is defined against a single key-set snapshot taken before any write,
/// so classification is consistent for the whole batch regardless of the
/// writes it triggers.
#[derive(Clone)]
pub struct ChainDetector {
    store: Arc<dyn ChainStore>,
}

impl ChainDetector {
    pub fn new(store: Arc<dyn ChainStore>) -> Self {
        Self { store }
    }

    /// Partitions `batch` into new and existing chains, persists everything,
    /// and returns the detections for chains whose insert succeeded, in batch
    /// order.
    ///
    /// Key misuse on a single chain (duplicate insert, update of a missing
    /// row) is logged and skipped; the rest of the batch still processes.
    /// A fatal store error aborts the cycle and propagates.
    pub async fn process_chains(
        &self,
        batch: &[Chain],
    ) -> Result<Vec<NewChainDetection>, StoreError> {
        let known = self.store.all_ids().await?;
        let mut detections = Vec::new();

        for chain in batch {
            if known.contains(&chain.chain) {
                if let Err(e) = self.store.update(chain).await {
                    if e.is_fatal() {
                        return Err(e);
                    }
                    error!(
                        chain_id = chain.chain,
                        name = %chain.name,
                        error = %e,
                        "Failed to update chain"
                    );
                }
            } else {
                match self.store.insert(chain).await {
                    Ok(()) => {
                        let detection = NewChainDetection {
                            chain: chain.clone(),
                            detected_at: Utc::now(),
                        };
                        info!(
                            detected_at = %detection.detected_at,
                            "New chain saved: {} (ID: {})",
                            chain.name,
                            chain.chain
                        );
                        detections.push(detection);
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        error!(
                            chain_id = chain.chain,
                            name = %chain.name,
                            error = %e,
                            "Failed to save chain"
                        );
                    }
                }
            }
        }

        if !detections.is_empty() {
            info!("Detected and saved {} new chain(s)", detections.len());
        }

        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use crate::types::sample_chain;
    use async_trait::async_trait;
    use std::collections::HashSet;

    async fn store_with_detector() -> (Arc<SqliteStore>, ChainDetector) {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let detector = ChainDetector::new(store.clone());
        (store, detector)
    }

    #[tokio::test]
    async fn test_empty_store_detects_whole_batch() {
        let (store, detector) = store_with_detector().await;
        let batch = vec![sample_chain(1, "ethereum"), sample_chain(2, "expanse")];

        let started = Utc::now();
        let detections = detector.process_chains(&batch).await.unwrap();

        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].chain.chain, 1);
        assert_eq!(detections[1].chain.chain, 2);
        // Detections are stamped in processing order.
        assert!(detections[0].detected_at >= started);
        assert!(detections[1].detected_at >= detections[0].detected_at);
        assert_eq!(store.all_ids().await.unwrap(), HashSet::from([1, 2]));
    }

    #[tokio::test]
    async fn test_reprocessing_same_batch_detects_nothing() {
        let (store, detector) = store_with_detector().await;
        let batch = vec![sample_chain(1, "ethereum"), sample_chain(137, "polygon")];

        let first = detector.process_chains(&batch).await.unwrap();
        assert_eq!(first.len(), 2);
        let count_after_first = store.count().await.unwrap();

        let second = detector.process_chains(&batch).await.unwrap();
        assert!(second.is_empty());
        assert_eq!(store.count().await.unwrap(), count_after_first);
    }

    #[tokio::test]
    async fn test_mixed_batch_updates_existing_and_detects_new() {
        let (store, detector) = store_with_detector().await;

        detector
            .process_chains(&[sample_chain(1, "ethereum"), sample_chain(2, "expanse")])
            .await
            .unwrap();
        let before = store.get(1).await.unwrap().unwrap();

        let mut updated = sample_chain(1, "ethereum");
        updated.price = 3100.0;
        let detections = detector
            .process_chains(&[updated, sample_chain(3, "ropsten")])
            .await
            .unwrap();

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].chain.chain, 3);

        let record = store.get(1).await.unwrap().unwrap();
        assert_eq!(record.chain.price, 3100.0);
        assert_eq!(record.created_at, before.created_at);
        assert_eq!(store.all_ids().await.unwrap(), HashSet::from([1, 2, 3]));
    }

    #[tokio::test]
    async fn test_within_batch_duplicate_id_detected_once() {
        let (store, detector) = store_with_detector().await;

        // Both copies are classified against the pre-batch snapshot, so the
        // second insert fails with DuplicateKey and is isolated.
        let batch = vec![sample_chain(7, "mumbai"), sample_chain(7, "mumbai")];
        let detections = detector.process_chains(&batch).await.unwrap();

        assert_eq!(detections.len(), 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    /// Store that delegates to an in-memory sqlite database but fails inserts
    /// for a chosen set of chain ids.
    struct FailingInsertStore {
        inner: SqliteStore,
        reject: HashSet<u64>,
    }

    #[async_trait]
    impl ChainStore for FailingInsertStore {
        async fn exists(&self, chain_id: u64) -> Result<bool, StoreError> {
            self.inner.exists(chain_id).await
        }

        async fn all_ids(&self) -> Result<HashSet<u64>, StoreError> {
            self.inner.all_ids().await
        }

        async fn insert(&self, chain: &Chain) -> Result<(), StoreError> {
            if self.reject.contains(&chain.chain) {
                return Err(StoreError::DuplicateKey(chain.chain));
            }
            self.inner.insert(chain).await
        }

        async fn update(&self, chain: &Chain) -> Result<(), StoreError> {
            self.inner.update(chain).await
        }

        async fn get(&self, chain_id: u64) -> Result<Option<crate::types::ChainRecord>, StoreError> {
            self.inner.get(chain_id).await
        }

        async fn list(&self) -> Result<Vec<crate::types::ChainRecord>, StoreError> {
            self.inner.list().await
        }

        async fn count(&self) -> Result<u64, StoreError> {
            self.inner.count().await
        }
    }

    #[tokio::test]
    async fn test_single_insert_failure_does_not_abort_batch() {
        let store = Arc::new(FailingInsertStore {
            inner: SqliteStore::in_memory().await.unwrap(),
            reject: HashSet::from([2]),
        });
        let detector = ChainDetector::new(store.clone());

        let batch = vec![
            sample_chain(1, "ethereum"),
            sample_chain(2, "expanse"),
            sample_chain(3, "ropsten"),
        ];
        let detections = detector.process_chains(&batch).await.unwrap();

        // The failed chain is never reported as detected, the rest are, in order.
        let detected: Vec<u64> = detections.iter().map(|d| d.chain.chain).collect();
        assert_eq!(detected, vec![1, 3]);
        assert_eq!(store.all_ids().await.unwrap(), HashSet::from([1, 3]));
    }

    /// Store that delegates to an in-memory sqlite database but fails updates
    /// for a chosen set of chain ids.
    struct FailingUpdateStore {
        inner: SqliteStore,
        reject: HashSet<u64>,
    }

    #[async_trait]
    impl ChainStore for FailingUpdateStore {
        async fn exists(&self, chain_id: u64) -> Result<bool, StoreError> {
            self.inner.exists(chain_id).await
        }

        async fn all_ids(&self) -> Result<HashSet<u64>, StoreError> {
            self.inner.all_ids().await
        }

        async fn insert(&self, chain: &Chain) -> Result<(), StoreError> {
            self.inner.insert(chain).await
        }

        async fn update(&self, chain: &Chain) -> Result<(), StoreError> {
            if self.reject.contains(&chain.chain) {
                return Err(StoreError::NotFound(chain.chain));
            }
            self.inner.update(chain).await
        }

        async fn get(&self, chain_id: u64) -> Result<Option<crate::types::ChainRecord>, StoreError> {
            self.inner.get(chain_id).await
        }

        async fn list(&self) -> Result<Vec<crate::types::ChainRecord>, StoreError> {
            self.inner.list().await
        }

        async fn count(&self) -> Result<u64, StoreError> {
            self.inner.count().await
        }
    }

    #[tokio::test]
    async fn test_single_update_failure_does_not_abort_batch() {
        let store = Arc::new(FailingUpdateStore {
            inner: SqliteStore::in_memory().await.unwrap(),
            reject: HashSet::from([1]),
        });
        store.insert(&sample_chain(1, "ethereum")).await.unwrap();
        store.insert(&sample_chain(2, "expanse")).await.unwrap();
        let detector = ChainDetector::new(store.clone());

        let mut eth = sample_chain(1, "ethereum");
        eth.price = 3300.0;
        let mut exp = sample_chain(2, "expanse");
        exp.price = 0.25;
        let batch = vec![eth, exp, sample_chain(3, "ropsten")];

        let detections = detector.process_chains(&batch).await.unwrap();

        // The failed update is isolated: the other update lands and the new
        // chain is still the sole detection.
        let detected: Vec<u64> = detections.iter().map(|d| d.chain.chain).collect();
        assert_eq!(detected, vec![3]);
        assert_eq!(store.get(1).await.unwrap().unwrap().chain.price, 2000.0);
        assert_eq!(store.get(2).await.unwrap().unwrap().chain.price, 0.25);
        assert_eq!(store.all_ids().await.unwrap(), HashSet::from([1, 2, 3]));
    }

    /// Store whose reads work but whose writes report the backend as gone.
    struct UnavailableStore;

    #[async_trait]
    impl ChainStore for UnavailableStore {
        async fn exists(&self, _chain_id: u64) -> Result<bool, StoreError> {
            Ok(false)
        }

        async fn all_ids(&self) -> Result<HashSet<u64>, StoreError> {
            Ok(HashSet::new())
        }

        async fn insert(&self, _chain: &Chain) -> Result<(), StoreError> {
            Err(StoreError::Unavailable(sqlx::Error::PoolClosed))
        }

        async fn update(&self, _chain: &Chain) -> Result<(), StoreError> {
            Err(StoreError::Unavailable(sqlx::Error::PoolClosed))
        }

        async fn get(&self, _chain_id: u64) -> Result<Option<crate::types::ChainRecord>, StoreError> {
            Ok(None)
        }

        async fn list(&self) -> Result<Vec<crate::types::ChainRecord>, StoreError> {
            Ok(Vec::new())
        }

        async fn count(&self) -> Result<u64, StoreError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_unavailable_store_aborts_cycle() {
        let detector = ChainDetector::new(Arc::new(UnavailableStore));

        let err = detector
            .process_chains(&[sample_chain(1, "ethereum")])
            .await
            .unwrap_err();

        assert!(err.is_fatal());
    }
}

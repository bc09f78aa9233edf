//! Finalization Worker
//!
//! Retries Phase C (recording the external id) for transfers and withdrawals
//! whose money movement already happened but whose local record could not be
//! updated. Work arrives over a bounded mpsc channel.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::core_types::RecordId;
use crate::funding::types::RecordKind;
use crate::store::{Store, StoreError};

/// External id waiting to be written to its record
#[derive(Debug, Clone, PartialEq)]
pub struct PendingFinalization {
    pub kind: RecordKind,
    pub record_id: RecordId,
    pub external_id: String,
}

impl PendingFinalization {
    pub fn new(kind: RecordKind, record_id: RecordId, external_id: impl Into<String>) -> Self {
        Self {
            kind,
            record_id,
            external_id: external_id.into(),
        }
    }

    /// Write the external id in its own unit of work
    pub async fn apply(&self, store: &dyn Store) -> Result<(), StoreError> {
        let mut uow = store.begin().await?;
        match self.kind {
            RecordKind::Transfer => {
                uow.set_transfer_external_id(self.record_id, &self.external_id)
                    .await?
            }
            RecordKind::Withdrawal => {
                uow.set_withdrawal_external_id(self.record_id, &self.external_id)
                    .await?
            }
        }
        uow.commit().await
    }
}

/// Sending half handed to the coordinator
#[derive(Debug, Clone)]
pub struct FinalizationQueue {
    tx: mpsc::Sender<PendingFinalization>,
}

impl FinalizationQueue {
    /// Queue a retry; returns false when the worker is gone or saturated
    pub fn submit(&self, pending: PendingFinalization) -> bool {
        match self.tx.try_send(pending) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(p)) | Err(mpsc::error::TrySendError::Closed(p)) => {
                error!(
                    record_id = %p.record_id,
                    kind = %p.kind,
                    external_id = %p.external_id,
                    "CRITICAL: finalization could not be queued, record needs manual update"
                );
                false
            }
        }
    }
}

/// Configuration for the finalization worker
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FinalizationConfig {
    pub retry_delay_ms: u64,
    pub max_attempts: u32,
    pub queue_capacity: usize,
}

impl Default for FinalizationConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: 2_000,
            max_attempts: 5,
            queue_capacity: 1024,
        }
    }
}

/// Finalization Worker
pub struct FinalizationWorker {
    store: Arc<dyn Store>,
    rx: mpsc::Receiver<PendingFinalization>,
    config: FinalizationConfig,
}

impl FinalizationWorker {
    pub fn new(store: Arc<dyn Store>, config: FinalizationConfig) -> (Self, FinalizationQueue) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        (Self { store, rx, config }, FinalizationQueue { tx })
    }

    /// Drain the queue until every sender is dropped
    pub async fn run(mut self) {
        info!(
            retry_delay_ms = self.config.retry_delay_ms,
            max_attempts = self.config.max_attempts,
            "Starting finalization worker"
        );

        while let Some(pending) = self.rx.recv().await {
            self.retry(&pending).await;
        }

        info!("Finalization worker stopped");
    }

    /// Retry one finalization with a fixed backoff
    pub async fn retry(&self, pending: &PendingFinalization) -> bool {
        let delay = Duration::from_millis(self.config.retry_delay_ms);

        for attempt in 1..=self.config.max_attempts {
            tokio::time::sleep(delay).await;

            match pending.apply(self.store.as_ref()).await {
                Ok(()) => {
                    info!(
                        record_id = %pending.record_id,
                        kind = %pending.kind,
                        attempt,
                        "Finalization recovered"
                    );
                    return true;
                }
                Err(e @ (StoreError::Conflict(_) | StoreError::NotFound(_))) => {
                    error!(
                        record_id = %pending.record_id,
                        kind = %pending.kind,
                        error = %e,
                        "Finalization cannot succeed, not retrying"
                    );
                    return false;
                }
                Err(e) => {
                    warn!(
                        record_id = %pending.record_id,
                        kind = %pending.kind,
                        attempt,
                        error = %e,
                        "Finalization attempt failed"
                    );
                }
            }
        }

        error!(
            record_id = %pending.record_id,
            kind = %pending.kind,
            external_id = %pending.external_id,
            attempts = self.config.max_attempts,
            "CRITICAL: giving up on finalization, record needs manual update"
        );
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::Currency;
    use crate::funding::types::{Transfer, TransferRequest};
    use crate::store::MemoryStore;
    use crate::testing::FlakyStore;
    use rust_decimal::Decimal;

    fn fast() -> FinalizationConfig {
        FinalizationConfig {
            retry_delay_ms: 1,
            max_attempts: 3,
            queue_capacity: 8,
        }
    }

    async fn seeded_transfer(store: &dyn Store) -> Transfer {
        let transfer = Transfer::pending(&TransferRequest {
            sender_id: 1,
            recipient_id: 2,
            currency: Currency::new("USDT").unwrap(),
            amount: Decimal::from(3),
        });
        let mut uow = store.begin().await.unwrap();
        uow.insert_transfer(&transfer).await.unwrap();
        uow.commit().await.unwrap();
        transfer
    }

    #[tokio::test]
    async fn test_retry_recovers_after_transient_failures() {
        let inner = MemoryStore::new();
        let transfer = seeded_transfer(&inner).await;
        let store = Arc::new(FlakyStore::new(inner.clone()));
        store.fail_next_commits(2);

        let (worker, _queue) = FinalizationWorker::new(store, fast());
        let pending = PendingFinalization::new(RecordKind::Transfer, transfer.id, "77");

        assert!(worker.retry(&pending).await);
        let stored = inner.transfer(transfer.id).await.unwrap().unwrap();
        assert_eq!(stored.external_id.as_deref(), Some("77"));
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let inner = MemoryStore::new();
        let transfer = seeded_transfer(&inner).await;
        let store = Arc::new(FlakyStore::new(inner.clone()));
        store.fail_next_commits(10);

        let (worker, _queue) = FinalizationWorker::new(store, fast());
        let pending = PendingFinalization::new(RecordKind::Transfer, transfer.id, "77");

        assert!(!worker.retry(&pending).await);
        let stored = inner.transfer(transfer.id).await.unwrap().unwrap();
        assert!(stored.external_id.is_none());
    }

    #[tokio::test]
    async fn test_conflict_is_not_retried() {
        let store = MemoryStore::new();
        let transfer = seeded_transfer(&store).await;
        PendingFinalization::new(RecordKind::Transfer, transfer.id, "77")
            .apply(&store)
            .await
            .unwrap();

        let (worker, _queue) = FinalizationWorker::new(Arc::new(store), fast());
        let other = PendingFinalization::new(RecordKind::Transfer, transfer.id, "78");
        assert!(!worker.retry(&other).await);
    }

    #[tokio::test]
    async fn test_run_drains_queue_and_stops() {
        let store = MemoryStore::new();
        let transfer = seeded_transfer(&store).await;

        let (worker, queue) = FinalizationWorker::new(Arc::new(store.clone()), fast());
        assert!(queue.submit(PendingFinalization::new(
            RecordKind::Transfer,
            transfer.id,
            "77"
        )));
        drop(queue);

        worker.run().await;
        let stored = store.transfer(transfer.id).await.unwrap().unwrap();
        assert_eq!(stored.external_id.as_deref(), Some("77"));
    }
}

//! Balance Ledger
//!
//! Durable per-user, per-currency balances. The only mutation is
//! [`Ledger::apply_delta`], which runs inside the caller's [`UnitOfWork`] so
//! that a balance change commits atomically with its sibling write (invoice
//! settlement, transfer record, withdrawal record).
//!
//! # Invariants
//!
//! 1. A balance is never negative
//! 2. Concurrent deltas on the same (user, currency) serialize on the row lock:
//!    two debits of 6 against 10 cannot both succeed

use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::core_types::{Currency, UserId};
use crate::money;
use crate::store::{Store, StoreError, UnitOfWork};

/// Ledger errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Insufficient funds: available {available}, required {required}")]
    InsufficientFunds {
        available: Decimal,
        required: Decimal,
    },

    #[error("Balance out of range: {available} + {delta}")]
    Overflow { available: Decimal, delta: Decimal },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Balance ledger
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn Store>,
}

impl Ledger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Committed balance, zero when the user never held the currency
    pub async fn get_balance(
        &self,
        user_id: UserId,
        currency: &Currency,
    ) -> Result<Decimal, StoreError> {
        Ok(self
            .store
            .balance(user_id, currency)
            .await?
            .unwrap_or(Decimal::ZERO))
    }

    /// Apply `delta` to the balance inside `uow` and return the new amount
    ///
    /// Locks the row first; a missing row is treated as zero and created only
    /// for non-negative deltas.
    pub async fn apply_delta(
        uow: &mut dyn UnitOfWork,
        user_id: UserId,
        currency: &Currency,
        delta: Decimal,
    ) -> Result<Decimal, LedgerError> {
        let current = uow.lock_balance(user_id, currency).await?;
        let available = current.unwrap_or(Decimal::ZERO);
        let new_amount =
            money::checked_sum(available, delta).map_err(|_| LedgerError::Overflow {
                available,
                delta,
            })?;

        if new_amount.is_sign_negative() && !new_amount.is_zero() {
            return Err(LedgerError::InsufficientFunds {
                available,
                required: -delta,
            });
        }

        uow.write_balance(user_id, currency, new_amount).await?;
        debug!(
            user_id,
            currency = %currency,
            %delta,
            %new_amount,
            "Balance delta applied"
        );
        Ok(new_amount)
    }

    /// Apply a single delta in its own unit of work
    pub async fn adjust(
        &self,
        user_id: UserId,
        currency: &Currency,
        delta: Decimal,
    ) -> Result<Decimal, LedgerError> {
        let mut uow = self.store.begin().await?;
        let new_amount = Self::apply_delta(uow.as_mut(), user_id, currency, delta).await?;
        uow.commit().await?;
        Ok(new_amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use proptest::prelude::*;

    fn xrock() -> Currency {
        Currency::new("XROCK").unwrap()
    }

    fn ledger() -> Ledger {
        Ledger::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_absent_balance_reads_zero() {
        let ledger = ledger();
        assert_eq!(ledger.get_balance(1, &xrock()).await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_credit_creates_row() {
        let ledger = ledger();
        let new = ledger.adjust(1, &xrock(), Decimal::from(5)).await.unwrap();
        assert_eq!(new, Decimal::from(5));
        assert_eq!(ledger.get_balance(1, &xrock()).await.unwrap(), Decimal::from(5));
    }

    #[tokio::test]
    async fn test_debit_of_absent_row_fails() {
        let ledger = ledger();
        let err = ledger.adjust(1, &xrock(), Decimal::from(-1)).await.unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                available: Decimal::ZERO,
                required: Decimal::from(1),
            }
        );
    }

    #[tokio::test]
    async fn test_debit_to_exact_zero_succeeds() {
        let ledger = ledger();
        ledger.adjust(1, &xrock(), Decimal::from(5)).await.unwrap();
        let new = ledger.adjust(1, &xrock(), Decimal::from(-5)).await.unwrap();
        assert_eq!(new, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_failed_delta_leaves_balance_untouched() {
        let ledger = ledger();
        ledger.adjust(1, &xrock(), Decimal::from(5)).await.unwrap();
        assert!(ledger.adjust(1, &xrock(), Decimal::from(-6)).await.is_err());
        assert_eq!(ledger.get_balance(1, &xrock()).await.unwrap(), Decimal::from(5));
    }

    #[tokio::test]
    async fn test_credit_beyond_column_range_is_rejected() {
        let ledger = ledger();
        let widest = Decimal::from_i128_with_scale(10_i128.pow(28) - 1, 0);
        ledger.adjust(1, &xrock(), widest).await.unwrap();

        let err = ledger.adjust(1, &xrock(), Decimal::MAX).await.unwrap_err();
        assert!(matches!(err, LedgerError::Overflow { .. }));
        let err = ledger.adjust(1, &xrock(), Decimal::ONE).await.unwrap_err();
        assert!(matches!(err, LedgerError::Overflow { .. }));
        assert_eq!(ledger.get_balance(1, &xrock()).await.unwrap(), widest);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_two_concurrent_debits_of_six_against_ten() {
        let ledger = ledger();
        ledger.adjust(1, &xrock(), Decimal::from(10)).await.unwrap();

        let a = {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.adjust(1, &xrock(), Decimal::from(-6)).await })
        };
        let b = {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.adjust(1, &xrock(), Decimal::from(-6)).await })
        };
        let results = [a.await.unwrap(), b.await.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(ledger.get_balance(1, &xrock()).await.unwrap(), Decimal::from(4));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        /// Final balance equals start plus every delta that succeeded, and a
        /// delta fails only when it would have overdrawn.
        #[test]
        fn prop_concurrent_deltas_never_overdraw(
            start in 0i64..50,
            deltas in prop::collection::vec(-20i64..20, 1..32),
        ) {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(4)
                .enable_all()
                .build()
                .unwrap();

            let (final_balance, outcomes) = rt.block_on(async {
                let ledger = ledger();
                if start > 0 {
                    ledger.adjust(1, &xrock(), Decimal::from(start)).await.unwrap();
                }

                let handles: Vec<_> = deltas
                    .iter()
                    .map(|&d| {
                        let ledger = ledger.clone();
                        tokio::spawn(async move {
                            (d, ledger.adjust(1, &xrock(), Decimal::from(d)).await)
                        })
                    })
                    .collect();

                let outcomes: Vec<_> = futures::future::join_all(handles)
                    .await
                    .into_iter()
                    .map(|h| h.unwrap())
                    .collect();

                (ledger.get_balance(1, &xrock()).await.unwrap(), outcomes)
            });

            let mut applied = Decimal::from(start);
            for (delta, outcome) in &outcomes {
                match outcome {
                    Ok(new_amount) => {
                        prop_assert!(*new_amount >= Decimal::ZERO);
                        applied += Decimal::from(*delta);
                    }
                    Err(LedgerError::InsufficientFunds { available, required }) => {
                        prop_assert!(*delta < 0);
                        prop_assert!(available < required);
                    }
                    Err(other) => prop_assert!(false, "unexpected error {:?}", other),
                }
            }

            prop_assert_eq!(final_balance, applied);
            prop_assert!(final_balance >= Decimal::ZERO);
        }
    }
}

//! Transaction Coordinator
//!
//! Transfers and withdrawals run as a three-phase saga:
//!
//! ```text
//! Phase A  one unit of work: insert pending record + debit      (commit)
//! Phase B  payment network call, record id as idempotency key   (no unit of work open)
//! Phase C  one unit of work: record the external id             (commit, retried on failure)
//! ```
//!
//! # Compensation
//!
//! A Phase B failure leaves a committed debit with no movement behind it. The
//! debit is never reversed silently; [`CompensationPolicy`] decides what is
//! recorded:
//!
//! - `ManualReconciliation` keeps the debit and queues a `Pending` item
//! - `RefundOnFailure` credits the debit back and queues a `Refunded` item
//!
//! Default: `ManualReconciliation`. A timed-out call may still have executed remotely.

use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::error::FundingError;
use super::network::{NetworkError, PaymentNetwork};
use super::types::{
    RecordKind, ReconciliationItem, Resolution, Transfer, TransferRequest, Withdrawal,
    WithdrawalRequest,
};
use super::worker::{FinalizationQueue, PendingFinalization};
use crate::core_types::{Currency, RecordId, UserId};
use crate::ledger::{Ledger, LedgerError};
use crate::money::{self, MoneyError};
use crate::store::Store;
use crate::validation::{ValidationError, ValidationGate};

/// What happens to the Phase A debit when Phase B fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationPolicy {
    #[default]
    ManualReconciliation,
    RefundOnFailure,
}

/// Successful transfer
#[derive(Debug, Clone, PartialEq)]
pub struct TransferOutcome {
    /// Record with the external id filled in
    pub transfer: Transfer,
    /// False when Phase C failed and the external id is only queued for retry
    pub finalized: bool,
}

/// Successful withdrawal
#[derive(Debug, Clone, PartialEq)]
pub struct WithdrawalOutcome {
    pub withdrawal: Withdrawal,
    pub finalized: bool,
}

/// Debit left behind by a failed Phase B
struct FailedDebit<'a> {
    kind: RecordKind,
    record_id: RecordId,
    user_id: UserId,
    currency: &'a Currency,
    amount: Decimal,
}

/// Transaction Coordinator
pub struct TransactionCoordinator {
    store: Arc<dyn Store>,
    gate: ValidationGate,
    network: Arc<dyn PaymentNetwork>,
    policy: CompensationPolicy,
    finalizer: Option<FinalizationQueue>,
}

impl TransactionCoordinator {
    pub fn new(
        store: Arc<dyn Store>,
        gate: ValidationGate,
        network: Arc<dyn PaymentNetwork>,
    ) -> Self {
        Self {
            store,
            gate,
            network,
            policy: CompensationPolicy::default(),
            finalizer: None,
        }
    }

    pub fn with_policy(mut self, policy: CompensationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Hand failed finalizations to a [`FinalizationWorker`](super::worker::FinalizationWorker)
    pub fn with_finalizer(mut self, queue: FinalizationQueue) -> Self {
        self.finalizer = Some(queue);
        self
    }

    pub fn policy(&self) -> CompensationPolicy {
        self.policy
    }

    /// Move `amount` from the sender's balance to another user via the network
    pub async fn transfer(&self, req: TransferRequest) -> Result<TransferOutcome, FundingError> {
        ensure_positive(req.amount)?;
        self.gate
            .check_balance(req.sender_id, &req.currency, req.amount)
            .await?;

        // Phase A
        let mut transfer = Transfer::pending(&req);
        let mut uow = self.store.begin().await?;
        uow.insert_transfer(&transfer).await?;
        Ledger::apply_delta(uow.as_mut(), req.sender_id, &req.currency, -req.amount).await?;
        uow.commit().await?;

        info!(
            record_id = %transfer.id,
            sender_id = req.sender_id,
            recipient_id = req.recipient_id,
            currency = %req.currency,
            amount = %req.amount,
            "Transfer debited"
        );

        // Phase B
        let external_id = match self
            .network
            .create_transfer(req.amount, &req.currency, req.recipient_id, transfer.id)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                self.compensate(
                    FailedDebit {
                        kind: RecordKind::Transfer,
                        record_id: transfer.id,
                        user_id: req.sender_id,
                        currency: &req.currency,
                        amount: req.amount,
                    },
                    &e,
                )
                .await;
                return Err(FundingError::ExternalCallFailed(e));
            }
        };

        // Phase C
        let finalized = self
            .finalize(PendingFinalization::new(
                RecordKind::Transfer,
                transfer.id,
                external_id.clone(),
            ))
            .await;
        transfer.external_id = Some(external_id);

        Ok(TransferOutcome {
            transfer,
            finalized,
        })
    }

    /// Debit `amount + fee` and send `amount` to an on-chain address
    pub async fn withdraw(
        &self,
        req: WithdrawalRequest,
    ) -> Result<WithdrawalOutcome, FundingError> {
        ensure_positive(req.amount)?;
        self.gate.check_address(&req.address)?;
        self.gate
            .check_withdrawal_total(req.user_id, &req.currency, req.amount, req.fee)
            .await?;

        // Phase A
        let total = req.total().map_err(ValidationError::from)?;
        let mut withdrawal = Withdrawal::pending(&req);
        let mut uow = self.store.begin().await?;
        uow.insert_withdrawal(&withdrawal).await?;
        Ledger::apply_delta(uow.as_mut(), req.user_id, &req.currency, -total).await?;
        uow.commit().await?;

        info!(
            record_id = %withdrawal.id,
            user_id = req.user_id,
            currency = %req.currency,
            network = %req.network,
            amount = %req.amount,
            fee = %req.fee,
            "Withdrawal debited"
        );

        // Phase B
        let external_id = match self
            .network
            .create_withdrawal(
                req.amount,
                &req.currency,
                &req.network,
                &req.address,
                withdrawal.id,
            )
            .await
        {
            Ok(id) => id,
            Err(e) => {
                self.compensate(
                    FailedDebit {
                        kind: RecordKind::Withdrawal,
                        record_id: withdrawal.id,
                        user_id: req.user_id,
                        currency: &req.currency,
                        amount: total,
                    },
                    &e,
                )
                .await;
                return Err(FundingError::ExternalCallFailed(e));
            }
        };

        // Phase C
        let finalized = self
            .finalize(PendingFinalization::new(
                RecordKind::Withdrawal,
                withdrawal.id,
                external_id.clone(),
            ))
            .await;
        withdrawal.external_id = Some(external_id);

        Ok(WithdrawalOutcome {
            withdrawal,
            finalized,
        })
    }

    async fn finalize(&self, pending: PendingFinalization) -> bool {
        match pending.apply(self.store.as_ref()).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    record_id = %pending.record_id,
                    kind = %pending.kind,
                    external_id = %pending.external_id,
                    error = %e,
                    "Finalization failed after external success"
                );
                match &self.finalizer {
                    Some(queue) => {
                        queue.submit(pending);
                    }
                    None => error!(
                        record_id = %pending.record_id,
                        "No finalization worker configured, record needs manual update"
                    ),
                }
                false
            }
        }
    }

    async fn compensate(&self, debit: FailedDebit<'_>, cause: &NetworkError) {
        let resolution = match self.policy {
            CompensationPolicy::ManualReconciliation => Resolution::Pending,
            CompensationPolicy::RefundOnFailure => Resolution::Refunded,
        };
        let item = ReconciliationItem {
            record_id: debit.record_id,
            kind: debit.kind,
            user_id: debit.user_id,
            currency: debit.currency.clone(),
            amount: debit.amount,
            reason: cause.to_string(),
            resolution,
            created_at: chrono::Utc::now(),
        };

        match self.record_compensation(&item).await {
            Ok(()) => warn!(
                record_id = %item.record_id,
                kind = %item.kind,
                user_id = item.user_id,
                amount = %item.amount,
                resolution = ?item.resolution,
                error = %cause,
                "External call failed after debit"
            ),
            Err(e) => error!(
                record_id = %item.record_id,
                kind = %item.kind,
                user_id = item.user_id,
                amount = %item.amount,
                error = %e,
                cause = %cause,
                "CRITICAL: compensation could not be recorded"
            ),
        }
    }

    async fn record_compensation(&self, item: &ReconciliationItem) -> Result<(), LedgerError> {
        let mut uow = self.store.begin().await?;
        if item.resolution == Resolution::Refunded {
            Ledger::apply_delta(uow.as_mut(), item.user_id, &item.currency, item.amount).await?;
        }
        uow.enqueue_reconciliation(item).await?;
        uow.commit().await?;
        Ok(())
    }
}

fn ensure_positive(amount: Decimal) -> Result<(), FundingError> {
    if amount <= Decimal::ZERO {
        return Err(FundingError::ValidationFailed(
            ValidationError::InvalidAmount(MoneyError::NotPositive),
        ));
    }
    if !money::fits_column(amount) {
        return Err(FundingError::ValidationFailed(
            ValidationError::InvalidAmount(MoneyError::Overflow),
        ));
    }
    Ok(())
}

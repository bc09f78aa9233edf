//! Persistence boundary
//!
//! Every durable write in the crate goes through a [`UnitOfWork`]: a database
//! transaction that becomes visible atomically on [`UnitOfWork::commit`] and is
//! discarded when dropped. Reads that do not need to be consistent with a
//! sibling write go through [`Store`] directly.
//!
//! # Implementations
//!
//! - [`PgStore`] - PostgreSQL, row locks via `SELECT ... FOR UPDATE`
//! - [`MemoryStore`] - in-process, one exclusive lock per open unit of work
//!
//! # Invariants
//!
//! 1. `lock_balance` serializes concurrent callers on the same (user, currency)
//! 2. External ids are write-once: a different second value is a `Conflict`
//! 3. No unit of work is held open across a network call (caller contract)

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::core_types::{Currency, RecordId, UserId};
use crate::funding::types::{
    Invoice, InvoiceStatus, ReconciliationItem, Transfer, Withdrawal,
};

/// Persistence errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Conflicting write: {0}")]
    Conflict(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Database(_) => "DATABASE_ERROR",
            StoreError::NotFound(_) => "NOT_FOUND",
            StoreError::Conflict(_) => "CONFLICT",
            StoreError::Corrupt(_) => "CORRUPT_ROW",
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Shared write-once rule for external ids
pub(crate) fn check_external_id(
    record: &str,
    current: Option<&str>,
    proposed: &str,
) -> Result<bool, StoreError> {
    match current {
        None => Ok(true),
        Some(existing) if existing == proposed => Ok(false),
        Some(existing) => Err(StoreError::Conflict(format!(
            "{} already has external id {} (got {})",
            record, existing, proposed
        ))),
    }
}

/// Entry point to the backing store
#[async_trait]
pub trait Store: Send + Sync {
    /// Open a unit of work
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError>;

    /// Committed balance, `None` when the row was never created
    async fn balance(
        &self,
        user_id: UserId,
        currency: &Currency,
    ) -> Result<Option<Decimal>, StoreError>;

    async fn invoice(&self, id: RecordId) -> Result<Option<Invoice>, StoreError>;

    async fn transfer(&self, id: RecordId) -> Result<Option<Transfer>, StoreError>;

    async fn withdrawal(&self, id: RecordId) -> Result<Option<Withdrawal>, StoreError>;

    /// Active invoices with an external id, created before `created_before`, oldest first
    async fn stale_active_invoices(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Invoice>, StoreError>;

    /// Reconciliation queue, oldest first
    async fn reconciliation_items(&self) -> Result<Vec<ReconciliationItem>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

/// One atomic batch of reads-with-lock and writes
#[async_trait]
pub trait UnitOfWork: Send {
    /// Lock the balance row for the rest of this unit of work and return its amount
    ///
    /// `None` means no balance existed for the key.
    async fn lock_balance(
        &mut self,
        user_id: UserId,
        currency: &Currency,
    ) -> Result<Option<Decimal>, StoreError>;

    /// Overwrite (or create) the balance row locked by `lock_balance`
    async fn write_balance(
        &mut self,
        user_id: UserId,
        currency: &Currency,
        amount: Decimal,
    ) -> Result<(), StoreError>;

    async fn insert_invoice(&mut self, invoice: &Invoice) -> Result<(), StoreError>;

    /// Look up and lock an invoice by the network's invoice id
    async fn lock_invoice_by_external_id(
        &mut self,
        external_id: &str,
    ) -> Result<Option<Invoice>, StoreError>;

    async fn update_invoice_status(
        &mut self,
        id: RecordId,
        status: InvoiceStatus,
        amount: Decimal,
    ) -> Result<(), StoreError>;

    async fn set_invoice_external(
        &mut self,
        id: RecordId,
        external_id: &str,
        pay_url: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn insert_transfer(&mut self, transfer: &Transfer) -> Result<(), StoreError>;

    async fn set_transfer_external_id(
        &mut self,
        id: RecordId,
        external_id: &str,
    ) -> Result<(), StoreError>;

    async fn insert_withdrawal(&mut self, withdrawal: &Withdrawal) -> Result<(), StoreError>;

    async fn set_withdrawal_external_id(
        &mut self,
        id: RecordId,
        external_id: &str,
    ) -> Result<(), StoreError>;

    async fn enqueue_reconciliation(&mut self, item: &ReconciliationItem)
    -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

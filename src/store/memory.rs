//! In-memory store
//!
//! Used in dev mode (no `postgres_url`) and by tests. A unit of work takes the
//! single store lock and writes in place, recording the previous value of
//! every touched key. Commit forgets the log; dropping an uncommitted unit of
//! work replays it backwards, so a dropped one leaves no trace.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{Store, StoreError, UnitOfWork, check_external_id};
use crate::core_types::{Currency, RecordId, UserId};
use crate::funding::types::{
    Invoice, InvoiceStatus, ReconciliationItem, Transfer, Withdrawal,
};

#[derive(Debug, Default)]
struct MemoryState {
    balances: HashMap<(UserId, Currency), Decimal>,
    invoices: HashMap<RecordId, Invoice>,
    transfers: HashMap<RecordId, Transfer>,
    withdrawals: HashMap<RecordId, Withdrawal>,
    reconciliation: Vec<ReconciliationItem>,
}

/// Thread-safe in-memory [`Store`]
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        Ok(Box::new(MemoryUnitOfWork {
            staged: guard,
            undo: Vec::new(),
        }))
    }

    async fn balance(
        &self,
        user_id: UserId,
        currency: &Currency,
    ) -> Result<Option<Decimal>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.balances.get(&(user_id, currency.clone())).copied())
    }

    async fn invoice(&self, id: RecordId) -> Result<Option<Invoice>, StoreError> {
        Ok(self.state.lock().await.invoices.get(&id).cloned())
    }

    async fn transfer(&self, id: RecordId) -> Result<Option<Transfer>, StoreError> {
        Ok(self.state.lock().await.transfers.get(&id).cloned())
    }

    async fn withdrawal(&self, id: RecordId) -> Result<Option<Withdrawal>, StoreError> {
        Ok(self.state.lock().await.withdrawals.get(&id).cloned())
    }

    async fn stale_active_invoices(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Invoice>, StoreError> {
        let state = self.state.lock().await;
        let mut stale: Vec<Invoice> = state
            .invoices
            .values()
            .filter(|inv| {
                inv.status == InvoiceStatus::Active
                    && inv.external_id.is_some()
                    && inv.created_at < created_before
            })
            .cloned()
            .collect();
        stale.sort_by_key(|inv| inv.created_at);
        stale.truncate(limit);
        Ok(stale)
    }

    async fn reconciliation_items(&self) -> Result<Vec<ReconciliationItem>, StoreError> {
        Ok(self.state.lock().await.reconciliation.clone())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Previous value of one touched key
enum Undo {
    Balance((UserId, Currency), Option<Decimal>),
    Invoice(RecordId, Option<Invoice>),
    Transfer(RecordId, Option<Transfer>),
    Withdrawal(RecordId, Option<Withdrawal>),
    Reconciliation(usize),
}

struct MemoryUnitOfWork {
    staged: OwnedMutexGuard<MemoryState>,
    undo: Vec<Undo>,
}

impl MemoryUnitOfWork {
    fn touch_invoice(&mut self, id: RecordId) {
        let previous = self.staged.invoices.get(&id).cloned();
        self.undo.push(Undo::Invoice(id, previous));
    }

    fn touch_transfer(&mut self, id: RecordId) {
        let previous = self.staged.transfers.get(&id).cloned();
        self.undo.push(Undo::Transfer(id, previous));
    }

    fn touch_withdrawal(&mut self, id: RecordId) {
        let previous = self.staged.withdrawals.get(&id).cloned();
        self.undo.push(Undo::Withdrawal(id, previous));
    }
}

fn restore<K: std::hash::Hash + Eq, V>(map: &mut HashMap<K, V>, key: K, previous: Option<V>) {
    match previous {
        Some(value) => map.insert(key, value),
        None => map.remove(&key),
    };
}

impl Drop for MemoryUnitOfWork {
    fn drop(&mut self) {
        let state = &mut *self.staged;
        while let Some(entry) = self.undo.pop() {
            match entry {
                Undo::Balance(key, previous) => restore(&mut state.balances, key, previous),
                Undo::Invoice(id, previous) => restore(&mut state.invoices, id, previous),
                Undo::Transfer(id, previous) => restore(&mut state.transfers, id, previous),
                Undo::Withdrawal(id, previous) => restore(&mut state.withdrawals, id, previous),
                Undo::Reconciliation(len) => state.reconciliation.truncate(len),
            }
        }
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn lock_balance(
        &mut self,
        user_id: UserId,
        currency: &Currency,
    ) -> Result<Option<Decimal>, StoreError> {
        Ok(self
            .staged
            .balances
            .get(&(user_id, currency.clone()))
            .copied())
    }

    async fn write_balance(
        &mut self,
        user_id: UserId,
        currency: &Currency,
        amount: Decimal,
    ) -> Result<(), StoreError> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(StoreError::Conflict(format!(
                "negative balance {} for user {} {}",
                amount, user_id, currency
            )));
        }
        let key = (user_id, currency.clone());
        let previous = self.staged.balances.insert(key.clone(), amount);
        self.undo.push(Undo::Balance(key, previous));
        Ok(())
    }

    async fn insert_invoice(&mut self, invoice: &Invoice) -> Result<(), StoreError> {
        if self.staged.invoices.contains_key(&invoice.id) {
            return Err(StoreError::Conflict(format!("invoice {} exists", invoice.id)));
        }
        self.undo.push(Undo::Invoice(invoice.id, None));
        self.staged.invoices.insert(invoice.id, invoice.clone());
        Ok(())
    }

    async fn lock_invoice_by_external_id(
        &mut self,
        external_id: &str,
    ) -> Result<Option<Invoice>, StoreError> {
        Ok(self
            .staged
            .invoices
            .values()
            .find(|inv| inv.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn update_invoice_status(
        &mut self,
        id: RecordId,
        status: InvoiceStatus,
        amount: Decimal,
    ) -> Result<(), StoreError> {
        self.touch_invoice(id);
        let invoice = self
            .staged
            .invoices
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("invoice {}", id)))?;
        invoice.status = status;
        invoice.amount = amount;
        Ok(())
    }

    async fn set_invoice_external(
        &mut self,
        id: RecordId,
        external_id: &str,
        pay_url: Option<&str>,
    ) -> Result<(), StoreError> {
        let taken = self
            .staged
            .invoices
            .values()
            .any(|inv| inv.id != id && inv.external_id.as_deref() == Some(external_id));
        if taken {
            return Err(StoreError::Conflict(format!(
                "external invoice id {} already used",
                external_id
            )));
        }
        self.touch_invoice(id);
        let invoice = self
            .staged
            .invoices
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("invoice {}", id)))?;
        if check_external_id("invoice", invoice.external_id.as_deref(), external_id)? {
            invoice.external_id = Some(external_id.to_string());
            invoice.pay_url = pay_url.map(str::to_string);
        }
        Ok(())
    }

    async fn insert_transfer(&mut self, transfer: &Transfer) -> Result<(), StoreError> {
        self.touch_transfer(transfer.id);
        self.staged.transfers.insert(transfer.id, transfer.clone());
        Ok(())
    }

    async fn set_transfer_external_id(
        &mut self,
        id: RecordId,
        external_id: &str,
    ) -> Result<(), StoreError> {
        self.touch_transfer(id);
        let transfer = self
            .staged
            .transfers
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("transfer {}", id)))?;
        if check_external_id("transfer", transfer.external_id.as_deref(), external_id)? {
            transfer.external_id = Some(external_id.to_string());
        }
        Ok(())
    }

    async fn insert_withdrawal(&mut self, withdrawal: &Withdrawal) -> Result<(), StoreError> {
        self.touch_withdrawal(withdrawal.id);
        self.staged
            .withdrawals
            .insert(withdrawal.id, withdrawal.clone());
        Ok(())
    }

    async fn set_withdrawal_external_id(
        &mut self,
        id: RecordId,
        external_id: &str,
    ) -> Result<(), StoreError> {
        self.touch_withdrawal(id);
        let withdrawal = self
            .staged
            .withdrawals
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("withdrawal {}", id)))?;
        if check_external_id(
            "withdrawal",
            withdrawal.external_id.as_deref(),
            external_id,
        )? {
            withdrawal.external_id = Some(external_id.to_string());
        }
        Ok(())
    }

    async fn enqueue_reconciliation(
        &mut self,
        item: &ReconciliationItem,
    ) -> Result<(), StoreError> {
        self.undo
            .push(Undo::Reconciliation(self.staged.reconciliation.len()));
        self.staged.reconciliation.push(item.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut uow = self;
        uow.undo.clear();
        Ok(())
    }
}

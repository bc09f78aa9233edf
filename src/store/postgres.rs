//! PostgreSQL store
//!
//! Balance serialization relies on row locks (`SELECT ... FOR UPDATE`) under
//! the default READ COMMITTED isolation. Missing balance rows are created as a
//! zero placeholder before locking so that two first-time credits for the same
//! key block on the same row instead of racing on INSERT.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::str::FromStr;

use super::{Store, StoreError, UnitOfWork, check_external_id};
use crate::core_types::{Currency, RecordId, UserId};
use crate::funding::types::{
    Invoice, InvoiceStatus, RecordKind, ReconciliationItem, Resolution, Transfer, Withdrawal,
    WithdrawalStatus,
};

const INVOICE_COLUMNS: &str =
    "id, user_id, external_id, amount, currency, pay_url, status, created_at";

const TRANSFER_COLUMNS: &str =
    "id, sender_id, recipient_id, amount, currency, external_id, created_at";

const WITHDRAWAL_COLUMNS: &str = "id, user_id, amount, fee, net_amount, currency, network, \
     address, external_id, status, tx_hash, tx_link, error_text, created_at";

/// PostgreSQL-backed [`Store`]
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn parse_id(raw: &str) -> Result<RecordId, StoreError> {
    RecordId::from_str(raw).map_err(|e| StoreError::Corrupt(format!("record id {}: {}", raw, e)))
}

fn parse_currency(raw: &str) -> Result<Currency, StoreError> {
    Currency::new(raw).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn row_to_invoice(row: &PgRow) -> Result<Invoice, StoreError> {
    let status_id: i16 = row.try_get("status")?;
    Ok(Invoice {
        id: parse_id(row.try_get("id")?)?,
        user_id: row.try_get("user_id")?,
        external_id: row.try_get("external_id")?,
        amount: row.try_get("amount")?,
        currency: parse_currency(row.try_get("currency")?)?,
        pay_url: row.try_get("pay_url")?,
        status: InvoiceStatus::from_id(status_id)
            .ok_or_else(|| StoreError::Corrupt(format!("invoice status {}", status_id)))?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_transfer(row: &PgRow) -> Result<Transfer, StoreError> {
    Ok(Transfer {
        id: parse_id(row.try_get("id")?)?,
        sender_id: row.try_get("sender_id")?,
        recipient_id: row.try_get("recipient_id")?,
        amount: row.try_get("amount")?,
        currency: parse_currency(row.try_get("currency")?)?,
        external_id: row.try_get("external_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_withdrawal(row: &PgRow) -> Result<Withdrawal, StoreError> {
    let status_id: i16 = row.try_get("status")?;
    Ok(Withdrawal {
        id: parse_id(row.try_get("id")?)?,
        user_id: row.try_get("user_id")?,
        amount: row.try_get("amount")?,
        fee: row.try_get("fee")?,
        net_amount: row.try_get("net_amount")?,
        currency: parse_currency(row.try_get("currency")?)?,
        network: row.try_get("network")?,
        address: row.try_get("address")?,
        external_id: row.try_get("external_id")?,
        status: WithdrawalStatus::from_id(status_id)
            .ok_or_else(|| StoreError::Corrupt(format!("withdrawal status {}", status_id)))?,
        tx_hash: row.try_get("tx_hash")?,
        tx_link: row.try_get("tx_link")?,
        error_text: row.try_get("error_text")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_reconciliation(row: &PgRow) -> Result<ReconciliationItem, StoreError> {
    let kind_id: i16 = row.try_get("kind")?;
    let resolution_id: i16 = row.try_get("resolution")?;
    Ok(ReconciliationItem {
        record_id: parse_id(row.try_get("record_id")?)?,
        kind: RecordKind::from_id(kind_id)
            .ok_or_else(|| StoreError::Corrupt(format!("record kind {}", kind_id)))?,
        user_id: row.try_get("user_id")?,
        currency: parse_currency(row.try_get("currency")?)?,
        amount: row.try_get("amount")?,
        reason: row.try_get("reason")?,
        resolution: Resolution::from_id(resolution_id)
            .ok_or_else(|| StoreError::Corrupt(format!("resolution {}", resolution_id)))?,
        created_at: row.try_get("created_at")?,
    })
}

// ============================================================================
// Store
// ============================================================================

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn balance(
        &self,
        user_id: UserId,
        currency: &Currency,
    ) -> Result<Option<Decimal>, StoreError> {
        let amount = sqlx::query_scalar::<_, Decimal>(
            "SELECT amount FROM balances WHERE user_id = $1 AND currency = $2",
        )
        .bind(user_id)
        .bind(currency.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(amount)
    }

    async fn invoice(&self, id: RecordId) -> Result<Option<Invoice>, StoreError> {
        let sql = format!("SELECT {} FROM invoices WHERE id = $1", INVOICE_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_invoice).transpose()
    }

    async fn transfer(&self, id: RecordId) -> Result<Option<Transfer>, StoreError> {
        let sql = format!("SELECT {} FROM transfers WHERE id = $1", TRANSFER_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_transfer).transpose()
    }

    async fn withdrawal(&self, id: RecordId) -> Result<Option<Withdrawal>, StoreError> {
        let sql = format!(
            "SELECT {} FROM withdrawals WHERE id = $1",
            WITHDRAWAL_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_withdrawal).transpose()
    }

    async fn stale_active_invoices(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Invoice>, StoreError> {
        let sql = format!(
            "SELECT {} FROM invoices \
             WHERE status = $1 AND external_id IS NOT NULL AND created_at < $2 \
             ORDER BY created_at LIMIT $3",
            INVOICE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(InvoiceStatus::Active.id())
            .bind(created_before)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_invoice).collect()
    }

    async fn reconciliation_items(&self) -> Result<Vec<ReconciliationItem>, StoreError> {
        let rows = sqlx::query(
            "SELECT record_id, kind, user_id, currency, amount, reason, resolution, created_at \
             FROM reconciliation_queue ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_reconciliation).collect()
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// ============================================================================
// Unit of work
// ============================================================================

struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

impl PgUnitOfWork {
    async fn current_external_id(
        &mut self,
        table: &'static str,
        id: RecordId,
    ) -> Result<Option<String>, StoreError> {
        let sql = format!("SELECT external_id FROM {} WHERE id = $1 FOR UPDATE", table);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("{} {}", table, id)))?;
        Ok(row.try_get("external_id")?)
    }

    async fn set_external_id(
        &mut self,
        table: &'static str,
        id: RecordId,
        external_id: &str,
    ) -> Result<(), StoreError> {
        let current = self.current_external_id(table, id).await?;
        if !check_external_id(table, current.as_deref(), external_id)? {
            return Ok(());
        }
        let sql = format!(
            "UPDATE {} SET external_id = $1, updated_at = NOW() \
             WHERE id = $2 AND external_id IS NULL",
            table
        );
        sqlx::query(&sql)
            .bind(external_id)
            .bind(id.to_string())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn lock_balance(
        &mut self,
        user_id: UserId,
        currency: &Currency,
    ) -> Result<Option<Decimal>, StoreError> {
        let lock_sql = "SELECT amount FROM balances WHERE user_id = $1 AND currency = $2 FOR UPDATE";

        let locked = sqlx::query_scalar::<_, Decimal>(lock_sql)
            .bind(user_id)
            .bind(currency.as_str())
            .fetch_optional(&mut *self.tx)
            .await?;
        if locked.is_some() {
            return Ok(locked);
        }

        // Placeholder row; rolled back together with the unit of work if unused
        let inserted = sqlx::query(
            "INSERT INTO balances (user_id, currency, amount) VALUES ($1, $2, 0) \
             ON CONFLICT (user_id, currency) DO NOTHING",
        )
        .bind(user_id)
        .bind(currency.as_str())
        .execute(&mut *self.tx)
        .await?
        .rows_affected();

        let amount = sqlx::query_scalar::<_, Decimal>(lock_sql)
            .bind(user_id)
            .bind(currency.as_str())
            .fetch_one(&mut *self.tx)
            .await?;

        Ok(if inserted == 1 { None } else { Some(amount) })
    }

    async fn write_balance(
        &mut self,
        user_id: UserId,
        currency: &Currency,
        amount: Decimal,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO balances (user_id, currency, amount) VALUES ($1, $2, $3) \
             ON CONFLICT (user_id, currency) \
             DO UPDATE SET amount = EXCLUDED.amount, updated_at = NOW()",
        )
        .bind(user_id)
        .bind(currency.as_str())
        .bind(amount)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_invoice(&mut self, invoice: &Invoice) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO invoices (id, user_id, external_id, amount, currency, pay_url, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(invoice.id.to_string())
        .bind(invoice.user_id)
        .bind(&invoice.external_id)
        .bind(invoice.amount)
        .bind(invoice.currency.as_str())
        .bind(&invoice.pay_url)
        .bind(invoice.status.id())
        .bind(invoice.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn lock_invoice_by_external_id(
        &mut self,
        external_id: &str,
    ) -> Result<Option<Invoice>, StoreError> {
        let sql = format!(
            "SELECT {} FROM invoices WHERE external_id = $1 FOR UPDATE",
            INVOICE_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(external_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(row_to_invoice).transpose()
    }

    async fn update_invoice_status(
        &mut self,
        id: RecordId,
        status: InvoiceStatus,
        amount: Decimal,
    ) -> Result<(), StoreError> {
        let affected = sqlx::query(
            "UPDATE invoices SET status = $1, amount = $2, updated_at = NOW() WHERE id = $3",
        )
        .bind(status.id())
        .bind(amount)
        .bind(id.to_string())
        .execute(&mut *self.tx)
        .await?
        .rows_affected();
        if affected == 0 {
            return Err(StoreError::NotFound(format!("invoice {}", id)));
        }
        Ok(())
    }

    async fn set_invoice_external(
        &mut self,
        id: RecordId,
        external_id: &str,
        pay_url: Option<&str>,
    ) -> Result<(), StoreError> {
        let current = self.current_external_id("invoices", id).await?;
        if !check_external_id("invoice", current.as_deref(), external_id)? {
            return Ok(());
        }
        sqlx::query(
            "UPDATE invoices SET external_id = $1, pay_url = $2, updated_at = NOW() \
             WHERE id = $3 AND external_id IS NULL",
        )
        .bind(external_id)
        .bind(pay_url)
        .bind(id.to_string())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_transfer(&mut self, transfer: &Transfer) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO transfers (id, sender_id, recipient_id, amount, currency, external_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(transfer.id.to_string())
        .bind(transfer.sender_id)
        .bind(transfer.recipient_id)
        .bind(transfer.amount)
        .bind(transfer.currency.as_str())
        .bind(&transfer.external_id)
        .bind(transfer.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn set_transfer_external_id(
        &mut self,
        id: RecordId,
        external_id: &str,
    ) -> Result<(), StoreError> {
        self.set_external_id("transfers", id, external_id).await
    }

    async fn insert_withdrawal(&mut self, withdrawal: &Withdrawal) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO withdrawals (id, user_id, amount, fee, net_amount, currency, network, address, \
             external_id, status, tx_hash, tx_link, error_text, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(withdrawal.id.to_string())
        .bind(withdrawal.user_id)
        .bind(withdrawal.amount)
        .bind(withdrawal.fee)
        .bind(withdrawal.net_amount)
        .bind(withdrawal.currency.as_str())
        .bind(&withdrawal.network)
        .bind(&withdrawal.address)
        .bind(&withdrawal.external_id)
        .bind(withdrawal.status.id())
        .bind(&withdrawal.tx_hash)
        .bind(&withdrawal.tx_link)
        .bind(&withdrawal.error_text)
        .bind(withdrawal.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn set_withdrawal_external_id(
        &mut self,
        id: RecordId,
        external_id: &str,
    ) -> Result<(), StoreError> {
        self.set_external_id("withdrawals", id, external_id).await
    }

    async fn enqueue_reconciliation(
        &mut self,
        item: &ReconciliationItem,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO reconciliation_queue (record_id, kind, user_id, currency, amount, reason, resolution, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(item.record_id.to_string())
        .bind(item.kind.id())
        .bind(item.user_id)
        .bind(item.currency.as_str())
        .bind(item.amount)
        .bind(&item.reason)
        .bind(item.resolution.id())
        .bind(item.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let PgUnitOfWork { tx } = *self;
        tx.commit().await?;
        Ok(())
    }
}

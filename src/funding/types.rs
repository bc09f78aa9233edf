//! Funding record types
//!
//! Immutable value records for invoices, transfers, withdrawals and the
//! manual reconciliation queue. Persistence lives behind [`crate::store`];
//! nothing here talks to a database.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

use crate::core_types::{Currency, RecordId, UserId};
use crate::money::{self, MoneyError};

// ============================================================================
// Invoice
// ============================================================================

/// Invoice lifecycle
///
/// Monotonic: `Active → Paid` or `Active → Expired`, both terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum InvoiceStatus {
    Active = 0,
    Paid = 1,
    Expired = 2,
}

impl InvoiceStatus {
    /// Numeric id for PostgreSQL storage
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(InvoiceStatus::Active),
            1 => Some(InvoiceStatus::Paid),
            2 => Some(InvoiceStatus::Expired),
            _ => None,
        }
    }

    /// Parse the status string used by the payment network
    pub fn from_network(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Some(InvoiceStatus::Active),
            "paid" => Some(InvoiceStatus::Paid),
            "expired" => Some(InvoiceStatus::Expired),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Active => "active",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deposit invoice
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invoice {
    pub id: RecordId,
    pub user_id: UserId,
    /// Assigned once, after the network created the invoice
    pub external_id: Option<String>,
    pub amount: Decimal,
    pub currency: Currency,
    pub pay_url: Option<String>,
    pub status: InvoiceStatus,
    pub created_at: DateTime<Utc>,
}

impl Invoice {
    /// New active invoice without external id
    pub fn new(user_id: UserId, currency: Currency, amount: Decimal) -> Self {
        Self {
            id: RecordId::new(),
            user_id,
            external_id: None,
            amount,
            currency,
            pay_url: None,
            status: InvoiceStatus::Active,
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// Transfer
// ============================================================================

/// Transfer to another chat user through the payment network
///
/// No status field: once Phase A commits the debit is durable, and the
/// external id is the only thing Phase C adds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transfer {
    pub id: RecordId,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub amount: Decimal,
    pub currency: Currency,
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Validated transfer parameters handed to the coordinator
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub currency: Currency,
    pub amount: Decimal,
}

impl Transfer {
    pub fn pending(req: &TransferRequest) -> Self {
        Self {
            id: RecordId::new(),
            sender_id: req.sender_id,
            recipient_id: req.recipient_id,
            amount: req.amount,
            currency: req.currency.clone(),
            external_id: None,
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// Withdrawal
// ============================================================================

/// Withdrawal lifecycle
///
/// `Created` is the only status written locally; `Completed`/`Fail` come from
/// reconciling with the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
#[repr(i16)]
pub enum WithdrawalStatus {
    Created = 0,
    Completed = 1,
    Fail = -1,
}

impl WithdrawalStatus {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(WithdrawalStatus::Created),
            1 => Some(WithdrawalStatus::Completed),
            -1 => Some(WithdrawalStatus::Fail),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Created => "CREATED",
            WithdrawalStatus::Completed => "COMPLETED",
            WithdrawalStatus::Fail => "FAIL",
        }
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Withdrawal to an on-chain address
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Withdrawal {
    pub id: RecordId,
    pub user_id: UserId,
    pub amount: Decimal,
    pub fee: Decimal,
    /// `amount - fee`, what arrives at the destination
    pub net_amount: Decimal,
    pub currency: Currency,
    pub network: String,
    pub address: String,
    pub external_id: Option<String>,
    pub status: WithdrawalStatus,
    pub tx_hash: Option<String>,
    pub tx_link: Option<String>,
    pub error_text: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Validated withdrawal parameters handed to the coordinator
#[derive(Debug, Clone, PartialEq)]
pub struct WithdrawalRequest {
    pub user_id: UserId,
    pub currency: Currency,
    pub network: String,
    pub address: String,
    pub amount: Decimal,
    pub fee: Decimal,
}

impl WithdrawalRequest {
    /// Amount debited from the ledger: `amount + fee`
    #[inline]
    pub fn total(&self) -> Result<Decimal, MoneyError> {
        money::checked_sum(self.amount, self.fee)
    }
}

impl Withdrawal {
    pub fn pending(req: &WithdrawalRequest) -> Self {
        Self {
            id: RecordId::new(),
            user_id: req.user_id,
            amount: req.amount,
            fee: req.fee,
            net_amount: req.amount - req.fee,
            currency: req.currency.clone(),
            network: req.network.clone(),
            address: req.address.clone(),
            external_id: None,
            status: WithdrawalStatus::Created,
            tx_hash: None,
            tx_link: None,
            error_text: None,
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// Reconciliation queue
// ============================================================================

/// Which record a reconciliation item refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum RecordKind {
    Transfer = 1,
    Withdrawal = 2,
}

impl RecordKind {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(RecordKind::Transfer),
            2 => Some(RecordKind::Withdrawal),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Transfer => "transfer",
            RecordKind::Withdrawal => "withdrawal",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to the debit of a failed external call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum Resolution {
    /// Debit retained, waiting for an operator
    Pending = 0,
    /// Debit credited back automatically
    Refunded = 1,
}

impl Resolution {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(Resolution::Pending),
            1 => Some(Resolution::Refunded),
            _ => None,
        }
    }
}

/// Entry of the manual reconciliation queue
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationItem {
    pub record_id: RecordId,
    pub kind: RecordKind,
    pub user_id: UserId,
    pub currency: Currency,
    /// Amount that Phase A debited
    pub amount: Decimal,
    pub reason: String,
    pub resolution: Resolution,
    pub created_at: DateTime<Utc>,
}

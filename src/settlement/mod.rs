//! Deposit settlement
//!
//! - [`signature`] - HMAC check of webhook bodies
//! - [`event`] - webhook payload parsing
//! - [`service`] - exactly-once application to the ledger
//! - [`reconciler`] - polls invoices whose webhook never arrived

pub mod event;
pub mod reconciler;
pub mod service;
pub mod signature;

pub use event::SettlementEvent;
pub use reconciler::{InvoiceReconciler, ReconcileReport, ReconcilerConfig};
pub use service::{SettlementError, SettlementOutcome, SettlementService};
pub use signature::{SIGNATURE_HEADER, sign, verify_signature};

//! chatpay - custodial chat wallet core
//!
//! Moves value between a per-user balance ledger and an external payment
//! network on behalf of chat users.
//!
//! # Modules
//!
//! - [`core_types`] - identities, currency codes, record ids
//! - [`money`] - amount parsing and formatting
//! - [`store`] - persistence boundary (PostgreSQL or in-memory)
//! - [`ledger`] - per-user, per-currency balances
//! - [`validation`] - amount, balance, address and state checks
//! - [`funding`] - deposits, three-phase transfers and withdrawals
//! - [`settlement`] - exactly-once webhook settlement and invoice reconciliation
//! - [`conversation`] - step-based chat flows
//! - [`transport`] - outgoing chat messages
//! - [`gateway`] - HTTP entry points

// Core types - must be first!
pub mod core_types;
pub mod money;

// Persistence
pub mod db;
pub mod store;

// Wallet core
pub mod funding;
pub mod ledger;
pub mod settlement;
pub mod validation;

// Chat side
pub mod conversation;
pub mod transport;

// Service plumbing
pub mod config;
pub mod gateway;
pub mod logging;

#[cfg(test)]
pub(crate) mod testing;

// Convenient re-exports at crate root
pub use core_types::{ChatId, Currency, RecordId, UserId};
pub use funding::{CompensationPolicy, DepositService, FundingError, TransactionCoordinator};
pub use ledger::{Ledger, LedgerError};
pub use settlement::{SettlementError, SettlementOutcome, SettlementService};
pub use store::{MemoryStore, PgStore, Store, StoreError, UnitOfWork};
pub use validation::{ValidationError, ValidationGate};

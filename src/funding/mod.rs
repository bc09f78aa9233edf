//! Funding: deposits, transfers and withdrawals
//!
//! - [`deposit`] - invoice creation, credit happens on settlement
//! - [`coordinator`] - three-phase debit / network call / finalize saga
//! - [`worker`] - retries failed finalizations
//! - [`network`] - the external payment provider boundary

pub mod coordinator;
pub mod deposit;
pub mod error;
pub mod network;
pub mod types;
pub mod worker;

pub use coordinator::{
    CompensationPolicy, TransactionCoordinator, TransferOutcome, WithdrawalOutcome,
};
pub use deposit::DepositService;
pub use error::FundingError;
pub use network::{CreatedInvoice, CryptoPayClient, NetworkError, NetworkFee, PaymentNetwork};
pub use worker::{FinalizationConfig, FinalizationQueue, FinalizationWorker, PendingFinalization};

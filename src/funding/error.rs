use thiserror::Error;

use crate::funding::network::NetworkError;
use crate::ledger::LedgerError;
use crate::money::MoneyError;
use crate::store::StoreError;
use crate::validation::ValidationError;

/// Errors of deposits, transfers and withdrawals
///
/// A failed finalization (Phase C) is not an error: the outcome reports
/// `finalized: false` and the retry is queued.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FundingError {
    /// Rejected before anything was written
    #[error("Validation failed: {0}")]
    ValidationFailed(ValidationError),

    /// The payment network call failed after the local record was committed
    #[error("External call failed: {0}")]
    ExternalCallFailed(#[from] NetworkError),

    #[error("Persistence failed: {0}")]
    Persistence(#[from] StoreError),
}

impl FundingError {
    pub fn code(&self) -> &'static str {
        match self {
            FundingError::ValidationFailed(e) => e.code(),
            FundingError::ExternalCallFailed(_) => "EXTERNAL_CALL_FAILED",
            FundingError::Persistence(_) => "PERSISTENCE_ERROR",
        }
    }
}

impl From<ValidationError> for FundingError {
    fn from(e: ValidationError) -> Self {
        match e {
            ValidationError::Store(e) => FundingError::Persistence(e),
            other => FundingError::ValidationFailed(other),
        }
    }
}

/// A debit that lost the race for the balance row surfaces as a validation failure
impl From<LedgerError> for FundingError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientFunds {
                available,
                required,
            } => FundingError::ValidationFailed(ValidationError::InsufficientBalance {
                available,
                required,
            }),
            LedgerError::Overflow { .. } => {
                FundingError::ValidationFailed(ValidationError::InvalidAmount(MoneyError::Overflow))
            }
            LedgerError::Store(e) => FundingError::Persistence(e),
        }
    }
}

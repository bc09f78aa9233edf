//! Validation gate
//!
//! Read-only checks run before any debit. Every failure is a
//! [`ValidationError`] with a human-readable `Display` and a stable `code()`.

use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

use crate::conversation::state::{ConversationState, Field};
use crate::core_types::{Currency, UserId};
use crate::ledger::Ledger;
use crate::money::{self, MoneyError};
use crate::store::StoreError;

/// Validation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(#[from] MoneyError),

    #[error("Insufficient balance: available {available}, required {required}")]
    InsufficientBalance {
        available: Decimal,
        required: Decimal,
    },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Conversation is missing {0}")]
    MissingState(Field),

    #[error("Balance lookup failed: {0}")]
    Store(#[from] StoreError),
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::InvalidAmount(_) => "INVALID_AMOUNT",
            ValidationError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            ValidationError::InvalidAddress(_) => "INVALID_ADDRESS",
            ValidationError::InvalidRecipient(_) => "INVALID_RECIPIENT",
            ValidationError::MissingState(_) => "MISSING_STATE",
            ValidationError::Store(_) => "PERSISTENCE_ERROR",
        }
    }
}

/// Shape limits for destination addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct AddressRules {
    pub min_len: usize,
    pub max_len: usize,
}

impl Default for AddressRules {
    fn default() -> Self {
        Self {
            min_len: 10,
            max_len: 128,
        }
    }
}

/// Stateless validation gate
#[derive(Clone)]
pub struct ValidationGate {
    ledger: Ledger,
    address: AddressRules,
}

impl ValidationGate {
    pub fn new(ledger: Ledger, address: AddressRules) -> Self {
        Self { ledger, address }
    }

    /// Positive amount with at most 8 fractional digits
    pub fn parse_amount(&self, text: &str) -> Result<Decimal, ValidationError> {
        Ok(money::parse_amount(text)?)
    }

    pub async fn check_balance(
        &self,
        user_id: UserId,
        currency: &Currency,
        required: Decimal,
    ) -> Result<(), ValidationError> {
        let available = self.ledger.get_balance(user_id, currency).await?;
        if available < required {
            return Err(ValidationError::InsufficientBalance {
                available,
                required,
            });
        }
        Ok(())
    }

    /// Balance must cover `amount + fee`; exact equality passes
    pub async fn check_withdrawal_total(
        &self,
        user_id: UserId,
        currency: &Currency,
        amount: Decimal,
        fee: Decimal,
    ) -> Result<(), ValidationError> {
        let required = money::checked_sum(amount, fee)?;
        self.check_balance(user_id, currency, required).await
    }

    /// Length and character-set check only; network-specific checksums are
    /// the payment network's business.
    pub fn check_address<'a>(&self, text: &'a str) -> Result<&'a str, ValidationError> {
        let address = text.trim();
        let len = address.chars().count();

        if len < self.address.min_len || len > self.address.max_len {
            return Err(ValidationError::InvalidAddress(format!(
                "expected {}-{} characters, got {}",
                self.address.min_len, self.address.max_len, len
            )));
        }

        if let Some(bad) = address
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':')))
        {
            return Err(ValidationError::InvalidAddress(format!(
                "unexpected character '{}'",
                bad
            )));
        }

        Ok(address)
    }

    /// Every field in `required` must have been captured
    pub fn check_conversation_fields(
        &self,
        state: &ConversationState,
        required: &[Field],
    ) -> Result<(), ValidationError> {
        match required.iter().find(|f| !state.fields.has(**f)) {
            Some(missing) => Err(ValidationError::MissingState(*missing)),
            None => Ok(()),
        }
    }

    /// Recipient chat identity: a positive integer
    pub fn parse_recipient(&self, text: &str) -> Result<UserId, ValidationError> {
        let text = text.trim();
        match text.parse::<UserId>() {
            Ok(id) if id > 0 => Ok(id),
            _ => Err(ValidationError::InvalidRecipient(format!(
                "'{}' is not a user id",
                text
            ))),
        }
    }
}

//! Core types used throughout the system
//!
//! Identity aliases, the validated [`Currency`] code and the ULID-based
//! [`RecordId`] shared by invoices, transfers and withdrawals.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// User ID - the stable external chat identity of a wallet owner.
///
/// A user record is pre-existing; nothing in this crate allocates user ids.
pub type UserId = i64;

/// Chat ID - key of the per-chat conversation state.
///
/// For private chats this equals the [`UserId`] of the person talking to the bot.
pub type ChatId = i64;

/// Maximum number of fractional digits carried by any amount.
pub const AMOUNT_SCALE: u32 = 8;

// ============================================================================
// Currency
// ============================================================================

/// Currency validation error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CurrencyError {
    #[error("Invalid length for currency: expected 1-16, got {0}")]
    InvalidLength(usize),

    #[error("Invalid currency code '{0}' (expected: uppercase letters, numbers, underscore only)")]
    InvalidFormat(String),
}

/// Validated currency code (e.g. `USDT`, `TON`, `XROCK`)
///
/// Input is trimmed and upper-cased before validation, so `"ton"` and `"TON"`
/// name the same balance. Fields are private to force validation through `new()`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn new(code: &str) -> Result<Self, CurrencyError> {
        let code = code.trim().to_uppercase();

        if code.is_empty() || code.len() > 16 {
            return Err(CurrencyError::InvalidLength(code.len()));
        }

        if !code
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(CurrencyError::InvalidFormat(code));
        }

        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Currency {
    type Err = CurrencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Currency {
    type Error = CurrencyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.0
    }
}

// ============================================================================
// RecordId
// ============================================================================

/// Local record id - ULID-based unique identifier
///
/// Used as primary key for invoices, transfers and withdrawals, and passed to
/// the payment network as the idempotency key of the external call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecordId(ulid::Ulid);

impl RecordId {
    /// Generate a new unique RecordId
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

impl TryFrom<String> for RecordId {
    type Error = ulid::DecodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RecordId> for String {
    fn from(value: RecordId) -> Self {
        value.to_string()
    }
}

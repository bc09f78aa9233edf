//! Per-chat conversation state
//!
//! A [`ConversationState`] is a plain value keyed by chat id. It is created on
//! flow entry, advanced one step per accepted input and dropped on success or
//! on a terminal error.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core_types::{ChatId, Currency, UserId};

/// Money-moving flow a conversation collects parameters for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flow {
    Deposit,
    Transfer,
    Withdraw,
}

impl Flow {
    /// Step a fresh entry into this flow starts at
    pub fn first_step(&self) -> Step {
        match self {
            Flow::Deposit => Step::DepositCurrency,
            Flow::Transfer => Step::TransferCurrency,
            Flow::Withdraw => Step::WithdrawCurrency,
        }
    }

    /// Fields that must be captured before the flow may execute
    pub fn required_fields(&self) -> &'static [Field] {
        match self {
            Flow::Deposit => &[Field::Currency, Field::Amount],
            Flow::Transfer => &[Field::Currency, Field::Amount, Field::Recipient],
            Flow::Withdraw => &[
                Field::Currency,
                Field::Network,
                Field::Fee,
                Field::Amount,
                Field::Address,
            ],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Flow::Deposit => "deposit",
            Flow::Transfer => "transfer",
            Flow::Withdraw => "withdraw",
        }
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of input a step consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    CurrencyChoice,
    NetworkChoice,
    Text,
    Confirmation,
}

/// Position inside a flow
///
/// ```text
/// Deposit:  DepositCurrency → DepositAmount → (create invoice)
/// Transfer: TransferCurrency → TransferAmount → TransferRecipient → TransferConfirm → (execute)
/// Withdraw: WithdrawCurrency → WithdrawNetwork → WithdrawAmount → WithdrawAddress
///           → WithdrawConfirm → (execute)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    DepositCurrency,
    DepositAmount,
    TransferCurrency,
    TransferAmount,
    TransferRecipient,
    TransferConfirm,
    WithdrawCurrency,
    WithdrawNetwork,
    WithdrawAmount,
    WithdrawAddress,
    WithdrawConfirm,
}

impl Step {
    pub fn flow(&self) -> Flow {
        match self {
            Step::DepositCurrency | Step::DepositAmount => Flow::Deposit,
            Step::TransferCurrency
            | Step::TransferAmount
            | Step::TransferRecipient
            | Step::TransferConfirm => Flow::Transfer,
            Step::WithdrawCurrency
            | Step::WithdrawNetwork
            | Step::WithdrawAmount
            | Step::WithdrawAddress
            | Step::WithdrawConfirm => Flow::Withdraw,
        }
    }

    /// Following step, `None` for the terminal step of a flow
    pub fn next(&self) -> Option<Step> {
        match self {
            Step::DepositCurrency => Some(Step::DepositAmount),
            Step::DepositAmount => None,
            Step::TransferCurrency => Some(Step::TransferAmount),
            Step::TransferAmount => Some(Step::TransferRecipient),
            Step::TransferRecipient => Some(Step::TransferConfirm),
            Step::TransferConfirm => None,
            Step::WithdrawCurrency => Some(Step::WithdrawNetwork),
            Step::WithdrawNetwork => Some(Step::WithdrawAmount),
            Step::WithdrawAmount => Some(Step::WithdrawAddress),
            Step::WithdrawAddress => Some(Step::WithdrawConfirm),
            Step::WithdrawConfirm => None,
        }
    }

    pub fn expects(&self) -> Expect {
        match self {
            Step::DepositCurrency | Step::TransferCurrency | Step::WithdrawCurrency => {
                Expect::CurrencyChoice
            }
            Step::WithdrawNetwork => Expect::NetworkChoice,
            Step::DepositAmount
            | Step::TransferAmount
            | Step::TransferRecipient
            | Step::WithdrawAmount
            | Step::WithdrawAddress => Expect::Text,
            Step::TransferConfirm | Step::WithdrawConfirm => Expect::Confirmation,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Step::DepositCurrency => "deposit_currency",
            Step::DepositAmount => "deposit_amount",
            Step::TransferCurrency => "transfer_currency",
            Step::TransferAmount => "transfer_amount",
            Step::TransferRecipient => "transfer_recipient",
            Step::TransferConfirm => "transfer_confirm",
            Step::WithdrawCurrency => "withdraw_currency",
            Step::WithdrawNetwork => "withdraw_network",
            Step::WithdrawAmount => "withdraw_amount",
            Step::WithdrawAddress => "withdraw_address",
            Step::WithdrawConfirm => "withdraw_confirm",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named conversation field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Currency,
    Amount,
    Recipient,
    Network,
    Address,
    Fee,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Currency => "currency",
            Field::Amount => "amount",
            Field::Recipient => "recipient",
            Field::Network => "network",
            Field::Address => "address",
            Field::Fee => "fee",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Values captured so far
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationFields {
    pub currency: Option<Currency>,
    pub amount: Option<Decimal>,
    pub recipient: Option<UserId>,
    pub network: Option<String>,
    pub address: Option<String>,
    pub fee: Option<Decimal>,
}

impl ConversationFields {
    pub fn has(&self, field: Field) -> bool {
        match field {
            Field::Currency => self.currency.is_some(),
            Field::Amount => self.amount.is_some(),
            Field::Recipient => self.recipient.is_some(),
            Field::Network => self.network.is_some(),
            Field::Address => self.address.is_some(),
            Field::Fee => self.fee.is_some(),
        }
    }
}

/// Conversation of one chat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub chat_id: ChatId,
    pub step: Step,
    #[serde(default)]
    pub fields: ConversationFields,
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    /// Fresh state at the first step of `flow`, every field empty
    pub fn enter(chat_id: ChatId, flow: Flow) -> Self {
        Self {
            chat_id,
            step: flow.first_step(),
            fields: ConversationFields::default(),
            updated_at: Utc::now(),
        }
    }

    #[inline]
    pub fn flow(&self) -> Flow {
        self.step.flow()
    }

    /// Move to the next step of the flow; stays put on the terminal step
    pub fn advance(&mut self) {
        if let Some(next) = self.step.next() {
            self.step = next;
        }
        self.updated_at = Utc::now();
    }
}

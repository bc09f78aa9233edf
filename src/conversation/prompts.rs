//! Message texts and keyboards shown by the dialog

use rust_decimal::Decimal;

use super::input::Selection;
use super::state::{ConversationState, Flow, Step};
use crate::core_types::Currency;
use crate::funding::network::NetworkFee;
use crate::funding::types::{Invoice, Transfer, Withdrawal};
use crate::money::{self, format_amount};
use crate::transport::{Button, OutgoingMessage};

fn button(label: &str, selection: Selection) -> Button {
    Button::new(label, selection.encode())
}

/// Row with the main-menu button; attached to every failure
pub fn menu_row() -> Vec<Button> {
    vec![button("Main menu", Selection::MainMenu)]
}

fn cancel_row() -> Vec<Button> {
    vec![button("Cancel", Selection::Cancel)]
}

pub fn main_menu() -> OutgoingMessage {
    OutgoingMessage::text("What would you like to do?")
        .with_row(vec![
            button("Deposit", Selection::Flow(Flow::Deposit)),
            button("Transfer", Selection::Flow(Flow::Transfer)),
            button("Withdraw", Selection::Flow(Flow::Withdraw)),
        ])
        .with_row(vec![button("Balance", Selection::Balance)])
}

/// Failure text plus the main-menu button
pub fn failure(text: impl Into<String>) -> OutgoingMessage {
    OutgoingMessage::text(text).with_row(menu_row())
}

pub fn service_unavailable() -> OutgoingMessage {
    failure("The service is temporarily unavailable. Please try again later.")
}

pub fn insufficient_balance(currency: &str, available: Decimal, required: Decimal) -> OutgoingMessage {
    failure(format!(
        "Insufficient balance: available {} {}, required {} {}.",
        format_amount(available),
        currency,
        format_amount(required),
        currency
    ))
    .with_row(cancel_row())
}

pub fn choose_currency(flow: Flow, currencies: &[Currency]) -> OutgoingMessage {
    let text = match flow {
        Flow::Deposit => "Which currency do you want to deposit?",
        Flow::Transfer => "Which currency do you want to send?",
        Flow::Withdraw => "Which currency do you want to withdraw?",
    };
    let buttons = currencies
        .iter()
        .map(|c| button(c.as_str(), Selection::Currency(c.clone())))
        .collect::<Vec<_>>();

    let mut message = OutgoingMessage::text(text);
    for row in buttons.chunks(3) {
        message = message.with_row(row.to_vec());
    }
    message.with_row(cancel_row())
}

pub fn choose_network(currency: &Currency, fees: &[NetworkFee]) -> OutgoingMessage {
    let mut message = OutgoingMessage::text(format!("Withdraw {} over which network?", currency));
    for fee in fees {
        message = message.with_row(vec![button(
            &format!("{} (fee {} {})", fee.network, format_amount(fee.fee), currency),
            Selection::Network(fee.network.clone()),
        )]);
    }
    message.with_row(cancel_row())
}

/// Prompt of a text step, or the summary of a confirm step
pub fn prompt(state: &ConversationState) -> OutgoingMessage {
    let fields = &state.fields;
    let currency = fields
        .currency
        .as_ref()
        .map(Currency::as_str)
        .unwrap_or_default();

    match state.step {
        Step::DepositAmount => {
            OutgoingMessage::text(format!("How much {} do you want to deposit?", currency))
                .with_row(cancel_row())
        }
        Step::TransferAmount => {
            OutgoingMessage::text(format!("How much {} do you want to send?", currency))
                .with_row(cancel_row())
        }
        Step::TransferRecipient => {
            OutgoingMessage::text("Send me the user id of the recipient.").with_row(cancel_row())
        }
        Step::WithdrawAmount => OutgoingMessage::text(format!(
            "How much {} do you want to withdraw? Network fee: {} {}.",
            currency,
            format_amount(fields.fee.unwrap_or_default()),
            currency
        ))
        .with_row(cancel_row()),
        Step::WithdrawAddress => {
            OutgoingMessage::text("Send me the destination address.").with_row(cancel_row())
        }
        Step::TransferConfirm => confirm(format!(
            "Send {} {} to user {}?",
            format_amount(fields.amount.unwrap_or_default()),
            currency,
            fields.recipient.unwrap_or_default()
        )),
        Step::WithdrawConfirm => {
            let amount = fields.amount.unwrap_or_default();
            let fee = fields.fee.unwrap_or_default();
            let total = money::checked_sum(amount, fee).unwrap_or(Decimal::MAX);
            confirm(format!(
                "Withdraw {} {} over {} to {}?\nFee: {} {}. Total debited: {} {}.",
                format_amount(amount),
                currency,
                fields.network.as_deref().unwrap_or_default(),
                fields.address.as_deref().unwrap_or_default(),
                format_amount(fee),
                currency,
                format_amount(total),
                currency
            ))
        }
        Step::DepositCurrency | Step::TransferCurrency | Step::WithdrawCurrency | Step::WithdrawNetwork => {
            OutgoingMessage::text("Please pick an option below.").with_row(cancel_row())
        }
    }
}

fn confirm(text: String) -> OutgoingMessage {
    OutgoingMessage::text(text).with_row(vec![
        button("Confirm", Selection::Confirm),
        button("Cancel", Selection::Cancel),
    ])
}

pub fn invoice_created(invoice: &Invoice) -> OutgoingMessage {
    OutgoingMessage::text(format!(
        "Invoice for {} {} created. Pay here: {}",
        format_amount(invoice.amount),
        invoice.currency,
        invoice.pay_url.as_deref().unwrap_or("-")
    ))
    .with_row(menu_row())
}

pub fn transfer_sent(transfer: &Transfer) -> OutgoingMessage {
    OutgoingMessage::text(format!(
        "Sent {} {} to user {}.",
        format_amount(transfer.amount),
        transfer.currency,
        transfer.recipient_id
    ))
    .with_row(menu_row())
}

pub fn withdrawal_created(withdrawal: &Withdrawal) -> OutgoingMessage {
    OutgoingMessage::text(format!(
        "Withdrawal of {} {} to {} is on its way.",
        format_amount(withdrawal.net_amount),
        withdrawal.currency,
        withdrawal.address
    ))
    .with_row(menu_row())
}

pub fn deposit_credited(currency: &Currency, amount: Decimal) -> OutgoingMessage {
    OutgoingMessage::text(format!(
        "Deposit of {} {} received.",
        format_amount(amount),
        currency
    ))
    .with_row(menu_row())
}

pub fn balances(rows: &[(Currency, Decimal)]) -> OutgoingMessage {
    let mut text = String::from("Your balance:");
    for (currency, amount) in rows {
        text.push_str(&format!("\n{} {}", format_amount(*amount), currency));
    }
    OutgoingMessage::text(text).with_row(menu_row())
}

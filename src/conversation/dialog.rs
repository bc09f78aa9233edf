//! Conversation service
//!
//! Loads the chat's state, asks [`route`] what to do and performs it: captures
//! fields, re-prompts, executes the flow and replies through the transport.
//!
//! # Failure policy
//!
//! - validation failure: state kept, hint shown, user may retry the step
//! - insufficient balance: available and required shown, state kept
//! - persistence or payment network failure: state cleared, generic message
//!
//! Every failure reply carries the main-menu button.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::input::{InboundEvent, Input};
use super::prompts;
use super::router::{Action, Capture, route};
use super::state::{ConversationState, Field, Flow, Step};
use super::store::ConversationStore;
use crate::core_types::{ChatId, Currency, UserId};
use crate::funding::network::PaymentNetwork;
use crate::funding::types::{TransferRequest, WithdrawalRequest};
use crate::funding::{DepositService, FundingError, TransactionCoordinator};
use crate::ledger::Ledger;
use crate::store::StoreError;
use crate::transport::{ChatTransport, OutgoingMessage};
use crate::validation::{ValidationError, ValidationGate};

/// Everything the dialog talks to
pub struct ConversationService {
    states: Arc<dyn ConversationStore>,
    gate: ValidationGate,
    ledger: Ledger,
    coordinator: Arc<TransactionCoordinator>,
    deposits: Arc<DepositService>,
    network: Arc<dyn PaymentNetwork>,
    transport: Arc<dyn ChatTransport>,
    currencies: Vec<Currency>,
}

/// Result of one step, before it is rendered
enum Reply {
    /// State changed: store it and send the message
    Advance(ConversationState, OutgoingMessage),
    /// State unchanged: only send the message
    Stay(OutgoingMessage),
    /// Conversation finished or broken: clear state and send the message
    Finish(OutgoingMessage),
}

impl ConversationService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        states: Arc<dyn ConversationStore>,
        gate: ValidationGate,
        ledger: Ledger,
        coordinator: Arc<TransactionCoordinator>,
        deposits: Arc<DepositService>,
        network: Arc<dyn PaymentNetwork>,
        transport: Arc<dyn ChatTransport>,
        currencies: Vec<Currency>,
    ) -> Self {
        Self {
            states,
            gate,
            ledger,
            coordinator,
            deposits,
            network,
            transport,
            currencies,
        }
    }

    /// Handle one inbound chat event
    pub async fn handle(&self, event: InboundEvent) {
        if let Some(callback_id) = event.callback_id()
            && let Err(e) = self.transport.answer_callback(callback_id, None).await
        {
            debug!(chat_id = event.chat_id, error = %e, "Callback answer failed");
        }

        let Some(input) = event.input() else {
            debug!(chat_id = event.chat_id, payload = ?event.payload, "Unrecognized input");
            return;
        };

        let state = match self.states.get(event.chat_id).await {
            Ok(state) => state,
            Err(e) => {
                error!(chat_id = event.chat_id, error = %e, "Conversation state unavailable");
                self.finish(event.chat_id, prompts::service_unavailable())
                    .await;
                return;
            }
        };

        let action = route(state.as_ref(), &input);
        debug!(
            chat_id = event.chat_id,
            step = ?state.as_ref().map(|s| s.step),
            action = ?action,
            "Routed input"
        );

        let reply = match (action, state) {
            (Action::Enter(flow), _) => self.enter(event.chat_id, flow),
            (Action::Reset, _) => Reply::Finish(prompts::main_menu()),
            (Action::ShowBalance, _) => self.show_balance(event.user_id).await,
            (Action::Ignore { show_menu: true }, _) => Reply::Stay(prompts::main_menu()),
            (Action::Ignore { show_menu: false }, _) => return,
            (Action::Reject(hint), _) => Reply::Stay(prompts::failure(hint)),
            (Action::Capture(capture), Some(state)) => {
                self.capture(event.user_id, state, capture).await
            }
            (Action::Execute, Some(_)) => match self.claim(event.chat_id, &input).await {
                Ok(Some(state)) => match self.execute(event.user_id, state.clone()).await {
                    // validation failures keep the confirm step
                    Reply::Stay(message) => match self.states.put(&state).await {
                        Ok(()) => Reply::Stay(message),
                        Err(e) => self.persistence_failed(event.chat_id, e),
                    },
                    other => other,
                },
                Ok(None) => {
                    debug!(chat_id = event.chat_id, "Confirmation already being executed");
                    return;
                }
                Err(e) => self.persistence_failed(event.chat_id, e),
            },
            (Action::Capture(_) | Action::Execute, None) => Reply::Stay(prompts::main_menu()),
        };

        self.render(event.chat_id, event.message_id(), reply).await;
    }

    /// Remove the state before executing so a repeated confirm finds nothing to run
    async fn claim(
        &self,
        chat_id: ChatId,
        input: &Input,
    ) -> Result<Option<ConversationState>, StoreError> {
        let Some(state) = self.states.take(chat_id).await? else {
            return Ok(None);
        };
        if route(Some(&state), input) == Action::Execute {
            return Ok(Some(state));
        }
        // a newer flow replaced the confirm step in between
        self.states.put(&state).await?;
        Ok(None)
    }

    fn enter(&self, chat_id: ChatId, flow: Flow) -> Reply {
        let state = ConversationState::enter(chat_id, flow);
        info!(chat_id, flow = %flow, "Flow entered");
        Reply::Advance(state, prompts::choose_currency(flow, &self.currencies))
    }

    async fn show_balance(&self, user_id: UserId) -> Reply {
        let mut rows = Vec::with_capacity(self.currencies.len());
        for currency in &self.currencies {
            match self.ledger.get_balance(user_id, currency).await {
                Ok(amount) => rows.push((currency.clone(), amount)),
                Err(e) => {
                    error!(user_id, error = %e, "Balance lookup failed");
                    return Reply::Stay(prompts::service_unavailable());
                }
            }
        }
        Reply::Stay(prompts::balances(&rows))
    }

    async fn capture(&self, user_id: UserId, mut state: ConversationState, capture: Capture) -> Reply {
        match (state.step, capture) {
            (
                Step::DepositCurrency | Step::TransferCurrency | Step::WithdrawCurrency,
                Capture::Currency(currency),
            ) => {
                if !self.currencies.contains(&currency) {
                    return Reply::Stay(prompts::failure(format!(
                        "{} is not supported.",
                        currency
                    )));
                }
                state.fields.currency = Some(currency.clone());
                state.advance();

                if state.step == Step::WithdrawNetwork {
                    return match self.network.get_fees(&currency).await {
                        Ok(fees) if fees.is_empty() => Reply::Finish(prompts::failure(format!(
                            "{} cannot be withdrawn right now.",
                            currency
                        ))),
                        Ok(fees) => Reply::Advance(state, prompts::choose_network(&currency, &fees)),
                        Err(e) => {
                            warn!(currency = %currency, error = %e, "Fee lookup failed");
                            Reply::Finish(prompts::service_unavailable())
                        }
                    };
                }
                let message = prompts::prompt(&state);
                Reply::Advance(state, message)
            }

            (Step::WithdrawNetwork, Capture::Network(network)) => {
                let Some(currency) = state.fields.currency.clone() else {
                    return self.missing(&state, ValidationError::MissingState(Field::Currency));
                };
                let fees = match self.network.get_fees(&currency).await {
                    Ok(fees) => fees,
                    Err(e) => {
                        warn!(currency = %currency, error = %e, "Fee lookup failed");
                        return Reply::Finish(prompts::service_unavailable());
                    }
                };
                let Some(fee) = fees.into_iter().find(|f| f.network == network) else {
                    return Reply::Stay(prompts::failure(format!(
                        "{} is not available for {}.",
                        network, currency
                    )));
                };
                state.fields.network = Some(fee.network);
                state.fields.fee = Some(fee.fee);
                state.advance();
                let message = prompts::prompt(&state);
                Reply::Advance(state, message)
            }

            (Step::DepositAmount, Capture::Text(text)) => {
                let amount = match self.gate.parse_amount(&text) {
                    Ok(amount) => amount,
                    Err(e) => return self.invalid(&state, e),
                };
                state.fields.amount = Some(amount);
                self.run_deposit(user_id, state).await
            }

            (Step::TransferAmount, Capture::Text(text)) => {
                let amount = match self.gate.parse_amount(&text) {
                    Ok(amount) => amount,
                    Err(e) => return self.invalid(&state, e),
                };
                if let Some(currency) = &state.fields.currency
                    && let Err(e) = self.gate.check_balance(user_id, currency, amount).await
                {
                    return self.invalid(&state, e);
                }
                state.fields.amount = Some(amount);
                state.advance();
                let message = prompts::prompt(&state);
                Reply::Advance(state, message)
            }

            (Step::TransferRecipient, Capture::Text(text)) => {
                let recipient = match self.gate.parse_recipient(&text) {
                    Ok(id) if id == user_id => {
                        return self.invalid(
                            &state,
                            ValidationError::InvalidRecipient("cannot send to yourself".into()),
                        );
                    }
                    Ok(id) => id,
                    Err(e) => return self.invalid(&state, e),
                };
                state.fields.recipient = Some(recipient);
                state.advance();
                let message = prompts::prompt(&state);
                Reply::Advance(state, message)
            }

            (Step::WithdrawAmount, Capture::Text(text)) => {
                let amount = match self.gate.parse_amount(&text) {
                    Ok(amount) => amount,
                    Err(e) => return self.invalid(&state, e),
                };
                if let (Some(currency), Some(fee)) = (&state.fields.currency, state.fields.fee)
                    && let Err(e) = self
                        .gate
                        .check_withdrawal_total(user_id, currency, amount, fee)
                        .await
                {
                    return self.invalid(&state, e);
                }
                state.fields.amount = Some(amount);
                state.advance();
                let message = prompts::prompt(&state);
                Reply::Advance(state, message)
            }

            (Step::WithdrawAddress, Capture::Text(text)) => {
                let address = match self.gate.check_address(&text) {
                    Ok(address) => address.to_string(),
                    Err(e) => return self.invalid(&state, e),
                };
                state.fields.address = Some(address);
                state.advance();
                let message = prompts::prompt(&state);
                Reply::Advance(state, message)
            }

            (step, capture) => {
                debug!(step = %step, capture = ?capture, "Capture does not fit step");
                Reply::Stay(prompts::prompt(&state))
            }
        }
    }

    async fn execute(&self, user_id: UserId, state: ConversationState) -> Reply {
        let flow = state.flow();
        if let Err(e) = self
            .gate
            .check_conversation_fields(&state, flow.required_fields())
        {
            return self.missing(&state, e);
        }
        let fields = state.fields.clone();
        let (Some(currency), Some(amount)) = (fields.currency, fields.amount) else {
            return Reply::Finish(prompts::service_unavailable());
        };

        match flow {
            Flow::Transfer => {
                let req = TransferRequest {
                    sender_id: user_id,
                    recipient_id: fields.recipient.unwrap_or_default(),
                    currency,
                    amount,
                };
                match self.coordinator.transfer(req).await {
                    Ok(outcome) => Reply::Finish(prompts::transfer_sent(&outcome.transfer)),
                    Err(e) => self.funding_failed(&state, e),
                }
            }
            Flow::Withdraw => {
                let req = WithdrawalRequest {
                    user_id,
                    currency,
                    network: fields.network.unwrap_or_default(),
                    address: fields.address.unwrap_or_default(),
                    amount,
                    fee: fields.fee.unwrap_or(Decimal::ZERO),
                };
                match self.coordinator.withdraw(req).await {
                    Ok(outcome) => Reply::Finish(prompts::withdrawal_created(&outcome.withdrawal)),
                    Err(e) => self.funding_failed(&state, e),
                }
            }
            Flow::Deposit => self.run_deposit(user_id, state).await,
        }
    }

    async fn run_deposit(&self, user_id: UserId, state: ConversationState) -> Reply {
        let (Some(currency), Some(amount)) = (&state.fields.currency, state.fields.amount) else {
            return Reply::Finish(prompts::service_unavailable());
        };
        match self.deposits.create_invoice(user_id, currency, amount).await {
            Ok(invoice) => Reply::Finish(prompts::invoice_created(&invoice)),
            Err(e) => self.funding_failed(&state, e),
        }
    }

    fn funding_failed(&self, state: &ConversationState, err: FundingError) -> Reply {
        match err {
            FundingError::ValidationFailed(e) => self.invalid(state, e),
            FundingError::ExternalCallFailed(e) => {
                warn!(chat_id = state.chat_id, flow = %state.flow(), error = %e, "Payment network call failed");
                Reply::Finish(prompts::service_unavailable())
            }
            FundingError::Persistence(e) => {
                error!(chat_id = state.chat_id, flow = %state.flow(), error = %e, "Persistence failed");
                Reply::Finish(prompts::service_unavailable())
            }
        }
    }

    /// Validation failure: keep the step
    fn invalid(&self, state: &ConversationState, err: ValidationError) -> Reply {
        debug!(chat_id = state.chat_id, step = %state.step, code = err.code(), "Validation failed");
        match err {
            ValidationError::InsufficientBalance {
                available,
                required,
            } => {
                let currency = state
                    .fields
                    .currency
                    .as_ref()
                    .map(Currency::as_str)
                    .unwrap_or_default();
                Reply::Stay(prompts::insufficient_balance(currency, available, required))
            }
            ValidationError::Store(e) => self.persistence_failed(state.chat_id, e),
            ValidationError::MissingState(_) => self.missing(state, err),
            other => Reply::Stay(prompts::failure(other.to_string())),
        }
    }

    /// Inconsistent state: start over
    fn missing(&self, state: &ConversationState, err: ValidationError) -> Reply {
        warn!(chat_id = state.chat_id, step = %state.step, error = %err, "Conversation state incomplete");
        Reply::Finish(prompts::failure("Something went wrong with this operation. Please start again."))
    }

    fn persistence_failed(&self, chat_id: ChatId, err: StoreError) -> Reply {
        error!(chat_id, error = %err, "Persistence failed");
        Reply::Finish(prompts::service_unavailable())
    }

    /// A step prompt replaces the message whose button was pressed
    async fn render(&self, chat_id: ChatId, message_id: Option<i64>, reply: Reply) {
        match reply {
            Reply::Advance(state, message) => {
                if let Err(e) = self.states.put(&state).await {
                    error!(chat_id, error = %e, "Conversation state not saved");
                    self.finish(chat_id, prompts::service_unavailable()).await;
                    return;
                }
                match message_id {
                    Some(message_id) => self.edit(chat_id, message_id, &message).await,
                    None => self.send(chat_id, &message).await,
                }
            }
            Reply::Stay(message) => self.send(chat_id, &message).await,
            Reply::Finish(message) => self.finish(chat_id, message).await,
        }
    }

    async fn edit(&self, chat_id: ChatId, message_id: i64, message: &OutgoingMessage) {
        if let Err(e) = self.transport.edit_message(chat_id, message_id, message).await {
            debug!(chat_id, message_id, error = %e, "Edit failed, sending instead");
            self.send(chat_id, message).await;
        }
    }

    async fn finish(&self, chat_id: ChatId, message: OutgoingMessage) {
        if let Err(e) = self.states.clear(chat_id).await {
            error!(chat_id, error = %e, "Conversation state not cleared");
        }
        self.send(chat_id, &message).await;
    }

    async fn send(&self, chat_id: ChatId, message: &OutgoingMessage) {
        if let Err(e) = self.transport.send_message(chat_id, message).await {
            warn!(chat_id, error = %e, "Reply not delivered");
        }
    }
}

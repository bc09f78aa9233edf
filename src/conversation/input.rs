//! Inbound chat events and their decoded input
//!
//! Button payloads are short strings (`flow:deposit`, `cur:USDT`, `net:TON`,
//! `confirm`, `cancel`, `menu`, `balance`); [`Selection`] is their typed form.

use serde::Deserialize;
use std::fmt;

use super::state::Flow;
use crate::core_types::{ChatId, Currency, UserId};

/// Structured choice made by pressing a button (or typing a command)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Flow(Flow),
    Currency(Currency),
    Network(String),
    Confirm,
    Cancel,
    MainMenu,
    Balance,
}

impl Selection {
    /// Decode a button payload
    pub fn parse(data: &str) -> Option<Self> {
        match data.trim() {
            "confirm" => Some(Selection::Confirm),
            "cancel" => Some(Selection::Cancel),
            "menu" => Some(Selection::MainMenu),
            "balance" => Some(Selection::Balance),
            other => match other.split_once(':')? {
                ("flow", "deposit") => Some(Selection::Flow(Flow::Deposit)),
                ("flow", "transfer") => Some(Selection::Flow(Flow::Transfer)),
                ("flow", "withdraw") => Some(Selection::Flow(Flow::Withdraw)),
                ("cur", code) => Currency::new(code).ok().map(Selection::Currency),
                ("net", network) if !network.is_empty() => {
                    Some(Selection::Network(network.to_string()))
                }
                _ => None,
            },
        }
    }

    /// Map a slash command (without the slash) to a selection
    pub fn from_command(command: &str) -> Option<Self> {
        match command.trim().trim_start_matches('/').to_ascii_lowercase().as_str() {
            "start" | "menu" => Some(Selection::MainMenu),
            "deposit" => Some(Selection::Flow(Flow::Deposit)),
            "transfer" | "send" => Some(Selection::Flow(Flow::Transfer)),
            "withdraw" => Some(Selection::Flow(Flow::Withdraw)),
            "balance" => Some(Selection::Balance),
            "cancel" => Some(Selection::Cancel),
            _ => None,
        }
    }

    /// Button payload for this selection
    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::Flow(flow) => write!(f, "flow:{}", flow),
            Selection::Currency(c) => write!(f, "cur:{}", c),
            Selection::Network(n) => write!(f, "net:{}", n),
            Selection::Confirm => f.write_str("confirm"),
            Selection::Cancel => f.write_str("cancel"),
            Selection::MainMenu => f.write_str("menu"),
            Selection::Balance => f.write_str("balance"),
        }
    }
}

/// Input consumed by the router
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Select(Selection),
    Text(String),
}

/// Event posted by the chat relay
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundEvent {
    pub chat_id: ChatId,
    pub user_id: UserId,
    #[serde(flatten)]
    pub payload: InboundPayload,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InboundPayload {
    Text {
        text: String,
    },
    Callback {
        callback_id: String,
        data: String,
        #[serde(default)]
        message_id: Option<i64>,
    },
    Command {
        command: String,
    },
}

impl InboundEvent {
    /// Decoded input; `None` for an unknown button payload or command
    pub fn input(&self) -> Option<Input> {
        match &self.payload {
            InboundPayload::Text { text } => Some(Input::Text(text.clone())),
            InboundPayload::Callback { data, .. } => Selection::parse(data).map(Input::Select),
            InboundPayload::Command { command } => {
                Selection::from_command(command).map(Input::Select)
            }
        }
    }

    pub fn callback_id(&self) -> Option<&str> {
        match &self.payload {
            InboundPayload::Callback { callback_id, .. } => Some(callback_id),
            _ => None,
        }
    }

    /// Message carrying the pressed button
    pub fn message_id(&self) -> Option<i64> {
        match &self.payload {
            InboundPayload::Callback { message_id, .. } => *message_id,
            _ => None,
        }
    }
}

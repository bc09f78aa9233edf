//! Chat transport
//!
//! Outbound side of the chat integration. The bot talks to users only through
//! [`ChatTransport`]; rendering on the chat platform is the relay's job.
//!
//! - [`RelayTransport`] - POSTs JSON commands to a relay URL (reqwest)
//! - [`LogTransport`] - writes every command to the log, for dev mode

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::core_types::ChatId;

pub const RELAY_SECRET_HEADER: &str = "X-Relay-Secret";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("Relay unreachable: {0}")]
    Http(String),

    #[error("Relay rejected command with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        TransportError::Http(e.to_string())
    }
}

/// Inline keyboard button; `data` comes back as the selection payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Button {
    pub label: String,
    pub data: String,
}

impl Button {
    pub fn new(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            data: data.into(),
        }
    }
}

/// Message text plus an optional keyboard (rows of buttons)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct OutgoingMessage {
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub keyboard: Vec<Vec<Button>>,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: Vec::new(),
        }
    }

    pub fn with_row(mut self, row: Vec<Button>) -> Self {
        if !row.is_empty() {
            self.keyboard.push(row);
        }
        self
    }

    pub fn has_button(&self, data: &str) -> bool {
        self.keyboard.iter().flatten().any(|b| b.data == data)
    }
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_message(
        &self,
        chat_id: ChatId,
        message: &OutgoingMessage,
    ) -> Result<(), TransportError>;

    async fn edit_message(
        &self,
        chat_id: ChatId,
        message_id: i64,
        message: &OutgoingMessage,
    ) -> Result<(), TransportError>;

    /// Acknowledge a button press so the client stops its spinner
    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
    ) -> Result<(), TransportError>;
}

// ============================================================================
// Relay
// ============================================================================

/// JSON body posted to the relay, `method` selects the command
#[derive(Serialize)]
struct RelayCommand<'a> {
    method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    chat_id: Option<ChatId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "no_buttons")]
    keyboard: &'a [Vec<Button>],
}

fn no_buttons(rows: &&[Vec<Button>]) -> bool {
    rows.is_empty()
}

impl<'a> RelayCommand<'a> {
    fn send(chat_id: ChatId, message: &'a OutgoingMessage) -> Self {
        Self {
            method: "sendMessage",
            chat_id: Some(chat_id),
            message_id: None,
            callback_id: None,
            text: Some(&message.text),
            keyboard: &message.keyboard,
        }
    }

    fn edit(chat_id: ChatId, message_id: i64, message: &'a OutgoingMessage) -> Self {
        Self {
            method: "editMessage",
            message_id: Some(message_id),
            ..Self::send(chat_id, message)
        }
    }

    fn answer(callback_id: &'a str, text: Option<&'a str>) -> Self {
        Self {
            method: "answerCallback",
            chat_id: None,
            message_id: None,
            callback_id: Some(callback_id),
            text,
            keyboard: &[],
        }
    }
}

/// Forwards commands to a chat relay over HTTP
#[derive(Debug, Clone)]
pub struct RelayTransport {
    client: reqwest::Client,
    url: String,
    secret: Option<String>,
}

impl RelayTransport {
    pub fn new(
        url: impl Into<String>,
        secret: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            secret,
        })
    }

    async fn post(&self, command: &RelayCommand<'_>) -> Result<(), TransportError> {
        let mut request = self.client.post(&self.url).json(command);
        if let Some(secret) = &self.secret {
            request = request.header(RELAY_SECRET_HEADER, secret);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ChatTransport for RelayTransport {
    async fn send_message(
        &self,
        chat_id: ChatId,
        message: &OutgoingMessage,
    ) -> Result<(), TransportError> {
        debug!(chat_id, "Relay sendMessage");
        self.post(&RelayCommand::send(chat_id, message)).await
    }

    async fn edit_message(
        &self,
        chat_id: ChatId,
        message_id: i64,
        message: &OutgoingMessage,
    ) -> Result<(), TransportError> {
        debug!(chat_id, message_id, "Relay editMessage");
        self.post(&RelayCommand::edit(chat_id, message_id, message))
            .await
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
    ) -> Result<(), TransportError> {
        self.post(&RelayCommand::answer(callback_id, text)).await
    }
}

// ============================================================================
// Log only
// ============================================================================

/// Transport that only logs, used when no relay is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTransport;

#[async_trait]
impl ChatTransport for LogTransport {
    async fn send_message(
        &self,
        chat_id: ChatId,
        message: &OutgoingMessage,
    ) -> Result<(), TransportError> {
        info!(chat_id, text = %message.text, buttons = message.keyboard.iter().flatten().count(), "[chat] send");
        Ok(())
    }

    async fn edit_message(
        &self,
        chat_id: ChatId,
        message_id: i64,
        message: &OutgoingMessage,
    ) -> Result<(), TransportError> {
        info!(chat_id, message_id, text = %message.text, "[chat] edit");
        Ok(())
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
    ) -> Result<(), TransportError> {
        info!(callback_id, text = text.unwrap_or(""), "[chat] answer");
        Ok(())
    }
}

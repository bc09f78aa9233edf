//! Payment network capability
//!
//! [`PaymentNetwork`] is the narrow boundary to the external provider that
//! actually moves value. [`CryptoPayClient`] implements it against a
//! Crypto-Pay-style JSON API: `POST {base_url}/{method}` with the API token in
//! a header, answers wrapped in `{ "ok": bool, "result" | "error" }`.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::core_types::{Currency, RecordId, UserId};
use crate::funding::types::InvoiceStatus;
use crate::money::format_amount;

pub const API_TOKEN_HEADER: &str = "Crypto-Pay-API-Token";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum NetworkError {
    #[error("Request failed: {0}")]
    Http(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Provider error {code}: {name}")]
    Api { code: i64, name: String },

    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl NetworkError {
    pub fn code(&self) -> &'static str {
        match self {
            NetworkError::Http(_) => "NETWORK_HTTP",
            NetworkError::Timeout => "NETWORK_TIMEOUT",
            NetworkError::Api { .. } => "NETWORK_API",
            NetworkError::Decode(_) => "NETWORK_DECODE",
        }
    }
}

impl From<reqwest::Error> for NetworkError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            NetworkError::Timeout
        } else if e.is_decode() {
            NetworkError::Decode(e.to_string())
        } else {
            NetworkError::Http(e.to_string())
        }
    }
}

/// Identifier the provider may send as a JSON number or a string
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ExternalId {
    Number(i64),
    Text(String),
}

impl ExternalId {
    pub fn into_string(self) -> String {
        match self {
            ExternalId::Number(n) => n.to_string(),
            ExternalId::Text(s) => s,
        }
    }
}

/// Invoice as created by the provider
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedInvoice {
    pub external_id: String,
    pub pay_url: String,
}

/// Withdrawal fee on one network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkFee {
    pub network: String,
    pub fee: Decimal,
}

/// External payment provider
#[async_trait]
pub trait PaymentNetwork: Send + Sync {
    /// Create a payable invoice; `callback_ref` comes back in webhook payloads
    async fn create_invoice(
        &self,
        amount: Decimal,
        currency: &Currency,
        user_id: UserId,
        callback_ref: RecordId,
    ) -> Result<CreatedInvoice, NetworkError>;

    /// Send funds to another user; a repeated `idempotency_key` must not pay twice
    async fn create_transfer(
        &self,
        amount: Decimal,
        currency: &Currency,
        recipient_id: UserId,
        idempotency_key: RecordId,
    ) -> Result<String, NetworkError>;

    async fn create_withdrawal(
        &self,
        amount: Decimal,
        currency: &Currency,
        network: &str,
        address: &str,
        idempotency_key: RecordId,
    ) -> Result<String, NetworkError>;

    /// Withdrawal fee per network for `currency`
    async fn get_fees(&self, currency: &Currency) -> Result<Vec<NetworkFee>, NetworkError>;

    async fn get_invoice_status(&self, external_id: &str) -> Result<InvoiceStatus, NetworkError>;
}

// ============================================================================
// Crypto Pay client
// ============================================================================

#[derive(Deserialize)]
struct ApiEnvelope<T> {
    ok: bool,
    result: Option<T>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct ApiError {
    code: i64,
    name: String,
}

#[derive(Serialize)]
struct CreateInvoiceParams<'a> {
    asset: &'a str,
    amount: String,
    payload: String,
    description: String,
}

#[derive(Deserialize)]
struct InvoiceResult {
    invoice_id: ExternalId,
    #[serde(alias = "bot_invoice_url")]
    pay_url: String,
}

#[derive(Serialize)]
struct TransferParams<'a> {
    user_id: UserId,
    asset: &'a str,
    amount: String,
    spend_id: String,
}

#[derive(Deserialize)]
struct TransferResult {
    transfer_id: ExternalId,
}

#[derive(Serialize)]
struct WithdrawalParams<'a> {
    asset: &'a str,
    amount: String,
    network: &'a str,
    address: &'a str,
    spend_id: String,
}

#[derive(Deserialize)]
struct WithdrawalResult {
    withdrawal_id: ExternalId,
}

#[derive(Serialize)]
struct AssetParams<'a> {
    asset: &'a str,
}

#[derive(Serialize)]
struct InvoiceLookupParams<'a> {
    invoice_ids: &'a str,
}

#[derive(Deserialize)]
struct InvoiceItems {
    items: Vec<InvoiceStatusItem>,
}

#[derive(Deserialize)]
struct InvoiceStatusItem {
    invoice_id: ExternalId,
    status: String,
}

/// reqwest-based [`PaymentNetwork`]
#[derive(Debug, Clone)]
pub struct CryptoPayClient {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
}

impl CryptoPayClient {
    pub fn new(
        base_url: impl Into<String>,
        api_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, NetworkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NetworkError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token: api_token.into(),
        })
    }

    async fn call<P, T>(&self, method: &str, params: &P) -> Result<T, NetworkError>
    where
        P: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, method);
        debug!(method, "Payment network call");

        let resp = self
            .client
            .post(&url)
            .header(API_TOKEN_HEADER, &self.api_token)
            .json(params)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.bytes().await?;
        let envelope: ApiEnvelope<T> = serde_json::from_slice(&body).map_err(|e| {
            NetworkError::Decode(format!("{} answered {}: {}", method, status, e))
        })?;

        if !envelope.ok {
            return Err(match envelope.error {
                Some(err) => NetworkError::Api {
                    code: err.code,
                    name: err.name,
                },
                None => NetworkError::Decode(format!("{} failed without error body", method)),
            });
        }

        envelope
            .result
            .ok_or_else(|| NetworkError::Decode(format!("{} returned no result", method)))
    }
}

#[async_trait]
impl PaymentNetwork for CryptoPayClient {
    async fn create_invoice(
        &self,
        amount: Decimal,
        currency: &Currency,
        user_id: UserId,
        callback_ref: RecordId,
    ) -> Result<CreatedInvoice, NetworkError> {
        let params = CreateInvoiceParams {
            asset: currency.as_str(),
            amount: format_amount(amount),
            payload: callback_ref.to_string(),
            description: format!("Deposit for user {}", user_id),
        };
        let result: InvoiceResult = self.call("createInvoice", &params).await?;
        Ok(CreatedInvoice {
            external_id: result.invoice_id.into_string(),
            pay_url: result.pay_url,
        })
    }

    async fn create_transfer(
        &self,
        amount: Decimal,
        currency: &Currency,
        recipient_id: UserId,
        idempotency_key: RecordId,
    ) -> Result<String, NetworkError> {
        let params = TransferParams {
            user_id: recipient_id,
            asset: currency.as_str(),
            amount: format_amount(amount),
            spend_id: idempotency_key.to_string(),
        };
        let result: TransferResult = self.call("transfer", &params).await?;
        Ok(result.transfer_id.into_string())
    }

    async fn create_withdrawal(
        &self,
        amount: Decimal,
        currency: &Currency,
        network: &str,
        address: &str,
        idempotency_key: RecordId,
    ) -> Result<String, NetworkError> {
        let params = WithdrawalParams {
            asset: currency.as_str(),
            amount: format_amount(amount),
            network,
            address,
            spend_id: idempotency_key.to_string(),
        };
        let result: WithdrawalResult = self.call("createWithdrawal", &params).await?;
        Ok(result.withdrawal_id.into_string())
    }

    async fn get_fees(&self, currency: &Currency) -> Result<Vec<NetworkFee>, NetworkError> {
        self.call(
            "getFees",
            &AssetParams {
                asset: currency.as_str(),
            },
        )
        .await
    }

    async fn get_invoice_status(&self, external_id: &str) -> Result<InvoiceStatus, NetworkError> {
        let result: InvoiceItems = self
            .call(
                "getInvoices",
                &InvoiceLookupParams {
                    invoice_ids: external_id,
                },
            )
            .await?;

        let item = result
            .items
            .into_iter()
            .find(|item| item.invoice_id.clone().into_string() == external_id)
            .ok_or_else(|| NetworkError::Decode(format!("invoice {} not listed", external_id)))?;

        InvoiceStatus::from_network(&item.status)
            .ok_or_else(|| NetworkError::Decode(format!("unknown invoice status '{}'", item.status)))
    }
}

//! Webhook settlement
//!
//! Applies invoice events to the ledger exactly once. The invoice row is
//! locked by external id and its status is the idempotency marker: a `Paid`
//! invoice is never credited again, however often its event is delivered.

use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::event::SettlementEvent;
use super::signature::verify_signature;
use crate::conversation::prompts;
use crate::core_types::{Currency, RecordId, UserId};
use crate::funding::types::InvoiceStatus;
use crate::ledger::{Ledger, LedgerError};
use crate::store::{Store, StoreError};
use crate::transport::ChatTransport;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettlementError {
    #[error("Invalid webhook signature")]
    SignatureInvalid,

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Invoice not found: {0}")]
    InvoiceNotFound(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),
}

impl SettlementError {
    pub fn code(&self) -> &'static str {
        match self {
            SettlementError::SignatureInvalid => "SIGNATURE_INVALID",
            SettlementError::MalformedPayload(_) => "MALFORMED_PAYLOAD",
            SettlementError::InvoiceNotFound(_) => "INVOICE_NOT_FOUND",
            SettlementError::Persistence(_) => "PERSISTENCE_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            SettlementError::SignatureInvalid => 401,
            SettlementError::MalformedPayload(_) => 400,
            SettlementError::InvoiceNotFound(_) => 404,
            SettlementError::Persistence(_) => 500,
        }
    }
}

impl From<LedgerError> for SettlementError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Store(e) => SettlementError::Persistence(e),
            // a credit never lowers a balance
            LedgerError::InsufficientFunds { .. } | LedgerError::Overflow { .. } => {
                SettlementError::MalformedPayload(e.to_string())
            }
        }
    }
}

/// What an accepted event did
#[derive(Debug, Clone, PartialEq)]
pub enum SettlementOutcome {
    Credited {
        invoice_id: RecordId,
        user_id: UserId,
        currency: Currency,
        amount: Decimal,
        new_balance: Decimal,
    },
    /// Invoice already paid; nothing changed
    Duplicate,
    Expired,
    Ignored,
}

pub struct SettlementService {
    store: Arc<dyn Store>,
    transport: Arc<dyn ChatTransport>,
    secret: String,
}

impl SettlementService {
    pub fn new(
        store: Arc<dyn Store>,
        transport: Arc<dyn ChatTransport>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            store,
            transport,
            secret: secret.into(),
        }
    }

    /// Verify, parse and apply one webhook delivery
    pub async fn handle_settlement_event(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<SettlementOutcome, SettlementError> {
        let Some(signature) = signature else {
            warn!("Webhook without signature header");
            return Err(SettlementError::SignatureInvalid);
        };
        if !verify_signature(&self.secret, body, signature) {
            warn!("Webhook signature mismatch");
            return Err(SettlementError::SignatureInvalid);
        }

        let event = SettlementEvent::parse(body).map_err(SettlementError::MalformedPayload)?;
        debug!(
            update_id = event.update_id,
            kind = %event.kind,
            external_id = %event.external_invoice_id,
            "Settlement event received"
        );

        self.apply_event(&event).await
    }

    /// Apply an already trusted event; shared with the invoice reconciler
    pub async fn apply_event(
        &self,
        event: &SettlementEvent,
    ) -> Result<SettlementOutcome, SettlementError> {
        let mut uow = self.store.begin().await?;
        let Some(invoice) = uow
            .lock_invoice_by_external_id(&event.external_invoice_id)
            .await?
        else {
            warn!(external_id = %event.external_invoice_id, "Settlement for unknown invoice");
            return Err(SettlementError::InvoiceNotFound(
                event.external_invoice_id.clone(),
            ));
        };

        if invoice.status == InvoiceStatus::Paid {
            debug!(invoice_id = %invoice.id, update_id = event.update_id, "Invoice already paid");
            return Ok(SettlementOutcome::Duplicate);
        }

        if event.signals_payment() {
            if invoice.status == InvoiceStatus::Expired {
                error!(
                    invoice_id = %invoice.id,
                    external_id = %event.external_invoice_id,
                    "Payment reported for expired invoice, needs manual review"
                );
                return Ok(SettlementOutcome::Ignored);
            }
            if let Some(currency) = &event.currency
                && *currency != invoice.currency
            {
                return Err(SettlementError::MalformedPayload(format!(
                    "invoice {} is in {}, event says {}",
                    event.external_invoice_id, invoice.currency, currency
                )));
            }
            let amount = event.paid_amount.unwrap_or(invoice.amount);
            if amount <= Decimal::ZERO {
                return Err(SettlementError::MalformedPayload(format!(
                    "non-positive paid amount {}",
                    amount
                )));
            }

            uow.update_invoice_status(invoice.id, InvoiceStatus::Paid, amount)
                .await?;
            let new_balance =
                Ledger::apply_delta(uow.as_mut(), invoice.user_id, &invoice.currency, amount)
                    .await?;
            uow.commit().await?;

            info!(
                invoice_id = %invoice.id,
                user_id = invoice.user_id,
                currency = %invoice.currency,
                %amount,
                %new_balance,
                "Deposit credited"
            );
            self.notify(invoice.user_id, &invoice.currency, amount).await;

            return Ok(SettlementOutcome::Credited {
                invoice_id: invoice.id,
                user_id: invoice.user_id,
                currency: invoice.currency,
                amount,
                new_balance,
            });
        }

        if event.signals_expiry() && invoice.status == InvoiceStatus::Active {
            uow.update_invoice_status(invoice.id, InvoiceStatus::Expired, invoice.amount)
                .await?;
            uow.commit().await?;
            info!(invoice_id = %invoice.id, "Invoice expired");
            return Ok(SettlementOutcome::Expired);
        }

        debug!(
            invoice_id = %invoice.id,
            kind = %event.kind,
            status = ?event.status,
            "Settlement event ignored"
        );
        Ok(SettlementOutcome::Ignored)
    }

    /// The user's private chat id equals their user id
    async fn notify(&self, user_id: UserId, currency: &Currency, amount: Decimal) {
        let message = prompts::deposit_credited(currency, amount);
        if let Err(e) = self.transport.send_message(user_id, &message).await {
            warn!(user_id, error = %e, "Deposit notification not delivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::funding::types::Invoice;
    use crate::settlement::signature::sign;
    use crate::store::MemoryStore;
    use crate::testing::RecordingTransport;
    use std::str::FromStr;

    const SECRET: &str = "app-token";

    fn usdt() -> Currency {
        Currency::new("USDT").unwrap()
    }

    struct Fixture {
        store: MemoryStore,
        service: SettlementService,
        transport: Arc<RecordingTransport>,
    }

    impl Fixture {
        fn new() -> Self {
            let store = MemoryStore::new();
            let transport = Arc::new(RecordingTransport::new());
            Self {
                service: SettlementService::new(
                    Arc::new(store.clone()),
                    transport.clone(),
                    SECRET,
                ),
                store,
                transport,
            }
        }

        async fn invoice(&self, external_id: &str, amount: u32) -> Invoice {
            let invoice = Invoice::new(7, usdt(), Decimal::from(amount));
            let mut uow = self.store.begin().await.unwrap();
            uow.insert_invoice(&invoice).await.unwrap();
            uow.set_invoice_external(invoice.id, external_id, None)
                .await
                .unwrap();
            uow.commit().await.unwrap();
            invoice
        }

        async fn deliver(&self, body: &str) -> Result<SettlementOutcome, SettlementError> {
            let signature = sign(SECRET, body.as_bytes());
            self.service
                .handle_settlement_event(body.as_bytes(), Some(&signature))
                .await
        }

        async fn balance(&self) -> Option<Decimal> {
            self.store.balance(7, &usdt()).await.unwrap()
        }
    }

    fn paid(external_id: &str, paid_amount: &str) -> String {
        format!(
            r#"{{"update_id":1,"update_type":"invoice_paid","payload":{{"invoice_id":"{}","status":"paid","asset":"USDT","amount":"20","paid_amount":"{}"}}}}"#,
            external_id, paid_amount
        )
    }

    #[tokio::test]
    async fn test_duplicate_delivery_credits_once() {
        let fx = Fixture::new();
        let invoice = fx.invoice("5512", 20).await;
        let body = paid("5512", "20");

        let first = fx.deliver(&body).await.unwrap();
        assert!(matches!(first, SettlementOutcome::Credited { .. }));
        assert_eq!(fx.deliver(&body).await.unwrap(), SettlementOutcome::Duplicate);
        assert_eq!(fx.deliver(&body).await.unwrap(), SettlementOutcome::Duplicate);

        assert_eq!(fx.balance().await, Some(Decimal::from(20)));
        let stored = fx.store.invoice(invoice.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InvoiceStatus::Paid);
        assert_eq!(fx.transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_duplicates_credit_once() {
        let fx = Arc::new(Fixture::new());
        fx.invoice("5512", 20).await;
        let body = paid("5512", "20");

        let results = futures::future::join_all((0..4).map(|_| {
            let fx = fx.clone();
            let body = body.clone();
            async move { fx.deliver(&body).await.unwrap() }
        }))
        .await;

        let credited = results
            .iter()
            .filter(|o| matches!(o, SettlementOutcome::Credited { .. }))
            .count();
        assert_eq!(credited, 1);
        assert_eq!(fx.balance().await, Some(Decimal::from(20)));
    }

    #[tokio::test]
    async fn test_credits_received_amount() {
        let fx = Fixture::new();
        let invoice = fx.invoice("5512", 20).await;

        let outcome = fx.deliver(&paid("5512", "19.5")).await.unwrap();
        let received = Decimal::from_str("19.5").unwrap();
        assert_eq!(
            outcome,
            SettlementOutcome::Credited {
                invoice_id: invoice.id,
                user_id: 7,
                currency: usdt(),
                amount: received,
                new_balance: received,
            }
        );
        let stored = fx.store.invoice(invoice.id).await.unwrap().unwrap();
        assert_eq!(stored.amount, received);
        assert_eq!(fx.transport.sent()[0].0, 7);
    }

    #[tokio::test]
    async fn test_expiry_then_late_payment_is_ignored() {
        let fx = Fixture::new();
        let invoice = fx.invoice("9", 20).await;
        let expired = r#"{"update_id":2,"update_type":"invoice_expired","payload":{"invoice_id":9,"status":"expired"}}"#;

        assert_eq!(fx.deliver(expired).await.unwrap(), SettlementOutcome::Expired);
        assert_eq!(fx.deliver(&paid("9", "20")).await.unwrap(), SettlementOutcome::Ignored);

        let stored = fx.store.invoice(invoice.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InvoiceStatus::Expired);
        assert_eq!(fx.balance().await, None);
    }

    #[tokio::test]
    async fn test_unknown_invoice() {
        let fx = Fixture::new();
        let err = fx.deliver(&paid("404", "1")).await.unwrap_err();
        assert_eq!(err, SettlementError::InvoiceNotFound("404".into()));
        assert_eq!(err.http_status(), 404);
    }

    #[tokio::test]
    async fn test_bad_signature_is_rejected_before_parsing() {
        let fx = Fixture::new();
        fx.invoice("5512", 20).await;
        let body = paid("5512", "20");

        let err = fx
            .service
            .handle_settlement_event(body.as_bytes(), Some("00ff"))
            .await
            .unwrap_err();
        assert_eq!(err, SettlementError::SignatureInvalid);
        assert_eq!(err.http_status(), 401);

        let err = fx
            .service
            .handle_settlement_event(b"garbage", None)
            .await
            .unwrap_err();
        assert_eq!(err, SettlementError::SignatureInvalid);
        assert_eq!(fx.balance().await, None);
    }

    #[tokio::test]
    async fn test_malformed_payload() {
        let fx = Fixture::new();
        let err = fx.deliver("{}").await.unwrap_err();
        assert!(matches!(err, SettlementError::MalformedPayload(_)));
        assert_eq!(err.http_status(), 400);
    }

    #[tokio::test]
    async fn test_currency_mismatch_is_malformed() {
        let fx = Fixture::new();
        fx.invoice("5512", 20).await;
        let body = r#"{"update_id":1,"update_type":"invoice_paid","payload":{"invoice_id":5512,"status":"paid","asset":"TON","amount":"20"}}"#;

        let err = fx.deliver(body).await.unwrap_err();
        assert!(matches!(err, SettlementError::MalformedPayload(_)));
        assert_eq!(fx.balance().await, None);
    }

    #[tokio::test]
    async fn test_out_of_range_amount_leaves_invoice_active() {
        let fx = Fixture::new();
        let invoice = fx.invoice("5512", 20).await;

        let err = fx
            .deliver(&paid("5512", "79228162514264337593543950335"))
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::MalformedPayload(_)));

        // a credit that would push an existing balance past the column range
        let widest = Decimal::from_i128_with_scale(10_i128.pow(28) - 1, 0);
        Ledger::new(Arc::new(fx.store.clone()))
            .adjust(7, &usdt(), widest)
            .await
            .unwrap();
        let err = fx.deliver(&paid("5512", "20")).await.unwrap_err();
        assert!(matches!(err, SettlementError::MalformedPayload(_)));

        let stored = fx.store.invoice(invoice.id).await.unwrap().unwrap();
        assert_eq!(stored.status, InvoiceStatus::Active);
        assert_eq!(fx.balance().await, Some(widest));
        assert!(fx.transport.sent().is_empty());
    }
}

//! Settlement event payload
//!
//! ```json
//! {
//!   "update_id": 7,
//!   "update_type": "invoice_paid",
//!   "payload": { "invoice_id": 5512, "status": "paid", "asset": "USDT",
//!                "amount": "20", "paid_amount": "19.5" }
//! }
//! ```

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::core_types::Currency;
use crate::funding::network::ExternalId;
use crate::funding::types::InvoiceStatus;
use crate::money;

/// Update type announcing a paid invoice
pub const INVOICE_PAID: &str = "invoice_paid";

#[derive(Deserialize)]
struct RawUpdate {
    update_id: i64,
    update_type: String,
    payload: RawInvoice,
}

#[derive(Deserialize)]
struct RawInvoice {
    invoice_id: ExternalId,
    status: String,
    #[serde(default)]
    asset: Option<String>,
    #[serde(default)]
    paid_amount: Option<Decimal>,
    #[serde(default)]
    amount: Option<Decimal>,
}

/// Typed settlement event
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementEvent {
    pub update_id: i64,
    pub kind: String,
    pub external_invoice_id: String,
    /// `None` for a status this crate does not know
    pub status: Option<InvoiceStatus>,
    /// Amount actually received, falls back to the invoiced amount
    pub paid_amount: Option<Decimal>,
    pub currency: Option<Currency>,
}

impl SettlementEvent {
    pub fn parse(body: &[u8]) -> Result<Self, String> {
        let raw: RawUpdate = serde_json::from_slice(body).map_err(|e| e.to_string())?;

        let currency = match raw.payload.asset {
            Some(code) => Some(Currency::new(&code).map_err(|e| e.to_string())?),
            None => None,
        };

        let paid_amount = raw.payload.paid_amount.or(raw.payload.amount);
        if let Some(amount) = paid_amount
            && !money::fits_column(amount)
        {
            return Err(format!("amount {} out of range", amount));
        }

        Ok(Self {
            update_id: raw.update_id,
            kind: raw.update_type,
            external_invoice_id: raw.payload.invoice_id.into_string(),
            status: InvoiceStatus::from_network(&raw.payload.status),
            paid_amount,
            currency,
        })
    }

    /// Event produced by polling the provider rather than by a webhook
    pub fn observed(external_invoice_id: impl Into<String>, status: InvoiceStatus) -> Self {
        Self {
            update_id: 0,
            kind: match status {
                InvoiceStatus::Paid => INVOICE_PAID.to_string(),
                other => format!("invoice_{}", other),
            },
            external_invoice_id: external_invoice_id.into(),
            status: Some(status),
            paid_amount: None,
            currency: None,
        }
    }

    pub fn signals_payment(&self) -> bool {
        self.kind == INVOICE_PAID && self.status == Some(InvoiceStatus::Paid)
    }

    pub fn signals_expiry(&self) -> bool {
        self.status == Some(InvoiceStatus::Expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_parse_numeric_invoice_id() {
        let body = br#"{"update_id":7,"update_type":"invoice_paid","payload":{"invoice_id":5512,"status":"paid","asset":"USDT","amount":"20","paid_amount":"19.5"}}"#;
        let event = SettlementEvent::parse(body).unwrap();

        assert_eq!(event.external_invoice_id, "5512");
        assert_eq!(event.paid_amount, Some(Decimal::from_str("19.5").unwrap()));
        assert_eq!(event.currency, Some(Currency::new("USDT").unwrap()));
        assert!(event.signals_payment());
    }

    #[test]
    fn test_parse_string_invoice_id_and_amount_fallback() {
        let body = br#"{"update_id":8,"update_type":"invoice_paid","payload":{"invoice_id":"IV-1","status":"paid","amount":20}}"#;
        let event = SettlementEvent::parse(body).unwrap();

        assert_eq!(event.external_invoice_id, "IV-1");
        assert_eq!(event.paid_amount, Some(Decimal::from(20)));
        assert!(event.currency.is_none());
    }

    #[test]
    fn test_unknown_status_is_kept_as_none() {
        let body = br#"{"update_id":9,"update_type":"invoice_refunded","payload":{"invoice_id":1,"status":"refunded"}}"#;
        let event = SettlementEvent::parse(body).unwrap();
        assert!(event.status.is_none());
        assert!(!event.signals_payment());
        assert!(!event.signals_expiry());
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(SettlementEvent::parse(b"not json").is_err());
        assert!(SettlementEvent::parse(br#"{"update_id":1}"#).is_err());
        assert!(
            SettlementEvent::parse(
                br#"{"update_id":1,"update_type":"invoice_paid","payload":{"invoice_id":1,"status":"paid","asset":"no such"}}"#
            )
            .is_err()
        );
    }

    #[test]
    fn test_amount_beyond_column_range_is_malformed() {
        let body = br#"{"update_id":1,"update_type":"invoice_paid","payload":{"invoice_id":1,"status":"paid","asset":"USDT","paid_amount":"79228162514264337593543950335"}}"#;
        let err = SettlementEvent::parse(body).unwrap_err();
        assert!(err.contains("out of range"), "{}", err);
    }

    #[test]
    fn test_observed_paid_signals_payment() {
        assert!(SettlementEvent::observed("1", InvoiceStatus::Paid).signals_payment());
        assert!(SettlementEvent::observed("1", InvoiceStatus::Expired).signals_expiry());
    }
}

//! Deposit Service
//!
//! Creates payable invoices. No ledger effect here: the credit happens when
//! the settlement webhook (or the invoice reconciler) observes the payment.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::error::FundingError;
use super::network::{CreatedInvoice, PaymentNetwork};
use super::types::{Invoice, InvoiceStatus};
use crate::core_types::{Currency, UserId};
use crate::money::MoneyError;
use crate::store::{Store, StoreError};
use crate::validation::ValidationError;

pub struct DepositService {
    store: Arc<dyn Store>,
    network: Arc<dyn PaymentNetwork>,
}

impl DepositService {
    pub fn new(store: Arc<dyn Store>, network: Arc<dyn PaymentNetwork>) -> Self {
        Self { store, network }
    }

    /// Record a local invoice, create it on the network, then store the external id
    pub async fn create_invoice(
        &self,
        user_id: UserId,
        currency: &Currency,
        amount: Decimal,
    ) -> Result<Invoice, FundingError> {
        if amount <= Decimal::ZERO {
            return Err(FundingError::ValidationFailed(
                ValidationError::InvalidAmount(MoneyError::NotPositive),
            ));
        }

        let invoice = Invoice::new(user_id, currency.clone(), amount);
        let mut uow = self.store.begin().await?;
        uow.insert_invoice(&invoice).await?;
        uow.commit().await?;

        let created = match self
            .network
            .create_invoice(amount, currency, user_id, invoice.id)
            .await
        {
            Ok(created) => created,
            Err(e) => {
                warn!(invoice_id = %invoice.id, error = %e, "Invoice creation failed");
                if let Err(e) = self.expire(&invoice).await {
                    warn!(invoice_id = %invoice.id, error = %e, "Could not expire abandoned invoice");
                }
                return Err(FundingError::ExternalCallFailed(e));
            }
        };

        if let Err(e) = self.record_external(&invoice, &created).await {
            error!(
                invoice_id = %invoice.id,
                external_id = %created.external_id,
                error = %e,
                "Invoice created remotely but external id not recorded"
            );
            return Err(FundingError::Persistence(e));
        }

        info!(
            invoice_id = %invoice.id,
            external_id = %created.external_id,
            user_id,
            currency = %currency,
            amount = %amount,
            "Invoice created"
        );

        Ok(Invoice {
            external_id: Some(created.external_id),
            pay_url: Some(created.pay_url),
            ..invoice
        })
    }

    async fn record_external(
        &self,
        invoice: &Invoice,
        created: &CreatedInvoice,
    ) -> Result<(), StoreError> {
        let mut uow = self.store.begin().await?;
        uow.set_invoice_external(invoice.id, &created.external_id, Some(&created.pay_url))
            .await?;
        uow.commit().await
    }

    /// Expire a local invoice that never made it to the network
    async fn expire(&self, invoice: &Invoice) -> Result<(), StoreError> {
        let mut uow = self.store.begin().await?;
        uow.update_invoice_status(invoice.id, InvoiceStatus::Expired, invoice.amount)
            .await?;
        uow.commit().await
    }
}

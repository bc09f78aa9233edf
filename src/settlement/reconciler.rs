//! Invoice reconciler
//!
//! Polls the payment network for invoices that stayed `Active` longer than
//! expected (a lost or rejected webhook) and feeds the observed status through
//! [`SettlementService::apply_event`], so a late webhook and the reconciler
//! still credit at most once.

use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::event::SettlementEvent;
use super::service::{SettlementOutcome, SettlementService};
use crate::funding::network::PaymentNetwork;
use crate::funding::types::InvoiceStatus;
use crate::store::{Store, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    pub interval_secs: u64,
    /// Only invoices older than this are polled
    pub stale_after_secs: u64,
    pub batch_size: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            stale_after_secs: 300,
            batch_size: 50,
        }
    }
}

/// Summary of one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub checked: usize,
    pub credited: usize,
    pub expired: usize,
    pub failed: usize,
}

pub struct InvoiceReconciler {
    store: Arc<dyn Store>,
    network: Arc<dyn PaymentNetwork>,
    settlement: Arc<SettlementService>,
    config: ReconcilerConfig,
}

impl InvoiceReconciler {
    pub fn new(
        store: Arc<dyn Store>,
        network: Arc<dyn PaymentNetwork>,
        settlement: Arc<SettlementService>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            network,
            settlement,
            config,
        }
    }

    /// Run forever, one pass per interval
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.interval_secs.max(1)));
        info!(
            interval_secs = self.config.interval_secs,
            stale_after_secs = self.config.stale_after_secs,
            "Invoice reconciler started"
        );
        loop {
            ticker.tick().await;
            match self.reconcile_once().await {
                Ok(report) if report.checked > 0 => info!(?report, "Reconciliation pass"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Reconciliation pass failed"),
            }
        }
    }

    pub async fn reconcile_once(&self) -> Result<ReconcileReport, StoreError> {
        let cutoff = Utc::now() - ChronoDuration::seconds(self.config.stale_after_secs as i64);
        let stale = self
            .store
            .stale_active_invoices(cutoff, self.config.batch_size)
            .await?;

        let mut report = ReconcileReport::default();
        for invoice in stale {
            let Some(external_id) = invoice.external_id.as_deref() else {
                continue;
            };
            report.checked += 1;

            let status = match self.network.get_invoice_status(external_id).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(invoice_id = %invoice.id, error = %e, "Invoice status lookup failed");
                    report.failed += 1;
                    continue;
                }
            };
            if status == InvoiceStatus::Active {
                debug!(invoice_id = %invoice.id, "Invoice still active");
                continue;
            }

            let event = SettlementEvent::observed(external_id, status);
            match self.settlement.apply_event(&event).await {
                Ok(SettlementOutcome::Credited { .. }) => report.credited += 1,
                Ok(SettlementOutcome::Expired) => report.expired += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(invoice_id = %invoice.id, code = e.code(), error = %e, "Reconciliation apply failed");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}

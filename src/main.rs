use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use chatpay::config::AppConfig;
use chatpay::conversation::{
    ConversationService, ConversationStore, MemoryConversationStore, PgConversationStore,
};
use chatpay::db::Database;
use chatpay::funding::{
    CryptoPayClient, DepositService, FinalizationWorker, PaymentNetwork, TransactionCoordinator,
};
use chatpay::gateway::{self, state::AppState};
use chatpay::ledger::Ledger;
use chatpay::logging::init_logging;
use chatpay::settlement::{InvoiceReconciler, SettlementService};
use chatpay::store::{MemoryStore, PgStore, Store};
use chatpay::transport::{ChatTransport, LogTransport, RelayTransport};
use chatpay::validation::ValidationGate;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Get port override from command line (--port argument)
fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Ctrl-C handler failed, shutting down");
    }
    info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env)?;
    let _guard = init_logging(&config);
    info!(env = %env, version = env!("GIT_HASH"), "Starting chatpay");

    let (store, states): (Arc<dyn Store>, Arc<dyn ConversationStore>) =
        match &config.postgres_url {
            Some(url) => {
                let db = Database::connect(url)
                    .await
                    .context("Failed to connect to PostgreSQL")?;
                db.init_schema().await.context("Failed to create schema")?;
                let pool = db.pool().clone();
                (
                    Arc::new(PgStore::new(pool.clone())),
                    Arc::new(PgConversationStore::new(pool)),
                )
            }
            None => {
                warn!("No postgres_url configured, using in-memory store");
                (
                    Arc::new(MemoryStore::new()),
                    Arc::new(MemoryConversationStore::new()),
                )
            }
        };

    let network: Arc<dyn PaymentNetwork> = Arc::new(CryptoPayClient::new(
        &config.crypto_pay.base_url,
        &config.crypto_pay.api_token,
        Duration::from_millis(config.crypto_pay.timeout_ms),
    )?);

    let transport: Arc<dyn ChatTransport> = match &config.relay.url {
        Some(url) => Arc::new(RelayTransport::new(
            url,
            config.relay.secret.clone(),
            Duration::from_millis(config.relay.timeout_ms),
        )?),
        None => {
            warn!("No relay url configured, replies are only logged");
            Arc::new(LogTransport)
        }
    };

    if config.webhook_secret.is_empty() {
        warn!("webhook_secret is empty, every settlement webhook will be rejected");
    }

    let ledger = Ledger::new(store.clone());
    let gate = ValidationGate::new(ledger.clone(), config.address);

    let (finalizer, finalization_queue) =
        FinalizationWorker::new(store.clone(), config.workers.finalization.clone());
    tokio::spawn(finalizer.run());

    let coordinator = Arc::new(
        TransactionCoordinator::new(store.clone(), gate.clone(), network.clone())
            .with_policy(config.compensation_policy)
            .with_finalizer(finalization_queue),
    );
    info!(policy = ?config.compensation_policy, "Transaction coordinator ready");

    let deposits = Arc::new(DepositService::new(store.clone(), network.clone()));
    let settlement = Arc::new(SettlementService::new(
        store.clone(),
        transport.clone(),
        config.webhook_secret.clone(),
    ));

    if config.workers.reconciler_enabled {
        let reconciler = InvoiceReconciler::new(
            store.clone(),
            network.clone(),
            settlement.clone(),
            config.workers.reconciler,
        );
        tokio::spawn(reconciler.run());
    }

    let conversations = Arc::new(ConversationService::new(
        states,
        gate,
        ledger,
        coordinator,
        deposits,
        network,
        transport,
        config.currencies.clone(),
    ));

    let state = Arc::new(AppState::new(
        settlement,
        conversations,
        store,
        config.relay.secret.clone(),
    ));

    let port = get_port_override().unwrap_or(config.gateway.port);
    gateway::run_server(&config.gateway.host, port, state, shutdown_signal())
        .await
        .context("Gateway server failed")?;

    info!("Gateway stopped");
    Ok(())
}

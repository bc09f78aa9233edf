//! HTTP gateway
//!
//! - `POST /webhook/crypto-pay` - settlement webhook, HMAC-signed by the provider
//! - `POST /api/v1/chat/events` - inbound chat events from the relay
//! - `GET /api/v1/internal/reconciliation` - manual reconciliation queue
//! - `GET /api/v1/health` - version and store health
//!
//! Relay and internal routes require `X-Relay-Secret` when a secret is configured.

pub mod handlers;
pub mod state;
pub mod types;

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::{Next, from_fn_with_state},
    response::Response,
    routing::{get, post},
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::transport::RELAY_SECRET_HEADER;
use state::AppState;
use types::{ApiResponse, error_codes};

type HmacSha256 = Hmac<Sha256>;

/// Constant-time secret comparison: both values are run through HMAC and the
/// tags compared by `verify_slice`
fn secret_matches(expected: &str, presented: &str) -> bool {
    let tag = |value: &str| {
        HmacSha256::new_from_slice(RELAY_SECRET_HEADER.as_bytes()).map(|mut mac| {
            mac.update(value.as_bytes());
            mac
        })
    };
    match (tag(expected), tag(presented)) {
        (Ok(expected), Ok(presented)) => presented
            .verify_slice(&expected.finalize().into_bytes())
            .is_ok(),
        _ => false,
    }
}

/// Reject requests without the configured relay secret
async fn relay_secret_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, Json<ApiResponse<()>>)> {
    if let Some(expected) = &state.relay_secret {
        let presented = request
            .headers()
            .get(RELAY_SECRET_HEADER)
            .and_then(|v| v.to_str().ok());
        if !presented.is_some_and(|p| secret_matches(expected, p)) {
            warn!(path = %request.uri().path(), "Relay secret mismatch");
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(ApiResponse::<()>::error(
                    error_codes::AUTH_FAILED,
                    "invalid relay secret",
                )),
            ));
        }
    }
    Ok(next.run(request).await)
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let relay_routes = Router::new()
        .route("/api/v1/chat/events", post(handlers::chat_event))
        .route(
            "/api/v1/internal/reconciliation",
            get(handlers::reconciliation_queue),
        )
        .route_layer(from_fn_with_state(state.clone(), relay_secret_middleware));

    Router::new()
        .route("/webhook/crypto-pay", post(handlers::crypto_pay_webhook))
        .route("/api/v1/health", get(handlers::health_check))
        .merge(relay_routes)
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn run_server(
    host: &str,
    port: u16,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "Gateway listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{ConversationService, MemoryConversationStore};
    use crate::core_types::Currency;
    use crate::funding::types::Invoice;
    use crate::funding::{DepositService, TransactionCoordinator};
    use crate::ledger::Ledger;
    use crate::settlement::{SIGNATURE_HEADER, SettlementService, sign};
    use crate::store::{MemoryStore, Store};
    use crate::testing::{MockNetwork, RecordingTransport};
    use crate::validation::{AddressRules, ValidationGate};
    use http_body_util::BodyExt;
    use rust_decimal::Decimal;
    use tower::ServiceExt;

    const SECRET: &str = "hook-secret";

    fn app(store: &MemoryStore, relay_secret: Option<&str>) -> Router {
        let store: Arc<dyn Store> = Arc::new(store.clone());
        let network = Arc::new(MockNetwork::new());
        let transport = Arc::new(RecordingTransport::new());
        let ledger = Ledger::new(store.clone());
        let gate = ValidationGate::new(ledger.clone(), AddressRules::default());
        let conversations = ConversationService::new(
            Arc::new(MemoryConversationStore::new()),
            gate.clone(),
            ledger,
            Arc::new(TransactionCoordinator::new(
                store.clone(),
                gate,
                network.clone(),
            )),
            Arc::new(DepositService::new(store.clone(), network.clone())),
            network,
            transport.clone(),
            vec![Currency::new("USDT").unwrap()],
        );
        let settlement = SettlementService::new(store.clone(), transport, SECRET);
        build_router(Arc::new(AppState::new(
            Arc::new(settlement),
            Arc::new(conversations),
            store,
            relay_secret.map(String::from),
        )))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn webhook(body: &str, signature: Option<String>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/webhook/crypto-pay")
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header(SIGNATURE_HEADER, signature);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app(&MemoryStore::new(), None)
            .oneshot(
                Request::builder()
                    .uri("/api/v1/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["code"], 0);
        assert_eq!(json["data"]["store"], "ok");
    }

    #[tokio::test]
    async fn test_webhook_status_mapping() {
        let store = MemoryStore::new();
        let invoice = Invoice::new(5, Currency::new("USDT").unwrap(), Decimal::from(20));
        let mut uow = store.begin().await.unwrap();
        uow.insert_invoice(&invoice).await.unwrap();
        uow.set_invoice_external(invoice.id, "100", None)
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let paid = r#"{"update_id":1,"update_type":"invoice_paid","payload":{"invoice_id":100,"status":"paid","asset":"USDT","amount":"20"}}"#;
        let unknown = r#"{"update_id":2,"update_type":"invoice_paid","payload":{"invoice_id":101,"status":"paid","asset":"USDT","amount":"20"}}"#;

        let response = app(&store, None)
            .oneshot(webhook(paid, Some(sign(SECRET, paid.as_bytes()))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["data"]["outcome"], "credited");

        let response = app(&store, None)
            .oneshot(webhook(paid, Some(sign(SECRET, paid.as_bytes()))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["data"]["outcome"], "duplicate");

        let response = app(&store, None)
            .oneshot(webhook(paid, Some(sign("wrong", paid.as_bytes()))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app(&store, None)
            .oneshot(webhook("{}", Some(sign(SECRET, b"{}"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app(&store, None)
            .oneshot(webhook(unknown, Some(sign(SECRET, unknown.as_bytes()))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        assert_eq!(
            store
                .balance(5, &Currency::new("USDT").unwrap())
                .await
                .unwrap(),
            Some(Decimal::from(20))
        );
    }

    #[tokio::test]
    async fn test_chat_events_require_relay_secret() {
        let event = r#"{"chat_id":1,"user_id":1,"kind":"command","command":"start"}"#;
        let request = |secret: Option<&str>| {
            let mut builder = Request::builder()
                .method("POST")
                .uri("/api/v1/chat/events")
                .header("content-type", "application/json");
            if let Some(secret) = secret {
                builder = builder.header(RELAY_SECRET_HEADER, secret);
            }
            builder.body(Body::from(event)).unwrap()
        };

        let router = app(&MemoryStore::new(), Some("relay"));
        let response = router.clone().oneshot(request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = router.clone().oneshot(request(Some("relax"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = router.oneshot(request(Some("relay"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_secret_matches() {
        assert!(secret_matches("relay", "relay"));
        assert!(!secret_matches("relay", "relay2"));
        assert!(!secret_matches("relay", "rela"));
        assert!(!secret_matches("relay", ""));
    }

    #[tokio::test]
    async fn test_unreadable_chat_event() {
        let response = app(&MemoryStore::new(), None)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/chat/events")
                    .body(Body::from("{\"chat_id\":1}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_reconciliation_listing() {
        let response = app(&MemoryStore::new(), None)
            .oneshot(
                Request::builder()
                    .uri("/api/v1/internal/reconciliation")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["data"], serde_json::json!([]));
    }
}

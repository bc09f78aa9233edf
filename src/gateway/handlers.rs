use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, warn};

use super::state::AppState;
use super::types::{ApiResponse, HealthResponse, SettlementResponse, error_codes};
use crate::conversation::InboundEvent;
use crate::funding::types::ReconciliationItem;
use crate::settlement::{SIGNATURE_HEADER, SettlementError};

type ApiError = (StatusCode, Json<ApiResponse<()>>);

fn settlement_error(e: &SettlementError) -> ApiError {
    let code = match e {
        SettlementError::SignatureInvalid => error_codes::SIGNATURE_INVALID,
        SettlementError::MalformedPayload(_) => error_codes::MALFORMED_PAYLOAD,
        SettlementError::InvoiceNotFound(_) => error_codes::INVOICE_NOT_FOUND,
        SettlementError::Persistence(_) => error_codes::INTERNAL_ERROR,
    };
    let status =
        StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    // keep storage details out of the response
    let msg = match e {
        SettlementError::Persistence(_) => "internal error".to_string(),
        other => other.to_string(),
    };
    (status, Json(ApiResponse::<()>::error(code, msg)))
}

/// POST /webhook/crypto-pay
///
/// Signature is checked against the raw body, so the body is taken as bytes.
pub async fn crypto_pay_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse<SettlementResponse>>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    match state
        .settlement
        .handle_settlement_event(&body, signature)
        .await
    {
        Ok(outcome) => Ok(Json(ApiResponse::success(SettlementResponse::from(
            &outcome,
        )))),
        Err(e) => {
            if let SettlementError::Persistence(inner) = &e {
                error!(error = %inner, "Settlement not persisted, provider will redeliver");
            }
            Err(settlement_error(&e))
        }
    }
}

/// POST /api/v1/chat/events
pub async fn chat_event(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let event: InboundEvent = serde_json::from_slice(&body).map_err(|e| {
        warn!(error = %e, "Unreadable chat event");
        (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<()>::error(
                error_codes::INVALID_PARAMETER,
                format!("invalid event: {}", e),
            )),
        )
    })?;

    state.conversations.handle(event).await;

    Ok(Json(ApiResponse {
        code: error_codes::SUCCESS,
        msg: "ok".to_string(),
        data: None,
    }))
}

/// GET /api/v1/health
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ApiResponse<HealthResponse>>) {
    let (status, store) = match state.store.health_check().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(e) => {
            error!(error = %e, "Store health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    };

    (
        status,
        Json(ApiResponse::success(HealthResponse {
            version: env!("GIT_HASH"),
            store,
            timestamp_ms: Utc::now().timestamp_millis(),
        })),
    )
}

/// GET /api/v1/internal/reconciliation
pub async fn reconciliation_queue(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<ReconciliationItem>>>, ApiError> {
    let items = state.store.reconciliation_items().await.map_err(|e| {
        error!(error = %e, "Reconciliation queue unavailable");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::<()>::error(
                error_codes::SERVICE_UNAVAILABLE,
                "store unavailable",
            )),
        )
    })?;
    Ok(Json(ApiResponse::success(items)))
}

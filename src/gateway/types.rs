//! API response envelope and DTOs

use serde::Serialize;

use crate::settlement::SettlementOutcome;

/// Unified API response wrapper
///
/// - code: 0 = success, non-zero = error code
/// - msg: short description
/// - data: payload on success
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: i32, msg: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            code,
            msg: msg.into(),
            data: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub version: &'static str,
    pub store: &'static str,
    pub timestamp_ms: i64,
}

/// Result of a webhook delivery
#[derive(Debug, Serialize)]
pub struct SettlementResponse {
    pub outcome: &'static str,
}

impl From<&SettlementOutcome> for SettlementResponse {
    fn from(outcome: &SettlementOutcome) -> Self {
        let outcome = match outcome {
            SettlementOutcome::Credited { .. } => "credited",
            SettlementOutcome::Duplicate => "duplicate",
            SettlementOutcome::Expired => "expired",
            SettlementOutcome::Ignored => "ignored",
        };
        Self { outcome }
    }
}

/// Standard API error codes
pub mod error_codes {
    pub const SUCCESS: i32 = 0;

    // Client errors (1xxx)
    pub const INVALID_PARAMETER: i32 = 1001;
    pub const MALFORMED_PAYLOAD: i32 = 1003;

    // Auth errors (2xxx)
    pub const AUTH_FAILED: i32 = 2002;
    pub const SIGNATURE_INVALID: i32 = 2003;

    // Resource errors (4xxx)
    pub const INVOICE_NOT_FOUND: i32 = 4002;

    // Server errors (5xxx)
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const SERVICE_UNAVAILABLE: i32 = 5001;
}

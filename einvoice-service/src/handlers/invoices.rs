use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Serialize;
use serde_json::Value;
use service_core::error::{AppError, FieldError};
use service_core::middleware::api_key::ApiKey;

use super::header_str;
use crate::models::{resolve_tenant, InvoiceStatusValue, Order, SubmissionRecord};
use crate::services::submission::{SubmitOutcome, SubmitRequest};
use crate::startup::AppState;

pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";
pub const IDEMPOTENCY_HEADER_FALLBACK: &str = "x-idempotency-key";
pub const TENANT_HEADER: &str = "x-tenant-id";
pub const CACHE_HEADER: &str = "x-idempotency-cache";

#[derive(Debug, Serialize)]
pub struct SubmissionResponse {
    #[serde(flatten)]
    pub record: SubmissionRecord,
    pub replay: bool,
}

/// `POST /v0/invoices`
pub async fn submit_invoice(
    State(state): State<AppState>,
    Extension(ApiKey(api_key)): Extension<ApiKey>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let idempotency_key = header_str(&headers, IDEMPOTENCY_HEADER)
        .or_else(|| header_str(&headers, IDEMPOTENCY_HEADER_FALLBACK))
        .ok_or_else(|| {
            AppError::BadRequest(
                "missing_idempotency_key",
                anyhow::anyhow!("Idempotency-Key header is required"),
            )
        })?
        .to_string();
    let tenant = resolve_tenant(header_str(&headers, TENANT_HEADER));

    let raw_body: Value = serde_json::from_slice(&body).map_err(|e| {
        AppError::BadRequest("invalid_json", anyhow::anyhow!("Request body is not valid JSON: {e}"))
    })?;
    let order: Order = serde_json::from_value(raw_body.clone()).map_err(|e| AppError::Unprocessable {
        message: "Order could not be parsed".to_string(),
        fields: vec![FieldError::new("body", e.to_string())],
    })?;

    let outcome = state
        .submissions
        .submit(SubmitRequest {
            api_key,
            tenant,
            idempotency_key,
            order,
            raw_body,
        })
        .await?;

    let (status, cache) = match &outcome {
        SubmitOutcome::Fresh(_) => (StatusCode::ACCEPTED, "MISS"),
        SubmitOutcome::Replay(_) => (StatusCode::OK, "HIT"),
    };
    let replay = outcome.is_replay();
    let record = match outcome {
        SubmitOutcome::Fresh(record) | SubmitOutcome::Replay(record) => record,
    };

    let mut response = (status, Json(SubmissionResponse { record, replay })).into_response();
    response
        .headers_mut()
        .insert(CACHE_HEADER, HeaderValue::from_static(cache));
    Ok(response)
}

/// `GET /v0/invoices/{invoiceId}`
pub async fn get_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<InvoiceStatusValue>, AppError> {
    let tenant = resolve_tenant(header_str(&headers, TENANT_HEADER));
    let value = state
        .reconciler
        .refresh(&tenant, invoice_id.trim())
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice {invoice_id} not found")))?;
    Ok(Json(value))
}

//! Signed status callbacks from access-point providers.
//!
//! Checks run in a fixed order: signature, event timestamp, freshness,
//! replay, payload. Nothing is recorded until every check has passed.

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use chrono::Utc;
use secrecy::{ExposeSecret, Secret};
use serde_json::{json, Value};
use service_core::error::AppError;
use service_core::utils::signature::verify_body_signature;
use std::time::{Duration, Instant};

use super::header_str;
use super::invoices::TENANT_HEADER;
use crate::guards::{ap_event_key, scrada_event_key};
use crate::services::metrics;
use crate::services::reconciliation::{
    is_fresh, parse_event_timestamp, ApStatusEvent, ReconcileOutcome, ScradaEvent,
};
use crate::startup::AppState;

pub const SCRADA_SIGNATURE_HEADER: &str = "x-scrada-signature";
pub const SCRADA_TIMESTAMP_HEADER: &str = "x-scrada-timestamp";
pub const AP_SIGNATURE_HEADER: &str = "x-ap-signature";
pub const EVENT_ID_HEADER: &str = "x-event-id";
pub const EVENT_TIMESTAMP_HEADER: &str = "x-event-timestamp";

fn unauthorized(code: &'static str, message: &str) -> AppError {
    AppError::Unauthorized(code, anyhow::anyhow!(message.to_string()))
}

fn bad_request(code: &'static str, message: &str) -> AppError {
    AppError::BadRequest(code, anyhow::anyhow!(message.to_string()))
}

/// Signature, timestamp and freshness checks shared by both webhooks.
fn authenticate(
    secret: Option<&Secret<String>>,
    headers: &HeaderMap,
    body: &[u8],
    signature_header: &str,
    timestamp_headers: &[&str],
    max_age: Duration,
) -> Result<(), AppError> {
    let secret = secret.ok_or_else(|| {
        AppError::ConfigError(anyhow::anyhow!("webhook secret is not configured"))
    })?;

    let signature = header_str(headers, signature_header)
        .ok_or_else(|| unauthorized("invalid_signature", "Missing webhook signature"))?;
    if !verify_body_signature(secret.expose_secret(), body, signature) {
        return Err(unauthorized("invalid_signature", "Invalid webhook signature"));
    }

    let raw_ts = timestamp_headers
        .iter()
        .find_map(|name| header_str(headers, name))
        .ok_or_else(|| bad_request("invalid_event_timestamp", "Missing event timestamp"))?;
    let ts = parse_event_timestamp(raw_ts)
        .ok_or_else(|| bad_request("invalid_event_timestamp", "Unparseable event timestamp"))?;
    if !is_fresh(ts, Utc::now(), max_age) {
        return Err(unauthorized("stale_event", "Event timestamp outside the allowed window"));
    }
    Ok(())
}

/// `POST /webhooks/scrada`
pub async fn scrada_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let started = Instant::now();
    let result = handle_scrada(&state, &headers, &body).await;
    if let Err(e) = &result {
        tracing::warn!(code = e.code(), error = %e, "Scrada webhook rejected");
    }
    metrics::record_webhook("scrada", result.is_ok(), started.elapsed());
    result.map(Json)
}

async fn handle_scrada(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<Value, AppError> {
    let webhooks = &state.config.webhooks;
    authenticate(
        webhooks.scrada_secret.as_ref(),
        headers,
        body,
        SCRADA_SIGNATURE_HEADER,
        &[SCRADA_TIMESTAMP_HEADER, EVENT_TIMESTAMP_HEADER],
        webhooks.max_age,
    )?;

    let event: ScradaEvent = serde_json::from_slice(body)
        .map_err(|e| bad_request("invalid_json", &format!("Invalid webhook body: {e}")))?;
    let data = match (&event.data, event.is_status_update()) {
        (Some(data), true) => data,
        _ => return Ok(json!({ "ok": true, "ignored": true })),
    };
    let document_id = data
        .document_id()
        .ok_or_else(|| bad_request("invalid_payload", "Missing documentId"))?;
    if data.status().is_none() {
        return Err(bad_request("invalid_payload", "Missing status"));
    }

    let key = scrada_event_key(
        event.event_id(),
        document_id,
        data.occurred_at(),
        data.external_reference(),
    );
    if !state.replay.first_seen(&key) {
        tracing::info!(%key, "Duplicate Scrada event acknowledged");
        return Ok(json!({ "ok": true, "duplicate": true }));
    }

    match state.reconciler.apply_scrada(data).await {
        Ok(ReconcileOutcome::Unmatched) => Ok(json!({ "ok": true, "ignored": true })),
        Ok(ReconcileOutcome::Applied(value)) | Ok(ReconcileOutcome::Unchanged(value)) => {
            Ok(json!({ "ok": true, "status": value.status }))
        }
        Err(e) => {
            state.replay.forget(&key);
            Err(e.into())
        }
    }
}

/// `POST /ap/status-webhook`
pub async fn ap_status_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let started = Instant::now();
    let result = handle_ap(&state, &headers, &body).await;
    if let Err(e) = &result {
        tracing::warn!(code = e.code(), error = %e, "AP status webhook rejected");
    }
    metrics::record_webhook("ap", result.is_ok(), started.elapsed());
    result.map(Json)
}

async fn handle_ap(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<Value, AppError> {
    let webhooks = &state.config.webhooks;
    authenticate(
        webhooks.ap_secret.as_ref(),
        headers,
        body,
        AP_SIGNATURE_HEADER,
        &[EVENT_TIMESTAMP_HEADER],
        webhooks.max_age,
    )?;

    let event_id = header_str(headers, EVENT_ID_HEADER)
        .ok_or_else(|| bad_request("missing_event_id", "Missing x-event-id header"))?;
    let key = ap_event_key(event_id);
    if !state.replay.first_seen(&key) {
        tracing::info!(%event_id, "Duplicate AP event acknowledged");
        return Ok(json!({ "ok": true, "duplicate": true }));
    }

    let parsed: Result<ApStatusEvent, _> = if body.iter().all(u8::is_ascii_whitespace) {
        Ok(ApStatusEvent::default())
    } else {
        serde_json::from_slice(body)
    };
    let update = match parsed {
        Ok(event) => event.into_update(header_str(headers, TENANT_HEADER)),
        Err(e) => {
            state.replay.forget(&key);
            return Err(bad_request("invalid_json", &format!("Invalid webhook body: {e}")));
        }
    };
    let Some(update) = update else {
        state.replay.forget(&key);
        return Err(bad_request(
            "invalid_payload",
            "invoiceId, providerId and a known status are required",
        ));
    };

    match state.reconciler.apply(update).await {
        Ok(ReconcileOutcome::Applied(value)) | Ok(ReconcileOutcome::Unchanged(value)) => {
            tracing::info!(
                %event_id,
                tenant = %value.tenant,
                invoice_id = %value.invoice_id,
                status = %value.status,
                "AP status webhook processed"
            );
            Ok(json!({ "ok": true, "status": value.status }))
        }
        Ok(ReconcileOutcome::Unmatched) => Ok(json!({ "ok": true, "ignored": true })),
        Err(e) => {
            state.replay.forget(&key);
            Err(e.into())
        }
    }
}

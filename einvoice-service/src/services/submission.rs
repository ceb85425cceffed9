//! Invoice submission: idempotency, tax computation, rendering, archival and
//! delivery for one order.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use service_core::error::{AppError, FieldError};
use service_core::utils::signature::sha256_hex;
use std::sync::Arc;
use thiserror::Error;

use super::metrics;
use super::tax::{compute_invoice, TaxError};
use crate::codec::render_ubl;
use crate::delivery::{DeliveryError, DeliveryJob, DeliveryOptions, DeliveryOrchestrator, DeliveryReport};
use crate::guards::{IdempotencyGuard, Reservation};
use crate::models::submission::normalize_submission_status;
use crate::models::{DlqItem, Order, SubmissionArtifacts, SubmissionRecord};
use crate::stores::{ArtifactStore, StatusStore, StoreError, SubmissionStore};

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("order failed validation")]
    Validation(Vec<FieldError>),

    #[error("a request with this idempotency key is still in progress")]
    InFlight,

    #[error("invoice {invoice_id}: {source}")]
    Delivery {
        invoice_id: String,
        #[source]
        source: DeliveryError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<TaxError> for SubmissionError {
    fn from(err: TaxError) -> Self {
        match err {
            TaxError::Validation(fields) => SubmissionError::Validation(fields),
        }
    }
}

impl From<SubmissionError> for AppError {
    fn from(err: SubmissionError) -> Self {
        match err {
            SubmissionError::Validation(fields) => AppError::Unprocessable {
                message: "Order validation failed".to_string(),
                fields,
            },
            SubmissionError::InFlight => AppError::Conflict(
                "idempotency_in_flight",
                anyhow::anyhow!("A request with this idempotency key is still in progress"),
            ),
            SubmissionError::Delivery { invoice_id, source } => AppError::BadGateway(
                "delivery_failed",
                source.to_string(),
                Some(invoice_id),
            ),
            SubmissionError::Store(e) => e.into(),
        }
    }
}

/// One accepted `POST /v0/invoices` call.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub api_key: String,
    pub tenant: String,
    pub idempotency_key: String,
    pub order: Order,
    /// Request body as received, archived as `request.json`.
    pub raw_body: Value,
}

#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    Fresh(SubmissionRecord),
    Replay(SubmissionRecord),
}

impl SubmitOutcome {
    pub fn is_replay(&self) -> bool {
        matches!(self, SubmitOutcome::Replay(_))
    }

    pub fn record(&self) -> &SubmissionRecord {
        match self {
            SubmitOutcome::Fresh(record) | SubmitOutcome::Replay(record) => record,
        }
    }
}

/// Archived result of the provider call.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendArtifact<'a> {
    adapter: &'a str,
    ok: bool,
    attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<&'a crate::adapters::SendOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dlq_id: Option<&'a str>,
    sent_at: chrono::DateTime<Utc>,
}

#[derive(Clone)]
pub struct SubmissionService {
    orchestrator: DeliveryOrchestrator,
    idempotency: IdempotencyGuard,
    submissions: Arc<SubmissionStore>,
    status: Arc<StatusStore>,
    artifacts: ArtifactStore,
}

impl SubmissionService {
    pub fn new(
        orchestrator: DeliveryOrchestrator,
        idempotency: IdempotencyGuard,
        submissions: Arc<SubmissionStore>,
        status: Arc<StatusStore>,
        artifacts: ArtifactStore,
    ) -> Self {
        Self {
            orchestrator,
            idempotency,
            submissions,
            status,
            artifacts,
        }
    }

    /// Short digest identifying the caller. Raw credentials never sit in the
    /// cache or the submission log.
    pub fn owner_digest(api_key: &str) -> String {
        let mut digest = sha256_hex(api_key);
        digest.truncate(16);
        digest
    }

    /// Cache key for an API key and idempotency key.
    pub fn cache_key(api_key: &str, idempotency_key: &str) -> String {
        IdempotencyGuard::cache_key(&Self::owner_digest(api_key), idempotency_key)
    }

    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitOutcome, SubmissionError> {
        let cache_key = Self::cache_key(&request.api_key, &request.idempotency_key);
        let handle = match self.idempotency.reserve(&cache_key) {
            Reservation::Replay(record) => {
                metrics::record_idempotency_hit();
                tracing::info!(
                    tenant = %record.tenant,
                    invoice_id = %record.invoice_id,
                    "Idempotent replay served from cache"
                );
                return Ok(SubmitOutcome::Replay(record));
            }
            Reservation::InFlight => return Err(SubmissionError::InFlight),
            Reservation::Fresh(handle) => handle,
        };

        let owner = Self::owner_digest(&request.api_key);
        let scope = SubmissionRecord::scope_for(&request.tenant, &request.idempotency_key);
        if let Some(record) = self.submissions.get(&owner, &scope) {
            metrics::record_idempotency_hit();
            tracing::info!(%scope, invoice_id = %record.invoice_id, "Idempotent replay served from store");
            handle.complete(record.clone());
            return Ok(SubmitOutcome::Replay(record));
        }

        let invoice = compute_invoice(&request.order)?;
        let ubl_xml = render_ubl(&invoice);
        let invoice_id = uuid::Uuid::now_v7().to_string();
        let external_reference = invoice
            .order
            .external_reference()
            .unwrap_or(invoice.order.order_number.as_str())
            .to_string();
        let tenant = request.tenant.as_str();

        tracing::info!(
            %tenant,
            %invoice_id,
            %external_reference,
            payable_minor = invoice.totals.payable_minor,
            "Submitting invoice"
        );

        let mut artifacts = SubmissionArtifacts {
            request: self
                .archive_json(tenant, &invoice_id, "request.json", &request.raw_body)
                .await,
            invoice: self.archive_xml(tenant, &invoice_id, &ubl_xml).await,
            ..SubmissionArtifacts::default()
        };

        let job = DeliveryJob {
            tenant,
            invoice_id: &invoice_id,
            external_reference: &external_reference,
            order: &invoice.order,
            invoice: &invoice,
            ubl_xml: &ubl_xml,
        };
        let result = self
            .orchestrator
            .send_with_retry(job, DeliveryOptions::default())
            .await;

        let adapter = self.orchestrator.adapter().name();
        let send_artifact = match &result {
            Ok(report) => SendArtifact {
                adapter,
                ok: true,
                attempts: report.attempts,
                outcome: Some(&report.outcome),
                error: None,
                dlq_id: None,
                sent_at: Utc::now(),
            },
            Err(err) => SendArtifact {
                adapter,
                ok: false,
                attempts: err.attempts(),
                outcome: None,
                error: Some(err.to_string()),
                dlq_id: err.dlq_id(),
                sent_at: Utc::now(),
            },
        };
        artifacts.send = self
            .archive_json(tenant, &invoice_id, "send.json", &send_artifact)
            .await;
        if let Some(status) = self.status.get(tenant, &invoice_id) {
            artifacts.status = self
                .archive_json(tenant, &invoice_id, "status.json", &status)
                .await;
        }

        let report = result.map_err(|source| SubmissionError::Delivery {
            invoice_id: invoice_id.clone(),
            source,
        })?;

        let now = Utc::now();
        let record = SubmissionRecord {
            scope,
            tenant: request.tenant.clone(),
            idempotency_key: request.idempotency_key.clone(),
            invoice_id,
            external_reference,
            document_id: Some(report.outcome.provider_id.clone()),
            status: normalize_submission_status(report.outcome.status.as_str()),
            buyer_reference: invoice.order.buyer_reference.clone(),
            channel: report.outcome.channel.map(|c| c.as_str().to_string()),
            artifacts,
            created_at: now,
            updated_at: now,
        };
        self.submissions.put(&owner, &record).await?;
        handle.complete(record.clone());
        Ok(SubmitOutcome::Fresh(record))
    }

    /// Re-send a dead-lettered invoice under its original id. Failures are
    /// reported, not dead-lettered again.
    pub async fn redeliver(&self, item: &DlqItem) -> Result<DeliveryReport, SubmissionError> {
        let invoice = compute_invoice(&item.payload.order)?;
        let ubl_xml = render_ubl(&invoice);
        let external_reference = invoice
            .order
            .external_reference()
            .unwrap_or(invoice.order.order_number.as_str())
            .to_string();
        let job = DeliveryJob {
            tenant: &item.tenant,
            invoice_id: &item.invoice_id,
            external_reference: &external_reference,
            order: &invoice.order,
            invoice: &invoice,
            ubl_xml: &ubl_xml,
        };
        self.orchestrator
            .send_with_retry(job, DeliveryOptions { skip_dlq: true })
            .await
            .map_err(|source| SubmissionError::Delivery {
                invoice_id: item.invoice_id.clone(),
                source,
            })
    }

    async fn archive_json<T: Serialize>(
        &self,
        tenant: &str,
        invoice_id: &str,
        name: &str,
        value: &T,
    ) -> Option<String> {
        match self.artifacts.write_json(tenant, invoice_id, name, value).await {
            Ok(path) => Some(path.display().to_string()),
            Err(e) => {
                tracing::warn!(%tenant, %invoice_id, artifact = name, error = %e, "Failed to archive artifact");
                None
            }
        }
    }

    async fn archive_xml(&self, tenant: &str, invoice_id: &str, xml: &str) -> Option<String> {
        match self.artifacts.write_text(tenant, invoice_id, "invoice.xml", xml).await {
            Ok(path) => Some(path.display().to_string()),
            Err(e) => {
                tracing::warn!(%tenant, %invoice_id, error = %e, "Failed to archive invoice XML");
                None
            }
        }
    }
}

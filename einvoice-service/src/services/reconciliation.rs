//! Status reconciliation from provider callbacks and live lookups.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::status::map_scrada_status;
use crate::adapters::ApAdapter;
use crate::models::{resolve_tenant, DeliveryStatus, InvoiceStatusValue};
use crate::stores::{ArtifactStore, StatusStore, StatusUpdate, StoreError, SubmissionStore};

pub const SCRADA_STATUS_TOPIC: &str = "peppolOutboundDocument/statusUpdate";

/// Event timestamp header: digits are epoch seconds (up to 10 digits) or
/// milliseconds, anything else must be RFC 3339.
pub fn parse_event_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.bytes().all(|b| b.is_ascii_digit()) {
        let value: i64 = trimmed.parse().ok()?;
        return if trimmed.len() <= 10 {
            Utc.timestamp_opt(value, 0).single()
        } else {
            Utc.timestamp_millis_opt(value).single()
        };
    }
    DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// True when `ts` lies within `max_age` of `now` in either direction.
pub fn is_fresh(ts: DateTime<Utc>, now: DateTime<Utc>, max_age: Duration) -> bool {
    let skew = (now - ts).num_milliseconds().unsigned_abs();
    skew <= max_age.as_millis() as u64
}

/// Body of `POST /ap/status-webhook`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApStatusEvent {
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub invoice_id: Option<String>,
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub attempts: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

fn trimmed(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl ApStatusEvent {
    /// Validate into a status update. `None` when a required field is
    /// missing or the status is outside the vocabulary.
    pub fn into_update(self, fallback_tenant: Option<&str>) -> Option<StatusUpdate> {
        let invoice_id = trimmed(&self.invoice_id)?;
        let provider_id = trimmed(&self.provider_id)?;
        let status = DeliveryStatus::parse(trimmed(&self.status)?)?;
        let tenant = resolve_tenant(trimmed(&self.tenant).or(fallback_tenant));

        let mut update = StatusUpdate::new(tenant, invoice_id, status).provider_id(provider_id);
        if let Some(attempts) = self.attempts.filter(|a| a.is_finite()) {
            update = update.attempts(attempts.max(0.0).floor() as u32);
        }
        if let Some(error) = trimmed(&self.error) {
            update = update.last_error(error);
        }
        Some(update)
    }
}

/// Scrada webhook envelope.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScradaEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub data: Option<ScradaEventData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScradaEventData {
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub external_reference: Option<String>,
    #[serde(default)]
    pub occurred_at: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl ScradaEvent {
    pub fn is_status_update(&self) -> bool {
        self.topic.as_deref().map(str::trim) == Some(SCRADA_STATUS_TOPIC)
    }

    pub fn event_id(&self) -> &str {
        trimmed(&self.id).unwrap_or_default()
    }
}

impl ScradaEventData {
    pub fn document_id(&self) -> Option<&str> {
        trimmed(&self.document_id)
    }

    pub fn status(&self) -> Option<&str> {
        trimmed(&self.status)
    }

    pub fn external_reference(&self) -> Option<&str> {
        trimmed(&self.external_reference)
    }

    pub fn occurred_at(&self) -> Option<&str> {
        trimmed(&self.occurred_at)
    }
}

#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    Applied(InvoiceStatusValue),
    /// The lattice kept the prior status.
    Unchanged(InvoiceStatusValue),
    /// No known invoice matched the event.
    Unmatched,
}

#[derive(Clone)]
pub struct Reconciler {
    status: Arc<StatusStore>,
    submissions: Arc<SubmissionStore>,
    artifacts: ArtifactStore,
    adapter: Arc<dyn ApAdapter>,
}

impl Reconciler {
    pub fn new(
        status: Arc<StatusStore>,
        submissions: Arc<SubmissionStore>,
        artifacts: ArtifactStore,
        adapter: Arc<dyn ApAdapter>,
    ) -> Self {
        Self {
            status,
            submissions,
            artifacts,
            adapter,
        }
    }

    /// Upsert through the lattice and refresh `status.json` when it moved.
    pub async fn apply(&self, update: StatusUpdate) -> Result<ReconcileOutcome, StoreError> {
        let write = self.status.upsert(update).await?;
        if !write.applied {
            return Ok(ReconcileOutcome::Unchanged(write.value));
        }

        let value = write.value;
        if let Err(e) = self
            .artifacts
            .write_json(&value.tenant, &value.invoice_id, "status.json", &value)
            .await
        {
            tracing::warn!(
                tenant = %value.tenant,
                invoice_id = %value.invoice_id,
                error = %e,
                "Failed to archive status"
            );
        }
        tracing::info!(
            tenant = %value.tenant,
            invoice_id = %value.invoice_id,
            status = %value.status,
            "Invoice status reconciled"
        );
        Ok(ReconcileOutcome::Applied(value))
    }

    /// Map a Scrada status event onto the invoice it refers to.
    pub async fn apply_scrada(&self, data: &ScradaEventData) -> Result<ReconcileOutcome, StoreError> {
        let Some(raw_status) = data.status() else {
            return Ok(ReconcileOutcome::Unmatched);
        };
        let record = data
            .document_id()
            .and_then(|id| self.submissions.find_by_document(id))
            .or_else(|| {
                data.external_reference()
                    .and_then(|r| self.submissions.find_by_external_reference(r))
            });
        let Some(record) = record else {
            tracing::info!(
                document_id = data.document_id().unwrap_or("-"),
                "Scrada event for unknown document"
            );
            return Ok(ReconcileOutcome::Unmatched);
        };

        let status = map_scrada_status(raw_status);
        let mut update = StatusUpdate::new(record.tenant, record.invoice_id, status);
        if let Some(document_id) = data.document_id() {
            update = update.provider_id(document_id);
        }
        if status == DeliveryStatus::Error {
            let message = trimmed(&data.error_message)
                .map(str::to_string)
                .unwrap_or_else(|| format!("provider status {raw_status}"));
            update = update.last_error(message);
        }
        self.apply(update).await
    }

    /// Current status, refreshed from the provider while still in flight.
    /// Provider failures fall back to the stored value.
    pub async fn refresh(
        &self,
        tenant: &str,
        invoice_id: &str,
    ) -> Result<Option<InvoiceStatusValue>, StoreError> {
        let Some(current) = self.status.get(tenant, invoice_id) else {
            return Ok(None);
        };
        let provider_id = match (&current.provider_id, current.status) {
            (Some(id), DeliveryStatus::Queued | DeliveryStatus::Sent) => id.clone(),
            _ => return Ok(Some(current)),
        };

        match self.adapter.get_status(&provider_id).await {
            Ok(next) if next != current.status => {
                let update = StatusUpdate::new(tenant, invoice_id, next).provider_id(provider_id);
                Ok(Some(match self.apply(update).await? {
                    ReconcileOutcome::Applied(value) | ReconcileOutcome::Unchanged(value) => value,
                    ReconcileOutcome::Unmatched => current,
                }))
            }
            Ok(_) => Ok(Some(current)),
            Err(e) => {
                tracing::warn!(
                    %tenant,
                    %invoice_id,
                    %provider_id,
                    error = %e,
                    "Provider status refresh failed"
                );
                Ok(Some(current))
            }
        }
    }
}

use chrono::Utc;
use dashmap::DashMap;
use std::path::PathBuf;

use super::{JsonlLog, StoreError};
use crate::models::{DeliveryStatus, InvoiceStatusValue};

/// Partial status observation merged into the current value.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub tenant: String,
    pub invoice_id: String,
    pub status: DeliveryStatus,
    pub provider_id: Option<String>,
    pub attempts: Option<u32>,
    pub last_error: Option<String>,
}

impl StatusUpdate {
    pub fn new(tenant: impl Into<String>, invoice_id: impl Into<String>, status: DeliveryStatus) -> Self {
        Self {
            tenant: tenant.into(),
            invoice_id: invoice_id.into(),
            status,
            provider_id: None,
            attempts: None,
            last_error: None,
        }
    }

    pub fn provider_id(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }

    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn last_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }
}

/// Result of an upsert. `applied` is false when the lattice refused the move
/// and `value` is then the unchanged prior record.
#[derive(Debug, Clone)]
pub struct StatusWrite {
    pub value: InvoiceStatusValue,
    pub applied: bool,
}

type StatusKey = (String, String);

/// Latest status per (tenant, invoice), persisted as a JSONL history.
pub struct StatusStore {
    log: JsonlLog<InvoiceStatusValue>,
    index: DashMap<StatusKey, InvoiceStatusValue>,
}

impl StatusStore {
    /// Open the log and rebuild the index. Later lines win.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let log: JsonlLog<InvoiceStatusValue> = JsonlLog::new(path);
        let index = DashMap::new();
        for value in log.read_all().await? {
            index.insert((value.tenant.clone(), value.invoice_id.clone()), value);
        }
        tracing::debug!(path = %log.path().display(), entries = index.len(), "Status store opened");
        Ok(Self { log, index })
    }

    pub fn get(&self, tenant: &str, invoice_id: &str) -> Option<InvoiceStatusValue> {
        self.index
            .get(&(tenant.to_string(), invoice_id.to_string()))
            .map(|entry| entry.value().clone())
    }

    /// Merge `update` into the current value through the forward-only lattice.
    pub async fn upsert(&self, update: StatusUpdate) -> Result<StatusWrite, StoreError> {
        let _guard = self.log.lock().await;
        let key = (update.tenant.clone(), update.invoice_id.clone());
        let prior = self.index.get(&key).map(|entry| entry.value().clone());

        if let Some(prior) = &prior {
            if !prior.status.can_transition_to(update.status) {
                tracing::debug!(
                    tenant = %update.tenant,
                    invoice_id = %update.invoice_id,
                    from = %prior.status,
                    to = %update.status,
                    "Status transition refused"
                );
                return Ok(StatusWrite {
                    value: prior.clone(),
                    applied: false,
                });
            }
        }

        let last_error = match update.status {
            DeliveryStatus::Error => update
                .last_error
                .or_else(|| prior.as_ref().and_then(|p| p.last_error.clone())),
            _ => update.last_error,
        };
        let value = InvoiceStatusValue {
            tenant: update.tenant,
            invoice_id: update.invoice_id,
            status: update.status,
            provider_id: update
                .provider_id
                .or_else(|| prior.as_ref().and_then(|p| p.provider_id.clone())),
            attempts: update
                .attempts
                .or_else(|| prior.as_ref().map(|p| p.attempts))
                .unwrap_or(0),
            last_error,
            updated_at: Utc::now(),
        };

        self.log.append_locked(&value).await?;
        self.index.insert(key, value.clone());
        Ok(StatusWrite {
            value,
            applied: true,
        })
    }
}

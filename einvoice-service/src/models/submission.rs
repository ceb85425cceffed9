use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Paths of the files archived for a submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionArtifacts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// One accepted submission, keyed by `{tenant}:{idempotencyKey}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRecord {
    pub scope: String,
    pub tenant: String,
    pub idempotency_key: String,
    pub invoice_id: String,
    pub external_reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default)]
    pub artifacts: SubmissionArtifacts,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubmissionRecord {
    pub fn scope_for(tenant: &str, idempotency_key: &str) -> String {
        format!("{tenant}:{idempotency_key}")
    }
}

/// Upper-case with whitespace runs collapsed to `_`.
pub fn normalize_submission_status(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_uppercase()
}

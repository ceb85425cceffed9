use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::order::Order;

/// Everything needed to replay a failed delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DlqPayload {
    pub order: Order,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    pub adapter: String,
    pub ubl_xml: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DlqItem {
    pub id: String,
    pub tenant: String,
    pub invoice_id: String,
    pub error: String,
    pub payload: DlqPayload,
    pub ts: DateTime<Utc>,
}

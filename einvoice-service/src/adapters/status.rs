//! Provider status vocabularies mapped onto [`DeliveryStatus`].

use crate::models::DeliveryStatus;

fn normalize(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

/// Status reported in a send response. Unknown values count as queued.
pub fn map_send_status(raw: &str) -> DeliveryStatus {
    match normalize(raw).as_str() {
        "sent" | "submitted" | "transmitted" | "completed" | "processed" | "success" => {
            DeliveryStatus::Sent
        }
        "failed" | "error" | "rejected" | "declined" => DeliveryStatus::Error,
        _ => DeliveryStatus::Queued,
    }
}

/// Status reported by a status lookup. Unknown values count as sent.
pub fn map_delivery_status(raw: &str) -> DeliveryStatus {
    match normalize(raw).as_str() {
        "delivered" | "delivery_confirmed" | "completed" | "processed" | "success" | "done" => {
            DeliveryStatus::Delivered
        }
        "failed" | "error" | "rejected" | "declined" => DeliveryStatus::Error,
        "queued" | "pending" | "processing" | "received" | "accepted" => DeliveryStatus::Queued,
        _ => DeliveryStatus::Sent,
    }
}

/// Scrada outbound document status, upper-cased with `_` for whitespace.
/// Anything outside the known sets is an error.
pub fn map_scrada_status(raw: &str) -> DeliveryStatus {
    let normalized = crate::models::submission::normalize_submission_status(raw);
    match normalized.as_str() {
        "DELIVERED" | "DELIVERY_CONFIRMED" | "ACCEPTED" | "COMPLETED" | "SUCCESS" => {
            DeliveryStatus::Delivered
        }
        "SENT" | "SENT_TO_PEPPOL" | "DISPATCHED" => DeliveryStatus::Sent,
        "QUEUED" | "PENDING" | "RECEIVED" | "PROCESSING" | "CREATED" => DeliveryStatus::Queued,
        _ => DeliveryStatus::Error,
    }
}

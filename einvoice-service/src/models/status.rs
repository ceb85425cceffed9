use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed delivery status vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Queued,
    Sent,
    Delivered,
    Error,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Queued => "queued",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "queued" => Some(DeliveryStatus::Queued),
            "sent" => Some(DeliveryStatus::Sent),
            "delivered" => Some(DeliveryStatus::Delivered),
            "error" => Some(DeliveryStatus::Error),
            _ => None,
        }
    }

    /// Forward-only lattice. `delivered` is terminal, `error` may be re-opened
    /// by a retry, and re-observing the current status is always allowed.
    pub fn can_transition_to(self, next: DeliveryStatus) -> bool {
        use DeliveryStatus::*;
        if self == next {
            return true;
        }
        match (self, next) {
            (Delivered, _) => false,
            (Sent, Queued) => false,
            (Queued, _) | (Sent, _) | (Error, _) => true,
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest known status of one invoice for one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceStatusValue {
    pub tenant: String,
    pub invoice_id: String,
    pub status: DeliveryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::DeliveryStatus::*;
    use super::*;

    #[test]
    fn delivered_is_terminal() {
        for next in [Queued, Sent, Error] {
            assert!(!Delivered.can_transition_to(next));
        }
        assert!(Delivered.can_transition_to(Delivered));
    }

    #[test]
    fn sent_never_returns_to_queued() {
        assert!(!Sent.can_transition_to(Queued));
        assert!(Sent.can_transition_to(Delivered));
        assert!(Sent.can_transition_to(Error));
    }

    #[test]
    fn error_can_be_reopened() {
        assert!(Error.can_transition_to(Queued));
        assert!(Error.can_transition_to(Sent));
        assert!(Queued.can_transition_to(Error));
    }

    #[test]
    fn parse_round_trips_known_values() {
        assert_eq!(DeliveryStatus::parse(" Delivered "), Some(Delivered));
        assert_eq!(DeliveryStatus::parse("bogus"), None);
        assert_eq!(
            serde_json::to_string(&Queued).unwrap(),
            "\"queued\"".to_string()
        );
    }
}

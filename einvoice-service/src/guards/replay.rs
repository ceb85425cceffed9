use std::time::Duration;

use super::TtlCache;

/// Remembers webhook event keys so redelivered events become no-ops.
pub struct ReplayGuard {
    seen: TtlCache<()>,
}

impl ReplayGuard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            seen: TtlCache::new(ttl),
        }
    }

    /// Record `key`. Returns false when it was already seen.
    pub fn first_seen(&self, key: &str) -> bool {
        self.seen.insert_if_absent(key, ())
    }

    /// Undo a record so a failed event can be redelivered.
    pub fn forget(&self, key: &str) {
        self.seen.remove(key);
    }

    pub fn reset(&self) {
        self.seen.reset();
    }
}

/// `scrada:{eventId}:{documentId}:{occurredAt|externalReference}`.
pub fn scrada_event_key(
    event_id: &str,
    document_id: &str,
    occurred_at: Option<&str>,
    external_reference: Option<&str>,
) -> String {
    let discriminator = occurred_at.or(external_reference).unwrap_or("");
    format!("scrada:{event_id}:{document_id}:{discriminator}")
}

pub fn ap_event_key(event_id: &str) -> String {
    format!("ap:{event_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_are_detected_until_forgotten() {
        let guard = ReplayGuard::new(Duration::from_secs(60));
        let key = ap_event_key("evt-1");
        assert!(guard.first_seen(&key));
        assert!(!guard.first_seen(&key));
        guard.forget(&key);
        assert!(guard.first_seen(&key));
    }

    #[test]
    fn scrada_keys_prefer_occurrence_time() {
        assert_eq!(
            scrada_event_key("e", "d", Some("2024-05-01T10:00:00Z"), Some("INV-1")),
            "scrada:e:d:2024-05-01T10:00:00Z"
        );
        assert_eq!(scrada_event_key("e", "d", None, Some("INV-1")), "scrada:e:d:INV-1");
        assert_eq!(scrada_event_key("e", "d", None, None), "scrada:e:d:");
    }
}

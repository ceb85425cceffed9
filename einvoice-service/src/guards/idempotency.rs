use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::TtlCache;
use crate::models::SubmissionRecord;

/// Outcome of trying to claim an idempotency key.
pub enum Reservation {
    /// First request for the key; the handle releases the claim on drop.
    Fresh(ReservationHandle),
    /// A completed submission already exists.
    Replay(SubmissionRecord),
    /// Another request holds the key right now.
    InFlight,
}

struct Inner {
    completed: TtlCache<SubmissionRecord>,
    in_flight: DashMap<String, Instant>,
}

/// Submission cache keyed by `{apiKey}:{idempotencyKey}`.
#[derive(Clone)]
pub struct IdempotencyGuard {
    inner: Arc<Inner>,
}

impl IdempotencyGuard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                completed: TtlCache::new(ttl),
                in_flight: DashMap::new(),
            }),
        }
    }

    pub fn cache_key(api_key_id: &str, idempotency_key: &str) -> String {
        format!("{api_key_id}:{idempotency_key}")
    }

    pub fn lookup(&self, key: &str) -> Option<SubmissionRecord> {
        self.inner.completed.get(key)
    }

    pub fn reserve(&self, key: &str) -> Reservation {
        if let Some(record) = self.inner.completed.get(key) {
            return Reservation::Replay(record);
        }

        match self.inner.in_flight.entry(key.to_string()) {
            Entry::Occupied(_) => return Reservation::InFlight,
            Entry::Vacant(vacant) => {
                vacant.insert(Instant::now());
            }
        }

        // A request may have completed between the lookup and the claim.
        if let Some(record) = self.inner.completed.get(key) {
            self.inner.in_flight.remove(key);
            return Reservation::Replay(record);
        }

        Reservation::Fresh(ReservationHandle {
            inner: Arc::clone(&self.inner),
            key: key.to_string(),
        })
    }

    /// Seed the cache, e.g. from a record found in the persistent store.
    pub fn remember(&self, key: &str, record: SubmissionRecord) {
        self.inner.completed.insert(key, record);
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    pub fn reset(&self) {
        self.inner.completed.reset();
        self.inner.in_flight.clear();
    }
}

/// Claim on one idempotency key. Dropping it without completing releases
/// the key so the client may retry.
pub struct ReservationHandle {
    inner: Arc<Inner>,
    key: String,
}

impl ReservationHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Publish the finished record, then release the claim.
    pub fn complete(self, record: SubmissionRecord) {
        self.inner.completed.insert(self.key.clone(), record);
    }
}

impl Drop for ReservationHandle {
    fn drop(&mut self) {
        self.inner.in_flight.remove(&self.key);
    }
}

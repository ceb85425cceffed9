use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Concurrent map whose entries expire `ttl` after insertion.
///
/// Inserts sweep expired entries at most once per `ttl`, so keys that are
/// never read again still leave the map.
#[derive(Debug)]
pub struct TtlCache<V> {
    entries: DashMap<String, (V, Instant)>,
    ttl: Duration,
    next_purge: Mutex<Instant>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            next_purge: Mutex::new(Instant::now() + ttl),
        }
    }

    /// Sweep when the purge interval has elapsed. Must not be called while
    /// holding a reference into `entries`.
    fn purge_if_due(&self, now: Instant) {
        let Ok(mut next) = self.next_purge.try_lock() else {
            return;
        };
        if now < *next {
            return;
        }
        *next = now + self.ttl;
        drop(next);
        let purged = self.purge_expired();
        if purged > 0 {
            tracing::debug!(purged, "Purged expired cache entries");
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            let (value, expires_at) = entry.value();
            if *expires_at > now {
                return Some(value.clone());
            }
        }
        self.entries.remove_if(key, |_, (_, expires_at)| *expires_at <= now);
        None
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        let now = Instant::now();
        self.purge_if_due(now);
        self.entries.insert(key.into(), (value, now + self.ttl));
    }

    /// Insert unless a live entry exists. Returns true when inserted.
    pub fn insert_if_absent(&self, key: impl Into<String>, value: V) -> bool {
        let now = Instant::now();
        self.purge_if_due(now);
        match self.entries.entry(key.into()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().1 > now {
                    false
                } else {
                    occupied.insert((value, now + self.ttl));
                    true
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert((value, now + self.ttl));
                true
            }
        }
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.entries.remove(key).map(|(_, (value, _))| value)
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, (_, expires_at)| *expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn reset(&self) {
        self.entries.clear();
    }
}

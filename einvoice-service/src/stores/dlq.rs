use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

use super::{JsonlLog, StoreError};
use crate::models::DlqItem;

/// A dead-lettered item, or a marker that an earlier item was cleared.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum DlqEntry {
    Removed {
        removed: String,
        ts: DateTime<Utc>,
    },
    Item(DlqItem),
}

/// Durable record of deliveries that failed terminally.
///
/// The file is only ever appended to. Removal writes a tombstone line that
/// is folded away on read, so the server and the CLI can share the file.
pub struct DlqStore {
    log: JsonlLog<DlqEntry>,
}

impl DlqStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            log: JsonlLog::new(path),
        }
    }

    pub async fn append(&self, item: &DlqItem) -> Result<(), StoreError> {
        self.log.append(&DlqEntry::Item(item.clone())).await?;
        tracing::warn!(
            dlq_id = %item.id,
            tenant = %item.tenant,
            invoice_id = %item.invoice_id,
            error = %item.error,
            "Delivery dead-lettered"
        );
        Ok(())
    }

    /// Items oldest first, optionally filtered by tenant and capped.
    pub async fn list(
        &self,
        tenant: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<DlqItem>, StoreError> {
        let items = self
            .live_items()
            .await?
            .into_iter()
            .filter(|item| tenant.map_or(true, |t| item.tenant == t));
        Ok(match limit {
            Some(limit) => items.take(limit).collect(),
            None => items.collect(),
        })
    }

    /// Items with no later tombstone, in file order.
    async fn live_items(&self) -> Result<Vec<DlqItem>, StoreError> {
        let mut items: Vec<DlqItem> = Vec::new();
        for entry in self.log.read_all().await? {
            match entry {
                DlqEntry::Item(item) => items.push(item),
                DlqEntry::Removed { removed, .. } => items.retain(|item| item.id != removed),
            }
        }
        Ok(items)
    }

    /// Drop the given ids. Returns how many entries were removed.
    pub async fn remove(&self, ids: &[String]) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();

        let _guard = self.log.lock().await;
        let live: HashSet<String> = self
            .live_items()
            .await?
            .into_iter()
            .map(|item| item.id)
            .filter(|id| wanted.contains(id.as_str()))
            .collect();
        for id in &live {
            let tombstone = DlqEntry::Removed {
                removed: id.clone(),
                ts: Utc::now(),
            };
            self.log.append_locked(&tombstone).await?;
        }
        Ok(live.len())
    }
}

use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::StoreError;

/// Per-invoice files under `{root}/{tenant}/{invoiceId}/`.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

/// Keep a caller-supplied name inside its directory.
fn path_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        cleaned
    }
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, tenant: &str, invoice_id: &str) -> PathBuf {
        self.root
            .join(path_component(tenant))
            .join(path_component(invoice_id))
    }

    pub async fn write_json<T: Serialize>(
        &self,
        tenant: &str,
        invoice_id: &str,
        name: &str,
        value: &T,
    ) -> Result<PathBuf, StoreError> {
        let body = serde_json::to_vec_pretty(value)?;
        self.write_bytes(tenant, invoice_id, name, &body).await
    }

    pub async fn write_text(
        &self,
        tenant: &str,
        invoice_id: &str,
        name: &str,
        text: &str,
    ) -> Result<PathBuf, StoreError> {
        self.write_bytes(tenant, invoice_id, name, text.as_bytes()).await
    }

    async fn write_bytes(
        &self,
        tenant: &str,
        invoice_id: &str,
        name: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, StoreError> {
        let dir = self.dir(tenant, invoice_id);
        fs::create_dir_all(&dir).await?;
        let path = dir.join(path_component(name));
        fs::write(&path, bytes).await?;
        Ok(path)
    }
}

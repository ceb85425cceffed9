use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::io::SeekFrom;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Mutex, MutexGuard};

use super::StoreError;

/// Append-only log with one JSON document per line.
///
/// Appends are serialized through the log's mutex and opened with `O_APPEND`,
/// so other processes appending to the same file never overwrite a line.
/// Lines that fail to parse are skipped on read so a torn final line never
/// blocks startup, and the next append starts on a fresh line.
#[derive(Debug)]
pub struct JsonlLog<T> {
    path: PathBuf,
    lock: Mutex<()>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonlLog<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hold the write lock across a read-modify-write sequence.
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }

    pub async fn append(&self, value: &T) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        self.append_locked(value).await
    }

    /// Append while the caller already holds [`JsonlLog::lock`].
    pub async fn append_locked(&self, value: &T) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(value)?;
        line.push(b'\n');

        ensure_parent(&self.path).await?;
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .await?;
        if file.metadata().await?.len() > 0 {
            file.seek(SeekFrom::End(-1)).await?;
            let mut last = [0u8; 1];
            file.read_exact(&mut last).await?;
            if last[0] != b'\n' {
                line.insert(0, b'\n');
            }
        }
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    /// Every readable record in file order. A missing file reads as empty.
    pub async fn read_all(&self) -> Result<Vec<T>, StoreError> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (index, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(line) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(
                    path = %self.path.display(),
                    line = index + 1,
                    error = %e,
                    "Skipping unreadable log line"
                ),
            }
        }
        Ok(records)
    }
}

async fn ensure_parent(path: &Path) -> Result<(), std::io::Error> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent).await,
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Entry {
        n: u32,
    }

    #[tokio::test]
    async fn append_then_read_skips_torn_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlLog::<Entry>::new(dir.path().join("nested/log.jsonl"));

        log.append(&Entry { n: 1 }).await.unwrap();
        log.append(&Entry { n: 2 }).await.unwrap();
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(log.path())
            .await
            .unwrap();
        file.write_all(b"{\"n\":").await.unwrap();
        file.flush().await.unwrap();

        assert_eq!(
            log.read_all().await.unwrap(),
            vec![Entry { n: 1 }, Entry { n: 2 }]
        );
    }

    #[tokio::test]
    async fn append_after_torn_line_starts_a_new_line() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlLog::<Entry>::new(dir.path().join("log.jsonl"));
        log.append(&Entry { n: 1 }).await.unwrap();
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(log.path())
            .await
            .unwrap();
        file.write_all(b"{\"n\":").await.unwrap();
        file.flush().await.unwrap();
        drop(file);

        log.append(&Entry { n: 3 }).await.unwrap();

        let reopened = JsonlLog::<Entry>::new(log.path());
        assert_eq!(
            reopened.read_all().await.unwrap(),
            vec![Entry { n: 1 }, Entry { n: 3 }]
        );
        let raw = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(raw.lines().count(), 3);
    }

    #[tokio::test]
    async fn missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlLog::<Entry>::new(dir.path().join("absent.jsonl"));
        assert!(log.read_all().await.unwrap().is_empty());
    }
}

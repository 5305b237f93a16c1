//! JSON file row store.
//!
//! The whole row set lives in one file as a JSON array of wire-format rows.
//! A batch is merged into a copy, written to a sibling temp file and renamed
//! over the original, so a failed batch never leaves a partial file behind.

use super::{merge_batch, RowStore};
use crate::error::StoreResult;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use sync_types::{Row, Side};
use tokio::sync::Mutex;

/// Row store backed by a JSON file.
#[derive(Debug)]
pub struct JsonFileStore {
    side: Side,
    path: PathBuf,
    /// Serializes read-modify-write cycles.
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open a store at `path`. The file is created on the first write.
    pub fn new(side: Side, path: impl Into<PathBuf>) -> Self {
        Self {
            side,
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_rows(&self) -> StoreResult<Vec<Row>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) if contents.trim().is_empty() => Ok(Vec::new()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_rows(&self, rows: &[Row]) -> StoreResult<()> {
        let contents = serde_json::to_string_pretty(rows)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, contents).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl RowStore for JsonFileStore {
    fn side(&self) -> Side {
        self.side
    }

    async fn fetch_all_rows(&self) -> StoreResult<Vec<Row>> {
        self.read_rows().await
    }

    async fn apply_inserts(&self, rows: &[Row]) -> StoreResult<()> {
        self.apply_batch(rows, &[]).await
    }

    async fn apply_updates(&self, rows: &[Row]) -> StoreResult<()> {
        self.apply_batch(&[], rows).await
    }

    async fn apply_batch(&self, inserts: &[Row], updates: &[Row]) -> StoreResult<()> {
        if inserts.is_empty() && updates.is_empty() {
            return Ok(());
        }

        let _guard = self.write_lock.lock().await;
        let mut rows = self.read_rows().await?;
        merge_batch(&mut rows, inserts, updates)?;
        self.write_rows(&rows).await?;

        tracing::debug!(
            "{}: wrote {} rows to {}",
            self.side,
            rows.len(),
            self.path.display()
        );
        Ok(())
    }
}

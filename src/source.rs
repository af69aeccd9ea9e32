//! Metadata sources and the outbound record store.
//!
//! `MetadataSource` is the inbound contract: one fetch per session, per
//! table and form context, trusted as ordered. `RecordStore` is the
//! outbound contract invoked on an allowed submit. Both are async traits
//! with mock implementations for tests.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

use crate::metadata::FormMetadata;
use crate::state::RecordData;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("metadata fetch failed: {0}")]
    Fetch(String),

    #[error("metadata fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("metadata payload could not be decoded: {0}")]
    Decode(String),
}

/// Inbound metadata contract. Fetched once per session load; the ordered
/// lists in the payload are the evaluation order.
#[async_trait]
#[mockall::automock]
pub trait MetadataSource: Send + Sync {
    async fn fetch(&self, table: &str, form_context: &str)
        -> Result<FormMetadata, MetadataError>;
}

/// Reads `<root>/<table>.<form_context>.json`.
pub struct FileMetadataSource {
    root: PathBuf,
}

impl FileMetadataSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl MetadataSource for FileMetadataSource {
    async fn fetch(
        &self,
        table: &str,
        form_context: &str,
    ) -> Result<FormMetadata, MetadataError> {
        let path = self.root.join(format!("{}.{}.json", table, form_context));
        debug!(path = %path.display(), "loading metadata file");
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| MetadataError::Fetch(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&raw).map_err(|e| MetadataError::Decode(e.to_string()))
    }
}

/// In-memory source keyed by (table, form_context). Used by tests and by
/// embedders that already hold the payload.
#[derive(Default)]
pub struct StaticMetadataSource {
    entries: DashMap<(String, String), FormMetadata>,
}

impl StaticMetadataSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, metadata: FormMetadata) {
        self.entries.insert(
            (metadata.table.clone(), metadata.form_context.clone()),
            metadata,
        );
    }
}

#[async_trait]
impl MetadataSource for StaticMetadataSource {
    async fn fetch(
        &self,
        table: &str,
        form_context: &str,
    ) -> Result<FormMetadata, MetadataError> {
        self.entries
            .get(&(table.to_string(), form_context.to_string()))
            .map(|entry| entry.clone())
            .ok_or_else(|| {
                MetadataError::Fetch(format!("no metadata for {}/{}", table, form_context))
            })
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record store failed: {0}")]
    Save(String),
}

/// Outbound contract: invoked with the record snapshot of an allowed submit.
#[async_trait]
#[mockall::automock]
pub trait RecordStore: Send + Sync {
    async fn save(&self, table: &str, record: &RecordData) -> Result<(), StoreError>;
}

/// Keeps submitted records in memory, last write per table wins.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: DashMap<String, RecordData>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, table: &str) -> Option<RecordData> {
        self.records.get(table).map(|entry| entry.clone())
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn save(&self, table: &str, record: &RecordData) -> Result<(), StoreError> {
        debug!(%table, fields = record.len(), "saving record");
        self.records.insert(table.to_string(), record.clone());
        Ok(())
    }
}

//! Encounter persistence: a document store with per-record optimistic versioning.

use std::{collections::HashMap, future::Future, sync::Mutex};

use raid_proto::{decode_encounter, encode_encounter, CodecError, Encounter, EncounterId};
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("encounter {0} already exists")]
    Duplicate(EncounterId),
    #[error("encounter {id} is at version {actual}, expected {expected}")]
    VersionConflict {
        id: EncounterId,
        expected: u64,
        actual: u64,
    },
    #[error("encounter {0} not found")]
    NotFound(EncounterId),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::VersionConflict { .. })
    }
}

pub trait EncounterStore: Send + Sync {
    /// Latest committed record, `None` if it does not exist.
    fn load(
        &self,
        id: &EncounterId,
    ) -> impl Future<Output = Result<Option<Encounter>, StoreError>> + Send;

    /// Persist a brand new record as-is.
    fn insert(&self, record: &Encounter) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Replace the record only if the stored version still equals
    /// `expected_version`. The stored copy gets `expected_version + 1`, which
    /// is returned.
    fn commit(
        &self,
        expected_version: u64,
        record: &Encounter,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Ids of active encounters, optionally restricted to one region.
    fn list_active(
        &self,
        region: Option<String>,
    ) -> impl Future<Output = Result<Vec<EncounterId>, StoreError>> + Send;
}

#[derive(Debug)]
struct StoredDocument {
    version: u64,
    region: String,
    active: bool,
    bytes: Vec<u8>,
}

/// In-process store keeping bincode documents. The lock is only held inside
/// a single operation, never across an await.
#[derive(Debug, Default)]
pub struct InMemoryEncounterStore {
    documents: Mutex<HashMap<EncounterId, StoredDocument>>,
}

impl InMemoryEncounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.lock().expect("encounter store mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn document(record: &Encounter, version: u64) -> Result<StoredDocument, StoreError> {
        let mut stored = record.clone();
        stored.version = version;
        Ok(StoredDocument {
            version,
            region: stored.region.clone(),
            active: !stored.status.is_terminal(),
            bytes: encode_encounter(&stored)?,
        })
    }
}

impl EncounterStore for InMemoryEncounterStore {
    async fn load(&self, id: &EncounterId) -> Result<Option<Encounter>, StoreError> {
        tokio::task::yield_now().await;
        let bytes = {
            let guard = self.documents.lock().expect("encounter store mutex poisoned");
            guard.get(id).map(|document| document.bytes.clone())
        };
        match bytes {
            Some(bytes) => Ok(Some(decode_encounter(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, record: &Encounter) -> Result<(), StoreError> {
        let document = Self::document(record, record.version)?;
        tokio::task::yield_now().await;
        let mut guard = self.documents.lock().expect("encounter store mutex poisoned");
        if guard.contains_key(&record.id) {
            return Err(StoreError::Duplicate(record.id.clone()));
        }
        guard.insert(record.id.clone(), document);
        Ok(())
    }

    async fn commit(&self, expected_version: u64, record: &Encounter) -> Result<u64, StoreError> {
        let version = expected_version + 1;
        let document = Self::document(record, version)?;
        tokio::task::yield_now().await;
        let mut guard = self.documents.lock().expect("encounter store mutex poisoned");
        let current = guard
            .get_mut(&record.id)
            .ok_or_else(|| StoreError::NotFound(record.id.clone()))?;
        if current.version != expected_version {
            trace!(
                target: "raid::store",
                encounter = %record.id,
                expected = expected_version,
                actual = current.version,
                "store.commit_rejected"
            );
            return Err(StoreError::VersionConflict {
                id: record.id.clone(),
                expected: expected_version,
                actual: current.version,
            });
        }
        *current = document;
        trace!(target: "raid::store", encounter = %record.id, version, "store.committed");
        Ok(version)
    }

    async fn list_active(&self, region: Option<String>) -> Result<Vec<EncounterId>, StoreError> {
        tokio::task::yield_now().await;
        let guard = self.documents.lock().expect("encounter store mutex poisoned");
        let mut ids: Vec<EncounterId> = guard
            .iter()
            .filter(|(_, document)| document.active)
            .filter(|(_, document)| {
                region
                    .as_deref()
                    .map_or(true, |wanted| document.region.eq_ignore_ascii_case(wanted))
            })
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

//! Persistence Gateway
//!
//! Narrow async interface to the backing store. The engine round-trips the
//! conceptual record shape through it; no wire format is defined here.
//!
//! Writes are optimistic: `update` compares the caller's `updated_at` token
//! against the stored one and refuses stale writes, so cross-session races
//! surface as a retryable conflict instead of a silent overwrite.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use wir_poc_types::{AttachmentKind, EvidenceRef, InspectionRecord};

/// Gateway failure kinds. `Io` is transient and retryable; `Invalid` is a
/// backing-store validation rejection the engine surfaces verbatim.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("record {0} not found")]
    NotFound(Uuid),

    #[error("stale write for record {0}")]
    Conflict(Uuid),

    #[error("transient storage failure: {0}")]
    Io(String),

    #[error("store rejected write: {0}")]
    Invalid(String),
}

/// One file to persist as an attachment.
#[derive(Debug, Clone)]
pub struct AttachmentUpload {
    pub filename: String,
    pub kind: AttachmentKind,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Backing-store access for inspection records and their attachments.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Persist a new record, returning its id.
    async fn create(&self, record: &InspectionRecord) -> Result<Uuid, GatewayError>;

    /// Load the authoritative copy of a record.
    async fn load(&self, id: Uuid) -> Result<InspectionRecord, GatewayError>;

    /// Optimistic write: refused with [`GatewayError::Conflict`] when the
    /// record's `updated_at` no longer matches the stored token. On success
    /// returns the stored copy with a fresh token.
    async fn update(&self, record: &InspectionRecord) -> Result<InspectionRecord, GatewayError>;

    /// Highest dispatched version among records sharing a code, if any.
    async fn latest_version(&self, code: &str) -> Result<Option<u32>, GatewayError>;

    /// Persist one attachment for an item, returning its reference.
    async fn upload_attachment(
        &self,
        record_id: Uuid,
        item_id: Uuid,
        upload: &AttachmentUpload,
    ) -> Result<EvidenceRef, GatewayError>;

    /// Remove a persisted attachment.
    async fn delete_attachment(
        &self,
        record_id: Uuid,
        attachment_id: Uuid,
    ) -> Result<(), GatewayError>;
}

/// In-memory reference implementation backing the engine tests.
///
/// Failure injection: `fail_uploads_after(n)` makes every upload past the
/// n-th fail, `fail_next_delete()` fails the next attachment delete. Both
/// report as transient I/O.
pub struct InMemoryGateway {
    records: RwLock<HashMap<Uuid, InspectionRecord>>,
    uploads_until_failure: AtomicUsize,
    failing_deletes: AtomicUsize,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            uploads_until_failure: AtomicUsize::new(usize::MAX),
            failing_deletes: AtomicUsize::new(0),
        }
    }

    /// Allow `n` more uploads, then fail each subsequent one.
    pub fn fail_uploads_after(&self, n: usize) {
        self.uploads_until_failure.store(n, Ordering::SeqCst);
    }

    /// Fail the next attachment delete.
    pub fn fail_next_delete(&self) {
        self.failing_deletes.store(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryGateway {
    async fn create(&self, record: &InspectionRecord) -> Result<Uuid, GatewayError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(GatewayError::Invalid(format!(
                "record {} already exists",
                record.id
            )));
        }
        records.insert(record.id, record.clone());
        Ok(record.id)
    }

    async fn load(&self, id: Uuid) -> Result<InspectionRecord, GatewayError> {
        let records = self.records.read().await;
        records.get(&id).cloned().ok_or(GatewayError::NotFound(id))
    }

    async fn update(&self, record: &InspectionRecord) -> Result<InspectionRecord, GatewayError> {
        let mut records = self.records.write().await;
        let stored = records
            .get(&record.id)
            .ok_or(GatewayError::NotFound(record.id))?;

        if stored.updated_at != record.updated_at {
            return Err(GatewayError::Conflict(record.id));
        }

        let mut next = record.clone();
        next.updated_at = Utc::now();
        records.insert(next.id, next.clone());
        Ok(next)
    }

    async fn latest_version(&self, code: &str) -> Result<Option<u32>, GatewayError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.code == code)
            .filter_map(|r| r.version)
            .max())
    }

    async fn upload_attachment(
        &self,
        record_id: Uuid,
        item_id: Uuid,
        upload: &AttachmentUpload,
    ) -> Result<EvidenceRef, GatewayError> {
        let remaining = self.uploads_until_failure.load(Ordering::SeqCst);
        if remaining == 0 {
            return Err(GatewayError::Io(format!(
                "upload of {} failed",
                upload.filename
            )));
        }
        if remaining != usize::MAX {
            self.uploads_until_failure.store(remaining - 1, Ordering::SeqCst);
        }

        let mut records = self.records.write().await;
        let record = records
            .get_mut(&record_id)
            .ok_or(GatewayError::NotFound(record_id))?;
        let item = record
            .item_mut(item_id)
            .ok_or_else(|| GatewayError::Invalid(format!("item {item_id} not on record")))?;

        let evidence = EvidenceRef {
            id: Uuid::new_v4(),
            kind: upload.kind,
            url: format!("memory://{}/{}/{}", record_id, item_id, upload.filename),
            filename: upload.filename.clone(),
            uploaded_at: Utc::now(),
        };
        item.evidences.push(evidence.clone());
        Ok(evidence)
    }

    async fn delete_attachment(
        &self,
        record_id: Uuid,
        attachment_id: Uuid,
    ) -> Result<(), GatewayError> {
        if self.failing_deletes.swap(0, Ordering::SeqCst) > 0 {
            return Err(GatewayError::Io("delete confirmation failed".to_string()));
        }

        let mut records = self.records.write().await;
        let record = records
            .get_mut(&record_id)
            .ok_or(GatewayError::NotFound(record_id))?;
        for item in &mut record.items {
            item.evidences.retain(|e| e.id != attachment_id);
        }
        Ok(())
    }
}

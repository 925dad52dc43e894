//! Evidence Staging and Commit
//!
//! Attachments are staged in memory first and committed as one batch
//! immediately before a dependent transition. The per-item cap counts
//! persisted and staged files together. Commits upload sequentially and
//! stop at the first failure, so blame lands on a single file and
//! already-persisted attachments remain valid.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use wir_poc_types::{AttachmentKind, EvidenceRef, InspectionRecord, MAX_EVIDENCE_PER_ITEM};

use crate::gate::StagedCounts;
use crate::gateway::{AttachmentUpload, GatewayError, PersistenceGateway};

#[derive(Debug, thiserror::Error)]
pub enum EvidenceError {
    #[error("item {item_id} already has {limit} attachments (persisted + staged)")]
    CapExceeded { item_id: Uuid, limit: usize },

    #[error("duplicate file content staged for this item: {filename}")]
    DuplicateContent { filename: String },

    #[error("item {item_id} is not on record {record_id}")]
    UnknownItem { record_id: Uuid, item_id: Uuid },

    #[error("upload of {filename} failed: {source}")]
    Upload {
        filename: String,
        #[source]
        source: GatewayError,
    },

    #[error("delete of attachment {attachment_id} failed: {source}")]
    Delete {
        attachment_id: Uuid,
        #[source]
        source: GatewayError,
    },
}

/// A file staged for upload, with a content digest for duplicate detection.
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub upload: AttachmentUpload,
    pub digest: String,
}

impl StagedFile {
    pub fn new(
        filename: impl Into<String>,
        kind: AttachmentKind,
        content_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        let digest = format!("{:x}", Sha256::digest(&bytes));
        Self {
            upload: AttachmentUpload {
                filename: filename.into(),
                kind,
                content_type: content_type.into(),
                bytes,
            },
            digest,
        }
    }
}

/// Per-item staging area enforcing the attachment cap.
#[derive(Default)]
pub struct EvidenceStore {
    staged: RwLock<HashMap<(Uuid, Uuid), Vec<StagedFile>>>,
}

impl EvidenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a file for an item. Rejected when the item would exceed the
    /// cap (committed + staged) or when the same content is already staged
    /// for it; the existing files are left untouched either way.
    pub async fn stage(
        &self,
        record: &InspectionRecord,
        item_id: Uuid,
        file: StagedFile,
    ) -> Result<(), EvidenceError> {
        let item = record.item(item_id).ok_or(EvidenceError::UnknownItem {
            record_id: record.id,
            item_id,
        })?;

        let mut staged = self.staged.write().await;
        let bucket = staged.entry((record.id, item_id)).or_default();

        if item.evidences.len() + bucket.len() >= MAX_EVIDENCE_PER_ITEM {
            return Err(EvidenceError::CapExceeded {
                item_id,
                limit: MAX_EVIDENCE_PER_ITEM,
            });
        }
        if bucket.iter().any(|f| f.digest == file.digest) {
            return Err(EvidenceError::DuplicateContent {
                filename: file.upload.filename,
            });
        }

        debug!(record_id = %record.id, item_id = %item_id, filename = %file.upload.filename, "Staged attachment");
        bucket.push(file);
        Ok(())
    }

    /// Staged file counts per item for one record, for the validation gate.
    pub async fn staged_counts(&self, record_id: Uuid) -> StagedCounts {
        let staged = self.staged.read().await;
        staged
            .iter()
            .filter(|((rid, _), files)| *rid == record_id && !files.is_empty())
            .map(|((_, item_id), files)| (*item_id, files.len()))
            .collect()
    }

    /// Commit every staged file for a record as one batch, sequentially.
    ///
    /// Uploads stop at the first failure: files persisted so far stay
    /// committed on the record, the failed file and everything after it
    /// stay staged, and the error names the file to blame. The caller
    /// aborts its dependent transition on error.
    pub async fn commit_all(
        &self,
        gateway: &dyn PersistenceGateway,
        record: &mut InspectionRecord,
    ) -> Result<Vec<EvidenceRef>, EvidenceError> {
        let mut staged = self.staged.write().await;
        let mut committed = Vec::new();

        // Deterministic order: items as they appear on the record
        let item_ids: Vec<Uuid> = record.items.iter().map(|i| i.id).collect();
        for item_id in item_ids {
            let Some(bucket) = staged.get_mut(&(record.id, item_id)) else {
                continue;
            };
            while !bucket.is_empty() {
                let file = &bucket[0];
                match gateway
                    .upload_attachment(record.id, item_id, &file.upload)
                    .await
                {
                    Ok(evidence) => {
                        if let Some(item) = record.item_mut(item_id) {
                            item.evidences.push(evidence.clone());
                        }
                        committed.push(evidence);
                        bucket.remove(0);
                    }
                    Err(source) => {
                        let filename = file.upload.filename.clone();
                        warn!(record_id = %record.id, item_id = %item_id, %filename, "Attachment batch stopped at first failure");
                        return Err(EvidenceError::Upload { filename, source });
                    }
                }
            }
        }

        staged.retain(|_, files| !files.is_empty());
        Ok(committed)
    }

    /// Drop all staged files for a record without uploading.
    pub async fn discard(&self, record_id: Uuid) {
        let mut staged = self.staged.write().await;
        staged.retain(|(rid, _), _| *rid != record_id);
    }

    /// Optimistic delete: the attachment is removed from the in-memory
    /// model immediately; if the store fails to confirm, the item is rolled
    /// back to the authoritative copy.
    pub async fn delete_attachment(
        &self,
        gateway: &dyn PersistenceGateway,
        record: &mut InspectionRecord,
        item_id: Uuid,
        attachment_id: Uuid,
    ) -> Result<(), EvidenceError> {
        {
            let record_id = record.id;
            let item = record.item_mut(item_id).ok_or(EvidenceError::UnknownItem {
                record_id,
                item_id,
            })?;
            item.evidences.retain(|e| e.id != attachment_id);
        }

        if let Err(source) = gateway.delete_attachment(record.id, attachment_id).await {
            warn!(record_id = %record.id, %attachment_id, "Delete confirmation failed, rolling back to authoritative state");
            if let Ok(authoritative) = gateway.load(record.id).await {
                if let (Some(item), Some(stored)) =
                    (record.item_mut(item_id), authoritative.item(item_id))
                {
                    item.evidences = stored.evidences.clone();
                }
            }
            return Err(EvidenceError::Delete {
                attachment_id,
                source,
            });
        }
        Ok(())
    }
}

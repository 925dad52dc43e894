//! Inspection Item Types
//!
//! An item is one checklist requirement materialized onto a record.
//! Measurement runs are an append-only log (never overwritten); readers use
//! the `latest_run` projection. Evidence refs are the committed attachments,
//! capped at [`MAX_EVIDENCE_PER_ITEM`] together with any staged files.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;
use uuid::Uuid;

use crate::actor::ActorId;

/// Hard cap on attachments per item, committed + staged counted together.
pub const MAX_EVIDENCE_PER_ITEM: usize = 5;

/// Whether an item must be answered before the record can advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Requirement {
    Mandatory,
    Optional,
}

impl Requirement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mandatory => "mandatory",
            Self::Optional => "optional",
        }
    }

    pub fn is_mandatory(&self) -> bool {
        matches!(self, Self::Mandatory)
    }
}

/// Inspector verdict on a single item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pass,
    Fail,
    Na,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Na => "na",
        }
    }
}

impl FromStr for ItemStatus {
    type Err = ItemStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pass" => Ok(Self::Pass),
            "fail" => Ok(Self::Fail),
            "na" => Ok(Self::Na),
            _ => Err(ItemStatusError::Unknown(s.to_string())),
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ItemStatusError {
    #[error("Unknown item status: {0}")]
    Unknown(String),
}

/// Tolerance band for a measured item: base value plus/minus allowances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tolerance {
    pub base: Decimal,
    pub plus: Decimal,
    pub minus: Decimal,
}

impl Tolerance {
    /// Inclusive (lower, upper) bounds of the band.
    pub fn bounds(&self) -> (Decimal, Decimal) {
        (self.base - self.minus, self.base + self.plus)
    }

    pub fn contains(&self, value: Decimal) -> bool {
        let (lo, hi) = self.bounds();
        value >= lo && value <= hi
    }
}

/// One recorded measurement/verdict pass over an item. Runs are append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementRun {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ItemStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub recorded_at: DateTime<Utc>,
    pub by_actor_id: ActorId,
}

/// Broad classification of an attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Photo,
    Document,
    Other,
}

impl AttachmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Document => "document",
            Self::Other => "other",
        }
    }
}

/// A committed attachment reference, as persisted by the backing store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceRef {
    pub id: Uuid,
    pub kind: AttachmentKind,
    pub url: String,
    pub filename: String,
    pub uploaded_at: DateTime<Utc>,
}

/// A checklist requirement instance on a record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectionItem {
    pub id: Uuid,
    pub sequence: u32,
    pub code: String,
    pub name: String,
    pub requirement: Requirement,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<Tolerance>,
    #[serde(default)]
    pub critical: bool,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inspector_status: Option<ItemStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inspector_note: Option<String>,
    #[serde(default)]
    pub runs: Vec<MeasurementRun>,
    #[serde(default)]
    pub evidences: Vec<EvidenceRef>,
}

impl InspectionItem {
    /// Newest run, if any. Runs are never overwritten, so readers project
    /// the latest rather than mutating in place.
    pub fn latest_run(&self) -> Option<&MeasurementRun> {
        self.runs.last()
    }

    /// Append a run and fold its verdict into the item-level projection.
    pub fn record_run(&mut self, run: MeasurementRun) {
        if let Some(status) = run.status {
            self.inspector_status = Some(status);
        }
        self.runs.push(run);
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Items tagged "measurement" need a numeric value before sign-off.
    pub fn needs_measurement(&self) -> bool {
        self.has_tag("measurement")
    }

    /// Items tagged "evidence", "document", or "photo" need an attachment.
    pub fn needs_evidence(&self) -> bool {
        self.has_tag("evidence") || self.has_tag("document") || self.has_tag("photo")
    }

    pub fn is_failed(&self) -> bool {
        self.inspector_status == Some(ItemStatus::Fail)
    }

    /// True if any run recorded a numeric value.
    pub fn has_measured_value(&self) -> bool {
        self.runs.iter().any(|r| r.value.is_some())
    }
}

impl std::fmt::Display for Requirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::fmt::Display for AttachmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

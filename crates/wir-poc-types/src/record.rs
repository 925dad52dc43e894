//! Inspection Record Types
//!
//! The aggregate entity of the WIR workflow. Status only ever moves forward
//! through the lifecycle engine; the ordering here backs the never-regress
//! check. Header fields are patchable while Draft, frozen afterwards.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;
use uuid::Uuid;

use crate::actor::ActorId;
use crate::history::HistoryEntry;
use crate::item::InspectionItem;

/// Maximum length of inspector remarks captured at recommendation time.
pub const MAX_REMARKS_LEN: usize = 200;

/// Record lifecycle state. Approved/Rejected are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Draft,
    Submitted,
    Recommended,
    Approved,
    Rejected,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::Recommended => "recommended",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// Position in the forward-only progression. Both terminal states share
    /// the top rank.
    fn order(&self) -> u8 {
        match self {
            Self::Draft => 0,
            Self::Submitted => 1,
            Self::Recommended => 2,
            Self::Approved | Self::Rejected => 3,
        }
    }

    /// Status never regresses: a move is legal only if it lands strictly
    /// further along the progression.
    pub fn can_advance_to(&self, target: RecordStatus) -> bool {
        !self.is_terminal() && target.order() > self.order()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

impl FromStr for RecordStatus {
    type Err = RecordStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "submitted" => Ok(Self::Submitted),
            "recommended" => Ok(Self::Recommended),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            _ => Err(RecordStatusError::Unknown(s.to_string())),
        }
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RecordStatusError {
    #[error("Unknown record status: {0}")]
    Unknown(String),
}

/// Inspector recommendation carried to the approver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InspectorRecommendation {
    Approve,
    ApproveWithComments,
    Reject,
}

impl InspectorRecommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::ApproveWithComments => "approve_with_comments",
            Self::Reject => "reject",
        }
    }
}

impl std::fmt::Display for InspectorRecommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Final decision recorded by the head of discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HodOutcome {
    Approve,
    Reject,
}

impl HodOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }
}

impl std::fmt::Display for HodOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Requested change to the planned inspection slot while Submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reschedule {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub reason: String,
    pub by_actor_id: ActorId,
}

/// Initial header supplied at creation. Everything except the title may be
/// filled in later via [`HeaderPatch`] while the record is Draft.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordHeader {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discipline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planned_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planned_time: Option<NaiveTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contractor_id: Option<ActorId>,
    #[serde(default)]
    pub checklist_selections: BTreeSet<Uuid>,
}

/// Partial header update. Absent fields are left untouched; the patch never
/// carries status.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeaderPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discipline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planned_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planned_time: Option<NaiveTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contractor_id: Option<ActorId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checklist_selections: Option<BTreeSet<Uuid>>,
}

impl HeaderPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.discipline.is_none()
            && self.activity.is_none()
            && self.planned_date.is_none()
            && self.planned_time.is_none()
            && self.location.is_none()
            && self.description.is_none()
            && self.contractor_id.is_none()
            && self.checklist_selections.is_none()
    }
}

/// The Work Inspection Request aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectionRecord {
    pub id: Uuid,
    pub project_id: Uuid,
    /// Human reference shared across a follow-up chain, e.g. "WIR-CIV-0042".
    pub code: String,
    pub title: String,
    pub status: RecordStatus,
    /// Unset until first dispatch; a follow-up starts at parent + 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discipline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planned_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planned_time: Option<NaiveTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reschedule: Option<Reschedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub creator_id: ActorId,
    /// Ball in court: the single actor responsible for the next action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bic: Option<ActorId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inspector_id: Option<ActorId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hod_id: Option<ActorId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contractor_id: Option<ActorId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inspector_recommendation: Option<InspectorRecommendation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inspector_remarks: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inspector_reviewed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hod_outcome: Option<HodOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hod_remarks: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hod_decided_at: Option<DateTime<Utc>>,
    /// Parent link when this record was spawned as a follow-up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_record_id: Option<Uuid>,
    #[serde(default)]
    pub is_follow_up: bool,
    /// Checklist ids to materialize at dispatch. Mutually exclusive with
    /// carried items on a follow-up.
    #[serde(default)]
    pub checklist_selections: BTreeSet<Uuid>,
    #[serde(default)]
    pub items: Vec<InspectionItem>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    pub created_at: DateTime<Utc>,
    /// Optimistic concurrency token; bumped by the gateway on every write.
    pub updated_at: DateTime<Utc>,
}

impl InspectionRecord {
    /// Create a Draft record from an initial header. History starts empty;
    /// the engine appends the "created" entry.
    pub fn new_draft(
        project_id: Uuid,
        code: impl Into<String>,
        creator_id: ActorId,
        header: RecordHeader,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id,
            code: code.into(),
            title: header.title,
            status: RecordStatus::Draft,
            version: None,
            discipline: header.discipline,
            activity: header.activity,
            planned_date: header.planned_date,
            planned_time: header.planned_time,
            reschedule: None,
            location: header.location,
            description: header.description,
            creator_id,
            bic: None,
            inspector_id: None,
            hod_id: None,
            contractor_id: header.contractor_id,
            inspector_recommendation: None,
            inspector_remarks: None,
            inspector_reviewed_at: None,
            hod_outcome: None,
            hod_remarks: None,
            hod_decided_at: None,
            prev_record_id: None,
            is_follow_up: false,
            checklist_selections: header.checklist_selections,
            items: Vec::new(),
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a partial header update, returning the names of the fields that
    /// changed (for the audit entry). Does not touch status; the engine
    /// enforces the Draft-only rule.
    pub fn apply_patch(&mut self, patch: &HeaderPatch) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if let Some(title) = &patch.title {
            self.title = title.clone();
            changed.push("title");
        }
        if let Some(discipline) = &patch.discipline {
            self.discipline = Some(discipline.clone());
            changed.push("discipline");
        }
        if let Some(activity) = &patch.activity {
            self.activity = Some(activity.clone());
            changed.push("activity");
        }
        if let Some(date) = patch.planned_date {
            self.planned_date = Some(date);
            changed.push("planned_date");
        }
        if let Some(time) = patch.planned_time {
            self.planned_time = Some(time);
            changed.push("planned_time");
        }
        if let Some(location) = &patch.location {
            self.location = Some(location.clone());
            changed.push("location");
        }
        if let Some(description) = &patch.description {
            self.description = Some(description.clone());
            changed.push("description");
        }
        if let Some(contractor) = &patch.contractor_id {
            self.contractor_id = Some(contractor.clone());
            changed.push("contractor_id");
        }
        if let Some(selections) = &patch.checklist_selections {
            self.checklist_selections = selections.clone();
            changed.push("checklist_selections");
        }
        changed
    }

    /// Append an audit entry. Entries are never edited or removed.
    pub fn append_history(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
    }

    pub fn item(&self, item_id: Uuid) -> Option<&InspectionItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    pub fn item_mut(&mut self, item_id: Uuid) -> Option<&mut InspectionItem> {
        self.items.iter_mut().find(|i| i.id == item_id)
    }

    /// Items the inspector marked Fail.
    pub fn failed_items(&self) -> Vec<&InspectionItem> {
        self.items.iter().filter(|i| i.is_failed()).collect()
    }

    /// True if any critical item is currently failed. Forces the overall
    /// recommendation to Reject at recommendation time.
    pub fn has_critical_failure(&self) -> bool {
        self.items.iter().any(|i| i.critical && i.is_failed())
    }

    /// Header completeness required before dispatch.
    pub fn is_dispatch_ready(&self) -> bool {
        self.discipline.as_deref().is_some_and(|s| !s.is_empty())
            && self.activity.as_deref().is_some_and(|s| !s.is_empty())
            && self.planned_date.is_some()
            && self.planned_time.is_some()
            && (!self.checklist_selections.is_empty() || self.is_follow_up)
    }
}

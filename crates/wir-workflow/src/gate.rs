//! Readiness Validation Gate
//!
//! Pure check gating the Submitted -> Recommended transition. Produces the
//! complete blocker list in one pass, never a single first-failure message,
//! so every deficient item and field can be addressed together.
//!
//! Runner updates persist partial progress without consulting the gate; only
//! send-to-HOD is gated.

use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use wir_poc_types::{InspectionRecord, InspectorRecommendation, ItemStatus};

/// Staged-but-uncommitted attachment counts per item id, supplied by the
/// evidence store. The gate counts persisted + staged together.
pub type StagedCounts = HashMap<Uuid, usize>;

/// A single deficiency preventing a transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Blocker {
    #[serde(flatten)]
    pub kind: BlockerKind,
    pub description: String,
}

/// Typed blocker payloads.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum BlockerKind {
    // ─────────────────────────────────────────────────────────────────────────────
    // Item readiness
    // ─────────────────────────────────────────────────────────────────────────────
    /// Mandatory item has no pass/fail verdict yet
    StatusMissing { item_id: Uuid, item_code: String },

    /// Measurement-tagged item has no recorded numeric value
    MeasurementMissing { item_id: Uuid, item_code: String },

    /// Evidence-tagged item has no attachment, persisted or staged
    EvidenceMissing { item_id: Uuid, item_code: String },

    /// A runner update carried a value that does not parse as a number
    InvalidMeasurement { item_id: Uuid, raw: String },

    /// An update referenced an item not on the record
    UnknownItem { item_id: Uuid },

    // ─────────────────────────────────────────────────────────────────────────────
    // Record readiness
    // ─────────────────────────────────────────────────────────────────────────────
    /// No overall recommendation selected (not tied to an item)
    RecommendationMissing,

    /// Header field required before dispatch
    HeaderFieldMissing { field: String },

    /// Dispatch needs at least one checklist unless items are carried
    NoChecklistSelected,

    /// Remarks exceed the persisted column width
    RemarkTooLong { len: usize, max: usize },

    /// Follow-up spawn found no failed items to carry
    NothingToCarryForward,

    /// A later version is already chained from this code
    FollowUpAlreadyChained { latest_version: u32 },

    /// Backing-store validation, surfaced verbatim
    Store { message: String },
}

impl Blocker {
    pub fn new(kind: BlockerKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }

    pub(crate) fn store(message: String) -> Self {
        Self {
            description: message.clone(),
            kind: BlockerKind::Store { message },
        }
    }
}

/// Gate outcome: `ok` iff `missing` is empty.
#[derive(Debug, Clone, Serialize)]
pub struct GateReport {
    pub ok: bool,
    pub missing: Vec<Blocker>,
}

impl GateReport {
    fn from_missing(missing: Vec<Blocker>) -> Self {
        Self {
            ok: missing.is_empty(),
            missing,
        }
    }
}

/// Evaluate readiness for recommendation.
///
/// For every Mandatory item: a Pass or Fail verdict is required; items
/// tagged "measurement" need at least one recorded numeric value; items
/// tagged "evidence"/"document"/"photo" need at least one attachment,
/// counting persisted and staged together. A selected recommendation is
/// required as well, reported as a distinguished entry.
pub fn evaluate(
    record: &InspectionRecord,
    staged: &StagedCounts,
    recommendation: Option<InspectorRecommendation>,
) -> GateReport {
    let mut missing = Vec::new();

    for item in &record.items {
        if !item.requirement.is_mandatory() {
            continue;
        }

        if !matches!(
            item.inspector_status,
            Some(ItemStatus::Pass) | Some(ItemStatus::Fail)
        ) {
            missing.push(Blocker::new(
                BlockerKind::StatusMissing {
                    item_id: item.id,
                    item_code: item.code.clone(),
                },
                format!("Item {} needs a pass/fail verdict", item.code),
            ));
        }

        if item.needs_measurement() && !item.has_measured_value() {
            missing.push(Blocker::new(
                BlockerKind::MeasurementMissing {
                    item_id: item.id,
                    item_code: item.code.clone(),
                },
                format!("Item {} needs a recorded measurement", item.code),
            ));
        }

        if item.needs_evidence() {
            let total = item.evidences.len() + staged.get(&item.id).copied().unwrap_or(0);
            if total == 0 {
                missing.push(Blocker::new(
                    BlockerKind::EvidenceMissing {
                        item_id: item.id,
                        item_code: item.code.clone(),
                    },
                    format!("Item {} needs at least one attachment", item.code),
                ));
            }
        }
    }

    if recommendation.is_none() {
        missing.push(Blocker::new(
            BlockerKind::RecommendationMissing,
            "An overall recommendation must be selected",
        ));
    }

    GateReport::from_missing(missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use std::collections::BTreeSet;
    use uuid::Uuid;
    use wir_poc_types::{
        ActorId, InspectionItem, InspectionRecord, MeasurementRun, RecordHeader, Requirement,
    };

    fn record_with(items: Vec<InspectionItem>) -> InspectionRecord {
        let mut record = InspectionRecord::new_draft(
            Uuid::new_v4(),
            "WIR-TST-0001",
            ActorId::new("creator"),
            RecordHeader {
                title: "Gate test".to_string(),
                ..Default::default()
            },
        );
        record.items = items;
        record
    }

    fn item(code: &str, requirement: Requirement, tags: &[&str]) -> InspectionItem {
        InspectionItem {
            id: Uuid::new_v4(),
            sequence: 1,
            code: code.to_string(),
            name: code.to_string(),
            requirement,
            unit: None,
            tolerance: None,
            critical: false,
            tags: tags.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>(),
            inspector_status: None,
            inspector_note: None,
            runs: Vec::new(),
            evidences: Vec::new(),
        }
    }

    fn run(value: Option<Decimal>, status: ItemStatus) -> MeasurementRun {
        MeasurementRun {
            value,
            unit: None,
            status: Some(status),
            comment: None,
            recorded_at: Utc::now(),
            by_actor_id: ActorId::new("U1"),
        }
    }

    /// A record that passes the gate: mandatory measured item with a value,
    /// a verdict, and a recommendation supplied.
    fn ready_record() -> InspectionRecord {
        let mut m = item("M-1", Requirement::Mandatory, &["measurement"]);
        m.record_run(run(Some(Decimal::new(10, 0)), ItemStatus::Pass));
        record_with(vec![m, item("O-1", Requirement::Optional, &[])])
    }

    #[test]
    fn test_ready_record_passes() {
        let report = evaluate(
            &ready_record(),
            &StagedCounts::new(),
            Some(InspectorRecommendation::Approve),
        );
        assert!(report.ok);
        assert!(report.missing.is_empty());
    }

    #[test]
    fn test_each_removed_condition_adds_exactly_one_blocker() {
        let staged = StagedCounts::new();
        let rec = Some(InspectorRecommendation::Approve);

        // Remove the verdict: status blocker only
        let mut r = ready_record();
        r.items[0].inspector_status = None;
        let report = evaluate(&r, &staged, rec);
        assert!(!report.ok);
        assert_eq!(report.missing.len(), 1);
        assert!(matches!(
            report.missing[0].kind,
            BlockerKind::StatusMissing { .. }
        ));

        // Remove the measured value (keep the verdict): measurement blocker only
        let mut r = ready_record();
        r.items[0].runs.clear();
        let report = evaluate(&r, &staged, rec);
        assert_eq!(report.missing.len(), 1);
        assert!(matches!(
            report.missing[0].kind,
            BlockerKind::MeasurementMissing { .. }
        ));

        // Remove the recommendation: distinguished entry only
        let report = evaluate(&ready_record(), &staged, None);
        assert_eq!(report.missing.len(), 1);
        assert!(matches!(
            report.missing[0].kind,
            BlockerKind::RecommendationMissing
        ));
    }

    #[test]
    fn test_evidence_counts_staged_and_persisted() {
        let mut e = item("E-1", Requirement::Mandatory, &["photo"]);
        e.inspector_status = Some(ItemStatus::Pass);
        let item_id = e.id;
        let record = record_with(vec![e]);
        let rec = Some(InspectorRecommendation::Approve);

        // Nothing attached: blocked
        let report = evaluate(&record, &StagedCounts::new(), rec);
        assert_eq!(report.missing.len(), 1);
        assert!(matches!(
            report.missing[0].kind,
            BlockerKind::EvidenceMissing { .. }
        ));

        // A staged (not yet committed) file satisfies the gate
        let staged = StagedCounts::from([(item_id, 1)]);
        assert!(evaluate(&record, &staged, rec).ok);
    }

    #[test]
    fn test_na_does_not_satisfy_mandatory_verdict() {
        let mut r = ready_record();
        r.items[0].inspector_status = Some(ItemStatus::Na);
        let report = evaluate(
            &r,
            &StagedCounts::new(),
            Some(InspectorRecommendation::Approve),
        );
        assert!(report
            .missing
            .iter()
            .any(|b| matches!(b.kind, BlockerKind::StatusMissing { .. })));
    }

    #[test]
    fn test_optional_items_are_not_gated() {
        let record = record_with(vec![item(
            "O-1",
            Requirement::Optional,
            &["measurement", "photo"],
        )]);
        let report = evaluate(
            &record,
            &StagedCounts::new(),
            Some(InspectorRecommendation::Approve),
        );
        assert!(report.ok);
    }

    #[test]
    fn test_all_blockers_returned_together() {
        let mut m = item("M-1", Requirement::Mandatory, &["measurement"]);
        m.tags.insert("photo".to_string());
        let record = record_with(vec![m]);
        let report = evaluate(&record, &StagedCounts::new(), None);
        // status + measurement + evidence + recommendation, in one pass
        assert_eq!(report.missing.len(), 4);
    }
}

//! Follow-up Derivation
//!
//! Builds the successor record for a finalized WIR: the child carries
//! exactly the parent's failed items and nothing else, one version up,
//! linked back through `prev_record_id`. Carried items keep their identity
//! (id, code, sequence, tags, tolerance) but start as a fresh inspection:
//! verdict, runs, and evidence are reset.

use chrono::{NaiveDate, NaiveTime};
use tracing::info;

use wir_poc_types::{
    ActorId, HistoryAction, HistoryEntry, InspectionItem, InspectionRecord, RecordStatus,
};

use crate::gate::{Blocker, BlockerKind};
use crate::WorkflowError;

/// Reset a failed item for re-inspection on the child record.
fn carry_item(item: &InspectionItem) -> InspectionItem {
    InspectionItem {
        id: item.id,
        sequence: item.sequence,
        code: item.code.clone(),
        name: item.name.clone(),
        requirement: item.requirement,
        unit: item.unit.clone(),
        tolerance: item.tolerance,
        critical: item.critical,
        tags: item.tags.clone(),
        inspector_status: None,
        inspector_note: None,
        runs: Vec::new(),
        evidences: Vec::new(),
    }
}

/// Derive the follow-up record from a finalized parent.
///
/// Fails with "nothing to carry forward" when the parent has no failed
/// items. The engine checks the lifecycle preconditions (status,
/// recommendation, outcome, BIC, chain tip) before calling this.
pub fn derive_follow_up(
    parent: &InspectionRecord,
    planned_date: NaiveDate,
    planned_time: NaiveTime,
    note: Option<&str>,
    by: &ActorId,
) -> Result<InspectionRecord, WorkflowError> {
    let carried: Vec<InspectionItem> = parent
        .items
        .iter()
        .filter(|i| i.is_failed())
        .map(carry_item)
        .collect();

    if carried.is_empty() {
        return Err(WorkflowError::validation(Blocker::new(
            BlockerKind::NothingToCarryForward,
            "nothing to carry forward",
        )));
    }

    let parent_version = parent.version.unwrap_or(1);
    let bic = parent.contractor_id.clone();
    let now = chrono::Utc::now();

    let mut child = InspectionRecord {
        id: uuid::Uuid::new_v4(),
        project_id: parent.project_id,
        code: parent.code.clone(),
        title: parent.title.clone(),
        status: RecordStatus::Draft,
        version: Some(parent_version + 1),
        discipline: parent.discipline.clone(),
        activity: parent.activity.clone(),
        planned_date: Some(planned_date),
        planned_time: Some(planned_time),
        reschedule: None,
        location: parent.location.clone(),
        description: parent.description.clone(),
        creator_id: by.clone(),
        bic: bic.clone(),
        inspector_id: None,
        hod_id: None,
        contractor_id: parent.contractor_id.clone(),
        inspector_recommendation: None,
        inspector_remarks: None,
        inspector_reviewed_at: None,
        hod_outcome: None,
        hod_remarks: None,
        hod_decided_at: None,
        prev_record_id: Some(parent.id),
        is_follow_up: true,
        checklist_selections: Default::default(),
        items: carried,
        history: Vec::new(),
        created_at: now,
        updated_at: now,
    };

    let mut entry = HistoryEntry::new(HistoryAction::Created, by.clone())
        .with_meta("parent_record_id", serde_json::json!(parent.id))
        .with_meta("carried_items", serde_json::json!(child.items.len()));
    if let Some(note) = note {
        entry = entry.with_notes(note);
    }
    child.append_history(entry);

    info!(
        parent_id = %parent.id,
        child_id = %child.id,
        version = child.version.unwrap_or(0),
        carried = child.items.len(),
        "Derived follow-up record"
    );
    Ok(child)
}

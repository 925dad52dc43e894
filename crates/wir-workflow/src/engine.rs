//! Lifecycle Engine
//!
//! The WIR state machine: Draft -> Submitted -> Recommended -> Approved or
//! Rejected, with a follow-up spawn as the single terminal-state exception.
//! Every action loads the record, checks the in-flight guard, the status
//! precondition, actor authority, and any validation gate, then mutates the
//! record, appends exactly one history entry, and persists through the
//! gateway's optimistic write. Failures are all-or-nothing; a record is
//! never left with its status changed while a requirement is unmet.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use wir_poc_types::{
    ActorId, HeaderPatch, HistoryAction, HistoryEntry, HodOutcome, InspectionRecord,
    InspectorRecommendation, ItemStatus, MeasurementRun, RecordHeader, RecordStatus, Reschedule,
    MAX_REMARKS_LEN,
};

use crate::catalog::ChecklistCatalog;
use crate::evidence::EvidenceStore;
use crate::followup::derive_follow_up;
use crate::gate::{self, Blocker, BlockerKind};
use crate::gateway::PersistenceGateway;
use crate::roles::{ActingCapability, RoleResolver};
use crate::WorkflowError;

/// The acting party for a lifecycle call: a resolved actor id plus the base
/// role the authority lookup keys on.
#[derive(Debug, Clone)]
pub struct ActorRef {
    pub actor_id: ActorId,
    pub base_role: String,
}

impl ActorRef {
    pub fn new(actor_id: impl Into<ActorId>, base_role: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            base_role: base_role.into(),
        }
    }
}

/// One item touch inside a runner update batch. `value` arrives as raw text
/// and is parsed up front; any invalid entry aborts the whole batch.
#[derive(Debug, Clone, Default)]
pub struct ItemUpdate {
    pub item_id: Uuid,
    pub status: Option<ItemStatus>,
    pub value: Option<String>,
    pub unit: Option<String>,
    pub comment: Option<String>,
    pub note: Option<String>,
}

/// Ball-in-court routing after finalization. Total over all nine
/// (outcome, recommendation bucket, contractor present) combinations.
pub fn next_bic(
    outcome: HodOutcome,
    prior_recommendation: Option<InspectorRecommendation>,
    contractor_id: Option<&ActorId>,
) -> Option<ActorId> {
    match (outcome, prior_recommendation) {
        (HodOutcome::Reject, _) => contractor_id.cloned(),
        (HodOutcome::Approve, Some(InspectorRecommendation::ApproveWithComments)) => {
            contractor_id.cloned()
        }
        (HodOutcome::Approve, _) => None,
    }
}

/// Workflow actions the caller may attempt next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Patch,
    Dispatch,
    RunnerUpdate,
    SendToHod,
    Finalize,
    Reschedule,
    SpawnFollowUp,
}

/// Status surface for one record as seen by one actor: what they may do
/// next and what still blocks the gated transition.
#[derive(Debug, Clone, Serialize)]
pub struct RecordOverview {
    pub record_id: Uuid,
    pub status: RecordStatus,
    pub version: Option<u32>,
    pub bic: Option<ActorId>,
    pub capability: ActingCapability,
    pub available_actions: Vec<ActionKind>,
    pub blockers: Vec<Blocker>,
}

/// The lifecycle engine. Logically single-threaded per record: a second
/// transition for a record already in flight is refused.
pub struct LifecycleEngine {
    gateway: Arc<dyn PersistenceGateway>,
    catalog: Arc<dyn ChecklistCatalog>,
    evidence: Arc<EvidenceStore>,
    roles: RoleResolver,
    in_flight: Mutex<HashSet<Uuid>>,
}

impl LifecycleEngine {
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        catalog: Arc<dyn ChecklistCatalog>,
        roles: RoleResolver,
    ) -> Self {
        Self {
            gateway,
            catalog,
            evidence: Arc::new(EvidenceStore::new()),
            roles,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// The staging area callers use to attach files before a transition.
    pub fn evidence(&self) -> &Arc<EvidenceStore> {
        &self.evidence
    }

    /// Create a Draft record from an initial header.
    pub async fn create(
        &self,
        project_id: Uuid,
        code: impl Into<String>,
        creator: &ActorRef,
        header: RecordHeader,
    ) -> Result<InspectionRecord, WorkflowError> {
        let mut record =
            InspectionRecord::new_draft(project_id, code, creator.actor_id.clone(), header);
        record.append_history(HistoryEntry::new(
            HistoryAction::Created,
            creator.actor_id.clone(),
        ));
        self.gateway.create(&record).await?;
        info!(record_id = %record.id, code = %record.code, "Created WIR draft");
        Ok(record)
    }

    /// Apply a partial header update to a Draft record. Never touches
    /// status.
    pub async fn patch(
        &self,
        record_id: Uuid,
        patch: &HeaderPatch,
        actor: &ActorRef,
    ) -> Result<InspectionRecord, WorkflowError> {
        self.begin(record_id).await?;
        let result = self.patch_inner(record_id, patch, actor).await;
        self.finish(record_id).await;
        result
    }

    /// Dispatch a Draft record to an inspector, materializing its items.
    pub async fn dispatch(
        &self,
        record_id: Uuid,
        inspector_id: ActorId,
        actor: &ActorRef,
    ) -> Result<InspectionRecord, WorkflowError> {
        self.begin(record_id).await?;
        let result = self.dispatch_inner(record_id, inspector_id, actor).await;
        self.finish(record_id).await;
        result
    }

    /// Record inspection progress as one all-or-nothing batch.
    pub async fn runner_update(
        &self,
        record_id: Uuid,
        updates: &[ItemUpdate],
        actor: &ActorRef,
    ) -> Result<InspectionRecord, WorkflowError> {
        self.begin(record_id).await?;
        let result = self.runner_update_inner(record_id, updates, actor).await;
        self.finish(record_id).await;
        result
    }

    /// Recommend the record to a head of discipline.
    pub async fn send_to_hod(
        &self,
        record_id: Uuid,
        hod_id: ActorId,
        recommendation: InspectorRecommendation,
        remark: Option<String>,
        actor: &ActorRef,
    ) -> Result<InspectionRecord, WorkflowError> {
        self.begin(record_id).await?;
        let result = self
            .send_to_hod_inner(record_id, hod_id, recommendation, remark, actor)
            .await;
        self.finish(record_id).await;
        result
    }

    /// Record the final decision. Decision fields, BIC routing, and the
    /// terminal status land in a single gateway write; there is no
    /// observable intermediate.
    pub async fn finalize(
        &self,
        record_id: Uuid,
        outcome: HodOutcome,
        remark: Option<String>,
        actor: &ActorRef,
    ) -> Result<InspectionRecord, WorkflowError> {
        self.begin(record_id).await?;
        let result = self.finalize_inner(record_id, outcome, remark, actor).await;
        self.finish(record_id).await;
        result
    }

    /// Request a new inspection slot while Submitted.
    pub async fn reschedule(
        &self,
        record_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
        reason: impl Into<String>,
        actor: &ActorRef,
    ) -> Result<InspectionRecord, WorkflowError> {
        self.begin(record_id).await?;
        let result = self
            .reschedule_inner(record_id, date, time, reason.into(), actor)
            .await;
        self.finish(record_id).await;
        result
    }

    /// Spawn the follow-up record carrying the parent's failed items.
    pub async fn spawn_follow_up(
        &self,
        record_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
        note: Option<String>,
        actor: &ActorRef,
    ) -> Result<InspectionRecord, WorkflowError> {
        self.begin(record_id).await?;
        let result = self
            .spawn_follow_up_inner(record_id, date, time, note, actor)
            .await;
        self.finish(record_id).await;
        result
    }

    /// Status surface for one record as seen by one actor.
    pub async fn describe(
        &self,
        record_id: Uuid,
        actor: &ActorRef,
    ) -> Result<RecordOverview, WorkflowError> {
        let record = self.gateway.load(record_id).await?;
        let capability = self.capability(&record, actor);
        let is_bic = record.bic.as_ref() == Some(&actor.actor_id);

        let mut available_actions = Vec::new();
        let mut blockers = Vec::new();
        match record.status {
            RecordStatus::Draft => {
                available_actions.push(ActionKind::Patch);
                if record.is_dispatch_ready() {
                    available_actions.push(ActionKind::Dispatch);
                }
            }
            RecordStatus::Submitted => {
                if is_bic && capability.can_inspect() {
                    available_actions.push(ActionKind::RunnerUpdate);
                    available_actions.push(ActionKind::Reschedule);
                    available_actions.push(ActionKind::SendToHod);
                }
                let staged = self.evidence.staged_counts(record.id).await;
                blockers =
                    gate::evaluate(&record, &staged, record.inspector_recommendation).missing;
            }
            RecordStatus::Recommended => {
                if capability.can_approve() {
                    available_actions.push(ActionKind::Finalize);
                }
            }
            RecordStatus::Approved => {
                if is_bic
                    && record.inspector_recommendation
                        == Some(InspectorRecommendation::ApproveWithComments)
                    && record.hod_outcome == Some(HodOutcome::Approve)
                {
                    available_actions.push(ActionKind::SpawnFollowUp);
                }
            }
            RecordStatus::Rejected => {}
        }

        Ok(RecordOverview {
            record_id: record.id,
            status: record.status,
            version: record.version,
            bic: record.bic.clone(),
            capability,
            available_actions,
            blockers,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Transition bodies
    // ─────────────────────────────────────────────────────────────────────────────

    async fn patch_inner(
        &self,
        record_id: Uuid,
        patch: &HeaderPatch,
        actor: &ActorRef,
    ) -> Result<InspectionRecord, WorkflowError> {
        let mut record = self.gateway.load(record_id).await?;
        if record.status != RecordStatus::Draft {
            return Err(self.invariant(format!(
                "header patch allowed only while draft, record {} is {}",
                record.id, record.status
            )));
        }
        if patch.is_empty() {
            return Ok(record);
        }

        let changed = record.apply_patch(patch);
        record.append_history(
            HistoryEntry::new(HistoryAction::Patched, actor.actor_id.clone())
                .with_meta("fields", json!(changed)),
        );
        Ok(self.gateway.update(&record).await?)
    }

    async fn dispatch_inner(
        &self,
        record_id: Uuid,
        inspector_id: ActorId,
        actor: &ActorRef,
    ) -> Result<InspectionRecord, WorkflowError> {
        let mut record = self.gateway.load(record_id).await?;
        if record.status != RecordStatus::Draft {
            return Err(self.invariant(format!(
                "dispatch requires a draft record, record {} is {}",
                record.id, record.status
            )));
        }

        let mut blockers = Vec::new();
        for (present, field) in [
            (record.discipline.as_deref().is_some_and(|s| !s.is_empty()), "discipline"),
            (record.activity.as_deref().is_some_and(|s| !s.is_empty()), "activity"),
            (record.planned_date.is_some(), "planned_date"),
            (record.planned_time.is_some(), "planned_time"),
        ] {
            if !present {
                blockers.push(Blocker::new(
                    BlockerKind::HeaderFieldMissing {
                        field: field.to_string(),
                    },
                    format!("Header field {field} must be set before dispatch"),
                ));
            }
        }
        if record.checklist_selections.is_empty() && !record.is_follow_up {
            blockers.push(Blocker::new(
                BlockerKind::NoChecklistSelected,
                "At least one checklist must be selected",
            ));
        }
        if !blockers.is_empty() {
            return Err(WorkflowError::Validation { blockers });
        }

        // Staged attachments (carried follow-up items) commit as one batch
        // ahead of the transition
        self.commit_evidence(&mut record).await?;

        if !record.is_follow_up {
            let mut items = Vec::new();
            let mut sequence = 1u32;
            for checklist_id in record.checklist_selections.clone() {
                let templates = self
                    .catalog
                    .fetch_items(record.project_id, checklist_id)
                    .await?;
                for template in &templates {
                    items.push(template.materialize(sequence));
                    sequence += 1;
                }
            }
            record.items = items;
        }

        record.inspector_id = Some(inspector_id.clone());
        record.bic = Some(inspector_id.clone());
        if record.version.is_none() {
            record.version = Some(1);
        }
        record.status = RecordStatus::Submitted;
        record.append_history(
            HistoryEntry::new(HistoryAction::Dispatched, actor.actor_id.clone())
                .with_meta("inspector", json!(inspector_id.as_str()))
                .with_meta("items", json!(record.items.len())),
        );

        info!(
            record_id = %record.id,
            inspector = %inspector_id,
            items = record.items.len(),
            "Dispatched WIR to inspector"
        );
        Ok(self.gateway.update(&record).await?)
    }

    async fn runner_update_inner(
        &self,
        record_id: Uuid,
        updates: &[ItemUpdate],
        actor: &ActorRef,
    ) -> Result<InspectionRecord, WorkflowError> {
        let mut record = self.gateway.load(record_id).await?;
        if record.status != RecordStatus::Submitted {
            return Err(self.invariant(format!(
                "runner update requires a submitted record, record {} is {}",
                record.id, record.status
            )));
        }
        self.require_bic(&record, actor)?;
        self.require_inspect(&record, actor)?;

        // Pre-validate the whole batch; one bad value aborts everything
        let mut blockers = Vec::new();
        let mut parsed: Vec<Option<Decimal>> = Vec::with_capacity(updates.len());
        for update in updates {
            if record.item(update.item_id).is_none() {
                blockers.push(Blocker::new(
                    BlockerKind::UnknownItem {
                        item_id: update.item_id,
                    },
                    format!("Item {} is not on this record", update.item_id),
                ));
                parsed.push(None);
                continue;
            }
            match &update.value {
                Some(raw) => match Decimal::from_str(raw.trim()) {
                    Ok(value) => parsed.push(Some(value)),
                    Err(_) => {
                        blockers.push(Blocker::new(
                            BlockerKind::InvalidMeasurement {
                                item_id: update.item_id,
                                raw: raw.clone(),
                            },
                            format!("Value {raw:?} is not numeric"),
                        ));
                        parsed.push(None);
                    }
                },
                None => parsed.push(None),
            }
        }
        if !blockers.is_empty() {
            return Err(WorkflowError::Validation { blockers });
        }

        let now = Utc::now();
        for (update, value) in updates.iter().zip(parsed) {
            if let Some(item) = record.item_mut(update.item_id) {
                let run = MeasurementRun {
                    value,
                    unit: update.unit.clone().or_else(|| item.unit.clone()),
                    status: update.status,
                    comment: update.comment.clone(),
                    recorded_at: now,
                    by_actor_id: actor.actor_id.clone(),
                };
                item.record_run(run);
                if let Some(note) = &update.note {
                    item.inspector_note = Some(note.clone());
                }
            }
        }
        record.append_history(
            HistoryEntry::new(HistoryAction::ItemsUpdated, actor.actor_id.clone())
                .with_meta("items", json!(updates.len())),
        );
        Ok(self.gateway.update(&record).await?)
    }

    async fn send_to_hod_inner(
        &self,
        record_id: Uuid,
        hod_id: ActorId,
        recommendation: InspectorRecommendation,
        remark: Option<String>,
        actor: &ActorRef,
    ) -> Result<InspectionRecord, WorkflowError> {
        let mut record = self.gateway.load(record_id).await?;
        if record.status != RecordStatus::Submitted {
            return Err(self.invariant(format!(
                "send to HOD requires a submitted record, record {} is {}",
                record.id, record.status
            )));
        }
        self.require_bic(&record, actor)?;
        self.require_inspect(&record, actor)?;

        let remark = remark.filter(|r| !r.is_empty());
        if let Some(remark) = &remark {
            let len = remark.chars().count();
            if len > MAX_REMARKS_LEN {
                return Err(WorkflowError::validation(Blocker::new(
                    BlockerKind::RemarkTooLong {
                        len,
                        max: MAX_REMARKS_LEN,
                    },
                    format!("Remarks are limited to {MAX_REMARKS_LEN} characters"),
                )));
            }
        }

        let staged = self.evidence.staged_counts(record.id).await;
        let report = gate::evaluate(&record, &staged, Some(recommendation));
        if !report.ok {
            return Err(WorkflowError::Validation {
                blockers: report.missing,
            });
        }

        // Batch-commit staged attachments; a failure aborts the transition
        self.commit_evidence(&mut record).await?;

        // Critical failures force the overall recommendation to Reject
        let effective = if record.has_critical_failure() {
            if recommendation != InspectorRecommendation::Reject {
                warn!(
                    record_id = %record.id,
                    supplied = %recommendation,
                    "Critical item failed, overriding recommendation to reject"
                );
            }
            InspectorRecommendation::Reject
        } else {
            recommendation
        };

        record.hod_id = Some(hod_id.clone());
        record.bic = Some(hod_id.clone());
        if record.version.is_none() {
            record.version = Some(1);
        }
        if record.contractor_id.is_none() {
            record.contractor_id = Some(record.creator_id.clone());
        }
        record.inspector_recommendation = Some(effective);
        record.inspector_remarks = remark;
        record.inspector_reviewed_at = Some(Utc::now());
        record.status = RecordStatus::Recommended;
        record.append_history(
            HistoryEntry::new(HistoryAction::SentToHod, actor.actor_id.clone())
                .with_meta("hod", json!(hod_id.as_str()))
                .with_meta("recommendation", json!(effective.as_str()))
                .with_meta("critical_override", json!(effective != recommendation)),
        );

        info!(
            record_id = %record.id,
            hod = %hod_id,
            recommendation = %effective,
            "Recommended WIR to HOD"
        );
        Ok(self.gateway.update(&record).await?)
    }

    async fn finalize_inner(
        &self,
        record_id: Uuid,
        outcome: HodOutcome,
        remark: Option<String>,
        actor: &ActorRef,
    ) -> Result<InspectionRecord, WorkflowError> {
        let mut record = self.gateway.load(record_id).await?;
        if record.status != RecordStatus::Recommended {
            return Err(self.invariant(format!(
                "finalize requires a recommended record, record {} is {}",
                record.id, record.status
            )));
        }
        let capability = self.capability(&record, actor);
        if !capability.can_approve() {
            return Err(self.invariant(format!(
                "actor {} ({}) may not finalize",
                actor.actor_id, capability
            )));
        }

        self.commit_evidence(&mut record).await?;

        record.hod_outcome = Some(outcome);
        record.hod_decided_at = Some(Utc::now());
        record.hod_remarks = remark.filter(|r| !r.is_empty());
        record.bic = next_bic(
            outcome,
            record.inspector_recommendation,
            record.contractor_id.as_ref(),
        );
        record.status = match outcome {
            HodOutcome::Approve => RecordStatus::Approved,
            HodOutcome::Reject => RecordStatus::Rejected,
        };
        record.append_history(
            HistoryEntry::new(HistoryAction::Finalized, actor.actor_id.clone())
                .with_meta("outcome", json!(outcome.as_str())),
        );

        info!(
            record_id = %record.id,
            outcome = %outcome,
            bic = record.bic.as_ref().map(|b| b.as_str()).unwrap_or("-"),
            "Finalized WIR"
        );
        // Decision and status land in one write
        Ok(self.gateway.update(&record).await?)
    }

    async fn reschedule_inner(
        &self,
        record_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
        reason: String,
        actor: &ActorRef,
    ) -> Result<InspectionRecord, WorkflowError> {
        let mut record = self.gateway.load(record_id).await?;
        if record.status != RecordStatus::Submitted {
            return Err(self.invariant(format!(
                "reschedule requires a submitted record, record {} is {}",
                record.id, record.status
            )));
        }
        self.require_bic(&record, actor)?;
        self.require_inspect(&record, actor)?;

        record.reschedule = Some(Reschedule {
            date,
            time,
            reason,
            by_actor_id: actor.actor_id.clone(),
        });
        record.append_history(
            HistoryEntry::new(HistoryAction::Rescheduled, actor.actor_id.clone())
                .with_meta("date", json!(date))
                .with_meta("time", json!(time)),
        );
        Ok(self.gateway.update(&record).await?)
    }

    async fn spawn_follow_up_inner(
        &self,
        record_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
        note: Option<String>,
        actor: &ActorRef,
    ) -> Result<InspectionRecord, WorkflowError> {
        let mut parent = self.gateway.load(record_id).await?;
        if parent.status != RecordStatus::Approved {
            return Err(self.invariant(format!(
                "follow-up requires an approved record, record {} is {}",
                parent.id, parent.status
            )));
        }
        if parent.inspector_recommendation != Some(InspectorRecommendation::ApproveWithComments) {
            return Err(self.invariant(
                "follow-up requires an approve_with_comments recommendation".to_string(),
            ));
        }
        if parent.hod_outcome != Some(HodOutcome::Approve) {
            return Err(self.invariant("follow-up requires an approved HOD outcome".to_string()));
        }
        self.require_bic(&parent, actor)?;

        let latest = self.gateway.latest_version(&parent.code).await?;
        if let (Some(latest), Some(version)) = (latest, parent.version) {
            if latest > version {
                return Err(WorkflowError::validation(Blocker::new(
                    BlockerKind::FollowUpAlreadyChained {
                        latest_version: latest,
                    },
                    format!("Version {latest} is already chained from {}", parent.code),
                )));
            }
        }

        let child = derive_follow_up(&parent, date, time, note.as_deref(), &actor.actor_id)?;
        self.gateway.create(&child).await?;

        parent.append_history(
            HistoryEntry::new(HistoryAction::FollowUpSpawned, actor.actor_id.clone())
                .with_meta("child_record_id", json!(child.id))
                .with_meta("child_version", json!(child.version)),
        );
        self.gateway.update(&parent).await?;
        Ok(child)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Shared checks
    // ─────────────────────────────────────────────────────────────────────────────

    fn capability(&self, record: &InspectionRecord, actor: &ActorRef) -> ActingCapability {
        self.roles
            .acting_capability(record.project_id, &actor.base_role, &actor.actor_id)
    }

    fn require_bic(
        &self,
        record: &InspectionRecord,
        actor: &ActorRef,
    ) -> Result<(), WorkflowError> {
        if record.bic.as_ref() != Some(&actor.actor_id) {
            return Err(self.invariant(format!(
                "actor {} does not hold the ball for record {}",
                actor.actor_id, record.id
            )));
        }
        Ok(())
    }

    fn require_inspect(
        &self,
        record: &InspectionRecord,
        actor: &ActorRef,
    ) -> Result<(), WorkflowError> {
        let capability = self.capability(record, actor);
        if !capability.can_inspect() {
            return Err(self.invariant(format!(
                "actor {} ({}) may not inspect",
                actor.actor_id, capability
            )));
        }
        Ok(())
    }

    async fn commit_evidence(
        &self,
        record: &mut InspectionRecord,
    ) -> Result<(), WorkflowError> {
        self.evidence
            .commit_all(self.gateway.as_ref(), record)
            .await?;
        Ok(())
    }

    fn invariant(&self, message: String) -> WorkflowError {
        error!(%message, "Workflow invariant violation");
        WorkflowError::InvariantViolation(message)
    }

    async fn begin(&self, record_id: Uuid) -> Result<(), WorkflowError> {
        let mut in_flight = self.in_flight.lock().await;
        if !in_flight.insert(record_id) {
            return Err(self.invariant(format!(
                "a transition for record {record_id} is already in progress"
            )));
        }
        Ok(())
    }

    async fn finish(&self, record_id: Uuid) {
        self.in_flight.lock().await.remove(&record_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ChecklistDef, InMemoryChecklistCatalog, ItemTemplate};
    use crate::gateway::InMemoryGateway;
    use crate::roles::{BasePermissions, StaticPermissionSource};
    use std::collections::BTreeSet;
    use wir_poc_types::Requirement;

    const INSPECTOR_ROLE: &str = "site_engineer";
    const HOD_ROLE: &str = "discipline_head";
    const CONTRACTOR_ROLE: &str = "contractor_rep";

    struct Fixture {
        engine: LifecycleEngine,
        gateway: Arc<InMemoryGateway>,
        project_id: Uuid,
        checklist_id: Uuid,
    }

    fn checklist() -> ChecklistDef {
        ChecklistDef {
            id: Uuid::new_v4(),
            code: "CIV-SLAB".to_string(),
            title: "Slab pour checklist".to_string(),
            discipline: Some("Civil".to_string()),
            project_id: None,
            items: vec![
                ItemTemplate {
                    code: "CIV-001".to_string(),
                    name: "Slab level".to_string(),
                    requirement: Requirement::Mandatory,
                    unit: Some("mm".to_string()),
                    tolerance: None,
                    critical: true,
                    tags: BTreeSet::from(["measurement".to_string()]),
                },
                ItemTemplate {
                    code: "CIV-002".to_string(),
                    name: "Formwork cleanliness".to_string(),
                    requirement: Requirement::Optional,
                    unit: None,
                    tolerance: None,
                    critical: false,
                    tags: BTreeSet::new(),
                },
            ],
        }
    }

    fn fixture() -> Fixture {
        let project_id = Uuid::new_v4();
        let def = checklist();
        let checklist_id = def.id;
        let gateway = Arc::new(InMemoryGateway::new());
        let catalog = Arc::new(InMemoryChecklistCatalog::new([def]));
        let source = StaticPermissionSource::new()
            .with_role(
                project_id,
                INSPECTOR_ROLE,
                BasePermissions {
                    view: true,
                    raise: false,
                    review: true,
                    approve: false,
                },
            )
            .with_role(
                project_id,
                HOD_ROLE,
                BasePermissions {
                    view: true,
                    raise: false,
                    review: false,
                    approve: true,
                },
            )
            .with_role(
                project_id,
                CONTRACTOR_ROLE,
                BasePermissions {
                    view: true,
                    raise: true,
                    review: false,
                    approve: false,
                },
            );
        let engine = LifecycleEngine::new(
            gateway.clone(),
            catalog,
            RoleResolver::new(Arc::new(source)),
        );
        Fixture {
            engine,
            gateway,
            project_id,
            checklist_id,
        }
    }

    fn creator() -> ActorRef {
        ActorRef::new("C1", CONTRACTOR_ROLE)
    }

    fn inspector() -> ActorRef {
        ActorRef::new("U1", INSPECTOR_ROLE)
    }

    fn hod() -> ActorRef {
        ActorRef::new("H1", HOD_ROLE)
    }

    async fn draft(fx: &Fixture) -> InspectionRecord {
        fx.engine
            .create(
                fx.project_id,
                "WIR-CIV-0042",
                &creator(),
                RecordHeader {
                    title: "Slab pour inspection".to_string(),
                    discipline: Some("Civil".to_string()),
                    activity: Some("Pour".to_string()),
                    planned_date: NaiveDate::from_ymd_opt(2026, 8, 10),
                    planned_time: NaiveTime::from_hms_opt(9, 0, 0),
                    contractor_id: Some(ActorId::new("C1")),
                    checklist_selections: BTreeSet::from([fx.checklist_id]),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
    }

    async fn submitted(fx: &Fixture) -> InspectionRecord {
        let record = draft(fx).await;
        fx.engine
            .dispatch(record.id, ActorId::new("U1"), &creator())
            .await
            .unwrap()
    }

    fn update_for(record: &InspectionRecord, code: &str, status: ItemStatus, value: Option<&str>) -> ItemUpdate {
        let item = record.items.iter().find(|i| i.code == code).unwrap();
        ItemUpdate {
            item_id: item.id,
            status: Some(status),
            value: value.map(|v| v.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_dispatch_materializes_items_and_routes_bic() {
        let fx = fixture();
        let record = draft(&fx).await;
        let dispatched = fx
            .engine
            .dispatch(record.id, ActorId::new("U1"), &creator())
            .await
            .unwrap();

        assert_eq!(dispatched.status, RecordStatus::Submitted);
        assert_eq!(dispatched.version, Some(1));
        assert_eq!(dispatched.bic, Some(ActorId::new("U1")));
        assert_eq!(dispatched.inspector_id, Some(ActorId::new("U1")));
        assert_eq!(dispatched.items.len(), 2);
        assert_eq!(dispatched.items[0].sequence, 1);
        assert_eq!(
            dispatched.history.last().unwrap().action,
            HistoryAction::Dispatched
        );
    }

    #[tokio::test]
    async fn test_dispatch_requires_complete_header() {
        let fx = fixture();
        let record = fx
            .engine
            .create(
                fx.project_id,
                "WIR-CIV-0001",
                &creator(),
                RecordHeader {
                    title: "Bare".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let err = fx
            .engine
            .dispatch(record.id, ActorId::new("U1"), &creator())
            .await
            .unwrap_err();
        // discipline, activity, planned date, planned time, checklist: all
        // reported together
        assert_eq!(err.blockers().len(), 5);

        // Record untouched
        let stored = fx.gateway.load(record.id).await.unwrap();
        assert_eq!(stored.status, RecordStatus::Draft);
        assert!(stored.version.is_none());
    }

    #[tokio::test]
    async fn test_dispatch_twice_is_an_invariant_violation() {
        let fx = fixture();
        let record = submitted(&fx).await;
        let err = fx
            .engine
            .dispatch(record.id, ActorId::new("U2"), &creator())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn test_runner_update_batch_aborts_on_one_bad_value() {
        let fx = fixture();
        let record = submitted(&fx).await;

        let updates = vec![
            update_for(&record, "CIV-001", ItemStatus::Pass, Some("99.5")),
            update_for(&record, "CIV-002", ItemStatus::Pass, Some("not-a-number")),
        ];
        let err = fx
            .engine
            .runner_update(record.id, &updates, &inspector())
            .await
            .unwrap_err();
        match &err {
            WorkflowError::Validation { blockers } => {
                assert_eq!(blockers.len(), 1);
                assert!(matches!(
                    blockers[0].kind,
                    BlockerKind::InvalidMeasurement { .. }
                ));
            }
            other => panic!("unexpected error: {other}"),
        }

        // No partial apply: the good value was not persisted either
        let stored = fx.gateway.load(record.id).await.unwrap();
        assert!(stored.items.iter().all(|i| i.runs.is_empty()));
    }

    #[tokio::test]
    async fn test_runner_update_appends_runs() {
        let fx = fixture();
        let record = submitted(&fx).await;

        let first = vec![update_for(&record, "CIV-001", ItemStatus::Fail, Some("112"))];
        fx.engine
            .runner_update(record.id, &first, &inspector())
            .await
            .unwrap();
        let second = vec![update_for(&record, "CIV-001", ItemStatus::Pass, Some("101"))];
        let updated = fx
            .engine
            .runner_update(record.id, &second, &inspector())
            .await
            .unwrap();

        let item = updated.items.iter().find(|i| i.code == "CIV-001").unwrap();
        assert_eq!(item.runs.len(), 2);
        assert_eq!(item.inspector_status, Some(ItemStatus::Pass));
        assert_eq!(
            item.latest_run().and_then(|r| r.value),
            Some(Decimal::new(101, 0))
        );
    }

    #[tokio::test]
    async fn test_runner_update_requires_ball_in_court() {
        let fx = fixture();
        let record = submitted(&fx).await;
        let outsider = ActorRef::new("U2", INSPECTOR_ROLE);
        let updates = vec![update_for(&record, "CIV-001", ItemStatus::Pass, Some("100"))];
        let err = fx
            .engine
            .runner_update(record.id, &updates, &outsider)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn test_send_to_hod_blocked_until_gate_passes() {
        let fx = fixture();
        let record = submitted(&fx).await;

        let err = fx
            .engine
            .send_to_hod(
                record.id,
                ActorId::new("H1"),
                InspectorRecommendation::Approve,
                None,
                &inspector(),
            )
            .await
            .unwrap_err();
        // Mandatory item lacks verdict and measurement
        assert_eq!(err.blockers().len(), 2);

        let stored = fx.gateway.load(record.id).await.unwrap();
        assert_eq!(stored.status, RecordStatus::Submitted);
        assert!(stored.inspector_recommendation.is_none());
    }

    #[tokio::test]
    async fn test_critical_failure_forces_reject() {
        let fx = fixture();
        let record = submitted(&fx).await;
        let updates = vec![update_for(&record, "CIV-001", ItemStatus::Fail, Some("112"))];
        fx.engine
            .runner_update(record.id, &updates, &inspector())
            .await
            .unwrap();

        let recommended = fx
            .engine
            .send_to_hod(
                record.id,
                ActorId::new("H1"),
                InspectorRecommendation::Approve,
                Some("looks fine".to_string()),
                &inspector(),
            )
            .await
            .unwrap();

        assert_eq!(
            recommended.inspector_recommendation,
            Some(InspectorRecommendation::Reject)
        );
        assert_eq!(recommended.status, RecordStatus::Recommended);
        assert_eq!(recommended.bic, Some(ActorId::new("H1")));
        let entry = recommended.history.last().unwrap();
        assert_eq!(entry.meta["critical_override"], json!(true));
    }

    #[tokio::test]
    async fn test_remark_length_is_enforced() {
        let fx = fixture();
        let record = submitted(&fx).await;
        let updates = vec![update_for(&record, "CIV-001", ItemStatus::Pass, Some("100"))];
        fx.engine
            .runner_update(record.id, &updates, &inspector())
            .await
            .unwrap();

        let err = fx
            .engine
            .send_to_hod(
                record.id,
                ActorId::new("H1"),
                InspectorRecommendation::Approve,
                Some("x".repeat(MAX_REMARKS_LEN + 1)),
                &inspector(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err.blockers().first().map(|b| &b.kind),
            Some(BlockerKind::RemarkTooLong { .. })
        ));
    }

    #[tokio::test]
    async fn test_finalize_is_one_atomic_write() {
        let fx = fixture();
        let record = submitted(&fx).await;
        let updates = vec![update_for(&record, "CIV-001", ItemStatus::Pass, Some("100"))];
        fx.engine
            .runner_update(record.id, &updates, &inspector())
            .await
            .unwrap();
        fx.engine
            .send_to_hod(
                record.id,
                ActorId::new("H1"),
                InspectorRecommendation::ApproveWithComments,
                None,
                &inspector(),
            )
            .await
            .unwrap();

        let finalized = fx
            .engine
            .finalize(
                record.id,
                HodOutcome::Approve,
                Some("minor snags".to_string()),
                &hod(),
            )
            .await
            .unwrap();

        assert_eq!(finalized.status, RecordStatus::Approved);
        assert_eq!(finalized.hod_outcome, Some(HodOutcome::Approve));
        assert!(finalized.hod_decided_at.is_some());
        // Approve over approve_with_comments routes the ball to the contractor
        assert_eq!(finalized.bic, Some(ActorId::new("C1")));

        // The stored copy matches in full: decision and status landed together
        let stored = fx.gateway.load(record.id).await.unwrap();
        assert_eq!(stored.status, RecordStatus::Approved);
        assert_eq!(stored.hod_outcome, Some(HodOutcome::Approve));
    }

    #[tokio::test]
    async fn test_finalize_requires_approve_capability() {
        let fx = fixture();
        let record = submitted(&fx).await;
        let updates = vec![update_for(&record, "CIV-001", ItemStatus::Pass, Some("100"))];
        fx.engine
            .runner_update(record.id, &updates, &inspector())
            .await
            .unwrap();
        fx.engine
            .send_to_hod(
                record.id,
                ActorId::new("H1"),
                InspectorRecommendation::Approve,
                None,
                &inspector(),
            )
            .await
            .unwrap();

        let err = fx
            .engine
            .finalize(record.id, HodOutcome::Approve, None, &inspector())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn test_reschedule_keeps_status_version_bic() {
        let fx = fixture();
        let record = submitted(&fx).await;
        let rescheduled = fx
            .engine
            .reschedule(
                record.id,
                NaiveDate::from_ymd_opt(2026, 8, 12).unwrap(),
                NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
                "access not ready",
                &inspector(),
            )
            .await
            .unwrap();

        assert_eq!(rescheduled.status, record.status);
        assert_eq!(rescheduled.version, record.version);
        assert_eq!(rescheduled.bic, record.bic);
        let slot = rescheduled.reschedule.unwrap();
        assert_eq!(slot.reason, "access not ready");
        assert_eq!(slot.by_actor_id, ActorId::new("U1"));
    }

    #[tokio::test]
    async fn test_in_flight_guard_refuses_overlapping_transitions() {
        let fx = fixture();
        let record = draft(&fx).await;

        fx.engine.begin(record.id).await.unwrap();
        let err = fx
            .engine
            .dispatch(record.id, ActorId::new("U1"), &creator())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvariantViolation(_)));

        fx.engine.finish(record.id).await;
        fx.engine
            .dispatch(record.id, ActorId::new("U1"), &creator())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_conflict_surfaces_as_retryable() {
        let fx = fixture();
        let record = draft(&fx).await;

        // Another session writes behind the engine's back
        let mut stale = record.clone();
        let mut fresh = fx.gateway.load(record.id).await.unwrap();
        fresh.title = "Updated elsewhere".to_string();
        fx.gateway.update(&fresh).await.unwrap();

        stale.title = "Stale".to_string();
        let err = fx.gateway.update(&stale).await.unwrap_err();
        let mapped: WorkflowError = err.into();
        assert!(matches!(mapped, WorkflowError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_patch_only_while_draft() {
        let fx = fixture();
        let record = submitted(&fx).await;
        let err = fx
            .engine
            .patch(
                record.id,
                &HeaderPatch {
                    title: Some("Too late".to_string()),
                    ..Default::default()
                },
                &creator(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn test_spawn_follow_up_rejects_second_chain() {
        let fx = fixture();
        let record = submitted(&fx).await;
        let updates = vec![update_for(&record, "CIV-002", ItemStatus::Fail, None),
            update_for(&record, "CIV-001", ItemStatus::Pass, Some("100"))];
        fx.engine
            .runner_update(record.id, &updates, &inspector())
            .await
            .unwrap();
        fx.engine
            .send_to_hod(
                record.id,
                ActorId::new("H1"),
                InspectorRecommendation::ApproveWithComments,
                None,
                &inspector(),
            )
            .await
            .unwrap();
        fx.engine
            .finalize(record.id, HodOutcome::Approve, None, &hod())
            .await
            .unwrap();

        let contractor = ActorRef::new("C1", CONTRACTOR_ROLE);
        let date = NaiveDate::from_ymd_opt(2026, 8, 20).unwrap();
        let time = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let child = fx
            .engine
            .spawn_follow_up(record.id, date, time, None, &contractor)
            .await
            .unwrap();
        assert_eq!(child.version, Some(2));
        assert_eq!(child.prev_record_id, Some(record.id));

        // A second spawn from the same parent is blocked: version 2 exists
        let err = fx
            .engine
            .spawn_follow_up(record.id, date, time, None, &contractor)
            .await
            .unwrap_err();
        match err {
            WorkflowError::Validation { blockers } => {
                assert!(matches!(
                    blockers[0].kind,
                    BlockerKind::FollowUpAlreadyChained { latest_version: 2 }
                ));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_describe_lists_actions_and_blockers() {
        let fx = fixture();
        let record = submitted(&fx).await;

        let overview = fx.engine.describe(record.id, &inspector()).await.unwrap();
        assert_eq!(overview.capability, ActingCapability::Inspector);
        assert!(overview.available_actions.contains(&ActionKind::RunnerUpdate));
        assert!(overview.available_actions.contains(&ActionKind::SendToHod));
        // Verdict, measurement, and recommendation outstanding
        assert_eq!(overview.blockers.len(), 3);

        // A viewer gets no actions
        let viewer = ActorRef::new("V1", "unknown_role");
        let overview = fx.engine.describe(record.id, &viewer).await.unwrap();
        assert_eq!(overview.capability, ActingCapability::ViewerOnly);
        assert!(overview.available_actions.is_empty());
    }

    #[test]
    fn test_next_bic_is_total_over_all_combinations() {
        let contractor = ActorId::new("C1");
        let awc = Some(InspectorRecommendation::ApproveWithComments);
        let plain = Some(InspectorRecommendation::Approve);
        let reject = Some(InspectorRecommendation::Reject);

        // Approve + approve_with_comments: ball to the contractor
        assert_eq!(
            next_bic(HodOutcome::Approve, awc, Some(&contractor)),
            Some(contractor.clone())
        );
        assert_eq!(next_bic(HodOutcome::Approve, awc, None), None);

        // Approve + anything else: closed, nobody holds the ball
        assert_eq!(next_bic(HodOutcome::Approve, plain, Some(&contractor)), None);
        assert_eq!(next_bic(HodOutcome::Approve, plain, None), None);
        assert_eq!(next_bic(HodOutcome::Approve, reject, Some(&contractor)), None);
        assert_eq!(next_bic(HodOutcome::Approve, None, Some(&contractor)), None);

        // Reject: always back to the contractor when one exists
        assert_eq!(
            next_bic(HodOutcome::Reject, awc, Some(&contractor)),
            Some(contractor.clone())
        );
        assert_eq!(
            next_bic(HodOutcome::Reject, plain, Some(&contractor)),
            Some(contractor.clone())
        );
        assert_eq!(next_bic(HodOutcome::Reject, None, None), None);
    }
}

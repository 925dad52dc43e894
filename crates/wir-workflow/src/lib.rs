//! WIR Workflow Engine
//!
//! Drives the Work Inspection Request lifecycle: a Draft record is
//! dispatched to an inspector, measured against checklist items, recommended
//! to a head of discipline, finalized, and optionally re-spawned as a
//! follow-up carrying the failed items.
//!
//! The engine owns the legal transitions and the ball-in-court routing.
//! Persistence, checklist templates, and identity lookup are external
//! collaborators behind the narrow traits in [`gateway`], [`catalog`], and
//! [`directory`].

pub mod catalog;
pub mod directory;
pub mod engine;
pub mod evidence;
pub mod followup;
pub mod gate;
pub mod gateway;
pub mod roles;

pub use catalog::{
    CatalogError, ChecklistCatalog, ChecklistDef, ChecklistFilter, ChecklistSummary,
    InMemoryChecklistCatalog, ItemTemplate, YamlChecklistCatalog,
};
pub use directory::{DirectoryError, IdentityDirectory, InMemoryDirectory, Membership};
pub use engine::{next_bic, ActionKind, ActorRef, ItemUpdate, LifecycleEngine, RecordOverview};
pub use evidence::{EvidenceError, EvidenceStore, StagedFile};
pub use followup::derive_follow_up;
pub use gate::{evaluate, Blocker, BlockerKind, GateReport, StagedCounts};
pub use gateway::{AttachmentUpload, GatewayError, InMemoryGateway, PersistenceGateway};
pub use roles::{
    resolve, ActingCapability, BasePermissions, OverrideSet, OverrideState, PermissionSource,
    RoleResolver, StaticPermissionSource,
};

use uuid::Uuid;

/// Error taxonomy for lifecycle actions.
///
/// Failures are all-or-nothing: no variant is ever returned with the record
/// partially transitioned.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// A transition precondition is unmet. Carries the complete structured
    /// blocker list so every deficiency can be addressed in one pass.
    #[error("validation failed: {} blocker(s)", .blockers.len())]
    Validation { blockers: Vec<gate::Blocker> },

    /// The backing store rejected the write as stale. Re-read and retry.
    #[error("conflicting update for record {record_id}: re-read and retry")]
    Conflict { record_id: Uuid },

    /// Network or storage failure during upload or persistence. Retryable;
    /// staged state is untouched.
    #[error("transient I/O failure: {0}")]
    TransientIo(String),

    /// Caller misuse, e.g. finalizing a record that is not Recommended.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl WorkflowError {
    /// Single-blocker validation failure.
    pub(crate) fn validation(blocker: gate::Blocker) -> Self {
        Self::Validation {
            blockers: vec![blocker],
        }
    }

    pub fn blockers(&self) -> &[gate::Blocker] {
        match self {
            Self::Validation { blockers } => blockers,
            _ => &[],
        }
    }
}

impl From<gateway::GatewayError> for WorkflowError {
    fn from(err: gateway::GatewayError) -> Self {
        match err {
            gateway::GatewayError::Conflict(record_id) => Self::Conflict { record_id },
            gateway::GatewayError::Io(msg) => Self::TransientIo(msg),
            // Backing-store validation is surfaced verbatim, not reinterpreted
            gateway::GatewayError::Invalid(msg) => Self::validation(gate::Blocker::store(msg)),
            gateway::GatewayError::NotFound(id) => {
                Self::InvariantViolation(format!("record {id} not found"))
            }
        }
    }
}

impl From<catalog::CatalogError> for WorkflowError {
    fn from(err: catalog::CatalogError) -> Self {
        match err {
            catalog::CatalogError::UnknownChecklist(id) => {
                Self::InvariantViolation(format!("unknown checklist {id}"))
            }
            other => Self::TransientIo(other.to_string()),
        }
    }
}

impl From<evidence::EvidenceError> for WorkflowError {
    fn from(err: evidence::EvidenceError) -> Self {
        match &err {
            evidence::EvidenceError::Upload { source, .. }
            | evidence::EvidenceError::Delete { source, .. } => match source {
                gateway::GatewayError::Invalid(msg) => {
                    Self::validation(gate::Blocker::store(msg.clone()))
                }
                _ => Self::TransientIo(err.to_string()),
            },
            _ => Self::InvariantViolation(err.to_string()),
        }
    }
}

//! Shared domain types for the WIR POC.
//!
//! Single source of truth for the record, item, and audit shapes that cross
//! the engine boundary. Behavior lives in `wir-workflow`; this crate only
//! defines the data and the conversions (serde wire names, `FromStr`,
//! `Display`) every boundary agrees on.

pub mod actor;
pub mod history;
pub mod item;
pub mod record;

pub use actor::{ActorId, MemberProfile};
pub use history::{HistoryAction, HistoryEntry};
pub use item::{
    AttachmentKind, EvidenceRef, InspectionItem, ItemStatus, MeasurementRun, Requirement,
    Tolerance, MAX_EVIDENCE_PER_ITEM,
};
pub use record::{
    HeaderPatch, HodOutcome, InspectionRecord, InspectorRecommendation, RecordHeader,
    RecordStatus, Reschedule, MAX_REMARKS_LEN,
};

//! Audit History Types
//!
//! Every mutating action on a record appends exactly one `HistoryEntry`.
//! Entries are never edited or removed; the log is the audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::actor::ActorId;

/// Closed set of auditable actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Created,
    Patched,
    Dispatched,
    ItemsUpdated,
    Rescheduled,
    SentToHod,
    Finalized,
    FollowUpSpawned,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Patched => "patched",
            Self::Dispatched => "dispatched",
            Self::ItemsUpdated => "items_updated",
            Self::Rescheduled => "rescheduled",
            Self::SentToHod => "sent_to_hod",
            Self::Finalized => "finalized",
            Self::FollowUpSpawned => "follow_up_spawned",
        }
    }
}

impl std::fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One immutable audit row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub action: HistoryAction,
    pub actor_id: ActorId,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Additional context for the action (ids touched, counts, overrides).
    #[serde(default)]
    pub meta: HashMap<String, serde_json::Value>,
}

impl HistoryEntry {
    pub fn new(action: HistoryAction, actor_id: ActorId) -> Self {
        Self {
            action,
            actor_id,
            at: Utc::now(),
            notes: None,
            meta: HashMap::new(),
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }
}

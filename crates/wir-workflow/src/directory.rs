//! Identity Directory
//!
//! Supplies candidate actors (inspectors, HODs, contractor reps) to the
//! pickers outside this core. The engine itself only ever consumes resolved
//! actor ids; nothing here grants authority.

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use wir_poc_types::MemberProfile;

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("directory lookup failed: {0}")]
    Lookup(String),
}

/// Project membership with an activity window.
#[derive(Debug, Clone)]
pub struct Membership {
    pub project_id: Uuid,
    pub profile: MemberProfile,
    pub active_from: NaiveDate,
    /// Open-ended when `None`.
    pub active_to: Option<NaiveDate>,
}

impl Membership {
    fn active_on(&self, date: NaiveDate) -> bool {
        date >= self.active_from && self.active_to.map_or(true, |to| date <= to)
    }
}

/// Read-only view of project membership.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// Members holding `base_role` on the project who are active on the
    /// given date.
    async fn list_active_members(
        &self,
        project_id: Uuid,
        base_role: &str,
        on_date: NaiveDate,
    ) -> Result<Vec<MemberProfile>, DirectoryError>;
}

/// Fixed membership set, for tests and seeding.
#[derive(Default)]
pub struct InMemoryDirectory {
    members: Vec<Membership>,
}

impl InMemoryDirectory {
    pub fn new(members: impl IntoIterator<Item = Membership>) -> Self {
        Self {
            members: members.into_iter().collect(),
        }
    }
}

#[async_trait]
impl IdentityDirectory for InMemoryDirectory {
    async fn list_active_members(
        &self,
        project_id: Uuid,
        base_role: &str,
        on_date: NaiveDate,
    ) -> Result<Vec<MemberProfile>, DirectoryError> {
        let mut members: Vec<MemberProfile> = self
            .members
            .iter()
            .filter(|m| {
                m.project_id == project_id
                    && m.profile.base_role == base_role
                    && m.active_on(on_date)
            })
            .map(|m| m.profile.clone())
            .collect();
        members.sort_by(|a, b| a.actor_id.cmp(&b.actor_id));
        Ok(members)
    }
}

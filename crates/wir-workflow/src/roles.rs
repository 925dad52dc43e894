//! Actor Authority Resolution
//!
//! Combines a base per-role permission template with per-actor deny-only
//! overrides into an Acting Capability. Two explicit immutable layers: the
//! base matrix and the override snapshot, both fetched per resolution, so
//! the composition stays purely functional.
//!
//! Fail closed: an unresolvable base matrix or an unlisted flag combination
//! yields ViewerOnly. Overrides can only revoke, never grant.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use wir_poc_types::ActorId;

/// Base permission template for a role on a project: four independent flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasePermissions {
    pub view: bool,
    pub raise: bool,
    pub review: bool,
    pub approve: bool,
}

/// Per-capability override state. Deny-only: there is no Grant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideState {
    #[default]
    Inherit,
    Deny,
}

/// Per-actor override snapshot. An absent capability inherits the base.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideSet {
    #[serde(default)]
    pub view: OverrideState,
    #[serde(default)]
    pub raise: OverrideState,
    #[serde(default)]
    pub review: OverrideState,
    #[serde(default)]
    pub approve: OverrideState,
}

impl OverrideSet {
    pub fn deny_review() -> Self {
        Self {
            review: OverrideState::Deny,
            ..Default::default()
        }
    }

    pub fn deny_approve() -> Self {
        Self {
            approve: OverrideState::Deny,
            ..Default::default()
        }
    }

    pub fn deny_view() -> Self {
        Self {
            view: OverrideState::Deny,
            ..Default::default()
        }
    }
}

/// Derived workflow authority for an actor on a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActingCapability {
    Inspector,
    Hod,
    InspectorHod,
    ViewerOnly,
}

impl ActingCapability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inspector => "inspector",
            Self::Hod => "hod",
            Self::InspectorHod => "inspector_hod",
            Self::ViewerOnly => "viewer_only",
        }
    }

    /// May record runs, recommend, and reschedule.
    pub fn can_inspect(&self) -> bool {
        matches!(self, Self::Inspector | Self::InspectorHod)
    }

    /// May finalize a recommended record.
    pub fn can_approve(&self) -> bool {
        matches!(self, Self::Hod | Self::InspectorHod)
    }
}

impl std::fmt::Display for ActingCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Compose base and overrides into an Acting Capability.
///
/// `base` is `None` when the matrix could not be resolved (missing role or
/// project configuration); that resolves to ViewerOnly rather than erroring.
/// Combinations with `raise = true` are deliberately unclassified upstream
/// and also land on ViewerOnly.
pub fn resolve(base: Option<BasePermissions>, overrides: &OverrideSet) -> ActingCapability {
    let Some(base) = base else {
        return ActingCapability::ViewerOnly;
    };

    let view = base.view && overrides.view != OverrideState::Deny;
    let raise = base.raise && overrides.raise != OverrideState::Deny;
    let review = base.review && overrides.review != OverrideState::Deny;
    let approve = base.approve && overrides.approve != OverrideState::Deny;

    match (view, raise, review, approve) {
        (true, false, true, false) => ActingCapability::Inspector,
        (true, false, false, true) => ActingCapability::Hod,
        (true, false, true, true) => ActingCapability::InspectorHod,
        _ => ActingCapability::ViewerOnly,
    }
}

/// Source of the two permission layers. Implementations hand back immutable
/// snapshots; the resolver never mutates shared state.
pub trait PermissionSource: Send + Sync {
    /// Base template for a role on a project. `None` when the configuration
    /// is missing; the resolver fails closed on it.
    fn base_matrix(&self, project_id: Uuid, base_role: &str) -> Option<BasePermissions>;

    /// Deny-only override snapshot for an actor on a project.
    fn overrides(&self, project_id: Uuid, actor_id: &ActorId) -> OverrideSet;
}

/// Resolver over a permission source.
#[derive(Clone)]
pub struct RoleResolver {
    source: Arc<dyn PermissionSource>,
}

impl RoleResolver {
    pub fn new(source: Arc<dyn PermissionSource>) -> Self {
        Self { source }
    }

    pub fn acting_capability(
        &self,
        project_id: Uuid,
        base_role: &str,
        actor_id: &ActorId,
    ) -> ActingCapability {
        let base = self.source.base_matrix(project_id, base_role);
        let overrides = self.source.overrides(project_id, actor_id);
        resolve(base, &overrides)
    }
}

/// Fixed permission configuration, for tests and seeding.
#[derive(Default)]
pub struct StaticPermissionSource {
    roles: HashMap<(Uuid, String), BasePermissions>,
    overrides: HashMap<(Uuid, ActorId), OverrideSet>,
}

impl StaticPermissionSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_role(mut self, project_id: Uuid, role: &str, base: BasePermissions) -> Self {
        self.roles.insert((project_id, role.to_string()), base);
        self
    }

    pub fn with_override(
        mut self,
        project_id: Uuid,
        actor_id: ActorId,
        overrides: OverrideSet,
    ) -> Self {
        self.overrides.insert((project_id, actor_id), overrides);
        self
    }
}

impl PermissionSource for StaticPermissionSource {
    fn base_matrix(&self, project_id: Uuid, base_role: &str) -> Option<BasePermissions> {
        self.roles.get(&(project_id, base_role.to_string())).copied()
    }

    fn overrides(&self, project_id: Uuid, actor_id: &ActorId) -> OverrideSet {
        self.overrides
            .get(&(project_id, actor_id.clone()))
            .copied()
            .unwrap_or_default()
    }
}

//! Checklist Catalog
//!
//! Reusable requirement templates attachable to a record at dispatch.
//! Definitions are data-driven from YAML rather than hardcoded; the
//! filesystem catalog loads one checklist per file. Consulted only during
//! dispatch, never during follow-up creation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use uuid::Uuid;

use wir_poc_types::{InspectionItem, Requirement, Tolerance};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("unknown checklist: {0}")]
    UnknownChecklist(Uuid),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// One item template inside a checklist definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemTemplate {
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
}

impl ItemTemplate {
    /// Materialize a concrete item instance at the given position.
    pub fn materialize(&self, sequence: u32) -> InspectionItem {
        InspectionItem {
            id: Uuid::new_v4(),
            sequence,
            code: self.code.clone(),
            name: self.name.clone(),
            requirement: self.requirement,
            unit: self.unit.clone(),
            tolerance: self.tolerance,
            critical: self.critical,
            tags: self.tags.clone(),
            inspector_status: None,
            inspector_note: None,
            runs: Vec::new(),
            evidences: Vec::new(),
        }
    }
}

/// A checklist definition, as loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecklistDef {
    pub id: Uuid,
    pub code: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discipline: Option<String>,
    /// Restricts the checklist to one project; absent means shared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<Uuid>,
    pub items: Vec<ItemTemplate>,
}

impl ChecklistDef {
    fn visible_to(&self, project_id: Uuid) -> bool {
        self.project_id.is_none() || self.project_id == Some(project_id)
    }

    fn summary(&self) -> ChecklistSummary {
        ChecklistSummary {
            id: self.id,
            code: self.code.clone(),
            title: self.title.clone(),
            discipline: self.discipline.clone(),
            item_count: self.items.len(),
        }
    }
}

/// Listing row for pickers.
#[derive(Debug, Clone, Serialize)]
pub struct ChecklistSummary {
    pub id: Uuid,
    pub code: String,
    pub title: String,
    pub discipline: Option<String>,
    pub item_count: usize,
}

/// Listing filters. Empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct ChecklistFilter {
    pub discipline: Option<String>,
    pub search: Option<String>,
}

impl ChecklistFilter {
    fn matches(&self, def: &ChecklistDef) -> bool {
        if let Some(discipline) = &self.discipline {
            if def.discipline.as_deref() != Some(discipline.as_str()) {
                return false;
            }
        }
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            if !def.title.to_lowercase().contains(&needle)
                && !def.code.to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        true
    }
}

/// Checklist template source consulted at dispatch.
#[async_trait]
pub trait ChecklistCatalog: Send + Sync {
    async fn list_checklists(
        &self,
        project_id: Uuid,
        filter: &ChecklistFilter,
    ) -> Result<Vec<ChecklistSummary>, CatalogError>;

    async fn fetch_items(
        &self,
        project_id: Uuid,
        checklist_id: Uuid,
    ) -> Result<Vec<ItemTemplate>, CatalogError>;
}

/// Catalog over a fixed in-memory set of definitions, for tests and seeding.
#[derive(Default)]
pub struct InMemoryChecklistCatalog {
    defs: HashMap<Uuid, ChecklistDef>,
}

impl InMemoryChecklistCatalog {
    pub fn new(defs: impl IntoIterator<Item = ChecklistDef>) -> Self {
        Self {
            defs: defs.into_iter().map(|d| (d.id, d)).collect(),
        }
    }
}

#[async_trait]
impl ChecklistCatalog for InMemoryChecklistCatalog {
    async fn list_checklists(
        &self,
        project_id: Uuid,
        filter: &ChecklistFilter,
    ) -> Result<Vec<ChecklistSummary>, CatalogError> {
        let mut summaries: Vec<ChecklistSummary> = self
            .defs
            .values()
            .filter(|d| d.visible_to(project_id) && filter.matches(d))
            .map(|d| d.summary())
            .collect();
        summaries.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(summaries)
    }

    async fn fetch_items(
        &self,
        project_id: Uuid,
        checklist_id: Uuid,
    ) -> Result<Vec<ItemTemplate>, CatalogError> {
        self.defs
            .get(&checklist_id)
            .filter(|d| d.visible_to(project_id))
            .map(|d| d.items.clone())
            .ok_or(CatalogError::UnknownChecklist(checklist_id))
    }
}

/// Filesystem catalog: one checklist definition per `.yaml`/`.yml` file.
#[derive(Debug)]
pub struct YamlChecklistCatalog {
    defs: HashMap<Uuid, ChecklistDef>,
}

impl YamlChecklistCatalog {
    /// Load every checklist definition under a directory (non-recursive).
    pub async fn load_dir(dir: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let mut defs = HashMap::new();
        let mut entries = tokio::fs::read_dir(dir.as_ref()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_yaml = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e == "yaml" || e == "yml");
            if !is_yaml {
                continue;
            }
            let raw = tokio::fs::read_to_string(&path).await?;
            let def: ChecklistDef =
                serde_yaml::from_str(&raw).map_err(|source| CatalogError::Parse {
                    path: path.display().to_string(),
                    source,
                })?;
            tracing::debug!(checklist = %def.code, path = %path.display(), "Loaded checklist definition");
            defs.insert(def.id, def);
        }
        Ok(Self { defs })
    }
}

#[async_trait]
impl ChecklistCatalog for YamlChecklistCatalog {
    async fn list_checklists(
        &self,
        project_id: Uuid,
        filter: &ChecklistFilter,
    ) -> Result<Vec<ChecklistSummary>, CatalogError> {
        let mut summaries: Vec<ChecklistSummary> = self
            .defs
            .values()
            .filter(|d| d.visible_to(project_id) && filter.matches(d))
            .map(|d| d.summary())
            .collect();
        summaries.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(summaries)
    }

    async fn fetch_items(
        &self,
        project_id: Uuid,
        checklist_id: Uuid,
    ) -> Result<Vec<ItemTemplate>, CatalogError> {
        self.defs
            .get(&checklist_id)
            .filter(|d| d.visible_to(project_id))
            .map(|d| d.items.clone())
            .ok_or(CatalogError::UnknownChecklist(checklist_id))
    }
}

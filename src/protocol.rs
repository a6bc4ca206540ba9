//! Public request/response shapes for the HTTP API (serde ready).
//! Engine types that are already serialisable are returned as-is; this module
//! only holds what the wire needs on top of them.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{AttachmentHandle, EntityKind, EntityRef, Submission, SubmissionId, SubmissionState};
use crate::library::{CampaignRecord, ImportOptions, QuestRecord};
use crate::prereq::PrereqRelation;

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
}

#[derive(Debug, Deserialize)]
pub struct StartIn {
    pub quest_id: u64,
}

#[derive(Debug, Serialize)]
pub struct StartOut {
    pub submission_id: SubmissionId,
}

#[derive(Debug, Serialize)]
pub struct StateOut {
    pub submission_id: SubmissionId,
    pub state: SubmissionState,
}

/// Submission as shown to its owner and reviewers.
#[derive(Debug, Serialize)]
pub struct SubmissionOut {
    pub id: SubmissionId,
    pub quest_id: Option<u64>,
    pub quest_name: String,
    pub user_id: u64,
    pub ordinal: u32,
    pub state: SubmissionState,
    pub flagged: bool,
    pub comments: usize,
}

impl SubmissionOut {
    pub fn new(s: &Submission, quest_name: String) -> Self {
        Self {
            id: s.id,
            quest_id: s.quest_id,
            quest_name,
            user_id: s.user_id,
            ordinal: s.ordinal,
            state: s.state(),
            flagged: s.flagged_by.is_some(),
            comments: s.comments.len(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CommentIn {
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentHandle>,
}

#[derive(Debug, Deserialize)]
pub struct PreviousQuery {
    pub quest_id: u64,
    pub ordinal: u32,
}

#[derive(Debug, Serialize)]
pub struct PreviousOut {
    pub previous: Option<SubmissionId>,
}

#[derive(Debug, Serialize)]
pub struct IdsOut {
    pub ids: Vec<u64>,
}

/// Prerequisite record as authored over the API. Entity references use the
/// `kind:id` form, e.g. `quest:7`.
#[derive(Debug, Deserialize)]
pub struct PrereqIn {
    pub parent: String,
    pub main: String,
    #[serde(default = "one")]
    pub main_count: u32,
    #[serde(default)]
    pub main_invert: bool,
    #[serde(default)]
    pub alt: Option<String>,
    #[serde(default = "one")]
    pub alt_count: u32,
    #[serde(default)]
    pub alt_invert: bool,
}

fn one() -> u32 {
    1
}

impl PrereqIn {
    pub fn into_relation(self) -> Result<PrereqRelation, String> {
        let parse = |s: &str| crate::config::parse_entity_ref(s).ok_or_else(|| format!("bad entity reference {s:?}"));
        Ok(PrereqRelation {
            id: 0,
            parent: parse(&self.parent)?,
            main: parse(&self.main)?,
            main_count: self.main_count,
            main_invert: self.main_invert,
            alt: self.alt.as_deref().map(parse).transpose()?,
            alt_count: self.alt_count,
            alt_invert: self.alt_invert,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct CreatedOut {
    pub id: u64,
}

#[derive(Debug, Deserialize)]
pub struct ReliantQuery {
    #[serde(default)]
    pub active_only: bool,
}

#[derive(Debug, Serialize)]
pub struct ReliantOut {
    pub entity: EntityRef,
    pub reliant: Vec<EntityRef>,
}

#[derive(Debug, Deserialize)]
pub struct GrantIn {
    pub badge_id: u64,
    pub user_id: u64,
    #[serde(default)]
    pub do_not_grant_xp: bool,
}

#[derive(Debug, Deserialize)]
pub struct MapIn {
    pub name: String,
    /// `kind:id`
    pub seed: String,
}

/// A map with its graph parsed back out of the stored JSON.
#[derive(Debug, Serialize)]
pub struct MapOut {
    pub id: u64,
    pub name: String,
    pub seed: EntityRef,
    pub parent_map: Option<u64>,
    pub is_primary: bool,
    pub layout: crate::maps::LayoutParams,
    pub graph: serde_json::Value,
}

impl MapOut {
    pub fn new(m: &crate::maps::QuestMap) -> Self {
        let graph = serde_json::from_str(&m.graph_json).unwrap_or(serde_json::Value::Null);
        Self {
            id: m.id,
            name: m.name.clone(),
            seed: m.seed,
            parent_map: m.parent_map,
            is_primary: m.is_primary,
            layout: m.layout.clone(),
            graph,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AcceptedOut {
    pub accepted: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExportQuery {
    /// Comma-separated import ids to leave out of a campaign export.
    #[serde(default)]
    pub exclude: Option<String>,
}

impl ExportQuery {
    pub fn exclude_set(&self) -> Result<BTreeSet<Uuid>, String> {
        self.exclude
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Uuid::parse_str(s).map_err(|e| format!("bad import id {s:?}: {e}")))
            .collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct ImportQuestsIn {
    pub rows: Vec<QuestRecord>,
    #[serde(default)]
    pub options: ImportOptions,
}

#[derive(Debug, Deserialize)]
pub struct ImportCampaignIn {
    pub campaign: CampaignRecord,
    #[serde(default)]
    pub options: ImportOptions,
}

#[derive(Debug, Deserialize)]
pub struct KindPath {
    pub kind: String,
    pub id: u64,
}

impl KindPath {
    pub fn entity(&self) -> Option<EntityRef> {
        EntityKind::parse(&self.kind).map(|k| EntityRef::new(k, self.id))
    }
}

//! Loading deck configuration (per-deck settings, engine tuning, and an
//! optional seed catalogue) from TOML.
//!
//! See `DeckConfig` for the expected schema. Every field has a default, so a
//! missing file yields a usable (empty) deck.

use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use serde::Deserialize;
use tracing::{error, info};

use crate::domain::{
    Badge, BadgeType, Campaign, CommonData, Course, Enrolment, EntityKind, Group, Profile, Quest,
    Rank, Semester, SemesterId, UserId,
};

#[derive(Clone, Debug, Deserialize, Default)]
pub struct DeckConfig {
    #[serde(default)]
    pub settings: DeckSettings,
    #[serde(default)]
    pub engine: EngineTuning,
    #[serde(default)]
    pub catalogue: SeedCatalogue,
}

/// Options a teacher sets for their deck.
#[derive(Clone, Debug, Deserialize)]
pub struct DeckSettings {
    #[serde(default)]
    pub active_semester: Option<SemesterId>,
    #[serde(default = "default_true")]
    pub approve_oldest_first: bool,
    #[serde(default)]
    pub display_marks_calculation: bool,
    #[serde(default = "default_true")]
    pub cap_marks_at_100_percent: bool,
    /// System actor for automated notifications and grants.
    #[serde(default = "default_deck_ai")]
    pub deck_ai: UserId,
    #[serde(default = "default_approval_text")]
    pub blank_approval_text: String,
    #[serde(default = "default_return_text")]
    pub blank_return_text: String,
    #[serde(default = "default_quick_text")]
    pub submission_quick_text: String,
    /// Deck timezone as a fixed offset from UTC.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl Default for DeckSettings {
    fn default() -> Self {
        Self {
            active_semester: None,
            approve_oldest_first: true,
            display_marks_calculation: false,
            cap_marks_at_100_percent: true,
            deck_ai: default_deck_ai(),
            blank_approval_text: default_approval_text(),
            blank_return_text: default_return_text(),
            submission_quick_text: default_quick_text(),
            utc_offset_minutes: 0,
        }
    }
}

impl DeckSettings {
    pub fn timezone(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix())
    }
}

fn default_true() -> bool {
    true
}

fn default_deck_ai() -> UserId {
    1
}

fn default_approval_text() -> String {
    "(Approved - Auto generated text)".into()
}

fn default_return_text() -> String {
    "(Returned - Auto generated text)".into()
}

fn default_quick_text() -> String {
    "Please read the submission instructions more carefully. Thanks!".into()
}

/// Knobs for the background machinery.
#[derive(Clone, Debug, Deserialize)]
pub struct EngineTuning {
    #[serde(default = "default_bunching")]
    pub bunching_window_secs: u64,
    #[serde(default = "default_retry_cap")]
    pub task_retry_cap: u32,
    #[serde(default = "default_task_timeout")]
    pub task_timeout_secs: u64,
    #[serde(default = "default_backoff")]
    pub task_backoff_base_ms: u64,
    #[serde(default = "default_workers")]
    pub worker_count: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_label_len")]
    pub map_label_max_len: usize,
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self {
            bunching_window_secs: default_bunching(),
            task_retry_cap: default_retry_cap(),
            task_timeout_secs: default_task_timeout(),
            task_backoff_base_ms: default_backoff(),
            worker_count: default_workers(),
            queue_capacity: default_queue_capacity(),
            map_label_max_len: default_label_len(),
        }
    }
}

impl EngineTuning {
    /// Window in which deck-wide refreshes for one user are coalesced.
    pub fn bunching_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.bunching_window_secs).unwrap_or(i64::MAX).min(i64::MAX / 1000))
    }
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

fn default_bunching() -> u64 {
    60
}
fn default_retry_cap() -> u32 {
    10
}
fn default_task_timeout() -> u64 {
    30
}
fn default_backoff() -> u64 {
    500
}
fn default_workers() -> usize {
    4
}
fn default_queue_capacity() -> usize {
    1024
}
fn default_label_len() -> usize {
    44
}

/// Catalogue rows loaded into a fresh deck at startup. Ids given here are kept.
#[derive(Clone, Debug, Deserialize, Default)]
pub struct SeedCatalogue {
    #[serde(default)]
    pub semesters: Vec<Semester>,
    #[serde(default)]
    pub ranks: Vec<Rank>,
    #[serde(default)]
    pub campaigns: Vec<Campaign>,
    #[serde(default)]
    pub common_data: Vec<CommonData>,
    #[serde(default)]
    pub quests: Vec<Quest>,
    #[serde(default)]
    pub badge_types: Vec<BadgeType>,
    #[serde(default)]
    pub badges: Vec<Badge>,
    #[serde(default)]
    pub courses: Vec<Course>,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub users: Vec<Profile>,
    #[serde(default)]
    pub enrolments: Vec<Enrolment>,
    #[serde(default)]
    pub prereqs: Vec<PrereqSeed>,
}

/// Prerequisite row in TOML: `parent = "quest:3"`, `main = "badge:1"`.
#[derive(Clone, Debug, Deserialize)]
pub struct PrereqSeed {
    pub parent: String,
    pub main: String,
    #[serde(default = "default_count")]
    pub main_count: u32,
    #[serde(default)]
    pub main_invert: bool,
    #[serde(default)]
    pub alt: Option<String>,
    #[serde(default = "default_count")]
    pub alt_count: u32,
    #[serde(default)]
    pub alt_invert: bool,
}

fn default_count() -> u32 {
    1
}

/// Parse `"kind:id"` as used by `PrereqSeed`.
pub fn parse_entity_ref(s: &str) -> Option<crate::domain::EntityRef> {
    let (kind, id) = s.split_once(':')?;
    let kind = EntityKind::parse(kind.trim())?;
    let id = id.trim().parse::<u64>().ok()?;
    Some(crate::domain::EntityRef::new(kind, id))
}

pub fn parse_config(raw: &str) -> Result<DeckConfig, toml::de::Error> {
    toml::from_str::<DeckConfig>(raw)
}

/// Attempt to load `DeckConfig` from DECK_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_deck_config_from_env() -> Option<DeckConfig> {
    let path = std::env::var("DECK_CONFIG_PATH").ok()?;
    match std::fs::read_to_string(&path) {
        Ok(s) => match parse_config(&s) {
            Ok(cfg) => {
                info!(target: "bytedeck", %path, quests = cfg.catalogue.quests.len(), "Loaded deck config (TOML)");
                Some(cfg)
            }
            Err(e) => {
                error!(target: "bytedeck", %path, error = %e, "Failed to parse TOML config");
                None
            }
        },
        Err(e) => {
            error!(target: "bytedeck", %path, error = %e, "Failed to read TOML config file");
            None
        }
    }
}

//! Domain models: catalogue entities, submissions, user profiles, and the
//! tagged reference used wherever an entity of any kind can appear.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod catalogue;
pub mod question;
pub mod submission;
pub mod user;

pub use catalogue::*;
pub use question::*;
pub use submission::*;
pub use user::*;

pub type UserId = u64;
pub type QuestId = u64;
pub type BadgeId = u64;
pub type CampaignId = u64;
pub type RankId = u64;
pub type PrereqId = u64;
pub type SemesterId = u64;
pub type CourseId = u64;
pub type GroupId = u64;
pub type SubmissionId = u64;
pub type AssertionId = u64;
pub type MapId = u64;
pub type QuestionId = u64;

/// Every entity kind that can show up in a prerequisite relation or as a map seed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Quest,
    Badge,
    Campaign,
    Rank,
    Prereq,
    Course,
    Group,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Quest,
        EntityKind::Badge,
        EntityKind::Campaign,
        EntityKind::Rank,
        EntityKind::Prereq,
        EntityKind::Course,
        EntityKind::Group,
    ];

    pub fn label(self) -> &'static str {
        match self {
            EntityKind::Quest => "Quest",
            EntityKind::Badge => "Badge",
            EntityKind::Campaign => "Campaign",
            EntityKind::Rank => "Rank",
            EntityKind::Prereq => "Prereq",
            EntityKind::Course => "Course",
            EntityKind::Group => "Group",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        EntityKind::ALL
            .iter()
            .copied()
            .find(|k| k.label().eq_ignore_ascii_case(s))
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Tagged reference to an entity of any kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: u64,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: u64) -> Self {
        Self { kind, id }
    }
    pub fn quest(id: QuestId) -> Self {
        Self::new(EntityKind::Quest, id)
    }
    pub fn badge(id: BadgeId) -> Self {
        Self::new(EntityKind::Badge, id)
    }
    pub fn campaign(id: CampaignId) -> Self {
        Self::new(EntityKind::Campaign, id)
    }
    pub fn rank(id: RankId) -> Self {
        Self::new(EntityKind::Rank, id)
    }
    pub fn prereq(id: PrereqId) -> Self {
        Self::new(EntityKind::Prereq, id)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.label().to_lowercase(), self.id)
    }
}

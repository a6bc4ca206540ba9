//! What the engine knows about a user. Identity and authentication live with
//! the auth collaborator; it hands us a stable id and role bits.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{QuestId, UserId};

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub id: UserId,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub is_staff: bool,
    #[serde(default)]
    pub is_ta: bool,
    /// Progresses normally but earns no quest XP.
    #[serde(default)]
    pub not_earning_xp: bool,
    /// Quests the student has hidden from their own available list.
    #[serde(default)]
    pub hidden_quests: BTreeSet<QuestId>,
    /// `None` when invalidated.
    #[serde(skip)]
    pub xp_cached: Option<i64>,
}

impl Profile {
    pub fn student(id: UserId, username: impl Into<String>) -> Self {
        Self { id, username: username.into(), ..Default::default() }
    }

    pub fn staff(id: UserId, username: impl Into<String>) -> Self {
        Self { id, username: username.into(), is_staff: true, ..Default::default() }
    }

    /// May approve, return, skip and flag.
    pub fn can_review(&self) -> bool {
        self.is_staff || self.is_ta
    }

    pub fn is_quest_hidden(&self, quest_id: QuestId) -> bool {
        self.hidden_quests.contains(&quest_id)
    }
}

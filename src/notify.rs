//! Notification events handed to the (external) notification collaborator.
//!
//! The engine only produces records; delivery, read state and rendering are
//! someone else's job. Records accumulate in the deck outbox.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{EntityRef, MapId, SubmissionId, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verb {
    Started,
    Completed,
    AutoApproved,
    Returned,
    Approved,
    CommentedOn,
    Skipped,
    Flagged,
    Unflagged,
    Granted,
    Revoked,
    RankUp,
    Removed,
    TaskFailed,
}

impl Verb {
    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Started => "started",
            Verb::Completed => "completed",
            Verb::AutoApproved => "auto-approved",
            Verb::Returned => "returned",
            Verb::Approved => "approved",
            Verb::CommentedOn => "commented-on",
            Verb::Skipped => "skipped",
            Verb::Flagged => "flagged",
            Verb::Unflagged => "unflagged",
            Verb::Granted => "granted",
            Verb::Revoked => "revoked",
            Verb::RankUp => "rank-up",
            Verb::Removed => "removed",
            Verb::TaskFailed => "task-failed",
        }
    }

    /// Icon token the presentation layer maps to an actual glyph.
    fn default_icon(self) -> &'static str {
        match self {
            Verb::Approved | Verb::AutoApproved => "fa-thumbs-up",
            Verb::Returned => "fa-undo",
            Verb::Skipped => "fa-forward",
            Verb::Flagged | Verb::Unflagged => "fa-flag",
            Verb::Granted | Verb::Revoked => "fa-certificate",
            Verb::RankUp => "fa-level-up",
            Verb::TaskFailed | Verb::Removed => "fa-exclamation-triangle",
            Verb::Started | Verb::Completed | Verb::CommentedOn => "fa-comment",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Target {
    Submission(SubmissionId),
    Entity(EntityRef),
    Map(MapId),
    Task(String),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Notification {
    pub actor: UserId,
    pub verb: Verb,
    pub target: Target,
    pub affected_users: Vec<UserId>,
    pub icon: String,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        actor: UserId,
        verb: Verb,
        target: Target,
        affected_users: Vec<UserId>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            actor,
            verb,
            target,
            affected_users,
            icon: verb.default_icon().to_string(),
            timestamp,
        }
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = icon.into();
        self
    }

    pub fn concerns(&self, user: UserId) -> bool {
        self.actor == user || self.affected_users.contains(&user)
    }
}

//! Submissions (one student's attempt at one quest) and the comments they own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{QuestId, QuestionResponse, SemesterId, SubmissionId, UserId};

pub const DELETED_QUEST_LABEL: &str = "[DELETED QUEST]";

/// Opaque handle to an uploaded file; the engine never stores the bytes.
pub type AttachmentHandle = String;

/// Lifecycle state, derived from the booleans and timestamps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionState {
    NotStarted,
    InProgress,
    Returned,
    AwaitingApproval,
    Approved,
}

impl SubmissionState {
    /// Still editable by the student.
    pub fn is_open(self) -> bool {
        matches!(self, SubmissionState::InProgress | SubmissionState::Returned)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DraftComment {
    pub text: String,
    pub attachments: Vec<AttachmentHandle>,
    /// Answers to the quest's questions, carried across draft saves.
    #[serde(default)]
    pub responses: Vec<QuestionResponse>,
}

impl DraftComment {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.attachments.is_empty() && self.responses.is_empty()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Comment {
    pub author: UserId,
    pub text: String,
    pub attachments: Vec<AttachmentHandle>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub responses: Vec<QuestionResponse>,
}

impl Comment {
    pub fn new(author: UserId, text: String, attachments: Vec<AttachmentHandle>, timestamp: DateTime<Utc>) -> Self {
        Self { author, text, attachments, timestamp, responses: Vec::new() }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Submission {
    pub id: SubmissionId,
    /// `None` once the quest has been deleted.
    pub quest_id: Option<QuestId>,
    pub user_id: UserId,
    /// 1-based repetition index for this (user, quest).
    pub ordinal: u32,
    pub semester_id: Option<SemesterId>,
    pub is_completed: bool,
    pub is_approved: bool,
    pub first_time_completed: Option<DateTime<Utc>>,
    pub time_completed: Option<DateTime<Utc>>,
    pub time_approved: Option<DateTime<Utc>>,
    pub time_returned: Option<DateTime<Utc>>,
    pub do_not_grant_xp: bool,
    pub flagged_by: Option<UserId>,
    pub draft_text: Option<String>,
    pub draft_comment: Option<DraftComment>,
    pub xp_requested: u32,
    pub comments: Vec<Comment>,
    pub created: DateTime<Utc>,
}

impl Submission {
    pub fn new(
        id: SubmissionId,
        quest_id: QuestId,
        user_id: UserId,
        ordinal: u32,
        semester_id: Option<SemesterId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            quest_id: Some(quest_id),
            user_id,
            ordinal,
            semester_id,
            is_completed: false,
            is_approved: false,
            first_time_completed: None,
            time_completed: None,
            time_approved: None,
            time_returned: None,
            do_not_grant_xp: false,
            flagged_by: None,
            draft_text: None,
            draft_comment: None,
            xp_requested: 0,
            comments: Vec::new(),
            created: now,
        }
    }

    pub fn state(&self) -> SubmissionState {
        match (self.is_completed, self.is_approved) {
            (true, true) => SubmissionState::Approved,
            (true, false) => SubmissionState::AwaitingApproval,
            (false, _) if self.time_returned.is_some() => SubmissionState::Returned,
            (false, _) => SubmissionState::InProgress,
        }
    }

    pub fn is_approved(&self) -> bool {
        self.state() == SubmissionState::Approved
    }

    /// Counts toward XP: approved and not transferred/skipped.
    pub fn grants_xp(&self) -> bool {
        self.is_approved() && !self.do_not_grant_xp
    }

    /// Reference instant for repeat cooldowns.
    pub fn cooldown_anchor(&self) -> Option<DateTime<Utc>> {
        self.first_time_completed.or(self.time_completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Submission {
        Submission::new(1, 10, 100, 1, Some(1), Utc::now())
    }

    #[test]
    fn state_follows_flags() {
        let mut s = fresh();
        assert_eq!(s.state(), SubmissionState::InProgress);
        s.is_completed = true;
        assert_eq!(s.state(), SubmissionState::AwaitingApproval);
        s.is_approved = true;
        assert_eq!(s.state(), SubmissionState::Approved);
        assert!(s.grants_xp());
        s.do_not_grant_xp = true;
        assert!(!s.grants_xp());
    }

    #[test]
    fn returned_needs_a_return_time() {
        let mut s = fresh();
        s.time_returned = Some(Utc::now());
        assert_eq!(s.state(), SubmissionState::Returned);
        assert!(s.state().is_open());
    }
}

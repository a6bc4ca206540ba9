//! Extra submission fields a quest can ask for, and the answers a student
//! gives to them.
//!
//! Answers belong to the submission that carries them (inside its draft or
//! a sealed comment), so dropping or deleting the submission removes them.
//! Deleting a question keeps existing answers with a null question.

use serde::{Deserialize, Serialize};

use super::{AttachmentHandle, QuestId, QuestionId};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    #[default]
    ShortAnswer,
    LongAnswer,
    FileUpload,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Question {
    #[serde(default)]
    pub id: QuestionId,
    #[serde(default)]
    pub quest_id: QuestId,
    /// Display order within the quest; unique per quest.
    #[serde(default)]
    pub ordinal: u32,
    #[serde(default, rename = "type")]
    pub question_type: QuestionType,
    pub instructions: String,
    /// Shown to the marker only.
    #[serde(default)]
    pub solution_text: Option<String>,
    #[serde(default)]
    pub marker_notes: Option<String>,
    #[serde(default = "required_default")]
    pub required: bool,
}

fn required_default() -> bool {
    true
}

impl Question {
    pub fn new(question_type: QuestionType, instructions: impl Into<String>) -> Self {
        Self {
            id: 0,
            quest_id: 0,
            ordinal: 0,
            question_type,
            instructions: instructions.into(),
            solution_text: None,
            marker_notes: None,
            required: true,
        }
    }

    pub fn for_student(self) -> Self {
        Self { solution_text: None, marker_notes: None, ..self }
    }

    /// Does `answer` count as answering this question?
    pub fn answered_by(&self, answer: &QuestionResponse) -> bool {
        match self.question_type {
            QuestionType::FileUpload => answer.file.as_deref().is_some_and(|f| !f.trim().is_empty()),
            QuestionType::ShortAnswer | QuestionType::LongAnswer => {
                answer.text.as_deref().is_some_and(|t| !t.trim().is_empty())
            }
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct QuestionResponse {
    /// `None` once the question has been deleted.
    pub question_id: Option<QuestionId>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub file: Option<AttachmentHandle>,
}

/// Fold `incoming` answers over `current`, one answer per question; a later
/// answer to the same question replaces the earlier one.
pub fn merge_responses(current: &mut Vec<QuestionResponse>, incoming: Vec<QuestionResponse>) {
    for answer in incoming {
        match current.iter_mut().find(|a| a.question_id.is_some() && a.question_id == answer.question_id) {
            Some(slot) => *slot = answer,
            None => current.push(answer),
        }
    }
}

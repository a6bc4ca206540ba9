//! Submission state machine.
//!
//! Every transition runs against `&mut DeckData` and applies its side effects
//! (XP invalidation, badge sweep, notifications, queued refreshes) before
//! returning, so under the deck write lock a transition and its effects
//! commit together.
//!
//! ```text
//! NotStarted       --start-->    InProgress
//! InProgress       --complete--> AwaitingApproval   (auto-approves when verification is off)
//! InProgress       --drop-->     (deleted)
//! AwaitingApproval --approve-->  Approved
//! AwaitingApproval --return-->   Returned
//! Returned         --complete--> AwaitingApproval
//! AwaitingApproval --skip-->     Approved (no XP)
//! Approved         --comment-->  Approved
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::availability;
use crate::badges;
use crate::domain::*;
use crate::error::{EngineError, Result};
use crate::ledger;
use crate::notify::{Notification, Target, Verb};
use crate::store::DeckData;
use crate::tasks::Task;

/// Comment text a student may use to submit without a comment when the quest
/// does not require verification.
pub const SKIP_TOKEN: &str = "skip";

#[derive(Clone, Debug, Default, Deserialize)]
pub struct DraftInput {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentHandle>,
    #[serde(default)]
    pub responses: Vec<QuestionResponse>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct CompleteInput {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentHandle>,
    /// Answers to the quest's questions; merged over any saved in the draft.
    #[serde(default)]
    pub responses: Vec<QuestionResponse>,
    /// Only honoured when the quest lets students enter XP.
    #[serde(default)]
    pub xp_requested: Option<u32>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ReviewInput {
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentHandle>,
    /// Approve without granting XP (credit transferred from elsewhere).
    #[serde(default)]
    pub transfer: bool,
}

/// What an approval set in motion.
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct ApprovalOutcome {
    pub submission_id: SubmissionId,
    pub badges_granted: Vec<AssertionId>,
    pub xp_before: i64,
    pub xp_after: i64,
    pub ranks_reached: Vec<String>,
}

fn transition_error(action: &'static str, from: SubmissionState) -> EngineError {
    EngineError::StateTransition { action, from }
}

fn ensure_owner(sub: &Submission, user: UserId) -> Result<()> {
    if sub.user_id != user {
        return Err(EngineError::PermissionDenied(format!("submission {} belongs to another user", sub.id)));
    }
    Ok(())
}

fn ensure_reviewer(deck: &DeckData, user: UserId) -> Result<()> {
    if !deck.user(user)?.can_review() {
        return Err(EngineError::PermissionDenied(format!("user {user} cannot review submissions")));
    }
    Ok(())
}

/// Staff who hear about a student's submission.
fn reviewers_for(deck: &DeckData, quest: Option<&Quest>) -> Vec<UserId> {
    match quest.and_then(|q| q.specific_teacher_to_notify) {
        Some(teacher) => vec![teacher],
        None => deck.staff_ids(),
    }
}

pub fn next_ordinal(deck: &DeckData, user: UserId, quest: QuestId) -> u32 {
    deck.submissions_for(user, quest)
        .iter()
        .map(|s| s.ordinal)
        .max()
        .unwrap_or(0)
        + 1
}

/// Open a new submission, or return the still-open one if there is one.
#[instrument(level = "info", skip(deck, now), fields(user_id = user, quest_id = quest_id))]
pub fn start(deck: &mut DeckData, user: UserId, quest_id: QuestId, now: DateTime<Utc>) -> Result<SubmissionId> {
    deck.user(user)?;
    let quest = deck.quest(quest_id)?.clone();
    if let Some(open) = deck.open_submission(user, quest_id) {
        debug!(target: "quest", submission_id = open.id, "Start redirected to open submission");
        return Ok(open.id);
    }
    if !availability::available_for(deck, user, quest_id, now) {
        return Err(EngineError::UnavailableQuest(quest_id));
    }
    let ordinal = next_ordinal(deck, user, quest_id);
    let id = deck.allocate_id();
    let semester = deck.active_semester();
    deck.submissions.insert(id, Submission::new(id, quest_id, user, ordinal, semester, now));
    info!(target: "quest", submission_id = id, ordinal, "Submission started");
    deck.notify(Notification::new(
        user,
        Verb::Started,
        Target::Submission(id),
        quest.specific_teacher_to_notify.into_iter().collect(),
        now,
    ));
    Ok(id)
}

/// Store work in progress on an editable submission.
#[instrument(level = "debug", skip(deck, input, now), fields(submission_id = id))]
pub fn save_draft(deck: &mut DeckData, user: UserId, id: SubmissionId, input: DraftInput, now: DateTime<Utc>) -> Result<()> {
    let sub = deck.submission_mut(id)?;
    ensure_owner(sub, user)?;
    let from = sub.state();
    if !from.is_open() {
        return Err(transition_error("save a draft of", from));
    }
    let draft = sub.draft_comment.get_or_insert_with(DraftComment::default);
    draft.text = input.text.clone();
    for a in input.attachments {
        if !draft.attachments.contains(&a) {
            draft.attachments.push(a);
        }
    }
    merge_responses(&mut draft.responses, input.responses);
    sub.draft_text = Some(input.text);
    debug!(target: "quest", submission_id = id, at = %now, "Draft saved");
    Ok(())
}

/// Submit for review. Auto-approves when the quest needs no verification.
#[instrument(level = "info", skip(deck, input, now), fields(user_id = user, submission_id = id))]
pub fn complete(
    deck: &mut DeckData,
    user: UserId,
    id: SubmissionId,
    input: CompleteInput,
    now: DateTime<Utc>,
) -> Result<SubmissionState> {
    let sub = deck.submission(id)?;
    ensure_owner(sub, user)?;
    let from = sub.state();
    if !from.is_open() {
        return Err(transition_error("complete", from));
    }
    let quest = sub
        .quest_id
        .and_then(|q| deck.quests.get(&q))
        .cloned()
        .ok_or_else(|| EngineError::not_found(DELETED_QUEST_LABEL))?;

    let draft = sub.draft_comment.clone().unwrap_or_default();
    let text = if input.text.trim().is_empty() { draft.text } else { input.text };
    let mut attachments = draft.attachments;
    attachments.extend(input.attachments);
    let mut responses = draft.responses;
    merge_responses(&mut responses, input.responses);
    check_required_answers(deck, quest.id, &responses)?;
    let has_content = !text.trim().is_empty() || !attachments.is_empty() || !responses.is_empty();
    if quest.verification_required && !has_content {
        return Err(EngineError::InvalidInput("a comment or an attachment is required to complete this quest".into()));
    }
    let skip_token = !quest.verification_required && text.trim().eq_ignore_ascii_case(SKIP_TOKEN);

    let xp_before = ledger::xp(deck, user);
    let sub = deck.submission_mut(id)?;
    if has_content && !(skip_token && attachments.is_empty() && responses.is_empty()) {
        let mut sealed = Comment::new(user, text, attachments, now);
        sealed.responses = responses;
        sub.comments.push(sealed);
    }
    sub.draft_comment = None;
    sub.draft_text = None;
    sub.is_completed = true;
    sub.time_completed = Some(now);
    if sub.first_time_completed.is_none() {
        sub.first_time_completed = Some(now);
    }
    if quest.xp_can_be_entered_by_students {
        sub.xp_requested = input.xp_requested.unwrap_or(quest.xp).max(quest.xp);
    }

    if quest.verification_required {
        info!(target: "quest", submission_id = id, "Submission completed; awaiting approval");
        let reviewers = reviewers_for(deck, Some(&quest));
        deck.notify(Notification::new(user, Verb::Completed, Target::Submission(id), reviewers, now));
        return Ok(SubmissionState::AwaitingApproval);
    }

    sub.is_approved = true;
    sub.time_approved = Some(now);
    info!(target: "quest", submission_id = id, "Submission auto-approved");
    let actor = deck.settings.deck_ai;
    deck.notify(Notification::new(actor, Verb::AutoApproved, Target::Submission(id), vec![user], now));
    after_approval(deck, id, user, xp_before, now);
    Ok(SubmissionState::Approved)
}

fn check_required_answers(deck: &DeckData, quest: QuestId, responses: &[QuestionResponse]) -> Result<()> {
    for q in deck.questions_for(quest).into_iter().filter(|q| q.required) {
        let answered = responses
            .iter()
            .any(|a| a.question_id == Some(q.id) && q.answered_by(a));
        if !answered {
            return Err(EngineError::InvalidInput(format!("question {} must be answered", q.ordinal)));
        }
    }
    Ok(())
}

/// Delete an editable submission along with its draft and answers.
#[instrument(level = "info", skip(deck), fields(user_id = user, submission_id = id))]
pub fn drop_submission(deck: &mut DeckData, user: UserId, id: SubmissionId) -> Result<Submission> {
    let sub = deck.submission(id)?;
    ensure_owner(sub, user)?;
    let from = sub.state();
    if !from.is_open() {
        return Err(transition_error("drop", from));
    }
    let removed = deck.submissions.remove(&id).ok_or_else(|| EngineError::not_found(format!("Submission {id}")))?;
    info!(target: "quest", submission_id = id, "Submission dropped");
    Ok(removed)
}

fn review_comment(text: String, fallback: &str) -> String {
    if text.trim().is_empty() {
        fallback.to_string()
    } else {
        text
    }
}

/// XP invalidation, badge sweep, rank-up notices and a queued cache refresh.
fn after_approval(
    deck: &mut DeckData,
    id: SubmissionId,
    user: UserId,
    xp_before: i64,
    now: DateTime<Utc>,
) -> ApprovalOutcome {
    deck.invalidate_user(user);
    let badges_granted = badges::sweep(deck, user, now);
    let xp_after = ledger::refresh_xp(deck, user);
    let crossed = ledger::ranks_crossed(deck, xp_before, xp_after);
    let actor = deck.settings.deck_ai;
    for rank in &crossed {
        info!(target: "quest", user_id = user, rank = %rank.name, "Rank up");
        let notice = Notification::new(actor, Verb::RankUp, Target::Entity(EntityRef::rank(rank.id)), vec![user], now);
        deck.notify(match rank.icon.clone() {
            Some(icon) => notice.with_icon(icon),
            None => notice,
        });
    }
    deck.enqueue(Task::RefreshAvailability { user_id: user }, None);
    ApprovalOutcome {
        submission_id: id,
        badges_granted,
        xp_before,
        xp_after,
        ranks_reached: crossed.into_iter().map(|r| r.name).collect(),
    }
}

#[instrument(level = "info", skip(deck, input, now), fields(submission_id = id, transfer = input.transfer))]
pub fn approve(
    deck: &mut DeckData,
    reviewer: UserId,
    id: SubmissionId,
    input: ReviewInput,
    now: DateTime<Utc>,
) -> Result<ApprovalOutcome> {
    ensure_reviewer(deck, reviewer)?;
    let sub = deck.submission(id)?;
    let from = sub.state();
    if from != SubmissionState::AwaitingApproval {
        return Err(transition_error("approve", from));
    }
    let user = sub.user_id;
    let xp_before = ledger::xp(deck, user);
    let text = review_comment(input.comment, &deck.settings.blank_approval_text);

    let sub = deck.submission_mut(id)?;
    sub.is_approved = true;
    sub.time_approved = Some(now);
    if input.transfer {
        sub.do_not_grant_xp = true;
    }
    sub.comments.push(Comment::new(reviewer, text, input.attachments, now));
    info!(target: "quest", submission_id = id, user_id = user, "Submission approved");
    deck.notify(Notification::new(reviewer, Verb::Approved, Target::Submission(id), vec![user], now));
    Ok(after_approval(deck, id, user, xp_before, now))
}

/// Send back to the student for more work.
#[instrument(level = "info", skip(deck, input, now), fields(submission_id = id))]
pub fn return_submission(
    deck: &mut DeckData,
    reviewer: UserId,
    id: SubmissionId,
    input: ReviewInput,
    now: DateTime<Utc>,
) -> Result<()> {
    ensure_reviewer(deck, reviewer)?;
    let from = deck.submission(id)?.state();
    if from != SubmissionState::AwaitingApproval {
        return Err(transition_error("return", from));
    }
    let text = review_comment(input.comment, &deck.settings.blank_return_text);
    let sub = deck.submission_mut(id)?;
    sub.is_completed = false;
    sub.is_approved = false;
    sub.time_returned = Some(now);
    sub.comments.push(Comment::new(reviewer, text, input.attachments, now));
    let user = sub.user_id;
    info!(target: "quest", submission_id = id, user_id = user, "Submission returned");
    deck.invalidate_user(user);
    deck.notify(Notification::new(reviewer, Verb::Returned, Target::Submission(id), vec![user], now));
    deck.enqueue(Task::RefreshAvailability { user_id: user }, None);
    Ok(())
}

/// Approve without XP.
#[instrument(level = "info", skip(deck, now), fields(submission_id = id))]
pub fn skip(deck: &mut DeckData, reviewer: UserId, id: SubmissionId, now: DateTime<Utc>) -> Result<ApprovalOutcome> {
    ensure_reviewer(deck, reviewer)?;
    let sub = deck.submission(id)?;
    let from = sub.state();
    if from != SubmissionState::AwaitingApproval {
        return Err(transition_error("skip", from));
    }
    let user = sub.user_id;
    let xp_before = ledger::xp(deck, user);
    let sub = deck.submission_mut(id)?;
    sub.is_approved = true;
    sub.time_approved = Some(now);
    sub.do_not_grant_xp = true;
    info!(target: "quest", submission_id = id, user_id = user, "Submission skipped");
    deck.notify(Notification::new(reviewer, Verb::Skipped, Target::Submission(id), vec![user], now));
    Ok(after_approval(deck, id, user, xp_before, now))
}

/// Follow-up comment on an approved submission. No state change.
#[instrument(level = "info", skip(deck, text, attachments, now), fields(submission_id = id))]
pub fn comment(
    deck: &mut DeckData,
    author: UserId,
    id: SubmissionId,
    text: String,
    attachments: Vec<AttachmentHandle>,
    now: DateTime<Utc>,
) -> Result<()> {
    let reviewer = deck.user(author)?.can_review();
    let sub = deck.submission(id)?;
    if sub.user_id != author && !reviewer {
        return Err(EngineError::PermissionDenied(format!("user {author} cannot comment on submission {id}")));
    }
    let from = sub.state();
    if from != SubmissionState::Approved {
        return Err(transition_error("comment on", from));
    }
    if text.trim().is_empty() && attachments.is_empty() {
        return Err(EngineError::InvalidInput("comment is empty".into()));
    }
    let owner = sub.user_id;
    let quest = sub.quest_id.and_then(|q| deck.quests.get(&q)).cloned();
    let affected = if author == owner { reviewers_for(deck, quest.as_ref()) } else { vec![owner] };
    deck.submission_mut(id)?
        .comments
        .push(Comment::new(author, text, attachments, now));
    deck.notify(Notification::new(author, Verb::CommentedOn, Target::Submission(id), affected, now));
    Ok(())
}

fn set_flag(deck: &mut DeckData, reviewer: UserId, id: SubmissionId, on: bool, now: DateTime<Utc>) -> Result<()> {
    ensure_reviewer(deck, reviewer)?;
    let sub = deck.submission_mut(id)?;
    sub.flagged_by = on.then_some(reviewer);
    let verb = if on { Verb::Flagged } else { Verb::Unflagged };
    info!(target: "quest", submission_id = id, %verb, "Submission flag changed");
    deck.notify(Notification::new(reviewer, verb, Target::Submission(id), deck.staff_ids(), now));
    Ok(())
}

/// Mark for follow-up by staff.
pub fn flag(deck: &mut DeckData, reviewer: UserId, id: SubmissionId, now: DateTime<Utc>) -> Result<()> {
    set_flag(deck, reviewer, id, true, now)
}

pub fn unflag(deck: &mut DeckData, reviewer: UserId, id: SubmissionId, now: DateTime<Utc>) -> Result<()> {
    set_flag(deck, reviewer, id, false, now)
}

/// The submission with ordinal `ordinal - 1` for (user, quest). Duplicate
/// ordinals trigger a repair and one retry.
pub fn get_previous(deck: &mut DeckData, user: UserId, quest: QuestId, ordinal: u32) -> Result<Option<SubmissionId>> {
    if ordinal <= 1 {
        return Ok(None);
    }
    let wanted = ordinal - 1;
    for attempt in 0..2 {
        let hits: Vec<SubmissionId> = deck
            .submissions_for(user, quest)
            .into_iter()
            .filter(|s| s.ordinal == wanted)
            .map(|s| s.id)
            .collect();
        match hits.as_slice() {
            [] => return Ok(None),
            [only] => return Ok(Some(*only)),
            _ if attempt == 0 => {
                warn!(target: "quest", user_id = user, quest_id = quest, ordinal = wanted, count = hits.len(), "Duplicate ordinals; repairing");
                repair_ordinals(deck, user, quest, wanted);
            }
            _ => {}
        }
    }
    Err(EngineError::DuplicateOrdinal { user_id: user, quest_id: quest, ordinal: wanted })
}

/// Renumber rows with ordinal >= `from` by completion time (uncompleted last).
pub fn repair_ordinals(deck: &mut DeckData, user: UserId, quest: QuestId, from: u32) -> usize {
    let from = from.max(1);
    let mut rows: Vec<(bool, Option<DateTime<Utc>>, DateTime<Utc>, SubmissionId)> = deck
        .submissions_for(user, quest)
        .into_iter()
        .filter(|s| s.ordinal >= from)
        .map(|s| (s.time_completed.is_none(), s.time_completed, s.created, s.id))
        .collect();
    rows.sort();
    for (i, (_, _, _, id)) in rows.iter().enumerate() {
        if let Some(s) = deck.submissions.get_mut(id) {
            s.ordinal = from + i as u32;
        }
    }
    info!(target: "quest", user_id = user, quest_id = quest, from, renumbered = rows.len(), "Ordinals repaired");
    rows.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeckSettings;
    use crate::domain::{Badge, Course, Enrolment, Profile, Rank, Semester};
    use crate::prereq;
    use chrono::{Duration, NaiveDate};

    const STAFF: UserId = 1;
    const U: UserId = 20;

    fn deck() -> DeckData {
        let mut settings = DeckSettings::default();
        settings.active_semester = Some(3);
        let mut d = DeckData::new(settings);
        d.insert_user(Profile::staff(STAFF, "teacher"));
        d.insert_user(Profile::student(U, "stu"));
        d.insert_semester(Semester {
            id: 3,
            first_day: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            last_day: NaiveDate::from_ymd_opt(2040, 1, 1).unwrap(),
            closed: false,
        });
        d.insert_course(Course { id: 4, title: "Course".into(), xp_for_100_percent: 1000, active: true });
        d.insert_enrolment(Enrolment {
            id: 0,
            user_id: U,
            semester_id: 3,
            course_id: Some(4),
            group_id: None,
            xp_adjustment: 0,
            xp_adjust_explanation: None,
        });
        d
    }

    fn text(t: &str) -> CompleteInput {
        CompleteInput { text: t.into(), ..Default::default() }
    }

    #[test]
    fn full_review_cycle() {
        let mut d = deck();
        let q = d.insert_quest(Quest::new("Essay", 10)).unwrap();
        let now = Utc::now();
        let s = start(&mut d, U, q, now).unwrap();
        assert_eq!(d.submission(s).unwrap().ordinal, 1);

        assert_eq!(complete(&mut d, U, s, text("done"), now).unwrap(), SubmissionState::AwaitingApproval);
        let first_done = d.submission(s).unwrap().first_time_completed;

        return_submission(&mut d, STAFF, s, ReviewInput::default(), now).unwrap();
        let sub = d.submission(s).unwrap();
        assert_eq!(sub.state(), SubmissionState::Returned);
        assert_eq!(sub.comments.last().unwrap().text, d.settings.blank_return_text);

        let later = now + Duration::hours(1);
        complete(&mut d, U, s, text("fixed"), later).unwrap();
        assert_eq!(d.submission(s).unwrap().first_time_completed, first_done);

        let outcome = approve(&mut d, STAFF, s, ReviewInput::default(), later).unwrap();
        assert_eq!(outcome.xp_before, 0);
        assert_eq!(outcome.xp_after, 10);
        let sub = d.submission(s).unwrap();
        assert!(sub.is_approved && sub.is_completed);
        assert_eq!(sub.comments.last().unwrap().text, d.settings.blank_approval_text);
    }

    #[test]
    fn start_redirects_to_open_submission() {
        let mut d = deck();
        let q = d.insert_quest(Quest::new("Q", 1)).unwrap();
        let now = Utc::now();
        let a = start(&mut d, U, q, now).unwrap();
        let b = start(&mut d, U, q, now).unwrap();
        assert_eq!(a, b);
        assert_eq!(d.submissions_for(U, q).len(), 1);
    }

    #[test]
    fn start_on_unavailable_quest_fails() {
        let mut d = deck();
        let gate = d.insert_quest(Quest::new("Gate", 1)).unwrap();
        let q = d.insert_quest(Quest::new("Locked", 1)).unwrap();
        prereq::add_simple_prereq(&mut d, EntityRef::quest(q), EntityRef::quest(gate)).unwrap();
        let err = start(&mut d, U, q, Utc::now()).unwrap_err();
        assert!(matches!(err, EngineError::UnavailableQuest(id) if id == q));
    }

    #[test]
    fn verification_requires_content() {
        let mut d = deck();
        let q = d.insert_quest(Quest::new("Q", 1)).unwrap();
        let now = Utc::now();
        let s = start(&mut d, U, q, now).unwrap();
        assert_eq!(complete(&mut d, U, s, text("   "), now).unwrap_err().code(), "invalid_input");
        let with_file = CompleteInput { attachments: vec!["upload-1".into()], ..Default::default() };
        assert!(complete(&mut d, U, s, with_file, now).is_ok());
    }

    #[test]
    fn unverified_quest_auto_approves_with_skip_token() {
        let mut d = deck();
        let mut q = Quest::new("Quick", 4);
        q.verification_required = false;
        let q = d.insert_quest(q).unwrap();
        let now = Utc::now();
        let s = start(&mut d, U, q, now).unwrap();
        assert_eq!(complete(&mut d, U, s, text("skip"), now).unwrap(), SubmissionState::Approved);
        assert!(d.submission(s).unwrap().comments.is_empty());
        assert!(d.outbox.iter().any(|n| n.verb == Verb::AutoApproved));
        assert_eq!(ledger::xp(&d, U), 4);
    }

    #[test]
    fn draft_is_sealed_on_complete() {
        let mut d = deck();
        let q = d.insert_quest(Quest::new("Q", 1)).unwrap();
        let now = Utc::now();
        let s = start(&mut d, U, q, now).unwrap();
        save_draft(
            &mut d,
            U,
            s,
            DraftInput { text: "half way".into(), attachments: vec!["pic".into()], ..DraftInput::default() },
            now,
        )
        .unwrap();
        assert_eq!(d.submission(s).unwrap().draft_text.as_deref(), Some("half way"));
        complete(&mut d, U, s, CompleteInput::default(), now).unwrap();
        let sub = d.submission(s).unwrap();
        assert!(sub.draft_comment.is_none());
        assert!(sub.draft_text.is_none());
        assert_eq!(sub.comments[0].text, "half way");
        assert_eq!(sub.comments[0].attachments, vec!["pic".to_string()]);
    }

    #[test]
    fn student_xp_request_has_quest_xp_as_floor() {
        let mut d = deck();
        let mut q = Quest::new("Pick", 5);
        q.xp_can_be_entered_by_students = true;
        let q = d.insert_quest(q).unwrap();
        let now = Utc::now();
        let s = start(&mut d, U, q, now).unwrap();
        let input = CompleteInput { text: "x".into(), xp_requested: Some(2), ..Default::default() };
        complete(&mut d, U, s, input, now).unwrap();
        assert_eq!(d.submission(s).unwrap().xp_requested, 5);
    }

    #[test]
    fn disallowed_transitions_are_rejected() {
        let mut d = deck();
        let q = d.insert_quest(Quest::new("Q", 1)).unwrap();
        let now = Utc::now();
        let s = start(&mut d, U, q, now).unwrap();
        let err = approve(&mut d, STAFF, s, ReviewInput::default(), now).unwrap_err();
        assert!(matches!(err, EngineError::StateTransition { action: "approve", from: SubmissionState::InProgress }));
        assert_eq!(skip(&mut d, STAFF, s, now).unwrap_err().code(), "state_transition");
        assert_eq!(comment(&mut d, U, s, "hi".into(), vec![], now).unwrap_err().code(), "state_transition");
        complete(&mut d, U, s, text("done"), now).unwrap();
        assert_eq!(drop_submission(&mut d, U, s).unwrap_err().code(), "state_transition");
        assert_eq!(approve(&mut d, U, s, ReviewInput::default(), now).unwrap_err().code(), "permission_denied");
    }

    #[test]
    fn drop_deletes_open_submission() {
        let mut d = deck();
        let q = d.insert_quest(Quest::new("Q", 1)).unwrap();
        let now = Utc::now();
        let s = start(&mut d, U, q, now).unwrap();
        save_draft(&mut d, U, s, DraftInput { text: "draft".into(), ..DraftInput::default() }, now).unwrap();
        drop_submission(&mut d, U, s).unwrap();
        assert!(d.submissions.is_empty());
    }

    #[test]
    fn skip_and_transfer_grant_no_xp() {
        let mut d = deck();
        let a = d.insert_quest(Quest::new("A", 10)).unwrap();
        let b = d.insert_quest(Quest::new("B", 10)).unwrap();
        let now = Utc::now();
        let sa = start(&mut d, U, a, now).unwrap();
        complete(&mut d, U, sa, text("a"), now).unwrap();
        skip(&mut d, STAFF, sa, now).unwrap();
        let sb = start(&mut d, U, b, now).unwrap();
        complete(&mut d, U, sb, text("b"), now).unwrap();
        let input = ReviewInput { transfer: true, ..Default::default() };
        approve(&mut d, STAFF, sb, input, now).unwrap();
        assert_eq!(ledger::xp(&d, U), 0);
        assert!(d.submission(sa).unwrap().is_approved());
    }

    #[test]
    fn approval_grants_badges_and_announces_rank() {
        let mut d = deck();
        d.insert_rank(Rank::new("Bronze", 10));
        let q = d.insert_quest(Quest::new("Q", 10)).unwrap();
        let badge = d.insert_badge(Badge::new("Finisher", 0));
        prereq::add_simple_prereq(&mut d, EntityRef::badge(badge), EntityRef::quest(q)).unwrap();
        let now = Utc::now();
        let s = start(&mut d, U, q, now).unwrap();
        complete(&mut d, U, s, text("done"), now).unwrap();
        let outcome = approve(&mut d, STAFF, s, ReviewInput::default(), now).unwrap();
        assert_eq!(outcome.badges_granted.len(), 1);
        assert_eq!(outcome.ranks_reached, vec!["Bronze".to_string()]);
        assert!(d.outbox.iter().any(|n| n.verb == Verb::RankUp));
        assert!(d
            .pending_tasks
            .iter()
            .any(|j| j.task == Task::RefreshAvailability { user_id: U }));
    }

    #[test]
    fn comments_and_flags_on_approved_work() {
        let mut d = deck();
        let q = d.insert_quest(Quest::new("Q", 1)).unwrap();
        let now = Utc::now();
        let s = start(&mut d, U, q, now).unwrap();
        complete(&mut d, U, s, text("done"), now).unwrap();
        approve(&mut d, STAFF, s, ReviewInput { comment: "nice".into(), ..Default::default() }, now).unwrap();
        comment(&mut d, U, s, "thanks".into(), vec![], now).unwrap();
        assert_eq!(d.submission(s).unwrap().comments.len(), 3);
        flag(&mut d, STAFF, s, now).unwrap();
        assert_eq!(d.submission(s).unwrap().flagged_by, Some(STAFF));
        unflag(&mut d, STAFF, s, now).unwrap();
        assert_eq!(d.submission(s).unwrap().flagged_by, None);
        assert_eq!(flag(&mut d, U, s, now).unwrap_err().code(), "permission_denied");
    }

    #[test]
    fn duplicate_ordinals_are_repaired_by_completion_time() {
        let mut d = deck();
        let q = d.insert_quest(Quest::new("Rep", 1)).unwrap();
        let t0 = Utc::now();
        let mut ids = Vec::new();
        for (ordinal, minutes) in [(1u32, 0i64), (2, 20), (2, 10)] {
            let id = d.allocate_id();
            let mut s = Submission::new(id, q, U, ordinal, Some(3), t0);
            s.is_completed = true;
            s.is_approved = true;
            s.time_completed = Some(t0 + Duration::minutes(minutes));
            d.submissions.insert(id, s);
            ids.push(id);
        }
        let prev = get_previous(&mut d, U, q, 3).unwrap();
        assert_eq!(prev, Some(ids[2]));
        let ordinals: Vec<u32> = d.submissions_for(U, q).iter().map(|s| s.ordinal).collect();
        assert_eq!(ordinals, vec![1, 2, 3]);
        assert_eq!(d.submission(ids[1]).unwrap().ordinal, 3);
    }

    fn answer(question: QuestionId, t: &str) -> QuestionResponse {
        QuestionResponse { question_id: Some(question), text: Some(t.into()), file: None }
    }

    #[test]
    fn required_questions_block_completion_until_answered() {
        let mut d = deck();
        let q = d.insert_quest(Quest::new("Survey", 5)).unwrap();
        let name = d.add_question(q, Question::new(QuestionType::ShortAnswer, "Name?")).unwrap();
        let mut optional = Question::new(QuestionType::LongAnswer, "Anything else?");
        optional.required = false;
        d.add_question(q, optional).unwrap();
        let now = Utc::now();
        let s = start(&mut d, U, q, now).unwrap();

        let err = complete(&mut d, U, s, text("here"), now).unwrap_err();
        assert_eq!(err.code(), "invalid_input");

        let blank = CompleteInput { responses: vec![answer(name, "  ")], ..text("here") };
        assert!(complete(&mut d, U, s, blank, now).is_err());

        let answered = CompleteInput { responses: vec![answer(name, "Ada")], ..Default::default() };
        assert_eq!(complete(&mut d, U, s, answered, now).unwrap(), SubmissionState::AwaitingApproval);
        let sealed = d.submission(s).unwrap().comments.last().unwrap();
        assert_eq!(sealed.responses, vec![answer(name, "Ada")]);
    }

    #[test]
    fn draft_answers_carry_over_and_later_answers_win() {
        let mut d = deck();
        let q = d.insert_quest(Quest::new("Survey", 5)).unwrap();
        let first = d.add_question(q, Question::new(QuestionType::ShortAnswer, "One?")).unwrap();
        let second = d.add_question(q, Question::new(QuestionType::ShortAnswer, "Two?")).unwrap();
        let now = Utc::now();
        let s = start(&mut d, U, q, now).unwrap();

        let draft = DraftInput { responses: vec![answer(first, "old"), answer(second, "kept")], ..DraftInput::default() };
        save_draft(&mut d, U, s, draft, now).unwrap();
        let draft = DraftInput { responses: vec![answer(first, "new")], ..DraftInput::default() };
        save_draft(&mut d, U, s, draft, now).unwrap();

        complete(&mut d, U, s, CompleteInput::default(), now).unwrap();
        let sub = d.submission(s).unwrap();
        assert!(sub.draft_comment.is_none());
        let sealed = &sub.comments.last().unwrap().responses;
        assert_eq!(sealed.len(), 2);
        assert!(sealed.contains(&answer(first, "new")));
        assert!(sealed.contains(&answer(second, "kept")));
    }

    #[test]
    fn dropping_a_submission_discards_its_answers() {
        let mut d = deck();
        let q = d.insert_quest(Quest::new("Survey", 5)).unwrap();
        let only = d.add_question(q, Question::new(QuestionType::ShortAnswer, "One?")).unwrap();
        let now = Utc::now();
        let s = start(&mut d, U, q, now).unwrap();
        let draft = DraftInput { responses: vec![answer(only, "gone")], ..DraftInput::default() };
        save_draft(&mut d, U, s, draft, now).unwrap();

        let dropped = drop_submission(&mut d, U, s).unwrap();
        assert_eq!(dropped.draft_comment.unwrap().responses.len(), 1);
        assert!(d.submission(s).is_err());
        assert!(d.questions_for(q).len() == 1);
    }
}

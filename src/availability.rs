//! Availability resolver: what a user can start, is working on, and has done.
//!
//! The prerequisite half of the question ("are this quest's conditions met for
//! this user?") is answered by a precomputed ID set handed in by the caller,
//! normally from the availability cache. Everything else (activity window,
//! repetition rules, blocking, hidden quests) is evaluated here on every call.

use std::cmp::Reverse;
use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::domain::*;
use crate::error::{EngineError, Result};
use crate::prereq;
use crate::store::DeckData;

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct QuestLists {
    pub available: Vec<QuestId>,
    pub in_progress: Vec<SubmissionId>,
    pub awaiting_approval: Vec<SubmissionId>,
    pub completed: Vec<SubmissionId>,
    pub past: Vec<SubmissionId>,
    pub drafts: Vec<QuestId>,
}

/// IDs of entities of `kind` whose prerequisites are met for `user`.
/// This is what the availability cache stores.
pub fn conditions_met_ids(deck: &DeckData, user: UserId, kind: EntityKind) -> BTreeSet<u64> {
    let ids: Vec<u64> = match kind {
        EntityKind::Quest => deck.quests.values().filter(|q| !q.archived).map(|q| q.id).collect(),
        EntityKind::Badge => deck.badges.values().filter(|b| b.active).map(|b| b.id).collect(),
        _ => Vec::new(),
    };
    ids.into_iter()
        .filter(|id| prereq::conditions_met(deck, EntityRef::new(kind, *id), user))
        .collect()
}

/// Repetition rule: may `user` open a new submission of `quest` at `now`?
pub fn eligible_for_new_submission(deck: &DeckData, quest: &Quest, user: UserId, now: DateTime<Utc>) -> bool {
    let subs = deck.submissions_for(user, quest.id);
    let Some(latest) = subs.last() else {
        return true;
    };
    if !latest.is_approved() || !quest.is_repeatable() {
        return false;
    }
    let max = i64::from(quest.max_repeats);
    let in_semester = subs
        .iter()
        .filter(|s| s.is_approved() && s.semester_id.is_some() && s.semester_id == deck.active_semester())
        .count() as i64;
    let within_limit = quest.max_repeats == UNLIMITED
        || i64::from(latest.ordinal) <= max
        || (quest.repeat_per_semester && in_semester <= max);
    if !within_limit {
        return false;
    }
    match latest.cooldown_anchor() {
        Some(anchor) => now - anchor >= Duration::hours(i64::from(quest.hours_between_repeats)),
        None => true,
    }
}

fn available_sort_key(q: &Quest) -> (i32, Reverse<Option<chrono::NaiveTime>>, Reverse<Option<chrono::NaiveDate>>, String) {
    (q.sort_order, Reverse(q.time_expired), Reverse(q.date_expired), q.name.clone())
}

fn sort_quests(deck: &DeckData, ids: &mut Vec<QuestId>) {
    ids.sort_by_cached_key(|id| deck.quests.get(id).map(available_sort_key));
}

fn open_submissions(deck: &DeckData, user: UserId) -> Vec<&Submission> {
    deck.submissions
        .values()
        .filter(|s| s.user_id == user && s.state().is_open())
        .collect()
}

fn is_blocking(deck: &DeckData, quest: Option<QuestId>) -> bool {
    quest.and_then(|id| deck.quests.get(&id)).is_some_and(|q| q.blocking)
}

/// Everything about one user's quest state at `now`, given the set of quest
/// IDs whose prerequisites are met.
pub fn quest_lists(
    deck: &DeckData,
    user: UserId,
    met: &BTreeSet<QuestId>,
    now: DateTime<Utc>,
    exclude_hidden: bool,
) -> QuestLists {
    let local = deck.local_now(now);
    let open = open_submissions(deck, user);

    let in_course = deck.has_current_course(user);
    let mut available: Vec<QuestId> = if in_course {
        deck.quests
            .values()
            .filter(|q| deck.quest_active(q, local))
            .filter(|q| met.contains(&q.id))
            .filter(|q| eligible_for_new_submission(deck, q, user, now))
            .map(|q| q.id)
            .collect()
    } else {
        deck.quests
            .values()
            .filter(|q| deck.quest_active(q, local) && q.available_outside_course)
            .filter(|q| deck.submissions_for(user, q.id).is_empty())
            .map(|q| q.id)
            .collect()
    };

    // Blocking only applies to students working through a course.
    let blocking_present = in_course
        && (available.iter().any(|id| is_blocking(deck, Some(*id)))
            || open.iter().any(|s| is_blocking(deck, s.quest_id)));
    if blocking_present {
        available.retain(|id| is_blocking(deck, Some(*id)));
    }
    if exclude_hidden {
        if let Some(profile) = deck.users.get(&user) {
            available.retain(|id| !profile.is_quest_hidden(*id));
        }
    }
    sort_quests(deck, &mut available);

    let mut in_progress: Vec<&Submission> = open
        .into_iter()
        .filter(|s| !blocking_present || is_blocking(deck, s.quest_id))
        .collect();
    in_progress.sort_by_key(|s| (Reverse(s.time_completed), Reverse(s.created), s.id));

    let mut awaiting: Vec<&Submission> = deck
        .submissions
        .values()
        .filter(|s| s.user_id == user && s.state() == SubmissionState::AwaitingApproval)
        .collect();
    awaiting.sort_by_key(|s| (Reverse(s.time_completed), s.id));

    let active = deck.active_semester();
    let mut completed = Vec::new();
    let mut past = Vec::new();
    for s in deck.submissions.values().filter(|s| s.user_id == user && s.is_approved()) {
        match active {
            Some(sem) if s.semester_id != Some(sem) => past.push(s),
            _ => completed.push(s),
        }
    }
    completed.sort_by_key(|s| (Reverse(s.time_approved), s.id));
    past.sort_by_key(|s| (Reverse(s.time_approved), s.id));

    QuestLists {
        available,
        in_progress: in_progress.into_iter().map(|s| s.id).collect(),
        awaiting_approval: awaiting.into_iter().map(|s| s.id).collect(),
        completed: completed.into_iter().map(|s| s.id).collect(),
        past: past.into_iter().map(|s| s.id).collect(),
        drafts: drafts(deck, user),
    }
}

/// Unpublished quests this user may see: everything for staff, their own
/// quests for a designated editor.
pub fn drafts(deck: &DeckData, user: UserId) -> Vec<QuestId> {
    let staff = deck.users.get(&user).is_some_and(|p| p.is_staff);
    let mut ids: Vec<QuestId> = deck
        .quests
        .values()
        .filter(|q| !q.visible_to_students && !q.archived)
        .filter(|q| staff || q.editor == Some(user))
        .map(|q| q.id)
        .collect();
    sort_quests(deck, &mut ids);
    ids
}

/// Authoritative check used by `start`: evaluates prerequisites directly.
pub fn available_for(deck: &DeckData, user: UserId, quest: QuestId, now: DateTime<Utc>) -> bool {
    let met = conditions_met_ids(deck, user, EntityKind::Quest);
    quest_lists(deck, user, &met, now, false).available.contains(&quest)
}

/// Submissions waiting on staff, ordered per the deck's approval setting.
pub fn approval_queue(deck: &DeckData, reviewer: UserId) -> Result<Vec<SubmissionId>> {
    let profile = deck.user(reviewer)?;
    if !profile.can_review() {
        return Err(EngineError::PermissionDenied(format!("user {reviewer} cannot review submissions")));
    }
    let mut queue: Vec<&Submission> = deck
        .submissions
        .values()
        .filter(|s| s.state() == SubmissionState::AwaitingApproval)
        .collect();
    if deck.settings.approve_oldest_first {
        queue.sort_by_key(|s| (s.time_completed, s.id));
    } else {
        queue.sort_by_key(|s| (Reverse(s.time_completed), Reverse(s.id)));
    }
    Ok(queue.into_iter().map(|s| s.id).collect())
}

/// Remove a quest from the user's own available list.
pub fn hide_quest(deck: &mut DeckData, user: UserId, quest: QuestId) -> Result<()> {
    if !deck.quest(quest)?.hideable {
        return Err(EngineError::InvalidInput(format!("quest {quest} cannot be hidden")));
    }
    deck.user_mut(user)?.hidden_quests.insert(quest);
    Ok(())
}

pub fn unhide_quest(deck: &mut DeckData, user: UserId, quest: QuestId) -> Result<()> {
    deck.user_mut(user)?.hidden_quests.remove(&quest);
    Ok(())
}

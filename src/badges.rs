//! Badge assertions (grants) and the automatic badge sweep.
//!
//! The k-th grant of a badge to a user requires the badge's prerequisites to
//! hold with every non-inverted quest/badge count multiplied by k; from the
//! second grant on, a clause met only by a fixed condition (a rank, a
//! campaign, an inverted slot) no longer counts. The sweep
//! keeps granting until a full pass over the badges grants nothing, so badges
//! unlocked by other badges land in the same sweep.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::domain::{AssertionId, BadgeId, EntityRef, SemesterId, UserId};
use crate::error::{EngineError, Result};
use crate::notify::{Notification, Target, Verb};
use crate::prereq;
use crate::store::DeckData;
use crate::tasks::Task;

/// Passes after which a sweep gives up; each pass grants at least one badge.
const MAX_SWEEP_PASSES: usize = 256;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BadgeAssertion {
    pub id: AssertionId,
    pub badge_id: BadgeId,
    pub user_id: UserId,
    /// 1-based grant number for this (badge, user).
    pub ordinal: u32,
    pub timestamp: DateTime<Utc>,
    pub issued_by: UserId,
    pub do_not_grant_xp: bool,
    pub semester_id: Option<SemesterId>,
}

fn repeatable(deck: &DeckData, badge: BadgeId) -> bool {
    deck.badges
        .get(&badge)
        .and_then(|b| deck.badge_type_of(b))
        .map_or(true, |t| t.repeatable)
}

/// Record one grant and its per-user side effects.
#[instrument(level = "info", skip(deck, now), fields(badge_id = badge, user_id = user))]
pub fn grant(
    deck: &mut DeckData,
    badge: BadgeId,
    user: UserId,
    issued_by: UserId,
    do_not_grant_xp: bool,
    now: DateTime<Utc>,
) -> Result<AssertionId> {
    let icon = deck.badge(badge)?.icon.clone();
    deck.user(user)?;
    let held = deck.assertion_count(user, badge) as u32;
    if held > 0 && !repeatable(deck, badge) {
        return Err(EngineError::InvalidInput(format!("badge {badge} is not repeatable and user {user} already holds it")));
    }
    let id = deck.allocate_id();
    let assertion = BadgeAssertion {
        id,
        badge_id: badge,
        user_id: user,
        ordinal: held + 1,
        timestamp: now,
        issued_by,
        do_not_grant_xp,
        semester_id: deck.active_semester(),
    };
    info!(target: "quest", assertion_id = id, ordinal = assertion.ordinal, "Badge granted");
    deck.assertions.insert(id, assertion);
    deck.invalidate_user(user);
    let notice = Notification::new(issued_by, Verb::Granted, Target::Entity(EntityRef::badge(badge)), vec![user], now);
    deck.notify(match icon {
        Some(icon) => notice.with_icon(icon),
        None => notice,
    });
    deck.enqueue(Task::RefreshAvailability { user_id: user }, None);
    Ok(id)
}

/// Remove a grant; the remaining grants of that badge are renumbered 1..N.
#[instrument(level = "info", skip(deck, now), fields(assertion_id = id))]
pub fn revoke(deck: &mut DeckData, id: AssertionId, actor: UserId, now: DateTime<Utc>) -> Result<BadgeAssertion> {
    let removed = deck
        .assertions
        .remove(&id)
        .ok_or_else(|| EngineError::not_found(format!("Badge assertion {id}")))?;
    let mut rest: Vec<&mut BadgeAssertion> = deck
        .assertions
        .values_mut()
        .filter(|a| a.user_id == removed.user_id && a.badge_id == removed.badge_id)
        .collect();
    rest.sort_by_key(|a| (a.ordinal, a.timestamp, a.id));
    for (i, a) in rest.into_iter().enumerate() {
        a.ordinal = i as u32 + 1;
    }
    info!(target: "quest", badge_id = removed.badge_id, user_id = removed.user_id, "Badge revoked");
    deck.invalidate_user(removed.user_id);
    deck.notify(Notification::new(
        actor,
        Verb::Revoked,
        Target::Entity(EntityRef::badge(removed.badge_id)),
        vec![removed.user_id],
        now,
    ));
    deck.enqueue(Task::RefreshAvailability { user_id: removed.user_id }, None);
    Ok(removed)
}

/// Would the next grant of `badge` be earned by `user` right now?
pub fn qualifies_for_next(deck: &DeckData, badge: BadgeId, user: UserId) -> bool {
    let Some(b) = deck.badges.get(&badge) else {
        return false;
    };
    if !b.active || deck.badge_type_of(b).is_some_and(|t| t.manual_only) {
        return false;
    }
    let parent = EntityRef::badge(badge);
    if !prereq::has_prereqs(deck, parent) {
        return false;
    }
    let next = deck.assertion_count(user, badge) as u32 + 1;
    if next > 1 && !repeatable(deck, badge) {
        return false;
    }
    prereq::conditions_met_times(deck, parent, user, next)
}

/// Grant every badge the user newly qualifies for, repeating until stable.
/// Already-issued grants stay if a later grant fails.
#[instrument(level = "info", skip(deck, now), fields(user_id = user))]
pub fn sweep(deck: &mut DeckData, user: UserId, now: DateTime<Utc>) -> Vec<AssertionId> {
    let issuer = deck.settings.deck_ai;
    let mut granted = Vec::new();
    for _ in 0..MAX_SWEEP_PASSES {
        let badge_ids: Vec<BadgeId> = deck.badges.keys().copied().collect();
        let mut progressed = false;
        for badge in badge_ids {
            if !qualifies_for_next(deck, badge, user) {
                continue;
            }
            match grant(deck, badge, user, issuer, false, now) {
                Ok(id) => {
                    granted.push(id);
                    progressed = true;
                }
                Err(e) => {
                    warn!(target: "quest", badge_id = badge, error = %e, "Sweep grant failed; continuing");
                }
            }
        }
        if !progressed {
            return granted;
        }
    }
    warn!(target: "quest", user_id = user, granted = granted.len(), "Badge sweep hit its pass cap");
    granted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeckSettings;
    use crate::domain::{Badge, BadgeType, Profile, Quest, Rank, Submission};
    use crate::ledger;

    const U: UserId = 50;

    fn deck() -> DeckData {
        let mut d = DeckData::new(DeckSettings::default());
        d.insert_user(Profile::student(U, "s"));
        d
    }

    fn approve(d: &mut DeckData, quest: u64) {
        let ordinal = d.submissions_for(U, quest).len() as u32 + 1;
        let id = d.allocate_id();
        let mut s = Submission::new(id, quest, U, ordinal, None, Utc::now());
        s.is_completed = true;
        s.is_approved = true;
        d.submissions.insert(id, s);
    }

    #[test]
    fn sweep_grants_then_regrants_at_double_count() {
        let mut d = deck();
        let mut q = Quest::new("Q", 1);
        q.max_repeats = -1;
        let q = d.insert_quest(q).unwrap();
        let b = d.insert_badge(Badge::new("B", 5));
        prereq::add_simple_prereq(&mut d, EntityRef::badge(b), EntityRef::quest(q)).unwrap();

        approve(&mut d, q);
        let first = sweep(&mut d, U, Utc::now());
        assert_eq!(first.len(), 1);
        assert_eq!(d.assertions[&first[0]].ordinal, 1);
        assert!(sweep(&mut d, U, Utc::now()).is_empty());

        approve(&mut d, q);
        let second = sweep(&mut d, U, Utc::now());
        assert_eq!(second.len(), 1);
        assert_eq!(d.assertions[&second[0]].ordinal, 2);
    }

    #[test]
    fn rank_or_quest_badge_is_granted_once() {
        let mut d = deck();
        let mut q = Quest::new("Q", 1);
        q.max_repeats = -1;
        let q = d.insert_quest(q).unwrap();
        let r = d.insert_rank(Rank::new("Everyone", 0));
        let b = d.insert_badge(Badge::new("B", 0));
        let rel = prereq::PrereqRelation {
            alt: Some(EntityRef::quest(q)),
            ..prereq::PrereqRelation::simple(EntityRef::badge(b), EntityRef::rank(r))
        };
        prereq::add_relation(&mut d, rel).unwrap();

        assert_eq!(sweep(&mut d, U, Utc::now()).len(), 1);
        assert!(sweep(&mut d, U, Utc::now()).is_empty());
        assert_eq!(d.assertion_count(U, b), 1);

        // The quest side can still earn the repeats.
        approve(&mut d, q);
        approve(&mut d, q);
        assert_eq!(sweep(&mut d, U, Utc::now()).len(), 1);
        assert_eq!(d.assertion_count(U, b), 2);
    }

    #[test]
    fn grant_notice_uses_the_badge_icon() {
        let mut d = deck();
        let mut b = Badge::new("Star", 0);
        b.icon = Some("star.png".into());
        let b = d.insert_badge(b);
        let plain = d.insert_badge(Badge::new("Plain", 0));
        grant(&mut d, b, U, 1, false, Utc::now()).unwrap();
        grant(&mut d, plain, U, 1, false, Utc::now()).unwrap();
        let icons: Vec<&str> = d.outbox.iter().map(|n| n.icon.as_str()).collect();
        assert_eq!(icons, vec!["star.png", "fa-certificate"]);
    }

    #[test]
    fn sweep_follows_badge_chains() {
        let mut d = deck();
        let q = d.insert_quest(Quest::new("Q", 1)).unwrap();
        let first = d.insert_badge(Badge::new("First", 0));
        let second = d.insert_badge(Badge::new("Second", 0));
        prereq::add_simple_prereq(&mut d, EntityRef::badge(second), EntityRef::badge(first)).unwrap();
        prereq::add_simple_prereq(&mut d, EntityRef::badge(first), EntityRef::quest(q)).unwrap();
        approve(&mut d, q);
        let granted = sweep(&mut d, U, Utc::now());
        assert_eq!(granted.len(), 2);
        assert_eq!(d.assertion_count(U, second), 1);
    }

    #[test]
    fn manual_and_ungated_badges_are_skipped() {
        let mut d = deck();
        let manual = d.insert_badge_type(BadgeType { id: 0, name: "Talent".into(), repeatable: true, manual_only: true });
        let mut b = Badge::new("Hand picked", 0);
        b.badge_type_id = Some(manual);
        let b = d.insert_badge(b);
        let q = d.insert_quest(Quest::new("Q", 1)).unwrap();
        prereq::add_simple_prereq(&mut d, EntityRef::badge(b), EntityRef::quest(q)).unwrap();
        d.insert_badge(Badge::new("Ungated", 0));
        approve(&mut d, q);
        assert!(sweep(&mut d, U, Utc::now()).is_empty());
    }

    #[test]
    fn non_repeatable_type_blocks_second_grant() {
        let mut d = deck();
        let once = d.insert_badge_type(BadgeType { id: 0, name: "Once".into(), repeatable: false, manual_only: false });
        let mut b = Badge::new("Single", 0);
        b.badge_type_id = Some(once);
        let b = d.insert_badge(b);
        grant(&mut d, b, U, 1, false, Utc::now()).unwrap();
        assert_eq!(grant(&mut d, b, U, 1, false, Utc::now()).unwrap_err().code(), "invalid_input");
    }

    #[test]
    fn revoke_renumbers_and_drops_xp() {
        let mut d = deck();
        let b = d.insert_badge(Badge::new("Star", 10));
        let a1 = grant(&mut d, b, U, 1, false, Utc::now()).unwrap();
        let a2 = grant(&mut d, b, U, 1, false, Utc::now()).unwrap();
        assert_eq!(ledger::refresh_xp(&mut d, U), 20);
        revoke(&mut d, a1, 1, Utc::now()).unwrap();
        assert_eq!(d.assertions[&a2].ordinal, 1);
        assert_eq!(ledger::xp(&d, U), 10);
        let verbs: Vec<Verb> = d.outbox.iter().map(|n| n.verb).collect();
        assert_eq!(verbs, vec![Verb::Granted, Verb::Granted, Verb::Revoked]);
    }

    #[test]
    fn grants_without_xp_do_not_count() {
        let mut d = deck();
        let b = d.insert_badge(Badge::new("Honour", 10));
        grant(&mut d, b, U, 1, true, Utc::now()).unwrap();
        assert_eq!(ledger::xp(&d, U), 0);
    }
}

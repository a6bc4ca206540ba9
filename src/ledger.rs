//! XP and rank ledger.
//!
//! XP is always derivable from scratch: approved XP-granting submissions in
//! the active semester (summed per quest, then capped at the quest's
//! `max_xp`), plus XP of badges granted this semester, plus manual enrolment
//! adjustments. The per-user cached total is only a shortcut and is dropped on
//! every approve/return/grant/revoke touching that user.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::domain::{QuestId, Rank, UserId};
use crate::store::DeckData;

/// Current XP, from the cache when warm.
pub fn xp(deck: &DeckData, user: UserId) -> i64 {
    match deck.users.get(&user).and_then(|p| p.xp_cached) {
        Some(xp) => xp,
        None => compute_xp(deck, user, None),
    }
}

/// Recompute and store the cached total.
pub fn refresh_xp(deck: &mut DeckData, user: UserId) -> i64 {
    let xp = compute_xp(deck, user, None);
    if let Some(p) = deck.users.get_mut(&user) {
        p.xp_cached = Some(xp);
    }
    debug!(target: "quest", user_id = user, xp, "XP recomputed");
    xp
}

pub fn invalidate_xp(deck: &mut DeckData, user: UserId) {
    if let Some(p) = deck.users.get_mut(&user) {
        p.xp_cached = None;
    }
}

/// XP counting only work approved (and badges granted) on or before `until`.
pub fn xp_to_date(deck: &DeckData, user: UserId, until: DateTime<Utc>) -> i64 {
    compute_xp(deck, user, Some(until))
}

fn in_scope(deck: &DeckData, semester: Option<u64>) -> bool {
    match deck.active_semester() {
        Some(active) => semester == Some(active),
        None => true,
    }
}

fn compute_xp(deck: &DeckData, user: UserId, until: Option<DateTime<Utc>>) -> i64 {
    let earning = deck.users.get(&user).map_or(true, |p| !p.not_earning_xp);

    let mut per_quest: BTreeMap<QuestId, i64> = BTreeMap::new();
    if earning {
        for s in deck.submissions.values().filter(|s| s.user_id == user && s.grants_xp()) {
            let Some(quest) = s.quest_id.and_then(|id| deck.quests.get(&id)) else {
                continue;
            };
            if !in_scope(deck, s.semester_id) {
                continue;
            }
            if let Some(until) = until {
                if s.time_approved.map_or(true, |t| t > until) {
                    continue;
                }
            }
            let earned = i64::from(quest.xp.max(s.xp_requested));
            *per_quest.entry(quest.id).or_default() += earned;
        }
    }
    let quest_xp: i64 = per_quest
        .into_iter()
        .map(|(qid, sum)| match deck.quests.get(&qid) {
            Some(q) if q.max_xp >= 0 => sum.min(i64::from(q.max_xp)),
            _ => sum,
        })
        .sum();

    let badge_xp: i64 = deck
        .assertions
        .values()
        .filter(|a| a.user_id == user && !a.do_not_grant_xp && in_scope(deck, a.semester_id))
        .filter(|a| until.map_or(true, |until| a.timestamp <= until))
        .filter_map(|a| deck.badges.get(&a.badge_id))
        .map(|b| i64::from(b.xp))
        .sum();

    let adjustments: i64 = deck.current_enrolments(user).map(|e| e.xp_adjustment).sum();

    quest_xp + badge_xp + adjustments
}

/// Ranks sorted by threshold.
fn ladder(deck: &DeckData) -> Vec<&Rank> {
    let mut ranks: Vec<&Rank> = deck.ranks.values().collect();
    ranks.sort_by_key(|r| (r.xp, r.id));
    ranks
}

/// Highest rank at or below `xp`; the implied zero rank otherwise.
pub fn rank_for(deck: &DeckData, xp: i64) -> Rank {
    ladder(deck)
        .into_iter()
        .rev()
        .find(|r| i64::from(r.xp) <= xp)
        .cloned()
        .unwrap_or_else(Rank::zero)
}

/// Smallest rank strictly above `xp`.
pub fn next_rank(deck: &DeckData, xp: i64) -> Option<Rank> {
    ladder(deck).into_iter().find(|r| i64::from(r.xp) > xp).cloned()
}

/// Thresholds crossed going from `before` to `after`, lowest first.
pub fn ranks_crossed(deck: &DeckData, before: i64, after: i64) -> Vec<Rank> {
    ladder(deck)
        .into_iter()
        .filter(|r| before < i64::from(r.xp) && i64::from(r.xp) <= after)
        .cloned()
        .collect()
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct XpSummary {
    pub user_id: UserId,
    pub xp: i64,
    pub rank: Rank,
    pub next_rank: Option<Rank>,
    pub xp_since_last_rank: i64,
    /// `None` at the top of the ladder.
    pub xp_to_next_rank: Option<i64>,
}

pub fn summary(deck: &DeckData, user: UserId) -> XpSummary {
    let xp = xp(deck, user);
    let rank = rank_for(deck, xp);
    let next = next_rank(deck, xp);
    XpSummary {
        user_id: user,
        xp,
        xp_since_last_rank: xp - i64::from(rank.xp),
        xp_to_next_rank: next.as_ref().map(|n| i64::from(n.xp) - xp),
        rank,
        next_rank: next,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::badges::BadgeAssertion;
    use crate::config::DeckSettings;
    use crate::domain::{Badge, Enrolment, Profile, Quest, Semester, Submission};
    use chrono::{Duration, NaiveDate};

    const U: UserId = 7;

    fn deck_with_semester() -> DeckData {
        let mut settings = DeckSettings::default();
        settings.active_semester = Some(1);
        let mut d = DeckData::new(settings);
        d.insert_semester(Semester {
            id: 1,
            first_day: NaiveDate::from_ymd_opt(2024, 9, 1).unwrap(),
            last_day: NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
            closed: false,
        });
        d.insert_semester(Semester {
            id: 2,
            first_day: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            last_day: NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
            closed: true,
        });
        d.insert_user(Profile::student(U, "stu"));
        d
    }

    fn approved(d: &mut DeckData, quest: QuestId, semester: u64, requested: u32, at: DateTime<Utc>) -> u64 {
        let ordinal = d.submissions_for(U, quest).len() as u32 + 1;
        let id = d.allocate_id();
        let mut s = Submission::new(id, quest, U, ordinal, Some(semester), at);
        s.is_completed = true;
        s.is_approved = true;
        s.time_approved = Some(at);
        s.xp_requested = requested;
        d.submissions.insert(id, s);
        id
    }

    #[test]
    fn cached_total_tracks_a_full_recompute() {
        use crate::badges;
        use crate::domain::Course;
        use crate::submissions::{self, CompleteInput, ReviewInput};

        const STAFF: UserId = 1;
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
        d.insert_course(Course { id: 4, title: "Course".into(), xp_for_100_percent: 100, active: true });
        d.insert_enrolment(Enrolment {
            id: 0,
            user_id: U,
            semester_id: 3,
            course_id: Some(4),
            group_id: None,
            xp_adjustment: 0,
            xp_adjust_explanation: None,
        });
        let a = d.insert_quest(Quest::new("A", 10)).unwrap();
        let b = d.insert_quest(Quest::new("B", 20)).unwrap();
        let badge = d.insert_badge(Badge::new("Shiny", 5));
        let now = Utc::now();
        let done = || CompleteInput { text: "done".into(), ..Default::default() };

        fn consistent(d: &DeckData) -> i64 {
            let total = xp(d, U);
            assert_eq!(total, compute_xp(d, U, None));
            total
        }

        let sa = submissions::start(&mut d, U, a, now).unwrap();
        submissions::complete(&mut d, U, sa, done(), now).unwrap();
        submissions::approve(&mut d, STAFF, sa, ReviewInput::default(), now).unwrap();
        assert_eq!(consistent(&d), 10);

        let sb = submissions::start(&mut d, U, b, now).unwrap();
        submissions::complete(&mut d, U, sb, done(), now).unwrap();
        submissions::return_submission(&mut d, STAFF, sb, ReviewInput::default(), now).unwrap();
        assert_eq!(consistent(&d), 10);

        let granted = badges::grant(&mut d, badge, U, STAFF, false, now).unwrap();
        assert_eq!(consistent(&d), 15);
        refresh_xp(&mut d, U);

        submissions::complete(&mut d, U, sb, done(), now).unwrap();
        submissions::approve(&mut d, STAFF, sb, ReviewInput::default(), now).unwrap();
        assert_eq!(consistent(&d), 35);

        badges::revoke(&mut d, granted, STAFF, now).unwrap();
        assert_eq!(consistent(&d), 30);
        refresh_xp(&mut d, U);
        assert_eq!(consistent(&d), 30);
    }

    #[test]
    fn sums_per_quest_then_caps() {
        let mut d = deck_with_semester();
        let mut q = Quest::new("Repeat me", 10);
        q.max_repeats = -1;
        q.max_xp = 25;
        let q = d.insert_quest(q).unwrap();
        let now = Utc::now();
        for _ in 0..4 {
            approved(&mut d, q, 1, 0, now);
        }
        assert_eq!(xp(&d, U), 25);
    }

    #[test]
    fn requested_xp_is_a_floor_above_quest_xp() {
        let mut d = deck_with_semester();
        let mut q = Quest::new("Choose", 5);
        q.xp_can_be_entered_by_students = true;
        let q = d.insert_quest(q).unwrap();
        approved(&mut d, q, 1, 12, Utc::now());
        assert_eq!(xp(&d, U), 12);
    }

    #[test]
    fn other_semesters_and_transfers_do_not_count() {
        let mut d = deck_with_semester();
        let q = d.insert_quest(Quest::new("Old", 10)).unwrap();
        let now = Utc::now();
        approved(&mut d, q, 2, 0, now);
        let sid = approved(&mut d, q, 1, 0, now);
        assert_eq!(xp(&d, U), 10);
        d.submission_mut(sid).unwrap().do_not_grant_xp = true;
        assert_eq!(xp(&d, U), 0);
    }

    #[test]
    fn badges_and_adjustments_add_up() {
        let mut d = deck_with_semester();
        let b = d.insert_badge(Badge::new("Star", 20));
        let id = d.allocate_id();
        d.assertions.insert(
            id,
            BadgeAssertion {
                id,
                badge_id: b,
                user_id: U,
                ordinal: 1,
                timestamp: Utc::now(),
                issued_by: 1,
                do_not_grant_xp: false,
                semester_id: Some(1),
            },
        );
        d.insert_enrolment(Enrolment {
            id: 0,
            user_id: U,
            semester_id: 1,
            course_id: None,
            group_id: None,
            xp_adjustment: -5,
            xp_adjust_explanation: Some("late".into()),
        });
        assert_eq!(xp(&d, U), 15);
    }

    #[test]
    fn not_earning_users_get_no_quest_xp() {
        let mut d = deck_with_semester();
        let q = d.insert_quest(Quest::new("Any", 10)).unwrap();
        approved(&mut d, q, 1, 0, Utc::now());
        d.user_mut(U).unwrap().not_earning_xp = true;
        assert_eq!(xp(&d, U), 0);
    }

    #[test]
    fn xp_to_date_ignores_later_approvals() {
        let mut d = deck_with_semester();
        let a = d.insert_quest(Quest::new("A", 3)).unwrap();
        let b = d.insert_quest(Quest::new("B", 4)).unwrap();
        let t0 = Utc::now();
        approved(&mut d, a, 1, 0, t0);
        approved(&mut d, b, 1, 0, t0 + Duration::days(2));
        assert_eq!(xp_to_date(&d, U, t0 + Duration::days(1)), 3);
        assert_eq!(xp_to_date(&d, U, t0 + Duration::days(3)), 7);
    }

    #[test]
    fn cache_matches_recompute() {
        let mut d = deck_with_semester();
        let q = d.insert_quest(Quest::new("A", 3)).unwrap();
        approved(&mut d, q, 1, 0, Utc::now());
        assert_eq!(refresh_xp(&mut d, U), 3);
        approved(&mut d, q, 1, 0, Utc::now());
        // Stale until invalidated.
        assert_eq!(xp(&d, U), 3);
        invalidate_xp(&mut d, U);
        assert_eq!(xp(&d, U), 3 + 3);
    }

    #[test]
    fn rank_lookup_and_distance() {
        let mut d = deck_with_semester();
        d.insert_rank(Rank::new("Novice", 0));
        d.insert_rank(Rank::new("Apprentice", 60));
        d.insert_rank(Rank::new("Master", 240));
        let q = d.insert_quest(Quest::new("Big", 100)).unwrap();
        approved(&mut d, q, 1, 0, Utc::now());

        let s = summary(&d, U);
        assert_eq!(s.rank.name, "Apprentice");
        assert_eq!(s.next_rank.as_ref().map(|r| r.name.as_str()), Some("Master"));
        assert_eq!(s.xp_since_last_rank, 40);
        assert_eq!(s.xp_to_next_rank, Some(140));

        let crossed: Vec<String> = ranks_crossed(&d, 50, 240).into_iter().map(|r| r.name).collect();
        assert_eq!(crossed, vec!["Apprentice", "Master"]);
        assert!(ranks_crossed(&d, 60, 100).is_empty());
    }

    #[test]
    fn no_ranks_means_zero_rank() {
        let d = deck_with_semester();
        assert_eq!(rank_for(&d, 500).name, "None");
        assert_eq!(next_rank(&d, 0), None);
    }
}

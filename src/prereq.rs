//! Prerequisite graph: AND of clauses, each `(main [OR alt])` with optional
//! inversion per slot, over heterogeneous entity kinds.
//!
//! Kinds take part by implementing [`PrereqCapable`] and appearing in
//! [`registry`]. The registry is what validates relation references; nothing
//! else in the engine enumerates prerequisite kinds by hand.
//!
//! Evaluation carries a visited set so that cycles (a relation can itself be
//! a prerequisite) short-circuit to `false` instead of recursing forever.

use std::collections::BTreeSet;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::domain::{EntityKind, EntityRef, PrereqId, UserId};
use crate::error::{EngineError, Result};
use crate::ledger;
use crate::store::DeckData;

/// One AND clause gating `parent`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrereqRelation {
    #[serde(default)]
    pub id: PrereqId,
    pub parent: EntityRef,
    pub main: EntityRef,
    #[serde(default = "one")]
    pub main_count: u32,
    #[serde(default)]
    pub main_invert: bool,
    #[serde(default)]
    pub alt: Option<EntityRef>,
    #[serde(default = "one")]
    pub alt_count: u32,
    #[serde(default)]
    pub alt_invert: bool,
}

fn one() -> u32 {
    1
}

impl PrereqRelation {
    /// Single main, no alternate, no inversion.
    pub fn simple(parent: EntityRef, main: EntityRef) -> Self {
        Self {
            id: 0,
            parent,
            main,
            main_count: 1,
            main_invert: false,
            alt: None,
            alt_count: 1,
            alt_invert: false,
        }
    }

    pub fn is_simple(&self) -> bool {
        self.alt.is_none() && !self.main_invert && self.main_count == 1
    }

    fn same_clause(&self, other: &PrereqRelation) -> bool {
        self.parent == other.parent
            && self.main == other.main
            && self.main_count == other.main_count
            && self.main_invert == other.main_invert
            && self.alt == other.alt
            && (self.alt.is_none() || (self.alt_count == other.alt_count && self.alt_invert == other.alt_invert))
    }

    /// References `entity` in a slot, optionally ignoring inverted slots.
    fn references(&self, entity: EntityRef, exclude_inverted: bool) -> bool {
        let in_main = self.main == entity && !(exclude_inverted && self.main_invert);
        let in_alt = self.alt == Some(entity) && !(exclude_inverted && self.alt_invert);
        in_main || in_alt
    }
}

/// Per-evaluation state.
pub struct EvalCtx<'a> {
    pub deck: &'a DeckData,
    pub user: UserId,
    visiting: BTreeSet<EntityRef>,
    xp: Option<i64>,
}

impl<'a> EvalCtx<'a> {
    pub fn new(deck: &'a DeckData, user: UserId) -> Self {
        Self { deck, user, visiting: BTreeSet::new(), xp: None }
    }

    fn user_xp(&mut self) -> i64 {
        if let Some(xp) = self.xp {
            return xp;
        }
        let xp = ledger::xp(self.deck, self.user);
        self.xp = Some(xp);
        xp
    }
}

/// The two capabilities an entity kind needs to appear in a relation.
pub trait PrereqCapable: Send + Sync {
    fn kind(&self) -> EntityKind;

    fn display_name(&self, deck: &DeckData, id: u64) -> Option<String>;

    /// Is the condition met at least `n` times for `ctx.user`?
    fn acts_as_prerequisite(&self, ctx: &mut EvalCtx<'_>, id: u64, n: u32) -> bool;

    /// May be gated by relations of its own.
    fn has_prerequisites(&self) -> bool {
        false
    }

    /// Counts scale with repeated grants of a badge gated on this kind.
    fn scalable(&self) -> bool {
        false
    }
}

struct QuestPrereq;
struct BadgePrereq;
struct CampaignPrereq;
struct RankPrereq;
struct RelationPrereq;
struct CoursePrereq;
struct GroupPrereq;

impl PrereqCapable for QuestPrereq {
    fn kind(&self) -> EntityKind {
        EntityKind::Quest
    }
    fn display_name(&self, deck: &DeckData, id: u64) -> Option<String> {
        deck.quests.get(&id).map(|q| q.name.clone())
    }
    fn acts_as_prerequisite(&self, ctx: &mut EvalCtx<'_>, id: u64, n: u32) -> bool {
        ctx.deck.approved_count(ctx.user, id) >= n as usize
    }
    fn has_prerequisites(&self) -> bool {
        true
    }
    fn scalable(&self) -> bool {
        true
    }
}

impl PrereqCapable for BadgePrereq {
    fn kind(&self) -> EntityKind {
        EntityKind::Badge
    }
    fn display_name(&self, deck: &DeckData, id: u64) -> Option<String> {
        deck.badges.get(&id).map(|b| b.name.clone())
    }
    fn acts_as_prerequisite(&self, ctx: &mut EvalCtx<'_>, id: u64, n: u32) -> bool {
        ctx.deck.assertion_count(ctx.user, id) >= n as usize
    }
    fn has_prerequisites(&self) -> bool {
        true
    }
    fn scalable(&self) -> bool {
        true
    }
}

impl PrereqCapable for CampaignPrereq {
    fn kind(&self) -> EntityKind {
        EntityKind::Campaign
    }
    fn display_name(&self, deck: &DeckData, id: u64) -> Option<String> {
        deck.campaigns.get(&id).map(|c| c.title.clone())
    }
    // `n` is ignored: every member quest approved at least once.
    fn acts_as_prerequisite(&self, ctx: &mut EvalCtx<'_>, id: u64, _n: u32) -> bool {
        ctx.deck
            .quests
            .values()
            .filter(|q| q.campaign_id == Some(id))
            .all(|q| ctx.deck.approved_count(ctx.user, q.id) >= 1)
    }
}

impl PrereqCapable for RankPrereq {
    fn kind(&self) -> EntityKind {
        EntityKind::Rank
    }
    fn display_name(&self, deck: &DeckData, id: u64) -> Option<String> {
        deck.ranks.get(&id).map(|r| r.name.clone())
    }
    fn acts_as_prerequisite(&self, ctx: &mut EvalCtx<'_>, id: u64, _n: u32) -> bool {
        let Some(threshold) = ctx.deck.ranks.get(&id).map(|r| r.xp) else {
            return false;
        };
        ctx.user_xp() >= i64::from(threshold)
    }
}

impl PrereqCapable for RelationPrereq {
    fn kind(&self) -> EntityKind {
        EntityKind::Prereq
    }
    fn display_name(&self, deck: &DeckData, id: u64) -> Option<String> {
        deck.prereqs.get(&id).map(|r| display(deck, r))
    }
    fn acts_as_prerequisite(&self, ctx: &mut EvalCtx<'_>, id: u64, _n: u32) -> bool {
        let me = EntityRef::prereq(id);
        if !ctx.visiting.insert(me) {
            debug!(target: "prereq", prereq_id = id, "Cycle through relation; treating as unmet");
            return false;
        }
        let deck = ctx.deck;
        let met = match deck.prereqs.get(&id) {
            Some(rel) => eval_clause(ctx, rel, 1),
            None => false,
        };
        ctx.visiting.remove(&me);
        met
    }
}

impl PrereqCapable for CoursePrereq {
    fn kind(&self) -> EntityKind {
        EntityKind::Course
    }
    fn display_name(&self, deck: &DeckData, id: u64) -> Option<String> {
        deck.courses.get(&id).map(|c| c.title.clone())
    }
    fn acts_as_prerequisite(&self, ctx: &mut EvalCtx<'_>, id: u64, _n: u32) -> bool {
        ctx.deck.current_enrolments(ctx.user).any(|e| e.course_id == Some(id))
    }
}

impl PrereqCapable for GroupPrereq {
    fn kind(&self) -> EntityKind {
        EntityKind::Group
    }
    fn display_name(&self, deck: &DeckData, id: u64) -> Option<String> {
        deck.groups.get(&id).map(|g| g.name.clone())
    }
    fn acts_as_prerequisite(&self, ctx: &mut EvalCtx<'_>, id: u64, _n: u32) -> bool {
        ctx.deck.current_enrolments(ctx.user).any(|e| e.group_id == Some(id))
    }
}

static REGISTRY: [&dyn PrereqCapable; 7] = [
    &QuestPrereq,
    &BadgePrereq,
    &CampaignPrereq,
    &RankPrereq,
    &RelationPrereq,
    &CoursePrereq,
    &GroupPrereq,
];

/// Every kind that can appear as main or alternate of a relation.
pub fn registry() -> &'static [&'static dyn PrereqCapable] {
    &REGISTRY
}

pub fn capability(kind: EntityKind) -> Option<&'static dyn PrereqCapable> {
    registry().iter().copied().find(|c| c.kind() == kind)
}

/// Kinds that may be gated (appear as a relation's parent).
pub fn parent_kinds() -> Vec<EntityKind> {
    registry().iter().filter(|c| c.has_prerequisites()).map(|c| c.kind()).collect()
}

pub fn prerequisite_kinds() -> Vec<EntityKind> {
    registry().iter().map(|c| c.kind()).collect()
}

fn slot(ctx: &mut EvalCtx<'_>, entity: EntityRef, count: u32, invert: bool, scale: u32) -> bool {
    let Some(cap) = capability(entity.kind) else {
        return false;
    };
    if !ctx.deck.entity_exists(entity) {
        return false;
    }
    if scale > 1 {
        // A repeat needs a count that grows; fixed conditions cannot carry it.
        if invert || !cap.scalable() {
            return false;
        }
        return cap.acts_as_prerequisite(ctx, entity.id, count.saturating_mul(scale));
    }
    cap.acts_as_prerequisite(ctx, entity.id, count) != invert
}

fn eval_clause(ctx: &mut EvalCtx<'_>, rel: &PrereqRelation, scale: u32) -> bool {
    // A missing main fails the clause regardless of inversion.
    if !ctx.deck.entity_exists(rel.main) {
        return false;
    }
    if slot(ctx, rel.main, rel.main_count, rel.main_invert, scale) {
        return true;
    }
    match rel.alt {
        Some(alt) => slot(ctx, alt, rel.alt_count, rel.alt_invert, scale),
        None => false,
    }
}

/// Records gating `parent`, in id order.
pub fn prereqs_of(deck: &DeckData, parent: EntityRef) -> Vec<&PrereqRelation> {
    deck.prereqs.values().filter(|r| r.parent == parent).collect()
}

pub fn has_prereqs(deck: &DeckData, parent: EntityRef) -> bool {
    deck.prereqs.values().any(|r| r.parent == parent)
}

/// All clauses of `parent` hold for `user`. No clauses means met.
pub fn conditions_met(deck: &DeckData, parent: EntityRef, user: UserId) -> bool {
    conditions_met_times(deck, parent, user, 1)
}

/// Like [`conditions_met`], with every non-inverted quest/badge count
/// multiplied by `times`. Used for the k-th grant of a repeatable badge: for
/// `times > 1` each clause must hold through such a scaled slot, so inverted
/// slots and fixed kinds (rank, campaign, course, ...) count as unmet.
pub fn conditions_met_times(deck: &DeckData, parent: EntityRef, user: UserId, times: u32) -> bool {
    let mut ctx = EvalCtx::new(deck, user);
    conditions_met_in(&mut ctx, parent, times)
}

fn conditions_met_in(ctx: &mut EvalCtx<'_>, parent: EntityRef, times: u32) -> bool {
    if !ctx.visiting.insert(parent) {
        return false;
    }
    let deck = ctx.deck;
    let met = deck
        .prereqs
        .values()
        .filter(|r| r.parent == parent)
        .all(|r| eval_clause(ctx, r, times));
    ctx.visiting.remove(&parent);
    met
}

fn check_participant(deck: &DeckData, e: EntityRef, role: &str) -> Result<()> {
    if capability(e.kind).is_none() {
        return Err(EngineError::PrereqAuthoring(format!("{} cannot act as a prerequisite", e.kind)));
    }
    if !deck.entity_exists(e) {
        return Err(EngineError::PrereqAuthoring(format!("{role} {e} does not exist")));
    }
    Ok(())
}

/// Validate and store a relation. Returns the new id.
#[instrument(level = "debug", skip(deck, rel), fields(parent = %rel.parent, main = %rel.main))]
pub fn add_relation(deck: &mut DeckData, mut rel: PrereqRelation) -> Result<PrereqId> {
    let parent_ok = capability(rel.parent.kind).is_some_and(|c| c.has_prerequisites());
    if !parent_ok {
        return Err(EngineError::PrereqAuthoring(format!("{} cannot have prerequisites", rel.parent.kind)));
    }
    if !deck.entity_exists(rel.parent) {
        return Err(EngineError::PrereqAuthoring(format!("parent {} does not exist", rel.parent)));
    }
    check_participant(deck, rel.main, "main")?;
    if let Some(alt) = rel.alt {
        check_participant(deck, alt, "alternate")?;
    }
    if rel.main == rel.parent || rel.alt == Some(rel.parent) {
        return Err(EngineError::PrereqAuthoring(format!("{} cannot require itself", rel.parent)));
    }
    rel.id = deck.allocate_id();
    let id = rel.id;
    info!(target: "prereq", prereq_id = id, parent = %rel.parent, main = %rel.main, alt = ?rel.alt, "Prerequisite added");
    let kind = rel.parent.kind;
    deck.prereqs.insert(id, rel);
    deck.enqueue(crate::tasks::Task::RefreshAvailabilityAllUsers { kind }, None);
    Ok(id)
}

/// Require `required` once. Returns the existing record when an identical
/// simple clause is already present.
pub fn add_simple_prereq(deck: &mut DeckData, parent: EntityRef, required: EntityRef) -> Result<PrereqId> {
    let rel = PrereqRelation::simple(parent, required);
    if let Some(existing) = deck.prereqs.values().find(|r| r.same_clause(&rel)) {
        return Ok(existing.id);
    }
    add_relation(deck, rel)
}

/// Remove every record gating `parent`. Returns how many went.
pub fn clear_all_prereqs(deck: &mut DeckData, parent: EntityRef) -> usize {
    let before = deck.prereqs.len();
    deck.prereqs.retain(|_, r| r.parent != parent);
    let removed = before - deck.prereqs.len();
    if removed > 0 {
        info!(target: "prereq", %parent, removed, "Prerequisites cleared");
        deck.enqueue(crate::tasks::Task::RefreshAvailabilityAllUsers { kind: parent.kind }, None);
    }
    removed
}

pub fn remove_relation(deck: &mut DeckData, id: PrereqId) -> Result<PrereqRelation> {
    let rel = deck
        .prereqs
        .remove(&id)
        .ok_or_else(|| EngineError::not_found(format!("Prerequisite {id}")))?;
    deck.enqueue(crate::tasks::Task::RefreshAvailabilityAllUsers { kind: rel.parent.kind }, None);
    Ok(rel)
}

/// Drop every record that names `entity` as main or alternate.
pub fn remove_as_prereq(deck: &mut DeckData, entity: EntityRef) -> usize {
    let before = deck.prereqs.len();
    deck.prereqs.retain(|_, r| !r.references(entity, false));
    before - deck.prereqs.len()
}

/// Records that reference `entity` as main or alternate.
pub fn reliant_on(deck: &DeckData, entity: EntityRef, exclude_inverted: bool) -> Vec<&PrereqRelation> {
    deck.prereqs
        .values()
        .filter(|r| r.references(entity, exclude_inverted))
        .collect()
}

/// Parents of the records returned by [`reliant_on`] (non-inverted slots),
/// de-duplicated, optionally only the currently active ones.
pub fn reliant_objects(
    deck: &DeckData,
    entity: EntityRef,
    active_only: bool,
    now: NaiveDateTime,
) -> Vec<EntityRef> {
    let parents: BTreeSet<EntityRef> = reliant_on(deck, entity, true)
        .into_iter()
        .map(|r| r.parent)
        .filter(|p| !active_only || deck.entity_active(*p, now))
        .collect();
    parents.into_iter().collect()
}

pub fn is_prerequisite(deck: &DeckData, entity: EntityRef) -> bool {
    deck.prereqs.values().any(|r| r.references(entity, false))
}

fn slot_text(deck: &DeckData, e: EntityRef, count: u32, invert: bool) -> String {
    let name = capability(e.kind)
        .and_then(|c| c.display_name(deck, e.id))
        .unwrap_or_else(|| format!("[missing {}]", e));
    let mut out = String::new();
    if invert {
        out.push_str("NOT ");
    }
    out.push_str(&format!("({}) {}", e.kind, name));
    if count > 1 {
        out.push_str(&format!(" x{count}"));
    }
    out
}

/// `[NOT ](Kind) name[ xN][ OR ...]`
pub fn display(deck: &DeckData, rel: &PrereqRelation) -> String {
    let mut out = slot_text(deck, rel.main, rel.main_count, rel.main_invert);
    if let Some(alt) = rel.alt {
        out.push_str(" OR ");
        out.push_str(&slot_text(deck, alt, rel.alt_count, rel.alt_invert));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::badges::BadgeAssertion;
    use crate::config::DeckSettings;
    use crate::domain::{Badge, Campaign, Quest, Rank, Submission};
    use chrono::Utc;

    const U: UserId = 100;

    fn deck() -> DeckData {
        DeckData::new(DeckSettings::default())
    }

    fn approve(deck: &mut DeckData, quest: u64, user: UserId) {
        let ordinal = deck.submissions_for(user, quest).len() as u32 + 1;
        let id = deck.allocate_id();
        let mut s = Submission::new(id, quest, user, ordinal, None, Utc::now());
        s.is_completed = true;
        s.is_approved = true;
        deck.submissions.insert(id, s);
    }

    fn grant(deck: &mut DeckData, badge: u64, user: UserId) {
        let id = deck.allocate_id();
        let ordinal = deck.assertion_count(user, badge) as u32 + 1;
        deck.assertions.insert(
            id,
            BadgeAssertion {
                id,
                badge_id: badge,
                user_id: user,
                ordinal,
                timestamp: Utc::now(),
                issued_by: 1,
                do_not_grant_xp: false,
                semester_id: None,
            },
        );
    }

    #[test]
    fn no_records_means_met() {
        let mut d = deck();
        let q = d.insert_quest(Quest::new("Free", 1)).unwrap();
        assert!(conditions_met(&d, EntityRef::quest(q), U));
    }

    #[test]
    fn or_with_inverted_alternate() {
        let mut d = deck();
        let p = d.insert_quest(Quest::new("P", 1)).unwrap();
        let y = d.insert_quest(Quest::new("Y", 1)).unwrap();
        let x = d.insert_badge(Badge::new("X", 0));
        add_relation(
            &mut d,
            PrereqRelation {
                alt: Some(EntityRef::quest(y)),
                alt_count: 2,
                alt_invert: true,
                ..PrereqRelation::simple(EntityRef::quest(p), EntityRef::badge(x))
            },
        )
        .unwrap();
        approve(&mut d, y, U);
        // false OR NOT(1 >= 2)
        assert!(conditions_met(&d, EntityRef::quest(p), U));
        approve(&mut d, y, U);
        assert!(!conditions_met(&d, EntityRef::quest(p), U));
        grant(&mut d, x, U);
        assert!(conditions_met(&d, EntityRef::quest(p), U));
    }

    #[test]
    fn campaign_needs_every_member_once() {
        let mut d = deck();
        let k = d.insert_campaign(Campaign::new("K"));
        let mut q1 = Quest::new("Q1", 1);
        q1.campaign_id = Some(k);
        let mut q2 = Quest::new("Q2", 1);
        q2.campaign_id = Some(k);
        let q1 = d.insert_quest(q1).unwrap();
        let q2 = d.insert_quest(q2).unwrap();
        let gated = d.insert_quest(Quest::new("After K", 1)).unwrap();
        add_simple_prereq(&mut d, EntityRef::quest(gated), EntityRef::campaign(k)).unwrap();

        approve(&mut d, q1, U);
        assert!(!conditions_met(&d, EntityRef::quest(gated), U));
        approve(&mut d, q2, U);
        assert!(conditions_met(&d, EntityRef::quest(gated), U));
        approve(&mut d, q1, U);
        assert!(conditions_met(&d, EntityRef::quest(gated), U));
    }

    #[test]
    fn missing_main_fails_even_inverted() {
        let mut d = deck();
        let p = d.insert_quest(Quest::new("P", 1)).unwrap();
        let gone = d.insert_quest(Quest::new("Gone", 1)).unwrap();
        add_relation(
            &mut d,
            PrereqRelation {
                main_invert: true,
                ..PrereqRelation::simple(EntityRef::quest(p), EntityRef::quest(gone))
            },
        )
        .unwrap();
        assert!(conditions_met(&d, EntityRef::quest(p), U));
        d.quests.remove(&gone);
        assert!(!conditions_met(&d, EntityRef::quest(p), U));
    }

    #[test]
    fn rank_compares_against_xp() {
        let mut d = deck();
        d.insert_user(crate::domain::Profile::student(U, "s"));
        let r = d.insert_rank(Rank::new("Novice", 10));
        let q = d.insert_quest(Quest::new("Earner", 10)).unwrap();
        let p = d.insert_quest(Quest::new("Gated", 1)).unwrap();
        add_simple_prereq(&mut d, EntityRef::quest(p), EntityRef::rank(r)).unwrap();
        assert!(!conditions_met(&d, EntityRef::quest(p), U));
        approve(&mut d, q, U);
        assert!(conditions_met(&d, EntityRef::quest(p), U));
    }

    #[test]
    fn cycles_short_circuit_to_false() {
        let mut d = deck();
        let a = d.insert_quest(Quest::new("A", 1)).unwrap();
        let b = d.insert_quest(Quest::new("B", 1)).unwrap();
        let r1 = add_simple_prereq(&mut d, EntityRef::quest(a), EntityRef::quest(b)).unwrap();
        // A relation that requires itself through another relation.
        let r2 = add_simple_prereq(&mut d, EntityRef::quest(b), EntityRef::prereq(r1)).unwrap();
        d.prereqs.get_mut(&r1).unwrap().main = EntityRef::prereq(r2);
        assert!(!conditions_met(&d, EntityRef::quest(a), U));
        assert!(!conditions_met(&d, EntityRef::quest(b), U));
    }

    #[test]
    fn authoring_rejects_bad_references() {
        let mut d = deck();
        let q = d.insert_quest(Quest::new("Q", 1)).unwrap();
        let r = d.insert_rank(Rank::new("R", 5));
        let err = add_simple_prereq(&mut d, EntityRef::rank(r), EntityRef::quest(q)).unwrap_err();
        assert_eq!(err.code(), "prereq_authoring");
        let err = add_simple_prereq(&mut d, EntityRef::quest(q), EntityRef::badge(77)).unwrap_err();
        assert_eq!(err.code(), "prereq_authoring");
    }

    #[test]
    fn simple_prereq_is_idempotent_and_clear_removes_all() {
        let mut d = deck();
        let a = d.insert_quest(Quest::new("A", 1)).unwrap();
        let b = d.insert_quest(Quest::new("B", 1)).unwrap();
        let first = add_simple_prereq(&mut d, EntityRef::quest(b), EntityRef::quest(a)).unwrap();
        let again = add_simple_prereq(&mut d, EntityRef::quest(b), EntityRef::quest(a)).unwrap();
        assert_eq!(first, again);
        assert_eq!(clear_all_prereqs(&mut d, EntityRef::quest(b)), 1);
        assert_eq!(clear_all_prereqs(&mut d, EntityRef::quest(b)), 0);
    }

    #[test]
    fn reverse_lookup_respects_inversion() {
        let mut d = deck();
        let a = d.insert_quest(Quest::new("A", 1)).unwrap();
        let b = d.insert_quest(Quest::new("B", 1)).unwrap();
        let c = d.insert_quest(Quest::new("C", 1)).unwrap();
        add_simple_prereq(&mut d, EntityRef::quest(b), EntityRef::quest(a)).unwrap();
        add_relation(
            &mut d,
            PrereqRelation {
                main_invert: true,
                ..PrereqRelation::simple(EntityRef::quest(c), EntityRef::quest(a))
            },
        )
        .unwrap();
        assert_eq!(reliant_on(&d, EntityRef::quest(a), false).len(), 2);
        assert_eq!(reliant_on(&d, EntityRef::quest(a), true).len(), 1);
        assert!(is_prerequisite(&d, EntityRef::quest(a)));
        assert!(!is_prerequisite(&d, EntityRef::quest(c)));
    }

    #[test]
    fn display_renders_both_slots() {
        let mut d = deck();
        let p = d.insert_quest(Quest::new("P", 1)).unwrap();
        let y = d.insert_quest(Quest::new("Yonder", 1)).unwrap();
        let x = d.insert_badge(Badge::new("Xylo", 0));
        let rel = PrereqRelation {
            alt: Some(EntityRef::quest(y)),
            alt_count: 2,
            alt_invert: true,
            ..PrereqRelation::simple(EntityRef::quest(p), EntityRef::badge(x))
        };
        assert_eq!(display(&d, &rel), "(Badge) Xylo OR NOT (Quest) Yonder x2");
    }

    #[test]
    fn scaled_counts_gate_repeat_grants() {
        let mut d = deck();
        let q = d.insert_quest(Quest::new("Q", 1)).unwrap();
        let b = d.insert_badge(Badge::new("B", 0));
        add_simple_prereq(&mut d, EntityRef::badge(b), EntityRef::quest(q)).unwrap();
        approve(&mut d, q, U);
        assert!(conditions_met_times(&d, EntityRef::badge(b), U, 1));
        assert!(!conditions_met_times(&d, EntityRef::badge(b), U, 2));
        approve(&mut d, q, U);
        assert!(conditions_met_times(&d, EntityRef::badge(b), U, 2));
    }

    #[test]
    fn fixed_slots_do_not_satisfy_scaled_clauses() {
        let mut d = deck();
        let q = d.insert_quest(Quest::new("Q", 1)).unwrap();
        let r = d.insert_rank(Rank::new("Anyone", 0));
        let b = d.insert_badge(Badge::new("B", 0));
        let rel = PrereqRelation {
            alt: Some(EntityRef::quest(q)),
            ..PrereqRelation::simple(EntityRef::badge(b), EntityRef::rank(r))
        };
        add_relation(&mut d, rel).unwrap();
        assert!(conditions_met_times(&d, EntityRef::badge(b), U, 1));
        assert!(!conditions_met_times(&d, EntityRef::badge(b), U, 2));
        approve(&mut d, q, U);
        approve(&mut d, q, U);
        assert!(conditions_met_times(&d, EntityRef::badge(b), U, 2));
    }

    #[test]
    fn registry_lists_parents_by_capability() {
        assert_eq!(parent_kinds(), vec![EntityKind::Quest, EntityKind::Badge]);
        assert_eq!(prerequisite_kinds().len(), EntityKind::ALL.len());
    }
}

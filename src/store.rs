//! In-memory deck tables.
//!
//! `DeckData` is the single partition of data owned by one deck. Engine
//! operations take `&DeckData` (queries) or `&mut DeckData` (transitions); the
//! async `Deck` wrapper serialises writers behind one lock, which is what
//! makes each transition and its side effects a single transaction.
//!
//! Tables are `BTreeMap`s so that every scan (availability lists, map walks,
//! exports) is deterministic.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{debug, info};

use crate::avail_cache::AvailabilityCache;
use crate::badges::BadgeAssertion;
use crate::config::{parse_entity_ref, DeckSettings, SeedCatalogue};
use crate::domain::*;
use crate::error::{EngineError, Result};
use crate::maps::QuestMap;
use crate::notify::{Notification, Target, Verb};
use crate::prereq::{self, PrereqRelation};
use crate::tasks::{FailedTask, Job, Task};

#[derive(Clone, Debug, Default)]
pub struct DeckData {
    pub settings: DeckSettings,

    pub quests: BTreeMap<QuestId, Quest>,
    pub campaigns: BTreeMap<CampaignId, Campaign>,
    pub common_data: BTreeMap<u64, CommonData>,
    pub badge_types: BTreeMap<u64, BadgeType>,
    pub badges: BTreeMap<BadgeId, Badge>,
    pub ranks: BTreeMap<RankId, Rank>,
    pub semesters: BTreeMap<SemesterId, Semester>,
    pub courses: BTreeMap<CourseId, Course>,
    pub groups: BTreeMap<GroupId, Group>,
    pub enrolments: BTreeMap<u64, Enrolment>,
    pub users: BTreeMap<UserId, Profile>,

    pub prereqs: BTreeMap<PrereqId, PrereqRelation>,
    pub submissions: BTreeMap<SubmissionId, Submission>,
    pub assertions: BTreeMap<AssertionId, BadgeAssertion>,
    pub maps: BTreeMap<MapId, QuestMap>,
    pub questions: BTreeMap<QuestionId, Question>,

    pub availability: AvailabilityCache,

    /// Notification records not yet collected by the notification collaborator.
    pub outbox: Vec<Notification>,
    /// Background work produced inside a transaction, submitted after commit.
    pub pending_tasks: Vec<Job>,
    pub failed_tasks: Vec<FailedTask>,

    next_id: u64,
}

impl DeckData {
    pub fn new(settings: DeckSettings) -> Self {
        Self { settings, next_id: 1, ..Default::default() }
    }

    /// Build a deck from a seed catalogue. Ids present in the catalogue are kept.
    pub fn from_catalogue(settings: DeckSettings, cat: &SeedCatalogue) -> Result<Self> {
        let mut deck = DeckData::new(settings);
        for s in &cat.semesters {
            deck.insert_semester(s.clone());
        }
        for r in &cat.ranks {
            deck.insert_rank(r.clone());
        }
        for c in &cat.campaigns {
            deck.insert_campaign(c.clone());
        }
        for cd in &cat.common_data {
            deck.insert_common_data(cd.clone());
        }
        for q in &cat.quests {
            deck.insert_quest(q.clone())?;
        }
        for bt in &cat.badge_types {
            deck.insert_badge_type(bt.clone());
        }
        for b in &cat.badges {
            deck.insert_badge(b.clone());
        }
        for c in &cat.courses {
            deck.insert_course(c.clone());
        }
        for g in &cat.groups {
            deck.insert_group(g.clone());
        }
        for u in &cat.users {
            deck.insert_user(u.clone());
        }
        for e in &cat.enrolments {
            deck.insert_enrolment(e.clone());
        }
        for p in &cat.prereqs {
            let parent = resolve_seed_ref(&p.parent)?;
            let main = resolve_seed_ref(&p.main)?;
            let alt = p.alt.as_deref().map(resolve_seed_ref).transpose()?;
            let rel = PrereqRelation {
                id: 0,
                parent,
                main,
                main_count: p.main_count,
                main_invert: p.main_invert,
                alt,
                alt_count: p.alt_count,
                alt_invert: p.alt_invert,
            };
            prereq::add_relation(&mut deck, rel)?;
        }
        // Seeding is not a catalogue edit; nothing to refresh yet.
        deck.pending_tasks.clear();
        info!(
            target: "bytedeck",
            quests = deck.quests.len(),
            badges = deck.badges.len(),
            prereqs = deck.prereqs.len(),
            users = deck.users.len(),
            "Deck catalogue loaded"
        );
        Ok(deck)
    }

    // ---- ids ----

    pub fn allocate_id(&mut self) -> u64 {
        let id = self.next_id.max(1);
        self.next_id = id + 1;
        id
    }

    fn claim_id(&mut self, id: u64) -> u64 {
        if id == 0 {
            self.allocate_id()
        } else {
            self.next_id = self.next_id.max(id + 1);
            id
        }
    }

    // ---- lookups ----

    pub fn quest(&self, id: QuestId) -> Result<&Quest> {
        self.quests.get(&id).ok_or_else(|| EngineError::not_found(format!("Quest {id}")))
    }

    pub fn quest_mut(&mut self, id: QuestId) -> Result<&mut Quest> {
        self.quests.get_mut(&id).ok_or_else(|| EngineError::not_found(format!("Quest {id}")))
    }

    pub fn badge(&self, id: BadgeId) -> Result<&Badge> {
        self.badges.get(&id).ok_or_else(|| EngineError::not_found(format!("Badge {id}")))
    }

    pub fn user(&self, id: UserId) -> Result<&Profile> {
        self.users.get(&id).ok_or_else(|| EngineError::not_found(format!("User {id}")))
    }

    pub fn user_mut(&mut self, id: UserId) -> Result<&mut Profile> {
        self.users.get_mut(&id).ok_or_else(|| EngineError::not_found(format!("User {id}")))
    }

    pub fn submission(&self, id: SubmissionId) -> Result<&Submission> {
        self.submissions
            .get(&id)
            .ok_or_else(|| EngineError::not_found(format!("Submission {id}")))
    }

    pub fn submission_mut(&mut self, id: SubmissionId) -> Result<&mut Submission> {
        self.submissions
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found(format!("Submission {id}")))
    }

    pub fn map(&self, id: MapId) -> Result<&QuestMap> {
        self.maps.get(&id).ok_or_else(|| EngineError::not_found(format!("Map {id}")))
    }

    pub fn quest_by_import_id(&self, import_id: uuid::Uuid) -> Option<&Quest> {
        self.quests.values().find(|q| q.import_id == import_id)
    }

    pub fn badge_by_import_id(&self, import_id: uuid::Uuid) -> Option<&Badge> {
        self.badges.values().find(|b| b.import_id == import_id)
    }

    pub fn badge_type_of(&self, badge: &Badge) -> Option<&BadgeType> {
        badge.badge_type_id.and_then(|id| self.badge_types.get(&id))
    }

    pub fn entity_exists(&self, e: EntityRef) -> bool {
        match e.kind {
            EntityKind::Quest => self.quests.contains_key(&e.id),
            EntityKind::Badge => self.badges.contains_key(&e.id),
            EntityKind::Campaign => self.campaigns.contains_key(&e.id),
            EntityKind::Rank => self.ranks.contains_key(&e.id),
            EntityKind::Prereq => self.prereqs.contains_key(&e.id),
            EntityKind::Course => self.courses.contains_key(&e.id),
            EntityKind::Group => self.groups.contains_key(&e.id),
        }
    }

    /// Whether an entity is currently in play, at deck-local `now`.
    pub fn entity_active(&self, e: EntityRef, now: NaiveDateTime) -> bool {
        match e.kind {
            EntityKind::Quest => self.quests.get(&e.id).is_some_and(|q| self.quest_active(q, now)),
            EntityKind::Badge => self.badges.get(&e.id).is_some_and(|b| b.active),
            EntityKind::Campaign => self.campaigns.get(&e.id).is_some_and(|c| c.active),
            EntityKind::Course => self.courses.get(&e.id).is_some_and(|c| c.active),
            EntityKind::Group => self.groups.get(&e.id).is_some_and(|g| g.active),
            EntityKind::Rank | EntityKind::Prereq => self.entity_exists(e),
        }
    }

    pub fn quest_active(&self, q: &Quest, now: NaiveDateTime) -> bool {
        let campaign = q.campaign_id.and_then(|c| self.campaigns.get(&c));
        q.currently_active(campaign, now)
    }

    /// Name shown for a submission's quest, surviving quest deletion.
    pub fn quest_label(&self, sub: &Submission) -> String {
        sub.quest_id
            .and_then(|id| self.quests.get(&id))
            .map(|q| q.name.clone())
            .unwrap_or_else(|| DELETED_QUEST_LABEL.to_string())
    }

    // ---- time & scoping ----

    /// Convert a UTC instant into the deck's wall clock.
    pub fn local_now(&self, now: DateTime<Utc>) -> NaiveDateTime {
        now.with_timezone(&self.settings.timezone()).naive_local()
    }

    pub fn active_semester(&self) -> Option<SemesterId> {
        self.settings.active_semester
    }

    pub fn current_enrolments(&self, user: UserId) -> impl Iterator<Item = &Enrolment> + '_ {
        let active = self.active_semester();
        self.enrolments
            .values()
            .filter(move |e| e.user_id == user && Some(e.semester_id) == active)
    }

    pub fn has_current_course(&self, user: UserId) -> bool {
        self.current_enrolments(user).any(|e| e.course_id.is_some())
    }

    pub fn staff_ids(&self) -> Vec<UserId> {
        self.users.values().filter(|u| u.is_staff).map(|u| u.id).collect()
    }

    pub fn student_ids(&self) -> Vec<UserId> {
        self.users.values().filter(|u| !u.is_staff).map(|u| u.id).collect()
    }

    // ---- submission queries ----

    /// Submissions of one (user, quest) pair, by ordinal.
    pub fn submissions_for(&self, user: UserId, quest: QuestId) -> Vec<&Submission> {
        let mut subs: Vec<&Submission> = self
            .submissions
            .values()
            .filter(|s| s.user_id == user && s.quest_id == Some(quest))
            .collect();
        subs.sort_by_key(|s| (s.ordinal, s.id));
        subs
    }

    pub fn open_submission(&self, user: UserId, quest: QuestId) -> Option<&Submission> {
        self.submissions_for(user, quest)
            .into_iter()
            .find(|s| s.state().is_open())
    }

    pub fn approved_count(&self, user: UserId, quest: QuestId) -> usize {
        self.submissions
            .values()
            .filter(|s| s.user_id == user && s.quest_id == Some(quest) && s.is_approved())
            .count()
    }

    pub fn assertion_count(&self, user: UserId, badge: BadgeId) -> usize {
        self.assertions
            .values()
            .filter(|a| a.user_id == user && a.badge_id == badge)
            .count()
    }

    // ---- side-effect sinks ----

    pub fn notify(&mut self, n: Notification) {
        debug!(target: "bytedeck", verb = %n.verb, actor = n.actor, affected = n.affected_users.len(), "Notification queued");
        self.outbox.push(n);
    }

    pub fn enqueue(&mut self, task: Task, originator: Option<UserId>) {
        let job = Job::new(task, originator);
        if !self.pending_tasks.contains(&job) {
            self.pending_tasks.push(job);
        }
    }

    pub fn take_pending_tasks(&mut self) -> Vec<Job> {
        std::mem::take(&mut self.pending_tasks)
    }

    // ---- catalogue writes ----

    pub fn insert_semester(&mut self, mut s: Semester) -> SemesterId {
        s.id = self.claim_id(s.id);
        let id = s.id;
        self.semesters.insert(id, s);
        id
    }

    pub fn insert_rank(&mut self, mut r: Rank) -> RankId {
        r.id = self.claim_id(r.id);
        let id = r.id;
        self.ranks.insert(id, r);
        id
    }

    pub fn insert_campaign(&mut self, mut c: Campaign) -> CampaignId {
        c.id = self.claim_id(c.id);
        let id = c.id;
        self.campaigns.insert(id, c);
        self.enqueue(Task::RefreshAvailabilityAllUsers { kind: EntityKind::Quest }, None);
        id
    }

    pub fn insert_common_data(&mut self, mut cd: CommonData) -> u64 {
        cd.id = self.claim_id(cd.id);
        let id = cd.id;
        self.common_data.insert(id, cd);
        id
    }

    pub fn insert_badge_type(&mut self, mut bt: BadgeType) -> u64 {
        bt.id = self.claim_id(bt.id);
        let id = bt.id;
        self.badge_types.insert(id, bt);
        id
    }

    pub fn insert_badge(&mut self, mut b: Badge) -> BadgeId {
        b.id = self.claim_id(b.id);
        let id = b.id;
        self.badges.insert(id, b);
        self.enqueue(Task::RefreshAvailabilityAllUsers { kind: EntityKind::Badge }, None);
        id
    }

    pub fn insert_course(&mut self, mut c: Course) -> CourseId {
        c.id = self.claim_id(c.id);
        let id = c.id;
        self.courses.insert(id, c);
        id
    }

    pub fn insert_group(&mut self, mut g: Group) -> GroupId {
        g.id = self.claim_id(g.id);
        let id = g.id;
        self.groups.insert(id, g);
        id
    }

    pub fn insert_user(&mut self, mut u: Profile) -> UserId {
        u.id = self.claim_id(u.id);
        let id = u.id;
        self.users.insert(id, u);
        id
    }

    pub fn insert_enrolment(&mut self, mut e: Enrolment) -> u64 {
        e.id = self.claim_id(e.id);
        let id = e.id;
        let user = e.user_id;
        self.enrolments.insert(id, e);
        self.invalidate_user(user);
        id
    }

    /// Quest names are unique within a deck.
    pub fn insert_quest(&mut self, mut q: Quest) -> Result<QuestId> {
        validate_quest(&q)?;
        if self.quests.values().any(|other| other.name == q.name) {
            return Err(EngineError::InvalidInput(format!("a quest named {:?} already exists", q.name)));
        }
        q.id = self.claim_id(q.id);
        let id = q.id;
        info!(target: "quest", quest_id = id, name = %q.name, "Quest created");
        self.quests.insert(id, q);
        self.enqueue(Task::RefreshAvailabilityAllUsers { kind: EntityKind::Quest }, None);
        Ok(id)
    }

    /// Replace a quest's definition.
    ///
    /// Archiving detaches the quest from every prerequisite it appears in;
    /// unpublishing schedules removal of the quest's unapproved submissions.
    pub fn update_quest(&mut self, q: Quest) -> Result<()> {
        validate_quest(&q)?;
        let id = q.id;
        let old = self.quest(id)?.clone();
        if self.quests.values().any(|other| other.id != id && other.name == q.name) {
            return Err(EngineError::InvalidInput(format!("a quest named {:?} already exists", q.name)));
        }
        let newly_archived = q.archived && !old.archived;
        let newly_hidden = !q.visible_to_students && old.visible_to_students;
        let xp_changed = q.xp != old.xp
            || q.max_xp != old.max_xp
            || q.xp_can_be_entered_by_students != old.xp_can_be_entered_by_students;
        self.quests.insert(id, q);

        if xp_changed {
            let earners: BTreeSet<UserId> = self
                .submissions
                .values()
                .filter(|s| s.quest_id == Some(id))
                .map(|s| s.user_id)
                .collect();
            for user in &earners {
                self.invalidate_user(*user);
                self.enqueue(Task::RefreshAvailability { user_id: *user }, None);
            }
            debug!(target: "quest", quest_id = id, users = earners.len(), "Quest XP changed; dropped cached totals");
        }
        if newly_archived {
            let removed = prereq::remove_as_prereq(self, EntityRef::quest(id));
            info!(target: "quest", quest_id = id, removed, "Archived quest detached from prerequisites");
        }
        if newly_hidden {
            self.enqueue(Task::RemoveSubmissionsForHiddenQuest { quest_id: id }, None);
        }
        self.enqueue(Task::RefreshAvailabilityAllUsers { kind: EntityKind::Quest }, None);
        Ok(())
    }

    /// Delete a quest. Its submissions survive with a null quest; its own
    /// prerequisite records go with it.
    pub fn delete_quest(&mut self, id: QuestId) -> Result<Quest> {
        let q = self
            .quests
            .remove(&id)
            .ok_or_else(|| EngineError::not_found(format!("Quest {id}")))?;
        let mut affected = BTreeSet::new();
        for s in self.submissions.values_mut().filter(|s| s.quest_id == Some(id)) {
            s.quest_id = None;
            affected.insert(s.user_id);
        }
        prereq::clear_all_prereqs(self, EntityRef::quest(id));
        self.questions.retain(|_, q| q.quest_id != id);
        for user in affected {
            self.invalidate_user(user);
        }
        info!(target: "quest", quest_id = id, name = %q.name, "Quest deleted");
        self.enqueue(Task::RefreshAvailabilityAllUsers { kind: EntityKind::Quest }, None);
        Ok(q)
    }

    /// Deleting a campaign keeps its quests, now uncategorised.
    pub fn delete_campaign(&mut self, id: CampaignId) -> Result<Campaign> {
        let c = self
            .campaigns
            .remove(&id)
            .ok_or_else(|| EngineError::not_found(format!("Campaign {id}")))?;
        for q in self.quests.values_mut().filter(|q| q.campaign_id == Some(id)) {
            q.campaign_id = None;
        }
        self.enqueue(Task::RefreshAvailabilityAllUsers { kind: EntityKind::Quest }, None);
        Ok(c)
    }

    // ---- questions ----

    /// Questions of one quest, by ordinal.
    pub fn questions_for(&self, quest: QuestId) -> Vec<&Question> {
        let mut qs: Vec<&Question> = self.questions.values().filter(|q| q.quest_id == quest).collect();
        qs.sort_by_key(|q| (q.ordinal, q.id));
        qs
    }

    /// Append a question to a quest; it takes the next free ordinal.
    pub fn add_question(&mut self, quest_id: QuestId, mut q: Question) -> Result<QuestionId> {
        self.quest(quest_id)?;
        if q.instructions.trim().is_empty() {
            return Err(EngineError::InvalidInput("a question needs instructions".into()));
        }
        q.quest_id = quest_id;
        q.ordinal = self
            .questions_for(quest_id)
            .last()
            .map(|last| last.ordinal + 1)
            .unwrap_or(1);
        q.id = self.allocate_id();
        let id = q.id;
        debug!(target: "quest", quest_id, question_id = id, ordinal = q.ordinal, "Question added");
        self.questions.insert(id, q);
        Ok(id)
    }

    /// Existing answers to the question stay on their submissions, unlinked.
    pub fn delete_question(&mut self, id: QuestionId) -> Result<Question> {
        let q = self
            .questions
            .remove(&id)
            .ok_or_else(|| EngineError::not_found(format!("Question {id}")))?;
        for s in self.submissions.values_mut().filter(|s| s.quest_id == Some(q.quest_id)) {
            let drafts = s.draft_comment.iter_mut().flat_map(|d| d.responses.iter_mut());
            let sealed = s.comments.iter_mut().flat_map(|c| c.responses.iter_mut());
            for r in drafts.chain(sealed).filter(|r| r.question_id == Some(id)) {
                r.question_id = None;
            }
        }
        debug!(target: "quest", quest_id = q.quest_id, question_id = id, "Question deleted");
        Ok(q)
    }

    /// Drop derived per-user state (XP total and cached availability).
    pub fn invalidate_user(&mut self, user: UserId) {
        if let Some(p) = self.users.get_mut(&user) {
            p.xp_cached = None;
        }
        self.availability.invalidate(user);
    }

    /// Delete every not-yet-approved submission of a quest, telling each owner.
    pub fn remove_submissions_for_hidden_quest(&mut self, quest_id: QuestId, now: DateTime<Utc>) -> usize {
        let doomed: Vec<(SubmissionId, UserId)> = self
            .submissions
            .values()
            .filter(|s| s.quest_id == Some(quest_id) && !s.is_approved())
            .map(|s| (s.id, s.user_id))
            .collect();
        let actor = self.settings.deck_ai;
        for (sid, user) in &doomed {
            self.submissions.remove(sid);
            self.invalidate_user(*user);
            self.notify(Notification::new(
                actor,
                Verb::Removed,
                Target::Entity(EntityRef::quest(quest_id)),
                vec![*user],
                now,
            ));
        }
        info!(target: "quest", quest_id, removed = doomed.len(), "Removed submissions of hidden quest");
        doomed.len()
    }
}

fn resolve_seed_ref(raw: &str) -> Result<EntityRef> {
    parse_entity_ref(raw)
        .ok_or_else(|| EngineError::PrereqAuthoring(format!("unrecognised entity reference {raw:?}")))
}

fn validate_quest(q: &Quest) -> Result<()> {
    if q.name.trim().is_empty() {
        return Err(EngineError::InvalidInput("quest name is required".into()));
    }
    if q.max_repeats < UNLIMITED {
        return Err(EngineError::InvalidInput(format!("max_repeats {} is out of range", q.max_repeats)));
    }
    if q.max_xp < UNLIMITED {
        return Err(EngineError::InvalidInput(format!("max_xp {} is out of range", q.max_xp)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[test]
    fn ids_are_kept_and_allocation_skips_them() {
        let mut deck = DeckData::new(DeckSettings::default());
        let mut q = Quest::new("Seeded", 1);
        q.id = 40;
        assert_eq!(deck.insert_quest(q).unwrap(), 40);
        let next = deck.insert_quest(Quest::new("Fresh", 1)).unwrap();
        assert_eq!(next, 41);
    }

    #[test]
    fn duplicate_quest_names_are_rejected() {
        let mut deck = DeckData::new(DeckSettings::default());
        deck.insert_quest(Quest::new("Same", 1)).unwrap();
        let err = deck.insert_quest(Quest::new("Same", 2)).unwrap_err();
        assert_eq!(err.code(), "invalid_input");
    }

    #[test]
    fn questions_take_ordinals_and_deleting_one_unlinks_answers() {
        let mut deck = DeckData::new(DeckSettings::default());
        let qid = deck.insert_quest(Quest::new("Essay", 1)).unwrap();
        let first = deck.add_question(qid, Question::new(QuestionType::ShortAnswer, "Name?")).unwrap();
        let second = deck.add_question(qid, Question::new(QuestionType::LongAnswer, "Why?")).unwrap();
        let ordinals: Vec<u32> = deck.questions_for(qid).iter().map(|q| q.ordinal).collect();
        assert_eq!(ordinals, vec![1, 2]);

        let sid = deck.allocate_id();
        let mut sub = Submission::new(sid, qid, 9, 1, None, Utc::now());
        let mut sealed = Comment::new(9, String::new(), vec![], Utc::now());
        sealed.responses = vec![QuestionResponse { question_id: Some(first), text: Some("Ada".into()), file: None }];
        sub.comments.push(sealed);
        deck.submissions.insert(sid, sub);

        deck.delete_question(first).unwrap();
        let kept = &deck.submission(sid).unwrap().comments[0].responses[0];
        assert_eq!(kept.question_id, None);
        assert_eq!(kept.text.as_deref(), Some("Ada"));
        assert_eq!(deck.questions_for(qid).len(), 1);

        deck.delete_quest(qid).unwrap();
        assert!(!deck.questions.contains_key(&second));
    }

    #[test]
    fn question_needs_an_existing_quest() {
        let mut deck = DeckData::new(DeckSettings::default());
        let err = deck.add_question(77, Question::new(QuestionType::ShortAnswer, "?")).unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn deleted_quest_leaves_labelled_submissions() {
        let mut deck = DeckData::new(DeckSettings::default());
        let qid = deck.insert_quest(Quest::new("Gone soon", 1)).unwrap();
        let sid = deck.allocate_id();
        deck.submissions.insert(sid, Submission::new(sid, qid, 9, 1, None, Utc::now()));
        deck.delete_quest(qid).unwrap();
        let sub = deck.submission(sid).unwrap();
        assert_eq!(sub.quest_id, None);
        assert_eq!(deck.quest_label(sub), DELETED_QUEST_LABEL);
    }

    #[test]
    fn deleting_a_campaign_keeps_its_quests() {
        let mut deck = DeckData::new(DeckSettings::default());
        let cid = deck.insert_campaign(Campaign::new("Unit"));
        let mut q = Quest::new("Member", 1);
        q.campaign_id = Some(cid);
        let qid = deck.insert_quest(q).unwrap();
        deck.delete_campaign(cid).unwrap();
        assert_eq!(deck.quest(qid).unwrap().campaign_id, None);
    }

    #[test]
    fn unpublishing_schedules_submission_cleanup() {
        let mut deck = DeckData::new(DeckSettings::default());
        let qid = deck.insert_quest(Quest::new("Pulled", 1)).unwrap();
        deck.take_pending_tasks();
        let mut q = deck.quest(qid).unwrap().clone();
        q.visible_to_students = false;
        deck.update_quest(q).unwrap();
        let tasks: Vec<Task> = deck.take_pending_tasks().into_iter().map(|j| j.task).collect();
        assert!(tasks.contains(&Task::RemoveSubmissionsForHiddenQuest { quest_id: qid }));
    }

    #[test]
    fn hidden_quest_cleanup_spares_approved_work() {
        let mut deck = DeckData::new(DeckSettings::default());
        let qid = deck.insert_quest(Quest::new("Pulled", 1)).unwrap();
        let now = Utc::now();
        let open = deck.allocate_id();
        deck.submissions.insert(open, Submission::new(open, qid, 5, 1, None, now));
        let done = deck.allocate_id();
        let mut approved = Submission::new(done, qid, 6, 1, None, now);
        approved.is_completed = true;
        approved.is_approved = true;
        deck.submissions.insert(done, approved);

        assert_eq!(deck.remove_submissions_for_hidden_quest(qid, now), 1);
        assert!(deck.submissions.contains_key(&done));
        assert!(!deck.submissions.contains_key(&open));
        assert_eq!(deck.outbox.len(), 1);
        assert_eq!(deck.outbox[0].affected_users, vec![5]);
    }

    #[test]
    fn changing_quest_xp_drops_cached_totals() {
        let mut deck = DeckData::new(DeckSettings::default());
        deck.insert_user(Profile::student(5, "s"));
        let qid = deck.insert_quest(Quest::new("Worth more now", 5)).unwrap();
        let sid = deck.allocate_id();
        let mut s = Submission::new(sid, qid, 5, 1, None, Utc::now());
        s.is_completed = true;
        s.is_approved = true;
        deck.submissions.insert(sid, s);
        assert_eq!(crate::ledger::refresh_xp(&mut deck, 5), 5);
        deck.take_pending_tasks();

        let mut q = deck.quest(qid).unwrap().clone();
        q.xp = 500;
        deck.update_quest(q).unwrap();

        assert_eq!(deck.user(5).unwrap().xp_cached, None);
        assert_eq!(crate::ledger::xp(&deck, 5), 500);
        let tasks: Vec<Task> = deck.take_pending_tasks().into_iter().map(|j| j.task).collect();
        assert!(tasks.contains(&Task::RefreshAvailability { user_id: 5 }));
    }

    #[test]
    fn renaming_a_quest_keeps_cached_totals() {
        let mut deck = DeckData::new(DeckSettings::default());
        deck.insert_user(Profile::student(5, "s"));
        let qid = deck.insert_quest(Quest::new("Old name", 5)).unwrap();
        let sid = deck.allocate_id();
        deck.submissions.insert(sid, Submission::new(sid, qid, 5, 1, None, Utc::now()));
        crate::ledger::refresh_xp(&mut deck, 5);
        let mut q = deck.quest(qid).unwrap().clone();
        q.name = "New name".into();
        deck.update_quest(q).unwrap();
        assert_eq!(deck.user(5).unwrap().xp_cached, Some(0));
    }

    #[test]
    fn catalogue_seeds_prereqs() {
        let cfg = parse_config(
            r#"
            [[catalogue.quests]]
            id = 1
            name = "First"
            [[catalogue.quests]]
            id = 2
            name = "Second"
            [[catalogue.prereqs]]
            parent = "quest:2"
            main = "quest:1"
        "#,
        )
        .unwrap();
        let deck = DeckData::from_catalogue(cfg.settings, &cfg.catalogue).unwrap();
        assert_eq!(deck.prereqs.len(), 1);
        assert!(deck.pending_tasks.is_empty());
    }

    #[test]
    fn bad_seed_reference_is_an_authoring_error() {
        let cfg = parse_config(
            r#"
            [[catalogue.prereqs]]
            parent = "quest:2"
            main = "nothing"
        "#,
        )
        .unwrap();
        let err = DeckData::from_catalogue(cfg.settings, &cfg.catalogue).unwrap_err();
        assert_eq!(err.code(), "prereq_authoring");
    }
}

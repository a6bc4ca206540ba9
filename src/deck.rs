//! Shared deck state and the async entry points the HTTP layer calls.
//!
//! The deck is one `DeckData` behind a tokio `RwLock`. Every write operation
//! runs the synchronous engine function under the write lock, so a transition
//! and its side effects (cache invalidation, XP refresh, notifications, task
//! records) commit together. Tasks recorded during the operation are handed
//! to the worker queue only after the lock is released; if the queue refuses
//! them they run inline.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::availability::{self, QuestLists};
use crate::badges::{self, BadgeAssertion};
use crate::clock::Clock;
use crate::config::{DeckConfig, EngineTuning};
use crate::domain::{
    AssertionId, AttachmentHandle, BadgeId, CampaignId, EntityKind, EntityRef, MapId, PrereqId, Quest, QuestId,
    Question, QuestionId, SubmissionId, SubmissionState, UserId,
};
use crate::error::{EngineError, Result};
use crate::ledger::{self, XpSummary};
use crate::library::{self, CampaignRecord, ImportOptions, ImportReport, QuestRecord};
use crate::maps::{self, QuestMap};
use crate::notify::{Notification, Target, Verb};
use crate::prereq::{self, PrereqRelation};
use crate::store::DeckData;
use crate::submissions::{self, ApprovalOutcome, CompleteInput, DraftInput, ReviewInput};
use crate::tasks::{self, FailedTask, Job, Task, TaskQueue, TaskReceiver};

/// Jobs run inline in one go when the queue is unavailable, follow-ups included.
const INLINE_TASK_LIMIT: usize = 256;

/// Kinds the availability cache keeps per user.
const CACHED_KINDS: [EntityKind; 2] = [EntityKind::Quest, EntityKind::Badge];

pub struct Deck {
    data: RwLock<DeckData>,
    tuning: EngineTuning,
    clock: Arc<dyn Clock>,
    queue: TaskQueue,
}

impl std::fmt::Debug for Deck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deck").field("tuning", &self.tuning).finish_non_exhaustive()
    }
}

/// A prerequisite record together with its readable form.
#[derive(Clone, Debug, serde::Serialize)]
pub struct PrereqView {
    #[serde(flatten)]
    pub relation: PrereqRelation,
    pub text: String,
}

impl Deck {
    /// Build the deck from configuration, including its seed catalogue.
    #[instrument(level = "info", skip_all)]
    pub fn new(config: &DeckConfig, clock: Arc<dyn Clock>) -> Result<(Arc<Self>, TaskReceiver)> {
        let data = DeckData::from_catalogue(config.settings.clone(), &config.catalogue)?;
        Ok(Self::with_data(data, config.engine.clone(), clock))
    }

    pub fn with_data(data: DeckData, tuning: EngineTuning, clock: Arc<dyn Clock>) -> (Arc<Self>, TaskReceiver) {
        let (queue, rx) = TaskQueue::channel(tuning.queue_capacity);
        let deck = Arc::new(Self { data: RwLock::new(data), tuning, clock, queue });
        (deck, rx)
    }

    pub fn start_workers(self: &Arc<Self>, rx: TaskReceiver) -> Vec<JoinHandle<()>> {
        tasks::spawn_workers(rx, Arc::clone(self), &self.tuning)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn tuning(&self) -> &EngineTuning {
        &self.tuning
    }

    /// Run `f` against a read-locked deck.
    pub async fn read<R>(&self, f: impl FnOnce(&DeckData) -> R) -> R {
        let data = self.data.read().await;
        f(&data)
    }

    /// Run one write operation, then hand off the tasks it recorded.
    pub async fn transact<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut DeckData, DateTime<Utc>) -> Result<R> + Send,
        R: Send,
    {
        let now = self.clock.now();
        let (result, jobs) = {
            let mut data = self.data.write().await;
            let result = f(&mut data, now);
            (result, data.take_pending_tasks())
        };
        self.dispatch(jobs).await;
        result
    }

    async fn dispatch(&self, jobs: Vec<Job>) {
        let mut inline = Vec::new();
        for job in jobs {
            if let Err((job, e)) = self.queue.submit(job) {
                warn!(target: "tasks", task = job.task.name(), error = %e, "Queue refused task; running inline");
                inline.push(job);
            }
        }
        if !inline.is_empty() {
            self.run_inline(inline).await;
        }
    }

    async fn run_inline(&self, jobs: Vec<Job>) {
        let mut pending: VecDeque<Job> = jobs.into();
        let mut ran = 0;
        while let Some(job) = pending.pop_front() {
            if ran == INLINE_TASK_LIMIT {
                warn!(target: "tasks", dropped = pending.len() + 1, "Inline task limit reached");
                return;
            }
            ran += 1;
            let now = self.clock.now();
            let mut data = self.data.write().await;
            match execute_task(&mut data, &job.task, now, &self.tuning) {
                Ok(Some(due)) => self.schedule_deferred(due, now),
                Ok(None) => {}
                Err(e) => record_failure(&mut data, job, e, now),
            }
            pending.extend(data.take_pending_tasks());
        }
    }

    /// Entry point for workers.
    pub async fn run_task(&self, task: &Task) -> Result<()> {
        let now = self.clock.now();
        let (result, jobs) = {
            let mut data = self.data.write().await;
            let result = execute_task(&mut data, task, now, &self.tuning);
            (result, data.take_pending_tasks())
        };
        self.dispatch(jobs).await;
        if let Some(due) = result? {
            self.schedule_deferred(due, now);
        }
        Ok(())
    }

    /// Queue the single deferred refresh once the bunching window closes.
    fn schedule_deferred(&self, due: DateTime<Utc>, now: DateTime<Utc>) {
        let delay = (due - now).to_std().unwrap_or_default();
        let queue = self.queue.clone();
        debug!(target: "cache", delay_ms = delay.as_millis() as u64, "Deferred availability refresh scheduled");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err((_, e)) = queue.submit(Job::new(Task::RefreshDeferred, None)) {
                warn!(target: "cache", error = %e, "Deferred availability refresh could not be queued");
            }
        });
    }

    pub async fn record_failed_task(&self, job: Job, error: EngineError) {
        let now = self.clock.now();
        let mut data = self.data.write().await;
        record_failure(&mut data, job, error, now);
    }

    pub async fn failed_tasks(&self) -> Vec<FailedTask> {
        self.read(|d| d.failed_tasks.clone()).await
    }

    // ---- availability (read path) ----

    /// Cached set of met ids for (user, kind). A miss computes synchronously,
    /// stores the result and asks the workers to refresh the rest of the user.
    async fn met_ids(&self, user: UserId, kind: EntityKind) -> Result<BTreeSet<u64>> {
        {
            let data = self.data.read().await;
            data.user(user)?;
            match data.availability.get(user, kind) {
                Ok(entry) => return Ok(entry.ids.clone()),
                Err(EngineError::CacheMiss(_)) => {}
                Err(e) => return Err(e),
            }
        }
        let now = self.clock.now();
        let mut data = self.data.write().await;
        let ids = availability::conditions_met_ids(&data, user, kind);
        data.availability.put(user, kind, ids.clone(), now);
        drop(data);
        if let Err((_, e)) = self.queue.submit(Job::new(Task::RefreshAvailability { user_id: user }, None)) {
            debug!(target: "cache", user_id = user, error = %e, "Refresh after cache miss not queued");
        }
        Ok(ids)
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn quest_lists(&self, user: UserId) -> Result<QuestLists> {
        let met = self.met_ids(user, EntityKind::Quest).await?;
        let now = self.clock.now();
        Ok(self.read(|d| availability::quest_lists(d, user, &met, now, true)).await)
    }

    pub async fn available_quests(&self, user: UserId) -> Result<Vec<QuestId>> {
        Ok(self.quest_lists(user).await?.available)
    }

    /// Active badges whose prerequisites the user currently meets.
    pub async fn available_badges(&self, user: UserId) -> Result<Vec<BadgeId>> {
        let met = self.met_ids(user, EntityKind::Badge).await?;
        Ok(met.into_iter().collect())
    }

    pub async fn drafts(&self, user: UserId) -> Result<Vec<QuestId>> {
        self.read(|d| {
            d.user(user)?;
            Ok(availability::drafts(d, user))
        })
        .await
    }

    pub async fn approval_queue(&self, reviewer: UserId) -> Result<Vec<SubmissionId>> {
        self.read(|d| availability::approval_queue(d, reviewer)).await
    }

    pub async fn hide_quest(&self, user: UserId, quest: QuestId) -> Result<()> {
        self.transact(|d, _| availability::hide_quest(d, user, quest)).await
    }

    pub async fn unhide_quest(&self, user: UserId, quest: QuestId) -> Result<()> {
        self.transact(|d, _| availability::unhide_quest(d, user, quest)).await
    }

    // ---- submissions ----

    pub async fn submission(&self, id: SubmissionId) -> Result<crate::domain::Submission> {
        self.read(|d| d.submission(id).cloned()).await
    }

    pub async fn start(&self, user: UserId, quest: QuestId) -> Result<SubmissionId> {
        self.transact(|d, now| submissions::start(d, user, quest, now)).await
    }

    pub async fn save_draft(&self, user: UserId, id: SubmissionId, input: DraftInput) -> Result<()> {
        self.transact(|d, now| submissions::save_draft(d, user, id, input, now)).await
    }

    pub async fn complete(&self, user: UserId, id: SubmissionId, input: CompleteInput) -> Result<SubmissionState> {
        self.transact(|d, now| submissions::complete(d, user, id, input, now)).await
    }

    pub async fn drop_submission(&self, user: UserId, id: SubmissionId) -> Result<()> {
        self.transact(|d, _| submissions::drop_submission(d, user, id).map(|_| ())).await
    }

    pub async fn approve(&self, reviewer: UserId, id: SubmissionId, input: ReviewInput) -> Result<ApprovalOutcome> {
        self.transact(|d, now| submissions::approve(d, reviewer, id, input, now)).await
    }

    pub async fn return_submission(&self, reviewer: UserId, id: SubmissionId, input: ReviewInput) -> Result<()> {
        self.transact(|d, now| submissions::return_submission(d, reviewer, id, input, now)).await
    }

    pub async fn skip(&self, reviewer: UserId, id: SubmissionId) -> Result<ApprovalOutcome> {
        self.transact(|d, now| submissions::skip(d, reviewer, id, now)).await
    }

    pub async fn comment(
        &self,
        author: UserId,
        id: SubmissionId,
        text: String,
        attachments: Vec<AttachmentHandle>,
    ) -> Result<()> {
        self.transact(|d, now| submissions::comment(d, author, id, text, attachments, now)).await
    }

    pub async fn flag(&self, reviewer: UserId, id: SubmissionId) -> Result<()> {
        self.transact(|d, now| submissions::flag(d, reviewer, id, now)).await
    }

    pub async fn unflag(&self, reviewer: UserId, id: SubmissionId) -> Result<()> {
        self.transact(|d, now| submissions::unflag(d, reviewer, id, now)).await
    }

    pub async fn previous_submission(&self, user: UserId, quest: QuestId, ordinal: u32) -> Result<Option<SubmissionId>> {
        self.transact(|d, _| submissions::get_previous(d, user, quest, ordinal)).await
    }

    // ---- ledger ----

    pub async fn xp_summary(&self, user: UserId) -> Result<XpSummary> {
        self.transact(|d, _| {
            d.user(user)?;
            ledger::refresh_xp(d, user);
            Ok(ledger::summary(d, user))
        })
        .await
    }

    // ---- catalogue authoring (staff) ----

    pub async fn create_quest(&self, actor: UserId, quest: Quest) -> Result<QuestId> {
        self.transact(|d, _| {
            ensure_staff(d, actor)?;
            d.insert_quest(quest)
        })
        .await
    }

    /// Staff edit any quest; a quest's editor may edit it while it is an
    /// unpublished draft, without publishing it or handing it on.
    pub async fn update_quest(&self, actor: UserId, quest: Quest) -> Result<()> {
        self.transact(|d, _| {
            ensure_quest_editor(d, actor, &quest)?;
            d.update_quest(quest)
        })
        .await
    }

    pub async fn delete_quest(&self, actor: UserId, id: QuestId) -> Result<()> {
        self.transact(|d, _| {
            ensure_staff(d, actor)?;
            d.delete_quest(id).map(|_| ())
        })
        .await
    }

    /// Questions of a quest; students do not see the marker-only fields.
    pub async fn questions_of(&self, viewer: UserId, quest: QuestId) -> Result<Vec<Question>> {
        self.read(|d| {
            d.quest(quest)?;
            let staff = d.user(viewer)?.is_staff;
            Ok(d
                .questions_for(quest)
                .into_iter()
                .cloned()
                .map(|q| if staff { q } else { q.for_student() })
                .collect())
        })
        .await
    }

    pub async fn add_question(&self, actor: UserId, quest: QuestId, question: Question) -> Result<QuestionId> {
        self.transact(|d, _| {
            ensure_staff(d, actor)?;
            d.add_question(quest, question)
        })
        .await
    }

    pub async fn delete_question(&self, actor: UserId, id: QuestionId) -> Result<()> {
        self.transact(|d, _| {
            ensure_staff(d, actor)?;
            d.delete_question(id).map(|_| ())
        })
        .await
    }

    pub async fn add_prereq(&self, actor: UserId, relation: PrereqRelation) -> Result<PrereqId> {
        self.transact(|d, _| {
            ensure_staff(d, actor)?;
            prereq::add_relation(d, relation)
        })
        .await
    }

    pub async fn remove_prereq(&self, actor: UserId, id: PrereqId) -> Result<()> {
        self.transact(|d, _| {
            ensure_staff(d, actor)?;
            prereq::remove_relation(d, id).map(|_| ())
        })
        .await
    }

    pub async fn clear_prereqs(&self, actor: UserId, parent: EntityRef) -> Result<usize> {
        self.transact(|d, _| {
            ensure_staff(d, actor)?;
            Ok(prereq::clear_all_prereqs(d, parent))
        })
        .await
    }

    pub async fn prereqs_of(&self, parent: EntityRef) -> Vec<PrereqView> {
        self.read(|d| {
            prereq::prereqs_of(d, parent)
                .into_iter()
                .map(|r| PrereqView { relation: r.clone(), text: prereq::display(d, r) })
                .collect()
        })
        .await
    }

    pub async fn reliant_objects(&self, entity: EntityRef, active_only: bool) -> Vec<EntityRef> {
        let now = self.clock.now();
        self.read(|d| prereq::reliant_objects(d, entity, active_only, d.local_now(now))).await
    }

    // ---- badges ----

    pub async fn grant_badge(&self, actor: UserId, badge: BadgeId, user: UserId, do_not_grant_xp: bool) -> Result<AssertionId> {
        self.transact(|d, now| {
            ensure_staff(d, actor)?;
            let id = badges::grant(d, badge, user, actor, do_not_grant_xp, now)?;
            // A grant can satisfy other badges' prerequisites.
            d.enqueue(Task::BadgeSweep { user_id: user }, Some(actor));
            Ok(id)
        })
        .await
    }

    pub async fn revoke_badge(&self, actor: UserId, assertion: AssertionId) -> Result<BadgeAssertion> {
        self.transact(|d, now| {
            ensure_staff(d, actor)?;
            badges::revoke(d, assertion, actor, now)
        })
        .await
    }

    // ---- maps ----

    pub async fn create_map(&self, actor: UserId, name: String, seed: EntityRef) -> Result<MapId> {
        let label_len = self.tuning.map_label_max_len;
        self.transact(|d, now| {
            ensure_staff(d, actor)?;
            let id = maps::create_map(d, name, seed, None)?;
            for child in maps::regenerate(d, id, Some(actor), now, label_len)? {
                d.enqueue(Task::RegenerateMap { map_id: child }, Some(actor));
            }
            Ok(id)
        })
        .await
    }

    pub async fn map(&self, id: MapId) -> Result<QuestMap> {
        self.read(|d| d.map(id).cloned()).await
    }

    pub async fn primary_map(&self) -> Result<QuestMap> {
        self.read(|d| {
            maps::primary_map(d)
                .and_then(|id| d.maps.get(&id).cloned())
                .ok_or_else(|| EngineError::not_found("Primary map"))
        })
        .await
    }

    pub async fn regenerate_map(&self, actor: UserId, id: MapId) -> Result<QuestMap> {
        let label_len = self.tuning.map_label_max_len;
        self.transact(|d, now| {
            ensure_staff(d, actor)?;
            for child in maps::regenerate(d, id, Some(actor), now, label_len)? {
                d.enqueue(Task::RegenerateMap { map_id: child }, Some(actor));
            }
            d.map(id).cloned()
        })
        .await
    }

    /// Queue a rebuild of every map; the requester hears about deleted ones.
    pub async fn regenerate_all_maps(&self, actor: UserId) -> Result<()> {
        self.transact(|d, _| {
            ensure_staff(d, actor)?;
            d.enqueue(Task::RegenerateAllMaps { requesting_user: Some(actor) }, Some(actor));
            Ok(())
        })
        .await
    }

    pub async fn delete_map(&self, actor: UserId, id: MapId) -> Result<()> {
        self.transact(|d, _| {
            ensure_staff(d, actor)?;
            maps::delete_map(d, id).map(|_| ())
        })
        .await
    }

    pub async fn set_primary_map(&self, actor: UserId, id: MapId) -> Result<()> {
        self.transact(|d, _| {
            ensure_staff(d, actor)?;
            maps::set_primary(d, id)
        })
        .await
    }

    // ---- library ----

    pub async fn export_quest(&self, actor: UserId, id: QuestId) -> Result<QuestRecord> {
        self.read(|d| {
            ensure_staff(d, actor)?;
            library::export_quest(d, id)
        })
        .await
    }

    pub async fn export_campaign(&self, actor: UserId, id: CampaignId, exclude: BTreeSet<Uuid>) -> Result<CampaignRecord> {
        self.read(|d| {
            ensure_staff(d, actor)?;
            library::export_campaign(d, id, &exclude)
        })
        .await
    }

    pub async fn import_quests(&self, actor: UserId, rows: Vec<QuestRecord>, opts: ImportOptions) -> Result<ImportReport> {
        self.transact(|d, _| {
            ensure_staff(d, actor)?;
            library::import_quests(d, &rows, &opts)
        })
        .await
    }

    pub async fn import_campaign(&self, actor: UserId, record: CampaignRecord, opts: ImportOptions) -> Result<ImportReport> {
        self.transact(|d, _| {
            ensure_staff(d, actor)?;
            library::import_campaign(d, &record, &opts)
        })
        .await
    }

    // ---- notifications ----

    pub async fn notifications_for(&self, user: UserId) -> Vec<Notification> {
        self.read(|d| d.outbox.iter().filter(|n| n.concerns(user)).cloned().collect()).await
    }
}

pub(crate) fn ensure_staff(deck: &DeckData, actor: UserId) -> Result<()> {
    if deck.user(actor)?.is_staff {
        Ok(())
    } else {
        Err(EngineError::PermissionDenied(format!("user {actor} is not staff")))
    }
}

fn ensure_quest_editor(deck: &DeckData, actor: UserId, update: &Quest) -> Result<()> {
    if deck.user(actor)?.is_staff {
        return Ok(());
    }
    let current = deck.quest(update.id)?;
    let own_draft = current.editor == Some(actor) && !current.visible_to_students;
    if own_draft && !update.visible_to_students && update.editor == Some(actor) {
        Ok(())
    } else {
        Err(EngineError::PermissionDenied(format!("user {actor} cannot edit quest {}", update.id)))
    }
}

fn refresh_user(deck: &mut DeckData, user: UserId, kinds: &[EntityKind], now: DateTime<Utc>) {
    for &kind in kinds {
        let ids = availability::conditions_met_ids(deck, user, kind);
        deck.availability.put(user, kind, ids, now);
    }
}

fn record_failure(deck: &mut DeckData, job: Job, error: EngineError, now: DateTime<Utc>) {
    let name = job.task.name().to_string();
    if let Some(user) = job.originator {
        let actor = deck.settings.deck_ai;
        deck.notify(Notification::new(actor, Verb::TaskFailed, Target::Task(name), vec![user], now));
    }
    deck.failed_tasks.push(FailedTask {
        task: job.task,
        originator: job.originator,
        attempts: job.attempts,
        error: error.to_string(),
        failed_at: now,
    });
}

/// Run one background task against the deck. Returns when a deferred
/// availability rerun is due, if one should be scheduled.
pub fn execute_task(
    deck: &mut DeckData,
    task: &Task,
    now: DateTime<Utc>,
    tuning: &EngineTuning,
) -> Result<Option<DateTime<Utc>>> {
    match task {
        Task::RefreshAvailability { user_id } => {
            deck.user(*user_id)?;
            refresh_user(deck, *user_id, &CACHED_KINDS, now);
            Ok(None)
        }
        Task::RefreshAvailabilityAllUsers { kind } => {
            let kinds: Vec<EntityKind> = CACHED_KINDS.iter().copied().filter(|k| k == kind).collect();
            if kinds.is_empty() {
                return Ok(None);
            }
            let window = tuning.bunching_window();
            let mut due: Option<DateTime<Utc>> = None;
            let mut ran = 0;
            for user in deck.student_ids() {
                match deck.availability.bulk_gate(user, now, window) {
                    crate::avail_cache::BulkGate::Run => {
                        refresh_user(deck, user, &kinds, now);
                        ran += 1;
                    }
                    crate::avail_cache::BulkGate::Coalesced { due: d } => {
                        due = Some(due.map_or(d, |cur| cur.max(d)));
                    }
                }
            }
            info!(target: "cache", %kind, refreshed = ran, coalesced = due.is_some(), "Deck-wide availability refresh");
            match due {
                Some(d) if deck.availability.schedule_rerun() => Ok(Some(d)),
                _ => Ok(None),
            }
        }
        Task::RefreshDeferred => {
            let users = deck.availability.take_deferred();
            for &user in &users {
                refresh_user(deck, user, &CACHED_KINDS, now);
            }
            info!(target: "cache", users = users.len(), "Deferred availability refresh ran");
            Ok(None)
        }
        Task::RegenerateMap { map_id } => {
            for child in maps::regenerate(deck, *map_id, None, now, tuning.map_label_max_len)? {
                deck.enqueue(Task::RegenerateMap { map_id: child }, None);
            }
            Ok(None)
        }
        Task::RegenerateAllMaps { requesting_user } => {
            let report = maps::regenerate_all(deck, *requesting_user, now, tuning.map_label_max_len);
            info!(
                target: "maps",
                regenerated = report.regenerated.len(),
                deleted = report.deleted.len(),
                "All maps regenerated"
            );
            Ok(None)
        }
        Task::BadgeSweep { user_id } => {
            deck.user(*user_id)?;
            if !badges::sweep(deck, *user_id, now).is_empty() {
                ledger::refresh_xp(deck, *user_id);
            }
            Ok(None)
        }
        Task::RemoveSubmissionsForHiddenQuest { quest_id } => {
            deck.remove_submissions_for_hidden_quest(*quest_id, now);
            Ok(None)
        }
    }
}

//! HTTP endpoint handlers. These are thin wrappers that forward to the deck.
//! The caller is identified by the `x-user-id` header set by the auth proxy in
//! front of us. Each handler is instrumented and logs basic result info.

use std::sync::Arc;
use axum::{
  extract::{Path, Query, State},
  http::HeaderMap,
  response::IntoResponse,
  Json,
};
use tracing::{info, instrument};

use crate::deck::{ensure_staff, Deck};
use crate::domain::{EntityRef, Quest, Question, UserId};
use crate::error::{EngineError, Result};
use crate::protocol::*;
use crate::submissions::{CompleteInput, DraftInput, ReviewInput};
use crate::util::trunc_for_log;

pub const USER_HEADER: &str = "x-user-id";

fn caller(headers: &HeaderMap) -> Result<UserId> {
  headers
    .get(USER_HEADER)
    .and_then(|v| v.to_str().ok())
    .and_then(|s| s.trim().parse::<UserId>().ok())
    .ok_or_else(|| EngineError::PermissionDenied(format!("missing or invalid {USER_HEADER} header")))
}

fn entity(path: &KindPath) -> Result<EntityRef> {
  path.entity().ok_or_else(|| EngineError::InvalidInput(format!("unknown entity kind {:?}", path.kind)))
}

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse { Json(HealthOut { ok: true }) }

// ---- student views ----

#[instrument(level = "info", skip_all)]
pub async fn http_my_quests(State(deck): State<Arc<Deck>>, headers: HeaderMap) -> Result<impl IntoResponse> {
  let user = caller(&headers)?;
  let lists = deck.quest_lists(user).await?;
  info!(target: "quest", user_id = user, available = lists.available.len(), in_progress = lists.in_progress.len(), "HTTP quest lists served");
  Ok(Json(lists))
}

#[instrument(level = "info", skip_all)]
pub async fn http_my_available_quests(State(deck): State<Arc<Deck>>, headers: HeaderMap) -> Result<impl IntoResponse> {
  let user = caller(&headers)?;
  Ok(Json(IdsOut { ids: deck.available_quests(user).await? }))
}

#[instrument(level = "info", skip_all)]
pub async fn http_my_drafts(State(deck): State<Arc<Deck>>, headers: HeaderMap) -> Result<impl IntoResponse> {
  let user = caller(&headers)?;
  Ok(Json(IdsOut { ids: deck.drafts(user).await? }))
}

#[instrument(level = "info", skip_all)]
pub async fn http_my_available_badges(State(deck): State<Arc<Deck>>, headers: HeaderMap) -> Result<impl IntoResponse> {
  let user = caller(&headers)?;
  Ok(Json(IdsOut { ids: deck.available_badges(user).await? }))
}

#[instrument(level = "info", skip_all)]
pub async fn http_my_xp(State(deck): State<Arc<Deck>>, headers: HeaderMap) -> Result<impl IntoResponse> {
  let user = caller(&headers)?;
  let summary = deck.xp_summary(user).await?;
  info!(target: "quest", user_id = user, xp = summary.xp, rank = %summary.rank.name, "HTTP XP served");
  Ok(Json(summary))
}

#[instrument(level = "info", skip_all)]
pub async fn http_my_notifications(State(deck): State<Arc<Deck>>, headers: HeaderMap) -> Result<impl IntoResponse> {
  let user = caller(&headers)?;
  Ok(Json(deck.notifications_for(user).await))
}

#[instrument(level = "info", skip(deck, headers))]
pub async fn http_hide_quest(State(deck): State<Arc<Deck>>, headers: HeaderMap, Path(id): Path<u64>) -> Result<impl IntoResponse> {
  let user = caller(&headers)?;
  deck.hide_quest(user, id).await?;
  Ok(Json(AcceptedOut { accepted: true }))
}

#[instrument(level = "info", skip(deck, headers))]
pub async fn http_unhide_quest(State(deck): State<Arc<Deck>>, headers: HeaderMap, Path(id): Path<u64>) -> Result<impl IntoResponse> {
  let user = caller(&headers)?;
  deck.unhide_quest(user, id).await?;
  Ok(Json(AcceptedOut { accepted: true }))
}

// ---- catalogue authoring ----

#[instrument(level = "info", skip(deck, headers, quest), fields(name = %quest.name))]
pub async fn http_create_quest(State(deck): State<Arc<Deck>>, headers: HeaderMap, Json(quest): Json<Quest>) -> Result<impl IntoResponse> {
  let actor = caller(&headers)?;
  let id = deck.create_quest(actor, quest).await?;
  Ok(Json(CreatedOut { id }))
}

#[instrument(level = "info", skip(deck, headers, quest))]
pub async fn http_update_quest(
  State(deck): State<Arc<Deck>>,
  headers: HeaderMap,
  Path(id): Path<u64>,
  Json(mut quest): Json<Quest>,
) -> Result<impl IntoResponse> {
  let actor = caller(&headers)?;
  quest.id = id;
  deck.update_quest(actor, quest).await?;
  Ok(Json(AcceptedOut { accepted: true }))
}

#[instrument(level = "info", skip(deck, headers))]
pub async fn http_delete_quest(State(deck): State<Arc<Deck>>, headers: HeaderMap, Path(id): Path<u64>) -> Result<impl IntoResponse> {
  let actor = caller(&headers)?;
  deck.delete_quest(actor, id).await?;
  Ok(Json(AcceptedOut { accepted: true }))
}

#[instrument(level = "info", skip(deck, headers))]
pub async fn http_questions(State(deck): State<Arc<Deck>>, headers: HeaderMap, Path(id): Path<u64>) -> Result<impl IntoResponse> {
  let viewer = caller(&headers)?;
  Ok(Json(deck.questions_of(viewer, id).await?))
}

#[instrument(level = "info", skip(deck, headers, body), fields(instructions = %trunc_for_log(&body.instructions, 40)))]
pub async fn http_add_question(
  State(deck): State<Arc<Deck>>,
  headers: HeaderMap,
  Path(id): Path<u64>,
  Json(body): Json<Question>,
) -> Result<impl IntoResponse> {
  let actor = caller(&headers)?;
  let question_id = deck.add_question(actor, id, body).await?;
  Ok(Json(CreatedOut { id: question_id }))
}

#[instrument(level = "info", skip(deck, headers))]
pub async fn http_delete_question(State(deck): State<Arc<Deck>>, headers: HeaderMap, Path(id): Path<u64>) -> Result<impl IntoResponse> {
  let actor = caller(&headers)?;
  deck.delete_question(actor, id).await?;
  Ok(Json(AcceptedOut { accepted: true }))
}

// ---- submissions ----

#[instrument(level = "info", skip(deck, headers), fields(quest_id = body.quest_id))]
pub async fn http_start(State(deck): State<Arc<Deck>>, headers: HeaderMap, Json(body): Json<StartIn>) -> Result<impl IntoResponse> {
  let user = caller(&headers)?;
  let submission_id = deck.start(user, body.quest_id).await?;
  info!(target: "quest", user_id = user, quest_id = body.quest_id, submission_id, "HTTP start");
  Ok(Json(StartOut { submission_id }))
}

#[instrument(level = "info", skip(deck, headers))]
pub async fn http_get_submission(State(deck): State<Arc<Deck>>, headers: HeaderMap, Path(id): Path<u64>) -> Result<impl IntoResponse> {
  let user = caller(&headers)?;
  let out = deck
    .read(|d| {
      let s = d.submission(id)?;
      if s.user_id != user && !d.user(user)?.can_review() {
        return Err(EngineError::PermissionDenied(format!("submission {id} belongs to someone else")));
      }
      Ok(SubmissionOut::new(s, d.quest_label(s)))
    })
    .await?;
  Ok(Json(out))
}

#[instrument(level = "info", skip(deck, headers, body), fields(text = %trunc_for_log(&body.text, 40)))]
pub async fn http_save_draft(
  State(deck): State<Arc<Deck>>,
  headers: HeaderMap,
  Path(id): Path<u64>,
  Json(body): Json<DraftInput>,
) -> Result<impl IntoResponse> {
  let user = caller(&headers)?;
  deck.save_draft(user, id, body).await?;
  Ok(Json(AcceptedOut { accepted: true }))
}

#[instrument(level = "info", skip(deck, headers, body))]
pub async fn http_complete(
  State(deck): State<Arc<Deck>>,
  headers: HeaderMap,
  Path(id): Path<u64>,
  Json(body): Json<CompleteInput>,
) -> Result<impl IntoResponse> {
  let user = caller(&headers)?;
  let state = deck.complete(user, id, body).await?;
  info!(target: "quest", user_id = user, submission_id = id, ?state, "HTTP complete");
  Ok(Json(StateOut { submission_id: id, state }))
}

#[instrument(level = "info", skip(deck, headers))]
pub async fn http_drop(State(deck): State<Arc<Deck>>, headers: HeaderMap, Path(id): Path<u64>) -> Result<impl IntoResponse> {
  let user = caller(&headers)?;
  deck.drop_submission(user, id).await?;
  Ok(Json(AcceptedOut { accepted: true }))
}

#[instrument(level = "info", skip(deck, headers, body))]
pub async fn http_approve(
  State(deck): State<Arc<Deck>>,
  headers: HeaderMap,
  Path(id): Path<u64>,
  Json(body): Json<ReviewInput>,
) -> Result<impl IntoResponse> {
  let reviewer = caller(&headers)?;
  let outcome = deck.approve(reviewer, id, body).await?;
  info!(target: "quest", submission_id = id, xp_after = outcome.xp_after, badges = outcome.badges_granted.len(), "HTTP approve");
  Ok(Json(outcome))
}

#[instrument(level = "info", skip(deck, headers, body))]
pub async fn http_return(
  State(deck): State<Arc<Deck>>,
  headers: HeaderMap,
  Path(id): Path<u64>,
  Json(body): Json<ReviewInput>,
) -> Result<impl IntoResponse> {
  let reviewer = caller(&headers)?;
  deck.return_submission(reviewer, id, body).await?;
  Ok(Json(AcceptedOut { accepted: true }))
}

#[instrument(level = "info", skip(deck, headers))]
pub async fn http_skip(State(deck): State<Arc<Deck>>, headers: HeaderMap, Path(id): Path<u64>) -> Result<impl IntoResponse> {
  let reviewer = caller(&headers)?;
  Ok(Json(deck.skip(reviewer, id).await?))
}

#[instrument(level = "info", skip(deck, headers, body), fields(text = %trunc_for_log(&body.text, 40)))]
pub async fn http_comment(
  State(deck): State<Arc<Deck>>,
  headers: HeaderMap,
  Path(id): Path<u64>,
  Json(body): Json<CommentIn>,
) -> Result<impl IntoResponse> {
  let author = caller(&headers)?;
  deck.comment(author, id, body.text, body.attachments).await?;
  Ok(Json(AcceptedOut { accepted: true }))
}

#[instrument(level = "info", skip(deck, headers))]
pub async fn http_flag(State(deck): State<Arc<Deck>>, headers: HeaderMap, Path(id): Path<u64>) -> Result<impl IntoResponse> {
  let reviewer = caller(&headers)?;
  deck.flag(reviewer, id).await?;
  Ok(Json(AcceptedOut { accepted: true }))
}

#[instrument(level = "info", skip(deck, headers))]
pub async fn http_unflag(State(deck): State<Arc<Deck>>, headers: HeaderMap, Path(id): Path<u64>) -> Result<impl IntoResponse> {
  let reviewer = caller(&headers)?;
  deck.unflag(reviewer, id).await?;
  Ok(Json(AcceptedOut { accepted: true }))
}

#[instrument(level = "info", skip(deck, headers))]
pub async fn http_previous_submission(
  State(deck): State<Arc<Deck>>,
  headers: HeaderMap,
  Query(q): Query<PreviousQuery>,
) -> Result<impl IntoResponse> {
  let user = caller(&headers)?;
  let previous = deck.previous_submission(user, q.quest_id, q.ordinal).await?;
  Ok(Json(PreviousOut { previous }))
}

#[instrument(level = "info", skip_all)]
pub async fn http_approval_queue(State(deck): State<Arc<Deck>>, headers: HeaderMap) -> Result<impl IntoResponse> {
  let reviewer = caller(&headers)?;
  Ok(Json(IdsOut { ids: deck.approval_queue(reviewer).await? }))
}

// ---- prerequisites ----

#[instrument(level = "info", skip(deck, headers, body), fields(parent = %body.parent, main = %body.main))]
pub async fn http_add_prereq(State(deck): State<Arc<Deck>>, headers: HeaderMap, Json(body): Json<PrereqIn>) -> Result<impl IntoResponse> {
  let actor = caller(&headers)?;
  let rel = body.into_relation().map_err(EngineError::PrereqAuthoring)?;
  let id = deck.add_prereq(actor, rel).await?;
  Ok(Json(CreatedOut { id }))
}

#[instrument(level = "info", skip(deck, headers))]
pub async fn http_remove_prereq(State(deck): State<Arc<Deck>>, headers: HeaderMap, Path(id): Path<u64>) -> Result<impl IntoResponse> {
  let actor = caller(&headers)?;
  deck.remove_prereq(actor, id).await?;
  Ok(Json(AcceptedOut { accepted: true }))
}

#[instrument(level = "info", skip(deck))]
pub async fn http_prereqs_of(State(deck): State<Arc<Deck>>, Path(path): Path<KindPath>) -> Result<impl IntoResponse> {
  let parent = entity(&path)?;
  Ok(Json(deck.prereqs_of(parent).await))
}

#[instrument(level = "info", skip(deck))]
pub async fn http_reliant(
  State(deck): State<Arc<Deck>>,
  Path(path): Path<KindPath>,
  Query(q): Query<ReliantQuery>,
) -> Result<impl IntoResponse> {
  let e = entity(&path)?;
  let reliant = deck.reliant_objects(e, q.active_only).await;
  Ok(Json(ReliantOut { entity: e, reliant }))
}

// ---- badges ----

#[instrument(level = "info", skip(deck, headers), fields(badge_id = body.badge_id, user_id = body.user_id))]
pub async fn http_grant_badge(State(deck): State<Arc<Deck>>, headers: HeaderMap, Json(body): Json<GrantIn>) -> Result<impl IntoResponse> {
  let actor = caller(&headers)?;
  let id = deck.grant_badge(actor, body.badge_id, body.user_id, body.do_not_grant_xp).await?;
  Ok(Json(CreatedOut { id }))
}

#[instrument(level = "info", skip(deck, headers))]
pub async fn http_revoke_badge(State(deck): State<Arc<Deck>>, headers: HeaderMap, Path(id): Path<u64>) -> Result<impl IntoResponse> {
  let actor = caller(&headers)?;
  Ok(Json(deck.revoke_badge(actor, id).await?))
}

// ---- maps ----

#[instrument(level = "info", skip(deck, headers), fields(seed = %body.seed))]
pub async fn http_create_map(State(deck): State<Arc<Deck>>, headers: HeaderMap, Json(body): Json<MapIn>) -> Result<impl IntoResponse> {
  let actor = caller(&headers)?;
  let seed = crate::config::parse_entity_ref(&body.seed)
    .ok_or_else(|| EngineError::InvalidInput(format!("bad seed {:?}", body.seed)))?;
  let id = deck.create_map(actor, body.name, seed).await?;
  Ok(Json(MapOut::new(&deck.map(id).await?)))
}

#[instrument(level = "info", skip(deck))]
pub async fn http_get_map(State(deck): State<Arc<Deck>>, Path(id): Path<u64>) -> Result<impl IntoResponse> {
  Ok(Json(MapOut::new(&deck.map(id).await?)))
}

#[instrument(level = "info", skip(deck))]
pub async fn http_primary_map(State(deck): State<Arc<Deck>>) -> Result<impl IntoResponse> {
  Ok(Json(MapOut::new(&deck.primary_map().await?)))
}

#[instrument(level = "info", skip(deck, headers))]
pub async fn http_regenerate_map(State(deck): State<Arc<Deck>>, headers: HeaderMap, Path(id): Path<u64>) -> Result<impl IntoResponse> {
  let actor = caller(&headers)?;
  let map = deck.regenerate_map(actor, id).await?;
  info!(target: "maps", map_id = id, "HTTP map regenerated");
  Ok(Json(MapOut::new(&map)))
}

#[instrument(level = "info", skip_all)]
pub async fn http_regenerate_all_maps(State(deck): State<Arc<Deck>>, headers: HeaderMap) -> Result<impl IntoResponse> {
  let actor = caller(&headers)?;
  deck.regenerate_all_maps(actor).await?;
  Ok(Json(AcceptedOut { accepted: true }))
}

#[instrument(level = "info", skip(deck, headers))]
pub async fn http_delete_map(State(deck): State<Arc<Deck>>, headers: HeaderMap, Path(id): Path<u64>) -> Result<impl IntoResponse> {
  let actor = caller(&headers)?;
  deck.delete_map(actor, id).await?;
  info!(target: "maps", map_id = id, "HTTP map deleted");
  Ok(Json(AcceptedOut { accepted: true }))
}

#[instrument(level = "info", skip(deck, headers))]
pub async fn http_set_primary_map(State(deck): State<Arc<Deck>>, headers: HeaderMap, Path(id): Path<u64>) -> Result<impl IntoResponse> {
  let actor = caller(&headers)?;
  deck.set_primary_map(actor, id).await?;
  Ok(Json(AcceptedOut { accepted: true }))
}

// ---- library ----

#[instrument(level = "info", skip(deck, headers))]
pub async fn http_export_quest(State(deck): State<Arc<Deck>>, headers: HeaderMap, Path(id): Path<u64>) -> Result<impl IntoResponse> {
  let actor = caller(&headers)?;
  Ok(Json(deck.export_quest(actor, id).await?))
}

#[instrument(level = "info", skip(deck, headers))]
pub async fn http_export_campaign(
  State(deck): State<Arc<Deck>>,
  headers: HeaderMap,
  Path(id): Path<u64>,
  Query(q): Query<ExportQuery>,
) -> Result<impl IntoResponse> {
  let actor = caller(&headers)?;
  let exclude = q.exclude_set().map_err(EngineError::InvalidInput)?;
  Ok(Json(deck.export_campaign(actor, id, exclude).await?))
}

#[instrument(level = "info", skip(deck, headers, body), fields(rows = body.rows.len()))]
pub async fn http_import_quests(State(deck): State<Arc<Deck>>, headers: HeaderMap, Json(body): Json<ImportQuestsIn>) -> Result<impl IntoResponse> {
  let actor = caller(&headers)?;
  Ok(Json(deck.import_quests(actor, body.rows, body.options).await?))
}

#[instrument(level = "info", skip(deck, headers, body), fields(import_id = %body.campaign.import_id))]
pub async fn http_import_campaign(
  State(deck): State<Arc<Deck>>,
  headers: HeaderMap,
  Json(body): Json<ImportCampaignIn>,
) -> Result<impl IntoResponse> {
  let actor = caller(&headers)?;
  Ok(Json(deck.import_campaign(actor, body.campaign, body.options).await?))
}

// ---- background tasks ----

#[instrument(level = "info", skip_all)]
pub async fn http_failed_tasks(State(deck): State<Arc<Deck>>, headers: HeaderMap) -> Result<impl IntoResponse> {
  let actor = caller(&headers)?;
  deck.read(|d| ensure_staff(d, actor)).await?;
  Ok(Json(deck.failed_tasks().await))
}

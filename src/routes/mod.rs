//! Router assembly: HTTP endpoints, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::deck::Deck;

pub mod http;

/// Build the application router with:
/// - REST-ish API under `/api/v1/...`; `/me/...` routes act for the caller
/// - CORS (allow any origin/method/headers); tighten for production if needed
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(deck: Arc<Deck>) -> Router {
    Router::new()
        .route("/api/v1/health", get(http::http_health))
        // Caller's own views
        .route("/api/v1/me/quests", get(http::http_my_quests))
        .route("/api/v1/me/quests/available", get(http::http_my_available_quests))
        .route("/api/v1/me/quests/drafts", get(http::http_my_drafts))
        .route("/api/v1/me/badges/available", get(http::http_my_available_badges))
        .route("/api/v1/me/xp", get(http::http_my_xp))
        .route("/api/v1/me/notifications", get(http::http_my_notifications))
        .route("/api/v1/me/previous-submission", get(http::http_previous_submission))
        // Catalogue
        .route("/api/v1/quests", post(http::http_create_quest))
        .route("/api/v1/quests/:id", put(http::http_update_quest).delete(http::http_delete_quest))
        .route("/api/v1/quests/:id/hide", post(http::http_hide_quest))
        .route("/api/v1/quests/:id/unhide", post(http::http_unhide_quest))
        .route("/api/v1/quests/:id/questions", get(http::http_questions).post(http::http_add_question))
        .route("/api/v1/questions/:id", delete(http::http_delete_question))
        // Submissions
        .route("/api/v1/submissions", post(http::http_start))
        .route("/api/v1/submissions/:id", get(http::http_get_submission))
        .route("/api/v1/submissions/:id/draft", post(http::http_save_draft))
        .route("/api/v1/submissions/:id/complete", post(http::http_complete))
        .route("/api/v1/submissions/:id/drop", post(http::http_drop))
        .route("/api/v1/submissions/:id/approve", post(http::http_approve))
        .route("/api/v1/submissions/:id/return", post(http::http_return))
        .route("/api/v1/submissions/:id/skip", post(http::http_skip))
        .route("/api/v1/submissions/:id/comment", post(http::http_comment))
        .route("/api/v1/submissions/:id/flag", post(http::http_flag))
        .route("/api/v1/submissions/:id/unflag", post(http::http_unflag))
        .route("/api/v1/approvals", get(http::http_approval_queue))
        // Prerequisites
        .route("/api/v1/prereqs", post(http::http_add_prereq))
        .route("/api/v1/prereqs/:id", delete(http::http_remove_prereq))
        .route("/api/v1/entities/:kind/:id/prereqs", get(http::http_prereqs_of))
        .route("/api/v1/entities/:kind/:id/reliant", get(http::http_reliant))
        // Badges
        .route("/api/v1/badge-grants", post(http::http_grant_badge))
        .route("/api/v1/badge-grants/:id", delete(http::http_revoke_badge))
        // Maps
        .route("/api/v1/maps", post(http::http_create_map))
        .route("/api/v1/primary-map", get(http::http_primary_map))
        .route("/api/v1/regenerate-maps", post(http::http_regenerate_all_maps))
        .route("/api/v1/maps/:id", get(http::http_get_map).delete(http::http_delete_map))
        .route("/api/v1/maps/:id/regenerate", post(http::http_regenerate_map))
        .route("/api/v1/maps/:id/primary", post(http::http_set_primary_map))
        // Library
        .route("/api/v1/library/quests", post(http::http_import_quests))
        .route("/api/v1/library/quests/:id", get(http::http_export_quest))
        .route("/api/v1/library/campaigns", post(http::http_import_campaign))
        .route("/api/v1/library/campaigns/:id", get(http::http_export_campaign))
        // Background tasks
        .route("/api/v1/tasks/failed", get(http::http_failed_tasks))
        // State + CORS + HTTP tracing
        .with_state(deck)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}

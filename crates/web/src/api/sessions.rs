//! Merge session API endpoints.
//!
//! A session is created by comparing two branches, edited hunk by hunk, and
//! finished by committing (or abandoned with `DELETE`).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use mergeway_core::conflict::{
    preview_patch, CommitOutcome, ConflictDetector, ConflictResolver, FileResolution, HunkAction,
    MergeCommitSynthesizer, ResolutionSummary, Side,
};
use mergeway_core::errors::SynthesisError;
use mergeway_core::models::{FileMode, Hunk, Position, RepoSlug};

use crate::api::status::AppError;
use crate::sessions::SessionEntry;
use crate::{AppState, RemoteHandles};

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    /// Repository in `owner/repo` format.
    pub repo: String,
    pub base: String,
    pub head: String,
}

#[derive(Deserialize)]
pub struct ResolveHunkRequest {
    pub path: String,
    pub hunk: usize,
    #[serde(flatten)]
    pub action: HunkAction,
}

#[derive(Deserialize)]
pub struct ResolveAllRequest {
    pub path: String,
    pub side: Side,
}

#[derive(Deserialize)]
pub struct PreviewQuery {
    pub path: String,
}

#[derive(Deserialize, Default)]
pub struct CommitRequest {
    pub message: Option<String>,
}

#[derive(Serialize)]
struct SessionView {
    id: Uuid,
    repo: String,
    base_branch: String,
    head_branch: String,
    merge_base_sha: String,
    base_sha: String,
    head_sha: String,
    truncated: bool,
    total_changed_files: usize,
    fetched_at: DateTime<Utc>,
    committing: bool,
    complete: bool,
    summary: ResolutionSummary,
    first_unresolved: Option<FirstUnresolved>,
    files: Vec<FileView>,
}

#[derive(Serialize)]
struct FirstUnresolved {
    path: String,
    hunk: usize,
}

#[derive(Serialize)]
struct FileView {
    path: String,
    has_conflicts: bool,
    auto_resolved: bool,
    oversized: bool,
    unreadable: Vec<Position>,
    mode: FileMode,
    /// Omitted for oversized files.
    hunks: Option<Vec<Hunk>>,
    resolution: Option<FileResolution>,
}

#[derive(Serialize)]
struct PreviewResponse {
    path: String,
    patch: String,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/merge-sessions", post(create_session))
        .route(
            "/api/merge-sessions/:id",
            get(get_session).delete(abandon_session),
        )
        .route("/api/merge-sessions/:id/resolve", post(resolve_hunk))
        .route("/api/merge-sessions/:id/resolve-all", post(resolve_all))
        .route("/api/merge-sessions/:id/preview", get(preview))
        .route("/api/merge-sessions/:id/commit", post(commit))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn connect(state: &AppState, headers: &HeaderMap) -> Result<RemoteHandles, AppError> {
    state.connector.connect(bearer_token(headers)).ok_or_else(|| {
        AppError::Unauthorized(
            "no GitHub token: send 'Authorization: Bearer <token>' or configure github.token_env"
                .into(),
        )
    })
}

fn session_view(id: Uuid, entry: &SessionEntry) -> SessionView {
    let session = entry.resolver.session();
    let resolution = entry.resolver.state();
    let files = session
        .files
        .iter()
        .map(|report| FileView {
            path: report.path.clone(),
            has_conflicts: report.has_conflicts,
            auto_resolved: report.auto_resolved,
            oversized: report.oversized,
            unreadable: report.unreadable.clone(),
            mode: report.mode,
            hunks: (!report.oversized).then(|| report.hunks.clone()),
            resolution: resolution.file(&report.path).cloned(),
        })
        .collect();
    SessionView {
        id,
        repo: session.repo.to_string(),
        base_branch: session.base_branch.clone(),
        head_branch: session.head_branch.clone(),
        merge_base_sha: session.merge_base_sha.clone(),
        base_sha: session.base_sha.clone(),
        head_sha: session.head_sha.clone(),
        truncated: session.truncated,
        total_changed_files: session.total_changed_files,
        fetched_at: session.fetched_at,
        committing: entry.committing,
        complete: resolution.is_complete(),
        summary: resolution.summary(),
        first_unresolved: resolution
            .first_unresolved()
            .map(|(path, hunk)| FirstUnresolved {
                path: path.to_string(),
                hunk,
            }),
        files,
    }
}

async fn current_view(state: &AppState, id: Uuid) -> Result<Json<SessionView>, AppError> {
    let entry = state
        .sessions
        .get(id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("merge session '{}' not found", id)))?;
    Ok(Json(session_view(id, &entry)))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn create_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionView>), AppError> {
    let repo: RepoSlug = body.repo.parse().map_err(AppError::BadRequest)?;
    if body.base.trim().is_empty() || body.head.trim().is_empty() {
        return Err(AppError::BadRequest("base and head must not be empty".into()));
    }
    let remote = connect(&state, &headers)?;

    // Opportunistic cleanup keeps the store bounded between sweeps.
    state.sessions.sweep_expired(Utc::now()).await;

    let detector = ConflictDetector::new(remote.reader, state.config.limits);
    let session = detector
        .fetch_merge_conflicts(&repo, &body.base, &body.head)
        .await?;
    let id = state
        .sessions
        .insert(ConflictResolver::new(Arc::new(session)))
        .await;
    info!(%id, %repo, base = %body.base, head = %body.head, "merge session opened");

    let view = current_view(&state, id).await?;
    Ok((StatusCode::CREATED, view))
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, AppError> {
    current_view(&state, id).await
}

async fn abandon_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let entry = state
        .sessions
        .get(id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("merge session '{}' not found", id)))?;
    if entry.committing {
        return Err(AppError::Conflict(
            "merge session is being committed".into(),
        ));
    }
    state.sessions.remove(id).await;
    info!(%id, "merge session abandoned");
    Ok(StatusCode::NO_CONTENT)
}

async fn resolve_hunk(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<ResolveHunkRequest>,
) -> Result<Json<SessionView>, AppError> {
    state
        .sessions
        .update(id, |resolver| resolver.resolve(&body.path, body.hunk, body.action))
        .await??;
    current_view(&state, id).await
}

async fn resolve_all(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<ResolveAllRequest>,
) -> Result<Json<SessionView>, AppError> {
    state
        .sessions
        .update(id, |resolver| resolver.accept_all(&body.path, body.side))
        .await??;
    current_view(&state, id).await
}

async fn preview(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<PreviewQuery>,
) -> Result<Json<PreviewResponse>, AppError> {
    let entry = state
        .sessions
        .get(id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("merge session '{}' not found", id)))?;
    let report = entry
        .resolver
        .session()
        .file(&query.path)
        .ok_or_else(|| AppError::NotFound(format!("file '{}' is not part of this merge session", query.path)))?;
    let resolution = entry
        .resolver
        .state()
        .file(&query.path)
        .ok_or_else(|| AppError::NotFound(format!("file '{}' has no resolution", query.path)))?;
    let patch = preview_patch(report, resolution).ok_or_else(|| {
        AppError::BadRequest(format!("file '{}' still has unresolved conflicts", query.path))
    })?;
    Ok(Json(PreviewResponse {
        path: query.path,
        patch,
    }))
}

/// Publish the merge commit.
///
/// The write sequence runs on its own task so a dropped request cannot
/// interrupt it halfway. On success the session is discarded; on failure it
/// is reopened with its resolutions intact.
async fn commit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    body: Option<Json<CommitRequest>>,
) -> Result<Json<CommitOutcome>, AppError> {
    let remote = connect(&state, &headers)?;
    let (session, resolution) = state.sessions.begin_commit(id).await?;
    let message = body
        .and_then(|Json(b)| b.message)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| {
            format!(
                "Merge branch '{}' into {}",
                session.head_branch, session.base_branch
            )
        });

    let synthesizer = MergeCommitSynthesizer::new(remote.writer);
    let task_state = Arc::clone(&state);
    let task = tokio::spawn(async move {
        let result = synthesizer
            .commit_resolution(&session, &resolution, &message)
            .await;
        match &result {
            Ok(outcome) => {
                task_state.sessions.remove(id).await;
                info!(%id, commit = %outcome.commit_sha, "merge session committed");
            }
            Err(e) => {
                task_state.sessions.end_commit(id).await;
                if matches!(e, SynthesisError::RefConflict { .. }) {
                    warn!(%id, error = %e, "merge commit refused, branch moved");
                } else {
                    warn!(%id, error = %e, "merge commit failed");
                }
            }
        }
        result
    });

    match task.await {
        Ok(result) => Ok(Json(result?)),
        Err(e) => {
            error!(%id, error = %e, "commit task failed");
            state.sessions.end_commit(id).await;
            Err(AppError::Internal(format!("commit task failed: {}", e)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert("authorization", "Bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc"));
        headers.insert("authorization", "Basic xyz".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
        headers.insert("authorization", "Bearer ".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_resolve_request_flattens_action() {
        let req: ResolveHunkRequest = serde_json::from_value(serde_json::json!({
            "path": "a.txt",
            "hunk": 1,
            "action": "custom",
            "lines": ["x", "y"]
        }))
        .unwrap();
        assert_eq!(req.hunk, 1);
        assert_eq!(
            req.action,
            HunkAction::Custom {
                lines: vec!["x".into(), "y".into()]
            }
        );

        let req: ResolveHunkRequest = serde_json::from_value(serde_json::json!({
            "path": "a.txt",
            "hunk": 0,
            "action": "accept_both"
        }))
        .unwrap();
        assert_eq!(req.action, HunkAction::AcceptBoth);
    }
}

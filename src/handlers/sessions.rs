use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
    Json,
};
use chrono::{DateTime, Utc};

use super::{json_response, parse_session_id};
use crate::{
    error::{AppError, Result},
    models::session::Session,
    services::{authorization, link, sessions::SessionManager},
    state::AppState,
    store::Store,
    validation::{
        requests::{CreateSessionRequest, InstructorQuery, OpenSessionRequest},
        validate,
    },
};

fn session_json(base_url: &str, session: &Session, now: DateTime<Utc>) -> sonic_rs::Value {
    sonic_rs::json!({
        "id": session.id.to_string(),
        "link": link::encode(base_url, session.id),
        "owner": session.owner,
        "subject": session.subject,
        "subject_id": session.subject_id,
        "class_name": session.class_name,
        "created_at": session.created_at.to_rfc3339(),
        "expiry_at": session.expiry_at.to_rfc3339(),
        "expired": session.expired,
        "live": session.is_live(now),
        "validity_secs": (session.expiry_at - session.created_at).num_seconds(),
    })
}

/// Opens a new session for the requesting instructor.
pub async fn create_session<S: Store>(
    State(state): State<AppState<S>>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Response> {
    validate(&req)?;

    let instructor = req.instructor.trim();
    let session = state
        .sessions
        .create(state.store.as_ref(), instructor, &req.subject, &req.class_name)
        .await?;

    SessionManager::schedule_expiry(state.store.clone(), &session);

    json_response(
        StatusCode::CREATED,
        &session_json(&state.config.public_base_url, &session, session.created_at),
    )
}

/// Reports whether a session still accepts attendance.
pub async fn session_status<S: Store>(
    State(state): State<AppState<S>>,
    Path(session_id): Path<String>,
) -> Result<Response> {
    let session_id = parse_session_id(&session_id)?;
    let session = state
        .store
        .get_session(session_id)
        .await?
        .ok_or(AppError::SessionNotFound)?;
    let now = state.store.now().await?;

    json_response(StatusCode::OK, &SessionManager::status(&session, now))
}

/// Opens a scanned session link, provided the requester owns the session.
pub async fn open_session<S: Store>(
    State(state): State<AppState<S>>,
    Json(req): Json<OpenSessionRequest>,
) -> Result<Response> {
    validate(&req)?;

    let session_id = link::decode(&req.link)?;
    let session =
        authorization::authorize_open(state.store.as_ref(), session_id, req.instructor.as_deref())
            .await?;
    let now = state.store.now().await?;

    json_response(
        StatusCode::OK,
        &session_json(&state.config.public_base_url, &session, now),
    )
}

/// Closes a session ahead of, or at, its deadline.
pub async fn expire_session<S: Store>(
    State(state): State<AppState<S>>,
    Path(session_id): Path<String>,
    Query(query): Query<InstructorQuery>,
) -> Result<Response> {
    let session_id = parse_session_id(&session_id)?;
    authorization::authorize_open(state.store.as_ref(), session_id, query.instructor.as_deref())
        .await?;

    SessionManager::expire(state.store.as_ref(), session_id).await?;

    json_response(
        StatusCode::OK,
        &sonic_rs::json!({
            "id": session_id.to_string(),
            "expired": true,
            "message": "Attendance closed",
        }),
    )
}

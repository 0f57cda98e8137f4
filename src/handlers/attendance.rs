use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
    Json,
};
use tower_cookies::Cookies;

use super::{json_response, parse_session_id};
use crate::{
    error::Result,
    middleware_layer::device,
    services::{attendance as attendance_service, authorization},
    state::AppState,
    store::Store,
    validation::{
        requests::{InstructorQuery, SubmitAttendanceRequest},
        validate,
    },
};

/// Records the caller's attendance in a live session.
pub async fn submit_attendance<S: Store>(
    State(state): State<AppState<S>>,
    Path(session_id): Path<String>,
    cookies: Cookies,
    Json(req): Json<SubmitAttendanceRequest>,
) -> Result<Response> {
    validate(&req)?;
    let session_id = parse_session_id(&session_id)?;

    let device_id = device::resolve_device_id(
        &cookies,
        req.device_id.as_deref(),
        state.config.secure_cookies,
    );

    let record = attendance_service::submit(
        state.store.as_ref(),
        session_id,
        &req.roll,
        &req.name,
        &device_id,
    )
    .await?;

    json_response(
        StatusCode::CREATED,
        &sonic_rs::json!({
            "session_id": record.session_id.to_string(),
            "roll": record.identity,
            "name": record.display_name,
            "recorded_at": record.recorded_at.to_rfc3339(),
            "message": "Attendance marked",
        }),
    )
}

/// Lists a session's attendance and device bindings for its owner.
pub async fn list_attendance<S: Store>(
    State(state): State<AppState<S>>,
    Path(session_id): Path<String>,
    Query(query): Query<InstructorQuery>,
) -> Result<Response> {
    let session_id = parse_session_id(&session_id)?;
    let session =
        authorization::authorize_open(state.store.as_ref(), session_id, query.instructor.as_deref())
            .await?;

    let records = attendance_service::list(state.store.as_ref(), session_id).await?;
    let bindings = attendance_service::device_bindings(state.store.as_ref(), session_id).await?;
    let now = state.store.now().await?;

    let records_json: Vec<_> = records
        .into_iter()
        .map(|r| {
            sonic_rs::json!({
                "roll": r.identity,
                "name": r.display_name,
                "recorded_at": r.recorded_at.to_rfc3339(),
            })
        })
        .collect();

    let devices_json: Vec<_> = bindings
        .into_iter()
        .map(|b| {
            sonic_rs::json!({
                "device_id": b.device_id,
                "roll": b.identity,
                "bound_at": b.bound_at.to_rfc3339(),
            })
        })
        .collect();

    json_response(
        StatusCode::OK,
        &sonic_rs::json!({
            "session_id": session.id.to_string(),
            "live": session.is_live(now),
            "count": records_json.len(),
            "records": records_json,
            "devices": devices_json,
        }),
    )
}

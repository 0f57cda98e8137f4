use axum::{extract::State, http::StatusCode, response::Response};

use super::json_response;
use crate::{error::Result, services::subjects, state::AppState, store::Store};

/// Lists which instructor owns each claimed subject.
pub async fn list_subjects<S: Store>(State(state): State<AppState<S>>) -> Result<Response> {
    let assignments = subjects::list(state.store.as_ref()).await?;

    let subjects_json: Vec<_> = assignments
        .into_iter()
        .map(|a| {
            sonic_rs::json!({
                "subject_id": a.subject_id,
                "subject": a.subject,
                "owner": a.owner,
                "created_at": a.created_at.to_rfc3339(),
            })
        })
        .collect();

    json_response(
        StatusCode::OK,
        &sonic_rs::json!({
            "count": subjects_json.len(),
            "subjects": subjects_json,
        }),
    )
}

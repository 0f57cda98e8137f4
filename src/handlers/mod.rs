use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{AppError, Result};

pub mod attendance;
pub mod sessions;
pub mod subjects;

/// Serializes `body` with sonic-rs into a JSON response.
fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Result<Response> {
    let body = sonic_rs::to_string(body)
        .map_err(|e| AppError::Internal(format!("Response serialization failed: {}", e)))?;
    Ok((status, [(header::CONTENT_TYPE, "application/json")], body).into_response())
}

/// Session ids arrive as path text; anything that is not a UUID names no
/// session.
fn parse_session_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| AppError::SessionNotFound)
}

use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::session::Session,
    store::Store,
};

/// Checks that `requester` owns the session before it is opened or
/// controlled from their client.
///
/// The requester must have set their own identity first; a missing or blank
/// identity is refused with `MissingIdentity` rather than passed through.
/// Owner names are compared exactly.
pub async fn authorize_open<S: Store>(
    store: &S,
    session_id: Uuid,
    requester: Option<&str>,
) -> Result<Session> {
    let requester = requester
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .ok_or(AppError::MissingIdentity)?;

    let session = store
        .get_session(session_id)
        .await?
        .ok_or(AppError::SessionNotFound)?;

    if session.owner != requester {
        tracing::warn!(
            "❌ {} tried to open session {} owned by {}",
            requester,
            session_id,
            session.owner
        );
        return Err(AppError::Unauthorized(session.owner));
    }

    Ok(session)
}

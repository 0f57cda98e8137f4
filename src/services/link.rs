use uuid::Uuid;

use crate::error::{AppError, Result};

/// Page attendees land on when they follow a session link.
pub const STUDENT_PAGE: &str = "student.html";

/// Builds the URL a session's QR code carries.
pub fn encode(base_url: &str, session_id: Uuid) -> String {
    format!(
        "{}/{}?session={}",
        base_url.trim_end_matches('/'),
        STUDENT_PAGE,
        session_id
    )
}

/// Extracts the session id from scanned link text.
///
/// Accepts absolute or relative links; only the `session` query parameter is
/// read.
pub fn decode(text: &str) -> Result<Uuid> {
    let invalid = || AppError::Validation("Invalid session link".to_string());

    let text = text.trim();
    let without_fragment = text.split_once('#').map_or(text, |(head, _)| head);
    let (_, query) = without_fragment.split_once('?').ok_or_else(invalid)?;

    let value = query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "session")
        .map(|(_, value)| value)
        .ok_or_else(invalid)?;

    Uuid::parse_str(value).map_err(|_| invalid())
}

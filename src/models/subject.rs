use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Permanent first-writer-wins mapping from a subject key to its instructor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectAssignment {
    /// The normalized subject key.
    pub subject_id: String,
    /// The subject name as first claimed.
    pub subject: String,
    /// The instructor who claimed the subject.
    pub owner: String,
    /// The timestamp when the subject was claimed.
    pub created_at: DateTime<Utc>,
}

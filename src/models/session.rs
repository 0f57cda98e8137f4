use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A time-boxed attendance window opened by an instructor for one subject.
///
/// `expiry_at` is fixed at creation. Once `expired` is set, or the store clock
/// passes `expiry_at`, no attendance may be recorded under the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// The unique identifier for the session.
    pub id: Uuid,
    /// The instructor who created the session.
    pub owner: String,
    /// The normalized subject key.
    pub subject_id: String,
    /// The subject name as the instructor entered it.
    pub subject: String,
    /// The class or group the session is held for.
    pub class_name: String,
    /// The timestamp when the session was created.
    pub created_at: DateTime<Utc>,
    /// The absolute deadline for submissions.
    pub expiry_at: DateTime<Utc>,
    /// Whether the session was explicitly marked expired.
    pub expired: bool,
    /// The timestamp when the session was marked expired.
    pub expired_at: Option<DateTime<Utc>>,
}

impl Session {
    /// True iff the session is not flagged expired and `now <= expiry_at`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.expired && now <= self.expiry_at
    }

    /// Time left before the deadline, zero once the session is no longer live.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        if self.is_live(now) {
            self.expiry_at - now
        } else {
            Duration::zero()
        }
    }
}

/// Liveness snapshot used by clients to drive a countdown.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub id: Uuid,
    pub subject: String,
    pub class_name: String,
    pub live: bool,
    pub expired: bool,
    pub expiry_at: DateTime<Utc>,
    pub remaining_ms: i64,
}

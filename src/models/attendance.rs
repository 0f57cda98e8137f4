use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One attendee's entry in a session, keyed by (`session_id`, `identity`).
/// Never overwritten once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    /// The session this record belongs to.
    pub session_id: Uuid,
    /// The attendee identity (roll number).
    pub identity: String,
    /// The attendee-provided name.
    pub display_name: String,
    /// The device that produced the record.
    pub device_id: String,
    /// The timestamp when the record was committed.
    pub recorded_at: DateTime<Utc>,
}

/// Ties a device to the single identity it may submit for within a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceBinding {
    /// The session this binding is scoped to.
    pub session_id: Uuid,
    /// The opaque client-local device token.
    pub device_id: String,
    /// The identity the device is bound to.
    pub identity: String,
    /// The timestamp when the device was first bound.
    pub bound_at: DateTime<Utc>,
}

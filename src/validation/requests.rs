use garde::Validate;
use serde::Deserialize;

use super::not_blank;

/// The request payload for opening a session.
#[derive(Deserialize, Debug, Validate)]
pub struct CreateSessionRequest {
    #[garde(length(max = 120), custom(not_blank))]
    pub instructor: String,
    #[garde(length(max = 120), custom(not_blank))]
    pub subject: String,
    #[garde(length(max = 120), custom(not_blank))]
    pub class_name: String,
}

/// The request payload for a scanned session link.
#[derive(Deserialize, Debug, Validate)]
pub struct OpenSessionRequest {
    #[garde(length(max = 2048))]
    pub link: String,
    #[serde(default)]
    #[garde(length(max = 120))]
    pub instructor: Option<String>,
}

/// The request payload for an attendance submission.
#[derive(Deserialize, Debug, Validate)]
pub struct SubmitAttendanceRequest {
    #[garde(length(max = 64), custom(not_blank))]
    pub roll: String,
    #[garde(length(max = 120), custom(not_blank))]
    pub name: String,
    #[serde(default)]
    #[garde(length(max = 128))]
    pub device_id: Option<String>,
}

/// The query parameters identifying the instructor acting on a session.
#[derive(Deserialize, Debug, Default)]
pub struct InstructorQuery {
    #[serde(default)]
    pub instructor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::validate;

    #[test]
    fn blank_fields_fail_validation() {
        let request = SubmitAttendanceRequest {
            roll: "   ".to_string(),
            name: "Alice".to_string(),
            device_id: None,
        };
        assert!(validate(&request).is_err());
    }

    #[test]
    fn oversized_fields_fail_validation() {
        let request = CreateSessionRequest {
            instructor: "Dr.X".to_string(),
            subject: "M".repeat(121),
            class_name: "A".to_string(),
        };
        assert!(validate(&request).is_err());
    }

    #[test]
    fn well_formed_request_passes() {
        let request = SubmitAttendanceRequest {
            roll: "101".to_string(),
            name: "Alice".to_string(),
            device_id: Some("client_abc".to_string()),
        };
        assert!(validate(&request).is_ok());
    }
}

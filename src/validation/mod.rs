use garde::Validate;

use crate::error::{AppError, Result};

pub mod requests;

/// Runs `garde` validation on a request payload.
pub fn validate<T>(payload: &T) -> Result<()>
where
    T: Validate<Context = ()>,
{
    payload
        .validate()
        .map_err(|report| AppError::Validation(report.to_string()))
}

/// Rejects values that are empty once surrounding whitespace is removed.
pub fn not_blank<T: AsRef<str>>(value: &T, _ctx: &()) -> garde::Result {
    if value.as_ref().trim().is_empty() {
        return Err(garde::Error::new("must not be blank"));
    }
    Ok(())
}

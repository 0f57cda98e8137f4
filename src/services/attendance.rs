use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::attendance::{AttendanceRecord, DeviceBinding},
    store::{self, Store, StoreTransaction},
};

/// Records one attendance entry for `identity` in `session_id`.
///
/// Every read and both writes happen inside a single store transaction:
///
/// 1. the session must exist (`SessionNotFound`),
/// 2. it must be live at the transaction's clock reading (`SessionExpired`),
/// 3. `device_id` must be unbound or bound to `identity` (`DeviceAlreadyUsed`),
/// 4. `identity` must not have a record yet (`AttendanceExists`),
///
/// after which the record and the device binding commit together.
///
/// `identity` and `display_name` are trimmed; blank values are rejected
/// before the store is touched.
pub async fn submit<S: Store>(
    store: &S,
    session_id: Uuid,
    identity: &str,
    display_name: &str,
    device_id: &str,
) -> Result<AttendanceRecord> {
    let identity = identity.trim();
    let display_name = display_name.trim();
    let device_id = device_id.trim();
    if identity.is_empty() || display_name.is_empty() {
        return Err(AppError::Validation("Fill all fields".to_string()));
    }
    if device_id.is_empty() {
        return Err(AppError::Validation("Missing device identifier".to_string()));
    }

    let record = store::run_transaction(store, |mut tx| async move {
        let session = tx
            .session(session_id)
            .await?
            .ok_or(AppError::SessionNotFound)?;

        let now = tx.now().await?;
        if !session.is_live(now) {
            return Err(AppError::SessionExpired);
        }

        if let Some(binding) = tx.device_binding(session_id, device_id).await? {
            if binding.identity != identity {
                return Err(AppError::DeviceAlreadyUsed(binding.identity));
            }
        }

        if tx.attendance(session_id, identity).await?.is_some() {
            return Err(AppError::AttendanceExists);
        }

        let record = AttendanceRecord {
            session_id,
            identity: identity.to_string(),
            display_name: display_name.to_string(),
            device_id: device_id.to_string(),
            recorded_at: now,
        };
        tx.put_attendance(&record).await?;
        tx.put_device_binding(&DeviceBinding {
            session_id,
            device_id: device_id.to_string(),
            identity: identity.to_string(),
            bound_at: now,
        })
        .await?;
        tx.commit().await?;

        Ok(record)
    })
    .await;

    match &record {
        Ok(r) => tracing::info!("✅ Attendance recorded: session {} roll {}", session_id, r.identity),
        Err(e) => tracing::debug!("Attendance refused for session {} roll {}: {}", session_id, identity, e),
    }
    record
}

/// Lists the session's attendance in commit order.
pub async fn list<S: Store>(store: &S, session_id: Uuid) -> Result<Vec<AttendanceRecord>> {
    store.list_attendance(session_id).await
}

/// Lists which device each roll was submitted from.
pub async fn device_bindings<S: Store>(store: &S, session_id: Uuid) -> Result<Vec<DeviceBinding>> {
    store.list_device_bindings(session_id).await
}

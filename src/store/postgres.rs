use chrono::{DateTime, Utc};
use deadpool_postgres::{Object, Pool};
use tokio_postgres::Row;
use uuid::Uuid;

use super::{RetryPolicy, Store, StoreTransaction};
use crate::{
    error::{AppError, Result},
    models::{
        attendance::{AttendanceRecord, DeviceBinding},
        session::Session,
        subject::SubjectAssignment,
    },
};

const SESSION_COLUMNS: &str =
    "id, owner, subject_id, subject, class_name, created_at, expiry_at, expired, expired_at";

/// A helper function to map a `tokio_postgres::Row` to a `Session`.
fn row_to_session(row: &Row) -> Result<Session> {
    Ok(Session {
        id: row.try_get("id")?,
        owner: row.try_get("owner")?,
        subject_id: row.try_get("subject_id")?,
        subject: row.try_get("subject")?,
        class_name: row.try_get("class_name")?,
        created_at: row.try_get("created_at")?,
        expiry_at: row.try_get("expiry_at")?,
        expired: row.try_get("expired")?,
        expired_at: row.try_get("expired_at")?,
    })
}

fn row_to_attendance(row: &Row) -> Result<AttendanceRecord> {
    Ok(AttendanceRecord {
        session_id: row.try_get("session_id")?,
        identity: row.try_get("identity")?,
        display_name: row.try_get("display_name")?,
        device_id: row.try_get("device_id")?,
        recorded_at: row.try_get("recorded_at")?,
    })
}

fn row_to_binding(row: &Row) -> Result<DeviceBinding> {
    Ok(DeviceBinding {
        session_id: row.try_get("session_id")?,
        device_id: row.try_get("device_id")?,
        identity: row.try_get("identity")?,
        bound_at: row.try_get("bound_at")?,
    })
}

fn row_to_subject(row: &Row) -> Result<SubjectAssignment> {
    Ok(SubjectAssignment {
        subject_id: row.try_get("subject_id")?,
        subject: row.try_get("subject")?,
        owner: row.try_get("owner")?,
        created_at: row.try_get("created_at")?,
    })
}

/// PostgreSQL-backed store. Transactions run at SERIALIZABLE isolation and
/// timestamps come from the database clock.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
    retry: RetryPolicy,
}

impl PgStore {
    /// Creates a new `PgStore`.
    ///
    /// # Arguments
    ///
    /// * `pool` - The database connection pool.
    /// * `retry` - The retry budget for transient transaction failures.
    pub fn new(pool: Pool, retry: RetryPolicy) -> Self {
        Self { pool, retry }
    }
}

/// An open SERIALIZABLE transaction pinned to one pooled connection.
///
/// If dropped before `commit`, the transaction is rolled back before the
/// connection goes back to the pool.
pub struct PgTransaction {
    client: Option<Object>,
}

impl PgTransaction {
    fn client(&self) -> Result<&Object> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Internal("Transaction already finished".to_string()))
    }
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let rolled_back = client.batch_execute("ROLLBACK").await;
                    if let Err(e) = rolled_back {
                        tracing::warn!("⚠️  Rollback of abandoned transaction failed: {}", e);
                        // The server rolls back when the connection closes.
                        drop(Object::take(client));
                    }
                });
            }
            Err(_) => {
                drop(Object::take(client));
            }
        }
    }
}

impl Store for PgStore {
    type Tx = PgTransaction;

    async fn begin(&self) -> Result<PgTransaction> {
        let client = self.pool.get().await?;
        client
            .batch_execute("BEGIN ISOLATION LEVEL SERIALIZABLE")
            .await?;
        Ok(PgTransaction {
            client: Some(client),
        })
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    async fn now(&self) -> Result<DateTime<Utc>> {
        let client = self.pool.get().await?;
        let row = client.query_one("SELECT clock_timestamp() AS now", &[]).await?;
        Ok(row.try_get("now")?)
    }

    async fn insert_session(&self, session: &Session) -> Result<()> {
        let client = self.pool.get().await?;
        let stmt = client
            .prepare_cached(
                r#"
                INSERT INTO sessions (
                    id, owner, subject_id, subject, class_name,
                    created_at, expiry_at, expired, expired_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .await?;
        client
            .execute(
                &stmt,
                &[
                    &session.id,
                    &session.owner,
                    &session.subject_id,
                    &session.subject,
                    &session.class_name,
                    &session.created_at,
                    &session.expiry_at,
                    &session.expired,
                    &session.expired_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>> {
        let client = self.pool.get().await?;
        let stmt = client
            .prepare_cached(&format!("SELECT {} FROM sessions WHERE id = $1", SESSION_COLUMNS))
            .await?;
        let row = client.query_opt(&stmt, &[&id]).await?;
        row.map(|r| row_to_session(&r)).transpose()
    }

    async fn mark_expired(&self, id: Uuid) -> Result<bool> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                WITH target AS (
                    SELECT id, expired FROM sessions WHERE id = $1
                ), flipped AS (
                    UPDATE sessions
                    SET expired = true, expired_at = clock_timestamp()
                    WHERE id = $1 AND expired = false
                    RETURNING id
                )
                SELECT EXISTS (SELECT 1 FROM flipped) AS flipped
                FROM target
                "#,
                &[&id],
            )
            .await?
            .ok_or(AppError::SessionNotFound)?;
        Ok(row.try_get("flipped")?)
    }

    async fn expire_overdue(&self) -> Result<u64> {
        let client = self.pool.get().await?;
        let count = client
            .execute(
                r#"
                UPDATE sessions
                SET expired = true, expired_at = clock_timestamp()
                WHERE expired = false AND expiry_at < clock_timestamp()
                "#,
                &[],
            )
            .await?;
        Ok(count)
    }

    async fn get_subject(&self, subject_id: &str) -> Result<Option<SubjectAssignment>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT subject_id, subject, owner, created_at
                FROM subject_assignments
                WHERE subject_id = $1
                "#,
                &[&subject_id],
            )
            .await?;
        row.map(|r| row_to_subject(&r)).transpose()
    }

    async fn create_subject_if_absent(
        &self,
        subject_id: &str,
        subject: &str,
        owner: &str,
    ) -> Result<bool> {
        let client = self.pool.get().await?;
        let inserted = client
            .execute(
                r#"
                INSERT INTO subject_assignments (subject_id, subject, owner, created_at)
                VALUES ($1, $2, $3, clock_timestamp())
                ON CONFLICT (subject_id) DO NOTHING
                "#,
                &[&subject_id, &subject, &owner],
            )
            .await?;
        Ok(inserted == 1)
    }

    async fn list_subjects(&self) -> Result<Vec<SubjectAssignment>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT subject_id, subject, owner, created_at
                FROM subject_assignments
                ORDER BY subject_id ASC
                "#,
                &[],
            )
            .await?;
        rows.iter().map(row_to_subject).collect()
    }

    async fn list_attendance(&self, session_id: Uuid) -> Result<Vec<AttendanceRecord>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT session_id, identity, display_name, device_id, recorded_at
                FROM attendance_records
                WHERE session_id = $1
                ORDER BY recorded_at ASC, identity ASC
                "#,
                &[&session_id],
            )
            .await?;
        rows.iter().map(row_to_attendance).collect()
    }

    async fn list_device_bindings(&self, session_id: Uuid) -> Result<Vec<DeviceBinding>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT session_id, device_id, identity, bound_at
                FROM device_bindings
                WHERE session_id = $1
                ORDER BY device_id ASC
                "#,
                &[&session_id],
            )
            .await?;
        rows.iter().map(row_to_binding).collect()
    }
}

impl StoreTransaction for PgTransaction {
    async fn now(&mut self) -> Result<DateTime<Utc>> {
        let row = self
            .client()?
            .query_one("SELECT clock_timestamp() AS now", &[])
            .await?;
        Ok(row.try_get("now")?)
    }

    async fn session(&mut self, id: Uuid) -> Result<Option<Session>> {
        let client = self.client()?;
        let stmt = client
            .prepare_cached(&format!("SELECT {} FROM sessions WHERE id = $1", SESSION_COLUMNS))
            .await?;
        let row = client.query_opt(&stmt, &[&id]).await?;
        row.map(|r| row_to_session(&r)).transpose()
    }

    async fn device_binding(
        &mut self,
        session_id: Uuid,
        device_id: &str,
    ) -> Result<Option<DeviceBinding>> {
        let client = self.client()?;
        let stmt = client
            .prepare_cached(
                r#"
                SELECT session_id, device_id, identity, bound_at
                FROM device_bindings
                WHERE session_id = $1 AND device_id = $2
                "#,
            )
            .await?;
        let row = client.query_opt(&stmt, &[&session_id, &device_id]).await?;
        row.map(|r| row_to_binding(&r)).transpose()
    }

    async fn attendance(
        &mut self,
        session_id: Uuid,
        identity: &str,
    ) -> Result<Option<AttendanceRecord>> {
        let client = self.client()?;
        let stmt = client
            .prepare_cached(
                r#"
                SELECT session_id, identity, display_name, device_id, recorded_at
                FROM attendance_records
                WHERE session_id = $1 AND identity = $2
                "#,
            )
            .await?;
        let row = client.query_opt(&stmt, &[&session_id, &identity]).await?;
        row.map(|r| row_to_attendance(&r)).transpose()
    }

    async fn put_attendance(&mut self, record: &AttendanceRecord) -> Result<()> {
        let client = self.client()?;
        let stmt = client
            .prepare_cached(
                r#"
                INSERT INTO attendance_records (
                    session_id, identity, display_name, device_id, recorded_at
                )
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .await?;
        client
            .execute(
                &stmt,
                &[
                    &record.session_id,
                    &record.identity,
                    &record.display_name,
                    &record.device_id,
                    &record.recorded_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn put_device_binding(&mut self, binding: &DeviceBinding) -> Result<()> {
        let client = self.client()?;
        let stmt = client
            .prepare_cached(
                r#"
                INSERT INTO device_bindings (session_id, device_id, identity, bound_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (session_id, device_id) DO NOTHING
                "#,
            )
            .await?;
        client
            .execute(
                &stmt,
                &[
                    &binding.session_id,
                    &binding.device_id,
                    &binding.identity,
                    &binding.bound_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn commit(mut self) -> Result<()> {
        let client = self
            .client
            .take()
            .ok_or_else(|| AppError::Internal("Transaction already finished".to_string()))?;
        match client.batch_execute("COMMIT").await {
            Ok(()) => Ok(()),
            Err(e) => {
                // A failed COMMIT has already ended the transaction server-side.
                let rolled_back = client.batch_execute("ROLLBACK").await;
                if let Err(rollback) = rolled_back {
                    tracing::debug!("Rollback after failed COMMIT failed: {}", rollback);
                }
                Err(AppError::from(e))
            }
        }
    }
}

use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::{
        attendance::{AttendanceRecord, DeviceBinding},
        session::Session,
        subject::SubjectAssignment,
    },
};

pub mod clock;
pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// How often the transaction primitive retries transient failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry. Doubles on every further retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(10),
        }
    }
}

/// A document store holding sessions, attendance, device bindings and subject
/// assignments.
///
/// Single-document operations live here; anything that must read and write
/// several documents as one isolated unit goes through [`StoreTransaction`].
pub trait Store: Send + Sync + 'static {
    type Tx: StoreTransaction;

    /// Opens an isolated read-check-write transaction.
    fn begin(&self) -> impl Future<Output = Result<Self::Tx>> + Send;

    /// Retry budget applied by [`run_transaction`].
    fn retry_policy(&self) -> RetryPolicy;

    /// The store's clock. All persisted timestamps come from here.
    fn now(&self) -> impl Future<Output = Result<DateTime<Utc>>> + Send;

    fn insert_session(&self, session: &Session) -> impl Future<Output = Result<()>> + Send;

    fn get_session(&self, id: Uuid) -> impl Future<Output = Result<Option<Session>>> + Send;

    /// Sets `expired` if it is not already set. Returns whether this call
    /// flipped the flag; fails with `SessionNotFound` for an unknown id.
    fn mark_expired(&self, id: Uuid) -> impl Future<Output = Result<bool>> + Send;

    /// Flags every unexpired session whose deadline has passed.
    fn expire_overdue(&self) -> impl Future<Output = Result<u64>> + Send;

    fn get_subject(
        &self,
        subject_id: &str,
    ) -> impl Future<Output = Result<Option<SubjectAssignment>>> + Send;

    /// Conditional create. Returns `false` without writing when an assignment
    /// for `subject_id` already exists.
    fn create_subject_if_absent(
        &self,
        subject_id: &str,
        subject: &str,
        owner: &str,
    ) -> impl Future<Output = Result<bool>> + Send;

    fn list_subjects(&self) -> impl Future<Output = Result<Vec<SubjectAssignment>>> + Send;

    fn list_attendance(
        &self,
        session_id: Uuid,
    ) -> impl Future<Output = Result<Vec<AttendanceRecord>>> + Send;

    fn list_device_bindings(
        &self,
        session_id: Uuid,
    ) -> impl Future<Output = Result<Vec<DeviceBinding>>> + Send;
}

/// An open transaction. Reads observe a consistent snapshot; writes become
/// visible only on `commit`. Dropping without committing leaves no trace.
pub trait StoreTransaction: Send + 'static {
    /// The store clock, read inside the transaction.
    fn now(&mut self) -> impl Future<Output = Result<DateTime<Utc>>> + Send;

    fn session(&mut self, id: Uuid) -> impl Future<Output = Result<Option<Session>>> + Send;

    fn device_binding(
        &mut self,
        session_id: Uuid,
        device_id: &str,
    ) -> impl Future<Output = Result<Option<DeviceBinding>>> + Send;

    fn attendance(
        &mut self,
        session_id: Uuid,
        identity: &str,
    ) -> impl Future<Output = Result<Option<AttendanceRecord>>> + Send;

    fn put_attendance(
        &mut self,
        record: &AttendanceRecord,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Writes the binding, or keeps an existing one untouched.
    fn put_device_binding(
        &mut self,
        binding: &DeviceBinding,
    ) -> impl Future<Output = Result<()>> + Send;

    fn commit(self) -> impl Future<Output = Result<()>> + Send;
}

/// Runs `body` inside a fresh transaction, retrying transient failures.
///
/// `body` owns the transaction and is responsible for committing it. Domain
/// errors are returned as-is on the first occurrence; a transient error that
/// survives every attempt is reported as `StoreUnavailable`.
pub async fn run_transaction<S, T, F, Fut>(store: &S, mut body: F) -> Result<T>
where
    S: Store,
    T: Send,
    F: FnMut(S::Tx) -> Fut + Send,
    Fut: Future<Output = Result<T>> + Send,
{
    let policy = store.retry_policy();
    let mut delay = policy.base_delay;
    let mut attempt = 1;

    loop {
        let outcome = match store.begin().await {
            Ok(tx) => body(tx).await,
            Err(e) => Err(e),
        };

        match outcome {
            Err(e) if e.is_transient() => {
                if attempt >= policy.max_attempts {
                    tracing::error!("❌ Transaction failed after {} attempts: {}", attempt, e);
                    return Err(match e {
                        AppError::TransactionConflict(msg) => AppError::StoreUnavailable(
                            format!("contention persisted after {} attempts: {}", attempt, msg),
                        ),
                        other => other,
                    });
                }
                tracing::warn!(
                    "⚠️  Transient store failure (attempt {}/{}): {}",
                    attempt,
                    policy.max_attempts,
                    e
                );
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
                attempt += 1;
            }
            other => return other,
        }
    }
}

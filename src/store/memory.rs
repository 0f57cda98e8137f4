use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{
    RetryPolicy, Store, StoreTransaction,
    clock::{Clock, SystemClock},
};
use crate::{
    error::{AppError, Result},
    models::{
        attendance::{AttendanceRecord, DeviceBinding},
        session::Session,
        subject::SubjectAssignment,
    },
};

#[derive(Default)]
struct Documents {
    sessions: HashMap<Uuid, Session>,
    attendance: HashMap<(Uuid, String), AttendanceRecord>,
    devices: HashMap<(Uuid, String), DeviceBinding>,
    subjects: BTreeMap<String, SubjectAssignment>,
}

/// An in-process store.
///
/// A transaction holds the lock over every document until it commits or is
/// dropped, so transactions are fully serialized.
#[derive(Clone)]
pub struct MemoryStore {
    docs: Arc<Mutex<Documents>>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl MemoryStore {
    /// Creates an empty `MemoryStore` on the wall clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty `MemoryStore` driven by `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            docs: Arc::new(Mutex::new(Documents::default())),
            clock,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes are buffered and applied under the held lock on commit.
pub struct MemoryTransaction {
    docs: OwnedMutexGuard<Documents>,
    clock: Arc<dyn Clock>,
    attendance: Vec<AttendanceRecord>,
    devices: Vec<DeviceBinding>,
}

impl Store for MemoryStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> Result<MemoryTransaction> {
        let docs = self.docs.clone().lock_owned().await;
        Ok(MemoryTransaction {
            docs,
            clock: self.clock.clone(),
            attendance: Vec::new(),
            devices: Vec::new(),
        })
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    async fn now(&self) -> Result<DateTime<Utc>> {
        Ok(self.clock.now())
    }

    async fn insert_session(&self, session: &Session) -> Result<()> {
        let mut docs = self.docs.lock().await;
        if docs.sessions.contains_key(&session.id) {
            return Err(AppError::Internal(format!(
                "Session {} already exists",
                session.id
            )));
        }
        docs.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>> {
        Ok(self.docs.lock().await.sessions.get(&id).cloned())
    }

    async fn mark_expired(&self, id: Uuid) -> Result<bool> {
        let now = self.clock.now();
        let mut docs = self.docs.lock().await;
        let session = docs.sessions.get_mut(&id).ok_or(AppError::SessionNotFound)?;
        if session.expired {
            return Ok(false);
        }
        session.expired = true;
        session.expired_at = Some(now);
        Ok(true)
    }

    async fn expire_overdue(&self) -> Result<u64> {
        let now = self.clock.now();
        let mut docs = self.docs.lock().await;
        let mut count = 0;
        for session in docs.sessions.values_mut() {
            if !session.expired && now > session.expiry_at {
                session.expired = true;
                session.expired_at = Some(now);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn get_subject(&self, subject_id: &str) -> Result<Option<SubjectAssignment>> {
        Ok(self.docs.lock().await.subjects.get(subject_id).cloned())
    }

    async fn create_subject_if_absent(
        &self,
        subject_id: &str,
        subject: &str,
        owner: &str,
    ) -> Result<bool> {
        let now = self.clock.now();
        let mut docs = self.docs.lock().await;
        if docs.subjects.contains_key(subject_id) {
            return Ok(false);
        }
        docs.subjects.insert(
            subject_id.to_string(),
            SubjectAssignment {
                subject_id: subject_id.to_string(),
                subject: subject.to_string(),
                owner: owner.to_string(),
                created_at: now,
            },
        );
        Ok(true)
    }

    async fn list_subjects(&self) -> Result<Vec<SubjectAssignment>> {
        Ok(self.docs.lock().await.subjects.values().cloned().collect())
    }

    async fn list_attendance(&self, session_id: Uuid) -> Result<Vec<AttendanceRecord>> {
        let docs = self.docs.lock().await;
        let mut records: Vec<_> = docs
            .attendance
            .values()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            a.recorded_at
                .cmp(&b.recorded_at)
                .then_with(|| a.identity.cmp(&b.identity))
        });
        Ok(records)
    }

    async fn list_device_bindings(&self, session_id: Uuid) -> Result<Vec<DeviceBinding>> {
        let docs = self.docs.lock().await;
        let mut bindings: Vec<_> = docs
            .devices
            .values()
            .filter(|b| b.session_id == session_id)
            .cloned()
            .collect();
        bindings.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        Ok(bindings)
    }
}

impl StoreTransaction for MemoryTransaction {
    async fn now(&mut self) -> Result<DateTime<Utc>> {
        Ok(self.clock.now())
    }

    async fn session(&mut self, id: Uuid) -> Result<Option<Session>> {
        Ok(self.docs.sessions.get(&id).cloned())
    }

    async fn device_binding(
        &mut self,
        session_id: Uuid,
        device_id: &str,
    ) -> Result<Option<DeviceBinding>> {
        if let Some(pending) = self
            .devices
            .iter()
            .find(|b| b.session_id == session_id && b.device_id == device_id)
        {
            return Ok(Some(pending.clone()));
        }
        Ok(self
            .docs
            .devices
            .get(&(session_id, device_id.to_string()))
            .cloned())
    }

    async fn attendance(
        &mut self,
        session_id: Uuid,
        identity: &str,
    ) -> Result<Option<AttendanceRecord>> {
        if let Some(pending) = self
            .attendance
            .iter()
            .find(|r| r.session_id == session_id && r.identity == identity)
        {
            return Ok(Some(pending.clone()));
        }
        Ok(self
            .docs
            .attendance
            .get(&(session_id, identity.to_string()))
            .cloned())
    }

    async fn put_attendance(&mut self, record: &AttendanceRecord) -> Result<()> {
        self.attendance.push(record.clone());
        Ok(())
    }

    async fn put_device_binding(&mut self, binding: &DeviceBinding) -> Result<()> {
        self.devices.push(binding.clone());
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        let MemoryTransaction {
            mut docs,
            attendance,
            devices,
            ..
        } = self;

        for record in &attendance {
            if docs
                .attendance
                .contains_key(&(record.session_id, record.identity.clone()))
            {
                return Err(AppError::TransactionConflict(format!(
                    "attendance for {} already committed",
                    record.identity
                )));
            }
        }

        for record in attendance {
            docs.attendance
                .insert((record.session_id, record.identity.clone()), record);
        }
        for binding in devices {
            docs.devices
                .entry((binding.session_id, binding.device_id.clone()))
                .or_insert(binding);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::clock::ManualClock;
    use chrono::Duration;

    fn session(now: DateTime<Utc>) -> Session {
        Session {
            id: Uuid::new_v4(),
            owner: "Dr.X".to_string(),
            subject_id: "MATH101".to_string(),
            subject: "Math101".to_string(),
            class_name: "A".to_string(),
            created_at: now,
            expiry_at: now + Duration::minutes(5),
            expired: false,
            expired_at: None,
        }
    }

    fn record(session_id: Uuid, identity: &str, device_id: &str, at: DateTime<Utc>) -> AttendanceRecord {
        AttendanceRecord {
            session_id,
            identity: identity.to_string(),
            display_name: "Alice".to_string(),
            device_id: device_id.to_string(),
            recorded_at: at,
        }
    }

    #[tokio::test]
    async fn dropped_transaction_leaves_no_trace() {
        let store = MemoryStore::with_clock(Arc::new(ManualClock::default()));
        let now = store.now().await.unwrap();
        let s = session(now);
        store.insert_session(&s).await.unwrap();

        {
            let mut tx = store.begin().await.unwrap();
            tx.put_attendance(&record(s.id, "101", "dev1", now)).await.unwrap();
            tx.put_device_binding(&DeviceBinding {
                session_id: s.id,
                device_id: "dev1".to_string(),
                identity: "101".to_string(),
                bound_at: now,
            })
            .await
            .unwrap();
            // Own writes are visible inside the transaction.
            assert!(tx.attendance(s.id, "101").await.unwrap().is_some());
        }

        assert!(store.list_attendance(s.id).await.unwrap().is_empty());
        assert!(store.list_device_bindings(s.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn existing_binding_is_kept_on_confirm() {
        let clock = Arc::new(ManualClock::default());
        let store = MemoryStore::with_clock(clock.clone());
        let t0 = store.now().await.unwrap();
        let s = session(t0);
        store.insert_session(&s).await.unwrap();

        let binding = DeviceBinding {
            session_id: s.id,
            device_id: "dev1".to_string(),
            identity: "101".to_string(),
            bound_at: t0,
        };
        let mut tx = store.begin().await.unwrap();
        tx.put_device_binding(&binding).await.unwrap();
        tx.commit().await.unwrap();

        clock.advance(Duration::seconds(5));
        let mut tx = store.begin().await.unwrap();
        tx.put_device_binding(&DeviceBinding {
            bound_at: store.clock.now(),
            ..binding.clone()
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.list_device_bindings(s.id).await.unwrap(), vec![binding]);
    }

    #[tokio::test]
    async fn subject_create_is_conditional() {
        let store = MemoryStore::new();

        assert!(store.create_subject_if_absent("MATH101", "Math 101", "Dr.X").await.unwrap());
        assert!(!store.create_subject_if_absent("MATH101", "math 101", "Dr.Y").await.unwrap());

        let assignment = store.get_subject("MATH101").await.unwrap().unwrap();
        assert_eq!(assignment.owner, "Dr.X");
        assert_eq!(assignment.subject, "Math 101");
    }

    #[tokio::test]
    async fn mark_expired_only_flips_once() {
        let store = MemoryStore::with_clock(Arc::new(ManualClock::default()));
        let s = session(store.now().await.unwrap());
        store.insert_session(&s).await.unwrap();

        assert!(store.mark_expired(s.id).await.unwrap());
        assert!(!store.mark_expired(s.id).await.unwrap());
        assert!(matches!(
            store.mark_expired(Uuid::new_v4()).await,
            Err(AppError::SessionNotFound)
        ));
    }
}

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::session::{Session, SessionStatus},
    services::subjects,
    store::Store,
};

/// Default validity window for a new session, in seconds.
pub const DEFAULT_VALIDITY_SECS: i64 = 300;

/// Creates and expires sessions with a fixed validity window.
#[derive(Debug, Clone, Copy)]
pub struct SessionManager {
    validity: Duration,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_VALIDITY_SECS))
    }
}

impl SessionManager {
    /// Creates a new `SessionManager`.
    pub fn new(validity: Duration) -> Self {
        Self { validity }
    }

    /// Opens a session for `subject_name` owned by `owner`.
    ///
    /// The subject claim is checked first; on `OwnershipViolation` nothing is
    /// written. `owner` is stored trimmed, matching what `authorize_open`
    /// compares against.
    pub async fn create<S: Store>(
        &self,
        store: &S,
        owner: &str,
        subject_name: &str,
        class_name: &str,
    ) -> Result<Session> {
        let owner = owner.trim();
        let subject_id = subjects::normalize(subject_name);
        subjects::claim_or_verify(store, &subject_id, subject_name.trim(), owner).await?;

        let now = store.now().await?;
        let session = Session {
            id: Uuid::new_v4(),
            owner: owner.to_string(),
            subject_id,
            subject: subject_name.trim().to_string(),
            class_name: class_name.trim().to_string(),
            created_at: now,
            expiry_at: now + self.validity,
            expired: false,
            expired_at: None,
        };
        store.insert_session(&session).await?;

        tracing::info!(
            "✅ Session {} created by {} for {} (expires {})",
            session.id,
            session.owner,
            session.subject_id,
            session.expiry_at.to_rfc3339()
        );
        Ok(session)
    }

    /// True iff `session` accepts submissions at `now`.
    pub fn is_live(session: &Session, now: DateTime<Utc>) -> bool {
        session.is_live(now)
    }

    /// Countdown snapshot for clients.
    pub fn status(session: &Session, now: DateTime<Utc>) -> SessionStatus {
        SessionStatus {
            id: session.id,
            subject: session.subject.clone(),
            class_name: session.class_name.clone(),
            live: session.is_live(now),
            expired: session.expired || now > session.expiry_at,
            expiry_at: session.expiry_at,
            remaining_ms: session.remaining(now).num_milliseconds(),
        }
    }

    /// Marks the session expired. Calling it again is a no-op.
    pub async fn expire<S: Store>(store: &S, session_id: Uuid) -> Result<()> {
        if store.mark_expired(session_id).await? {
            tracing::info!("⌛ Session {} marked expired", session_id);
        } else {
            tracing::debug!("Session {} was already expired", session_id);
        }
        Ok(())
    }

    /// Spawns a task that marks `session` expired once the store clock passes
    /// its deadline.
    ///
    /// This only keeps the stored flag tidy; submissions are refused past
    /// `expiry_at` whether or not the task ever runs.
    pub fn schedule_expiry<S: Store>(store: Arc<S>, session: &Session) -> JoinHandle<()> {
        let session_id = session.id;
        let expiry_at = session.expiry_at;

        tokio::spawn(async move {
            loop {
                let now = match store.now().await {
                    Ok(now) => now,
                    Err(e) => {
                        tracing::error!("❌ Expiry task for {} lost the clock: {}", session_id, e);
                        return;
                    }
                };
                if now > expiry_at {
                    break;
                }
                let wait = (expiry_at - now + Duration::milliseconds(1))
                    .to_std()
                    .unwrap_or_default();
                tokio::time::sleep(wait).await;
            }

            match Self::expire(store.as_ref(), session_id).await {
                Ok(()) => {}
                Err(AppError::SessionNotFound) => {
                    tracing::warn!("⚠️  Expiry task found no session {}", session_id);
                }
                Err(e) => {
                    tracing::error!("❌ Failed to mark session {} expired: {}", session_id, e);
                }
            }
        })
    }

    /// Flags every session past its deadline that was never marked expired.
    pub async fn sweep_overdue<S: Store>(store: &S) -> Result<u64> {
        let count = store.expire_overdue().await?;
        if count > 0 {
            tracing::info!("🧹 Marked {} overdue sessions expired", count);
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::authorization;
    use crate::store::{MemoryStore, clock::ManualClock};

    fn manual_store() -> (Arc<ManualClock>, MemoryStore) {
        let clock = Arc::new(ManualClock::default());
        let store = MemoryStore::with_clock(clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn create_sets_fixed_deadline() {
        let (_clock, store) = manual_store();
        let manager = SessionManager::new(Duration::milliseconds(300_000));
        let t0 = store.now().await.unwrap();

        let session = manager
            .create(&store, "Dr.X", "  Math 101 ", "CSE-A")
            .await
            .unwrap();

        assert_eq!(session.subject_id, "MATH_101");
        assert_eq!(session.subject, "Math 101");
        assert_eq!(session.created_at, t0);
        assert_eq!(session.expiry_at, t0 + Duration::milliseconds(300_000));
        assert!(!session.expired);
        assert_eq!(store.get_session(session.id).await.unwrap(), Some(session));
    }

    #[tokio::test]
    async fn create_is_refused_for_foreign_subject() {
        let (_clock, store) = manual_store();
        let manager = SessionManager::default();
        manager.create(&store, "Dr.X", "MATH101", "A").await.unwrap();

        let err = manager
            .create(&store, "Dr.Y", "math101", "B")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::OwnershipViolation(ref owner) if owner == "Dr.X"));
    }

    #[tokio::test]
    async fn owner_can_open_session_with_the_name_used_to_create_it() {
        let (_clock, store) = manual_store();
        let session = SessionManager::default()
            .create(&store, " Dr.X ", "MATH101", "A")
            .await
            .unwrap();
        assert_eq!(session.owner, "Dr.X");

        for requester in [" Dr.X ", "Dr.X"] {
            let opened = authorization::authorize_open(&store, session.id, Some(requester))
                .await
                .unwrap();
            assert_eq!(opened.id, session.id);
        }
        assert!(matches!(
            authorization::authorize_open(&store, session.id, Some("dr.x")).await,
            Err(AppError::Unauthorized(ref owner)) if owner == "Dr.X"
        ));
    }

    #[tokio::test]
    async fn expire_is_idempotent() {
        let (_clock, store) = manual_store();
        let session = SessionManager::default()
            .create(&store, "Dr.X", "MATH101", "A")
            .await
            .unwrap();

        SessionManager::expire(&store, session.id).await.unwrap();
        let first = store.get_session(session.id).await.unwrap().unwrap();
        SessionManager::expire(&store, session.id).await.unwrap();
        let second = store.get_session(session.id).await.unwrap().unwrap();

        assert!(first.expired);
        assert_eq!(first.expired_at, second.expired_at);
        assert!(matches!(
            SessionManager::expire(&store, Uuid::new_v4()).await,
            Err(AppError::SessionNotFound)
        ));
    }

    #[tokio::test]
    async fn liveness_is_monotonic() {
        let (clock, store) = manual_store();
        let session = SessionManager::new(Duration::seconds(60))
            .create(&store, "Dr.X", "MATH101", "A")
            .await
            .unwrap();

        let mut seen_dead = false;
        for _ in 0..20 {
            let live = SessionManager::is_live(&session, store.now().await.unwrap());
            if seen_dead {
                assert!(!live);
            }
            seen_dead |= !live;
            clock.advance(Duration::seconds(7));
        }
        assert!(seen_dead);
    }

    #[tokio::test]
    async fn status_reports_countdown() {
        let (clock, store) = manual_store();
        let session = SessionManager::new(Duration::seconds(60))
            .create(&store, "Dr.X", "MATH101", "A")
            .await
            .unwrap();

        clock.advance(Duration::seconds(15));
        let status = SessionManager::status(&session, store.now().await.unwrap());
        assert!(status.live);
        assert_eq!(status.remaining_ms, 45_000);

        clock.advance(Duration::seconds(60));
        let status = SessionManager::status(&session, store.now().await.unwrap());
        assert!(!status.live);
        assert!(status.expired);
        assert_eq!(status.remaining_ms, 0);
    }

    #[tokio::test]
    async fn scheduled_task_marks_session_expired() {
        let store = Arc::new(MemoryStore::new());
        let session = SessionManager::new(Duration::milliseconds(50))
            .create(store.as_ref(), "Dr.X", "MATH101", "A")
            .await
            .unwrap();

        let handle = SessionManager::schedule_expiry(store.clone(), &session);
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        let stored = store.get_session(session.id).await.unwrap().unwrap();
        assert!(stored.expired);
        assert!(stored.expired_at.unwrap() > stored.expiry_at);
    }

    #[tokio::test]
    async fn sweep_flags_only_overdue_sessions() {
        let (clock, store) = manual_store();
        let short = SessionManager::new(Duration::seconds(10))
            .create(&store, "Dr.X", "MATH101", "A")
            .await
            .unwrap();
        let long = SessionManager::new(Duration::minutes(10))
            .create(&store, "Dr.X", "MATH101", "B")
            .await
            .unwrap();

        clock.advance(Duration::seconds(11));
        assert_eq!(SessionManager::sweep_overdue(&store).await.unwrap(), 1);
        assert_eq!(SessionManager::sweep_overdue(&store).await.unwrap(), 0);

        assert!(store.get_session(short.id).await.unwrap().unwrap().expired);
        assert!(!store.get_session(long.id).await.unwrap().unwrap().expired);
    }
}

use crate::{
    error::{AppError, Result},
    models::subject::SubjectAssignment,
    store::Store,
};

/// Derives the subject key from a human-entered subject name.
///
/// Trims, joins whitespace runs with a single `_`, and uppercases. The same
/// input always yields the same key.
pub fn normalize(raw_subject_name: &str) -> String {
    raw_subject_name
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_uppercase()
}

/// Claims `subject_id` for `requester`, or verifies an existing claim.
///
/// The first instructor to claim a subject owns it permanently; any later
/// requester with a different name fails with `OwnershipViolation`, carrying
/// the recorded owner. Names are trimmed, then compared exactly.
pub async fn claim_or_verify<S: Store>(
    store: &S,
    subject_id: &str,
    subject_name: &str,
    requester: &str,
) -> Result<()> {
    let requester = requester.trim();
    if requester.is_empty() {
        return Err(AppError::MissingIdentity);
    }
    if subject_id.is_empty() {
        return Err(AppError::Validation("Subject cannot be empty".to_string()));
    }

    let existing = match store.get_subject(subject_id).await? {
        Some(assignment) => assignment,
        None => {
            if store
                .create_subject_if_absent(subject_id, subject_name, requester)
                .await?
            {
                tracing::info!("✅ Subject {} assigned to {}", subject_id, requester);
                return Ok(());
            }
            // Another instructor claimed it between our read and create.
            store.get_subject(subject_id).await?.ok_or_else(|| {
                AppError::Internal(format!("Subject {} vanished after claim", subject_id))
            })?
        }
    };

    if existing.owner != requester {
        tracing::warn!(
            "❌ {} tried to use subject {} owned by {}",
            requester,
            subject_id,
            existing.owner
        );
        return Err(AppError::OwnershipViolation(existing.owner));
    }

    Ok(())
}

/// Lists every subject assignment.
pub async fn list<S: Store>(store: &S) -> Result<Vec<SubjectAssignment>> {
    store.list_subjects().await
}

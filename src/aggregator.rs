//! Learning record aggregation
//!
//! Writes a record and folds it into its enrollment: the running total of
//! session minutes is recomputed from every stored sibling, and the progress
//! carried by the record is handed to the enrollment state machine. Callers
//! run these functions inside one store transaction so that the record, the
//! enrollment and the running total commit together.
use crate::enrollment::{Enrollment, EnrollmentStatus, ProgressUpdate};
use crate::error::{LmsError, LmsResult};
use crate::guard::{authorize, authorize_owner, can_access_course};
use crate::identity::Identity;
use crate::record::{LearningRecord, NewLearningRecord, RecordPatch};
use crate::store::Repository;
use crate::types::TimeStamp;
use crate::utils::dedup_digest;
use chrono::{FixedOffset, Utc};
use tracing::debug;

/// A record write together with the enrollment it left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub record: LearningRecord,
    pub enrollment: Enrollment,
    /// The request repeated an earlier dedup key; nothing was written.
    pub replayed: bool,
}

/// Learners may only change a record on the local day it was created.
pub fn check_edit_window(
    actor: &Identity,
    record: &LearningRecord,
    now: &TimeStamp<Utc>,
    offset: FixedOffset,
) -> LmsResult<()> {
    if actor.is_admin() {
        return Ok(());
    }
    if record.created_at.local_date(offset) != now.local_date(offset) {
        return Err(LmsError::StaleEditWindow);
    }
    Ok(())
}

pub fn sum_minutes(records: &[LearningRecord]) -> u64 {
    records.iter().map(LearningRecord::minutes).sum()
}

/// Rewrite the running total on the chronologically latest record so it
/// matches the sum over all records. Returns that sum.
pub fn reconcile_latest<R: Repository + ?Sized>(repo: &R, enrollment_id: &str) -> LmsResult<u64> {
    let records = repo.list_records_by_enrollment(enrollment_id)?;
    let total = sum_minutes(&records);

    if let Some(latest) = records.last() {
        if latest.cumulative_learning_minutes != total {
            debug!(
                enrollment_id,
                record_id = %latest.id,
                stale = latest.cumulative_learning_minutes,
                total,
                "rewriting running total on latest record"
            );
            let mut latest = latest.clone();
            latest.cumulative_learning_minutes = total;
            repo.put_record(&latest)?;
        }
    }
    Ok(total)
}

fn load_enrollment<R: Repository + ?Sized>(repo: &R, id: &str) -> LmsResult<Enrollment> {
    repo.get_enrollment(id)?
        .ok_or_else(|| LmsError::NotFound(format!("Enrollment {id}")))
}

fn advance_enrollment<R: Repository + ?Sized>(
    repo: &R,
    enrollment: Enrollment,
    progress: Option<u8>,
    actor: &Identity,
    now: &TimeStamp<Utc>,
) -> LmsResult<Enrollment> {
    let next = enrollment.apply_progress(&ProgressUpdate::session(progress), actor, now)?;
    if next != enrollment {
        repo.put_enrollment(&next)?;
    }
    Ok(next)
}

/// Record one learning session (create).
pub fn record_session<R: Repository + ?Sized>(
    repo: &R,
    draft: &NewLearningRecord,
    record_id: &str,
    actor: &Identity,
    now: &TimeStamp<Utc>,
    offset: FixedOffset,
) -> LmsResult<SessionOutcome> {
    authorize_owner(actor, &draft.learner_id)?;
    if !can_access_course(repo, actor, &draft.course_id) {
        return Err(LmsError::Forbidden);
    }

    let enrollment = load_enrollment(repo, &draft.enrollment_id)?;
    if enrollment.learner_id != draft.learner_id || enrollment.course_id != draft.course_id {
        return Err(LmsError::NotFound(format!(
            "Enrollment {} for learner {} in course {}",
            draft.enrollment_id, draft.learner_id, draft.course_id
        )));
    }

    let digest = draft
        .dedup_key
        .as_deref()
        .map(|key| dedup_digest(&enrollment.id, key));
    if let Some(digest) = &digest {
        if let Some(existing_id) = repo.find_dedup(digest)? {
            if let Some(existing) = repo.get_record(&existing_id)? {
                return Ok(SessionOutcome {
                    record: existing,
                    enrollment,
                    replayed: true,
                });
            }
        }
    }

    if enrollment.status == EnrollmentStatus::Cancelled {
        return Err(LmsError::CancelledEnrollment);
    }
    let course = repo
        .get_course(&draft.course_id)?
        .ok_or_else(|| LmsError::NotFound(format!("Course {}", draft.course_id)))?;
    if !course.is_active {
        return Err(LmsError::InactiveCourse);
    }

    let mut record = draft.finalise(record_id.to_string(), now.clone(), offset)?;
    record.dedup_digest = digest.clone();

    let siblings = repo.list_records_by_enrollment(&enrollment.id)?;
    record.cumulative_learning_minutes = sum_minutes(&siblings) + record.minutes();
    repo.put_record(&record)?;
    if let Some(digest) = &digest {
        repo.put_dedup(digest, &record.id)?;
    }

    let enrollment = advance_enrollment(repo, enrollment, record.progress_percentage, actor, now)?;
    reconcile_latest(repo, &enrollment.id)?;

    Ok(SessionOutcome {
        record,
        enrollment,
        replayed: false,
    })
}

pub fn update_record<R: Repository + ?Sized>(
    repo: &R,
    record_id: &str,
    patch: &RecordPatch,
    actor: &Identity,
    now: &TimeStamp<Utc>,
    offset: FixedOffset,
) -> LmsResult<SessionOutcome> {
    let record = repo
        .get_record(record_id)?
        .ok_or_else(|| LmsError::NotFound(format!("Learning record {record_id}")))?;
    authorize(actor, &record)?;
    check_edit_window(actor, &record, now, offset)?;

    let mut next = record.apply_patch(patch, offset)?;
    let enrollment = load_enrollment(repo, &record.enrollment_id)?;

    let others: u64 = repo
        .list_records_by_enrollment(&record.enrollment_id)?
        .iter()
        .filter(|sibling| sibling.id != record.id)
        .map(LearningRecord::minutes)
        .sum();
    next.cumulative_learning_minutes = others + next.minutes();
    repo.put_record(&next)?;

    let enrollment = match patch.progress_percentage {
        Some(progress) => advance_enrollment(repo, enrollment, Some(progress), actor, now)?,
        None => enrollment,
    };
    reconcile_latest(repo, &record.enrollment_id)?;

    Ok(SessionOutcome {
        record: next,
        enrollment,
        replayed: false,
    })
}

/// Delete a record and return the enrollment's remaining total.
pub fn delete_record<R: Repository + ?Sized>(
    repo: &R,
    record_id: &str,
    actor: &Identity,
    now: &TimeStamp<Utc>,
    offset: FixedOffset,
) -> LmsResult<u64> {
    let record = repo
        .get_record(record_id)?
        .ok_or_else(|| LmsError::NotFound(format!("Learning record {record_id}")))?;
    authorize(actor, &record)?;
    check_edit_window(actor, &record, now, offset)?;

    repo.delete_record(record_id)?;
    if let Some(digest) = &record.dedup_digest {
        repo.delete_dedup(digest)?;
    }
    reconcile_latest(repo, &record.enrollment_id)
}

//! Service layer API for enrollments and learning records
//!
//! Each operation resolves in a single store transaction: the guard decision,
//! the state machine transition and every write either all commit or none do.
use crate::aggregator::{self, SessionOutcome};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::enrollment::{Enrollment, ProgressUpdate};
use crate::error::{LmsError, LmsResult};
use crate::guard::{authorize, authorize_owner, can_access_course, require_admin};
use crate::identity::{Identity, Role};
use crate::record::{LearningRecord, NewLearningRecord, RecordPatch};
use crate::store::{Repository, Store};
use crate::types::TimeStamp;
use crate::utils::{ENROLLMENT_HRP, RECORD_HRP, new_id};
use chrono::{FixedOffset, Offset, Utc};
use std::sync::Arc;
use tracing::{info, warn};

pub struct LmsService {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    utc_offset: FixedOffset,
}

fn mint_id(hrp: &str) -> LmsResult<String> {
    new_id(hrp).map_err(|e| LmsError::Internal(format!("failed to mint id: {e}")))
}

fn rejected(operation: &'static str) -> impl Fn(&LmsError) {
    move |err| warn!(operation, "rejected: {err}")
}

impl LmsService {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            utc_offset: Utc.fix(),
        }
    }

    /// Open the configured store with the system clock.
    pub fn open(config: &Config) -> LmsResult<Self> {
        let store = Store::open(&config.db_path)?;
        Ok(Self::new(Arc::new(store)).with_utc_offset(config.utc_offset))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_utc_offset(mut self, offset: FixedOffset) -> Self {
        self.utc_offset = offset;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    fn now(&self) -> TimeStamp<Utc> {
        self.clock.now()
    }

    /// Assign a learner to an active course. Administrators only.
    pub fn create_enrollment(
        &self,
        learner_id: &str,
        course_id: &str,
        due_date: Option<TimeStamp<Utc>>,
        actor: &Identity,
    ) -> LmsResult<Enrollment> {
        require_admin(actor)?;
        let id = mint_id(ENROLLMENT_HRP)?;
        let now = self.now();

        let enrollment = self
            .store
            .transact(|tx| {
                let learner = tx
                    .get_user(learner_id)?
                    .ok_or_else(|| LmsError::NotFound(format!("User {learner_id}")))?;
                if learner.role != Role::Learner {
                    return Err(LmsError::NotALearner(learner_id.to_string()));
                }
                let course = tx
                    .get_course(course_id)?
                    .ok_or_else(|| LmsError::NotFound(format!("Course {course_id}")))?;
                if !course.is_active {
                    return Err(LmsError::InactiveCourse);
                }
                if tx.find_enrollment(learner_id, course_id)?.is_some() {
                    return Err(LmsError::DuplicateEnrollment);
                }

                let enrollment = Enrollment::assign(
                    id.clone(),
                    learner_id.to_string(),
                    course_id.to_string(),
                    due_date.clone(),
                    now.clone(),
                );
                tx.put_enrollment(&enrollment)?;
                Ok(enrollment)
            })
            .inspect_err(rejected("create_enrollment"))?;

        info!(
            enrollment_id = %enrollment.id,
            learner_id,
            course_id,
            "enrollment assigned"
        );
        Ok(enrollment)
    }

    /// Move an enrollment through its lifecycle or change its progress.
    pub fn update_enrollment_progress(
        &self,
        enrollment_id: &str,
        update: &ProgressUpdate,
        actor: &Identity,
    ) -> LmsResult<Enrollment> {
        let now = self.now();

        let enrollment = self
            .store
            .transact(|tx| {
                let current = tx
                    .get_enrollment(enrollment_id)?
                    .ok_or_else(|| LmsError::NotFound(format!("Enrollment {enrollment_id}")))?;
                authorize(actor, &current)?;

                let next = current.apply_progress(update, actor, &now)?;
                if next != current {
                    tx.put_enrollment(&next)?;
                }
                Ok(next)
            })
            .inspect_err(rejected("update_enrollment_progress"))?;

        info!(
            enrollment_id,
            status = ?enrollment.status,
            progress = enrollment.progress_percentage,
            "enrollment progress applied"
        );
        Ok(enrollment)
    }

    /// Remove an enrollment that has no learning records. Administrators only.
    pub fn delete_enrollment(&self, enrollment_id: &str, actor: &Identity) -> LmsResult<()> {
        require_admin(actor)?;

        self.store
            .transact(|tx| {
                if tx.get_enrollment(enrollment_id)?.is_none() {
                    return Err(LmsError::NotFound(format!("Enrollment {enrollment_id}")));
                }
                if !tx.list_records_by_enrollment(enrollment_id)?.is_empty() {
                    return Err(LmsError::HasDependentRecords);
                }
                tx.delete_enrollment(enrollment_id)
            })
            .inspect_err(rejected("delete_enrollment"))?;

        info!(enrollment_id, "enrollment deleted");
        Ok(())
    }

    pub fn get_enrollment(&self, enrollment_id: &str, actor: &Identity) -> LmsResult<Enrollment> {
        self.store.transact(|tx| {
            let enrollment = tx
                .get_enrollment(enrollment_id)?
                .ok_or_else(|| LmsError::NotFound(format!("Enrollment {enrollment_id}")))?;
            authorize(actor, &enrollment)?;
            Ok(enrollment)
        })
    }

    pub fn list_enrollments(&self, learner_id: &str, actor: &Identity) -> LmsResult<Vec<Enrollment>> {
        authorize_owner(actor, learner_id)?;
        self.store
            .transact(|tx| tx.list_enrollments_by_learner(learner_id))
    }

    /// Log a study session and fold it into its enrollment.
    ///
    /// The record, the refreshed running total and any enrollment transition
    /// commit together. A repeated dedup key returns the original record.
    pub fn record_learning_session(
        &self,
        draft: &NewLearningRecord,
        actor: &Identity,
    ) -> LmsResult<SessionOutcome> {
        let record_id = mint_id(RECORD_HRP)?;
        let now = self.now();

        let outcome = self
            .store
            .transact(|tx| {
                aggregator::record_session(tx, draft, &record_id, actor, &now, self.utc_offset)
            })
            .inspect_err(rejected("record_learning_session"))?;

        if outcome.replayed {
            info!(record_id = %outcome.record.id, "duplicate learning session ignored");
        } else {
            info!(
                record_id = %outcome.record.id,
                enrollment_id = %outcome.enrollment.id,
                minutes = outcome.record.minutes(),
                cumulative = outcome.record.cumulative_learning_minutes,
                status = ?outcome.enrollment.status,
                "learning session recorded"
            );
        }
        Ok(outcome)
    }

    pub fn update_learning_record(
        &self,
        record_id: &str,
        patch: &RecordPatch,
        actor: &Identity,
    ) -> LmsResult<SessionOutcome> {
        let now = self.now();

        let outcome = self
            .store
            .transact(|tx| {
                aggregator::update_record(tx, record_id, patch, actor, &now, self.utc_offset)
            })
            .inspect_err(rejected("update_learning_record"))?;

        info!(
            record_id,
            cumulative = outcome.record.cumulative_learning_minutes,
            "learning record updated"
        );
        Ok(outcome)
    }

    pub fn delete_learning_record(&self, record_id: &str, actor: &Identity) -> LmsResult<()> {
        let now = self.now();

        let remaining = self
            .store
            .transact(|tx| aggregator::delete_record(tx, record_id, actor, &now, self.utc_offset))
            .inspect_err(rejected("delete_learning_record"))?;

        info!(record_id, remaining, "learning record deleted");
        Ok(())
    }

    /// Records of one enrollment, oldest session first.
    pub fn list_learning_records(
        &self,
        enrollment_id: &str,
        actor: &Identity,
    ) -> LmsResult<Vec<LearningRecord>> {
        self.store.transact(|tx| {
            let enrollment = tx
                .get_enrollment(enrollment_id)?
                .ok_or_else(|| LmsError::NotFound(format!("Enrollment {enrollment_id}")))?;
            authorize(actor, &enrollment)?;
            tx.list_records_by_enrollment(enrollment_id)
        })
    }

    /// Every record of a course an admin may see, or the acting learner's own.
    pub fn list_course_records(
        &self,
        course_id: &str,
        actor: &Identity,
    ) -> LmsResult<Vec<LearningRecord>> {
        self.store.transact(|tx| {
            if !can_access_course(tx, actor, course_id) {
                return Err(LmsError::Forbidden);
            }
            let enrollments = if actor.is_admin() {
                tx.list_enrollments_by_course(course_id)?
            } else {
                tx.find_enrollment(&actor.user_id, course_id)?
                    .into_iter()
                    .collect()
            };

            let mut records = Vec::new();
            for enrollment in enrollments {
                records.extend(tx.list_records_by_enrollment(&enrollment.id)?);
            }
            Ok(records)
        })
    }

    /// Total session minutes of an enrollment, summed from its records.
    pub fn total_learning_minutes(&self, enrollment_id: &str, actor: &Identity) -> LmsResult<u64> {
        let records = self.list_learning_records(enrollment_id, actor)?;
        Ok(aggregator::sum_minutes(&records))
    }
}

//! Enrollment lifecycle and the state machine that guards it
//!
//! An enrollment moves `Assigned -> InProgress -> Completed`, and an
//! administrator may cancel it from either non-terminal state. Learner
//! initiated changes follow a fixed transition table; administrator changes
//! may write any field as long as the status/timestamp invariants still hold
//! afterwards (see [`Enrollment::holds_invariants`]).
use crate::error::TransitionError;
use crate::identity::Identity;
use crate::types::TimeStamp;
use chrono::Utc;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnrollmentStatus {
    #[n(0)]
    Assigned,
    #[n(1)]
    InProgress,
    #[n(2)]
    Completed,
    #[n(3)]
    Cancelled,
}

impl EnrollmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EnrollmentStatus::Completed | EnrollmentStatus::Cancelled)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Enrollment {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub learner_id: String,
    #[n(2)]
    pub course_id: String,
    #[n(3)]
    pub status: EnrollmentStatus,
    #[n(4)]
    pub progress_percentage: u8,
    #[n(5)]
    pub assigned_at: TimeStamp<Utc>,
    #[n(6)]
    pub started_at: Option<TimeStamp<Utc>>,
    #[n(7)]
    pub completed_at: Option<TimeStamp<Utc>>,
    #[n(8)]
    pub due_date: Option<TimeStamp<Utc>>,
}

/// A requested change to an enrollment.
///
/// `session_logged` marks changes caused by a learning record write; those
/// always follow the learner transition table, even when an administrator
/// logged the session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub status: Option<EnrollmentStatus>,
    pub progress: Option<u8>,
    pub started_at: Option<TimeStamp<Utc>>,
    pub completed_at: Option<TimeStamp<Utc>>,
    pub due_date: Option<TimeStamp<Utc>>,
    pub(crate) session_logged: bool,
}

impl ProgressUpdate {
    pub fn new() -> Self {
        Self::default()
    }
    /// The event raised by writing a learning record.
    pub(crate) fn session(progress: Option<u8>) -> Self {
        Self {
            progress,
            session_logged: true,
            ..Self::default()
        }
    }
    pub fn set_status(mut self, status: EnrollmentStatus) -> Self {
        self.status = Some(status);
        self
    }
    pub fn set_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }
    pub fn set_started_at(mut self, at: TimeStamp<Utc>) -> Self {
        self.started_at = Some(at);
        self
    }
    pub fn set_completed_at(mut self, at: TimeStamp<Utc>) -> Self {
        self.completed_at = Some(at);
        self
    }
    pub fn set_due_date(mut self, at: TimeStamp<Utc>) -> Self {
        self.due_date = Some(at);
        self
    }
}

impl Enrollment {
    /// A fresh assignment of `learner_id` to `course_id`.
    pub fn assign(
        id: String,
        learner_id: String,
        course_id: String,
        due_date: Option<TimeStamp<Utc>>,
        now: TimeStamp<Utc>,
    ) -> Self {
        Self {
            id,
            learner_id,
            course_id,
            status: EnrollmentStatus::Assigned,
            progress_percentage: 0,
            assigned_at: now,
            started_at: None,
            completed_at: None,
            due_date,
        }
    }

    pub fn holds_invariants(&self) -> bool {
        if self.progress_percentage > 100 {
            return false;
        }
        match self.status {
            EnrollmentStatus::Assigned => self.started_at.is_none() && self.completed_at.is_none(),
            EnrollmentStatus::InProgress => {
                self.started_at.is_some() && self.completed_at.is_none()
            }
            EnrollmentStatus::Completed => {
                self.started_at.is_some()
                    && self.completed_at.is_some()
                    && self.progress_percentage == 100
            }
            EnrollmentStatus::Cancelled => self.completed_at.is_none(),
        }
    }

    /// Apply `update` on behalf of `actor`, returning the next enrollment.
    ///
    /// `self` is never modified; callers persist the returned value.
    pub fn apply_progress(
        &self,
        update: &ProgressUpdate,
        actor: &Identity,
        now: &TimeStamp<Utc>,
    ) -> Result<Enrollment, TransitionError> {
        if let Some(p) = update.progress {
            if p > 100 {
                return Err(TransitionError::ProgressOutOfRange(p));
            }
        }

        if actor.is_admin() {
            if update.session_logged {
                return self.apply_event(update, now);
            }
            return self.apply_admin(update, now);
        }

        if actor.user_id != self.learner_id {
            return Err(TransitionError::NotOwner);
        }
        if update.started_at.is_some() {
            return Err(TransitionError::AdminOnly("started_at"));
        }
        if update.completed_at.is_some() {
            return Err(TransitionError::AdminOnly("completed_at"));
        }
        if update.due_date.is_some() {
            return Err(TransitionError::AdminOnly("due_date"));
        }

        self.apply_event(update, now)
    }

    // The learner transition table. Progress reaching 100 while in progress
    // completes the enrollment in the same step.
    fn apply_event(
        &self,
        update: &ProgressUpdate,
        now: &TimeStamp<Utc>,
    ) -> Result<Enrollment, TransitionError> {
        use EnrollmentStatus::*;

        let mut next = self.clone();

        match self.status {
            Cancelled => {
                let unchanged = update.status.is_none_or(|s| s == Cancelled);
                if !unchanged || update.progress.is_some() || update.session_logged {
                    return Err(TransitionError::Terminal(Cancelled));
                }
                return Ok(next);
            }
            Completed => {
                // review sessions leave a completed enrollment as it is
                if update.session_logged {
                    return Ok(next);
                }
                if update.status.is_some_and(|s| s != Completed) {
                    return Err(TransitionError::Terminal(Completed));
                }
                if update.progress.is_some_and(|p| p != 100) {
                    return Err(TransitionError::Terminal(Completed));
                }
                return Ok(next);
            }
            Assigned => {
                match update.status {
                    None | Some(Assigned) | Some(InProgress) => {}
                    Some(to) => {
                        return Err(TransitionError::InvalidTransition { from: Assigned, to });
                    }
                }
                let starting = update.session_logged || update.status == Some(InProgress);
                if !starting {
                    if update.progress.is_some() {
                        return Err(TransitionError::NotStarted);
                    }
                    return Ok(next);
                }
                next.status = InProgress;
                next.started_at = Some(now.clone());
            }
            InProgress => match update.status {
                None | Some(InProgress) | Some(Completed) => {}
                Some(to) => {
                    return Err(TransitionError::InvalidTransition {
                        from: InProgress,
                        to,
                    });
                }
            },
        }

        if let Some(p) = update.progress {
            next.progress_percentage = p;
        }
        if update.status == Some(Completed) && next.progress_percentage < 100 {
            return Err(TransitionError::IncompleteProgress(next.progress_percentage));
        }
        if next.progress_percentage == 100 {
            next.status = Completed;
            next.completed_at = Some(now.clone());
        }

        Ok(next)
    }

    fn apply_admin(
        &self,
        update: &ProgressUpdate,
        now: &TimeStamp<Utc>,
    ) -> Result<Enrollment, TransitionError> {
        use EnrollmentStatus::*;

        let progress = update.progress.unwrap_or(self.progress_percentage);

        if self.status.is_terminal() {
            if update.status.is_some_and(|s| s != self.status) {
                return Err(TransitionError::Terminal(self.status));
            }
            if progress != self.progress_percentage {
                return Err(TransitionError::Terminal(self.status));
            }
        }

        let status = match update.status {
            Some(status) => status,
            None if self.status == InProgress && progress == 100 => Completed,
            None => self.status,
        };
        if status == Completed && progress < 100 {
            return Err(TransitionError::IncompleteProgress(progress));
        }

        let mut next = self.clone();
        next.status = status;
        next.progress_percentage = progress;

        next.started_at = match status {
            Assigned => {
                if update.started_at.is_some() {
                    return Err(TransitionError::InvalidTransition {
                        from: self.status,
                        to: Assigned,
                    });
                }
                None
            }
            Cancelled => update.started_at.clone().or_else(|| self.started_at.clone()),
            InProgress | Completed => update
                .started_at
                .clone()
                .or_else(|| self.started_at.clone())
                .or_else(|| Some(now.clone())),
        };

        next.completed_at = match status {
            Completed => update
                .completed_at
                .clone()
                .or_else(|| self.completed_at.clone())
                .or_else(|| Some(now.clone())),
            _ => {
                if update.completed_at.is_some() {
                    return Err(TransitionError::InvalidTransition {
                        from: self.status,
                        to: status,
                    });
                }
                None
            }
        };

        if let Some(due) = &update.due_date {
            next.due_date = Some(due.clone());
        }

        Ok(next)
    }
}

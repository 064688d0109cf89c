//! Learning records: one logged study session each
use crate::error::{LmsError, LmsResult};
use crate::types::{CalendarDate, TimeStamp};
use chrono::{FixedOffset, Utc};
use std::cmp::Ordering;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct LearningRecord {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub enrollment_id: String,
    #[n(2)]
    pub course_id: String,
    #[n(3)]
    pub learner_id: String,
    #[n(4)]
    pub session_start_time: TimeStamp<Utc>,
    #[n(5)]
    pub session_end_time: Option<TimeStamp<Utc>>,
    #[n(6)]
    pub session_duration_minutes: Option<u32>,
    #[n(7)]
    pub session_date: CalendarDate, // derived from session_start_time
    #[n(8)]
    pub progress_percentage: Option<u8>,
    #[n(9)]
    pub understanding_level: Option<u8>,
    #[n(10)]
    pub notes: Option<String>,
    #[n(11)]
    pub cumulative_learning_minutes: u64, // materialised running total for the enrollment
    #[n(12)]
    pub created_at: TimeStamp<Utc>,
    #[n(13)]
    pub dedup_digest: Option<String>,
}

// used for constructing a session before it is recorded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLearningRecord {
    pub enrollment_id: String,
    pub course_id: String,
    pub learner_id: String,
    pub session_start_time: TimeStamp<Utc>,
    pub session_end_time: Option<TimeStamp<Utc>>,
    pub session_duration_minutes: Option<u32>,
    pub progress_percentage: Option<u8>,
    pub understanding_level: Option<u8>,
    pub notes: Option<String>,
    pub dedup_key: Option<String>,
}

/// Fields of a record that may be changed after it was written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordPatch {
    pub session_start_time: Option<TimeStamp<Utc>>,
    pub session_end_time: Option<TimeStamp<Utc>>,
    pub session_duration_minutes: Option<u32>,
    pub progress_percentage: Option<u8>,
    pub understanding_level: Option<u8>,
    pub notes: Option<String>,
}

impl NewLearningRecord {
    pub fn new(
        enrollment_id: &str,
        course_id: &str,
        learner_id: &str,
        session_start_time: TimeStamp<Utc>,
    ) -> Self {
        Self {
            enrollment_id: enrollment_id.to_string(),
            course_id: course_id.to_string(),
            learner_id: learner_id.to_string(),
            session_start_time,
            session_end_time: None,
            session_duration_minutes: None,
            progress_percentage: None,
            understanding_level: None,
            notes: None,
            dedup_key: None,
        }
    }
    pub fn set_end_time(mut self, end: TimeStamp<Utc>) -> Self {
        self.session_end_time = Some(end);
        self
    }
    pub fn set_duration_minutes(mut self, minutes: u32) -> Self {
        self.session_duration_minutes = Some(minutes);
        self
    }
    pub fn set_progress(mut self, progress: u8) -> Self {
        self.progress_percentage = Some(progress);
        self
    }
    pub fn set_understanding(mut self, level: u8) -> Self {
        self.understanding_level = Some(level);
        self
    }
    pub fn set_notes(mut self, notes: &str) -> Self {
        self.notes = Some(notes.to_string());
        self
    }
    pub fn set_dedup_key(mut self, key: &str) -> Self {
        self.dedup_key = Some(key.to_string());
        self
    }

    /// Validate the draft and turn it into a record. The running total is
    /// left at zero; the aggregator fills it in against the stored siblings.
    pub fn finalise(
        &self,
        id: String,
        created_at: TimeStamp<Utc>,
        offset: FixedOffset,
    ) -> LmsResult<LearningRecord> {
        validate_scores(self.progress_percentage, self.understanding_level)?;
        let duration = derive_duration(
            &self.session_start_time,
            self.session_end_time.as_ref(),
            self.session_duration_minutes,
        )?;

        Ok(LearningRecord {
            id,
            enrollment_id: self.enrollment_id.clone(),
            course_id: self.course_id.clone(),
            learner_id: self.learner_id.clone(),
            session_date: self.session_start_time.local_date(offset),
            session_start_time: self.session_start_time.clone(),
            session_end_time: self.session_end_time.clone(),
            session_duration_minutes: duration,
            progress_percentage: self.progress_percentage,
            understanding_level: self.understanding_level,
            notes: self.notes.clone(),
            cumulative_learning_minutes: 0,
            created_at,
            dedup_digest: None,
        })
    }
}

impl RecordPatch {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_start_time(mut self, start: TimeStamp<Utc>) -> Self {
        self.session_start_time = Some(start);
        self
    }
    pub fn set_end_time(mut self, end: TimeStamp<Utc>) -> Self {
        self.session_end_time = Some(end);
        self
    }
    pub fn set_duration_minutes(mut self, minutes: u32) -> Self {
        self.session_duration_minutes = Some(minutes);
        self
    }
    pub fn set_progress(mut self, progress: u8) -> Self {
        self.progress_percentage = Some(progress);
        self
    }
    pub fn set_understanding(mut self, level: u8) -> Self {
        self.understanding_level = Some(level);
        self
    }
    pub fn set_notes(mut self, notes: &str) -> Self {
        self.notes = Some(notes.to_string());
        self
    }
}

impl LearningRecord {
    /// Minutes this session contributes to the enrollment total.
    pub fn minutes(&self) -> u64 {
        u64::from(self.session_duration_minutes.unwrap_or(0))
    }

    /// Chronological order within an enrollment: session start, then
    /// creation time, then id.
    pub fn chronological_cmp(&self, other: &Self) -> Ordering {
        self.session_start_time
            .cmp(&other.session_start_time)
            .then_with(|| self.created_at.cmp(&other.created_at))
            .then_with(|| self.id.cmp(&other.id))
    }

    /// Returns the patched record. Duration is re-derived when the session
    /// timing moved and the patch carries no explicit duration.
    pub fn apply_patch(&self, patch: &RecordPatch, offset: FixedOffset) -> LmsResult<Self> {
        validate_scores(patch.progress_percentage, patch.understanding_level)?;

        let start = patch
            .session_start_time
            .clone()
            .unwrap_or_else(|| self.session_start_time.clone());
        let end = patch
            .session_end_time
            .clone()
            .or_else(|| self.session_end_time.clone());
        let timing_changed = patch.session_start_time.is_some() || patch.session_end_time.is_some();

        let explicit = match patch.session_duration_minutes {
            Some(minutes) => Some(minutes),
            None if timing_changed && end.is_some() => None,
            None => self.session_duration_minutes,
        };
        let duration = derive_duration(&start, end.as_ref(), explicit)?;

        let mut next = self.clone();
        next.session_date = start.local_date(offset);
        next.session_start_time = start;
        next.session_end_time = end;
        next.session_duration_minutes = duration;
        if patch.progress_percentage.is_some() {
            next.progress_percentage = patch.progress_percentage;
        }
        if patch.understanding_level.is_some() {
            next.understanding_level = patch.understanding_level;
        }
        if patch.notes.is_some() {
            next.notes = patch.notes.clone();
        }
        Ok(next)
    }
}

/// Session length in whole minutes, rounded to the nearest minute when it has
/// to be derived from the start and end times.
pub fn derive_duration(
    start: &TimeStamp<Utc>,
    end: Option<&TimeStamp<Utc>>,
    explicit: Option<u32>,
) -> LmsResult<Option<u32>> {
    let seconds = match end {
        Some(end) => {
            let seconds = start.seconds_until(end);
            if seconds < 0 {
                return Err(LmsError::InvalidDuration(format!(
                    "session ends {}s before it starts",
                    -seconds
                )));
            }
            Some(seconds)
        }
        None => None,
    };

    if explicit.is_some() {
        return Ok(explicit);
    }

    match seconds {
        Some(seconds) => {
            let minutes = (seconds + 30) / 60;
            u32::try_from(minutes)
                .map(Some)
                .map_err(|_| LmsError::InvalidDuration(format!("{minutes} minutes is too long")))
        }
        None => Ok(None),
    }
}

fn validate_scores(progress: Option<u8>, understanding: Option<u8>) -> LmsResult<()> {
    if let Some(p) = progress {
        if p > 100 {
            return Err(LmsError::InvalidField {
                field: "progress_percentage",
                reason: format!("{p} is above 100"),
            });
        }
    }
    if let Some(level) = understanding {
        if !(1..=5).contains(&level) {
            return Err(LmsError::InvalidField {
                field: "understanding_level",
                reason: format!("{level} is outside 1..=5"),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn duration_is_rounded_from_times() {
        let start = TimeStamp::new_with(2024, 1, 1, 9, 0, 0).unwrap();

        let end = TimeStamp::new_with(2024, 1, 1, 9, 44, 29).unwrap();
        assert_eq!(derive_duration(&start, Some(&end), None).unwrap(), Some(44));

        let end = TimeStamp::new_with(2024, 1, 1, 9, 44, 30).unwrap();
        assert_eq!(derive_duration(&start, Some(&end), None).unwrap(), Some(45));
    }

    #[test]
    fn explicit_duration_wins_but_order_is_checked() {
        let start = TimeStamp::new_with(2024, 1, 1, 9, 0, 0).unwrap();
        let end = TimeStamp::new_with(2024, 1, 1, 10, 0, 0).unwrap();
        assert_eq!(derive_duration(&start, Some(&end), Some(20)).unwrap(), Some(20));

        let err = derive_duration(&end, Some(&start), Some(20)).unwrap_err();
        assert!(matches!(err, LmsError::InvalidDuration(_)));
    }

    #[test]
    fn open_session_has_no_duration() {
        let start = TimeStamp::new_with(2024, 1, 1, 9, 0, 0).unwrap();
        assert_eq!(derive_duration(&start, None, None).unwrap(), None);
    }

    #[test]
    fn finalise_rejects_out_of_range_scores() {
        let start = TimeStamp::new_with(2024, 1, 1, 9, 0, 0).unwrap();
        let draft = NewLearningRecord::new("enrol_1", "course_1", "user_1", start.clone())
            .set_understanding(6);
        assert!(matches!(
            draft.finalise("rec_1".into(), start.clone(), utc()),
            Err(LmsError::InvalidField { field: "understanding_level", .. })
        ));

        let draft = NewLearningRecord::new("enrol_1", "course_1", "user_1", start.clone())
            .set_progress(120);
        assert!(matches!(
            draft.finalise("rec_1".into(), start, utc()),
            Err(LmsError::InvalidField { field: "progress_percentage", .. })
        ));
    }

    #[test]
    fn patching_end_time_rederives_duration() {
        let start = TimeStamp::new_with(2024, 1, 1, 9, 0, 0).unwrap();
        let record = NewLearningRecord::new("enrol_1", "course_1", "user_1", start.clone())
            .set_end_time(TimeStamp::new_with(2024, 1, 1, 9, 30, 0).unwrap())
            .finalise("rec_1".into(), start, utc())
            .unwrap();
        assert_eq!(record.session_duration_minutes, Some(30));

        let patched = record
            .apply_patch(
                &RecordPatch::new().set_end_time(TimeStamp::new_with(2024, 1, 1, 10, 15, 0).unwrap()),
                utc(),
            )
            .unwrap();
        assert_eq!(patched.session_duration_minutes, Some(75));

        let notes_only = record
            .apply_patch(&RecordPatch::new().set_notes("chapter 3"), utc())
            .unwrap();
        assert_eq!(notes_only.session_duration_minutes, Some(30));
        assert_eq!(notes_only.notes.as_deref(), Some("chapter 3"));
    }

    #[test]
    fn records_order_by_start_then_creation() {
        let start = TimeStamp::new_with(2024, 1, 1, 9, 0, 0).unwrap();
        let created = TimeStamp::new_with(2024, 1, 1, 18, 0, 0).unwrap();
        let draft = NewLearningRecord::new("enrol_1", "course_1", "user_1", start.clone());

        let early = draft.finalise("rec_b".into(), created.clone(), utc()).unwrap();
        let logged_later = draft
            .finalise("rec_a".into(), created.plus(chrono::Duration::minutes(1)), utc())
            .unwrap();
        let later_start = NewLearningRecord::new(
            "enrol_1",
            "course_1",
            "user_1",
            start.plus(chrono::Duration::hours(1)),
        )
        .finalise("rec_0".into(), created.clone(), utc())
        .unwrap();
        let same_instant = draft.finalise("rec_c".into(), created, utc()).unwrap();

        assert_eq!(early.chronological_cmp(&logged_later), Ordering::Less);
        assert_eq!(later_start.chronological_cmp(&logged_later), Ordering::Greater);
        assert_eq!(early.chronological_cmp(&same_instant), Ordering::Less);

        let mut records = vec![later_start, same_instant, logged_later, early];
        records.sort_by(|a, b| a.chronological_cmp(b));
        let ids: Vec<_> = records.iter().map(|record| record.id.as_str()).collect();
        assert_eq!(ids, ["rec_b", "rec_c", "rec_a", "rec_0"]);
    }

    #[test]
    fn moving_start_moves_session_date() {
        let start = TimeStamp::new_with(2024, 1, 1, 9, 0, 0).unwrap();
        let record = NewLearningRecord::new("enrol_1", "course_1", "user_1", start.clone())
            .set_duration_minutes(15)
            .finalise("rec_1".into(), start, utc())
            .unwrap();

        let patched = record
            .apply_patch(
                &RecordPatch::new().set_start_time(TimeStamp::new_with(2024, 1, 3, 9, 0, 0).unwrap()),
                utc(),
            )
            .unwrap();
        assert_eq!(
            patched.session_date.as_naive(),
            chrono::NaiveDate::from_ymd_opt(2024, 1, 3).unwrap()
        );
        assert_eq!(patched.session_duration_minutes, Some(15));
    }
}

//! Property-based tests for the enrollment state machine and the running total
//!
//! Random sequences of progress updates must never leave an enrollment in a
//! state that breaks its status/timestamp invariants, and random sequences of
//! record writes must always leave the latest record carrying the sum of all
//! session minutes.

use learning_ledger::enrollment::{Enrollment, EnrollmentStatus, ProgressUpdate};
use learning_ledger::types::TimeStamp;
use learning_ledger::{Course, Identity, LmsService, NewLearningRecord, RecordPatch, Role, Store, User};
use proptest::prelude::*;
use std::sync::Arc;

// PROPERTY TEST STRATEGIES

fn status_strategy() -> impl Strategy<Value = EnrollmentStatus> {
    (0u8..=3).prop_map(|i| match i {
        0 => EnrollmentStatus::Assigned,
        1 => EnrollmentStatus::InProgress,
        2 => EnrollmentStatus::Completed,
        _ => EnrollmentStatus::Cancelled,
    })
}

/// A progress update together with whether an administrator sends it
fn update_strategy() -> impl Strategy<Value = (bool, ProgressUpdate)> {
    (
        prop::bool::ANY,
        prop::option::of(status_strategy()),
        prop::option::of(0u8..=110),
    )
        .prop_map(|(admin, status, progress)| {
            let mut update = ProgressUpdate::new();
            update.status = status;
            update.progress = progress;
            (admin, update)
        })
}

#[derive(Debug, Clone)]
enum RecordOp {
    Create { start_minute: u32, minutes: Option<u32> },
    Update { pick: usize, minutes: u32 },
    Delete { pick: usize },
}

fn record_op_strategy() -> impl Strategy<Value = RecordOp> {
    prop_oneof![
        3 => (0u32..600, prop::option::of(0u32..240))
            .prop_map(|(start_minute, minutes)| RecordOp::Create { start_minute, minutes }),
        1 => (any::<usize>(), 0u32..240).prop_map(|(pick, minutes)| RecordOp::Update { pick, minutes }),
        1 => any::<usize>().prop_map(|pick| RecordOp::Delete { pick }),
    ]
}

// PROPERTIES

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Whatever sequence of updates is attempted, every accepted state keeps
    /// the invariants and a terminal state is never left.
    #[test]
    fn transitions_preserve_invariants(updates in prop::collection::vec(update_strategy(), 1..20)) {
        let learner = Identity::learner("user_l");
        let admin = Identity::admin("user_a");
        let now = TimeStamp::new_with(2024, 5, 2, 12, 0, 0).unwrap();

        let mut enrollment = Enrollment::assign(
            "enrol_p".into(),
            "user_l".into(),
            "course_p".into(),
            None,
            TimeStamp::new_with(2024, 5, 1, 9, 0, 0).unwrap(),
        );

        for (as_admin, update) in updates {
            let actor = if as_admin { &admin } else { &learner };
            let was_terminal = enrollment.status.is_terminal();
            let before = enrollment.status;

            if let Ok(next) = enrollment.apply_progress(&update, actor, &now) {
                prop_assert!(next.holds_invariants(), "broken invariants: {:?}", next);
                prop_assert!(next.progress_percentage <= 100);
                if was_terminal {
                    prop_assert_eq!(next.status, before);
                }
                enrollment = next;
            }
        }
    }

    /// Out of range progress is never accepted from anyone.
    #[test]
    fn progress_over_hundred_rejected(progress in 101u8..=255, admin in prop::bool::ANY) {
        let actor = if admin { Identity::admin("user_a") } else { Identity::learner("user_l") };
        let enrollment = Enrollment::assign(
            "enrol_p".into(),
            "user_l".into(),
            "course_p".into(),
            None,
            TimeStamp::new_with(2024, 5, 1, 9, 0, 0).unwrap(),
        );
        let result = enrollment.apply_progress(
            &ProgressUpdate::new().set_progress(progress),
            &actor,
            &TimeStamp::new_with(2024, 5, 2, 9, 0, 0).unwrap(),
        );
        prop_assert!(result.is_err());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// After any mix of creates, updates and deletes, the chronologically
    /// latest record holds the enrollment's total.
    #[test]
    fn latest_record_carries_total(ops in prop::collection::vec(record_op_strategy(), 1..16)) {
        let store = Store::temporary().expect("temporary store");
        let learner = User::new("user_l", Role::Learner);
        store.put_user(&learner).expect("put user");
        store.put_course(&Course::new("course_p", "Property course")).expect("put course");

        let service = LmsService::new(Arc::new(store));
        let admin = Identity::admin("user_a");
        let enrollment = service
            .create_enrollment("user_l", "course_p", None, &admin)
            .expect("enrollment");

        let mut ids: Vec<String> = Vec::new();
        for op in ops {
            match op {
                RecordOp::Create { start_minute, minutes } => {
                    let start = TimeStamp::new_with(2024, 5, 2, 6, 0, 0).unwrap()
                        .plus(chrono::Duration::minutes(i64::from(start_minute)));
                    let mut draft = NewLearningRecord::new(&enrollment.id, "course_p", "user_l", start);
                    draft.session_duration_minutes = minutes;
                    let outcome = service
                        .record_learning_session(&draft, &admin)
                        .expect("record session");
                    ids.push(outcome.record.id);
                }
                RecordOp::Update { pick, minutes } if !ids.is_empty() => {
                    let id = &ids[pick % ids.len()];
                    service
                        .update_learning_record(id, &RecordPatch::new().set_duration_minutes(minutes), &admin)
                        .expect("update record");
                }
                RecordOp::Delete { pick } if !ids.is_empty() => {
                    let id = ids.remove(pick % ids.len());
                    service.delete_learning_record(&id, &admin).expect("delete record");
                }
                _ => {}
            }

            let records = service
                .list_learning_records(&enrollment.id, &admin)
                .expect("list records");
            prop_assert_eq!(records.len(), ids.len());
            let total: u64 = records.iter().map(|record| record.minutes()).sum();
            if let Some(latest) = records.last() {
                prop_assert_eq!(latest.cumulative_learning_minutes, total);
            }
        }
    }
}

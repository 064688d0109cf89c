//! Walk one learner through a course: assignment, two study sessions and
//! completion. Run with `RUST_LOG=debug` to see every store decision.
use anyhow::Context;
use learning_ledger::types::TimeStamp;
use learning_ledger::utils::{self, COURSE_HRP, USER_HRP};
use learning_ledger::{Config, Course, LmsService, NewLearningRecord, Role, Store, User, telemetry};
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    telemetry::init(&config);

    let store = Store::temporary()?;
    let admin = User::new(utils::new_id(USER_HRP)?, Role::Admin);
    let learner = User::new(utils::new_id(USER_HRP)?, Role::Learner).set_department("Warehouse");
    let course = Course::new(utils::new_id(COURSE_HRP)?, "Forklift safety");
    store.put_user(&admin)?;
    store.put_user(&learner)?;
    store.put_course(&course)?;

    let service = LmsService::new(Arc::new(store)).with_utc_offset(config.utc_offset);
    let admin = admin.identity();
    let me = learner.identity();

    let enrollment = service
        .create_enrollment(&learner.id, &course.id, None, &admin)
        .context("assigning the course")?;
    println!("assigned {} ({:?})", enrollment.id, enrollment.status);

    let morning = NewLearningRecord::new(&enrollment.id, &course.id, &learner.id, TimeStamp::now())
        .set_duration_minutes(30)
        .set_progress(40)
        .set_understanding(3);
    let outcome = service.record_learning_session(&morning, &me)?;
    println!(
        "session 1: {} min total, enrollment {:?} at {}%",
        outcome.record.cumulative_learning_minutes,
        outcome.enrollment.status,
        outcome.enrollment.progress_percentage
    );

    let afternoon = NewLearningRecord::new(&enrollment.id, &course.id, &learner.id, TimeStamp::now())
        .set_duration_minutes(45)
        .set_progress(100)
        .set_notes("passed the practical");
    let outcome = service.record_learning_session(&afternoon, &me)?;
    println!(
        "session 2: {} min total, enrollment {:?}",
        outcome.record.cumulative_learning_minutes, outcome.enrollment.status
    );

    let total = service.total_learning_minutes(&enrollment.id, &me)?;
    println!("{} studied {total} minutes of {}", learner.id, course.title);

    Ok(())
}

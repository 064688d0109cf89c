//! Resource-scoped authorization
//!
//! Every operation asks the guard before touching a resource. A learner may
//! act on resources they own; an administrator may act on all of them. The
//! guard is evaluated per request against the current store state, never
//! cached, because roles and enrollments change between requests.
use crate::enrollment::Enrollment;
use crate::error::{LmsError, LmsResult};
use crate::identity::Identity;
use crate::record::LearningRecord;
use crate::store::Repository;
use tracing::warn;

/// A resource owned, for access purposes, by a single learner.
pub trait Owned {
    fn owner_id(&self) -> &str;
}

impl Owned for Enrollment {
    fn owner_id(&self) -> &str {
        &self.learner_id
    }
}

impl Owned for LearningRecord {
    fn owner_id(&self) -> &str {
        &self.learner_id
    }
}

pub fn can_access(identity: &Identity, resource_owner_id: &str) -> bool {
    identity.is_admin() || identity.user_id == resource_owner_id
}

/// Admins see every course; learners only the ones they are enrolled in.
/// Lookup failures deny access.
pub fn can_access_course<R: Repository + ?Sized>(
    repo: &R,
    identity: &Identity,
    course_id: &str,
) -> bool {
    if identity.is_admin() {
        return true;
    }
    match repo.find_enrollment(&identity.user_id, course_id) {
        Ok(found) => found.is_some(),
        Err(e) => {
            warn!(
                user_id = %identity.user_id,
                course_id,
                "course access lookup failed, denying: {e}"
            );
            false
        }
    }
}

/// [`can_access`] as a result, for use with `?`.
pub fn authorize(identity: &Identity, resource: &impl Owned) -> LmsResult<()> {
    authorize_owner(identity, resource.owner_id())
}

pub fn authorize_owner(identity: &Identity, owner_id: &str) -> LmsResult<()> {
    if can_access(identity, owner_id) {
        return Ok(());
    }
    warn!(
        user_id = %identity.user_id,
        owner_id,
        "access denied to resource owned by another learner"
    );
    Err(LmsError::Forbidden)
}

pub fn require_admin(identity: &Identity) -> LmsResult<()> {
    if identity.is_admin() {
        return Ok(());
    }
    warn!(user_id = %identity.user_id, "administrator operation denied");
    Err(LmsError::Forbidden)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::course::Course;
    use crate::identity::User;
    use crate::store::Store;
    use crate::types::TimeStamp;

    // a store whose every lookup fails
    struct Unreachable;

    impl Repository for Unreachable {
        fn get_user(&self, _: &str) -> LmsResult<Option<User>> {
            Err(LmsError::StoreUnavailable("offline".into()))
        }
        fn get_course(&self, _: &str) -> LmsResult<Option<Course>> {
            Err(LmsError::StoreUnavailable("offline".into()))
        }
        fn get_enrollment(&self, _: &str) -> LmsResult<Option<Enrollment>> {
            Err(LmsError::StoreUnavailable("offline".into()))
        }
        fn find_enrollment(&self, _: &str, _: &str) -> LmsResult<Option<Enrollment>> {
            Err(LmsError::StoreUnavailable("offline".into()))
        }
        fn put_enrollment(&self, _: &Enrollment) -> LmsResult<()> {
            Err(LmsError::StoreUnavailable("offline".into()))
        }
        fn delete_enrollment(&self, _: &str) -> LmsResult<()> {
            Err(LmsError::StoreUnavailable("offline".into()))
        }
        fn list_enrollments_by_learner(&self, _: &str) -> LmsResult<Vec<Enrollment>> {
            Err(LmsError::StoreUnavailable("offline".into()))
        }
        fn list_enrollments_by_course(&self, _: &str) -> LmsResult<Vec<Enrollment>> {
            Err(LmsError::StoreUnavailable("offline".into()))
        }
        fn get_record(&self, _: &str) -> LmsResult<Option<LearningRecord>> {
            Err(LmsError::StoreUnavailable("offline".into()))
        }
        fn put_record(&self, _: &LearningRecord) -> LmsResult<()> {
            Err(LmsError::StoreUnavailable("offline".into()))
        }
        fn delete_record(&self, _: &str) -> LmsResult<()> {
            Err(LmsError::StoreUnavailable("offline".into()))
        }
        fn list_records_by_enrollment(&self, _: &str) -> LmsResult<Vec<LearningRecord>> {
            Err(LmsError::StoreUnavailable("offline".into()))
        }
        fn find_dedup(&self, _: &str) -> LmsResult<Option<String>> {
            Err(LmsError::StoreUnavailable("offline".into()))
        }
        fn put_dedup(&self, _: &str, _: &str) -> LmsResult<()> {
            Err(LmsError::StoreUnavailable("offline".into()))
        }
        fn delete_dedup(&self, _: &str) -> LmsResult<()> {
            Err(LmsError::StoreUnavailable("offline".into()))
        }
    }

    #[test]
    fn owner_and_admin_pass() {
        let owner = Identity::learner("user_l");
        let other = Identity::learner("user_x");
        let admin = Identity::admin("user_a");

        assert!(can_access(&owner, "user_l"));
        assert!(!can_access(&other, "user_l"));
        assert!(can_access(&admin, "user_l"));
        assert!(matches!(
            authorize_owner(&other, "user_l"),
            Err(LmsError::Forbidden)
        ));
        assert!(matches!(require_admin(&owner), Err(LmsError::Forbidden)));
    }

    #[test]
    fn course_access_requires_enrollment() {
        let store = Store::temporary().unwrap();
        store
            .transact(|tx| {
                tx.put_enrollment(&Enrollment::assign(
                    "enrol_1".into(),
                    "user_l".into(),
                    "course_1".into(),
                    None,
                    TimeStamp::now(),
                ))
            })
            .unwrap();

        let learner = Identity::learner("user_l");
        let (enrolled, other) = store
            .transact(|tx| {
                Ok((
                    can_access_course(tx, &learner, "course_1"),
                    can_access_course(tx, &learner, "course_2"),
                ))
            })
            .unwrap();
        assert!(enrolled);
        assert!(!other);
    }

    #[test]
    fn lookup_failure_fails_closed() {
        let learner = Identity::learner("user_l");
        let admin = Identity::admin("user_a");

        assert!(!can_access_course(&Unreachable, &learner, "course_1"));
        assert!(can_access_course(&Unreachable, &admin, "course_1"));
    }
}

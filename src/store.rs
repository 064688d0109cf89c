//! Persistent store backed by sled
//!
//! All ledger operations reach storage through [`Repository`]. The sled
//! implementation, [`StoreTx`], only exists inside [`Store::transact`], so every
//! operation reads and writes through one serializable transaction: a
//! concurrent commit touching any key the closure read makes sled re-run the
//! closure against fresh data. Every record write reads the enrollment's record
//! index key, which serializes writers of the same enrollment.
//!
//! Secondary indexes live in the `indexes` tree under prefixed keys:
//!
//! - `pair/{learner}/{course}` -> enrollment id
//! - `learner/{learner}` -> CBOR list of enrollment ids
//! - `course/{course}` -> CBOR list of enrollment ids
//! - `enrollment/{enrollment}` -> CBOR list of record ids
//! - `dedup/{digest}` -> record id
use crate::course::Course;
use crate::enrollment::Enrollment;
use crate::error::{LmsError, LmsResult};
use crate::identity::User;
use crate::record::LearningRecord;
use sled::transaction::{
    ConflictableTransactionError, TransactionError, Transactional, TransactionalTree,
};
use sled::{Db, Tree};
use std::path::Path;
use std::sync::Arc;

/// The store operations the ledger depends on.
pub trait Repository {
    fn get_user(&self, id: &str) -> LmsResult<Option<User>>;
    fn get_course(&self, id: &str) -> LmsResult<Option<Course>>;

    fn get_enrollment(&self, id: &str) -> LmsResult<Option<Enrollment>>;
    fn find_enrollment(&self, learner_id: &str, course_id: &str)
    -> LmsResult<Option<Enrollment>>;
    fn put_enrollment(&self, enrollment: &Enrollment) -> LmsResult<()>;
    fn delete_enrollment(&self, id: &str) -> LmsResult<()>;
    fn list_enrollments_by_learner(&self, learner_id: &str) -> LmsResult<Vec<Enrollment>>;
    fn list_enrollments_by_course(&self, course_id: &str) -> LmsResult<Vec<Enrollment>>;

    fn get_record(&self, id: &str) -> LmsResult<Option<LearningRecord>>;
    fn put_record(&self, record: &LearningRecord) -> LmsResult<()>;
    fn delete_record(&self, id: &str) -> LmsResult<()>;
    fn list_records_by_enrollment(&self, enrollment_id: &str)
    -> LmsResult<Vec<LearningRecord>>;

    fn find_dedup(&self, digest: &str) -> LmsResult<Option<String>>;
    fn put_dedup(&self, digest: &str, record_id: &str) -> LmsResult<()>;
    fn delete_dedup(&self, digest: &str) -> LmsResult<()>;
}

pub struct Store {
    db: Arc<Db>,
    users: Tree,
    courses: Tree,
    enrollments: Tree,
    records: Tree,
    indexes: Tree,
}

impl Store {
    pub fn new(db: Arc<Db>) -> LmsResult<Self> {
        Ok(Self {
            users: db.open_tree("users")?,
            courses: db.open_tree("courses")?,
            enrollments: db.open_tree("enrollments")?,
            records: db.open_tree("records")?,
            indexes: db.open_tree("indexes")?,
            db,
        })
    }

    pub fn open(path: impl AsRef<Path>) -> LmsResult<Self> {
        Self::new(Arc::new(sled::open(path)?))
    }

    /// A throwaway store removed when dropped.
    pub fn temporary() -> LmsResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::new(Arc::new(db))
    }

    // users and courses are provisioned by collaborators outside the ledger
    pub fn put_user(&self, user: &User) -> LmsResult<()> {
        self.users
            .insert(user.id.as_bytes(), minicbor::to_vec(user)?)?;
        Ok(())
    }

    pub fn put_course(&self, course: &Course) -> LmsResult<()> {
        self.courses
            .insert(course.id.as_bytes(), minicbor::to_vec(course)?)?;
        Ok(())
    }

    pub fn flush(&self) -> LmsResult<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Run `f` inside one transaction over every tree.
    ///
    /// `f` may run more than once when it loses a race, so it must not have
    /// side effects outside the transaction. Returning an error aborts and
    /// discards all writes made by `f`.
    pub fn transact<T, F>(&self, f: F) -> LmsResult<T>
    where
        F: Fn(&StoreTx<'_>) -> LmsResult<T>,
    {
        let result = (
            &self.users,
            &self.courses,
            &self.enrollments,
            &self.records,
            &self.indexes,
        )
            .transaction(|(users, courses, enrollments, records, indexes)| {
                let tx = StoreTx {
                    users,
                    courses,
                    enrollments,
                    records,
                    indexes,
                };
                f(&tx).map_err(|err| match err {
                    LmsError::Interrupted(inner) => inner.into(),
                    other => ConflictableTransactionError::Abort(other),
                })
            });

        match result {
            Ok(value) => Ok(value),
            Err(TransactionError::Abort(err)) => Err(err),
            Err(TransactionError::Storage(err)) => Err(err.into()),
        }
    }
}

/// Transactional view of the store handed to [`Store::transact`] closures.
pub struct StoreTx<'a> {
    users: &'a TransactionalTree,
    courses: &'a TransactionalTree,
    enrollments: &'a TransactionalTree,
    records: &'a TransactionalTree,
    indexes: &'a TransactionalTree,
}

fn pair_key(learner_id: &str, course_id: &str) -> String {
    format!("pair/{learner_id}/{course_id}")
}

fn learner_key(learner_id: &str) -> String {
    format!("learner/{learner_id}")
}

fn course_key(course_id: &str) -> String {
    format!("course/{course_id}")
}

fn enrollment_key(enrollment_id: &str) -> String {
    format!("enrollment/{enrollment_id}")
}

fn dedup_key(digest: &str) -> String {
    format!("dedup/{digest}")
}

impl StoreTx<'_> {
    fn decode<T>(tree: &TransactionalTree, key: &str) -> LmsResult<Option<T>>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        match tree.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn read_ids(&self, key: &str) -> LmsResult<Vec<String>> {
        Ok(Self::decode::<Vec<String>>(self.indexes, key)?.unwrap_or_default())
    }

    fn write_ids(&self, key: &str, ids: &[String]) -> LmsResult<()> {
        if ids.is_empty() {
            self.indexes.remove(key.as_bytes())?;
        } else {
            self.indexes.insert(key.as_bytes(), minicbor::to_vec(ids)?)?;
        }
        Ok(())
    }

    fn add_id(&self, key: &str, id: &str) -> LmsResult<()> {
        let mut ids = self.read_ids(key)?;
        if !ids.iter().any(|other| other == id) {
            ids.push(id.to_string());
            self.write_ids(key, &ids)?;
        }
        Ok(())
    }

    fn remove_id(&self, key: &str, id: &str) -> LmsResult<()> {
        let mut ids = self.read_ids(key)?;
        ids.retain(|other| other != id);
        self.write_ids(key, &ids)
    }

    fn enrollments_under(&self, key: &str) -> LmsResult<Vec<Enrollment>> {
        let mut enrollments = Vec::new();
        for id in self.read_ids(key)? {
            if let Some(enrollment) = self.get_enrollment(&id)? {
                enrollments.push(enrollment);
            }
        }
        Ok(enrollments)
    }

    fn read_string(&self, key: &str) -> LmsResult<Option<String>> {
        match self.indexes.get(key.as_bytes())? {
            Some(bytes) => String::from_utf8(bytes.to_vec())
                .map(Some)
                .map_err(|e| LmsError::Codec(e.to_string())),
            None => Ok(None),
        }
    }
}

impl Repository for StoreTx<'_> {
    fn get_user(&self, id: &str) -> LmsResult<Option<User>> {
        Self::decode(self.users, id)
    }

    fn get_course(&self, id: &str) -> LmsResult<Option<Course>> {
        Self::decode(self.courses, id)
    }

    fn get_enrollment(&self, id: &str) -> LmsResult<Option<Enrollment>> {
        Self::decode(self.enrollments, id)
    }

    fn find_enrollment(
        &self,
        learner_id: &str,
        course_id: &str,
    ) -> LmsResult<Option<Enrollment>> {
        match self.read_string(&pair_key(learner_id, course_id))? {
            Some(id) => self.get_enrollment(&id),
            None => Ok(None),
        }
    }

    fn put_enrollment(&self, enrollment: &Enrollment) -> LmsResult<()> {
        self.enrollments
            .insert(enrollment.id.as_bytes(), minicbor::to_vec(enrollment)?)?;
        self.indexes.insert(
            pair_key(&enrollment.learner_id, &enrollment.course_id).as_bytes(),
            enrollment.id.as_bytes(),
        )?;
        self.add_id(&learner_key(&enrollment.learner_id), &enrollment.id)?;
        self.add_id(&course_key(&enrollment.course_id), &enrollment.id)
    }

    fn delete_enrollment(&self, id: &str) -> LmsResult<()> {
        let Some(enrollment) = self.get_enrollment(id)? else {
            return Ok(());
        };

        self.indexes
            .remove(pair_key(&enrollment.learner_id, &enrollment.course_id).as_bytes())?;
        self.remove_id(&learner_key(&enrollment.learner_id), id)?;
        self.remove_id(&course_key(&enrollment.course_id), id)?;
        self.indexes.remove(enrollment_key(id).as_bytes())?;
        self.enrollments.remove(id.as_bytes())?;
        Ok(())
    }

    fn list_enrollments_by_learner(&self, learner_id: &str) -> LmsResult<Vec<Enrollment>> {
        self.enrollments_under(&learner_key(learner_id))
    }

    fn list_enrollments_by_course(&self, course_id: &str) -> LmsResult<Vec<Enrollment>> {
        self.enrollments_under(&course_key(course_id))
    }

    fn get_record(&self, id: &str) -> LmsResult<Option<LearningRecord>> {
        Self::decode(self.records, id)
    }

    fn put_record(&self, record: &LearningRecord) -> LmsResult<()> {
        self.records
            .insert(record.id.as_bytes(), minicbor::to_vec(record)?)?;
        self.add_id(&enrollment_key(&record.enrollment_id), &record.id)
    }

    fn delete_record(&self, id: &str) -> LmsResult<()> {
        let Some(record) = self.get_record(id)? else {
            return Ok(());
        };

        self.remove_id(&enrollment_key(&record.enrollment_id), id)?;
        self.records.remove(id.as_bytes())?;
        Ok(())
    }

    fn list_records_by_enrollment(&self, enrollment_id: &str) -> LmsResult<Vec<LearningRecord>> {
        let mut records = Vec::new();
        for id in self.read_ids(&enrollment_key(enrollment_id))? {
            if let Some(record) = self.get_record(&id)? {
                records.push(record);
            }
        }
        records.sort_by(|a, b| a.chronological_cmp(b));
        Ok(records)
    }

    fn find_dedup(&self, digest: &str) -> LmsResult<Option<String>> {
        self.read_string(&dedup_key(digest))
    }

    fn put_dedup(&self, digest: &str, record_id: &str) -> LmsResult<()> {
        self.indexes
            .insert(dedup_key(digest).as_bytes(), record_id.as_bytes())?;
        Ok(())
    }

    fn delete_dedup(&self, digest: &str) -> LmsResult<()> {
        self.indexes.remove(dedup_key(digest).as_bytes())?;
        Ok(())
    }
}

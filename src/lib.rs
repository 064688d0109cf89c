//! Enrollment lifecycle, learning record aggregation and resource scoped
//! authorization for a learning management backend, persisted in sled.
pub mod aggregator;
pub mod clock;
pub mod config;
pub mod course;
pub mod enrollment;
pub mod error;
pub mod guard;
pub mod identity;
pub mod record;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod utils;

pub use aggregator::SessionOutcome;
pub use config::Config;
pub use course::Course;
pub use enrollment::{Enrollment, EnrollmentStatus, ProgressUpdate};
pub use error::{LmsError, LmsResult, TransitionError};
pub use identity::{Identity, Role, User};
pub use record::{LearningRecord, NewLearningRecord, RecordPatch};
pub use service::LmsService;
pub use store::Store;

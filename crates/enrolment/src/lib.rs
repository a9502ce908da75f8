//! Course enrolment calculation.
//!
//! Enrolment for a user/course pair is decided by a set of pluggable
//! providers. Results are cached in user meta and stamped with a calculation
//! version; when the version changes every cached result is considered stale.

pub mod directory;
pub mod error;
pub mod manager;
pub mod provider;

pub use directory::{InMemoryLearnerDirectory, LearnerDirectory};
pub use error::{EnrolmentError, EnrolmentResult};
pub use manager::{
    COURSE_ENROLMENT_META_PREFIX, EnrolmentCalculator, EnrolmentManager,
    LEARNER_CALCULATION_META, SITE_SALT_OPTION_NAME,
};
pub use provider::{EnrolmentProvider, ManualEnrolmentProvider};

use std::sync::Arc;

use enrolsync_enrolment::{EnrolmentCalculator, LearnerDirectory};

/// Collaborators a job needs while running a batch.
#[derive(Clone)]
pub struct JobContext {
    pub calculator: Arc<dyn EnrolmentCalculator>,
    pub directory: Arc<dyn LearnerDirectory>,
}

impl JobContext {
    pub fn new(
        calculator: Arc<dyn EnrolmentCalculator>,
        directory: Arc<dyn LearnerDirectory>,
    ) -> Self {
        Self {
            calculator,
            directory,
        }
    }
}

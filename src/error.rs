use thiserror::Error;

/// Errors surfaced synchronously to the caller of a job manager operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("{0}")]
    Validation(String),

    #[error("An import for this artist is already in progress")]
    ImportInProgress,

    #[error("Job {0} has already finished")]
    JobFinished(String),

    #[error("Job not found")]
    NotFound,
}

impl JobError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "INVALID_JOB_REQUEST",
            Self::ImportInProgress => "IMPORT_IN_PROGRESS",
            Self::JobFinished(_) => "JOB_FINISHED",
            Self::NotFound => "JOB_NOT_FOUND",
        }
    }
}

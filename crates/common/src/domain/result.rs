use depot_resilience::{RateLimitExceeded, RetryError};
use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("No authenticated actor")]
    Unauthenticated,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Illegal transition: {0}")]
    IllegalTransition(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Transition rejected: {0}")]
    TransitionRejected(String),

    #[error("Transient backend failure: {0}")]
    TransientFailure(String),

    #[error("Rate limit exceeded, retry in {retry_after_ms} ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },

    #[error("Change feed error: {0}")]
    ChangeFeedError(String),

    #[error("Repository error: {0}")]
    RepositoryError(#[from] anyhow::Error),
}

impl DomainError {
    /// Network or timeout failures that may succeed when repeated
    pub fn is_transient(&self) -> bool {
        matches!(self, DomainError::TransientFailure(_))
    }

    /// Business rejections decided by the backend; repeating them cannot help
    pub fn is_deterministic_rejection(&self) -> bool {
        matches!(
            self,
            DomainError::DocumentNotFound(_)
                | DomainError::IllegalTransition(_)
                | DomainError::PermissionDenied(_)
                | DomainError::TransitionRejected(_)
        )
    }

    /// Short message suitable for showing to the end user.
    ///
    /// Backend rejection reasons are passed through verbatim; everything
    /// else is reduced to an actionable sentence.
    pub fn user_message(&self) -> String {
        match self {
            DomainError::Unauthenticated => "Your session has expired. Please sign in again.".to_string(),
            DomainError::ValidationError(msg)
            | DomainError::DocumentNotFound(msg)
            | DomainError::IllegalTransition(msg)
            | DomainError::PermissionDenied(msg)
            | DomainError::TransitionRejected(msg) => msg.clone(),
            DomainError::RateLimited { retry_after_ms } => format!(
                "Too many requests. Try again in {} seconds.",
                retry_after_ms.div_ceil(1000).max(1)
            ),
            DomainError::TransientFailure(_) | DomainError::RetryExhausted { .. } => {
                "The server could not be reached. Please try again.".to_string()
            }
            DomainError::ChangeFeedError(_) | DomainError::RepositoryError(_) => {
                "Something went wrong. Please reload the page.".to_string()
            }
        }
    }
}

impl From<RateLimitExceeded> for DomainError {
    fn from(err: RateLimitExceeded) -> Self {
        DomainError::RateLimited {
            retry_after_ms: err.retry_after.as_millis() as u64,
        }
    }
}

impl From<RetryError<DomainError>> for DomainError {
    fn from(err: RetryError<DomainError>) -> Self {
        DomainError::RetryExhausted {
            attempts: err.attempts,
            last_error: err.last_message(),
        }
    }
}

use crate::domain::document::DocumentTransition;
use crate::domain::result::{DomainError, DomainResult};
use async_trait::async_trait;
use garde::Validate;

/// Input for a single lifecycle transition on a document
#[derive(Debug, Clone, PartialEq, Eq, Validate)]
pub struct TransitionRequest {
    #[garde(length(min = 1))]
    pub document_id: String,

    #[garde(skip)]
    pub transition: DocumentTransition,

    #[garde(length(min = 1))]
    pub actor_id: String,
}

impl TransitionRequest {
    pub fn new(
        document_id: impl Into<String>,
        transition: DocumentTransition,
        actor_id: impl Into<String>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            transition,
            actor_id: actor_id.into(),
        }
    }

    /// Check field constraints before anything is sent to the backend
    pub fn validate_request(&self) -> DomainResult<()> {
        self.validate().map_err(|report| {
            let problems = report
                .iter()
                .map(|(path, error)| match path.to_string() {
                    p if p.is_empty() => error.message().to_string(),
                    p => format!("{} {}", p, error.message()),
                })
                .collect::<Vec<_>>();
            DomainError::ValidationError(problems.join("; "))
        })
    }
}

/// Authoritative backend operation that applies a transition atomically.
///
/// Implementations must return a deterministic rejection
/// ([`DomainError::is_deterministic_rejection`]) when the backend refuses the
/// transition, and [`DomainError::TransientFailure`] when the outcome is
/// unknown because the call did not complete.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait TransitionOracle: Send + Sync {
    async fn execute(&self, request: &TransitionRequest) -> DomainResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_request_passes() {
        let request = TransitionRequest::new("doc-1", DocumentTransition::ConfirmDispatch, "user-1");
        assert!(request.validate_request().is_ok());
    }

    #[test]
    fn test_empty_document_id_is_rejected() {
        let request = TransitionRequest::new("", DocumentTransition::RequestDispatch, "user-1");
        match request.validate_request() {
            Err(DomainError::ValidationError(msg)) => assert!(msg.contains("document_id")),
            other => panic!("Expected ValidationError, got {:?}", other),
        }
    }

    #[test]
    fn test_all_problems_are_reported() {
        let request = TransitionRequest::new("", DocumentTransition::RejectDispatch, "");
        match request.validate_request() {
            Err(DomainError::ValidationError(msg)) => {
                assert!(msg.contains("document_id"));
                assert!(msg.contains("actor_id"));
            }
            other => panic!("Expected ValidationError, got {:?}", other),
        }
    }
}

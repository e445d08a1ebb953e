use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a shipment document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Stored,
    RequestDispatch,
    ConfirmedDispatch,
}

impl DocumentStatus {
    pub const ALL: [DocumentStatus; 3] = [
        DocumentStatus::Stored,
        DocumentStatus::RequestDispatch,
        DocumentStatus::ConfirmedDispatch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Stored => "stored",
            DocumentStatus::RequestDispatch => "request_dispatch",
            DocumentStatus::ConfirmedDispatch => "confirmed_dispatch",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocumentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown document status: {}", s))
    }
}

/// Lifecycle operations a user can request on a document.
///
/// The legal-transition table lives in the backend. The source and target
/// statuses describe the intended edge for reporting; they are never used to
/// refuse a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentTransition {
    RequestDispatch,
    ConfirmDispatch,
    RejectDispatch,
}

impl DocumentTransition {
    pub const ALL: [DocumentTransition; 3] = [
        DocumentTransition::RequestDispatch,
        DocumentTransition::ConfirmDispatch,
        DocumentTransition::RejectDispatch,
    ];

    /// Name of the backend procedure that performs this transition
    pub fn procedure_name(&self) -> &'static str {
        match self {
            DocumentTransition::RequestDispatch => "request_dispatch",
            DocumentTransition::ConfirmDispatch => "confirm_dispatch",
            DocumentTransition::RejectDispatch => "reject_dispatch",
        }
    }

    pub fn source_status(&self) -> DocumentStatus {
        match self {
            DocumentTransition::RequestDispatch => DocumentStatus::Stored,
            DocumentTransition::ConfirmDispatch | DocumentTransition::RejectDispatch => {
                DocumentStatus::RequestDispatch
            }
        }
    }

    pub fn target_status(&self) -> DocumentStatus {
        match self {
            DocumentTransition::RequestDispatch => DocumentStatus::RequestDispatch,
            DocumentTransition::ConfirmDispatch => DocumentStatus::ConfirmedDispatch,
            DocumentTransition::RejectDispatch => DocumentStatus::Stored,
        }
    }
}

impl fmt::Display for DocumentTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.procedure_name())
    }
}

impl FromStr for DocumentTransition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocumentTransition::ALL
            .into_iter()
            .find(|transition| transition.procedure_name() == s)
            .ok_or_else(|| format!("unknown transition: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_wire_name() {
        for status in DocumentStatus::ALL {
            assert_eq!(status.as_str().parse::<DocumentStatus>(), Ok(status));
        }
        assert!("shipped".parse::<DocumentStatus>().is_err());
    }

    #[test]
    fn test_transition_parses_from_procedure_name() {
        assert_eq!(
            "reject_dispatch".parse::<DocumentTransition>(),
            Ok(DocumentTransition::RejectDispatch)
        );
        assert!("ship".parse::<DocumentTransition>().is_err());
    }

    #[test]
    fn test_status_serde_uses_snake_case() {
        let json = serde_json::to_string(&DocumentStatus::ConfirmedDispatch).unwrap();
        assert_eq!(json, "\"confirmed_dispatch\"");
    }

    #[test]
    fn test_transition_edges_form_the_dispatch_lifecycle() {
        assert_eq!(
            DocumentTransition::RequestDispatch.target_status(),
            DocumentTransition::ConfirmDispatch.source_status()
        );
        assert_eq!(
            DocumentTransition::RejectDispatch.target_status(),
            DocumentStatus::Stored
        );
        assert!(DocumentTransition::ALL
            .iter()
            .all(|t| t.source_status() != t.target_status()));
    }
}

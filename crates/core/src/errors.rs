use thiserror::Error;

use crate::approvals::validation::WorkflowValidationFailure;
use crate::domain::approval::ApprovalStatus;

/// Failures raised by the engine itself: configuration shape and decision policy.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    InvalidWorkflow(#[from] WorkflowValidationFailure),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("user `{user_id}` requested this transition and self-approval is not allowed")]
    ForbiddenDecision { user_id: String },
    #[error("user `{user_id}` is not an approver for level {level}")]
    NotAnApprover { user_id: String, level: u32 },
    #[error("user `{user_id}` already recorded a decision at level {level}")]
    DuplicateDecision { user_id: String, level: u32 },
    #[error("request is no longer pending (status `{}`)", status.as_str())]
    RequestNotPending { status: ApprovalStatus },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("an active workflow already guards this transition: `{existing_workflow_id}`")]
    ConflictingWorkflow { existing_workflow_id: String },
    #[error(
        "{count} active workflows guard `{from_stage}` -> `{to_stage}` in organization `{org_id}`"
    )]
    ConfigurationConflict { org_id: String, from_stage: String, to_stage: String, count: usize },
    #[error("workflow `{workflow_id}` still governs {pending} pending requests")]
    WorkflowInUse { workflow_id: String, pending: u64 },
    #[error("request `{request_id}` was modified concurrently")]
    ConcurrentModification { request_id: String },
    #[error("persistence failure: {0}")]
    Persistence(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("unauthorized: {message}")]
    Unauthorized { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, existing_workflow_id: Option<String>, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

const UNASSIGNED: &str = "unassigned";

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Unauthorized { .. } => "Sign in to continue.",
            Self::Forbidden { .. } => "You do not have permission to perform this action.",
            Self::NotFound { .. } => "The requested item could not be found.",
            Self::Conflict { .. } => {
                "The request conflicts with the current state. Refresh and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    /// HTTP-equivalent status for transports that speak HTTP.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest { .. } => 400,
            Self::Unauthorized { .. } => 401,
            Self::Forbidden { .. } => 403,
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } => 409,
            Self::ServiceUnavailable { .. } => 503,
            Self::Internal { .. } => 500,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest { message, .. }
            | Self::Unauthorized { message, .. }
            | Self::Forbidden { message, .. }
            | Self::NotFound { message, .. }
            | Self::Conflict { message, .. }
            | Self::ServiceUnavailable { message, .. }
            | Self::Internal { message, .. } => message,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Unauthorized { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }

    fn set_correlation_id(&mut self, value: String) {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Unauthorized { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => *correlation_id = value,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let mut mapped = InterfaceError::from(self);
        mapped.set_correlation_id(correlation_id.into());
        mapped
    }

    /// Integrity faults are logged server-side and reported generically.
    pub fn is_server_fault(&self) -> bool {
        matches!(
            self,
            Self::ConfigurationConflict { .. }
                | Self::Persistence(_)
                | Self::Domain(DomainError::InvariantViolation(_))
        )
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = UNASSIGNED.to_owned();
        match value {
            ApplicationError::Domain(error) => match error {
                DomainError::InvalidWorkflow(_)
                | DomainError::Validation(_)
                | DomainError::RequestNotPending { .. } => {
                    Self::BadRequest { message: error.to_string(), correlation_id }
                }
                DomainError::ForbiddenDecision { .. } | DomainError::NotAnApprover { .. } => {
                    Self::Forbidden { message: error.to_string(), correlation_id }
                }
                DomainError::DuplicateDecision { .. } => {
                    Self::Conflict {
                        message: error.to_string(),
                        existing_workflow_id: None,
                        correlation_id,
                    }
                }
                DomainError::InvariantViolation(_) => Self::Internal {
                    message: "approval state is inconsistent".to_owned(),
                    correlation_id,
                },
            },
            ApplicationError::Unauthorized(message) => Self::Unauthorized { message, correlation_id },
            ApplicationError::Forbidden(message) => Self::Forbidden { message, correlation_id },
            error @ ApplicationError::NotFound { .. } => {
                Self::NotFound { message: error.to_string(), correlation_id }
            }
            ApplicationError::ConflictingWorkflow { existing_workflow_id } => Self::Conflict {
                message: "an active workflow already guards this stage transition".to_owned(),
                existing_workflow_id: Some(existing_workflow_id),
                correlation_id,
            },
            error @ ApplicationError::WorkflowInUse { .. } => Self::Conflict {
                message: format!("{error}; deactivate it instead"),
                existing_workflow_id: None,
                correlation_id,
            },
            error @ ApplicationError::ConcurrentModification { .. } => Self::Conflict {
                message: format!("{error}; reload and try again"),
                existing_workflow_id: None,
                correlation_id,
            },
            ApplicationError::ConfigurationConflict { .. } => Self::Internal {
                message: "approval configuration could not be resolved".to_owned(),
                correlation_id,
            },
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::approvals::validation::WorkflowValidationFailure;
    use crate::domain::approval::ApprovalStatus;
    use crate::errors::{ApplicationError, DomainError, InterfaceError};

    #[test]
    fn validation_error_maps_to_bad_request_with_correlation_id() {
        let interface = ApplicationError::from(DomainError::Validation(
            "a rejection reason is required".to_owned(),
        ))
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest { ref correlation_id, ref message }
                if correlation_id == "req-1" && message.contains("rejection reason")
        ));
        assert_eq!(interface.status_code(), 400);
    }

    #[test]
    fn malformed_chain_is_a_bad_request() {
        let interface =
            ApplicationError::from(DomainError::from(WorkflowValidationFailure::EmptyChain))
                .into_interface("req-2");

        assert_eq!(interface.status_code(), 400);
        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn decision_policy_failures_map_to_forbidden() {
        let self_approval = ApplicationError::from(DomainError::ForbiddenDecision {
            user_id: "u-1".to_owned(),
        })
        .into_interface("req-3");
        let not_approver = ApplicationError::from(DomainError::NotAnApprover {
            user_id: "u-2".to_owned(),
            level: 2,
        })
        .into_interface("req-3");

        assert_eq!(self_approval.status_code(), 403);
        assert_eq!(not_approver.status_code(), 403);
    }

    #[test]
    fn finished_request_is_a_validation_failure_and_duplicate_is_a_conflict() {
        let finished = ApplicationError::from(DomainError::RequestNotPending {
            status: ApprovalStatus::Approved,
        })
        .into_interface("req-3b");
        let duplicate = ApplicationError::from(DomainError::DuplicateDecision {
            user_id: "u-1".to_owned(),
            level: 1,
        })
        .into_interface("req-3b");

        assert_eq!(finished.status_code(), 400);
        assert!(finished.message().contains("no longer pending"));
        assert_eq!(duplicate.status_code(), 409);
    }

    #[test]
    fn conflicting_workflow_carries_existing_id() {
        let interface = ApplicationError::ConflictingWorkflow {
            existing_workflow_id: "WF-existing".to_owned(),
        }
        .into_interface("req-4");

        assert!(matches!(
            interface,
            InterfaceError::Conflict { existing_workflow_id: Some(ref id), .. } if id == "WF-existing"
        ));
        assert_eq!(interface.status_code(), 409);
    }

    #[test]
    fn configuration_conflict_is_reported_generically() {
        let error = ApplicationError::ConfigurationConflict {
            org_id: "org-secret".to_owned(),
            from_stage: "drafting".to_owned(),
            to_stage: "submitted".to_owned(),
            count: 2,
        };
        assert!(error.is_server_fault());

        let interface = error.into_interface("req-5");
        assert_eq!(interface.status_code(), 500);
        assert!(!interface.message().contains("org-secret"));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface =
            ApplicationError::Persistence("database lock timeout".to_owned()).into_interface("req-6");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(interface.correlation_id(), "req-6");
    }
}

pub mod approvals;
pub mod config;
pub mod domain;
pub mod errors;
pub mod events;

pub use approvals::{
    ApprovalEngine, ApprovalService, ApprovalStore, OperationContext, ServiceSettings, StoreError,
    Transition, WorkflowValidationFailure,
};
pub use domain::approval::{ApprovalDecision, ApprovalId, ApprovalRequest, ApprovalStatus, Decision};
pub use domain::identity::{Actor, GrantId, OrgId, OrgRole, Stage, UserId};
pub use domain::workflow::{ApprovalLevel, ApprovalWorkflow, WorkflowId};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use events::{ApprovalEvent, ApprovalEventKind, ApprovalEventSink, InMemoryEventSink};

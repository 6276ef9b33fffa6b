//! Multi-level approval workflows guarding grant stage transitions.
//!
//! [`engine::ApprovalEngine`] is the pure evaluator, [`service::ApprovalService`]
//! drives it against an [`store::ApprovalStore`] and emits outcome events.

pub mod engine;
pub mod service;
pub mod store;
pub mod validation;

pub use engine::{ApprovalEngine, DecisionInput, DecisionOutcome, InitiationPlan, Transition};
pub use service::{
    ApprovalService, DecisionCommand, DecisionResult, InitiationResult, NewApprovalRequest,
    OperationContext, RequestQuery, RequestView, ServiceSettings,
};
pub use store::{
    ApprovalStore, RequestCommit, RequestFilter, StageTransition, StoreError, WorkflowDeletion,
};
pub use validation::WorkflowValidationFailure;

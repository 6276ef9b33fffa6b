use async_trait::async_trait;
use thiserror::Error;

use crate::domain::approval::{ApprovalDecision, ApprovalId, ApprovalRequest, ApprovalStatus};
use crate::domain::identity::{GrantId, OrgId, Stage};
use crate::domain::workflow::{ApprovalWorkflow, WorkflowId};
use crate::errors::ApplicationError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("request `{request_id}` is no longer at version {expected}")]
    VersionConflict { request_id: String, expected: u32 },
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
    #[error("store backend failure: {0}")]
    Backend(String),
}

impl From<StoreError> for ApplicationError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::VersionConflict { request_id, .. } => {
                Self::ConcurrentModification { request_id }
            }
            other => Self::Persistence(other.to_string()),
        }
    }
}

/// Move of a grant between two pipeline columns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageTransition {
    pub org_id: OrgId,
    pub grant_id: GrantId,
    pub from_stage: Stage,
    pub to_stage: Stage,
}

impl StageTransition {
    pub fn for_request(request: &ApprovalRequest) -> Self {
        Self {
            org_id: request.org_id.clone(),
            grant_id: request.grant_id.clone(),
            from_stage: request.from_stage.clone(),
            to_stage: request.to_stage.clone(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestFilter {
    pub status: Option<ApprovalStatus>,
    pub grant_id: Option<GrantId>,
}

/// One read-modify-write of a request. Committed only when the stored
/// version still equals `expected_version`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestCommit {
    pub request: ApprovalRequest,
    pub expected_version: u32,
    pub decision: Option<ApprovalDecision>,
    pub stage: Option<StageTransition>,
}

/// Result of a conditional workflow delete.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkflowDeletion {
    Deleted,
    NotFound,
    /// Left in place because pending requests still reference it.
    InUse { pending: u64 },
}

/// Persistence port for workflows, requests, decisions and grant stages.
///
/// Implementations must make `insert_request` and `commit_request` atomic:
/// either every write in the call lands, or none does.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    async fn find_workflow(
        &self,
        org_id: &OrgId,
        id: &WorkflowId,
    ) -> Result<Option<ApprovalWorkflow>, StoreError>;

    async fn list_workflows(&self, org_id: &OrgId) -> Result<Vec<ApprovalWorkflow>, StoreError>;

    async fn find_active_workflows(
        &self,
        org_id: &OrgId,
        from_stage: &Stage,
        to_stage: &Stage,
    ) -> Result<Vec<ApprovalWorkflow>, StoreError>;

    async fn insert_workflow(&self, workflow: &ApprovalWorkflow) -> Result<(), StoreError>;

    /// Returns `false` when no workflow with this id exists in the organization.
    async fn update_workflow(&self, workflow: &ApprovalWorkflow) -> Result<bool, StoreError>;

    /// Deletes the workflow only while no pending request references it. The
    /// check and the delete are one atomic step.
    async fn delete_workflow(
        &self,
        org_id: &OrgId,
        id: &WorkflowId,
    ) -> Result<WorkflowDeletion, StoreError>;

    async fn count_pending_for_workflow(
        &self,
        org_id: &OrgId,
        id: &WorkflowId,
    ) -> Result<u64, StoreError>;

    /// Loads a request together with its decision history.
    async fn find_request(
        &self,
        org_id: &OrgId,
        id: &ApprovalId,
    ) -> Result<Option<ApprovalRequest>, StoreError>;

    /// Newest first.
    async fn list_requests(
        &self,
        org_id: &OrgId,
        filter: &RequestFilter,
    ) -> Result<Vec<ApprovalRequest>, StoreError>;

    /// Persists a new request with any decisions it already carries, and
    /// applies `stage` in the same unit of work. A second pending request for
    /// the same grant and transition is a `UniqueViolation`.
    async fn insert_request(
        &self,
        request: &ApprovalRequest,
        stage: Option<&StageTransition>,
    ) -> Result<(), StoreError>;

    async fn commit_request(&self, commit: RequestCommit) -> Result<(), StoreError>;

    async fn apply_stage_transition(&self, transition: &StageTransition) -> Result<(), StoreError>;

    async fn grant_stage(
        &self,
        org_id: &OrgId,
        grant_id: &GrantId,
    ) -> Result<Option<Stage>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::StoreError;
    use crate::errors::ApplicationError;

    #[test]
    fn version_conflict_becomes_concurrent_modification() {
        let error = ApplicationError::from(StoreError::VersionConflict {
            request_id: "APR-1".to_string(),
            expected: 3,
        });

        assert_eq!(error, ApplicationError::ConcurrentModification { request_id: "APR-1".to_string() });
    }

    #[test]
    fn backend_failures_become_persistence_errors() {
        let error = ApplicationError::from(StoreError::Backend("disk full".to_string()));

        assert!(matches!(error, ApplicationError::Persistence(message) if message.contains("disk full")));
    }
}

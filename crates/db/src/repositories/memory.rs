use std::collections::HashMap;

use tokio::sync::RwLock;

use grantflow_core::approvals::{
    ApprovalStore, RequestCommit, RequestFilter, StageTransition, StoreError, WorkflowDeletion,
};
use grantflow_core::domain::approval::{ApprovalDecision, ApprovalId, ApprovalRequest};
use grantflow_core::domain::identity::{GrantId, OrgId, Stage};
use grantflow_core::domain::workflow::{ApprovalWorkflow, WorkflowId};

/// Process-local [`ApprovalStore`] for tests and dry runs.
///
/// Unlike the SQL store it does not enforce the one-active-workflow-per-transition
/// index, so callers can observe how the service reacts to duplicate active
/// workflows. It does keep pending requests unique per grant and transition.
#[derive(Default)]
pub struct InMemoryApprovalStore {
    state: RwLock<State>,
}

#[derive(Default)]
struct State {
    workflows: HashMap<String, ApprovalWorkflow>,
    requests: HashMap<String, ApprovalRequest>,
    stages: HashMap<(String, String), Stage>,
}

impl State {
    fn set_stage(&mut self, transition: &StageTransition) {
        self.stages.insert(
            (transition.org_id.0.clone(), transition.grant_id.0.clone()),
            transition.to_stage.clone(),
        );
    }
}

impl InMemoryApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn ensure_unique_decisions(
    existing: &[ApprovalDecision],
    incoming: &ApprovalDecision,
) -> Result<(), StoreError> {
    let duplicate = existing.iter().any(|decision| {
        decision.approver_id == incoming.approver_id && decision.level == incoming.level
    });
    if duplicate {
        return Err(StoreError::UniqueViolation(format!(
            "approval_decision ({}, {}, {})",
            incoming.request_id.0, incoming.approver_id.0, incoming.level
        )));
    }
    Ok(())
}

#[async_trait::async_trait]
impl ApprovalStore for InMemoryApprovalStore {
    async fn find_workflow(
        &self,
        org_id: &OrgId,
        id: &WorkflowId,
    ) -> Result<Option<ApprovalWorkflow>, StoreError> {
        let state = self.state.read().await;
        Ok(state.workflows.get(&id.0).filter(|workflow| &workflow.org_id == org_id).cloned())
    }

    async fn list_workflows(&self, org_id: &OrgId) -> Result<Vec<ApprovalWorkflow>, StoreError> {
        let state = self.state.read().await;
        let mut workflows: Vec<ApprovalWorkflow> = state
            .workflows
            .values()
            .filter(|workflow| &workflow.org_id == org_id)
            .cloned()
            .collect();
        workflows.sort_by(|left, right| {
            right.created_at.cmp(&left.created_at).then_with(|| right.id.0.cmp(&left.id.0))
        });
        Ok(workflows)
    }

    async fn find_active_workflows(
        &self,
        org_id: &OrgId,
        from_stage: &Stage,
        to_stage: &Stage,
    ) -> Result<Vec<ApprovalWorkflow>, StoreError> {
        let mut workflows = self.list_workflows(org_id).await?;
        workflows.retain(|workflow| {
            workflow.is_active
                && &workflow.from_stage == from_stage
                && &workflow.to_stage == to_stage
        });
        Ok(workflows)
    }

    async fn insert_workflow(&self, workflow: &ApprovalWorkflow) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.workflows.contains_key(&workflow.id.0) {
            let key = format!("approval_workflow.id {}", workflow.id.0);
            return Err(StoreError::UniqueViolation(key));
        }
        state.workflows.insert(workflow.id.0.clone(), workflow.clone());
        Ok(())
    }

    async fn update_workflow(&self, workflow: &ApprovalWorkflow) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        match state.workflows.get_mut(&workflow.id.0) {
            Some(stored) if stored.org_id == workflow.org_id => {
                *stored = workflow.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_workflow(
        &self,
        org_id: &OrgId,
        id: &WorkflowId,
    ) -> Result<WorkflowDeletion, StoreError> {
        let mut state = self.state.write().await;
        let owned = state.workflows.get(&id.0).is_some_and(|workflow| &workflow.org_id == org_id);
        if !owned {
            return Ok(WorkflowDeletion::NotFound);
        }
        let pending = state
            .requests
            .values()
            .filter(|request| request.workflow_id.as_ref() == Some(id) && request.is_pending())
            .count() as u64;
        if pending > 0 {
            return Ok(WorkflowDeletion::InUse { pending });
        }
        state.workflows.remove(&id.0);
        for request in state.requests.values_mut() {
            if request.workflow_id.as_ref() == Some(id) {
                request.workflow_id = None;
            }
        }
        Ok(WorkflowDeletion::Deleted)
    }

    async fn count_pending_for_workflow(
        &self,
        org_id: &OrgId,
        id: &WorkflowId,
    ) -> Result<u64, StoreError> {
        let state = self.state.read().await;
        let count = state
            .requests
            .values()
            .filter(|request| {
                &request.org_id == org_id
                    && request.workflow_id.as_ref() == Some(id)
                    && request.is_pending()
            })
            .count();
        Ok(count as u64)
    }

    async fn find_request(
        &self,
        org_id: &OrgId,
        id: &ApprovalId,
    ) -> Result<Option<ApprovalRequest>, StoreError> {
        let state = self.state.read().await;
        Ok(state.requests.get(&id.0).filter(|request| &request.org_id == org_id).cloned())
    }

    async fn list_requests(
        &self,
        org_id: &OrgId,
        filter: &RequestFilter,
    ) -> Result<Vec<ApprovalRequest>, StoreError> {
        let state = self.state.read().await;
        let mut requests: Vec<ApprovalRequest> = state
            .requests
            .values()
            .filter(|request| &request.org_id == org_id)
            .filter(|request| filter.status.map_or(true, |status| request.status == status))
            .filter(|request| filter.grant_id.as_ref().map_or(true, |id| &request.grant_id == id))
            .cloned()
            .collect();
        requests.sort_by(|left, right| {
            right.requested_at.cmp(&left.requested_at).then_with(|| right.id.0.cmp(&left.id.0))
        });
        Ok(requests)
    }

    async fn insert_request(
        &self,
        request: &ApprovalRequest,
        stage: Option<&StageTransition>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.requests.contains_key(&request.id.0) {
            let key = format!("approval_request.id {}", request.id.0);
            return Err(StoreError::UniqueViolation(key));
        }
        for (index, decision) in request.decisions.iter().enumerate() {
            ensure_unique_decisions(&request.decisions[..index], decision)?;
        }
        if request.is_pending() {
            let taken = state.requests.values().any(|other| {
                other.is_pending()
                    && other.org_id == request.org_id
                    && other.grant_id == request.grant_id
                    && other.from_stage == request.from_stage
                    && other.to_stage == request.to_stage
            });
            if taken {
                return Err(StoreError::UniqueViolation(format!(
                    "approval_request pending ({}, {} -> {})",
                    request.grant_id.0, request.from_stage.0, request.to_stage.0
                )));
            }
        }

        state.requests.insert(request.id.0.clone(), request.clone());
        if let Some(stage) = stage {
            state.set_stage(stage);
        }
        Ok(())
    }

    async fn commit_request(&self, commit: RequestCommit) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let RequestCommit { mut request, expected_version, decision, stage } = commit;

        let stored = state
            .requests
            .get(&request.id.0)
            .filter(|stored| stored.org_id == request.org_id)
            .filter(|stored| stored.version == expected_version)
            .ok_or_else(|| StoreError::VersionConflict {
                request_id: request.id.0.clone(),
                expected: expected_version,
            })?;

        let mut decisions = stored.decisions.clone();
        if let Some(decision) = decision {
            ensure_unique_decisions(&decisions, &decision)?;
            decisions.push(decision);
        }
        request.decisions = decisions;

        state.requests.insert(request.id.0.clone(), request);
        if let Some(stage) = &stage {
            state.set_stage(stage);
        }
        Ok(())
    }

    async fn apply_stage_transition(&self, transition: &StageTransition) -> Result<(), StoreError> {
        self.state.write().await.set_stage(transition);
        Ok(())
    }

    async fn grant_stage(
        &self,
        org_id: &OrgId,
        grant_id: &GrantId,
    ) -> Result<Option<Stage>, StoreError> {
        let state = self.state.read().await;
        Ok(state.stages.get(&(org_id.0.clone(), grant_id.0.clone())).cloned())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use grantflow_core::approvals::{
        ApprovalStore, RequestCommit, RequestFilter, StageTransition, StoreError, WorkflowDeletion,
    };
    use grantflow_core::domain::approval::{
        ApprovalDecision, ApprovalId, ApprovalRequest, ApprovalStatus, Decision, DecisionId,
        DecisionSource,
    };
    use grantflow_core::domain::identity::{GrantId, OrgId, OrgRole, Stage, UserId};
    use grantflow_core::domain::workflow::{ApprovalLevel, ApprovalWorkflow, WorkflowId};

    use super::InMemoryApprovalStore;

    fn workflow(id: &str) -> ApprovalWorkflow {
        let now = Utc::now();
        ApprovalWorkflow {
            id: WorkflowId(id.to_string()),
            org_id: OrgId("org-1".to_string()),
            name: "Admin sign-off".to_string(),
            description: None,
            from_stage: Stage::new("drafting"),
            to_stage: Stage::new("submitted"),
            approval_chain: vec![ApprovalLevel::for_role(1, OrgRole::Admin, 1)],
            is_active: true,
            require_all_levels: true,
            allow_self_approval: false,
            auto_approve_admin: false,
            created_by: UserId("u-admin".to_string()),
            created_at: now,
            updated_at: now,
        }
    }

    fn request(id: &str) -> ApprovalRequest {
        ApprovalRequest {
            id: ApprovalId(id.to_string()),
            org_id: OrgId("org-1".to_string()),
            workflow_id: Some(WorkflowId("WF-1".to_string())),
            grant_id: GrantId("grant-1".to_string()),
            from_stage: Stage::new("drafting"),
            to_stage: Stage::new("submitted"),
            requested_by: UserId("u-writer".to_string()),
            requested_at: Utc::now(),
            request_notes: None,
            status: ApprovalStatus::Pending,
            current_level: 1,
            rejection_reason: None,
            completed_at: None,
            version: 1,
            decisions: Vec::new(),
        }
    }

    fn approval_by(request_id: &str, approver: &str) -> ApprovalDecision {
        ApprovalDecision {
            id: DecisionId(format!("DEC-{approver}")),
            request_id: ApprovalId(request_id.to_string()),
            approver_id: UserId(approver.to_string()),
            decision: Decision::Approved,
            comments: None,
            level: 1,
            source: DecisionSource::Human,
            decided_at: Utc::now(),
        }
    }

    fn approved(mut request: ApprovalRequest) -> ApprovalRequest {
        request.status = ApprovalStatus::Approved;
        request.completed_at = Some(Utc::now());
        request.version += 1;
        request
    }

    #[tokio::test]
    async fn duplicate_active_workflows_are_stored_as_is() {
        let store = InMemoryApprovalStore::new();
        store.insert_workflow(&workflow("WF-1")).await.expect("first");
        store.insert_workflow(&workflow("WF-2")).await.expect("second");

        let org = OrgId("org-1".to_string());
        let active = store
            .find_active_workflows(&org, &Stage::new("drafting"), &Stage::new("submitted"))
            .await
            .expect("active");
        assert_eq!(active.len(), 2);

        let error = store.insert_workflow(&workflow("WF-1")).await.expect_err("same id");
        assert!(matches!(error, StoreError::UniqueViolation(_)));
    }

    #[tokio::test]
    async fn reads_are_scoped_to_the_organization() {
        let store = InMemoryApprovalStore::new();
        store.insert_workflow(&workflow("WF-1")).await.expect("workflow");
        store.insert_request(&request("APR-1"), None).await.expect("request");

        let other = OrgId("org-2".to_string());
        assert_eq!(
            store.find_workflow(&other, &WorkflowId("WF-1".to_string())).await.expect("find"),
            None
        );
        assert_eq!(
            store.find_request(&other, &ApprovalId("APR-1".to_string())).await.expect("find"),
            None
        );
        let listed = store.list_requests(&other, &RequestFilter::default()).await.expect("list");
        assert!(listed.is_empty());
        let deleted =
            store.delete_workflow(&other, &WorkflowId("WF-1".to_string())).await.expect("delete");
        assert_eq!(deleted, WorkflowDeletion::NotFound);
        let mut foreign = workflow("WF-1");
        foreign.org_id = other;
        assert!(!store.update_workflow(&foreign).await.expect("update"));
    }

    #[tokio::test]
    async fn commit_checks_version_and_applies_stage() {
        let store = InMemoryApprovalStore::new();
        let pending = request("APR-1");
        store.insert_request(&pending, None).await.expect("insert");

        store
            .commit_request(RequestCommit {
                request: approved(pending.clone()),
                expected_version: 1,
                decision: Some(approval_by("APR-1", "u-admin")),
                stage: Some(StageTransition::for_request(&pending)),
            })
            .await
            .expect("commit");

        let stored = store
            .find_request(&pending.org_id, &pending.id)
            .await
            .expect("find")
            .expect("request exists");
        assert_eq!(stored.status, ApprovalStatus::Approved);
        assert_eq!(stored.version, 2);
        assert_eq!(stored.decisions.len(), 1);
        assert_eq!(
            store.grant_stage(&pending.org_id, &pending.grant_id).await.expect("stage"),
            Some(Stage::new("submitted"))
        );

        let stale = store
            .commit_request(RequestCommit {
                request: approved(pending.clone()),
                expected_version: 1,
                decision: None,
                stage: None,
            })
            .await
            .expect_err("stale version");
        assert_eq!(
            stale,
            StoreError::VersionConflict { request_id: "APR-1".to_string(), expected: 1 }
        );
    }

    #[tokio::test]
    async fn repeated_decision_at_same_level_is_rejected() {
        let store = InMemoryApprovalStore::new();
        let mut pending = request("APR-1");
        pending.decisions.push(approval_by("APR-1", "u-admin"));
        store.insert_request(&pending, None).await.expect("insert");

        let mut next = pending.clone();
        next.version = 2;
        let error = store
            .commit_request(RequestCommit {
                request: next,
                expected_version: 1,
                decision: Some(approval_by("APR-1", "u-admin")),
                stage: None,
            })
            .await
            .expect_err("duplicate");

        assert!(matches!(error, StoreError::UniqueViolation(_)));
        let stored = store
            .find_request(&pending.org_id, &pending.id)
            .await
            .expect("find")
            .expect("request exists");
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn deleting_a_workflow_detaches_its_requests() {
        let store = InMemoryApprovalStore::new();
        let org = OrgId("org-1".to_string());
        let workflow_id = WorkflowId("WF-1".to_string());
        store.insert_workflow(&workflow("WF-1")).await.expect("workflow");

        let mut older = approved(request("APR-1"));
        older.requested_at = Utc::now() - Duration::days(2);
        store.insert_request(&older, None).await.expect("older");
        store.insert_request(&request("APR-2"), None).await.expect("newer");

        assert_eq!(store.count_pending_for_workflow(&org, &workflow_id).await.expect("count"), 1);
        let listed = store.list_requests(&org, &RequestFilter::default()).await.expect("list");
        let ids: Vec<&str> = listed.iter().map(|request| request.id.0.as_str()).collect();
        assert_eq!(ids, vec!["APR-2", "APR-1"]);

        let refused = store.delete_workflow(&org, &workflow_id).await.expect("delete");
        assert_eq!(refused, WorkflowDeletion::InUse { pending: 1 });

        let mut cancelled = request("APR-2");
        cancelled.status = ApprovalStatus::Cancelled;
        cancelled.completed_at = Some(Utc::now());
        cancelled.version = 2;
        store
            .commit_request(RequestCommit {
                request: cancelled,
                expected_version: 1,
                decision: None,
                stage: None,
            })
            .await
            .expect("cancel");

        let deleted = store.delete_workflow(&org, &workflow_id).await.expect("delete");
        assert_eq!(deleted, WorkflowDeletion::Deleted);
        for id in ["APR-1", "APR-2"] {
            let detached = store
                .find_request(&org, &ApprovalId(id.to_string()))
                .await
                .expect("find")
                .expect("request survives");
            assert_eq!(detached.workflow_id, None);
        }
    }

    #[tokio::test]
    async fn one_pending_request_per_grant_and_transition() {
        let store = InMemoryApprovalStore::new();
        store.insert_request(&request("APR-1"), None).await.expect("first");

        let error = store.insert_request(&request("APR-2"), None).await.expect_err("second");
        assert!(matches!(error, StoreError::UniqueViolation(_)));

        let mut other_grant = request("APR-3");
        other_grant.grant_id = GrantId("grant-2".to_string());
        store.insert_request(&other_grant, None).await.expect("other grant");
        store.insert_request(&approved(request("APR-4")), None).await.expect("finished request");
    }
}

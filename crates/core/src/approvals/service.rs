use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::approvals::engine::{ApprovalEngine, DecisionInput, InitiationPlan, Transition};
use crate::approvals::store::{
    ApprovalStore, RequestCommit, RequestFilter, StageTransition, StoreError, WorkflowDeletion,
};
use crate::approvals::validation::{validate_draft, validate_workflow};
use crate::config::ApprovalsConfig;
use crate::domain::approval::{
    ApprovalDecision, ApprovalId, ApprovalRequest, ApprovalStatus, Decision, DecisionId,
    DecisionSource,
};
use crate::domain::identity::{Actor, GrantId, Stage};
use crate::domain::workflow::{ApprovalWorkflow, WorkflowDraft, WorkflowId, WorkflowPatch};
use crate::errors::{ApplicationError, DomainError};
use crate::events::{ApprovalEvent, ApprovalEventKind, ApprovalEventSink};

const AUTO_APPROVAL_COMMENT: &str = "auto-approved: requester is an organization admin";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceSettings {
    pub request_expiry: Duration,
}

impl ServiceSettings {
    pub fn from_config(config: &ApprovalsConfig) -> Self {
        Self { request_expiry: Duration::days(i64::from(config.expiry_days)) }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self::from_config(&ApprovalsConfig::default())
    }
}

/// The trusted caller plus the correlation id threaded through logs and events.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationContext {
    pub actor: Actor,
    pub correlation_id: String,
}

impl OperationContext {
    pub fn new(actor: Actor, correlation_id: impl Into<String>) -> Self {
        Self { actor, correlation_id: correlation_id.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewApprovalRequest {
    pub grant_id: GrantId,
    pub from_stage: Stage,
    pub to_stage: Stage,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiationResult {
    pub applied: bool,
    pub auto_approved: bool,
    pub request: Option<ApprovalRequest>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionCommand {
    pub decision: Decision,
    #[serde(default)]
    pub comments: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionResult {
    pub request: ApprovalRequest,
    /// `advanced | approved | rejected | unchanged`.
    pub transitioned: Transition,
    /// True when the stage move was applied by this decision.
    pub stage_applied: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestQuery {
    #[serde(default)]
    pub status: Option<ApprovalStatus>,
    #[serde(default)]
    pub grant_id: Option<GrantId>,
    #[serde(default)]
    pub pending_for_me: bool,
}

/// A request annotated with its display-only expiry flag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestView {
    #[serde(flatten)]
    pub request: ApprovalRequest,
    pub is_expired: bool,
}

pub struct ApprovalService {
    store: Arc<dyn ApprovalStore>,
    events: Arc<dyn ApprovalEventSink>,
    engine: ApprovalEngine,
    settings: ServiceSettings,
}

impl ApprovalService {
    pub fn new(
        store: Arc<dyn ApprovalStore>,
        events: Arc<dyn ApprovalEventSink>,
        settings: ServiceSettings,
    ) -> Self {
        Self { store, events, engine: ApprovalEngine, settings }
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    /// The single active workflow guarding `from_stage -> to_stage`, if any.
    pub async fn resolve_workflow(
        &self,
        ctx: &OperationContext,
        from_stage: &Stage,
        to_stage: &Stage,
    ) -> Result<Option<ApprovalWorkflow>, ApplicationError> {
        let org_id = &ctx.actor.org_id;
        let mut active = self.store.find_active_workflows(org_id, from_stage, to_stage).await?;

        if active.len() > 1 {
            error!(
                event_name = "approvals.workflow.configuration_conflict",
                correlation_id = %ctx.correlation_id,
                org_id = %org_id.0,
                from_stage = %from_stage.0,
                to_stage = %to_stage.0,
                active_count = active.len(),
                "multiple active workflows guard the same transition"
            );
            return Err(ApplicationError::ConfigurationConflict {
                org_id: org_id.0.clone(),
                from_stage: from_stage.0.clone(),
                to_stage: to_stage.0.clone(),
                count: active.len(),
            });
        }

        Ok(active.pop())
    }

    pub async fn create_request(
        &self,
        ctx: &OperationContext,
        input: NewApprovalRequest,
    ) -> Result<InitiationResult, ApplicationError> {
        if input.grant_id.0.trim().is_empty() {
            return Err(DomainError::Validation("grant_id must not be blank".to_string()).into());
        }
        if input.from_stage.is_blank() || input.to_stage.is_blank() {
            return Err(DomainError::Validation("stages must not be blank".to_string()).into());
        }
        if input.from_stage == input.to_stage {
            return Err(DomainError::Validation(format!(
                "grant is already in stage `{}`",
                input.to_stage.0
            ))
            .into());
        }

        let actor = &ctx.actor;
        let workflow = self.resolve_workflow(ctx, &input.from_stage, &input.to_stage).await?;
        let now = Utc::now();
        let stage = StageTransition {
            org_id: actor.org_id.clone(),
            grant_id: input.grant_id.clone(),
            from_stage: input.from_stage.clone(),
            to_stage: input.to_stage.clone(),
        };

        let plan = self.engine.plan_initiation(workflow.as_ref(), actor.role);
        let (workflow_id, auto_approve) = match plan {
            InitiationPlan::ApplyImmediately => {
                self.store.apply_stage_transition(&stage).await?;
                info!(
                    event_name = "approvals.transition.applied",
                    correlation_id = %ctx.correlation_id,
                    grant_id = %input.grant_id.0,
                    from_stage = %input.from_stage.0,
                    to_stage = %input.to_stage.0,
                    "unguarded stage transition applied"
                );
                self.emit(
                    ApprovalEvent::new(
                        ApprovalEventKind::TransitionApplied,
                        actor.org_id.clone(),
                        &ctx.correlation_id,
                        &actor.user_id.0,
                    )
                    .for_grant(input.grant_id.clone())
                    .with_metadata("from_stage", &input.from_stage.0)
                    .with_metadata("to_stage", &input.to_stage.0),
                );
                return Ok(InitiationResult { applied: true, auto_approved: false, request: None });
            }
            InitiationPlan::AutoApprove { workflow_id } => (workflow_id, true),
            InitiationPlan::AwaitApproval { workflow_id } => (workflow_id, false),
        };

        self.ensure_no_pending_duplicate(ctx, &input).await?;

        let notes = input.notes.map(|notes| notes.trim().to_string()).filter(|n| !n.is_empty());
        let mut request = ApprovalRequest {
            id: ApprovalId(format!("APR-{}", Uuid::new_v4())),
            org_id: actor.org_id.clone(),
            workflow_id: Some(workflow_id.clone()),
            grant_id: input.grant_id,
            from_stage: input.from_stage,
            to_stage: input.to_stage,
            requested_by: actor.user_id.clone(),
            requested_at: now,
            request_notes: notes,
            status: ApprovalStatus::Pending,
            current_level: 1,
            rejection_reason: None,
            completed_at: None,
            version: 1,
            decisions: Vec::new(),
        };

        if auto_approve {
            request.status = ApprovalStatus::Approved;
            request.completed_at = Some(now);
            request.decisions.push(ApprovalDecision {
                id: DecisionId(format!("DEC-{}", Uuid::new_v4())),
                request_id: request.id.clone(),
                approver_id: actor.user_id.clone(),
                decision: Decision::Approved,
                comments: Some(AUTO_APPROVAL_COMMENT.to_string()),
                level: 1,
                source: DecisionSource::Policy,
                decided_at: now,
            });
            self.store.insert_request(&request, Some(&stage)).await?;

            info!(
                event_name = "approvals.request.auto_approved",
                correlation_id = %ctx.correlation_id,
                request_id = %request.id.0,
                workflow_id = %workflow_id.0,
                grant_id = %request.grant_id.0,
                "admin request auto-approved and transition applied"
            );
            self.emit(self.request_event(ApprovalEventKind::RequestAutoApproved, ctx, &request));
            return Ok(InitiationResult {
                applied: true,
                auto_approved: true,
                request: Some(request),
            });
        }

        self.store
            .insert_request(&request, None)
            .await
            .map_err(|error| duplicate_pending(&request, error))?;
        info!(
            event_name = "approvals.request.created",
            correlation_id = %ctx.correlation_id,
            request_id = %request.id.0,
            workflow_id = %workflow_id.0,
            grant_id = %request.grant_id.0,
            "approval request created"
        );
        self.emit(self.request_event(ApprovalEventKind::RequestCreated, ctx, &request));

        Ok(InitiationResult { applied: false, auto_approved: false, request: Some(request) })
    }

    pub async fn record_decision(
        &self,
        ctx: &OperationContext,
        request_id: &ApprovalId,
        command: DecisionCommand,
    ) -> Result<DecisionResult, ApplicationError> {
        let request = self.load_request(ctx, request_id).await?;
        if !request.is_pending() {
            return Err(DomainError::RequestNotPending { status: request.status }.into());
        }
        let workflow = self.governing_workflow(ctx, &request).await?;

        let actor = &ctx.actor;
        let outcome = self.engine.apply_decision(
            &workflow,
            &request,
            DecisionInput {
                decision_id: DecisionId(format!("DEC-{}", Uuid::new_v4())),
                approver_id: actor.user_id.clone(),
                approver_role: actor.role,
                decision: command.decision,
                comments: command.comments,
                decided_at: Utc::now(),
            },
        );
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(
                    event_name = "approvals.decision.refused",
                    correlation_id = %ctx.correlation_id,
                    request_id = %request.id.0,
                    user_id = %actor.user_id.0,
                    error = %error,
                    "decision refused"
                );
                return Err(error.into());
            }
        };

        let transition = outcome.transition;
        let mut updated = outcome.request;
        updated.version = request.version + 1;
        let stage = transition.applies_stage().then(|| StageTransition::for_request(&updated));

        self.store
            .commit_request(RequestCommit {
                request: updated.clone(),
                expected_version: request.version,
                decision: Some(outcome.decision.clone()),
                stage,
            })
            .await
            .map_err(|error| self.commit_failure(ctx, &request, error))?;

        info!(
            event_name = "approvals.decision.recorded",
            correlation_id = %ctx.correlation_id,
            request_id = %updated.id.0,
            user_id = %actor.user_id.0,
            decision = outcome.decision.decision.as_str(),
            level = outcome.decision.level,
            outcome = transition.as_str(),
            "approval decision recorded"
        );
        self.emit(
            self.request_event(ApprovalEventKind::DecisionRecorded, ctx, &updated)
                .with_metadata("decision", outcome.decision.decision.as_str())
                .with_metadata("level", outcome.decision.level.to_string()),
        );

        let follow_up = match transition {
            Transition::Advanced => Some(ApprovalEventKind::RequestAdvanced),
            Transition::Approved => Some(ApprovalEventKind::RequestApproved),
            Transition::Rejected => Some(ApprovalEventKind::RequestRejected),
            Transition::Unchanged => None,
        };
        if let Some(kind) = follow_up {
            let mut event = self
                .request_event(kind, ctx, &updated)
                .with_metadata("current_level", updated.current_level.to_string());
            if let Some(reason) = &updated.rejection_reason {
                event = event.with_metadata("rejection_reason", reason);
            }
            self.emit(event);
        }

        Ok(DecisionResult {
            stage_applied: transition.applies_stage(),
            transitioned: transition,
            request: updated,
        })
    }

    /// Withdraws a pending request. Allowed for the requester and org admins.
    pub async fn cancel_request(
        &self,
        ctx: &OperationContext,
        request_id: &ApprovalId,
    ) -> Result<ApprovalRequest, ApplicationError> {
        let request = self.load_request(ctx, request_id).await?;
        let actor = &ctx.actor;
        if request.requested_by != actor.user_id && !actor.is_admin() {
            return Err(ApplicationError::Forbidden(
                "only the requester or an organization admin can cancel a request".to_string(),
            ));
        }

        let mut cancelled = self.engine.cancel(&request, Utc::now())?;
        cancelled.version = request.version + 1;
        self.store
            .commit_request(RequestCommit {
                request: cancelled.clone(),
                expected_version: request.version,
                decision: None,
                stage: None,
            })
            .await
            .map_err(|error| self.commit_failure(ctx, &request, error))?;

        info!(
            event_name = "approvals.request.cancelled",
            correlation_id = %ctx.correlation_id,
            request_id = %cancelled.id.0,
            user_id = %actor.user_id.0,
            "approval request cancelled"
        );
        self.emit(self.request_event(ApprovalEventKind::RequestCancelled, ctx, &cancelled));

        Ok(cancelled)
    }

    pub async fn get_request(
        &self,
        ctx: &OperationContext,
        request_id: &ApprovalId,
    ) -> Result<RequestView, ApplicationError> {
        let request = self.load_request(ctx, request_id).await?;
        Ok(self.view(request))
    }

    pub async fn list_requests(
        &self,
        ctx: &OperationContext,
        query: RequestQuery,
    ) -> Result<Vec<RequestView>, ApplicationError> {
        let org_id = &ctx.actor.org_id;
        let status =
            if query.pending_for_me { Some(ApprovalStatus::Pending) } else { query.status };
        if query.pending_for_me && query.status.is_some_and(|s| s != ApprovalStatus::Pending) {
            return Ok(Vec::new());
        }

        let filter = RequestFilter { status, grant_id: query.grant_id };
        let requests = self.store.list_requests(org_id, &filter).await?;

        let requests: Vec<ApprovalRequest> = if query.pending_for_me {
            let workflows: HashMap<WorkflowId, ApprovalWorkflow> = self
                .store
                .list_workflows(org_id)
                .await?
                .into_iter()
                .map(|workflow| (workflow.id.clone(), workflow))
                .collect();

            requests
                .into_iter()
                .filter(|request| {
                    request
                        .workflow_id
                        .as_ref()
                        .and_then(|id| workflows.get(id))
                        .map(|workflow| {
                            self.engine.is_actionable_by(
                                workflow,
                                request,
                                &ctx.actor.user_id,
                                ctx.actor.role,
                            )
                        })
                        .unwrap_or(false)
                })
                .collect()
        } else {
            requests
        };

        Ok(requests.into_iter().map(|request| self.view(request)).collect())
    }

    pub async fn create_workflow(
        &self,
        ctx: &OperationContext,
        draft: WorkflowDraft,
    ) -> Result<ApprovalWorkflow, ApplicationError> {
        require_admin(&ctx.actor)?;
        validate_draft(&draft).map_err(DomainError::from)?;

        let now = Utc::now();
        let workflow = ApprovalWorkflow {
            id: WorkflowId(format!("WF-{}", Uuid::new_v4())),
            org_id: ctx.actor.org_id.clone(),
            name: draft.name.trim().to_string(),
            description: draft.description.filter(|value| !value.trim().is_empty()),
            from_stage: draft.from_stage,
            to_stage: draft.to_stage,
            approval_chain: draft.approval_chain,
            is_active: draft.is_active,
            require_all_levels: draft.require_all_levels,
            allow_self_approval: draft.allow_self_approval,
            auto_approve_admin: draft.auto_approve_admin,
            created_by: ctx.actor.user_id.clone(),
            created_at: now,
            updated_at: now,
        };

        if workflow.is_active {
            self.ensure_sole_active(&workflow).await?;
        }
        if let Err(error) = self.store.insert_workflow(&workflow).await {
            return Err(self.activation_failure(&workflow, error).await);
        }

        info!(
            event_name = "approvals.workflow.created",
            correlation_id = %ctx.correlation_id,
            workflow_id = %workflow.id.0,
            from_stage = %workflow.from_stage.0,
            to_stage = %workflow.to_stage.0,
            levels = workflow.approval_chain.len(),
            "approval workflow created"
        );
        self.emit(self.workflow_event(ApprovalEventKind::WorkflowCreated, ctx, &workflow));

        Ok(workflow)
    }

    pub async fn update_workflow(
        &self,
        ctx: &OperationContext,
        workflow_id: &WorkflowId,
        patch: WorkflowPatch,
    ) -> Result<ApprovalWorkflow, ApplicationError> {
        require_admin(&ctx.actor)?;
        if patch.is_empty() {
            return Err(DomainError::Validation("update contains no changes".to_string()).into());
        }

        let previous = self.load_workflow(ctx, workflow_id).await?;
        let mut updated = previous.clone();
        patch.apply_to(&mut updated, Utc::now());
        updated.name = updated.name.trim().to_string();
        validate_workflow(&updated).map_err(DomainError::from)?;

        if updated.approval_chain != previous.approval_chain {
            let pending =
                self.store.count_pending_for_workflow(&updated.org_id, &updated.id).await?;
            if pending > 0 {
                return Err(DomainError::Validation(format!(
                    "approval chain cannot change while {pending} requests are pending"
                ))
                .into());
            }
        }

        let activation_changed = updated.is_active
            && (!previous.is_active
                || updated.from_stage != previous.from_stage
                || updated.to_stage != previous.to_stage);
        if activation_changed {
            self.ensure_sole_active(&updated).await?;
        }
        match self.store.update_workflow(&updated).await {
            Ok(true) => {}
            Ok(false) => return Err(not_found_workflow(workflow_id)),
            Err(error) => return Err(self.activation_failure(&updated, error).await),
        }

        info!(
            event_name = "approvals.workflow.updated",
            correlation_id = %ctx.correlation_id,
            workflow_id = %updated.id.0,
            is_active = updated.is_active,
            "approval workflow updated"
        );
        self.emit(self.workflow_event(ApprovalEventKind::WorkflowUpdated, ctx, &updated));

        Ok(updated)
    }

    /// Deletes a workflow that governs no pending requests.
    pub async fn delete_workflow(
        &self,
        ctx: &OperationContext,
        workflow_id: &WorkflowId,
    ) -> Result<(), ApplicationError> {
        require_admin(&ctx.actor)?;
        let workflow = self.load_workflow(ctx, workflow_id).await?;

        match self.store.delete_workflow(&workflow.org_id, &workflow.id).await? {
            WorkflowDeletion::Deleted => {}
            WorkflowDeletion::NotFound => return Err(not_found_workflow(workflow_id)),
            WorkflowDeletion::InUse { pending } => {
                return Err(ApplicationError::WorkflowInUse {
                    workflow_id: workflow.id.0.clone(),
                    pending,
                });
            }
        }

        info!(
            event_name = "approvals.workflow.deleted",
            correlation_id = %ctx.correlation_id,
            workflow_id = %workflow.id.0,
            "approval workflow deleted"
        );
        self.emit(self.workflow_event(ApprovalEventKind::WorkflowDeleted, ctx, &workflow));

        Ok(())
    }

    pub async fn list_workflows(
        &self,
        ctx: &OperationContext,
        active_only: bool,
    ) -> Result<Vec<ApprovalWorkflow>, ApplicationError> {
        let workflows = self.store.list_workflows(&ctx.actor.org_id).await?;
        Ok(workflows.into_iter().filter(|workflow| !active_only || workflow.is_active).collect())
    }

    pub async fn get_workflow(
        &self,
        ctx: &OperationContext,
        workflow_id: &WorkflowId,
    ) -> Result<ApprovalWorkflow, ApplicationError> {
        self.load_workflow(ctx, workflow_id).await
    }

    async fn load_request(
        &self,
        ctx: &OperationContext,
        request_id: &ApprovalId,
    ) -> Result<ApprovalRequest, ApplicationError> {
        self.store.find_request(&ctx.actor.org_id, request_id).await?.ok_or_else(|| {
            ApplicationError::NotFound { entity: "approval request", id: request_id.0.clone() }
        })
    }

    async fn load_workflow(
        &self,
        ctx: &OperationContext,
        workflow_id: &WorkflowId,
    ) -> Result<ApprovalWorkflow, ApplicationError> {
        self.store
            .find_workflow(&ctx.actor.org_id, workflow_id)
            .await?
            .ok_or_else(|| not_found_workflow(workflow_id))
    }

    async fn governing_workflow(
        &self,
        ctx: &OperationContext,
        request: &ApprovalRequest,
    ) -> Result<ApprovalWorkflow, ApplicationError> {
        let missing = || {
            DomainError::InvariantViolation(format!(
                "pending request `{}` has no governing workflow",
                request.id.0
            ))
        };
        let workflow_id = request.workflow_id.as_ref().ok_or_else(missing)?;
        let workflow = self.store.find_workflow(&request.org_id, workflow_id).await?;

        match workflow {
            Some(workflow) => Ok(workflow),
            None => {
                error!(
                    event_name = "approvals.request.orphaned",
                    correlation_id = %ctx.correlation_id,
                    request_id = %request.id.0,
                    workflow_id = %workflow_id.0,
                    "pending request references a missing workflow"
                );
                Err(missing().into())
            }
        }
    }

    async fn ensure_no_pending_duplicate(
        &self,
        ctx: &OperationContext,
        input: &NewApprovalRequest,
    ) -> Result<(), ApplicationError> {
        let filter = RequestFilter {
            status: Some(ApprovalStatus::Pending),
            grant_id: Some(input.grant_id.clone()),
        };
        let pending = self.store.list_requests(&ctx.actor.org_id, &filter).await?;
        let duplicate = pending.iter().find(|request| {
            request.from_stage == input.from_stage && request.to_stage == input.to_stage
        });

        match duplicate {
            Some(existing) => Err(DomainError::Validation(format!(
                "request `{}` is already pending for this grant and transition",
                existing.id.0
            ))
            .into()),
            None => Ok(()),
        }
    }

    async fn ensure_sole_active(&self, workflow: &ApprovalWorkflow) -> Result<(), ApplicationError> {
        let active = self
            .store
            .find_active_workflows(&workflow.org_id, &workflow.from_stage, &workflow.to_stage)
            .await?;

        match active.into_iter().find(|existing| existing.id != workflow.id) {
            Some(existing) => {
                Err(ApplicationError::ConflictingWorkflow { existing_workflow_id: existing.id.0 })
            }
            None => Ok(()),
        }
    }

    /// Maps a failed workflow write. A unique violation means another active
    /// workflow won the race for the same transition.
    async fn activation_failure(
        &self,
        workflow: &ApprovalWorkflow,
        error: StoreError,
    ) -> ApplicationError {
        if !matches!(error, StoreError::UniqueViolation(_)) {
            return error.into();
        }

        match self.ensure_sole_active(workflow).await {
            Err(conflict) => conflict,
            Ok(()) => error.into(),
        }
    }

    fn commit_failure(
        &self,
        ctx: &OperationContext,
        request: &ApprovalRequest,
        error: StoreError,
    ) -> ApplicationError {
        match &error {
            StoreError::VersionConflict { expected, .. } => warn!(
                event_name = "approvals.request.version_conflict",
                correlation_id = %ctx.correlation_id,
                request_id = %request.id.0,
                expected_version = *expected,
                "request changed since it was read"
            ),
            StoreError::UniqueViolation(_) => {
                return DomainError::DuplicateDecision {
                    user_id: ctx.actor.user_id.0.clone(),
                    level: request.current_level,
                }
                .into();
            }
            StoreError::Backend(_) => {}
        }
        error.into()
    }

    fn view(&self, request: ApprovalRequest) -> RequestView {
        let is_expired = request.is_expired(Utc::now(), self.settings.request_expiry);
        RequestView { request, is_expired }
    }

    fn request_event(
        &self,
        kind: ApprovalEventKind,
        ctx: &OperationContext,
        request: &ApprovalRequest,
    ) -> ApprovalEvent {
        ApprovalEvent::new(kind, request.org_id.clone(), &ctx.correlation_id, &ctx.actor.user_id.0)
            .for_request(request.id.clone(), request.grant_id.clone())
            .for_workflow(request.workflow_id.clone())
            .with_metadata("from_stage", &request.from_stage.0)
            .with_metadata("to_stage", &request.to_stage.0)
            .with_metadata("requested_by", &request.requested_by.0)
            .with_metadata("status", request.status.as_str())
    }

    fn workflow_event(
        &self,
        kind: ApprovalEventKind,
        ctx: &OperationContext,
        workflow: &ApprovalWorkflow,
    ) -> ApprovalEvent {
        ApprovalEvent::new(kind, workflow.org_id.clone(), &ctx.correlation_id, &ctx.actor.user_id.0)
            .for_workflow(Some(workflow.id.clone()))
            .with_metadata("from_stage", &workflow.from_stage.0)
            .with_metadata("to_stage", &workflow.to_stage.0)
            .with_metadata("is_active", workflow.is_active.to_string())
    }

    fn emit(&self, event: ApprovalEvent) {
        self.events.emit(event);
    }
}

fn require_admin(actor: &Actor) -> Result<(), ApplicationError> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(ApplicationError::Forbidden(
            "only organization admins can manage approval workflows".to_string(),
        ))
    }
}

/// A unique violation on insert means a concurrent initiation already holds
/// the pending slot for this grant and transition.
fn duplicate_pending(request: &ApprovalRequest, error: StoreError) -> ApplicationError {
    match error {
        StoreError::UniqueViolation(_) => DomainError::Validation(format!(
            "a request is already pending for grant `{}` from `{}` to `{}`",
            request.grant_id.0, request.from_stage.0, request.to_stage.0
        ))
        .into(),
        other => other.into(),
    }
}

fn not_found_workflow(workflow_id: &WorkflowId) -> ApplicationError {
    ApplicationError::NotFound { entity: "approval workflow", id: workflow_id.0.clone() }
}

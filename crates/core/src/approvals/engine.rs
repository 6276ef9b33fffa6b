use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::approval::{
    ApprovalDecision, ApprovalRequest, ApprovalStatus, Decision, DecisionId, DecisionSource,
};
use crate::domain::identity::{OrgRole, UserId};
use crate::domain::workflow::{ApprovalWorkflow, WorkflowId};
use crate::errors::DomainError;

/// What initiation should do for a requested stage move.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InitiationPlan {
    /// No active workflow guards the move.
    ApplyImmediately,
    /// Admin requester on a workflow with `auto_approve_admin`.
    AutoApprove { workflow_id: WorkflowId },
    AwaitApproval { workflow_id: WorkflowId },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Advanced,
    Approved,
    Rejected,
    Unchanged,
}

impl Transition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Advanced => "advanced",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Unchanged => "unchanged",
        }
    }

    /// Whether the stage move should be applied with this commit.
    pub fn applies_stage(self) -> bool {
        self == Self::Approved
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecisionInput {
    pub decision_id: DecisionId,
    pub approver_id: UserId,
    pub approver_role: OrgRole,
    pub decision: Decision,
    pub comments: Option<String>,
    pub decided_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecisionOutcome {
    pub request: ApprovalRequest,
    pub decision: ApprovalDecision,
    pub transition: Transition,
}

/// Stateless evaluator for approval chains. All persistence and
/// authorization at the boundary live in the service.
#[derive(Clone, Copy, Debug, Default)]
pub struct ApprovalEngine;

impl ApprovalEngine {
    pub fn plan_initiation(
        &self,
        workflow: Option<&ApprovalWorkflow>,
        requester_role: OrgRole,
    ) -> InitiationPlan {
        match workflow {
            None => InitiationPlan::ApplyImmediately,
            Some(workflow) if workflow.auto_approve_admin && requester_role == OrgRole::Admin => {
                InitiationPlan::AutoApprove { workflow_id: workflow.id.clone() }
            }
            Some(workflow) => InitiationPlan::AwaitApproval { workflow_id: workflow.id.clone() },
        }
    }

    /// Evaluates one decision against the request's current level and returns
    /// the updated request. The caller owns version bookkeeping and commit.
    pub fn apply_decision(
        &self,
        workflow: &ApprovalWorkflow,
        request: &ApprovalRequest,
        input: DecisionInput,
    ) -> Result<DecisionOutcome, DomainError> {
        if !request.is_pending() {
            return Err(DomainError::RequestNotPending { status: request.status });
        }

        if request.workflow_id.as_ref() != Some(&workflow.id) {
            return Err(DomainError::InvariantViolation(format!(
                "request `{}` is not governed by workflow `{}`",
                request.id.0, workflow.id.0
            )));
        }

        let level_number = request.current_level;
        let level = workflow.level(level_number).ok_or_else(|| {
            DomainError::InvariantViolation(format!(
                "request `{}` is at level {level_number} but workflow `{}` has {} levels",
                request.id.0,
                workflow.id.0,
                workflow.approval_chain.len()
            ))
        })?;

        if !workflow.allow_self_approval && input.approver_id == request.requested_by {
            return Err(DomainError::ForbiddenDecision { user_id: input.approver_id.0 });
        }

        if !level.qualifies(&input.approver_id, input.approver_role) {
            return Err(DomainError::NotAnApprover {
                user_id: input.approver_id.0,
                level: level_number,
            });
        }

        if request.has_decided_at(&input.approver_id, level_number) {
            return Err(DomainError::DuplicateDecision {
                user_id: input.approver_id.0,
                level: level_number,
            });
        }

        let comments = input
            .comments
            .map(|comments| comments.trim().to_string())
            .filter(|comments| !comments.is_empty());

        if input.decision == Decision::Rejected && comments.is_none() {
            return Err(DomainError::Validation(
                "comments are required when rejecting a request".to_string(),
            ));
        }

        let decision = ApprovalDecision {
            id: input.decision_id,
            request_id: request.id.clone(),
            approver_id: input.approver_id,
            decision: input.decision,
            comments: comments.clone(),
            level: level_number,
            source: DecisionSource::Human,
            decided_at: input.decided_at,
        };

        let mut updated = request.clone();
        updated.decisions.push(decision.clone());

        let transition = match input.decision {
            Decision::Rejected => {
                updated.status = ApprovalStatus::Rejected;
                updated.rejection_reason = comments;
                updated.completed_at = Some(input.decided_at);
                Transition::Rejected
            }
            Decision::Approved => {
                let approvals = updated.approvals_at(level_number);
                if approvals < level.required_approvers as usize {
                    Transition::Unchanged
                } else if !workflow.require_all_levels || level_number >= workflow.final_level() {
                    updated.status = ApprovalStatus::Approved;
                    updated.completed_at = Some(input.decided_at);
                    Transition::Approved
                } else {
                    updated.current_level = level_number + 1;
                    Transition::Advanced
                }
            }
        };

        Ok(DecisionOutcome { request: updated, decision, transition })
    }

    /// Marks a pending request cancelled.
    pub fn cancel(
        &self,
        request: &ApprovalRequest,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest, DomainError> {
        if !request.is_pending() {
            return Err(DomainError::RequestNotPending { status: request.status });
        }

        let mut updated = request.clone();
        updated.status = ApprovalStatus::Cancelled;
        updated.completed_at = Some(now);
        Ok(updated)
    }

    /// True when `user_id` could record a decision on `request` right now.
    pub fn is_actionable_by(
        &self,
        workflow: &ApprovalWorkflow,
        request: &ApprovalRequest,
        user_id: &UserId,
        role: OrgRole,
    ) -> bool {
        if !request.is_pending() || request.workflow_id.as_ref() != Some(&workflow.id) {
            return false;
        }
        if !workflow.allow_self_approval && &request.requested_by == user_id {
            return false;
        }

        workflow
            .level(request.current_level)
            .map(|level| {
                level.qualifies(user_id, role)
                    && !request.has_decided_at(user_id, request.current_level)
            })
            .unwrap_or(false)
    }
}

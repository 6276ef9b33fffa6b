use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::approval::ApprovalId;
use crate::domain::identity::{GrantId, OrgId};
use crate::domain::workflow::WorkflowId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalEventKind {
    TransitionApplied,
    RequestAutoApproved,
    RequestCreated,
    DecisionRecorded,
    RequestAdvanced,
    RequestApproved,
    RequestRejected,
    RequestCancelled,
    WorkflowCreated,
    WorkflowUpdated,
    WorkflowDeleted,
}

impl ApprovalEventKind {
    pub fn event_name(self) -> &'static str {
        match self {
            Self::TransitionApplied => "approvals.transition.applied",
            Self::RequestAutoApproved => "approvals.request.auto_approved",
            Self::RequestCreated => "approvals.request.created",
            Self::DecisionRecorded => "approvals.decision.recorded",
            Self::RequestAdvanced => "approvals.request.advanced",
            Self::RequestApproved => "approvals.request.approved",
            Self::RequestRejected => "approvals.request.rejected",
            Self::RequestCancelled => "approvals.request.cancelled",
            Self::WorkflowCreated => "approvals.workflow.created",
            Self::WorkflowUpdated => "approvals.workflow.updated",
            Self::WorkflowDeleted => "approvals.workflow.deleted",
        }
    }
}

/// Outcome record handed to the notification dispatcher.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalEvent {
    pub event_id: String,
    pub kind: ApprovalEventKind,
    pub org_id: OrgId,
    pub request_id: Option<ApprovalId>,
    pub workflow_id: Option<WorkflowId>,
    pub grant_id: Option<GrantId>,
    pub correlation_id: String,
    pub actor: String,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl ApprovalEvent {
    pub fn new(
        kind: ApprovalEventKind,
        org_id: OrgId,
        correlation_id: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            kind,
            org_id,
            request_id: None,
            workflow_id: None,
            grant_id: None,
            correlation_id: correlation_id.into(),
            actor: actor.into(),
            metadata: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn for_request(mut self, request_id: ApprovalId, grant_id: GrantId) -> Self {
        self.request_id = Some(request_id);
        self.grant_id = Some(grant_id);
        self
    }

    pub fn for_grant(mut self, grant_id: GrantId) -> Self {
        self.grant_id = Some(grant_id);
        self
    }

    pub fn for_workflow(mut self, workflow_id: Option<WorkflowId>) -> Self {
        self.workflow_id = workflow_id;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn event_name(&self) -> &'static str {
        self.kind.event_name()
    }
}

pub trait ApprovalEventSink: Send + Sync {
    fn emit(&self, event: ApprovalEvent);
}

#[derive(Clone, Default)]
pub struct InMemoryEventSink {
    events: Arc<Mutex<Vec<ApprovalEvent>>>,
}

impl InMemoryEventSink {
    pub fn events(&self) -> Vec<ApprovalEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn kinds(&self) -> Vec<ApprovalEventKind> {
        self.events().into_iter().map(|event| event.kind).collect()
    }
}

impl ApprovalEventSink for InMemoryEventSink {
    fn emit(&self, event: ApprovalEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

/// Drops every event. For hosts without a dispatcher.
#[derive(Clone, Copy, Debug, Default)]
pub struct DiscardEventSink;

impl ApprovalEventSink for DiscardEventSink {
    fn emit(&self, _event: ApprovalEvent) {}
}

#[cfg(test)]
mod tests {
    use crate::domain::approval::ApprovalId;
    use crate::domain::identity::{GrantId, OrgId};
    use crate::events::{ApprovalEvent, ApprovalEventKind, ApprovalEventSink, InMemoryEventSink};

    #[test]
    fn in_memory_sink_records_events_with_correlation_fields() {
        let sink = InMemoryEventSink::default();
        sink.emit(
            ApprovalEvent::new(
                ApprovalEventKind::RequestApproved,
                OrgId("org-1".to_owned()),
                "req-123",
                "u-admin",
            )
            .for_request(ApprovalId("APR-1".to_owned()), GrantId("grant-9".to_owned()))
            .with_metadata("from_stage", "drafting")
            .with_metadata("to_stage", "submitted"),
        );

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].correlation_id, "req-123");
        assert_eq!(events[0].event_name(), "approvals.request.approved");
        assert_eq!(events[0].grant_id.as_ref().map(|id| id.0.as_str()), Some("grant-9"));
        assert!(events[0].metadata.contains_key("from_stage"));
        assert_eq!(sink.kinds(), vec![ApprovalEventKind::RequestApproved]);
    }
}

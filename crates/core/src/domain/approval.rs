use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::identity::{GrantId, OrgId, Stage, UserId};
use crate::domain::workflow::WorkflowId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DecisionId(pub String);

/// Stored request status. `expired` is never stored; see
/// [`ApprovalRequest::is_expired`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl ApprovalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "approved" | "approve" => Some(Self::Approved),
            "rejected" | "reject" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Who cast a decision: a person, or the workflow policy itself (auto-approval).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Human,
    Policy,
}

impl DecisionSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Policy => "policy",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "human" => Some(Self::Human),
            "policy" => Some(Self::Policy),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub id: DecisionId,
    pub request_id: ApprovalId,
    pub approver_id: UserId,
    pub decision: Decision,
    pub comments: Option<String>,
    pub level: u32,
    pub source: DecisionSource,
    pub decided_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: ApprovalId,
    pub org_id: OrgId,
    pub workflow_id: Option<WorkflowId>,
    pub grant_id: GrantId,
    pub from_stage: Stage,
    pub to_stage: Stage,
    pub requested_by: UserId,
    pub requested_at: DateTime<Utc>,
    pub request_notes: Option<String>,
    pub status: ApprovalStatus,
    pub current_level: u32,
    pub rejection_reason: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub version: u32,
    #[serde(default)]
    pub decisions: Vec<ApprovalDecision>,
}

impl ApprovalRequest {
    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }

    /// Display-only age check. Expired requests keep their stored status and
    /// still accept decisions.
    pub fn is_expired(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.is_pending() && now.signed_duration_since(self.requested_at) >= max_age
    }

    pub fn decisions_at(&self, level: u32) -> impl Iterator<Item = &ApprovalDecision> + '_ {
        self.decisions.iter().filter(move |decision| decision.level == level)
    }

    pub fn has_decided_at(&self, user_id: &UserId, level: u32) -> bool {
        self.decisions_at(level).any(|decision| &decision.approver_id == user_id)
    }

    /// Number of distinct users who approved at `level`.
    pub fn approvals_at(&self, level: u32) -> usize {
        self.decisions_at(level)
            .filter(|decision| decision.decision == Decision::Approved)
            .map(|decision| &decision.approver_id)
            .collect::<BTreeSet<_>>()
            .len()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{
        ApprovalDecision, ApprovalId, ApprovalRequest, ApprovalStatus, Decision, DecisionId,
        DecisionSource,
    };
    use crate::domain::identity::{GrantId, OrgId, Stage, UserId};
    use crate::domain::workflow::WorkflowId;

    fn request() -> ApprovalRequest {
        ApprovalRequest {
            id: ApprovalId("APR-1".to_string()),
            org_id: OrgId("org-1".to_string()),
            workflow_id: Some(WorkflowId("WF-1".to_string())),
            grant_id: GrantId("grant-1".to_string()),
            from_stage: Stage::new("drafting"),
            to_stage: Stage::new("submitted"),
            requested_by: UserId("u-writer".to_string()),
            requested_at: Utc::now() - Duration::days(10),
            request_notes: None,
            status: ApprovalStatus::Pending,
            current_level: 1,
            rejection_reason: None,
            completed_at: None,
            version: 1,
            decisions: Vec::new(),
        }
    }

    fn decision(approver: &str, level: u32, decision: Decision) -> ApprovalDecision {
        ApprovalDecision {
            id: DecisionId(format!("DEC-{approver}-{level}")),
            request_id: ApprovalId("APR-1".to_string()),
            approver_id: UserId(approver.to_string()),
            decision,
            comments: None,
            level,
            source: DecisionSource::Human,
            decided_at: Utc::now(),
        }
    }

    #[test]
    fn expiry_is_derived_from_age_and_only_applies_to_pending() {
        let mut request = request();
        assert!(request.is_expired(Utc::now(), Duration::days(7)));
        assert!(!request.is_expired(Utc::now(), Duration::days(30)));

        request.status = ApprovalStatus::Approved;
        assert!(!request.is_expired(Utc::now(), Duration::days(7)));
    }

    #[test]
    fn approvals_are_counted_per_level_and_per_distinct_user() {
        let mut request = request();
        request.decisions = vec![
            decision("u-a", 1, Decision::Approved),
            decision("u-b", 1, Decision::Approved),
            decision("u-c", 2, Decision::Approved),
        ];

        assert_eq!(request.approvals_at(1), 2);
        assert_eq!(request.approvals_at(2), 1);
        assert_eq!(request.approvals_at(3), 0);
        assert!(request.has_decided_at(&UserId("u-a".to_string()), 1));
        assert!(!request.has_decided_at(&UserId("u-a".to_string()), 2));
    }

    #[test]
    fn status_strings_parse_back() {
        for status in [
            ApprovalStatus::Pending,
            ApprovalStatus::Approved,
            ApprovalStatus::Rejected,
            ApprovalStatus::Cancelled,
        ] {
            assert_eq!(ApprovalStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ApprovalStatus::parse("expired"), None);
        assert_eq!(Decision::parse("reject"), Some(Decision::Rejected));
    }
}

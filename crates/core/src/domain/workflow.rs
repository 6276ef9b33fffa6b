use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::identity::{OrgId, OrgRole, Stage, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

/// One step of an approval chain. Approvers qualify either by role or by
/// being listed in `specific_users`, never both.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalLevel {
    pub level: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<OrgRole>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub specific_users: Vec<UserId>,
    pub required_approvers: u32,
}

impl ApprovalLevel {
    pub fn for_role(level: u32, role: OrgRole, required_approvers: u32) -> Self {
        Self { level, role: Some(role), specific_users: Vec::new(), required_approvers }
    }

    pub fn for_users(level: u32, users: Vec<UserId>, required_approvers: u32) -> Self {
        Self { level, role: None, specific_users: users, required_approvers }
    }

    pub fn qualifies(&self, user_id: &UserId, role: OrgRole) -> bool {
        if !self.specific_users.is_empty() {
            return self.specific_users.contains(user_id);
        }

        self.role.map(|required| role.satisfies(required)).unwrap_or(false)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalWorkflow {
    pub id: WorkflowId,
    pub org_id: OrgId,
    pub name: String,
    pub description: Option<String>,
    pub from_stage: Stage,
    pub to_stage: Stage,
    pub approval_chain: Vec<ApprovalLevel>,
    pub is_active: bool,
    pub require_all_levels: bool,
    pub allow_self_approval: bool,
    pub auto_approve_admin: bool,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalWorkflow {
    pub fn level(&self, level: u32) -> Option<&ApprovalLevel> {
        self.approval_chain.iter().find(|candidate| candidate.level == level)
    }

    pub fn final_level(&self) -> u32 {
        u32::try_from(self.approval_chain.len()).unwrap_or(u32::MAX)
    }

    pub fn guards(&self, from_stage: &Stage, to_stage: &Stage) -> bool {
        &self.from_stage == from_stage && &self.to_stage == to_stage
    }
}

fn default_true() -> bool {
    true
}

/// Admin-supplied configuration for a new workflow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDraft {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub from_stage: Stage,
    pub to_stage: Stage,
    pub approval_chain: Vec<ApprovalLevel>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "default_true")]
    pub require_all_levels: bool,
    #[serde(default)]
    pub allow_self_approval: bool,
    #[serde(default)]
    pub auto_approve_admin: bool,
}

/// Partial update of a workflow; `None` leaves the field untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub from_stage: Option<Stage>,
    #[serde(default)]
    pub to_stage: Option<Stage>,
    #[serde(default)]
    pub approval_chain: Option<Vec<ApprovalLevel>>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub require_all_levels: Option<bool>,
    #[serde(default)]
    pub allow_self_approval: Option<bool>,
    #[serde(default)]
    pub auto_approve_admin: Option<bool>,
}

impl WorkflowPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn apply_to(self, workflow: &mut ApprovalWorkflow, now: DateTime<Utc>) {
        if let Some(name) = self.name {
            workflow.name = name;
        }
        if let Some(description) = self.description {
            workflow.description = Some(description).filter(|value| !value.trim().is_empty());
        }
        if let Some(from_stage) = self.from_stage {
            workflow.from_stage = from_stage;
        }
        if let Some(to_stage) = self.to_stage {
            workflow.to_stage = to_stage;
        }
        if let Some(approval_chain) = self.approval_chain {
            workflow.approval_chain = approval_chain;
        }
        if let Some(is_active) = self.is_active {
            workflow.is_active = is_active;
        }
        if let Some(require_all_levels) = self.require_all_levels {
            workflow.require_all_levels = require_all_levels;
        }
        if let Some(allow_self_approval) = self.allow_self_approval {
            workflow.allow_self_approval = allow_self_approval;
        }
        if let Some(auto_approve_admin) = self.auto_approve_admin {
            workflow.auto_approve_admin = auto_approve_admin;
        }
        workflow.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::{ApprovalLevel, WorkflowDraft, WorkflowPatch};
    use crate::domain::identity::{OrgRole, UserId};

    #[test]
    fn specific_user_levels_ignore_role() {
        let level = ApprovalLevel::for_users(1, vec![UserId("u-finance".to_string())], 1);

        assert!(level.qualifies(&UserId("u-finance".to_string()), OrgRole::Contributor));
        assert!(!level.qualifies(&UserId("u-other-admin".to_string()), OrgRole::Admin));
    }

    #[test]
    fn role_levels_accept_higher_roles() {
        let level = ApprovalLevel::for_role(1, OrgRole::Contributor, 1);

        assert!(level.qualifies(&UserId("u-admin".to_string()), OrgRole::Admin));
        assert!(level.qualifies(&UserId("u-writer".to_string()), OrgRole::Contributor));

        let admin_only = ApprovalLevel::for_role(2, OrgRole::Admin, 1);
        assert!(!admin_only.qualifies(&UserId("u-writer".to_string()), OrgRole::Contributor));
    }

    #[test]
    fn draft_defaults_follow_conservative_policy() {
        let draft: WorkflowDraft = serde_json::from_str(
            r#"{
                "name": "Submission sign-off",
                "from_stage": "drafting",
                "to_stage": "submitted",
                "approval_chain": [{"level": 1, "role": "admin", "required_approvers": 1}]
            }"#,
        )
        .expect("draft should deserialize");

        assert!(draft.is_active);
        assert!(draft.require_all_levels);
        assert!(!draft.allow_self_approval);
        assert!(!draft.auto_approve_admin);
        assert_eq!(draft.approval_chain[0].role, Some(OrgRole::Admin));
        assert!(draft.approval_chain[0].specific_users.is_empty());
    }

    #[test]
    fn empty_patch_is_detected() {
        assert!(WorkflowPatch::default().is_empty());
        assert!(!WorkflowPatch { is_active: Some(false), ..WorkflowPatch::default() }.is_empty());
    }
}

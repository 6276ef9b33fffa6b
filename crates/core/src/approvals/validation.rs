use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::identity::Stage;
use crate::domain::workflow::{ApprovalLevel, ApprovalWorkflow, WorkflowDraft};

/// Structural problems with an approval workflow configuration.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkflowValidationFailure {
    #[error("workflow name must not be blank")]
    BlankName,
    #[error("stages must not be blank")]
    BlankStage,
    #[error("a workflow cannot guard a transition from `{stage}` to itself")]
    SameStage { stage: String },
    #[error("approval chain must contain at least one level")]
    EmptyChain,
    #[error("approval chain levels must be numbered 1..={expected_len}; found level {found} at position {position}")]
    NonContiguousLevels { expected_len: usize, position: usize, found: u32 },
    #[error("level {level} must name either a role or specific users, not both")]
    AmbiguousApprovers { level: u32 },
    #[error("level {level} names neither a role nor specific users")]
    MissingApprovers { level: u32 },
    #[error("level {level} must require at least one approver")]
    ZeroRequiredApprovers { level: u32 },
    #[error("level {level} requires {required} approvers but lists only {available} users")]
    UnreachableQuorum { level: u32, required: u32, available: usize },
    #[error("level {level} lists user `{user_id}` more than once")]
    DuplicateApprover { level: u32, user_id: String },
}

/// Checks the shape of a draft before it is persisted.
pub fn validate_draft(draft: &WorkflowDraft) -> Result<(), WorkflowValidationFailure> {
    validate_parts(&draft.name, &draft.from_stage, &draft.to_stage, &draft.approval_chain)
}

/// Checks a fully-assembled workflow, e.g. after a patch was applied.
pub fn validate_workflow(workflow: &ApprovalWorkflow) -> Result<(), WorkflowValidationFailure> {
    validate_parts(
        &workflow.name,
        &workflow.from_stage,
        &workflow.to_stage,
        &workflow.approval_chain,
    )
}

fn validate_parts(
    name: &str,
    from_stage: &Stage,
    to_stage: &Stage,
    chain: &[ApprovalLevel],
) -> Result<(), WorkflowValidationFailure> {
    if name.trim().is_empty() {
        return Err(WorkflowValidationFailure::BlankName);
    }
    if from_stage.is_blank() || to_stage.is_blank() {
        return Err(WorkflowValidationFailure::BlankStage);
    }
    if from_stage == to_stage {
        return Err(WorkflowValidationFailure::SameStage { stage: from_stage.0.clone() });
    }

    validate_chain(chain)
}

pub fn validate_chain(chain: &[ApprovalLevel]) -> Result<(), WorkflowValidationFailure> {
    if chain.is_empty() {
        return Err(WorkflowValidationFailure::EmptyChain);
    }

    for (position, level) in chain.iter().enumerate() {
        let expected = u32::try_from(position + 1).unwrap_or(u32::MAX);
        if level.level != expected {
            return Err(WorkflowValidationFailure::NonContiguousLevels {
                expected_len: chain.len(),
                position: position + 1,
                found: level.level,
            });
        }
        validate_level(level)?;
    }

    Ok(())
}

fn validate_level(level: &ApprovalLevel) -> Result<(), WorkflowValidationFailure> {
    let has_users = !level.specific_users.is_empty();
    match (level.role.is_some(), has_users) {
        (true, true) => {
            return Err(WorkflowValidationFailure::AmbiguousApprovers { level: level.level })
        }
        (false, false) => {
            return Err(WorkflowValidationFailure::MissingApprovers { level: level.level })
        }
        _ => {}
    }

    if level.required_approvers == 0 {
        return Err(WorkflowValidationFailure::ZeroRequiredApprovers { level: level.level });
    }

    if has_users {
        let mut seen = BTreeSet::new();
        for user in &level.specific_users {
            if !seen.insert(user) {
                return Err(WorkflowValidationFailure::DuplicateApprover {
                    level: level.level,
                    user_id: user.0.clone(),
                });
            }
        }

        let available = level.specific_users.len();
        if level.required_approvers as usize > available {
            return Err(WorkflowValidationFailure::UnreachableQuorum {
                level: level.level,
                required: level.required_approvers,
                available,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{validate_chain, validate_draft, WorkflowValidationFailure};
    use crate::domain::identity::{OrgRole, Stage, UserId};
    use crate::domain::workflow::{ApprovalLevel, WorkflowDraft};

    fn users(ids: &[&str]) -> Vec<UserId> {
        ids.iter().map(|id| UserId((*id).to_string())).collect()
    }

    fn draft(chain: Vec<ApprovalLevel>) -> WorkflowDraft {
        WorkflowDraft {
            name: "Submission sign-off".to_string(),
            description: None,
            from_stage: Stage::new("drafting"),
            to_stage: Stage::new("submitted"),
            approval_chain: chain,
            is_active: true,
            require_all_levels: true,
            allow_self_approval: false,
            auto_approve_admin: false,
        }
    }

    #[test]
    fn accepts_mixed_role_and_user_chain() {
        let chain = vec![
            ApprovalLevel::for_role(1, OrgRole::Contributor, 2),
            ApprovalLevel::for_users(2, users(&["u-finance"]), 1),
        ];

        assert_eq!(validate_draft(&draft(chain)), Ok(()));
    }

    #[test]
    fn rejects_empty_chain() {
        assert_eq!(validate_chain(&[]), Err(WorkflowValidationFailure::EmptyChain));
    }

    #[test]
    fn rejects_gaps_in_level_numbering() {
        let chain = vec![
            ApprovalLevel::for_role(1, OrgRole::Admin, 1),
            ApprovalLevel::for_role(3, OrgRole::Admin, 1),
        ];

        assert_eq!(
            validate_chain(&chain),
            Err(WorkflowValidationFailure::NonContiguousLevels {
                expected_len: 2,
                position: 2,
                found: 3
            })
        );
    }

    #[test]
    fn rejects_level_with_both_role_and_users() {
        let mut level = ApprovalLevel::for_role(1, OrgRole::Admin, 1);
        level.specific_users = users(&["u-a"]);

        assert_eq!(
            validate_chain(&[level]),
            Err(WorkflowValidationFailure::AmbiguousApprovers { level: 1 })
        );
    }

    #[test]
    fn rejects_level_without_approvers() {
        let level = ApprovalLevel::for_users(1, Vec::new(), 1);

        assert_eq!(
            validate_chain(&[level]),
            Err(WorkflowValidationFailure::MissingApprovers { level: 1 })
        );
    }

    #[test]
    fn rejects_unreachable_and_zero_quorum() {
        let unreachable = ApprovalLevel::for_users(1, users(&["u-a", "u-b"]), 3);
        assert_eq!(
            validate_chain(&[unreachable]),
            Err(WorkflowValidationFailure::UnreachableQuorum {
                level: 1,
                required: 3,
                available: 2
            })
        );

        let zero = ApprovalLevel::for_role(1, OrgRole::Contributor, 0);
        assert_eq!(
            validate_chain(&[zero]),
            Err(WorkflowValidationFailure::ZeroRequiredApprovers { level: 1 })
        );
    }

    #[test]
    fn rejects_duplicate_listed_user() {
        let level = ApprovalLevel::for_users(1, users(&["u-a", "u-a"]), 1);

        assert_eq!(
            validate_chain(&[level]),
            Err(WorkflowValidationFailure::DuplicateApprover {
                level: 1,
                user_id: "u-a".to_string()
            })
        );
    }

    #[test]
    fn rejects_self_transition_and_blank_fields() {
        let mut same = draft(vec![ApprovalLevel::for_role(1, OrgRole::Admin, 1)]);
        same.to_stage = Stage::new("drafting");
        assert_eq!(
            validate_draft(&same),
            Err(WorkflowValidationFailure::SameStage { stage: "drafting".to_string() })
        );

        let mut blank = draft(vec![ApprovalLevel::for_role(1, OrgRole::Admin, 1)]);
        blank.name = "   ".to_string();
        assert_eq!(validate_draft(&blank), Err(WorkflowValidationFailure::BlankName));

        let mut blank_stage = draft(vec![ApprovalLevel::for_role(1, OrgRole::Admin, 1)]);
        blank_stage.from_stage = Stage::new("");
        assert_eq!(validate_draft(&blank_stage), Err(WorkflowValidationFailure::BlankStage));
    }
}

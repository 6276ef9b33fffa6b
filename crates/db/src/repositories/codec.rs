use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use grantflow_core::domain::approval::{
    ApprovalDecision, ApprovalId, ApprovalRequest, ApprovalStatus, Decision, DecisionId,
    DecisionSource,
};
use grantflow_core::domain::identity::{GrantId, OrgId, Stage, UserId};
use grantflow_core::domain::workflow::{ApprovalLevel, ApprovalWorkflow, WorkflowId};

use super::RepositoryError;

pub(crate) const WORKFLOW_COLUMNS: &str = "id, org_id, name, description, from_stage, to_stage, \
     approval_chain_json, is_active, require_all_levels, allow_self_approval, auto_approve_admin, \
     created_by, created_at, updated_at";

pub(crate) const REQUEST_COLUMNS: &str = "id, org_id, workflow_id, grant_id, from_stage, to_stage, \
     requested_by, requested_at, request_notes, status, current_level, rejection_reason, \
     completed_at, version";

pub(crate) const DECISION_COLUMNS: &str =
    "id, request_id, approver_id, decision, comments, level, source, decided_at";

pub(crate) fn workflow_from_row(row: &SqliteRow) -> Result<ApprovalWorkflow, RepositoryError> {
    let chain_json: String = row.try_get("approval_chain_json")?;
    let approval_chain = decode_chain(&chain_json)?;

    Ok(ApprovalWorkflow {
        id: WorkflowId(row.try_get("id")?),
        org_id: OrgId(row.try_get("org_id")?),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        from_stage: Stage::new(row.try_get::<String, _>("from_stage")?),
        to_stage: Stage::new(row.try_get::<String, _>("to_stage")?),
        approval_chain,
        is_active: parse_flag("is_active", row.try_get("is_active")?)?,
        require_all_levels: parse_flag("require_all_levels", row.try_get("require_all_levels")?)?,
        allow_self_approval: parse_flag(
            "allow_self_approval",
            row.try_get("allow_self_approval")?,
        )?,
        auto_approve_admin: parse_flag("auto_approve_admin", row.try_get("auto_approve_admin")?)?,
        created_by: UserId(row.try_get("created_by")?),
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

/// Decodes a request row; decisions are attached by the caller.
pub(crate) fn request_from_row(row: &SqliteRow) -> Result<ApprovalRequest, RepositoryError> {
    let status_raw: String = row.try_get("status")?;
    let status = ApprovalStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown request status `{status_raw}`")))?;

    Ok(ApprovalRequest {
        id: ApprovalId(row.try_get("id")?),
        org_id: OrgId(row.try_get("org_id")?),
        workflow_id: row.try_get::<Option<String>, _>("workflow_id")?.map(WorkflowId),
        grant_id: GrantId(row.try_get("grant_id")?),
        from_stage: Stage::new(row.try_get::<String, _>("from_stage")?),
        to_stage: Stage::new(row.try_get::<String, _>("to_stage")?),
        requested_by: UserId(row.try_get("requested_by")?),
        requested_at: parse_timestamp("requested_at", row.try_get("requested_at")?)?,
        request_notes: row.try_get("request_notes")?,
        status,
        current_level: parse_u32("current_level", row.try_get("current_level")?)?,
        rejection_reason: row.try_get("rejection_reason")?,
        completed_at: parse_optional_timestamp("completed_at", row.try_get("completed_at")?)?,
        version: parse_u32("version", row.try_get("version")?)?,
        decisions: Vec::new(),
    })
}

pub(crate) fn decision_from_row(row: &SqliteRow) -> Result<ApprovalDecision, RepositoryError> {
    let decision_raw: String = row.try_get("decision")?;
    let decision = Decision::parse(&decision_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown decision `{decision_raw}`")))?;
    let source_raw: String = row.try_get("source")?;
    let source = DecisionSource::parse(&source_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown decision source `{source_raw}`")))?;

    Ok(ApprovalDecision {
        id: DecisionId(row.try_get("id")?),
        request_id: ApprovalId(row.try_get("request_id")?),
        approver_id: UserId(row.try_get("approver_id")?),
        decision,
        comments: row.try_get("comments")?,
        level: parse_u32("level", row.try_get("level")?)?,
        source,
        decided_at: parse_timestamp("decided_at", row.try_get("decided_at")?)?,
    })
}

/// Fixed-width RFC 3339 so stored timestamps sort lexicographically.
pub(crate) fn encode_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn encode_chain(chain: &[ApprovalLevel]) -> Result<String, RepositoryError> {
    serde_json::to_string(chain)
        .map_err(|error| RepositoryError::Encode(format!("approval chain: {error}")))
}

fn decode_chain(raw: &str) -> Result<Vec<ApprovalLevel>, RepositoryError> {
    serde_json::from_str(raw).map_err(|error| {
        RepositoryError::Decode(format!("invalid `approval_chain_json`: {error}"))
    })
}

fn parse_flag(column: &str, value: i64) -> Result<bool, RepositoryError> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected 0 or 1): {other}"
        ))),
    }
}

fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

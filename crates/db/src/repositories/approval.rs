use std::collections::HashMap;

use chrono::Utc;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};

use grantflow_core::approvals::{
    ApprovalStore, RequestCommit, RequestFilter, StageTransition, StoreError, WorkflowDeletion,
};
use grantflow_core::domain::approval::{ApprovalDecision, ApprovalId, ApprovalRequest};
use grantflow_core::domain::identity::{GrantId, OrgId, Stage};
use grantflow_core::domain::workflow::{ApprovalWorkflow, WorkflowId};

use super::codec::{
    decision_from_row, encode_chain, encode_timestamp, request_from_row, workflow_from_row,
    DECISION_COLUMNS, REQUEST_COLUMNS, WORKFLOW_COLUMNS,
};
use super::RepositoryError;
use crate::DbPool;

/// SQLite-backed [`ApprovalStore`]. Multi-row writes run in one transaction.
pub struct SqlApprovalStore {
    pool: DbPool,
}

impl SqlApprovalStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn fetch_workflow(
        &self,
        org_id: &OrgId,
        id: &WorkflowId,
    ) -> Result<Option<ApprovalWorkflow>, RepositoryError> {
        let sql =
            format!("SELECT {WORKFLOW_COLUMNS} FROM approval_workflow WHERE org_id = ? AND id = ?");
        let row = sqlx::query(&sql).bind(&org_id.0).bind(&id.0).fetch_optional(&self.pool).await?;

        row.as_ref().map(workflow_from_row).transpose()
    }

    async fn fetch_workflows(
        &self,
        org_id: &OrgId,
        transition: Option<(&Stage, &Stage)>,
    ) -> Result<Vec<ApprovalWorkflow>, RepositoryError> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {WORKFLOW_COLUMNS} FROM approval_workflow WHERE org_id = "
        ));
        builder.push_bind(org_id.0.clone());
        if let Some((from_stage, to_stage)) = transition {
            builder.push(" AND is_active = 1 AND from_stage = ");
            builder.push_bind(from_stage.0.clone());
            builder.push(" AND to_stage = ");
            builder.push_bind(to_stage.0.clone());
        }
        builder.push(" ORDER BY created_at DESC, id DESC");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(workflow_from_row).collect()
    }

    async fn store_workflow(&self, workflow: &ApprovalWorkflow) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO approval_workflow
                (id, org_id, name, description, from_stage, to_stage, approval_chain_json,
                 is_active, require_all_levels, allow_self_approval, auto_approve_admin,
                 created_by, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&workflow.id.0)
        .bind(&workflow.org_id.0)
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(&workflow.from_stage.0)
        .bind(&workflow.to_stage.0)
        .bind(encode_chain(&workflow.approval_chain)?)
        .bind(workflow.is_active)
        .bind(workflow.require_all_levels)
        .bind(workflow.allow_self_approval)
        .bind(workflow.auto_approve_admin)
        .bind(&workflow.created_by.0)
        .bind(encode_timestamp(&workflow.created_at))
        .bind(encode_timestamp(&workflow.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Returns `false` when the workflow does not exist in its organization.
    async fn replace_workflow(&self, workflow: &ApprovalWorkflow) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE approval_workflow
             SET name = ?, description = ?, from_stage = ?, to_stage = ?,
                 approval_chain_json = ?, is_active = ?, require_all_levels = ?,
                 allow_self_approval = ?, auto_approve_admin = ?, updated_at = ?
             WHERE id = ? AND org_id = ?",
        )
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(&workflow.from_stage.0)
        .bind(&workflow.to_stage.0)
        .bind(encode_chain(&workflow.approval_chain)?)
        .bind(workflow.is_active)
        .bind(workflow.require_all_levels)
        .bind(workflow.allow_self_approval)
        .bind(workflow.auto_approve_admin)
        .bind(encode_timestamp(&workflow.updated_at))
        .bind(&workflow.id.0)
        .bind(&workflow.org_id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// The pending guard is part of the DELETE itself, so a request inserted
    /// after any earlier check still blocks removal.
    async fn remove_workflow(
        &self,
        org_id: &OrgId,
        id: &WorkflowId,
    ) -> Result<WorkflowDeletion, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query(
            "DELETE FROM approval_workflow
             WHERE org_id = ? AND id = ?
               AND NOT EXISTS (
                   SELECT 1 FROM approval_request
                   WHERE workflow_id = approval_workflow.id AND status = 'pending'
               )",
        )
        .bind(&org_id.0)
        .bind(&id.0)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let outcome = if deleted > 0 {
            WorkflowDeletion::Deleted
        } else {
            let pending: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM approval_request
                 WHERE org_id = ? AND workflow_id = ? AND status = 'pending'",
            )
            .bind(&org_id.0)
            .bind(&id.0)
            .fetch_one(&mut *tx)
            .await?;

            match u64::try_from(pending) {
                Ok(pending) if pending > 0 => WorkflowDeletion::InUse { pending },
                _ => WorkflowDeletion::NotFound,
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn fetch_request(
        &self,
        org_id: &OrgId,
        id: &ApprovalId,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let sql =
            format!("SELECT {REQUEST_COLUMNS} FROM approval_request WHERE org_id = ? AND id = ?");
        let row = sqlx::query(&sql).bind(&org_id.0).bind(&id.0).fetch_optional(&self.pool).await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut request = request_from_row(&row)?;
        let mut decisions = self.fetch_decisions(std::slice::from_ref(&request.id)).await?;
        request.decisions = decisions.remove(&request.id.0).unwrap_or_default();
        Ok(Some(request))
    }

    async fn fetch_requests(
        &self,
        org_id: &OrgId,
        filter: &RequestFilter,
    ) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {REQUEST_COLUMNS} FROM approval_request WHERE org_id = "
        ));
        builder.push_bind(org_id.0.clone());
        if let Some(status) = filter.status {
            builder.push(" AND status = ");
            builder.push_bind(status.as_str());
        }
        if let Some(grant_id) = &filter.grant_id {
            builder.push(" AND grant_id = ");
            builder.push_bind(grant_id.0.clone());
        }
        builder.push(" ORDER BY requested_at DESC, id DESC");

        let rows = builder.build().fetch_all(&self.pool).await?;
        let mut requests =
            rows.iter().map(request_from_row).collect::<Result<Vec<_>, RepositoryError>>()?;

        let ids: Vec<ApprovalId> = requests.iter().map(|request| request.id.clone()).collect();
        let mut decisions = self.fetch_decisions(&ids).await?;
        for request in &mut requests {
            request.decisions = decisions.remove(&request.id.0).unwrap_or_default();
        }
        Ok(requests)
    }

    /// Decisions for `ids`, grouped by request id, oldest first.
    async fn fetch_decisions(
        &self,
        ids: &[ApprovalId],
    ) -> Result<HashMap<String, Vec<ApprovalDecision>>, RepositoryError> {
        let mut grouped: HashMap<String, Vec<ApprovalDecision>> = HashMap::new();
        if ids.is_empty() {
            return Ok(grouped);
        }

        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {DECISION_COLUMNS} FROM approval_decision WHERE request_id IN ("
        ));
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(id.0.clone());
        }
        separated.push_unseparated(") ORDER BY level ASC, decided_at ASC, id ASC");

        let rows = builder.build().fetch_all(&self.pool).await?;
        for row in &rows {
            let decision = decision_from_row(row)?;
            grouped.entry(decision.request_id.0.clone()).or_default().push(decision);
        }
        Ok(grouped)
    }

    async fn store_request(
        &self,
        request: &ApprovalRequest,
        stage: Option<&StageTransition>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO approval_request
                (id, org_id, workflow_id, grant_id, from_stage, to_stage, requested_by,
                 requested_at, request_notes, status, current_level, rejection_reason,
                 completed_at, version)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&request.id.0)
        .bind(&request.org_id.0)
        .bind(request.workflow_id.as_ref().map(|id| id.0.as_str()))
        .bind(&request.grant_id.0)
        .bind(&request.from_stage.0)
        .bind(&request.to_stage.0)
        .bind(&request.requested_by.0)
        .bind(encode_timestamp(&request.requested_at))
        .bind(&request.request_notes)
        .bind(request.status.as_str())
        .bind(i64::from(request.current_level))
        .bind(&request.rejection_reason)
        .bind(request.completed_at.as_ref().map(encode_timestamp))
        .bind(i64::from(request.version))
        .execute(&mut *tx)
        .await?;

        for decision in &request.decisions {
            insert_decision(&mut tx, decision).await?;
        }
        if let Some(stage) = stage {
            upsert_stage(&mut tx, stage).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Returns `false` without writing anything when the version check fails.
    async fn store_commit(&self, commit: &RequestCommit) -> Result<bool, RepositoryError> {
        let request = &commit.request;
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE approval_request
             SET status = ?, current_level = ?, rejection_reason = ?, completed_at = ?,
                 version = ?
             WHERE id = ? AND org_id = ? AND version = ?",
        )
        .bind(request.status.as_str())
        .bind(i64::from(request.current_level))
        .bind(&request.rejection_reason)
        .bind(request.completed_at.as_ref().map(encode_timestamp))
        .bind(i64::from(request.version))
        .bind(&request.id.0)
        .bind(&request.org_id.0)
        .bind(i64::from(commit.expected_version))
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        if let Some(decision) = &commit.decision {
            insert_decision(&mut tx, decision).await?;
        }
        if let Some(stage) = &commit.stage {
            upsert_stage(&mut tx, stage).await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn store_stage(&self, transition: &StageTransition) -> Result<(), RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        upsert_stage(&mut conn, transition).await
    }

    async fn fetch_stage(
        &self,
        org_id: &OrgId,
        grant_id: &GrantId,
    ) -> Result<Option<Stage>, RepositoryError> {
        let row = sqlx::query("SELECT stage FROM grant_stage WHERE org_id = ? AND grant_id = ?")
            .bind(&org_id.0)
            .bind(&grant_id.0)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| row.try_get::<String, _>("stage")).transpose()?.map(Stage))
    }
}

async fn insert_decision(
    conn: &mut SqliteConnection,
    decision: &ApprovalDecision,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO approval_decision
            (id, request_id, approver_id, decision, comments, level, source, decided_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&decision.id.0)
    .bind(&decision.request_id.0)
    .bind(&decision.approver_id.0)
    .bind(decision.decision.as_str())
    .bind(&decision.comments)
    .bind(i64::from(decision.level))
    .bind(decision.source.as_str())
    .bind(encode_timestamp(&decision.decided_at))
    .execute(conn)
    .await?;

    Ok(())
}

async fn upsert_stage(
    conn: &mut SqliteConnection,
    transition: &StageTransition,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO grant_stage (org_id, grant_id, stage, updated_at)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(org_id, grant_id) DO UPDATE SET
             stage = excluded.stage,
             updated_at = excluded.updated_at",
    )
    .bind(&transition.org_id.0)
    .bind(&transition.grant_id.0)
    .bind(&transition.to_stage.0)
    .bind(encode_timestamp(&Utc::now()))
    .execute(conn)
    .await?;

    Ok(())
}

#[async_trait::async_trait]
impl ApprovalStore for SqlApprovalStore {
    async fn find_workflow(
        &self,
        org_id: &OrgId,
        id: &WorkflowId,
    ) -> Result<Option<ApprovalWorkflow>, StoreError> {
        Ok(self.fetch_workflow(org_id, id).await?)
    }

    async fn list_workflows(&self, org_id: &OrgId) -> Result<Vec<ApprovalWorkflow>, StoreError> {
        Ok(self.fetch_workflows(org_id, None).await?)
    }

    async fn find_active_workflows(
        &self,
        org_id: &OrgId,
        from_stage: &Stage,
        to_stage: &Stage,
    ) -> Result<Vec<ApprovalWorkflow>, StoreError> {
        Ok(self.fetch_workflows(org_id, Some((from_stage, to_stage))).await?)
    }

    async fn insert_workflow(&self, workflow: &ApprovalWorkflow) -> Result<(), StoreError> {
        Ok(self.store_workflow(workflow).await?)
    }

    async fn update_workflow(&self, workflow: &ApprovalWorkflow) -> Result<bool, StoreError> {
        Ok(self.replace_workflow(workflow).await?)
    }

    async fn delete_workflow(
        &self,
        org_id: &OrgId,
        id: &WorkflowId,
    ) -> Result<WorkflowDeletion, StoreError> {
        Ok(self.remove_workflow(org_id, id).await?)
    }

    async fn count_pending_for_workflow(
        &self,
        org_id: &OrgId,
        id: &WorkflowId,
    ) -> Result<u64, StoreError> {
        let count = sqlx::query(
            "SELECT COUNT(*) AS count FROM approval_request
             WHERE org_id = ? AND workflow_id = ? AND status = 'pending'",
        )
        .bind(&org_id.0)
        .bind(&id.0)
        .fetch_one(&self.pool)
        .await
        .and_then(|row| row.try_get::<i64, _>("count"))
        .map_err(RepositoryError::from)?;

        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn find_request(
        &self,
        org_id: &OrgId,
        id: &ApprovalId,
    ) -> Result<Option<ApprovalRequest>, StoreError> {
        Ok(self.fetch_request(org_id, id).await?)
    }

    async fn list_requests(
        &self,
        org_id: &OrgId,
        filter: &RequestFilter,
    ) -> Result<Vec<ApprovalRequest>, StoreError> {
        Ok(self.fetch_requests(org_id, filter).await?)
    }

    async fn insert_request(
        &self,
        request: &ApprovalRequest,
        stage: Option<&StageTransition>,
    ) -> Result<(), StoreError> {
        Ok(self.store_request(request, stage).await?)
    }

    async fn commit_request(&self, commit: RequestCommit) -> Result<(), StoreError> {
        if self.store_commit(&commit).await? {
            Ok(())
        } else {
            Err(StoreError::VersionConflict {
                request_id: commit.request.id.0,
                expected: commit.expected_version,
            })
        }
    }

    async fn apply_stage_transition(&self, transition: &StageTransition) -> Result<(), StoreError> {
        Ok(self.store_stage(transition).await?)
    }

    async fn grant_stage(
        &self,
        org_id: &OrgId,
        grant_id: &GrantId,
    ) -> Result<Option<Stage>, StoreError> {
        Ok(self.fetch_stage(org_id, grant_id).await?)
    }
}

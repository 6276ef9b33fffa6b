//! JSON routes for workflow administration and approval requests.
//!
//! - `GET    /api/v1/workflows[?active_only=true]`      list workflows
//! - `POST   /api/v1/workflows`                         create a workflow (admin)
//! - `GET    /api/v1/workflows/resolve?from_stage&to_stage` workflow guarding a move
//! - `GET    /api/v1/workflows/{workflow_id}`           fetch one workflow
//! - `PATCH  /api/v1/workflows/{workflow_id}`           partial update (admin)
//! - `DELETE /api/v1/workflows/{workflow_id}`           delete when unused (admin)
//! - `GET    /api/v1/approvals[?status&grant_id&pending_for_me]` list requests
//! - `POST   /api/v1/approvals`                         request a stage move
//! - `GET    /api/v1/approvals/{request_id}`            fetch one request
//! - `POST   /api/v1/approvals/{request_id}/decisions`  approve or reject
//! - `POST   /api/v1/approvals/{request_id}/cancel`     withdraw a pending request
//!
//! Identity arrives from the upstream gateway as `x-user-id`, `x-org-id` and
//! `x-org-role`. When an API token is configured every call must also carry
//! `Authorization: Bearer <token>`.

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use grantflow_core::approvals::{
    ApprovalService, DecisionCommand, DecisionResult, InitiationResult, NewApprovalRequest,
    OperationContext, RequestQuery, RequestView,
};
use grantflow_core::domain::approval::{ApprovalId, ApprovalRequest, ApprovalStatus};
use grantflow_core::domain::identity::{Actor, GrantId, OrgRole, Stage};
use grantflow_core::domain::workflow::{ApprovalWorkflow, WorkflowDraft, WorkflowId, WorkflowPatch};
use grantflow_core::errors::{ApplicationError, InterfaceError};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{error, info};
use uuid::Uuid;

const USER_HEADER: &str = "x-user-id";
const ORG_HEADER: &str = "x-org-id";
const ROLE_HEADER: &str = "x-org-role";
const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct ApiState {
    service: Arc<ApprovalService>,
    api_token: Option<SecretString>,
}

impl ApiState {
    pub fn new(service: Arc<ApprovalService>, api_token: Option<SecretString>) -> Self {
        Self { service, api_token }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    pub correlation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_workflow_id: Option<String>,
}

/// Transport error. Carries the correlation id back to the caller.
#[derive(Debug)]
pub struct ApiError(InterfaceError);

impl ApiError {
    fn unauthorized(message: impl Into<String>, correlation_id: &str) -> Self {
        Self(InterfaceError::Unauthorized {
            message: message.into(),
            correlation_id: correlation_id.to_string(),
        })
    }

    fn bad_request(message: impl Into<String>, correlation_id: &str) -> Self {
        Self(InterfaceError::BadRequest {
            message: message.into(),
            correlation_id: correlation_id.to_string(),
        })
    }

    fn from_application(error: ApplicationError, ctx: &OperationContext) -> Self {
        if error.is_server_fault() {
            error!(
                event_name = "api.request.failed",
                correlation_id = %ctx.correlation_id,
                user_id = %ctx.actor.user_id.0,
                error = %error,
                "request failed with a server fault"
            );
        } else {
            info!(
                event_name = "api.request.refused",
                correlation_id = %ctx.correlation_id,
                user_id = %ctx.actor.user_id.0,
                error = %error,
                "request refused"
            );
        }
        Self(error.into_interface(ctx.correlation_id.clone()))
    }
}

fn error_code(error: &InterfaceError) -> &'static str {
    match error {
        InterfaceError::BadRequest { .. } => "bad_request",
        InterfaceError::Unauthorized { .. } => "unauthorized",
        InterfaceError::Forbidden { .. } => "forbidden",
        InterfaceError::NotFound { .. } => "not_found",
        InterfaceError::Conflict { .. } => "conflict",
        InterfaceError::ServiceUnavailable { .. } => "service_unavailable",
        InterfaceError::Internal { .. } => "internal",
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = self.0;
        let status =
            StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let message = if status.is_server_error() {
            error.user_message().to_string()
        } else {
            error.message().to_string()
        };
        let existing_workflow_id = match &error {
            InterfaceError::Conflict { existing_workflow_id, .. } => existing_workflow_id.clone(),
            _ => None,
        };

        let body = ErrorBody {
            error: error_code(&error),
            message,
            correlation_id: error.correlation_id().to_string(),
            existing_workflow_id,
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/workflows", get(list_workflows).post(create_workflow))
        .route("/api/v1/workflows/resolve", get(resolve_workflow))
        .route(
            "/api/v1/workflows/{workflow_id}",
            get(get_workflow).patch(update_workflow).delete(delete_workflow),
        )
        .route("/api/v1/approvals", get(list_requests).post(create_request))
        .route("/api/v1/approvals/{request_id}", get(get_request))
        .route("/api/v1/approvals/{request_id}/decisions", post(record_decision))
        .route("/api/v1/approvals/{request_id}/cancel", post(cancel_request))
        .with_state(state)
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn correlation_id(headers: &HeaderMap) -> String {
    header_value(headers, CORRELATION_HEADER)
        .map(ToString::to_string)
        .unwrap_or_else(|| format!("req-{}", Uuid::new_v4()))
}

/// Compares without an early exit on the first differing byte.
fn token_matches(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Resolves the caller from gateway headers.
fn authenticate(headers: &HeaderMap, state: &ApiState) -> ApiResult<OperationContext> {
    let correlation_id = correlation_id(headers);

    if let Some(expected) = &state.api_token {
        let presented = header_value(headers, AUTHORIZATION.as_str())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim);
        if !presented.is_some_and(|token| token_matches(token, expected.expose_secret())) {
            return Err(ApiError::unauthorized("missing or invalid bearer token", &correlation_id));
        }
    }

    let (Some(user_id), Some(org_id), Some(role_raw)) = (
        header_value(headers, USER_HEADER),
        header_value(headers, ORG_HEADER),
        header_value(headers, ROLE_HEADER),
    ) else {
        return Err(ApiError::unauthorized(
            format!("`{USER_HEADER}`, `{ORG_HEADER}` and `{ROLE_HEADER}` headers are required"),
            &correlation_id,
        ));
    };
    let Some(role) = OrgRole::parse(role_raw) else {
        return Err(ApiError::unauthorized(
            format!("unknown organization role `{role_raw}`"),
            &correlation_id,
        ));
    };

    Ok(OperationContext::new(Actor::new(user_id, org_id, role), correlation_id))
}

fn accept<T, E: std::fmt::Display>(
    extracted: Result<T, E>,
    ctx: &OperationContext,
) -> ApiResult<T> {
    extracted.map_err(|rejection| ApiError::bad_request(rejection.to_string(), &ctx.correlation_id))
}

fn fail(ctx: &OperationContext) -> impl FnOnce(ApplicationError) -> ApiError + '_ {
    move |error| ApiError::from_application(error, ctx)
}

#[derive(Debug, Default, Deserialize)]
pub struct WorkflowListParams {
    #[serde(default)]
    pub active_only: bool,
}

#[derive(Debug, Deserialize)]
pub struct ResolveParams {
    pub from_stage: String,
    pub to_stage: String,
}

#[derive(Debug, Serialize)]
pub struct ResolveResponse {
    pub guarded: bool,
    pub workflow: Option<ApprovalWorkflow>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApprovalListParams {
    pub status: Option<String>,
    pub grant_id: Option<String>,
    #[serde(default)]
    pub pending_for_me: bool,
}

impl ApprovalListParams {
    fn into_query(self) -> Result<RequestQuery, String> {
        let status = match self.status.as_deref().map(str::trim).filter(|raw| !raw.is_empty()) {
            Some(raw) => Some(
                ApprovalStatus::parse(raw).ok_or_else(|| format!("unknown status `{raw}`"))?,
            ),
            None => None,
        };
        let grant_id =
            self.grant_id.map(|raw| raw.trim().to_string()).filter(|raw| !raw.is_empty());

        Ok(RequestQuery {
            status,
            grant_id: grant_id.map(GrantId),
            pending_for_me: self.pending_for_me,
        })
    }
}

async fn list_workflows(
    State(state): State<ApiState>,
    headers: HeaderMap,
    params: Result<Query<WorkflowListParams>, QueryRejection>,
) -> ApiResult<Json<Vec<ApprovalWorkflow>>> {
    let ctx = authenticate(&headers, &state)?;
    let Query(params) = accept(params, &ctx)?;

    let workflows =
        state.service.list_workflows(&ctx, params.active_only).await.map_err(fail(&ctx))?;
    Ok(Json(workflows))
}

async fn create_workflow(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Result<Json<WorkflowDraft>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ApprovalWorkflow>)> {
    let ctx = authenticate(&headers, &state)?;
    let Json(draft) = accept(body, &ctx)?;

    let workflow = state.service.create_workflow(&ctx, draft).await.map_err(fail(&ctx))?;
    Ok((StatusCode::CREATED, Json(workflow)))
}

async fn resolve_workflow(
    State(state): State<ApiState>,
    headers: HeaderMap,
    params: Result<Query<ResolveParams>, QueryRejection>,
) -> ApiResult<Json<ResolveResponse>> {
    let ctx = authenticate(&headers, &state)?;
    let Query(params) = accept(params, &ctx)?;

    let workflow = state
        .service
        .resolve_workflow(&ctx, &Stage::new(params.from_stage), &Stage::new(params.to_stage))
        .await
        .map_err(fail(&ctx))?;
    Ok(Json(ResolveResponse { guarded: workflow.is_some(), workflow }))
}

async fn get_workflow(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(workflow_id): Path<String>,
) -> ApiResult<Json<ApprovalWorkflow>> {
    let ctx = authenticate(&headers, &state)?;

    let workflow =
        state.service.get_workflow(&ctx, &WorkflowId(workflow_id)).await.map_err(fail(&ctx))?;
    Ok(Json(workflow))
}

async fn update_workflow(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(workflow_id): Path<String>,
    body: Result<Json<WorkflowPatch>, JsonRejection>,
) -> ApiResult<Json<ApprovalWorkflow>> {
    let ctx = authenticate(&headers, &state)?;
    let Json(patch) = accept(body, &ctx)?;

    let workflow = state
        .service
        .update_workflow(&ctx, &WorkflowId(workflow_id), patch)
        .await
        .map_err(fail(&ctx))?;
    Ok(Json(workflow))
}

async fn delete_workflow(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(workflow_id): Path<String>,
) -> ApiResult<StatusCode> {
    let ctx = authenticate(&headers, &state)?;

    state.service.delete_workflow(&ctx, &WorkflowId(workflow_id)).await.map_err(fail(&ctx))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_requests(
    State(state): State<ApiState>,
    headers: HeaderMap,
    params: Result<Query<ApprovalListParams>, QueryRejection>,
) -> ApiResult<Json<Vec<RequestView>>> {
    let ctx = authenticate(&headers, &state)?;
    let Query(params) = accept(params, &ctx)?;
    let query = accept(params.into_query(), &ctx)?;

    let requests = state.service.list_requests(&ctx, query).await.map_err(fail(&ctx))?;
    Ok(Json(requests))
}

async fn create_request(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Result<Json<NewApprovalRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<InitiationResult>)> {
    let ctx = authenticate(&headers, &state)?;
    let Json(input) = accept(body, &ctx)?;

    let result = state.service.create_request(&ctx, input).await.map_err(fail(&ctx))?;
    let status = if result.request.is_some() { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(result)))
}

async fn get_request(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(request_id): Path<String>,
) -> ApiResult<Json<RequestView>> {
    let ctx = authenticate(&headers, &state)?;

    let view = state.service.get_request(&ctx, &ApprovalId(request_id)).await.map_err(fail(&ctx))?;
    Ok(Json(view))
}

async fn record_decision(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(request_id): Path<String>,
    body: Result<Json<DecisionCommand>, JsonRejection>,
) -> ApiResult<Json<DecisionResult>> {
    let ctx = authenticate(&headers, &state)?;
    let Json(command) = accept(body, &ctx)?;

    let result = state
        .service
        .record_decision(&ctx, &ApprovalId(request_id), command)
        .await
        .map_err(fail(&ctx))?;
    Ok(Json(result))
}

async fn cancel_request(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(request_id): Path<String>,
) -> ApiResult<Json<ApprovalRequest>> {
    let ctx = authenticate(&headers, &state)?;

    let request =
        state.service.cancel_request(&ctx, &ApprovalId(request_id)).await.map_err(fail(&ctx))?;
    Ok(Json(request))
}

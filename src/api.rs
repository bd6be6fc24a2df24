//! HTTP API for the Payroll Engine.
//!
//! This module exposes [`PayrollService`] as a small REST API using the
//! [`axum`](https://crates.io/crates/axum) framework.  Authentication
//! happens in front of this router: the authenticated user arrives in
//! the `x-user-id`, `x-user-role` and `x-company-id` headers and is
//! handed to the service as an explicit [`Actor`].

use crate::config::EngineConfig;
use crate::error::PayrollError;
use crate::models::{
    Actor, Company, Employee, LocalizedText, Notification, NotificationRecipient,
    PayrollRequest, Payslip, PayslipStatus, RecipientTarget, Role,
};
use crate::notification::{DeliveryReport, UnreadFeed};
use crate::payslip::GenerationReport;
use crate::service::{
    NewPayrollRequest, PayrollRequestPatch, PayrollService, TransitionCommand, TransitionOutcome,
};
use crate::store::Storage;
use anyhow::{Context, Result};
use axum::async_trait;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Application state shared across requests.
pub struct AppState {
    pub service: PayrollService,
}

/// Error returned by handlers, rendered as `{"error": "..."}`.
pub struct ApiError(PayrollError);

impl From<PayrollError> for ApiError {
    fn from(err: PayrollError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PayrollError::Validation(_) | PayrollError::ResourceExhausted(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            PayrollError::NotFound { .. } => StatusCode::NOT_FOUND,
            PayrollError::InvalidTransition { .. } => StatusCode::BAD_REQUEST,
            PayrollError::Forbidden(_) => StatusCode::FORBIDDEN,
            PayrollError::Conflict(_) => StatusCode::CONFLICT,
            PayrollError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "Request failed");
        }
        let body = Json(serde_json::json!({"error": self.0.to_string()}));
        (status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// The authenticated user, read from the headers set by the
/// authentication layer.
pub struct CurrentActor(pub Actor);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentActor
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> std::result::Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let unauthorized = |message: &str| {
            (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({"error": message})),
            )
                .into_response()
        };
        let user_id = header("x-user-id").ok_or_else(|| unauthorized("missing x-user-id header"))?;
        let role = match header("x-user-role").as_deref() {
            Some("super_admin") => Role::SuperAdmin,
            Some("employer") => Role::Employer,
            _ => return Err(unauthorized("x-user-role must be super_admin or employer")),
        };
        Ok(CurrentActor(Actor {
            user_id,
            role,
            company_id: header("x-company-id"),
        }))
    }
}

/// Build the API router over an existing service.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/companies", post(create_company))
        .route("/api/employees", post(save_employee))
        .route("/api/payroll-requests", post(create_request))
        .route(
            "/api/payroll-requests/:id",
            get(get_request).patch(update_request),
        )
        .route("/api/payroll-requests/:id/transition", post(transition))
        .route("/api/payroll-requests/:id/payslips", get(list_payslips))
        .route("/api/payslips/reconcile", post(reconcile_payslips))
        .route("/api/payslips/:id/status", post(advance_payslip))
        .route("/api/notifications", post(create_notification))
        .route("/api/notifications/unread", get(unread_notifications))
        .route("/api/notifications/:id/send", post(send_notification))
        .route(
            "/api/notification-recipients/:id/read",
            post(mark_notification_read),
        )
        .with_state(state)
}

async fn create_company(
    State(app): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Json(company): Json<Company>,
) -> ApiResult<Company> {
    if actor.role != Role::SuperAdmin {
        return Err(PayrollError::Forbidden("only super admins register companies".into()).into());
    }
    Ok(Json(app.service.save_company(company).await?))
}

async fn save_employee(
    State(app): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Json(employee): Json<Employee>,
) -> ApiResult<Employee> {
    Ok(Json(app.service.save_employee(&actor, employee).await?))
}

#[derive(Serialize)]
struct RequestView {
    title: String,
    #[serde(flatten)]
    request: PayrollRequest,
}

async fn view(app: &AppState, request: PayrollRequest) -> std::result::Result<RequestView, ApiError> {
    let title = app.service.request_title(&request).await?;
    Ok(RequestView { title, request })
}

async fn create_request(
    State(app): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Json(new): Json<NewPayrollRequest>,
) -> ApiResult<RequestView> {
    let request = app.service.create_request(&actor, new, Utc::now()).await?;
    Ok(Json(view(&app, request).await?))
}

async fn get_request(
    State(app): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<RequestView> {
    let request = app.service.request_for(&actor, &id).await?;
    Ok(Json(view(&app, request).await?))
}

async fn update_request(
    State(app): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    Json(patch): Json<PayrollRequestPatch>,
) -> ApiResult<RequestView> {
    let request = app
        .service
        .update_request(&actor, &id, patch, Utc::now())
        .await?;
    Ok(Json(view(&app, request).await?))
}

async fn transition(
    State(app): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    Json(command): Json<TransitionCommand>,
) -> ApiResult<TransitionOutcome> {
    Ok(Json(
        app.service
            .transition(&actor, &id, command, Utc::now())
            .await?,
    ))
}

async fn list_payslips(
    State(app): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<Vec<Payslip>> {
    app.service.request_for(&actor, &id).await?;
    Ok(Json(app.service.list_payslips(&id).await?))
}

#[derive(Deserialize)]
struct PayslipStatusBody {
    status: PayslipStatus,
}

async fn advance_payslip(
    State(app): State<Arc<AppState>>,
    CurrentActor(_actor): CurrentActor,
    Path(id): Path<String>,
    Json(body): Json<PayslipStatusBody>,
) -> ApiResult<Payslip> {
    Ok(Json(
        app.service
            .advance_payslip(&id, body.status, Utc::now())
            .await?,
    ))
}

#[derive(Serialize)]
struct ReconciledBatch {
    request_id: String,
    #[serde(flatten)]
    report: GenerationReport,
}

async fn reconcile_payslips(
    State(app): State<Arc<AppState>>,
    CurrentActor(_actor): CurrentActor,
) -> ApiResult<Vec<ReconciledBatch>> {
    let batches = app.service.reconcile_payslips(Utc::now()).await?;
    Ok(Json(
        batches
            .into_iter()
            .map(|(request_id, report)| ReconciledBatch { request_id, report })
            .collect(),
    ))
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RecipientType {
    All,
    Specific,
}

#[derive(Deserialize)]
struct NotificationBody {
    title: LocalizedText,
    message: LocalizedText,
    recipient_type: RecipientType,
    #[serde(default)]
    recipients: Vec<String>,
}

async fn create_notification(
    State(app): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Json(body): Json<NotificationBody>,
) -> ApiResult<Notification> {
    let target = match body.recipient_type {
        RecipientType::All => RecipientTarget::All,
        RecipientType::Specific => RecipientTarget::Specific(body.recipients),
    };
    Ok(Json(
        app.service
            .create_notification(&actor, body.title, body.message, target, Utc::now())
            .await?,
    ))
}

async fn send_notification(
    State(app): State<Arc<AppState>>,
    CurrentActor(_actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<DeliveryReport> {
    Ok(Json(app.service.send_notification(&id, Utc::now()).await?))
}

#[derive(Deserialize)]
struct UnreadQuery {
    company_id: Option<String>,
}

async fn unread_notifications(
    State(app): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Query(query): Query<UnreadQuery>,
) -> ApiResult<UnreadFeed> {
    Ok(Json(
        app.service
            .unread_notifications(&actor, query.company_id.as_deref())
            .await?,
    ))
}

async fn mark_notification_read(
    State(app): State<Arc<AppState>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> ApiResult<NotificationRecipient> {
    Ok(Json(
        app.service
            .mark_notification_read(&actor, &id, Utc::now())
            .await?,
    ))
}

/// Launch the API server over an in-memory store.  Binds to the
/// configured address and blocks until the server terminates.
pub async fn serve(config: EngineConfig) -> Result<()> {
    let addr = config.bind_addr.clone();
    let state = Arc::new(AppState {
        service: PayrollService::new(Storage::in_memory(), config),
    });
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "Server listening");
    axum::serve(listener, router).await?;
    Ok(())
}

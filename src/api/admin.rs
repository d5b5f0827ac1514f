//! Admin surface over the settlement core
//!
//! Search, detail, statistics, manual settle, retry, cancel, metrics, and
//! health. Permission enforcement sits in front of this service; the acting
//! identity arrives in the `x-admin-user` header and is recorded on every
//! mutating operation.

use crate::api::AppState;
use crate::database::pending_payment_repository::PendingPayment;
use crate::error::{AppError, AppErrorKind, AppResult, DomainError, ValidationError};
use crate::settlement::metrics::{health_report, HealthReport, MetricsSummary};
use crate::settlement::orchestrator::{CallerContext, ManualSettlementOutcome, SettlementResult};
use crate::settlement::store::{PaymentSearchFilter, PaymentStatistics, PaymentStatus};
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/payments", get(search_payments))
        .route("/payments/stats", get(payment_statistics))
        .route("/payments/{intent_id}", get(payment_detail))
        .route("/payments/{intent_id}/settle", post(settle_payment))
        .route("/payments/{intent_id}/retry", post(retry_payment))
        .route("/payments/{intent_id}/cancel", post(cancel_payment))
        .route("/metrics", get(metrics_summary))
        .route("/health", get(health))
}

/// Acting operator identity from the `x-admin-user` header
fn acting_identity(headers: &HeaderMap) -> AppResult<String> {
    headers
        .get("x-admin-user")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            AppError::new(AppErrorKind::Validation(ValidationError::MissingField {
                field: "x-admin-user".to_string(),
            }))
        })
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub status: Option<String>,
    pub order_code: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub is_retryable: Option<bool>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

impl SearchParams {
    fn into_filter(self) -> AppResult<PaymentSearchFilter> {
        let status = match self.status.as_deref() {
            None => None,
            Some(raw) => Some(PaymentStatus::from_db_status(raw).ok_or_else(|| {
                AppError::new(AppErrorKind::Validation(ValidationError::InvalidValue {
                    field: "status".to_string(),
                    reason: format!("unknown status '{}'", raw),
                }))
            })?),
        };
        Ok(PaymentSearchFilter {
            status,
            order_code: self.order_code,
            created_after: self.created_after,
            created_before: self.created_before,
            is_retryable: self.is_retryable,
            limit: 0,
            offset: 0,
        }
        .with_pagination(self.limit, self.offset))
    }
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub items: Vec<PendingPayment>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

async fn search_payments(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> AppResult<Json<SearchResponse>> {
    let filter = params.into_filter()?;
    let limit = filter.limit;
    let offset = filter.offset;
    let page = state.store.search(&filter).await?;
    Ok(Json(SearchResponse {
        items: page.items,
        total: page.total,
        limit,
        offset,
    }))
}

async fn payment_detail(
    State(state): State<Arc<AppState>>,
    Path(intent_id): Path<String>,
) -> AppResult<Json<PendingPayment>> {
    let payment = state
        .store
        .find_by_intent_id(&intent_id)
        .await?
        .ok_or_else(|| {
            AppError::new(AppErrorKind::Domain(DomainError::PaymentNotFound {
                intent_id: intent_id.clone(),
            }))
        })?;
    Ok(Json(payment))
}

async fn payment_statistics(
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<PaymentStatistics>> {
    Ok(Json(state.store.statistics().await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct SettleRequest {
    #[serde(default)]
    pub bypass_verification: bool,
}

async fn settle_payment(
    State(state): State<Arc<AppState>>,
    Path(intent_id): Path<String>,
    headers: HeaderMap,
    body: Option<Json<SettleRequest>>,
) -> AppResult<Json<ManualSettlementOutcome>> {
    let actor = acting_identity(&headers)?;
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let ctx = CallerContext::admin(actor);
    let outcome = state
        .orchestrator
        .manual_settle(&intent_id, &ctx, request.bypass_verification)
        .await;
    Ok(Json(outcome))
}

async fn retry_payment(
    State(state): State<Arc<AppState>>,
    Path(intent_id): Path<String>,
    headers: HeaderMap,
) -> AppResult<Json<SettlementResult>> {
    let actor = acting_identity(&headers)?;
    state
        .recovery
        .reset_for_retry(&intent_id, Some(&actor))
        .await?;
    let ctx = CallerContext::admin(actor);
    let result = state.orchestrator.settle(&intent_id, &ctx).await;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub canceled: bool,
    pub intent_id: String,
}

async fn cancel_payment(
    State(state): State<Arc<AppState>>,
    Path(intent_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<CancelRequest>,
) -> AppResult<Json<CancelResponse>> {
    let actor = acting_identity(&headers)?;
    if request.reason.trim().is_empty() {
        return Err(AppError::new(AppErrorKind::Validation(
            ValidationError::MissingField {
                field: "reason".to_string(),
            },
        )));
    }
    let ctx = CallerContext::admin(actor);
    state
        .orchestrator
        .cancel(&intent_id, &request.reason, &ctx)
        .await?;
    Ok(Json(CancelResponse {
        canceled: true,
        intent_id,
    }))
}

async fn metrics_summary(State(state): State<Arc<AppState>>) -> Json<MetricsSummary> {
    Json(state.metrics.snapshot())
}

async fn health(State(state): State<Arc<AppState>>) -> AppResult<Json<HealthReport>> {
    let backlog = state.store.backlog().await?;
    Ok(Json(health_report(
        state.metrics.snapshot(),
        &backlog,
        &state.alert_config,
    )))
}

//! Axum REST API handlers.
//!
//! Handlers are thin relays: they hand the request body to the
//! orchestrator and return its outcome verbatim.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::errors::{StepError, ValidationError};
use crate::oracle::{DeployThenRegister, RegisterViaFactory};
use crate::orchestrator::{DeploymentOrchestrator, PlanOutcome};
use crate::plan::PlanBuilder;
use crate::rpc::{ChainClient, StateQuery};

pub struct ApiState {
    pub orchestrator: DeploymentOrchestrator<dyn ChainClient>,
    pub register_via_factory: RegisterViaFactory,
    /// Absent when no oracle contract source is configured.
    pub deploy_then_register: Option<DeployThenRegister>,
    pub registry_address: String,
    pub run_deadline: Duration,
    /// Cancelled on shutdown; every run waits on a child of it.
    pub shutdown: CancellationToken,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/bridge/deploy-intelligent-oracle",
            post(deploy_intelligent_oracle),
        )
        .route("/bridge/deploy-and-register", post(deploy_and_register))
        .route("/oracles", get(list_oracles))
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct OraclesResponse {
    pub registry: String,
    pub count: usize,
    pub addresses: Value,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `POST /bridge/deploy-intelligent-oracle`
///
/// The registry deploys the oracle; returns once the triggered deployment
/// is accepted.
pub async fn deploy_intelligent_oracle(
    State(state): State<Arc<ApiState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Json<PlanOutcome> {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => return Json(unreadable_body(rejection)),
    };
    Json(run(&state, &state.register_via_factory, &body).await)
}

/// `POST /bridge/deploy-and-register`
///
/// Deploys the oracle contract, then records it in the registry.
pub async fn deploy_and_register(
    State(state): State<Arc<ApiState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Json<PlanOutcome> {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => return Json(unreadable_body(rejection)),
    };
    match &state.deploy_then_register {
        Some(builder) => Json(run(&state, builder, &body).await),
        None => Json(PlanOutcome::Failed {
            message: "Oracle contract source is not configured on this bridge".to_string(),
            failed_at_step: None,
            error: StepError::Plan("ORACLE_CONTRACT_PATH is not set".to_string()),
            receipts: Vec::new(),
        }),
    }
}

/// `GET /oracles`
///
/// Lists the contract addresses the registry knows about.
pub async fn list_oracles(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let query = StateQuery::new("get_contract_addresses");
    match state
        .orchestrator
        .client()
        .read_state(&state.registry_address, &query)
        .await
    {
        Ok(addresses) => {
            let count = addresses.as_array().map_or(0, Vec::len);
            (
                StatusCode::OK,
                Json(serde_json::json!(OraclesResponse {
                    registry: state.registry_address.clone(),
                    count,
                    addresses,
                })),
            )
                .into_response()
        }
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!(ErrorResponse {
                error: e.to_string()
            })),
        )
            .into_response(),
    }
}

/// A body that is not JSON fails like any other invalid input.
fn unreadable_body(rejection: JsonRejection) -> PlanOutcome {
    let error = ValidationError::Malformed(rejection.body_text());
    PlanOutcome::Failed {
        message: error.to_string(),
        failed_at_step: None,
        error: error.into(),
        receipts: Vec::new(),
    }
}

async fn run(state: &ApiState, builder: &dyn PlanBuilder, body: &Value) -> PlanOutcome {
    let cancel = state.shutdown.child_token();
    let deadline = cancel.clone();
    let run_deadline = state.run_deadline;
    let timer = tokio::spawn(async move {
        tokio::time::sleep(run_deadline).await;
        deadline.cancel();
    });

    let outcome = state.orchestrator.run_plan(builder, body, &cancel).await;
    timer.abort();
    outcome
}

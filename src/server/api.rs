//! Plugin operations over HTTP
//!
//! Every operation is a JSON `POST` under `/api/v1`. Success answers 200,
//! a failed operation answers 422 with the error text in the body:
//!
//! ```json
//! { "error": "HTTPRoute backendRef \"canary\" was not found", "verified": null }
//! ```

use super::health::ServerState;
use crate::router::{RolloutContext, RoutingError, SetHeaderRoute, WeightDestination};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::warn;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SetWeightRequest {
    pub rollout: RolloutContext,

    #[serde(rename = "desiredWeight")]
    pub desired_weight: i32,

    #[serde(rename = "additionalDestinations", default)]
    pub additional_destinations: Vec<WeightDestination>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SetHeaderRouteRequest {
    pub rollout: RolloutContext,

    #[serde(rename = "headerRouting")]
    pub header_routing: SetHeaderRoute,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UpdateHashRequest {
    pub rollout: RolloutContext,

    #[serde(rename = "canaryHash", default)]
    pub canary_hash: String,

    #[serde(rename = "stableHash", default)]
    pub stable_hash: String,

    #[serde(rename = "additionalDestinations", default)]
    pub additional_destinations: Vec<WeightDestination>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RolloutRequest {
    pub rollout: RolloutContext,
}

/// Outcome of a plugin operation
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct OperationResponse {
    #[serde(default)]
    pub error: Option<String>,

    /// Only set by verify-weight
    #[serde(default)]
    pub verified: Option<bool>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TypeResponse {
    #[serde(rename = "type")]
    pub type_name: String,
}

type ApiResponse = (StatusCode, Json<OperationResponse>);

pub(crate) fn routes() -> Router<ServerState> {
    Router::new()
        .route("/type", get(type_name))
        .route("/set-weight", post(set_weight))
        .route("/set-header-route", post(set_header_route))
        .route("/remove-managed-routes", post(remove_managed_routes))
        .route("/verify-weight", post(verify_weight))
        .route("/update-hash", post(update_hash))
}

async fn type_name(State(state): State<ServerState>) -> Json<TypeResponse> {
    Json(TypeResponse {
        type_name: state.plugin.type_name().to_string(),
    })
}

async fn set_weight(
    State(state): State<ServerState>,
    Json(request): Json<SetWeightRequest>,
) -> ApiResponse {
    let started = Instant::now();
    let result = state
        .plugin
        .set_weight(
            &request.rollout,
            request.desired_weight,
            &request.additional_destinations,
        )
        .await;
    respond(&state, "set-weight", &request.rollout, started, result.map(|()| None))
}

async fn set_header_route(
    State(state): State<ServerState>,
    Json(request): Json<SetHeaderRouteRequest>,
) -> ApiResponse {
    let started = Instant::now();
    let result = state
        .plugin
        .set_header_route(&request.rollout, &request.header_routing)
        .await;
    respond(
        &state,
        "set-header-route",
        &request.rollout,
        started,
        result.map(|()| None),
    )
}

async fn remove_managed_routes(
    State(state): State<ServerState>,
    Json(request): Json<RolloutRequest>,
) -> ApiResponse {
    let started = Instant::now();
    let result = state.plugin.remove_managed_routes(&request.rollout).await;
    respond(
        &state,
        "remove-managed-routes",
        &request.rollout,
        started,
        result.map(|()| None),
    )
}

async fn verify_weight(
    State(state): State<ServerState>,
    Json(request): Json<SetWeightRequest>,
) -> ApiResponse {
    let started = Instant::now();
    let result = state
        .plugin
        .verify_weight(
            &request.rollout,
            request.desired_weight,
            &request.additional_destinations,
        )
        .await;
    respond(&state, "verify-weight", &request.rollout, started, result)
}

async fn update_hash(
    State(state): State<ServerState>,
    Json(request): Json<UpdateHashRequest>,
) -> ApiResponse {
    let started = Instant::now();
    let result = state
        .plugin
        .update_hash(
            &request.rollout,
            &request.canary_hash,
            &request.stable_hash,
            &request.additional_destinations,
        )
        .await;
    respond(&state, "update-hash", &request.rollout, started, result.map(|()| None))
}

fn respond(
    state: &ServerState,
    operation: &str,
    rollout: &RolloutContext,
    started: Instant,
    result: Result<Option<bool>, RoutingError>,
) -> ApiResponse {
    let elapsed = started.elapsed().as_secs_f64();
    match result {
        Ok(verified) => {
            state.metrics.record_success(operation, elapsed);
            (
                StatusCode::OK,
                Json(OperationResponse {
                    error: None,
                    verified,
                }),
            )
        }
        Err(e) => {
            state.metrics.record_error(operation, elapsed);
            warn!(
                operation,
                rollout = %rollout.name,
                namespace = %rollout.namespace,
                error = %e,
                "Plugin operation failed"
            );
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(OperationResponse {
                    error: Some(e.to_string()),
                    verified: None,
                }),
            )
        }
    }
}

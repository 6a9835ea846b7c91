use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::error::GraphError;
use crate::graph::GraphEngine;
use crate::traversal::{Step, TraversalItem};
use crate::types::{IndexKind, IndexStatus, PropertyValue};

// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<GraphEngine>,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

// Request: {"steps": [{"v": []}, {"hasLabel": ["user_id"]}, {"in": ["related"]}, "count"]}
#[derive(Deserialize)]
pub struct TraversalRequest {
    pub steps: Vec<StepSpec>,
}

/// One step as it arrives over the wire. Property values are plain JSON scalars.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepSpec {
    V(Vec<Uuid>),
    E(Vec<Uuid>),
    HasLabel(Vec<String>),
    Has { key: String, value: serde_json::Value },
    Out(Vec<String>),
    In(Vec<String>),
    Both(Vec<String>),
    OutE(Vec<String>),
    InE(Vec<String>),
    BothE(Vec<String>),
    OutV,
    InV,
    OtherV,
    Values(Vec<String>),
    Properties(Vec<String>),
    Limit(usize),
    Dedup,
    Count,
}

impl TryFrom<StepSpec> for Step {
    type Error = GraphError;

    fn try_from(step: StepSpec) -> Result<Self, Self::Error> {
        Ok(match step {
            StepSpec::V(ids) => Step::V(ids),
            StepSpec::E(ids) => Step::E(ids),
            StepSpec::HasLabel(labels) => Step::HasLabel(labels),
            StepSpec::Has { key, value } => {
                let value = PropertyValue::from_json(&value).ok_or_else(|| {
                    GraphError::InvalidTraversal(format!("has({}): {} is not a property value", key, value))
                })?;
                Step::Has { key, value }
            }
            StepSpec::Out(labels) => Step::Out(labels),
            StepSpec::In(labels) => Step::In(labels),
            StepSpec::Both(labels) => Step::Both(labels),
            StepSpec::OutE(labels) => Step::OutE(labels),
            StepSpec::InE(labels) => Step::InE(labels),
            StepSpec::BothE(labels) => Step::BothE(labels),
            StepSpec::OutV => Step::OutV,
            StepSpec::InV => Step::InV,
            StepSpec::OtherV => Step::OtherV,
            StepSpec::Values(keys) => Step::Values(keys),
            StepSpec::Properties(keys) => Step::Properties(keys),
            StepSpec::Limit(n) => Step::Limit(n),
            StepSpec::Dedup => Step::Dedup,
            StepSpec::Count => Step::Count,
        })
    }
}

// Simplified index view for clients.
#[derive(Serialize, Deserialize)]
pub struct IndexSummary {
    pub name: String,
    pub kind: IndexKind,
    pub keys: Vec<String>,
    pub unique: bool,
    pub status: IndexStatus,
}

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/traversal", post(run_traversal))
        .route("/indexes", get(list_indexes))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

async fn ping() -> &'static str {
    "pong"
}

async fn run_traversal(
    State(state): State<AppState>,
    Json(payload): Json<TraversalRequest>,
) -> ApiResult<Vec<TraversalItem>> {
    let steps = payload
        .steps
        .into_iter()
        .map(Step::try_from)
        .collect::<Result<Vec<_>, _>>()
        .map_err(reject)?;

    let items = state.engine.traverse(steps).await.map_err(reject)?;
    tracing::info!(items = items.len(), "traversal served");
    Ok(Json(items))
}

async fn list_indexes(State(state): State<AppState>) -> ApiResult<Vec<IndexSummary>> {
    let indexes = state.engine.indexes().map_err(reject)?;
    Ok(Json(
        indexes
            .into_iter()
            .map(|d| IndexSummary {
                name: d.name,
                kind: d.kind,
                keys: d.keys,
                unique: d.unique,
                status: d.status,
            })
            .collect(),
    ))
}

fn reject(e: GraphError) -> (StatusCode, String) {
    let status = match &e {
        GraphError::InvalidTraversal(_) | GraphError::Schema(_) => StatusCode::BAD_REQUEST,
        GraphError::IndexNotFound(_) | GraphError::VertexNotFound(_) | GraphError::EdgeNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

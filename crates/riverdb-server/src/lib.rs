//! HTTP surface for RiverDB
//!
//! A thin axum layer over [`riverdb_command::Executor`]: session create and
//! close, one statement endpoint that returns rows as JSON, and a health
//! probe. Statement semantics (sessions single-consumer, DDL coordination,
//! query routing) all live below this crate.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use riverdb_command::{CommandError, Node, StatementResult};
use riverdb_core::Value;

#[derive(Clone)]
pub struct AppState {
    pub node: Arc<Node>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/v1/sessions", post(create_session))
        .route("/api/v1/sessions/:session_id", delete(close_session))
        .route("/api/v1/sql", post(execute_sql))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub schema: String,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
}

async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Json<CreateSessionResponse> {
    let session = state.node.executor().create_session(&request.schema);
    Json(CreateSessionResponse {
        session_id: session.id().to_string(),
    })
}

async fn close_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.node.executor().close_session(&session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct SqlRequest {
    pub session_id: String,
    pub sql: String,
}

#[derive(Debug, Serialize)]
pub struct ColumnResponse {
    pub name: String,
    pub data_type: String,
}

#[derive(Debug, Serialize)]
pub struct SqlResponse {
    pub request_id: String,
    pub columns: Vec<ColumnResponse>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub row_count: usize,
}

async fn execute_sql(
    State(state): State<AppState>,
    Json(request): Json<SqlRequest>,
) -> Result<Json<SqlResponse>, ApiError> {
    let request_id = Uuid::new_v4().to_string();
    debug!(request_id, sql = %request.sql, "executing statement");
    let session = state.node.executor().get_session(&request.session_id)?;
    let result = state
        .node
        .executor()
        .execute_statement(&session, &request.sql)
        .await?;
    Ok(Json(render_result(request_id, result)))
}

fn render_result(request_id: String, result: StatementResult) -> SqlResponse {
    let columns = result
        .col_names
        .iter()
        .zip(&result.col_types)
        .map(|(name, col_type)| ColumnResponse {
            name: name.clone(),
            data_type: col_type.name(),
        })
        .collect();
    let rows: Vec<Vec<serde_json::Value>> = result
        .rows
        .iter()
        .map(|row| row.values().iter().map(value_to_json).collect())
        .collect();
    SqlResponse {
        request_id,
        row_count: rows.len(),
        columns,
        rows,
    }
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::BigInt(v) | Value::Timestamp(v) => serde_json::Value::from(*v),
        Value::Double(v) => serde_json::Value::from(*v),
        Value::Varchar(s) => serde_json::Value::String(s.clone()),
        // Decimals travel as strings so precision survives JSON.
        Value::Decimal(d) => serde_json::Value::String(d.to_string()),
    }
}

/// Maps command errors onto HTTP statuses.
pub struct ApiError(CommandError);

impl From<CommandError> for ApiError {
    fn from(error: CommandError) -> Self {
        ApiError(error)
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            CommandError::SessionInUse => StatusCode::CONFLICT,
            CommandError::UnknownSession(_) | CommandError::UnknownPreparedStatement(_) => {
                StatusCode::NOT_FOUND
            }
            CommandError::Sql(_) | CommandError::NotPreparable(_) => StatusCode::BAD_REQUEST,
            CommandError::Meta(meta_error) => match meta_error {
                riverdb_meta::MetaError::SourceAlreadyExists { .. }
                | riverdb_meta::MetaError::MaterializedViewAlreadyExists { .. } => {
                    StatusCode::CONFLICT
                }
                riverdb_meta::MetaError::UnknownSource { .. }
                | riverdb_meta::MetaError::UnknownMaterializedView { .. } => {
                    StatusCode::NOT_FOUND
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            CommandError::SourceInUse { .. } => StatusCode::CONFLICT,
            CommandError::DdlTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

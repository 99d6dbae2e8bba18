//! API route handlers for the gateway.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

use flowpilot_core::{FlowError, LogStatus};
use flowpilot_process::ProcessDefinition;

use super::server::AppState;

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

fn api_error(status: StatusCode, message: impl std::fmt::Display) -> (StatusCode, Json<Value>) {
    (status, Json(json!({"ok": false, "error": message.to_string()})))
}

fn from_flow_error(e: FlowError) -> (StatusCode, Json<Value>) {
    let status = match &e {
        FlowError::NotFound(_) => StatusCode::NOT_FOUND,
        FlowError::Validation(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, e)
}

fn required<'a>(
    params: &'a HashMap<String, String>,
    key: &str,
) -> Result<&'a str, (StatusCode, Json<Value>)> {
    params
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, format!("missing query param '{key}'")))
}

/// Health check endpoint.
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "flowpilot-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// System information endpoint.
pub async fn system_info(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "platform": format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Create or replace a process definition.
pub async fn save_process(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> ApiResult {
    let def: ProcessDefinition = serde_json::from_value(body)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("invalid definition: {e}")))?;
    let saved = state
        .engine
        .save_definition(&def)
        .await
        .map_err(from_flow_error)?;
    Ok(Json(json!({"ok": true, "definition": saved})))
}

/// Fetch one tenant's definition by name.
pub async fn get_process(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    let tenant = required(&params, "tenant")?;
    let def = state
        .engine
        .load_definition(tenant, &name)
        .await
        .map_err(from_flow_error)?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("process '{name}' not found")))?;
    Ok(Json(json!({"ok": true, "definition": def})))
}

/// Delete a definition. Returns 400 while subjects still reference it.
pub async fn delete_process(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    let tenant = required(&params, "tenant")?;
    let def = state
        .engine
        .load_definition(tenant, &name)
        .await
        .map_err(from_flow_error)?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("process '{name}' not found")))?;
    state
        .engine
        .delete_definition(&def)
        .await
        .map_err(from_flow_error)?;
    Ok(Json(json!({"ok": true})))
}

/// Pending actions for a tenant, optionally filtered to those already due.
pub async fn list_actions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    let tenant = required(&params, "tenant")?;
    let due_before = match params.get("due_before") {
        Some(raw) => Some(
            raw.parse::<DateTime<Utc>>()
                .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("due_before: {e}")))?,
        ),
        None => None,
    };
    let actions = state
        .engine
        .store()
        .list_pending(tenant, None, due_before)
        .map_err(from_flow_error)?;
    Ok(Json(json!({"ok": true, "actions": actions})))
}

/// Actions held for approval.
pub async fn list_approvals(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    let tenant = required(&params, "tenant")?;
    let actions = state
        .engine
        .store()
        .awaiting_approval(tenant)
        .map_err(from_flow_error)?;
    Ok(Json(json!({"ok": true, "actions": actions})))
}

/// Approve a held action: release it and execute immediately.
pub async fn approve_action(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    state.engine.approve(&id).await.map_err(from_flow_error)?;
    Ok(Json(json!({"ok": true})))
}

/// Reject a held action.
pub async fn reject_action(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let cancelled = state.engine.reject(&id).await.map_err(from_flow_error)?;
    Ok(Json(json!({"ok": true, "cancelled": cancelled})))
}

/// Automation log entries, newest first.
pub async fn query_log(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    let tenant = required(&params, "tenant")?;
    let status = match params.get("status") {
        Some(raw) => Some(LogStatus::parse(raw).ok_or_else(|| {
            api_error(StatusCode::BAD_REQUEST, format!("unknown status '{raw}'"))
        })?),
        None => None,
    };
    let limit = params
        .get("limit")
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(50);
    let entries = state
        .engine
        .log()
        .query(tenant, status, limit)
        .map_err(from_flow_error)?;
    Ok(Json(json!({"ok": true, "entries": entries})))
}

/// Client-portal projection of a process: externally visible stages only,
/// stripped of timing, actions, and approval settings.
pub async fn portal_stages(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult {
    let tenant = required(&params, "tenant")?;
    let def = state
        .engine
        .load_definition(tenant, &name)
        .await
        .map_err(from_flow_error)?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("process '{name}' not found")))?;
    let external: Vec<&str> = def.portal_stages().iter().map(|s| s.id.as_str()).collect();
    let stages: Vec<Value> = def
        .stages
        .iter()
        .enumerate()
        .filter(|(_, s)| external.contains(&s.id.as_str()))
        .map(|(i, s)| {
            json!({
                "position": i + 1,
                "name": s.name,
                "description": s.description,
                "category": s.category,
            })
        })
        .collect();
    Ok(Json(json!({"ok": true, "process": def.name, "stages": stages})))
}

//! API handlers: blueprint authoring helpers and the manual run trigger.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, warn};

use crate::blueprint::{self, ExtractionRules};
use crate::scheduler::RunError;

use super::AppState;

type ApiResponse = (StatusCode, Json<Value>);

fn ok(value: Value) -> ApiResponse {
    (StatusCode::OK, Json(value))
}

fn error_response(status: StatusCode, message: impl Into<String>) -> ApiResponse {
    (status, Json(json!({ "error": message.into() })))
}

pub async fn health() -> ApiResponse {
    ok(json!({ "status": "ok" }))
}

#[derive(Deserialize)]
pub struct FetchHtmlRequest {
    #[serde(default)]
    org_id: String,
    #[serde(default)]
    url: String,
}

pub async fn fetch_html(
    State(state): State<AppState>,
    Json(req): Json<FetchHtmlRequest>,
) -> ApiResponse {
    if req.org_id.is_empty() || req.url.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "org_id and url are required");
    }

    let raw_html = match state.fetcher.fetch_html(&req.url).await {
        Ok(html) => html,
        Err(err) => {
            error!(url = %req.url, error = %err, "fetch HTML failed");
            return error_response(
                StatusCode::BAD_GATEWAY,
                format!("failed to fetch HTML: {err}"),
            );
        }
    };

    ok(json!({ "cleaned_html": blueprint::clean(&raw_html) }))
}

#[derive(Deserialize)]
pub struct GenerateBlueprintRequest {
    #[serde(default)]
    org_id: String,
    #[serde(default)]
    cleaned_html: String,
    #[serde(default)]
    schema_type: String,
}

#[derive(Serialize)]
struct GenerateBlueprintResponse {
    extraction_rules: ExtractionRules,
    test_results: Option<Vec<serde_json::Map<String, Value>>>,
}

pub async fn generate_blueprint(
    State(state): State<AppState>,
    Json(req): Json<GenerateBlueprintRequest>,
) -> ApiResponse {
    if req.org_id.is_empty() || req.cleaned_html.is_empty() || req.schema_type.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "org_id, cleaned_html, and schema_type are required",
        );
    }

    let Some(schema) = blueprint::get_schema(&req.schema_type) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("unknown schema_type: {}", req.schema_type),
        );
    };

    let rules = match state.authoring.generate_rules(&req.cleaned_html, &schema).await {
        Ok(rules) => rules,
        Err(err) => {
            error!(error = %err, "generate extraction rules failed");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to generate extraction rules: {err}"),
            );
        }
    };

    // Validate the generated rules against the same HTML.
    let test_results = match blueprint::extract(&req.cleaned_html, &rules) {
        Ok(entities) => Some(entities),
        Err(err) => {
            warn!(error = %err, "test extraction failed");
            None
        }
    };

    match serde_json::to_value(GenerateBlueprintResponse {
        extraction_rules: rules,
        test_results,
    }) {
        Ok(value) => ok(value),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

#[derive(Deserialize)]
pub struct TestBlueprintRequest {
    #[serde(default)]
    org_id: String,
    #[serde(default)]
    url: String,
    extraction_rules: Option<ExtractionRules>,
}

pub async fn test_blueprint(
    State(state): State<AppState>,
    Json(req): Json<TestBlueprintRequest>,
) -> ApiResponse {
    let Some(rules) = req.extraction_rules else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "org_id, url, and extraction_rules are required",
        );
    };
    if req.org_id.is_empty() || req.url.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "org_id, url, and extraction_rules are required",
        );
    }

    let raw_html = match state.fetcher.fetch_html(&req.url).await {
        Ok(html) => html,
        Err(err) => {
            error!(url = %req.url, error = %err, "fetch HTML failed");
            return error_response(
                StatusCode::BAD_GATEWAY,
                format!("failed to fetch HTML: {err}"),
            );
        }
    };

    let cleaned = blueprint::clean(&raw_html);
    let (entities, errors) = match blueprint::extract(&cleaned, &rules) {
        Ok(entities) => (entities, Vec::new()),
        Err(err) => (Vec::new(), vec![err.to_string()]),
    };

    ok(json!({ "entities": entities, "errors": errors }))
}

#[derive(Deserialize)]
pub struct RunWatchRequest {
    #[serde(default)]
    org_id: String,
    #[serde(default)]
    watch_id: String,
}

pub async fn run_watch(
    State(state): State<AppState>,
    Json(req): Json<RunWatchRequest>,
) -> ApiResponse {
    if req.org_id.is_empty() || req.watch_id.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "org_id and watch_id are required");
    }

    let Some(scheduler) = &state.scheduler else {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "scheduler not available");
    };

    // The run id comes back even when execution failed, so callers can
    // inspect the run row.
    match scheduler.run_single(&req.watch_id).await {
        Ok(run_id) => ok(json!({ "run_id": run_id })),
        Err(err @ RunError::WatchNotFound(_)) => {
            error_response(StatusCode::BAD_REQUEST, err.to_string())
        }
        Err(err) => {
            error!(watch_id = %req.watch_id, error = %err, "run watch failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to run watch: {err}"),
            )
        }
    }
}

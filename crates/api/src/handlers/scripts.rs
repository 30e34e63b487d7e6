//! Handlers for adding, listing, running, reading and removing scripts.
//!
//! Script definitions, invocation variables and results travel as YAML
//! text (`text/vnd.yaml`); id listings as plain text, one id per line.

use axum::extract::{Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use scripter_core::serialization::{dump_value, load_variables};
use scripter_core::{CoreError, Execution, Value};
use serde::Deserialize;

use crate::error::AppResult;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const YAML_CONTENT_TYPE: &str = "text/vnd.yaml";
pub const TEXT_CONTENT_TYPE: &str = "text/plain";

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// Query parameters for `POST /scripts`.
#[derive(Debug, Default, Deserialize)]
pub struct AddScriptQuery {
    /// Overwrite an existing script with the same id.
    #[serde(default)]
    pub replace: bool,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /scripts
///
/// Add a script from its YAML definition. Returns 201 with the previous
/// definition under the same id, or an empty body.
pub async fn add_script(
    State(state): State<AppState>,
    Query(query): Query<AddScriptQuery>,
    body: String,
) -> AppResult<Response> {
    let previous = state.scripter.add(&body, query.replace).await?;

    Ok((
        StatusCode::CREATED,
        [(CONTENT_TYPE, YAML_CONTENT_TYPE)],
        previous.unwrap_or_default(),
    )
        .into_response())
}

/// GET /scripts
///
/// List script ids, optionally restricted to those matching any of the
/// repeated `pattern` parameters.
pub async fn list_scripts(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
) -> AppResult<Response> {
    let patterns: Vec<String> = params
        .into_iter()
        .filter(|(name, _)| name == "pattern")
        .map(|(_, value)| value)
        .collect();

    let ids = state.scripter.list_ids_matching(&patterns).await?;
    tracing::debug!(count = ids.len(), "Listed scripts");

    Ok(([(CONTENT_TYPE, TEXT_CONTENT_TYPE)], ids.join("\n")).into_response())
}

/// POST /scripts/{id}
///
/// Execute a script with the YAML mapping in the body as invocation
/// variables (an empty body means none). A null result and a service id
/// both answer 204.
pub async fn execute_script(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: String,
) -> AppResult<Response> {
    let variables = load_variables(&body)?;

    match state.scripter.execute(&id, Some(variables)).await? {
        Execution::Completed(Value::Null) | Execution::NotInvocable => {
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        Execution::Completed(value) => {
            let text = dump_value(&value)?;
            Ok((
                StatusCode::OK,
                [(CONTENT_TYPE, YAML_CONTENT_TYPE)],
                text,
            )
                .into_response())
        }
    }
}

/// GET /scripts/{id}
///
/// Return the stored YAML definition.
pub async fn get_script(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let source = state
        .scripter
        .get_source(&id)
        .await?
        .ok_or(CoreError::NotFound {
            entity: "Script",
            id,
        })?;

    Ok(([(CONTENT_TYPE, YAML_CONTENT_TYPE)], source).into_response())
}

/// DELETE /scripts/{id}
///
/// Remove a script. Removing an unknown id is not an error.
pub async fn remove_script(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    state.scripter.remove(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

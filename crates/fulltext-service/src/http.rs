//! Thin axum front door (§6.1, §10.5). Every handler extracts path/query
//! parameters and calls straight into a C7 controller function; no business
//! logic lives here.

use crate::controllers::{self, Authorizer, RetrieveOutcome, StartOutcome, StatusOutcome};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use fulltext_core::Error;
use fulltext_worker::Coordinator;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub store: Arc<dyn fulltext_core::Store>,
    pub coordinator: Arc<Coordinator>,
    pub authorizer: Authorizer,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/:bucket/*rest", get(retrieve_path).post(start_path))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

fn to_http(err: Error) -> Response {
    let code = match err {
        Error::DoesNotExist(_) | Error::NoSuchTask(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (code, err.to_string()).into_response()
}

async fn status(State(state): State<Arc<AppState>>) -> Response {
    if controllers::service_status(&*state.store, &state.coordinator).await {
        StatusCode::OK.into_response()
    } else {
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    }
}

#[derive(Deserialize)]
struct StartQuery {
    #[serde(default)]
    force: bool,
    token: Option<String>,
}

async fn start_path(
    State(state): State<Arc<AppState>>,
    Path((bucket, rest)): Path<(String, String)>,
    Query(q): Query<StartQuery>,
) -> Response {
    let identifier = rest.trim_end_matches("/status").to_string();
    match controllers::start_extraction(
        &state.coordinator,
        &bucket,
        &identifier,
        q.token.as_deref(),
        q.force,
        &state.authorizer,
    )
    .await
    {
        Ok(StartOutcome::Accepted { status_location }) => (
            StatusCode::ACCEPTED,
            [("Location", status_location)],
        )
            .into_response(),
        Ok(StartOutcome::SeeOther { location }) => {
            (StatusCode::SEE_OTHER, [("Location", location)]).into_response()
        }
        Ok(StartOutcome::NotFound) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => to_http(e),
    }
}

#[derive(Deserialize)]
struct RetrieveQuery {
    version: Option<String>,
    format: Option<String>,
}

#[derive(Serialize)]
struct ExtractionBody {
    identifier: String,
    version: String,
    status: String,
    started: chrono::DateTime<chrono::Utc>,
    ended: Option<chrono::DateTime<chrono::Utc>>,
    owner: Option<String>,
    task_id: String,
    exception: Option<String>,
    content: Option<String>,
}

impl From<fulltext_core::Extraction> for ExtractionBody {
    fn from(e: fulltext_core::Extraction) -> Self {
        Self {
            identifier: e.identifier,
            version: e.version,
            status: e.status.as_str().to_string(),
            started: e.started,
            ended: e.ended,
            owner: e.owner,
            task_id: e.task_id,
            exception: e.exception,
            content: e.content,
        }
    }
}

/// Parses `{identifier}[/version/{v}][/format/{f}]` or
/// `{identifier}[/version/{v}]/status` out of the wildcard tail, since
/// submission identifiers themselves contain a `/`.
fn split_tail(rest: &str) -> (String, Option<String>, bool) {
    let mut parts: Vec<&str> = rest.split('/').collect();
    let is_status = parts.last() == Some(&"status");
    if is_status {
        parts.pop();
    }
    if parts.len() >= 2 && parts[parts.len() - 2] == "version" {
        let version = parts[parts.len() - 1].to_string();
        parts.truncate(parts.len() - 2);
        (parts.join("/"), Some(version), is_status)
    } else {
        (parts.join("/"), None, is_status)
    }
}

async fn retrieve_path(
    State(state): State<Arc<AppState>>,
    Path((bucket, rest)): Path<(String, String)>,
    Query(q): Query<RetrieveQuery>,
) -> Response {
    let (identifier, version, is_status) = split_tail(&rest);
    let version = version.as_deref().or(q.version.as_deref());

    if is_status {
        return status_path(&state, &bucket, &identifier, version).await;
    }

    let format = q.format.as_deref().unwrap_or("plain");
    match controllers::retrieve(
        &*state.store,
        &identifier,
        &bucket,
        version,
        format,
        &state.authorizer,
    )
    .await
    {
        Ok(RetrieveOutcome::Found(extraction)) => {
            Json(ExtractionBody::from(extraction)).into_response()
        }
        Ok(RetrieveOutcome::SeeOther { location }) => {
            (StatusCode::SEE_OTHER, [("Location", location)]).into_response()
        }
        Ok(RetrieveOutcome::NotFound) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => to_http(e),
    }
}

#[derive(Serialize)]
struct StatusBody {
    status: &'static str,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

async fn status_path(
    state: &AppState,
    bucket: &str,
    identifier: &str,
    version: Option<&str>,
) -> Response {
    match controllers::task_status(&state.coordinator, bucket, identifier, version, &state.authorizer)
        .await
    {
        Ok(StatusOutcome::InProgress) => Json(StatusBody {
            status: "in_progress",
            content: None,
            reason: None,
        })
        .into_response(),
        Ok(StatusOutcome::Failed { reason }) => Json(StatusBody {
            status: "failed",
            content: None,
            reason,
        })
        .into_response(),
        Ok(StatusOutcome::SeeOther { location }) => {
            (StatusCode::SEE_OTHER, [("Location", location)]).into_response()
        }
        Ok(StatusOutcome::NotFound) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => to_http(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_tail_extracts_version_and_status() {
        assert_eq!(
            split_tail("1801.00123/version/1.0/status"),
            ("1801.00123".to_string(), Some("1.0".to_string()), true)
        );
        assert_eq!(
            split_tail("1801.00123"),
            ("1801.00123".to_string(), None, false)
        );
        assert_eq!(
            split_tail("12345/abc==/version/1.0"),
            ("12345/abc==".to_string(), Some("1.0".to_string()), false)
        );
    }
}

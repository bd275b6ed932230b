use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};

use lib_common::cascade::{CommandError, CommandKind, ControlError};
use lib_common::gateway::AuthError;

use crate::telemetry_logic::state::AppState;

/// Failure of a command request, mapped onto an HTTP status.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized(AuthError),
    BadRequest(String),
    Conflict(String),
    Backend(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Backend(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Unauthorized(e) => e.to_string(),
            ApiError::BadRequest(m) | ApiError::Conflict(m) | ApiError::Backend(m) => m.clone(),
        }
    }
}

impl From<ControlError> for ApiError {
    fn from(e: ControlError) -> Self {
        match e {
            ControlError::UnsupportedCommand(_) => ApiError::BadRequest(e.to_string()),
            ControlError::NotFound(_) | ControlError::Refused { .. } => ApiError::Conflict(e.to_string()),
            ControlError::Backend(_) => ApiError::Backend(e.to_string()),
        }
    }
}

impl From<CommandError> for ApiError {
    fn from(e: CommandError) -> Self {
        match e {
            CommandError::Rejected { .. } => ApiError::Conflict(e.to_string()),
            CommandError::Control(inner) => inner.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.message() }));
        (self.status(), body).into_response()
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
}

/// `POST /api/resources/{id}/{command}`
///
/// Answers once the command is accepted; confirmation and the dependent
/// cascade continue in the background and are only logged.
pub async fn command_handler(
    State(state): State<AppState>,
    Path((resource_id, command)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let identity = state
        .auth
        .authenticate(bearer_token(&headers))
        .await
        .map_err(|e| {
            tracing::warn!(%resource_id, error = %e, "command request not authenticated");
            ApiError::Unauthorized(e)
        })?;

    let command: CommandKind = command.parse()?;
    tracing::info!(subject = %identity.subject_id, %resource_id, %command, "command requested");

    let ticket = state.orchestrator.execute(&resource_id, command).await?;
    let body = json!({
        "resourceId": ticket.resource_id,
        "command": ticket.command,
        "accepted": ticket.ack.accepted,
        "detail": ticket.ack.detail,
    });

    let follow_up = ticket.follow_up;
    tokio::spawn(async move {
        match follow_up.await {
            Ok(report) => {
                let failed = report.cascade.iter().filter(|d| !d.succeeded()).count();
                tracing::info!(
                    %resource_id,
                    %command,
                    confirmed = report.confirmation.is_confirmed(),
                    dependents = report.cascade.len(),
                    failed,
                    "command follow-up finished"
                );
            }
            Err(e) => tracing::error!(%resource_id, %command, error = %e, "command follow-up task failed"),
        }
    });

    Ok((StatusCode::ACCEPTED, Json(body)))
}

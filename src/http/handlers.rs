use super::state::AppState;
use crate::call::{CreateCallResponse, SignedUrlResponse};
use crate::providers::{resolve_agent_id, Provider, DEFAULT_LLM};
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct CreateCallRequest {
    /// LLM selection key (default: gpt4ominirt)
    pub llm: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SignedUrlQuery {
    pub llm: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallDataQuery {
    #[serde(rename = "callId")]
    pub call_id: Option<String>,

    /// `transcript` or `recording_url` to receive the file instead of JSON
    pub download: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}

fn agent_for(state: &AppState, provider: Provider, llm: &str) -> Option<String> {
    resolve_agent_id(provider, llm, state.default_agent(provider))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/create-retell-call
/// Create a Retell web call for the chosen LLM
///
/// A missing agent id is a normal answer (200 with `error`, no token); only
/// vendor failures are errors.
pub async fn create_retell_call(
    State(state): State<AppState>,
    body: Option<Json<CreateCallRequest>>,
) -> Response {
    let llm = body
        .and_then(|Json(req)| req.llm)
        .unwrap_or_else(|| DEFAULT_LLM.to_string());

    let Some(agent_id) = agent_for(&state, Provider::Retell, &llm) else {
        warn!("No Retell agent configured for llm {}", llm);
        return (
            StatusCode::OK,
            Json(CreateCallResponse {
                error: Some(format!("No Retell agent configured for llm {}", llm)),
                ..Default::default()
            }),
        )
            .into_response();
    };

    match state.vendor.create_web_call(&agent_id).await {
        Ok(call) => {
            info!(
                "Retell call created: {}",
                call.get("call_id").and_then(serde_json::Value::as_str).unwrap_or("unknown")
            );
            (StatusCode::OK, Json(call)).into_response()
        }
        Err(e) => {
            error!("Failed to create Retell call: {:#}", e);
            error_response(
                StatusCode::BAD_GATEWAY,
                format!("Failed to create Retell call: {}", e),
            )
        }
    }
}

/// GET /api/get-elevenlabs-signed-url?llm=
/// Signed conversation url for the chosen LLM's ElevenLabs agent
pub async fn get_elevenlabs_signed_url(
    State(state): State<AppState>,
    Query(query): Query<SignedUrlQuery>,
) -> Response {
    let llm = query.llm.unwrap_or_else(|| DEFAULT_LLM.to_string());

    let Some(agent_id) = agent_for(&state, Provider::Eleven, &llm) else {
        warn!("No ElevenLabs agent configured for llm {}", llm);
        return (
            StatusCode::OK,
            Json(SignedUrlResponse {
                signed_url: None,
                error: Some(format!("No ElevenLabs agent configured for llm {}", llm)),
            }),
        )
            .into_response();
    };

    match state.vendor.get_signed_url(&agent_id).await {
        Ok(signed_url) => (
            StatusCode::OK,
            Json(SignedUrlResponse {
                signed_url: Some(signed_url),
                error: None,
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to get signed url: {:#}", e);
            error_response(
                StatusCode::BAD_GATEWAY,
                format!("Failed to get signed URL: {}", e),
            )
        }
    }
}

/// GET /api/get-call-data?callId=&download=
/// Retell call record, or its transcript / recording as an attachment
pub async fn get_call_data(
    State(state): State<AppState>,
    Query(query): Query<CallDataQuery>,
) -> Response {
    let Some(call_id) = query.call_id.filter(|id| !id.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "callId is required".to_string());
    };

    let call = match state.vendor.get_call(&call_id).await {
        Ok(call) => call,
        Err(e) => {
            error!("Failed to retrieve call {}: {:#}", call_id, e);
            return error_response(
                StatusCode::BAD_GATEWAY,
                format!("Failed to retrieve call {}: {}", call_id, e),
            );
        }
    };

    match query.download.as_deref() {
        Some("transcript") => {
            if let Some(transcript) = call.get("transcript").and_then(Value::as_str) {
                return (
                    [
                        (header::CONTENT_TYPE, "text/plain".to_string()),
                        (
                            header::CONTENT_DISPOSITION,
                            format!("attachment; filename=\"retell-transcript-{}.txt\"", call_id),
                        ),
                    ],
                    transcript.to_string(),
                )
                    .into_response();
            }
        }
        Some("recording_url") => {
            if let Some(url) = call.get("recording_url").and_then(Value::as_str) {
                return match state.vendor.fetch_recording(url).await {
                    Ok(bytes) => (
                        [
                            (header::CONTENT_TYPE, "audio/mpeg".to_string()),
                            (
                                header::CONTENT_DISPOSITION,
                                format!("attachment; filename=\"recording-{}.mp3\"", call_id),
                            ),
                        ],
                        bytes,
                    )
                        .into_response(),
                    Err(e) => {
                        error!("Failed to fetch recording for {}: {:#}", call_id, e);
                        error_response(
                            StatusCode::BAD_GATEWAY,
                            format!("Failed to fetch recording: {}", e),
                        )
                    }
                };
            }
        }
        _ => {}
    }

    (StatusCode::OK, Json(call)).into_response()
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

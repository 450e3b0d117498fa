use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::logging::{RequestLogger, SharedLogger};
use crate::proxy::{self, RelayStream};
use crate::translate::classify::resolve_target_language;
use crate::translate::openai_types::{ChatCompletionRequest, Role};
use crate::translate::options::{parse_options, system_content};
use crate::translate::request::build_upstream_request;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: ProxyConfig,
    pub client: reqwest::Client,
    pub logger: SharedLogger,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/chat/completions", post(handle_chat_completions))
        .route("/health", get(handle_health))
        .route("/v1/models", get(handle_models))
        .route("/logs", get(handle_logs))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let log = state
        .logger
        .for_request(uuid::Uuid::new_v4().simple().to_string());

    match translate(&state, &headers, &body, &log).await {
        Ok(response) => response,
        Err(e) => {
            let status = e.status_code();
            if status.is_server_error() {
                log.error("server", format!("{} ({})", e, status));
            } else {
                log.warn("server", format!("{} ({})", e, status));
            }
            e.into_response()
        }
    }
}

/// Validate, resolve options, call the upstream and reshape.
async fn translate(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
    log: &RequestLogger,
) -> Result<Response> {
    authorize(&state.config, headers)?;
    let req = parse_request(body)?;

    let options = parse_options(system_content(&req.messages).as_deref());
    let target = resolve_target_language(&req.messages, &options);
    let inferred = options.target_language.is_none();

    log.info_with_context(
        "server",
        format!(
            "Request: model={} streaming={} messages={}",
            req.model,
            req.stream,
            req.messages.len()
        ),
        serde_json::json!({
            "target_lang": target,
            "inferred": inferred,
            "passthrough_keys": options.passthrough.keys().collect::<Vec<_>>(),
        }),
    );

    let upstream_req = build_upstream_request(&req, &options, &target, &state.config);

    if req.stream {
        let events = proxy::translate_streaming(
            &upstream_req,
            &req.model,
            &state.config,
            &state.client,
            log,
        )
        .await?;
        Ok(sse_response(events))
    } else {
        let resp = proxy::translate_non_streaming(
            &upstream_req,
            &req.model,
            &state.config,
            &state.client,
            log,
        )
        .await?;
        Ok(Json(resp).into_response())
    }
}

/// Extract the token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| ProxyError::validation("Missing Authorization header"))?
        .to_str()
        .map_err(|_| ProxyError::validation("Authorization header is not valid ASCII"))?;

    match value.trim().split_once(' ') {
        Some((scheme, token))
            if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() =>
        {
            Ok(token.trim())
        }
        _ => Err(ProxyError::validation(
            "Authorization header must have the form 'Bearer <token>'",
        )),
    }
}

/// Check the caller's bearer token against the configured allow-list.
pub fn authorize(config: &ProxyConfig, headers: &HeaderMap) -> Result<()> {
    let token = bearer_token(headers)?;
    if !config.accepts_token(token) {
        return Err(ProxyError::unauthorized("Invalid API key"));
    }
    Ok(())
}

/// Parse the body and check it holds something to translate.
pub fn parse_request(body: &[u8]) -> Result<ChatCompletionRequest> {
    let req: ChatCompletionRequest = serde_json::from_slice(body)
        .map_err(|e| ProxyError::validation(format!("Invalid request body: {}", e)))?;

    if !req.messages.iter().any(|m| m.role == Role::User) {
        return Err(ProxyError::validation(
            "Request must contain at least one user message",
        ));
    }

    Ok(req)
}

fn sse_response(events: RelayStream) -> Response {
    let event_stream = events.map(|event| -> std::result::Result<Event, Infallible> {
        Ok(Event::default().data(event.to_sse_data()))
    });

    Sse::new(event_stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_models(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let mut names: Vec<&String> = state.config.upstream.model.iter().collect();
    let mut aliases: Vec<&String> = state.config.models.keys().collect();
    aliases.sort();
    names.extend(aliases);

    let models: Vec<serde_json::Value> = names
        .into_iter()
        .map(|name| {
            serde_json::json!({
                "id": name,
                "object": "model",
                "owned_by": "upstream",
            })
        })
        .collect();

    Json(serde_json::json!({ "data": models, "object": "list" }))
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    limit: Option<usize>,
}

/// Journal entries carry request metadata, so they sit behind the same gate
/// as completions.
async fn handle_logs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<LogsQuery>,
) -> Result<Json<serde_json::Value>> {
    authorize(&state.config, &headers)?;
    let entries = state.logger.recent(query.limit.unwrap_or(50));
    Ok(Json(serde_json::json!({ "data": entries })))
}

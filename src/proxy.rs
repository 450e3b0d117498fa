use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::logging::RequestLogger;
use crate::translate::openai_types::{ChatCompletionResponse, UpstreamCompletion, UpstreamRequest};
use crate::translate::response::{reshape_completion, truncate, upstream_failure, EnvelopeSeed};
use crate::translate::streaming::{relay_stream, ChunkReshaper, RelayEvent};

use futures::stream::Stream;
use futures::StreamExt;
use std::pin::Pin;
use std::time::Duration;

/// Caller-facing event stream for a streaming translation.
pub type RelayStream = Pin<Box<dyn Stream<Item = RelayEvent> + Send>>;

/// Shared HTTP client for the upstream; connections are pooled across requests.
pub fn build_client() -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .pool_idle_timeout(Duration::from_secs(90))
        .build()?;
    Ok(client)
}

async fn send(
    upstream_req: &UpstreamRequest,
    config: &ProxyConfig,
    client: &reqwest::Client,
) -> Result<reqwest::Response> {
    let api_key = config.resolve_api_key()?;
    client
        .post(config.completions_url())
        .bearer_auth(api_key)
        .json(upstream_req)
        .send()
        .await
        .map_err(|e| ProxyError::upstream(format!("Request failed: {}", e)))
}

fn timed_out(config: &ProxyConfig) -> ProxyError {
    ProxyError::Timeout {
        secs: config.upstream.timeout_secs,
    }
}

/// Run a non-streaming translation and reshape the result for the caller.
///
/// The whole round trip (send and body read) shares one timeout.
pub async fn translate_non_streaming(
    upstream_req: &UpstreamRequest,
    caller_model: &str,
    config: &ProxyConfig,
    client: &reqwest::Client,
    log: &RequestLogger,
) -> Result<ChatCompletionResponse> {
    log.info(
        "proxy",
        format!(
            "POST {} model={} target_lang={}",
            config.completions_url(),
            upstream_req.model,
            upstream_req.target_lang().unwrap_or("-")
        ),
    );

    let round_trip = async {
        let response = send(upstream_req, config, client).await?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ProxyError::upstream(format!("Failed to read response body: {}", e)))?;
        Ok::<_, ProxyError>((status, body))
    };

    let (status, body) = tokio::time::timeout(config.upstream_timeout(), round_trip)
        .await
        .map_err(|_| timed_out(config))??;

    log.debug(
        "proxy",
        format!("Response status={} body_len={}", status, body.len()),
    );

    if !(200..300).contains(&status) {
        return Err(upstream_failure(status, &body));
    }

    let completion: UpstreamCompletion = serde_json::from_str(&body).map_err(|e| {
        ProxyError::shaping(format!(
            "Failed to parse upstream response: {}. Body: {}",
            e,
            truncate(&body, 300)
        ))
    })?;

    let resp = reshape_completion(&completion, caller_model, &EnvelopeSeed::fresh())?;

    if let Some(ref usage) = resp.usage {
        log.info(
            "proxy",
            format!(
                "Completed: in={} out={} tokens",
                usage.prompt_tokens, usage.completion_tokens
            ),
        );
    }

    Ok(resp)
}

/// Start a streaming translation.
///
/// The timeout bounds the wait for the upstream's response headers, then
/// every gap between upstream events. Non-2xx statuses are returned as errors
/// before any event is produced.
pub async fn translate_streaming(
    upstream_req: &UpstreamRequest,
    caller_model: &str,
    config: &ProxyConfig,
    client: &reqwest::Client,
    log: &RequestLogger,
) -> Result<RelayStream> {
    log.info(
        "proxy",
        format!(
            "POST {} model={} target_lang={} (streaming)",
            config.completions_url(),
            upstream_req.model,
            upstream_req.target_lang().unwrap_or("-")
        ),
    );

    let opened = async {
        let response = send(upstream_req, config, client).await?;
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.map_err(|e| {
                ProxyError::upstream_status(
                    status,
                    format!("HTTP {} and failed to read error body: {}", status, e),
                )
            })?;
            return Err(upstream_failure(status, &body));
        }
        Ok::<_, ProxyError>(response)
    };

    let response = tokio::time::timeout(config.upstream_timeout(), opened)
        .await
        .map_err(|_| timed_out(config))??;

    let reshaper = ChunkReshaper::new(
        caller_model,
        EnvelopeSeed::fresh(),
        config.upstream.stream_mode,
    );

    let log = log.clone();
    let mut relayed = 0usize;
    let events = relay_stream(response.bytes_stream(), reshaper, config.upstream_timeout())
        .inspect(move |event| match event {
            RelayEvent::Chunk(_) => relayed += 1,
            RelayEvent::Done => {
                log.info("stream", format!("Stream completed after {} chunks", relayed))
            }
            RelayEvent::Error(err) => log.warn(
                "stream",
                format!("Stream aborted after {} chunks: {}", relayed, err.error.message),
            ),
        });

    Ok(Box::pin(events))
}

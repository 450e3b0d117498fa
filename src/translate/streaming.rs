//! Relay of upstream streaming chunks to the caller.
//!
//! The [`ChunkReshaper`] turns each upstream `chat.completion.chunk` into
//! exactly one caller-facing chunk, and [`relay_stream`] drives it over the
//! upstream server-sent event stream, ending with either [`RelayEvent::Done`]
//! or a single [`RelayEvent::Error`].

use eventsource_stream::Eventsource;
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::openai_types::{
    ChatCompletionChunk, ChatErrorResponse, ChunkChoice, ChunkDelta, UpstreamChunk,
};
use super::response::EnvelopeSeed;

/// Terminal sentinel of an OpenAI-style event stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// How the upstream fills `delta.content`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// Each chunk carries only the new text.
    #[default]
    Incremental,
    /// Each chunk repeats the whole translation so far.
    Cumulative,
}

/// One item of the caller-facing stream.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    Chunk(ChatCompletionChunk),
    Done,
    Error(ChatErrorResponse),
}

impl RelayEvent {
    /// Payload for the SSE `data:` field.
    pub fn to_sse_data(&self) -> String {
        match self {
            Self::Chunk(chunk) => serde_json::to_string(chunk).unwrap_or_default(),
            Self::Done => DONE_SENTINEL.to_string(),
            Self::Error(err) => serde_json::to_string(err).unwrap_or_default(),
        }
    }
}

/// Per-stream reshaping state.
#[derive(Debug)]
pub struct ChunkReshaper {
    model: String,
    seed: EnvelopeSeed,
    mode: StreamMode,
    id: Option<String>,
    created: i64,
    sent_role: bool,
    seen_text: String,
    saw_finish: bool,
}

impl ChunkReshaper {
    pub fn new(model: &str, seed: EnvelopeSeed, mode: StreamMode) -> Self {
        Self {
            model: model.to_string(),
            created: seed.created,
            seed,
            mode,
            id: None,
            sent_role: false,
            seen_text: String::new(),
            saw_finish: false,
        }
    }

    /// Reshape one upstream chunk into one caller chunk.
    pub fn reshape(&mut self, chunk: &UpstreamChunk) -> ChatCompletionChunk {
        let id = match self.id {
            Some(ref id) => id.clone(),
            None => {
                let id = self.seed.id_or(&chunk.id);
                self.created = self.seed.created_or(chunk.created);
                self.id = Some(id.clone());
                id
            }
        };

        let choice = chunk.choices.first();
        let mut delta = ChunkDelta::default();

        if !self.sent_role {
            delta.role = Some("assistant".to_string());
            self.sent_role = true;
        }
        if let Some(text) = choice.and_then(|c| c.delta.content.as_deref()) {
            delta.content = Some(self.fragment(text));
        }

        let finish_reason = choice.and_then(|c| c.finish_reason.clone());
        if finish_reason.is_some() {
            self.saw_finish = true;
        }

        ChatCompletionChunk {
            id,
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage: chunk.usage.clone(),
        }
    }

    /// Whether any chunk so far carried a `finish_reason`.
    pub fn saw_finish(&self) -> bool {
        self.saw_finish
    }

    fn fragment(&mut self, text: &str) -> String {
        match self.mode {
            StreamMode::Incremental => text.to_string(),
            StreamMode::Cumulative => {
                let fragment = match text.strip_prefix(self.seen_text.as_str()) {
                    Some(suffix) => suffix.to_string(),
                    // Upstream rewrote earlier text; send what it has now.
                    None => text.to_string(),
                };
                self.seen_text = text.to_string();
                fragment
            }
        }
    }
}

/// Logs streams dropped before they finished, i.e. the caller went away.
struct DisconnectGuard {
    finished: bool,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if !self.finished {
            tracing::info!("Caller disconnected mid-stream, releasing upstream connection");
        }
    }
}

/// Relay an upstream SSE byte stream as reshaped caller events.
///
/// Chunks are forwarded in arrival order. The stream always ends: with
/// `Done` after `[DONE]` (or a clean close after a `finish_reason`), with one
/// `Error` otherwise. An upstream that goes quiet for longer than
/// `idle_timeout` between events counts as failed. Dropping the returned
/// stream drops the upstream one.
pub fn relay_stream<S, B, E>(
    byte_stream: S,
    mut reshaper: ChunkReshaper,
    idle_timeout: Duration,
) -> impl Stream<Item = RelayEvent> + Send + 'static
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::stream! {
        let mut guard = DisconnectGuard { finished: false };
        let events = byte_stream.eventsource();
        tokio::pin!(events);

        let mut completed = false;
        let mut failure: Option<String> = None;

        loop {
            let next = match tokio::time::timeout(idle_timeout, events.next()).await {
                Ok(Some(next)) => next,
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(secs = idle_timeout.as_secs_f64(), "Upstream stream stalled");
                    failure = Some(format!(
                        "upstream sent nothing for {}s",
                        idle_timeout.as_secs_f64()
                    ));
                    break;
                }
            };
            let event = match next {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, "Upstream stream failed");
                    failure = Some(format!("upstream stream failed: {e}"));
                    break;
                }
            };

            let data = event.data.trim();
            if data.is_empty() {
                continue;
            }
            if data == DONE_SENTINEL {
                completed = true;
                break;
            }

            if let Ok(err) = serde_json::from_str::<ChatErrorResponse>(data) {
                tracing::warn!(message = %err.error.message, "Upstream sent an error mid-stream");
                failure = Some(err.error.message);
                break;
            }

            let chunk: UpstreamChunk = match serde_json::from_str(data) {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unparseable upstream chunk");
                    continue;
                }
            };

            yield RelayEvent::Chunk(reshaper.reshape(&chunk));
        }

        guard.finished = true;

        if completed || (failure.is_none() && reshaper.saw_finish()) {
            yield RelayEvent::Done;
        } else {
            let message = failure
                .unwrap_or_else(|| "upstream stream ended before completion".to_string());
            yield RelayEvent::Error(ChatErrorResponse::new("upstream_error", message));
        }
    }
}

use super::openai_types::{
    ChatCompletionResponse, ChatErrorResponse, Choice, ResponseMessage, UpstreamCompletion,
};
use crate::error::{ProxyError, Result};

/// Identity used for a response when the upstream leaves `id` or `created` out.
///
/// Created once per request so reshaping stays a pure function of its inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeSeed {
    pub id: String,
    pub created: i64,
}

impl EnvelopeSeed {
    pub fn fresh() -> Self {
        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            created: chrono::Utc::now().timestamp(),
        }
    }

    pub(crate) fn id_or(&self, upstream_id: &str) -> String {
        if upstream_id.is_empty() {
            self.id.clone()
        } else {
            upstream_id.to_string()
        }
    }

    pub(crate) fn created_or(&self, upstream_created: i64) -> i64 {
        if upstream_created > 0 {
            upstream_created
        } else {
            self.created
        }
    }
}

/// Reshape a complete upstream translation into a chat completion.
/// `model` is what the caller originally requested.
pub fn reshape_completion(
    resp: &UpstreamCompletion,
    model: &str,
    seed: &EnvelopeSeed,
) -> Result<ChatCompletionResponse> {
    let content = resp
        .choices
        .first()
        .and_then(|c| c.message.as_ref())
        .and_then(|m| m.content.clone())
        .ok_or_else(|| ProxyError::shaping("upstream response has no choices[0].message.content"))?;

    Ok(ChatCompletionResponse {
        id: seed.id_or(&resp.id),
        object: "chat.completion".to_string(),
        created: seed.created_or(resp.created),
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: ResponseMessage {
                role: "assistant".to_string(),
                content,
            },
            finish_reason: "stop".to_string(),
        }],
        usage: resp.usage.clone(),
    })
}

/// Turn a non-2xx upstream body into a proxy error carrying the upstream status.
pub fn upstream_failure(status: u16, body: &str) -> ProxyError {
    match serde_json::from_str::<ChatErrorResponse>(body) {
        Ok(err) => ProxyError::upstream_status(status, err.error.message),
        Err(_) => ProxyError::upstream_status(
            status,
            format!("upstream returned status {}: {}", status, truncate(body, 500)),
        ),
    }
}

pub(crate) fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::openai_types::*;

    fn seed() -> EnvelopeSeed {
        EnvelopeSeed {
            id: "chatcmpl-seed".to_string(),
            created: 1_700_000_000,
        }
    }

    fn make_response(content: Option<&str>, finish_reason: Option<&str>) -> UpstreamCompletion {
        UpstreamCompletion {
            id: "chatcmpl-abc123".to_string(),
            created: 1_712_345_678,
            model: "qwen-mt-turbo".to_string(),
            choices: vec![UpstreamChoice {
                index: 0,
                message: Some(UpstreamMessage {
                    role: Some("assistant".to_string()),
                    content: content.map(String::from),
                }),
                finish_reason: finish_reason.map(String::from),
            }],
            usage: Some(ChatUsage {
                prompt_tokens: 10,
                completion_tokens: 20,
                total_tokens: 30,
            }),
        }
    }

    #[test]
    fn test_simple_translation() {
        let resp = make_response(Some("こんにちは"), Some("stop"));
        let result = reshape_completion(&resp, "my-model", &seed()).unwrap();

        assert_eq!(result.id, "chatcmpl-abc123");
        assert_eq!(result.object, "chat.completion");
        assert_eq!(result.created, 1_712_345_678);
        assert_eq!(result.model, "my-model");
        assert_eq!(result.choices.len(), 1);
        assert_eq!(result.choices[0].message.role, "assistant");
        assert_eq!(result.choices[0].message.content, "こんにちは");
        assert_eq!(result.choices[0].finish_reason, "stop");
        assert_eq!(result.usage.unwrap().total_tokens, 30);
    }

    #[test]
    fn test_finish_reason_always_stop() {
        let resp = make_response(Some("partial"), Some("length"));
        let result = reshape_completion(&resp, "m", &seed()).unwrap();
        assert_eq!(result.choices[0].finish_reason, "stop");
    }

    #[test]
    fn test_missing_content_is_shaping_error() {
        let resp = make_response(None, Some("stop"));
        let err = reshape_completion(&resp, "m", &seed()).unwrap_err();
        assert!(matches!(err, ProxyError::Shaping { .. }));

        let mut empty = make_response(Some("x"), None);
        empty.choices.clear();
        assert!(matches!(
            reshape_completion(&empty, "m", &seed()),
            Err(ProxyError::Shaping { .. })
        ));
    }

    #[test]
    fn test_seed_fills_missing_identity() {
        let mut resp = make_response(Some("Hola"), None);
        resp.id = String::new();
        resp.created = 0;

        let result = reshape_completion(&resp, "m", &seed()).unwrap();
        assert_eq!(result.id, "chatcmpl-seed");
        assert_eq!(result.created, 1_700_000_000);
    }

    #[test]
    fn test_reshape_is_idempotent() {
        let resp = make_response(Some("Bonjour"), Some("stop"));
        let seed = seed();

        let first = serde_json::to_vec(&reshape_completion(&resp, "m", &seed).unwrap()).unwrap();
        let second = serde_json::to_vec(&reshape_completion(&resp, "m", &seed).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_upstream_failure_uses_error_message() {
        let err = upstream_failure(
            429,
            r#"{"error":{"message":"Rate limit exceeded","type":"rate_limit_error"}}"#,
        );
        match err {
            ProxyError::Upstream { status, message } => {
                assert_eq!(status, Some(429));
                assert_eq!(message, "Rate limit exceeded");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_upstream_failure_plain_body() {
        let err = upstream_failure(502, "<html>Bad Gateway</html>");
        assert!(err.to_string().contains("502"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("你好世界", 4), "你");
        assert_eq!(truncate("short", 10), "short");
    }
}

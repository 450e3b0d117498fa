//! Build the upstream translation request from a caller's chat completion request.
//!
//! System messages are consumed as configuration and never forwarded. The
//! resolved languages and passthrough options travel in `translation_options`.

use serde_json::{Map, Value};

use super::openai_types::{ChatCompletionRequest, Role, StreamOptions, UpstreamRequest};
use super::options::TranslationOptions;
use crate::config::ProxyConfig;

/// Source language sent when the caller did not name one.
pub const AUTO_SOURCE: &str = "auto";

/// Top-level fields the builder sets itself; caller copies are dropped.
const RESERVED_FIELDS: &[&str] = &[
    "model",
    "messages",
    "stream",
    "stream_options",
    "translation_options",
];

/// Translate a caller request plus resolved options into the upstream payload.
/// Pure function: no I/O, the config is only read.
pub fn build_upstream_request(
    req: &ChatCompletionRequest,
    options: &TranslationOptions,
    target_language: &str,
    config: &ProxyConfig,
) -> UpstreamRequest {
    let messages = req
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .cloned()
        .collect();

    let mut translation_options = config.defaults.clone();
    for (key, value) in &options.passthrough {
        translation_options.insert(key.clone(), value.clone());
    }
    translation_options.insert(
        "source_lang".to_string(),
        Value::String(
            options
                .source_language
                .clone()
                .unwrap_or_else(|| AUTO_SOURCE.to_string()),
        ),
    );
    translation_options.insert(
        "target_lang".to_string(),
        Value::String(target_language.to_string()),
    );

    let extra: Map<String, Value> = req
        .extra
        .iter()
        .filter(|(key, _)| !RESERVED_FIELDS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    let stream_options = req.stream.then_some(StreamOptions {
        include_usage: true,
    });

    UpstreamRequest {
        model: config.upstream_model(&req.model),
        messages,
        stream: req.stream,
        stream_options,
        translation_options,
        extra,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::openai_types::ChatMessage;
    use serde_json::json;

    fn config() -> ProxyConfig {
        ProxyConfig::with_base_url("http://localhost:9000/v1")
    }

    fn request(messages: Vec<ChatMessage>, stream: bool) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: "qwen-mt-turbo".to_string(),
            messages,
            stream,
            extra: Map::new(),
        }
    }

    #[test]
    fn test_system_message_not_forwarded() {
        let req = request(
            vec![
                ChatMessage::system(r#"{"target_language":"ja"}"#),
                ChatMessage::user("Hello"),
            ],
            false,
        );
        let options = TranslationOptions {
            target_language: Some("ja".to_string()),
            ..TranslationOptions::default()
        };

        let upstream = build_upstream_request(&req, &options, "ja", &config());

        assert_eq!(upstream.messages.len(), 1);
        assert_eq!(upstream.messages[0].role, Role::User);
        assert_eq!(upstream.target_lang(), Some("ja"));
        assert_eq!(upstream.translation_options["source_lang"], "auto");
        assert_eq!(upstream.model, "qwen-mt-turbo");
        assert!(!upstream.stream);
        assert!(upstream.stream_options.is_none());
    }

    #[test]
    fn test_passthrough_and_defaults_merge() {
        let mut config = config();
        config
            .defaults
            .insert("domains".to_string(), json!("General"));
        config.defaults.insert("tone".to_string(), json!("neutral"));

        let mut passthrough = Map::new();
        passthrough.insert("tone".to_string(), json!("formal"));
        passthrough.insert("terms".to_string(), json!([{"source": "a", "target": "b"}]));
        // Passthrough cannot override the resolved language.
        passthrough.insert("target_lang".to_string(), json!("xx"));
        let options = TranslationOptions {
            target_language: None,
            source_language: Some("en".to_string()),
            passthrough,
        };

        let req = request(vec![ChatMessage::user("Hello")], false);
        let upstream = build_upstream_request(&req, &options, "zh", &config);

        let opts = &upstream.translation_options;
        assert_eq!(opts["domains"], "General");
        assert_eq!(opts["tone"], "formal");
        assert_eq!(opts["terms"], json!([{"source": "a", "target": "b"}]));
        assert_eq!(opts["source_lang"], "en");
        assert_eq!(opts["target_lang"], "zh");
    }

    #[test]
    fn test_streaming_requests_usage() {
        let req = request(vec![ChatMessage::user("Hello")], true);
        let upstream =
            build_upstream_request(&req, &TranslationOptions::default(), "zh", &config());

        assert!(upstream.stream);
        assert!(upstream.stream_options.unwrap().include_usage);
    }

    #[test]
    fn test_extra_fields_forwarded_reserved_dropped() {
        let mut req = request(vec![ChatMessage::user("Hello")], false);
        req.extra.insert("temperature".to_string(), json!(0.3));
        req.extra
            .insert("translation_options".to_string(), json!({"target_lang": "fr"}));

        let upstream =
            build_upstream_request(&req, &TranslationOptions::default(), "zh", &config());
        let body = serde_json::to_value(&upstream).unwrap();

        assert_eq!(body["temperature"], 0.3);
        assert_eq!(body["translation_options"]["target_lang"], "zh");
    }

    #[test]
    fn test_fixed_model_substituted() {
        let mut config = config();
        config.upstream.model = Some("qwen-mt-plus".to_string());

        let req = request(vec![ChatMessage::user("Hello")], false);
        let upstream = build_upstream_request(&req, &TranslationOptions::default(), "zh", &config);

        assert_eq!(upstream.model, "qwen-mt-plus");
    }
}

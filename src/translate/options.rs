//! Translation options carried in the caller's system message.
//!
//! Callers configure a translation by putting a JSON object in the system
//! message, e.g. `{"target_language": "ja", "terms": [...]}`. The payload may
//! also be embedded in surrounding prose. Anything that does not parse is
//! ignored: the request proceeds with inferred defaults instead of failing.

use serde_json::{Map, Value};

use super::openai_types::{ChatMessage, Role};

const TARGET_LANGUAGE_KEY: &str = "target_language";
const SOURCE_LANGUAGE_KEY: &str = "source_language";

/// Options resolved from one request's system message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranslationOptions {
    pub target_language: Option<String>,
    pub source_language: Option<String>,
    /// Unrecognized keys, forwarded verbatim.
    pub passthrough: Map<String, Value>,
}

impl TranslationOptions {
    pub fn is_empty(&self) -> bool {
        self.target_language.is_none()
            && self.source_language.is_none()
            && self.passthrough.is_empty()
    }
}

/// Content of the first system message, which carries the options.
pub fn system_content(messages: &[ChatMessage]) -> Option<String> {
    messages
        .iter()
        .find(|m| m.role == Role::System)
        .map(|m| m.content.as_text())
}

/// Parse options from a system message.
///
/// Returns empty options when there is no system message or its content is
/// not a JSON object.
pub fn parse_options(system: Option<&str>) -> TranslationOptions {
    let Some(text) = system else {
        return TranslationOptions::default();
    };

    match extract_object(text) {
        Some(object) => from_object(object),
        None => {
            tracing::debug!("System message carries no option payload, using defaults");
            TranslationOptions::default()
        }
    }
}

fn extract_object(text: &str) -> Option<Map<String, Value>> {
    let trimmed = text.trim();
    if let Ok(Value::Object(object)) = serde_json::from_str(trimmed) {
        return Some(object);
    }

    // Payload embedded in prose: take the outermost braces.
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str(&trimmed[start..=end]) {
        Ok(Value::Object(object)) => Some(object),
        _ => None,
    }
}

fn from_object(mut object: Map<String, Value>) -> TranslationOptions {
    let target_language = take_language(&mut object, TARGET_LANGUAGE_KEY);
    let source_language = take_language(&mut object, SOURCE_LANGUAGE_KEY);

    TranslationOptions {
        target_language,
        source_language,
        passthrough: object,
    }
}

/// Remove `key` and keep it only if it is a non-empty string.
fn take_language(object: &mut Map<String, Value>, key: &str) -> Option<String> {
    match object.remove(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_no_system_message() {
        assert!(parse_options(None).is_empty());
    }

    #[test]
    fn test_target_language() {
        let opts = parse_options(Some(r#"{"target_language": "ja"}"#));
        assert_eq!(opts.target_language.as_deref(), Some("ja"));
        assert!(opts.passthrough.is_empty());
    }

    #[test]
    fn test_passthrough_preserved() {
        let opts = parse_options(Some(
            r#"{"target_language": "fr", "tone": "formal", "terms": [{"source": "GPU", "target": "GPU"}]}"#,
        ));
        assert_eq!(opts.target_language.as_deref(), Some("fr"));
        assert_eq!(opts.passthrough["tone"], json!("formal"));
        assert_eq!(
            opts.passthrough["terms"],
            json!([{"source": "GPU", "target": "GPU"}])
        );
    }

    #[test]
    fn test_missing_target_keeps_passthrough() {
        let opts = parse_options(Some(r#"{"domains": "medical"}"#));
        assert!(opts.target_language.is_none());
        assert_eq!(opts.passthrough["domains"], json!("medical"));
    }

    #[test]
    fn test_plain_text_degrades() {
        let opts = parse_options(Some("You are a helpful translator."));
        assert!(opts.is_empty());
    }

    #[test]
    fn test_broken_json_degrades() {
        assert!(parse_options(Some(r#"{"target_language": "ja""#)).is_empty());
        assert!(parse_options(Some("} nonsense {")).is_empty());
    }

    #[test]
    fn test_non_object_json_degrades() {
        assert!(parse_options(Some(r#"["ja"]"#)).is_empty());
        assert!(parse_options(Some("42")).is_empty());
    }

    #[test]
    fn test_embedded_payload() {
        let opts = parse_options(Some(
            "Translate carefully. Options: {\"target_language\": \"de\"} Thanks!",
        ));
        assert_eq!(opts.target_language.as_deref(), Some("de"));
    }

    #[test]
    fn test_non_string_target_treated_as_absent() {
        let opts = parse_options(Some(r#"{"target_language": 7, "tone": "casual"}"#));
        assert!(opts.target_language.is_none());
        assert!(!opts.passthrough.contains_key("target_language"));
        assert_eq!(opts.passthrough["tone"], json!("casual"));
    }

    #[test]
    fn test_blank_target_treated_as_absent() {
        let opts = parse_options(Some(r#"{"target_language": "  "}"#));
        assert!(opts.target_language.is_none());
    }

    #[test]
    fn test_source_language() {
        let opts = parse_options(Some(r#"{"source_language": "en", "target_language": "ko"}"#));
        assert_eq!(opts.source_language.as_deref(), Some("en"));
        assert_eq!(opts.target_language.as_deref(), Some("ko"));
    }

    #[test]
    fn test_first_system_message_wins() {
        let messages = vec![
            ChatMessage::system(r#"{"target_language": "ja"}"#),
            ChatMessage::user("Hello"),
            ChatMessage::system(r#"{"target_language": "fr"}"#),
        ];
        let opts = parse_options(system_content(&messages).as_deref());
        assert_eq!(opts.target_language.as_deref(), Some("ja"));
    }
}

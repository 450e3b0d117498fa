//! Character counting and the default target-language heuristic.
//!
//! When a caller does not say which language they want, the proxy picks one of
//! two buckets: text that is mostly CJK ideographs goes to English, everything
//! else goes to Chinese. Ties and text with neither kind of character resolve
//! to Chinese.

use super::openai_types::{ChatMessage, Role};
use super::options::TranslationOptions;

/// Target used when the text is mostly CJK ideographs.
pub const CJK_TARGET: &str = "en";
/// Target used for everything else, including ties and empty text.
pub const FALLBACK_TARGET: &str = "zh";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharCounts {
    /// Code points in the CJK Unified Ideographs block.
    pub cjk: usize,
    /// ASCII and Latin (Latin-1 Supplement, Extended-A/B) letters.
    pub letters: usize,
}

/// Count CJK ideographs and Latin letters in one pass over `text`.
pub fn classify(text: &str) -> CharCounts {
    text.chars().fold(CharCounts::default(), |mut counts, c| {
        if is_cjk_ideograph(c) {
            counts.cjk += 1;
        } else if is_latin_letter(c) {
            counts.letters += 1;
        }
        counts
    })
}

fn is_cjk_ideograph(c: char) -> bool {
    matches!(c as u32, 0x4E00..=0x9FFF)
}

fn is_latin_letter(c: char) -> bool {
    c.is_ascii_alphabetic() || (matches!(c as u32, 0x00C0..=0x024F) && c.is_alphabetic())
}

/// Pick a target language for `text`.
pub fn infer_target_language(text: &str) -> &'static str {
    let counts = classify(text);
    if counts.cjk > counts.letters {
        CJK_TARGET
    } else {
        FALLBACK_TARGET
    }
}

/// Concatenated content of every user message: the text to be translated.
pub fn user_text(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| m.content.as_text())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Target language for a request: the configured one, or the inferred default.
pub fn resolve_target_language(messages: &[ChatMessage], options: &TranslationOptions) -> String {
    match options.target_language {
        Some(ref target) => target.clone(),
        None => infer_target_language(&user_text(messages)).to_string(),
    }
}
